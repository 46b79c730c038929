//! Save state (quick save / quick load) for the peripheral model.
//!
//! Captures the full model state to a file using bincode serialization
//! with deflate compression.
//!
//! ## File format
//!
//! ```text
//! +------------------+
//! | Magic "SPWM"     |  4 bytes
//! +------------------+
//! | Format version   |  u32 little-endian (currently 1)
//! +------------------+
//! | PWM period       |  u32 little-endian, in system clocks
//! +------------------+
//! | Compressed data  |  deflate-compressed bincode payload
//! +------------------+
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Magic bytes identifying a save state file.
const MAGIC: &[u8; 4] = b"SPWM";
/// Current save state format version.
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum SaveStateError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("file too small ({0} bytes)")]
    TooSmall(usize),

    #[error("invalid save state file (bad magic)")]
    BadMagic,

    #[error("unsupported save state version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },

    #[error("PWM period mismatch: save={saved} current={current}")]
    PeriodMismatch { saved: u32, current: u32 },

    #[error("SPI engine mid-frame with {count} bits captured (frames are {max} bits)")]
    FrameBits { count: u8, max: u8 },

    #[error("decompress error: {0}")]
    Decompress(String),

    #[error("serialization error: {0}")]
    Codec(#[from] bincode::Error),
}

// ─── Per-component state structs ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpiState {
    pub receiving: bool,
    pub count: u8,
    pub shift: u16,
    pub prev_ncs: bool,
    pub prev_sclk: bool,
    pub frames: u64,
    pub aborted: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterState {
    pub values: [u8; crate::peripherals::REG_COUNT],
    pub ignored_writes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PwmState {
    pub count_a: u32,
    pub count_b: u32,
    pub level_a: bool,
    pub level_b: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputState {
    pub ncs: bool,
    pub sclk: bool,
    pub copi: bool,
    pub rst_n: bool,
    pub ena: bool,
}

// ─── Top-level save state ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveState {
    pub tick: u64,
    pub clock_hz: u32,
    pub pwm_hz: u32,
    pub inputs: InputState,
    pub spi: SpiState,
    pub regs: RegisterState,
    pub pwm: PwmState,
    pub port_a: u8,
    pub port_b: u8,
    pub last_read: Option<u8>,
}

impl SaveState {
    fn pwm_period(&self) -> u32 {
        crate::PeripheralConfig { clock_hz: self.clock_hz, pwm_hz: self.pwm_hz }.pwm_period()
    }
}

// ─── Encoding ───────────────────────────────────────────────────────────────

/// Encode a state with header and deflate compression.
pub fn encode(state: &SaveState) -> Result<Vec<u8>, SaveStateError> {
    let payload = bincode::serialize(state)?;
    let compressed = miniz_oxide::deflate::compress_to_vec(&payload, 6);

    let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&state.pwm_period().to_le_bytes());
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Decode a state, verifying magic, version, and PWM period.
pub fn decode(data: &[u8], expected_period: u32) -> Result<SaveState, SaveStateError> {
    if data.len() < HEADER_LEN {
        return Err(SaveStateError::TooSmall(data.len()));
    }
    if &data[0..4] != MAGIC {
        return Err(SaveStateError::BadMagic);
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != FORMAT_VERSION {
        return Err(SaveStateError::Version { found: version, expected: FORMAT_VERSION });
    }
    let period = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
    if period != expected_period {
        return Err(SaveStateError::PeriodMismatch { saved: period, current: expected_period });
    }

    let decompressed = miniz_oxide::inflate::decompress_to_vec(&data[HEADER_LEN..])
        .map_err(|e| SaveStateError::Decompress(format!("{:?}", e)))?;

    let state: SaveState = bincode::deserialize(&decompressed)?;
    let max = crate::peripherals::FRAME_BITS;
    if state.spi.receiving && state.spi.count >= max {
        return Err(SaveStateError::FrameBits { count: state.spi.count, max });
    }
    Ok(state)
}

// ─── File I/O ───────────────────────────────────────────────────────────────

pub fn save_to_file(state: &SaveState, path: &Path) -> Result<(), SaveStateError> {
    let out = encode(state)?;
    std::fs::write(path, &out).map_err(|source| SaveStateError::Io {
        path: path.display().to_string(),
        source,
    })
}

pub fn load_from_file(path: &Path, expected_period: u32) -> Result<SaveState, SaveStateError> {
    let data = std::fs::read(path).map_err(|source| SaveStateError::Io {
        path: path.display().to_string(),
        source,
    })?;
    decode(&data, expected_period)
}

/// Derive save state file path from a script path.
/// `demo.spi` → `demo.state`
pub fn state_path(script_path: &str) -> String {
    let p = Path::new(script_path);
    let stem = p.file_stem().and_then(|s| s.to_str()).unwrap_or("spipwm");
    let dir = p.parent().unwrap_or(Path::new("."));
    dir.join(format!("{}.state", stem)).to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{master::SpiMaster, Peripheral};

    fn configured() -> Peripheral {
        let mut dev = Peripheral::new();
        let master = SpiMaster::default();
        master.write(&mut dev, 0x00, 0xFF).unwrap();
        master.write(&mut dev, 0x02, 0x0F).unwrap();
        master.write(&mut dev, 0x04, 0x7F).unwrap();
        dev.run(1234);
        dev
    }

    #[test]
    fn test_restore_continues_identically() {
        let mut a = configured();
        let bytes = encode(&a.save_state()).unwrap();

        let mut b = Peripheral::new();
        b.load_state(&decode(&bytes, 3333).unwrap());
        assert_eq!(b.tick, a.tick);
        for _ in 0..5000 {
            a.tick();
            b.tick();
            assert_eq!(a.port_a_out(), b.port_a_out());
        }
        assert_eq!(a.save_state(), b.save_state());
    }

    #[test]
    fn test_rejects_bad_header() {
        let bytes = encode(&configured().save_state()).unwrap();
        assert!(matches!(decode(&bytes[..4], 3333), Err(SaveStateError::TooSmall(4))));
        assert!(matches!(decode(&bytes, 1000), Err(SaveStateError::PeriodMismatch { saved: 3333, .. })));

        let mut bad = bytes.clone();
        bad[0] = b'X';
        assert!(matches!(decode(&bad, 3333), Err(SaveStateError::BadMagic)));

        let mut bad = bytes;
        bad[4] = 9;
        assert!(matches!(decode(&bad, 3333), Err(SaveStateError::Version { found: 9, .. })));
    }

    #[test]
    fn test_rejects_impossible_bit_count() {
        let mut state = configured().save_state();
        state.spi.receiving = true;
        state.spi.count = 250;
        let bytes = encode(&state).unwrap();
        assert!(matches!(decode(&bytes, 3333), Err(SaveStateError::FrameBits { count: 250, max: 16 })));

        state.spi.count = 15;
        let bytes = encode(&state).unwrap();
        assert_eq!(decode(&bytes, 3333).unwrap().spi.count, 15);
    }

    #[test]
    fn test_state_path() {
        assert_eq!(state_path("scripts/demo.spi"), "scripts/demo.state");
    }
}
