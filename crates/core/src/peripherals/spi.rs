//! SPI peripheral (slave) protocol engine.
//!
//! The engine oversamples chip-select, serial clock and COPI once per
//! system clock. A frame is 16 bits, MSB first, captured on serial clock
//! rising edges while chip-select is low:
//!
//! ```text
//!  15 | 14 ........ 8 | 7 ........ 0
//!  RW |    address    |     data
//! ```
//!
//! RW = 1 is a write. The frame is dispatched on the tick its 16th bit is
//! captured, after which the engine returns to idle until chip-select is
//! released and asserted again. Releasing chip-select mid-frame drops the
//! partial frame.

use log::trace;
use thiserror::Error;

/// Bits per frame
pub const FRAME_BITS: u8 = 16;
/// Highest 7-bit register address
pub const MAX_ADDRESS: u8 = 0x7F;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("address {0:#04x} does not fit in 7 bits")]
    AddressOutOfRange(u8),
}

/// One decoded 16-bit SPI frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub write: bool,
    address: u8,
    pub data: u8,
}

impl Frame {
    pub fn new(write: bool, address: u8, data: u8) -> Result<Frame, FrameError> {
        if address > MAX_ADDRESS {
            return Err(FrameError::AddressOutOfRange(address));
        }
        Ok(Frame { write, address, data })
    }

    pub fn write(address: u8, data: u8) -> Result<Frame, FrameError> {
        Frame::new(true, address, data)
    }

    /// Read frame; the data byte is shifted in but ignored.
    pub fn read(address: u8) -> Result<Frame, FrameError> {
        Frame::new(false, address, 0)
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn decode(bits: u16) -> Frame {
        Frame {
            write: bits & 0x8000 != 0,
            address: ((bits >> 8) & 0x7F) as u8,
            data: bits as u8,
        }
    }

    pub fn encode(&self) -> u16 {
        ((self.write as u16) << 15) | ((self.address as u16) << 8) | self.data as u16
    }
}

/// Frame parser state. A partial frame only exists inside `Receiving`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Receiving { count: u8, shift: u16 },
}

pub struct Spi {
    pub state: FrameState,
    /// Chip-select level seen on the previous tick (true = deasserted)
    prev_ncs: bool,
    /// Serial clock level seen on the previous tick
    prev_sclk: bool,
    /// Completed frames since reset
    pub frames: u64,
    /// Frames dropped by an early chip-select release
    pub aborted: u64,
}

impl Spi {
    pub fn new() -> Self {
        Spi {
            state: FrameState::Idle,
            prev_ncs: true,
            prev_sclk: false,
            frames: 0,
            aborted: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Spi::new();
    }

    /// Sample the bus for one system clock. Returns a frame on the tick its
    /// last bit is captured.
    pub fn clock(&mut self, ncs: bool, sclk: bool, copi: bool) -> Option<Frame> {
        let cs_fall = self.prev_ncs && !ncs;
        let sclk_rise = !self.prev_sclk && sclk;
        self.prev_ncs = ncs;
        self.prev_sclk = sclk;

        match self.state {
            FrameState::Idle => {
                if cs_fall {
                    self.state = FrameState::Receiving { count: 0, shift: 0 };
                }
                None
            }
            FrameState::Receiving { count, .. } if ncs => {
                trace!("spi: frame aborted after {} bits", count);
                self.aborted += 1;
                self.state = FrameState::Idle;
                None
            }
            FrameState::Receiving { count, shift } => {
                if !sclk_rise {
                    return None;
                }
                let shift = (shift << 1) | copi as u16;
                let count = count + 1;
                if count == FRAME_BITS {
                    self.frames += 1;
                    self.state = FrameState::Idle;
                    Some(Frame::decode(shift))
                } else {
                    self.state = FrameState::Receiving { count, shift };
                    None
                }
            }
        }
    }

    /// Bits captured so far in the current frame.
    pub fn bits_received(&self) -> u8 {
        match self.state {
            FrameState::Idle => 0,
            FrameState::Receiving { count, .. } => count,
        }
    }

    pub fn save_state(&self) -> crate::savestate::SpiState {
        let (receiving, count, shift) = match self.state {
            FrameState::Idle => (false, 0, 0),
            FrameState::Receiving { count, shift } => (true, count, shift),
        };
        crate::savestate::SpiState {
            receiving, count, shift,
            prev_ncs: self.prev_ncs, prev_sclk: self.prev_sclk,
            frames: self.frames, aborted: self.aborted,
        }
    }

    /// A mid-frame state with a full or larger bit count restores as idle.
    pub fn load_state(&mut self, s: &crate::savestate::SpiState) {
        self.state = if s.receiving && s.count < FRAME_BITS {
            FrameState::Receiving { count: s.count, shift: s.shift }
        } else {
            FrameState::Idle
        };
        self.prev_ncs = s.prev_ncs;
        self.prev_sclk = s.prev_sclk;
        self.frames = s.frames;
        self.aborted = s.aborted;
    }
}

impl Default for Spi {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Clock a frame in with a two-tick serial clock, chip-select held low.
    fn shift_in(spi: &mut Spi, bits: u16, nbits: u8) -> Option<Frame> {
        let mut out = None;
        spi.clock(false, false, false);
        for i in (16 - nbits..16).rev() {
            let bit = (bits >> i) & 1 != 0;
            assert!(spi.clock(false, false, bit).is_none());
            if let Some(f) = spi.clock(false, true, bit) {
                out = Some(f);
            }
        }
        out
    }

    #[test]
    fn test_full_frame() {
        let mut spi = Spi::new();
        let f = shift_in(&mut spi, 0x80F0, 16).unwrap();
        assert!(f.write);
        assert_eq!(f.address(), 0x00);
        assert_eq!(f.data, 0xF0);
        assert_eq!(spi.state, FrameState::Idle);
        assert_eq!(spi.frames, 1);
    }

    #[test]
    fn test_read_frame_decodes_address() {
        let mut spi = Spi::new();
        let f = shift_in(&mut spi, Frame::read(0x30).unwrap().encode(), 16).unwrap();
        assert!(!f.write);
        assert_eq!(f.address(), 0x30);
    }

    #[test]
    fn test_abort_drops_partial_frame() {
        let mut spi = Spi::new();
        assert!(shift_in(&mut spi, 0x80F0, 10).is_none());
        assert_eq!(spi.bits_received(), 10);
        assert!(spi.clock(true, false, false).is_none());
        assert_eq!(spi.state, FrameState::Idle);
        assert_eq!(spi.aborted, 1);
        // A fresh frame afterwards starts from bit 0
        let f = shift_in(&mut spi, 0x8155, 16).unwrap();
        assert_eq!((f.address(), f.data), (0x01, 0x55));
    }

    #[test]
    fn test_no_capture_without_chip_select_edge() {
        let mut spi = Spi::new();
        spi.clock(true, false, true);
        for _ in 0..40 {
            assert!(spi.clock(true, true, true).is_none());
            assert!(spi.clock(true, false, true).is_none());
        }
        assert_eq!(spi.bits_received(), 0);
    }

    #[test]
    fn test_extra_bits_ignored_until_reselect() {
        let mut spi = Spi::new();
        assert!(shift_in(&mut spi, 0x80F0, 16).is_some());
        // chip-select still low: more clocks do not start a frame
        for _ in 0..16 {
            spi.clock(false, false, true);
            assert!(spi.clock(false, true, true).is_none());
        }
        assert_eq!(spi.frames, 1);
    }

    #[test]
    fn test_level_high_sclk_counts_once() {
        let mut spi = Spi::new();
        spi.clock(false, false, false);
        for _ in 0..5 {
            spi.clock(false, true, true);
        }
        assert_eq!(spi.bits_received(), 1);
    }

    #[test]
    fn test_frame_address_range() {
        assert_eq!(Frame::write(0x80, 0), Err(FrameError::AddressOutOfRange(0x80)));
        assert_eq!(Frame::decode(0xFFAB).address(), 0x7F);
        assert_eq!(Frame::write(0x04, 0xCF).unwrap().encode(), 0x84CF);
    }

    #[test]
    fn test_load_overlong_count_restores_idle() {
        let mut spi = Spi::new();
        let mut state = spi.save_state();
        state.receiving = true;
        state.count = 250;
        state.prev_ncs = false;
        spi.load_state(&state);
        assert_eq!(spi.state, FrameState::Idle);
        for _ in 0..10 {
            spi.clock(false, false, true);
            assert!(spi.clock(false, true, true).is_none());
        }
        assert_eq!(spi.bits_received(), 0);

        // A valid mid-frame state resumes where it left off
        state.count = 15;
        state.shift = 0x0040;
        state.prev_sclk = false;
        spi.load_state(&state);
        spi.clock(false, false, true);
        assert_eq!(spi.clock(false, true, true), Some(Frame::decode(0x0081)));
    }
}
