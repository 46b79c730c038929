//! # spipwm-core
//!
//! Cycle-accurate model of a small SPI-programmed peripheral with two 8-bit
//! output ports and a shared PWM generator (v0.3.0).
//!
//! The model advances one system clock per [`Peripheral::tick`]. Inputs are
//! the harness pin bundle (`ui_in`: serial clock, COPI, chip-select), the
//! active-low synchronous reset and the global enable. Outputs are the two
//! parallel ports `uo_out` (port A) and `uio_out` (port B).
//!
//! ## Architecture
//!
//! - [`Peripheral`] — Top-level model that wires the SPI engine, register file and PWM
//! - [`peripherals`] — SPI frame receiver, register file, PWM counters
//! - [`config`] — Clock, PWM and bus timing configuration (TOML)
//! - [`master`] — Bit-banging SPI bus master for driving the model
//! - [`probe`] — Edge detection and PWM period/duty measurement
//! - [`script`] — Stimulus script parser and runner
//! - [`trace`] — Rolling waveform capture of both ports
//! - [`png`] — PNG export of captured waveforms
//! - [`savestate`] — Compressed save/restore of model state
//!
//! ## Register map
//!
//! | Addr | Name    | Function                         |
//! |------|---------|----------------------------------|
//! | 0x00 | OE_A    | output enable mask, port A       |
//! | 0x01 | OE_B    | output enable mask, port B       |
//! | 0x02 | PWMEN_A | PWM enable mask, port A          |
//! | 0x03 | PWMEN_B | PWM enable mask, port B          |
//! | 0x04 | DUTY    | duty level, duty = value / 255   |

use log::{debug, info};

pub mod peripherals;
pub mod config;
pub mod master;
pub mod probe;
pub mod script;
pub mod trace;
pub mod png;
pub mod savestate;

pub use config::{BusTiming, PeripheralConfig, SimConfig};
pub use peripherals::{Frame, Register};

/// Default system clock: 10 MHz
pub const CLOCK_HZ: u32 = 10_000_000;
/// Default PWM frequency: 3 kHz
pub const PWM_HZ: u32 = 3_000;

// ui_in bit positions
pub const UI_SCLK: u8 = 0;
pub const UI_COPI: u8 = 1;
pub const UI_NCS: u8 = 2;

/// Sampled input pins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inputs {
    /// Chip-select, active low
    pub ncs: bool,
    pub sclk: bool,
    pub copi: bool,
    /// Reset, active low
    pub rst_n: bool,
    /// Global enable
    pub ena: bool,
}

impl Inputs {
    /// Bus idle, out of reset, enabled.
    pub fn idle() -> Self {
        Inputs { ncs: true, sclk: false, copi: false, rst_n: true, ena: true }
    }

    /// Packed `ui_in` view of the SPI pins.
    pub fn ui_in(&self) -> u8 {
        ((self.ncs as u8) << UI_NCS) | ((self.copi as u8) << UI_COPI) | ((self.sclk as u8) << UI_SCLK)
    }
}

impl Default for Inputs {
    fn default() -> Self {
        Self::idle()
    }
}

/// Output port selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    /// `uo_out`
    A,
    /// `uio_out`
    B,
}

/// Register access completed by an SPI frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transaction {
    Write { address: u8, value: u8 },
    /// `value` is 0 for unmapped addresses
    Read { address: u8, value: u8 },
}

/// The complete peripheral model
pub struct Peripheral {
    pub spi: peripherals::Spi,
    pub regs: peripherals::RegisterFile,
    pub pwm: peripherals::Pwm,
    pub inputs: Inputs,
    config: PeripheralConfig,
    /// System clocks since power-on
    pub tick: u64,
    port_a: u8,
    port_b: u8,
    last_read: Option<u8>,
}

impl Peripheral {
    /// Create a model with the default 10 MHz clock and 3 kHz PWM.
    pub fn new() -> Self {
        Self::new_with_config(PeripheralConfig::default())
    }

    pub fn new_with_config(config: PeripheralConfig) -> Self {
        Peripheral {
            spi: peripherals::Spi::new(),
            regs: peripherals::RegisterFile::new(),
            pwm: peripherals::Pwm::new(config.pwm_period()),
            inputs: Inputs::idle(),
            config,
            tick: 0,
            port_a: 0,
            port_b: 0,
            last_read: None,
        }
    }

    pub fn config(&self) -> &PeripheralConfig {
        &self.config
    }

    /// Reset every block to its power-on state.
    pub fn reset(&mut self) {
        self.spi.reset();
        self.regs.reset();
        self.pwm.reset();
        self.port_a = 0;
        self.port_b = 0;
        self.last_read = None;
    }

    /// Drive the SPI pins from a packed `ui_in` byte.
    pub fn set_ui_in(&mut self, ui_in: u8) {
        self.inputs.sclk = ui_in & (1 << UI_SCLK) != 0;
        self.inputs.copi = ui_in & (1 << UI_COPI) != 0;
        self.inputs.ncs = ui_in & (1 << UI_NCS) != 0;
    }

    pub fn set_reset(&mut self, rst_n: bool) {
        self.inputs.rst_n = rst_n;
    }

    pub fn set_enable(&mut self, ena: bool) {
        self.inputs.ena = ena;
    }

    /// Advance one system clock.
    ///
    /// Returns the register access dispatched on this clock, if a frame
    /// completed.
    pub fn tick(&mut self) -> Option<Transaction> {
        self.tick += 1;

        if !self.inputs.rst_n {
            if self.spi.bits_received() > 0 || self.regs.values() != [0; peripherals::REG_COUNT] {
                info!("reset asserted at tick {}", self.tick);
            }
            self.reset();
            return None;
        }

        let Inputs { ncs, sclk, copi, .. } = self.inputs;
        let txn = self.spi.clock(ncs, sclk, copi).map(|frame| self.dispatch(frame));

        let (level_a, level_b) = self.pwm.clock(self.regs.get(Register::DutyCycle));
        if self.inputs.ena {
            self.port_a = peripherals::compose_port(
                self.regs.get(Register::OutputEnableA),
                self.regs.get(Register::PwmEnableA),
                level_a,
            );
            self.port_b = peripherals::compose_port(
                self.regs.get(Register::OutputEnableB),
                self.regs.get(Register::PwmEnableB),
                level_b,
            );
        } else {
            self.port_a = 0;
            self.port_b = 0;
        }

        txn
    }

    /// Run `cycles` clocks, collecting any dispatched accesses.
    pub fn run(&mut self, cycles: u64) -> Vec<Transaction> {
        (0..cycles).filter_map(|_| self.tick()).collect()
    }

    fn dispatch(&mut self, frame: Frame) -> Transaction {
        let address = frame.address();
        if frame.write {
            self.regs.write(address, frame.data);
            debug!("spi: write {:#04x} <- {:#04x}", address, frame.data);
            Transaction::Write { address, value: frame.data }
        } else {
            let value = self.regs.read(address);
            self.last_read = Some(value);
            debug!("spi: read {:#04x} -> {:#04x}", address, value);
            Transaction::Read { address, value }
        }
    }

    /// `uo_out`
    pub fn port_a_out(&self) -> u8 {
        self.port_a
    }

    /// `uio_out`
    pub fn port_b_out(&self) -> u8 {
        self.port_b
    }

    pub fn port_out(&self, port: Port) -> u8 {
        match port {
            Port::A => self.port_a,
            Port::B => self.port_b,
        }
    }

    /// Value returned by the most recent read frame.
    pub fn last_read(&self) -> Option<u8> {
        self.last_read
    }

    /// Register dump plus engine and counter status.
    pub fn dump_regs(&self) -> String {
        format!(
            "{}tick={} spi={:?} frames={} aborted={} ignored={}\npwm: period={} cnt_a={} cnt_b={} uo_out={:02X} uio_out={:02X}",
            self.regs.dump(),
            self.tick,
            self.spi.state,
            self.spi.frames,
            self.spi.aborted,
            self.regs.ignored_writes,
            self.pwm.period(),
            self.pwm.a.count(),
            self.pwm.b.count(),
            self.port_a,
            self.port_b,
        )
    }

    pub fn save_state(&self) -> savestate::SaveState {
        savestate::SaveState {
            tick: self.tick,
            clock_hz: self.config.clock_hz,
            pwm_hz: self.config.pwm_hz,
            inputs: savestate::InputState {
                ncs: self.inputs.ncs,
                sclk: self.inputs.sclk,
                copi: self.inputs.copi,
                rst_n: self.inputs.rst_n,
                ena: self.inputs.ena,
            },
            spi: self.spi.save_state(),
            regs: self.regs.save_state(),
            pwm: self.pwm.save_state(),
            port_a: self.port_a,
            port_b: self.port_b,
            last_read: self.last_read,
        }
    }

    /// Restore a state captured with [`Peripheral::save_state`].
    ///
    /// The clock configuration is taken from the state.
    pub fn load_state(&mut self, s: &savestate::SaveState) {
        self.config = PeripheralConfig { clock_hz: s.clock_hz, pwm_hz: s.pwm_hz };
        self.pwm = peripherals::Pwm::new(self.config.pwm_period());
        self.pwm.load_state(&s.pwm);
        self.spi.load_state(&s.spi);
        self.regs.load_state(&s.regs);
        self.inputs = Inputs {
            ncs: s.inputs.ncs,
            sclk: s.inputs.sclk,
            copi: s.inputs.copi,
            rst_n: s.inputs.rst_n,
            ena: s.inputs.ena,
        };
        self.tick = s.tick;
        self.port_a = s.port_a;
        self.port_b = s.port_b;
        self.last_read = s.last_read;
        info!("state loaded at tick {}", self.tick);
    }
}

impl Default for Peripheral {
    fn default() -> Self {
        Self::new()
    }
}
