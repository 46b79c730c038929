//! Peripheral blocks clocked by [`crate::Peripheral`]:
//!
//! - [`Spi`] — 16-bit SPI frame receiver (chip-select, serial clock, COPI)
//! - [`RegisterFile`] — five 8-bit configuration registers
//! - [`Pwm`] — two free-running PWM counters sharing the duty register

mod spi;
mod regs;
mod pwm;

pub use spi::{Frame, FrameError, FrameState, Spi, FRAME_BITS, MAX_ADDRESS};
pub use regs::{Register, RegisterFile, REG_COUNT};
pub use pwm::{compose_port, duty_threshold, Pwm, PwmCounter};
