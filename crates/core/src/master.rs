//! Bit-banging SPI bus master.
//!
//! Drives the peripheral's `ui_in` pins the same way the verification bench
//! does: COPI is set up while the serial clock is low and held while it is
//! high, each half period lasting [`BusTiming::half_period_ticks`] system
//! clocks. After the 16th bit chip-select is released and the bus idles for
//! [`BusTiming::settle_ticks`].

use crate::config::BusTiming;
use crate::peripherals::{Frame, FrameError, FRAME_BITS};
use crate::{Peripheral, Transaction, UI_COPI, UI_NCS, UI_SCLK};

#[derive(Debug, Clone, Copy, Default)]
pub struct SpiMaster {
    pub timing: BusTiming,
}

impl SpiMaster {
    pub fn new(timing: BusTiming) -> Self {
        SpiMaster { timing }
    }

    /// Send a complete frame. Returns the access the peripheral dispatched.
    pub fn transfer(&self, dev: &mut Peripheral, frame: Frame) -> Option<Transaction> {
        self.send_bits(dev, frame, FRAME_BITS)
    }

    /// Send only the first `bits` bits of `frame`, then release chip-select.
    pub fn abort(&self, dev: &mut Peripheral, frame: Frame, bits: u8) -> Option<Transaction> {
        self.send_bits(dev, frame, bits.min(FRAME_BITS))
    }

    pub fn write(&self, dev: &mut Peripheral, address: u8, value: u8) -> Result<Option<Transaction>, FrameError> {
        Ok(self.transfer(dev, Frame::write(address, value)?))
    }

    /// Read a register. `None` if the peripheral did not complete the frame
    /// (held in reset).
    pub fn read(&self, dev: &mut Peripheral, address: u8) -> Result<Option<u8>, FrameError> {
        Ok(match self.transfer(dev, Frame::read(address)?) {
            Some(Transaction::Read { value, .. }) => Some(value),
            _ => None,
        })
    }

    /// Ticks one full transfer takes.
    pub fn transfer_ticks(&self) -> u64 {
        1 + 2 * FRAME_BITS as u64 * self.timing.half_period_ticks as u64 + self.timing.settle_ticks as u64
    }

    fn send_bits(&self, dev: &mut Peripheral, frame: Frame, bits: u8) -> Option<Transaction> {
        let word = frame.encode();
        let mut txn = None;

        // Select with serial clock low
        dev.set_ui_in(0);
        txn = txn.or(dev.tick());

        for i in 0..bits {
            let copi = ((word >> (FRAME_BITS - 1 - i)) & 1) as u8;
            dev.set_ui_in(copi << UI_COPI);
            txn = txn.or(self.half_period(dev));
            dev.set_ui_in((copi << UI_COPI) | (1 << UI_SCLK));
            txn = txn.or(self.half_period(dev));
        }

        dev.set_ui_in(1 << UI_NCS);
        for _ in 0..self.timing.settle_ticks {
            txn = txn.or(dev.tick());
        }
        txn
    }

    fn half_period(&self, dev: &mut Peripheral) -> Option<Transaction> {
        let mut txn = None;
        for _ in 0..self.timing.half_period_ticks {
            txn = txn.or(dev.tick());
        }
        txn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let mut dev = Peripheral::new();
        let master = SpiMaster::default();
        let txn = master.write(&mut dev, 0x04, 0xCF).unwrap();
        assert_eq!(txn, Some(Transaction::Write { address: 0x04, value: 0xCF }));
        assert_eq!(master.read(&mut dev, 0x04).unwrap(), Some(0xCF));
    }

    #[test]
    fn test_transfer_duration() {
        let mut dev = Peripheral::new();
        let master = SpiMaster::default();
        master.write(&mut dev, 0x00, 0x01).unwrap();
        assert_eq!(dev.tick, master.transfer_ticks());
        assert_eq!(master.transfer_ticks(), 1 + 32 * 51 + 600);
    }

    #[test]
    fn test_abort_leaves_registers() {
        let mut dev = Peripheral::new();
        let master = SpiMaster::default();
        for bits in 0..FRAME_BITS {
            let txn = master.abort(&mut dev, Frame::write(0x00, 0xFF).unwrap(), bits);
            assert!(txn.is_none());
        }
        assert_eq!(dev.regs.read(0x00), 0);
        assert_eq!(dev.spi.aborted, FRAME_BITS as u64);
        // Still responsive after aborted frames
        master.write(&mut dev, 0x00, 0xF0).unwrap();
        assert_eq!(dev.port_a_out(), 0xF0);
    }

    #[test]
    fn test_fast_bus() {
        let mut dev = Peripheral::new();
        let master = SpiMaster::new(BusTiming { half_period_ticks: 1, settle_ticks: 0 });
        master.write(&mut dev, 0x01, 0xCC).unwrap();
        assert_eq!(dev.port_b_out(), 0xCC);
    }

    #[test]
    fn test_rejects_wide_address() {
        let mut dev = Peripheral::new();
        assert!(SpiMaster::default().write(&mut dev, 0x80, 0).is_err());
        assert_eq!(dev.tick, 0);
    }
}
