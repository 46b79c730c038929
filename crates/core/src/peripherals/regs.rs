//! Register file exposed over the SPI link.
//!
//! Five 8-bit registers live at addresses 0x00..=0x04. Every other address
//! in the 7-bit space is unmapped: writes are dropped and reads return 0.

use log::trace;

/// Addressable configuration registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Register {
    /// Output enable mask for port A (`uo_out`)
    OutputEnableA = 0x00,
    /// Output enable mask for port B (`uio_out`)
    OutputEnableB = 0x01,
    /// PWM enable mask for port A
    PwmEnableA = 0x02,
    /// PWM enable mask for port B
    PwmEnableB = 0x03,
    /// Shared PWM duty level, duty = value / 255
    DutyCycle = 0x04,
}

/// Number of mapped registers
pub const REG_COUNT: usize = 5;

impl Register {
    pub const ALL: [Register; REG_COUNT] = [
        Register::OutputEnableA,
        Register::OutputEnableB,
        Register::PwmEnableA,
        Register::PwmEnableB,
        Register::DutyCycle,
    ];

    /// Decode a bus address. `None` for every unmapped address.
    pub fn from_address(addr: u8) -> Option<Register> {
        match addr {
            0x00 => Some(Register::OutputEnableA),
            0x01 => Some(Register::OutputEnableB),
            0x02 => Some(Register::PwmEnableA),
            0x03 => Some(Register::PwmEnableB),
            0x04 => Some(Register::DutyCycle),
            _ => None,
        }
    }

    pub fn address(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Register::OutputEnableA => "OE_A",
            Register::OutputEnableB => "OE_B",
            Register::PwmEnableA => "PWMEN_A",
            Register::PwmEnableB => "PWMEN_B",
            Register::DutyCycle => "DUTY",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

pub struct RegisterFile {
    values: [u8; REG_COUNT],
    /// Writes dropped because the address was unmapped
    pub ignored_writes: u64,
}

impl RegisterFile {
    pub fn new() -> Self {
        RegisterFile { values: [0; REG_COUNT], ignored_writes: 0 }
    }

    pub fn reset(&mut self) {
        *self = RegisterFile::new();
    }

    /// Returns true if this addr is handled
    pub fn write(&mut self, addr: u8, value: u8) -> bool {
        match Register::from_address(addr) {
            Some(reg) => {
                self.values[reg.index()] = value;
                true
            }
            None => {
                self.ignored_writes += 1;
                trace!("regs: ignored write {:#04x} <- {:#04x}", addr, value);
                false
            }
        }
    }

    /// Unmapped addresses read as 0.
    pub fn read(&self, addr: u8) -> u8 {
        Register::from_address(addr).map_or(0, |reg| self.get(reg))
    }

    pub fn get(&self, reg: Register) -> u8 {
        self.values[reg.index()]
    }

    pub fn set(&mut self, reg: Register, value: u8) {
        self.values[reg.index()] = value;
    }

    /// Raw register values in address order.
    pub fn values(&self) -> [u8; REG_COUNT] {
        self.values
    }

    /// Format all registers for display (4 per row).
    pub fn dump(&self) -> String {
        let mut s = String::new();
        for (i, reg) in Register::ALL.iter().enumerate() {
            s.push_str(&format!("{:02X} {:>8}={:02X}", reg.address(), reg.name(), self.get(*reg)));
            if i % 4 == 3 { s.push('\n'); } else { s.push_str("  "); }
        }
        if REG_COUNT % 4 != 0 { s.push('\n'); }
        s
    }

    pub fn save_state(&self) -> crate::savestate::RegisterState {
        crate::savestate::RegisterState { values: self.values, ignored_writes: self.ignored_writes }
    }

    pub fn load_state(&mut self, s: &crate::savestate::RegisterState) {
        self.values = s.values;
        self.ignored_writes = s.ignored_writes;
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_defaults_are_zero() {
        let regs = RegisterFile::new();
        for reg in Register::ALL {
            assert_eq!(regs.get(reg), 0);
        }
    }

    #[test]
    fn test_unmapped_write_is_dropped() {
        let mut regs = RegisterFile::new();
        assert!(!regs.write(0x30, 0xAA));
        assert_eq!(regs.read(0x30), 0x00);
        assert_eq!(regs.values(), [0; REG_COUNT]);
        assert_eq!(regs.ignored_writes, 1);
    }

    #[test]
    fn test_reset_clears_values() {
        let mut regs = RegisterFile::new();
        for reg in Register::ALL {
            regs.set(reg, 0x5A);
        }
        regs.write(0x7F, 0x01);
        regs.reset();
        assert_eq!(regs.values(), [0; REG_COUNT]);
        assert_eq!(regs.ignored_writes, 0);
    }

    #[test]
    fn test_dump_names() {
        let mut regs = RegisterFile::new();
        regs.write(0x04, 0x7F);
        let dump = regs.dump();
        assert!(dump.contains("DUTY=7F"));
        assert!(dump.contains("OE_A=00"));
    }

    proptest! {
        #[test]
        fn prop_mapped_round_trip(addr in 0u8..5, value: u8) {
            let mut regs = RegisterFile::new();
            prop_assert!(regs.write(addr, value));
            prop_assert_eq!(regs.read(addr), value);
        }

        #[test]
        fn prop_unmapped_never_observable(addr in 5u8..128, value: u8, seed: [u8; REG_COUNT]) {
            let mut regs = RegisterFile::new();
            for (reg, v) in Register::ALL.iter().zip(seed) {
                regs.set(*reg, v);
            }
            regs.write(addr, value);
            prop_assert_eq!(regs.values(), seed);
            prop_assert_eq!(regs.read(addr), 0);
        }
    }
}
