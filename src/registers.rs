//! General register save area and the register relocation mask.

use std::fmt;
use std::str::FromStr;

/// Register conventionally holding a return code.
pub const RETURN_CODE_REGISTER: usize = 15;

/// Registers never relocated, whatever the mask says: R0 and the return-code register.
const RESERVED: u16 = RegisterMask::bit(0) | RegisterMask::bit(RETURN_CODE_REGISTER);

/// Saved contents of general registers R0 through R15.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterSaveArea(pub [u64; 16]);

impl RegisterSaveArea {
    pub fn new() -> Self {
        Self::default()
    }

    /// Saved contents of `register`.
    ///
    /// # Panics
    ///
    /// Panics if `register` is not in `0..16`.
    pub fn get(&self, register: usize) -> u64 {
        self.0[register]
    }

    /// Replaces the saved contents of `register`.
    ///
    /// # Panics
    ///
    /// Panics if `register` is not in `0..16`.
    pub fn set(&mut self, register: usize, value: u64) {
        self.0[register] = value;
    }
}

/// Selects the saved registers whose contents are addresses to relocate.
///
/// Bits are numbered the way the hardware numbers them: the leftmost bit of the 16-bit mask
/// selects R0, the rightmost R15.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RegisterMask(pub u16);

impl RegisterMask {
    /// All registers a caller may relocate: R1 through R14.
    pub const ALL_ALLOWED: RegisterMask = RegisterMask(!RESERVED);

    const fn bit(register: usize) -> u16 {
        0x8000 >> register
    }

    /// A mask selecting `registers`.
    pub fn of(registers: &[usize]) -> Self {
        Self(
            registers
                .iter()
                .filter(|r| **r < 16)
                .fold(0, |mask, r| mask | Self::bit(*r)),
        )
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, register: usize) -> bool {
        register < 16 && self.0 & Self::bit(register) != 0
    }

    /// Selected registers in ascending order, skipping the reserved ones.
    pub fn registers(self) -> impl Iterator<Item = usize> {
        let mut bits = self.0 & !RESERVED;
        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let register = bits.leading_zeros() as usize;
            bits &= !Self::bit(register);
            Some(register)
        })
    }
}

impl fmt::Display for RegisterMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

/// Error returned for a mask that is not exactly four hex digits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("register mask '{0}' must be exactly four hex digits")]
pub struct BadMask(pub String);

impl FromStr for RegisterMask {
    type Err = BadMask;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 4 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(BadMask(s.to_string()));
        }
        u16::from_str_radix(s, 16)
            .map(RegisterMask)
            .map_err(|_| BadMask(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leftmost_bit_is_r0() {
        let mask = RegisterMask::of(&[0, 2, 15]);
        assert_eq!(mask.0, 0xA001);
        assert!(mask.contains(2));
        assert!(!mask.contains(3));
    }

    #[test]
    fn iteration_skips_reserved_registers() {
        let all: Vec<usize> = RegisterMask(0xFFFF).registers().collect();
        assert_eq!(all, (1..15).collect::<Vec<_>>());
        assert_eq!(RegisterMask::ALL_ALLOWED.0, 0x7FFE);
        assert_eq!(RegisterMask(0x8001).registers().count(), 0);
        assert_eq!(RegisterMask(0x2004).registers().collect::<Vec<_>>(), vec![2, 13]);
    }

    #[test]
    fn parses_four_hex_digits() {
        assert_eq!("7ffe".parse::<RegisterMask>(), Ok(RegisterMask(0x7FFE)));
        assert_eq!(RegisterMask(0x20).to_string(), "0020");
        assert!("7FF".parse::<RegisterMask>().is_err());
        assert!("+7FF".parse::<RegisterMask>().is_err());
        assert!("07FFE".parse::<RegisterMask>().is_err());
    }

    #[test]
    fn save_area_holds_sixteen_registers() {
        let mut save_area = RegisterSaveArea::new();
        save_area.set(15, 0x1050);
        assert_eq!(save_area.get(15), 0x1050);
        assert_eq!(save_area.get(0), 0);
    }

    #[test]
    #[should_panic]
    fn save_area_rejects_register_sixteen() {
        RegisterSaveArea::new().set(16, 0);
    }
}
