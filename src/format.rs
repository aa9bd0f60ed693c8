//! Address format catalog.
//!
//! Maps the structural control blocks that embed an address constant (channel command words,
//! program status words, operation request blocks) to where that constant lives inside the
//! block: its byte displacement from the start of the block and its width.

use std::fmt;
use std::str::FromStr;

/// Location of an address constant inside a structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLocation {
    /// Bytes from the start of the structure to the first byte of the address.
    pub displacement: u64,
    /// Width of the address constant in bytes.
    pub width: u8,
}

impl FieldLocation {
    pub const fn new(displacement: u64, width: u8) -> Self {
        Self { displacement, width }
    }
}

/// A structure type whose embedded address constant location is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFormat {
    /// Format-0 CCW: command code followed by a 24-bit data address.
    Ccw0,
    /// Format-1 CCW: 31-bit data address in the second word.
    Ccw1,
    /// Instruction address confined to the low halfword of a basic-control PSW.
    Psw16,
    /// S/360 basic-control or S/370 extended-control PSW with a 24-bit instruction address.
    Psw24,
    /// ESA/390 PSW: mode bit plus 31-bit instruction address in the second word.
    Psw31,
    /// z/Architecture 16-byte PSW: 64-bit instruction address in the second doubleword.
    Psw64,
    /// Operation request block: channel program address.
    Orb,
}

impl AddressFormat {
    pub const ALL: [AddressFormat; 7] = [
        AddressFormat::Ccw0,
        AddressFormat::Ccw1,
        AddressFormat::Psw16,
        AddressFormat::Psw24,
        AddressFormat::Psw31,
        AddressFormat::Psw64,
        AddressFormat::Orb,
    ];

    /// Where the address constant sits inside a structure of this format.
    pub const fn location(self) -> FieldLocation {
        match self {
            AddressFormat::Ccw0 => FieldLocation::new(1, 3),
            AddressFormat::Ccw1 => FieldLocation::new(4, 4),
            AddressFormat::Psw16 => FieldLocation::new(6, 2),
            AddressFormat::Psw24 => FieldLocation::new(5, 3),
            AddressFormat::Psw31 => FieldLocation::new(4, 4),
            AddressFormat::Psw64 => FieldLocation::new(8, 8),
            AddressFormat::Orb => FieldLocation::new(8, 4),
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            AddressFormat::Ccw0 => "ccw0",
            AddressFormat::Ccw1 => "ccw1",
            AddressFormat::Psw16 => "psw16",
            AddressFormat::Psw24 => "psw24",
            AddressFormat::Psw31 => "psw31",
            AddressFormat::Psw64 => "psw64",
            AddressFormat::Orb => "orb",
        }
    }
}

impl fmt::Display for AddressFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a format name is not in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("address format '{0}' not recognized")]
pub struct UnknownFormat(pub String);

impl FromStr for AddressFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        AddressFormat::ALL
            .into_iter()
            .find(|f| f.name() == lower)
            .ok_or_else(|| UnknownFormat(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_locations() {
        assert_eq!(AddressFormat::Ccw0.location(), FieldLocation::new(1, 3));
        assert_eq!(AddressFormat::Ccw1.location(), FieldLocation::new(4, 4));
        assert_eq!(AddressFormat::Orb.location(), FieldLocation::new(8, 4));
        assert_eq!(AddressFormat::Psw64.location().width, 8);
    }

    #[test]
    fn psw_widths_cover_all_generations() {
        let mut widths: Vec<u8> = [
            AddressFormat::Psw16,
            AddressFormat::Psw24,
            AddressFormat::Psw31,
            AddressFormat::Psw64,
        ]
        .iter()
        .map(|f| f.location().width)
        .collect();
        widths.sort();
        assert_eq!(widths, vec![2, 3, 4, 8]);
    }

    #[test]
    fn names_round_trip_through_from_str() {
        for format in AddressFormat::ALL {
            assert_eq!(format.name().parse::<AddressFormat>(), Ok(format));
        }
        assert_eq!("CCW1".parse::<AddressFormat>(), Ok(AddressFormat::Ccw1));
        assert!("psw32".parse::<AddressFormat>().is_err());
    }
}
