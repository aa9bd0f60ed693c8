//! Address-width abstraction.
//!
//! This module defines the `AddressModel` trait, which encapsulates everything that differs
//! between the 24-bit, 31-bit and 64-bit addressing architectures. The table builder and the
//! relocator stay generic while the concrete models decide how an address constant wraps, which
//! bits of a slot are control bits, and how wide table pointers and saved registers are.

use std::fmt;
use std::str::FromStr;

use crate::format::FieldLocation;
use crate::utils::width_mask;

pub mod amode24;
pub mod amode31;
pub mod amode64;

/// Addressing width of an architecture generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressWidth {
    /// S/360 and S/370: 24-bit addresses held in 3 or 4 byte fields.
    Bits24,
    /// ESA/370 and ESA/390: 31-bit addresses, bit 0 of a 4-byte slot is the mode bit.
    Bits31,
    /// z/Architecture: 64-bit addresses.
    Bits64,
}

impl AddressWidth {
    pub fn bits(self) -> u32 {
        match self {
            AddressWidth::Bits24 => 24,
            AddressWidth::Bits31 => 31,
            AddressWidth::Bits64 => 64,
        }
    }
}

impl fmt::Display for AddressWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

impl FromStr for AddressWidth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "24" => Ok(AddressWidth::Bits24),
            "31" => Ok(AddressWidth::Bits31),
            "64" => Ok(AddressWidth::Bits64),
            other => Err(format!("unsupported address width '{other}', expected 24, 31 or 64")),
        }
    }
}

/// Signed distance between the assembled base and the load address.
///
/// The magnitude is kept unsigned and the direction is carried by the variant, so the same
/// value can be applied to fields of any width without a negative representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Add(u64),
    Subtract(u64),
}

impl Adjustment {
    /// Computes the adjustment that moves `assembled_base` to `new_base`.
    pub fn between(assembled_base: u64, new_base: u64) -> Self {
        if new_base >= assembled_base {
            Adjustment::Add(new_base - assembled_base)
        } else {
            Adjustment::Subtract(assembled_base - new_base)
        }
    }

    pub fn magnitude(self) -> u64 {
        match self {
            Adjustment::Add(d) | Adjustment::Subtract(d) => d,
        }
    }

    pub fn is_null(self) -> bool {
        self.magnitude() == 0
    }

    /// Applies the adjustment to the bits of `value` selected by `mask`, wrapping within them.
    /// Bits outside `mask` come back cleared.
    pub fn apply_masked(self, value: u64, mask: u64) -> u64 {
        let value = value & mask;
        match self {
            Adjustment::Add(d) => value.wrapping_add(d) & mask,
            Adjustment::Subtract(d) => value.wrapping_sub(d) & mask,
        }
    }
}

/// A trait representing one addressing architecture (24, 31 or 64 bit).
pub trait AddressModel {
    /// The addressing width this model implements.
    fn width(&self) -> AddressWidth;

    /// Size in bytes of a relocation table pointer field and of a saved register.
    fn pointer_size(&self) -> usize;

    /// Widest address constant, in bytes, the relocator for this model will patch.
    fn max_adcon_len(&self) -> u8;

    /// Number of high-order bits of a packed entry reserved for `length - 1`.
    fn length_bits(&self) -> u32 {
        if self.pointer_size() == 8 {
            3
        } else {
            2
        }
    }

    /// Fits a resolved field onto what this model can encode.
    ///
    /// Returns `None` when the width cannot be represented. Models may return a narrower
    /// location than requested, when part of the field never holds address bits.
    fn fit_field(&self, field: FieldLocation) -> Option<FieldLocation> {
        if field.width > self.max_adcon_len() {
            None
        } else {
            Some(field)
        }
    }

    /// Applies `adjustment` to an address constant held in `len` bytes.
    ///
    /// The default wraps modulo 2^(8 * len). Models override this where a slot carries
    /// control bits that must survive relocation.
    fn adjust(&self, value: u64, len: usize, adjustment: Adjustment) -> u64 {
        adjustment.apply_masked(value, width_mask(len))
    }
}

/// Returns the model implementing `width`.
pub fn model_for(width: AddressWidth) -> Box<dyn AddressModel> {
    match width {
        AddressWidth::Bits24 => Box::new(amode24::Amode24),
        AddressWidth::Bits31 => Box::new(amode31::Amode31),
        AddressWidth::Bits64 => Box::new(amode64::Amode64),
    }
}

impl<M: AddressModel + ?Sized> AddressModel for Box<M> {
    fn width(&self) -> AddressWidth {
        (**self).width()
    }

    fn pointer_size(&self) -> usize {
        (**self).pointer_size()
    }

    fn max_adcon_len(&self) -> u8 {
        (**self).max_adcon_len()
    }

    fn length_bits(&self) -> u32 {
        (**self).length_bits()
    }

    fn fit_field(&self, field: FieldLocation) -> Option<FieldLocation> {
        (**self).fit_field(field)
    }

    fn adjust(&self, value: u64, len: usize, adjustment: Adjustment) -> u64 {
        (**self).adjust(value, len, adjustment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjustment_direction() {
        assert_eq!(Adjustment::between(0x1000, 0x5000), Adjustment::Add(0x4000));
        assert_eq!(Adjustment::between(0x5000, 0x1000), Adjustment::Subtract(0x4000));
        assert!(Adjustment::between(0x1000, 0x1000).is_null());
    }

    #[test]
    fn masked_arithmetic_wraps() {
        assert_eq!(Adjustment::Add(0x10).apply_masked(0xFFF8, 0xFFFF), 0x0008);
        assert_eq!(Adjustment::Subtract(0x10).apply_masked(0x0008, 0xFFFF), 0xFFF8);
    }

    #[test]
    fn width_from_str() {
        assert_eq!("31".parse::<AddressWidth>(), Ok(AddressWidth::Bits31));
        assert!("32".parse::<AddressWidth>().is_err());
    }

    #[test]
    fn boxed_models_dispatch() {
        let model = model_for(AddressWidth::Bits64);
        assert_eq!(model.width(), AddressWidth::Bits64);
        assert_eq!(model.pointer_size(), 8);
        assert_eq!(model.length_bits(), 3);
        assert_eq!(model_for(AddressWidth::Bits24).length_bits(), 2);
    }
}
