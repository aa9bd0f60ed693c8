//! 24-bit addressing backend (S/360, S/370).
//!
//! Addresses are 24 bits wide. When a 4-byte field holds an address the high-order byte is
//! never address data (it carries flags or a count), so such fields are narrowed to the
//! low three bytes when a table is built.

use super::{AddressModel, AddressWidth, Adjustment};
use crate::format::FieldLocation;
use crate::utils::width_mask;

const ADDRESS_MASK: u64 = 0x00FF_FFFF;

/// The 24-bit addressing model.
pub struct Amode24;

impl AddressModel for Amode24 {
    fn width(&self) -> AddressWidth {
        AddressWidth::Bits24
    }

    fn pointer_size(&self) -> usize {
        4
    }

    fn max_adcon_len(&self) -> u8 {
        4
    }

    fn fit_field(&self, field: FieldLocation) -> Option<FieldLocation> {
        match field.width {
            4 => {
                let displacement = field.displacement.checked_add(1)?;
                tracing::warn!(
                    "narrowing 4-byte address at displacement 0x{:x} to its low 3 bytes",
                    field.displacement
                );
                Some(FieldLocation::new(displacement, 3))
            }
            w if w > 4 => None,
            _ => Some(field),
        }
    }

    fn adjust(&self, value: u64, len: usize, adjustment: Adjustment) -> u64 {
        if len == 4 {
            // Saved registers and tables built for wider models: keep the high byte.
            (value & 0xFF00_0000) | adjustment.apply_masked(value, ADDRESS_MASK)
        } else {
            adjustment.apply_masked(value, width_mask(len))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrows_fullword_fields() {
        let fitted = Amode24.fit_field(FieldLocation::new(4, 4)).unwrap();
        assert_eq!(fitted, FieldLocation::new(5, 3));
        assert!(Amode24.fit_field(FieldLocation::new(0, 8)).is_none());
        assert_eq!(
            Amode24.fit_field(FieldLocation::new(1, 3)),
            Some(FieldLocation::new(1, 3))
        );
        assert!(Amode24.fit_field(FieldLocation::new(u64::MAX, 4)).is_none());
    }

    #[test]
    fn fullword_keeps_high_byte() {
        let v = Amode24.adjust(0x8F_FF_F0_00, 4, Adjustment::Add(0x2000));
        assert_eq!(v, 0x8F_00_10_00);
    }

    #[test]
    fn three_byte_wraps_at_16m() {
        assert_eq!(Amode24.adjust(0xFF_F000, 3, Adjustment::Add(0x2000)), 0x00_1000);
        assert_eq!(Amode24.adjust(0x00_1000, 3, Adjustment::Subtract(0x2000)), 0xFF_F000);
    }
}
