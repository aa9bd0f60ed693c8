//! 31-bit addressing backend (ESA/370, ESA/390).
//!
//! A 4-byte address slot holds a 31-bit address; its high-order bit (bit 0) is the
//! addressing-mode bit and is carried through relocation unchanged. Address arithmetic wraps
//! above 0x7FFFFFFF.

use super::{AddressModel, AddressWidth, Adjustment};
use crate::utils::width_mask;

const MODE_BIT: u64 = 0x8000_0000;
const ADDRESS_MASK: u64 = 0x7FFF_FFFF;

/// The 31-bit addressing model.
pub struct Amode31;

impl AddressModel for Amode31 {
    fn width(&self) -> AddressWidth {
        AddressWidth::Bits31
    }

    fn pointer_size(&self) -> usize {
        4
    }

    fn max_adcon_len(&self) -> u8 {
        4
    }

    fn adjust(&self, value: u64, len: usize, adjustment: Adjustment) -> u64 {
        if len == 4 {
            (value & MODE_BIT) | adjustment.apply_masked(value, ADDRESS_MASK)
        } else {
            adjustment.apply_masked(value, width_mask(len))
        }
    }
}
