//! 64-bit addressing backend (z/Architecture).

use super::{AddressModel, AddressWidth};

/// The 64-bit addressing model.
///
/// Every field width up to a doubleword is encodable, so entries reserve three bits for the
/// length. Arithmetic wraps modulo the field width.
pub struct Amode64;

impl AddressModel for Amode64 {
    fn width(&self) -> AddressWidth {
        AddressWidth::Bits64
    }

    fn pointer_size(&self) -> usize {
        8
    }

    fn max_adcon_len(&self) -> u8 {
        8
    }
}
