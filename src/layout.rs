//! Region layout.
//!
//! A `Region` is a contiguous block of code and data assembled to run at a known base address.
//! The relocation engine patches it in place and never allocates or frees it.

/// A relocatable block of storage.
///
/// `base` is the address the first byte of `data` occupies: the assembled base while a table is
/// being built, the load address once the block has been placed in storage.
#[derive(Debug)]
pub struct Region<D> {
    /// Address of the first byte of `data`.
    pub base: u64,
    /// The raw content of the region.
    pub data: D,
}

impl<D: AsRef<[u8]>> Region<D> {
    /// Wraps `data` loaded at `base`.
    pub fn new(base: u64, data: D) -> Self {
        Self { base, data }
    }

    /// Size of the region in bytes.
    pub fn size(&self) -> u64 {
        self.data.as_ref().len() as u64
    }

    /// Address one past the last byte.
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.size())
    }

    /// Translates an address to an offset into `data`, if `len` bytes starting there fit.
    pub fn offset_of(&self, address: u64, len: u64) -> Option<usize> {
        let offset = address.checked_sub(self.base)?;
        let end = offset.checked_add(len)?;
        (end <= self.size()).then_some(offset as usize)
    }

    /// Whether `offset..offset + len` lies inside the region.
    pub fn contains_offset(&self, offset: u64, len: u64) -> bool {
        offset
            .checked_add(len)
            .is_some_and(|end| end <= self.size())
    }

    pub fn bytes(&self) -> &[u8] {
        self.data.as_ref()
    }
}

impl<D: AsRef<[u8]> + AsMut<[u8]>> Region<D> {
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.data.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_translation_is_bounds_checked() {
        let region = Region::new(0x1000, vec![0u8; 0x20]);
        assert_eq!(region.end(), 0x1020);
        assert_eq!(region.offset_of(0x1010, 4), Some(0x10));
        assert_eq!(region.offset_of(0x101C, 4), Some(0x1C));
        assert_eq!(region.offset_of(0x101D, 4), None);
        assert_eq!(region.offset_of(0x0FFF, 1), None);
        assert!(region.contains_offset(0, 0x20));
        assert!(!region.contains_offset(u64::MAX, 2));
    }
}
