//! Labels naming address constants inside a region.
//!
//! A label carries its assembled address and, when the value it names has a statically known
//! size, a length attribute. The table builder falls back on that attribute when neither a
//! catalog format nor an explicit length is supplied.

/// An assembled address constant location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    /// Symbolic name, used for diagnostics only.
    pub name: String,
    /// Assembled address of the labelled storage.
    pub address: u64,
    /// Length attribute in bytes, if known at build time.
    pub length: Option<u8>,
}

impl Label {
    /// A label whose length attribute cannot be determined.
    pub fn new(name: impl Into<String>, address: u64) -> Self {
        Self {
            name: name.into(),
            address,
            length: None,
        }
    }

    /// A label naming a value of `length` bytes.
    pub fn with_length(name: impl Into<String>, address: u64, length: u8) -> Self {
        Self {
            name: name.into(),
            address,
            length: Some(length),
        }
    }

    /// Synthesises a label from a bare address, named after it.
    pub fn at(address: u64) -> Self {
        Self::new(format!("@{address:X}"), address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_address_labels_have_no_length() {
        let label = Label::at(0x1010);
        assert_eq!(label.name, "@1010");
        assert_eq!(label.length, None);
        assert_eq!(Label::with_length("PTR", 0x1010, 4).length, Some(4));
    }
}
