//! Relocation table wire format.
//!
//! A table is a fixed header followed by a list of packed entries. All multi-byte fields are
//! big-endian. The header's pointer-sized fields are `W` bytes wide, where `W` is the pointer
//! size of the address model the table was built for (4 or 8):
//!
//! | Offset     | Field                 | Width |
//! |------------|-----------------------|-------|
//! | 0          | eyecatcher            | 8     |
//! | 8          | assembled base        | W     |
//! | 8 + W      | transfer address      | W     |
//! | 8 + 2W     | first entry pointer   | W     |
//! | 8 + 3W     | entry size            | W     |
//! | 8 + 4W     | last entry byte       | W     |
//! | 8 + 5W     | register width        | 1     |
//! | 8 + 5W + 1 | status flags          | 1     |
//!
//! Each entry is `entry size` bytes. The top 2 bits (3 bits for 64-bit tables) hold
//! `length - 1`, the remaining bits the displacement of the address constant from the start of
//! the region.

use crate::utils::{read_be, write_be};

/// Marks the start of a relocation table: EBCDIC "RELOCTBL".
pub const EYECATCHER: [u8; 8] = [0xD9, 0xC5, 0xD3, 0xD6, 0xC3, 0xE3, 0xC2, 0xD3];

/// Status flag bit 0: relocation has started.
pub const STATUS_STARTED: u8 = 0x80;
/// Status flag bit 1: relocation has completed.
pub const STATUS_COMPLETED: u8 = 0x40;

/// Entry sizes the table format supports.
pub const ENTRY_SIZES: [u8; 3] = [2, 3, 4];

/// Size of a table header for the given pointer size.
pub const fn header_size(pointer_size: usize) -> usize {
    8 + 5 * pointer_size + 2
}

const fn register_width_offset(pointer_size: usize) -> usize {
    8 + 5 * pointer_size
}

const fn status_offset(pointer_size: usize) -> usize {
    8 + 5 * pointer_size + 1
}

/// Relocation progress recorded in the table itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl TableStatus {
    pub fn from_flags(flags: u8) -> Self {
        if flags & STATUS_COMPLETED != 0 {
            TableStatus::Completed
        } else if flags & STATUS_STARTED != 0 {
            TableStatus::InProgress
        } else {
            TableStatus::NotStarted
        }
    }

    pub fn flags(self) -> u8 {
        match self {
            TableStatus::NotStarted => 0,
            TableStatus::InProgress => STATUS_STARTED,
            TableStatus::Completed => STATUS_STARTED | STATUS_COMPLETED,
        }
    }
}

/// Decoded table header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationTable {
    pub eyecatcher: [u8; 8],
    /// Address the region was assembled to run at.
    pub assembled_base: u64,
    /// Program entry point to relocate and hand back, zero when absent.
    pub transfer_address: u64,
    /// Assembled address of the first entry.
    pub first_entry: u64,
    /// Bytes per entry: 2, 3 or 4.
    pub entry_size: u8,
    /// Assembled address of the last byte of the entry list.
    pub last_entry_byte: u64,
    /// Register width in bytes, 4 or 8. Also selects the entry length encoding.
    pub register_width: u8,
    pub status: TableStatus,
}

impl RelocationTable {
    /// Decodes a header laid out with `pointer_size`-byte pointer fields.
    ///
    /// Only the shape is checked here; the relocator validates the content.
    pub fn parse(bytes: &[u8], pointer_size: usize) -> Option<Self> {
        if bytes.len() < header_size(pointer_size) {
            return None;
        }
        let field = |index: usize| {
            let start = 8 + index * pointer_size;
            read_be(&bytes[start..start + pointer_size])
        };
        let mut eyecatcher = [0u8; 8];
        eyecatcher.copy_from_slice(&bytes[..8]);
        Some(Self {
            eyecatcher,
            assembled_base: field(0),
            transfer_address: field(1),
            first_entry: field(2),
            entry_size: u8::try_from(field(3)).unwrap_or(0),
            last_entry_byte: field(4),
            register_width: bytes[register_width_offset(pointer_size)],
            status: TableStatus::from_flags(bytes[status_offset(pointer_size)]),
        })
    }

    /// Reads the register width byte of a header laid out with `pointer_size`-byte pointers.
    pub fn register_width_at(bytes: &[u8], pointer_size: usize) -> Option<u8> {
        bytes.get(register_width_offset(pointer_size)).copied()
    }

    /// Finds the layout of a header whose pointer width is not known in advance.
    ///
    /// Tries 4-byte then 8-byte pointers and accepts the first layout whose register width
    /// matches its pointer size, whose entry size is valid and whose fields are consistent.
    /// Returns the pointer size and the decoded header.
    ///
    /// The register width byte of the 4-byte layout falls inside the first entry pointer of the
    /// 8-byte layout, so a match on that byte alone is not enough.
    pub fn locate(bytes: &[u8]) -> Option<(usize, Self)> {
        [4usize, 8].into_iter().find_map(|w| {
            if Self::register_width_at(bytes, w) != Some(w as u8) {
                return None;
            }
            if bytes.get(status_offset(w))? & !(STATUS_STARTED | STATUS_COMPLETED) != 0 {
                return None;
            }
            let header = Self::parse(bytes, w)?;
            header.codec()?;
            header.is_consistent().then_some((w, header))
        })
    }

    /// The entry list starts at or above the assembled base and holds a whole number of
    /// entries.
    fn is_consistent(&self) -> bool {
        let end = self.last_entry_byte.wrapping_add(1);
        self.entry_size != 0
            && self.first_entry >= self.assembled_base
            && end >= self.first_entry
            && (end - self.first_entry) % u64::from(self.entry_size) == 0
    }

    /// Encodes the header with `pointer_size`-byte pointer fields.
    pub fn to_bytes(&self, pointer_size: usize) -> Vec<u8> {
        let mut out = vec![0u8; header_size(pointer_size)];
        out[..8].copy_from_slice(&self.eyecatcher);
        let fields = [
            self.assembled_base,
            self.transfer_address,
            self.first_entry,
            u64::from(self.entry_size),
            self.last_entry_byte,
        ];
        for (index, value) in fields.into_iter().enumerate() {
            let start = 8 + index * pointer_size;
            write_be(&mut out[start..start + pointer_size], value);
        }
        out[register_width_offset(pointer_size)] = self.register_width;
        out[status_offset(pointer_size)] = self.status.flags();
        out
    }

    /// Updates the status flags of a header stored in `bytes`.
    pub fn write_status(bytes: &mut [u8], pointer_size: usize, status: TableStatus) {
        bytes[status_offset(pointer_size)] = status.flags();
    }

    /// Pointer size implied by the register width.
    pub fn pointer_size(&self) -> usize {
        usize::from(self.register_width)
    }

    /// Number of bytes in the entry list. An empty list has `last_entry_byte` one below
    /// `first_entry`.
    pub fn entry_list_len(&self) -> u64 {
        self.last_entry_byte
            .wrapping_add(1)
            .saturating_sub(self.first_entry)
    }

    /// Codec for this table's entries, if the entry size and register width are valid.
    pub fn codec(&self) -> Option<EntryCodec> {
        EntryCodec::new(self.entry_size, length_bits_for(self.register_width)?)
    }

    /// Decodes the entries held in `entry_bytes`, the bytes of the entry list.
    pub fn entries<'a>(
        &self,
        entry_bytes: &'a [u8],
    ) -> impl Iterator<Item = RelocationEntry> + 'a {
        let codec = self.codec();
        let size = usize::from(self.entry_size).max(1);
        entry_bytes
            .chunks_exact(size)
            .filter_map(move |chunk| codec.map(|c| c.decode(read_be(chunk))))
    }
}

/// Number of length bits used by tables of the given register width.
pub fn length_bits_for(register_width: u8) -> Option<u32> {
    match register_width {
        4 => Some(2),
        8 => Some(3),
        _ => None,
    }
}

/// One decoded table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationEntry {
    /// Width of the address constant in bytes.
    pub length: u8,
    /// Displacement of the address constant from the start of the region.
    pub displacement: u64,
}

/// Packs and unpacks entries of one size and length encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryCodec {
    entry_size: u8,
    length_bits: u32,
}

impl EntryCodec {
    pub fn new(entry_size: u8, length_bits: u32) -> Option<Self> {
        (ENTRY_SIZES.contains(&entry_size) && (length_bits == 2 || length_bits == 3)).then_some(
            Self {
                entry_size,
                length_bits,
            },
        )
    }

    pub fn entry_size(&self) -> u8 {
        self.entry_size
    }

    fn displacement_bits(&self) -> u32 {
        u32::from(self.entry_size) * 8 - self.length_bits
    }

    /// Multiplier applied to `length - 1` when packing.
    pub fn length_factor(&self) -> u64 {
        1u64 << self.displacement_bits()
    }

    pub fn max_displacement(&self) -> u64 {
        self.length_factor() - 1
    }

    pub fn max_length(&self) -> u8 {
        1u8 << self.length_bits
    }

    /// Packs an entry, or `None` if either part does not fit.
    pub fn encode(&self, length: u8, displacement: u64) -> Option<u64> {
        if length == 0 || length > self.max_length() || displacement > self.max_displacement() {
            return None;
        }
        Some(u64::from(length - 1) * self.length_factor() + displacement)
    }

    pub fn decode(&self, packed: u64) -> RelocationEntry {
        RelocationEntry {
            length: (packed >> self.displacement_bits()) as u8 + 1,
            displacement: packed & self.max_displacement(),
        }
    }

    /// Writes a packed entry into `out`, which must be `entry_size` bytes.
    pub fn write(&self, out: &mut [u8], packed: u64) {
        write_be(out, packed);
    }
}
