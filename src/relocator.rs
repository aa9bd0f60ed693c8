//! Runtime relocator.
//!
//! Given a region loaded at a new base and the address of its relocation table, the relocator
//! walks every entry of the table and adjusts the address constant it describes by the distance
//! between the assembled base and the load address. It can also adjust a caller-selected set of
//! saved registers and the table's transfer address.
//!
//! The work happens in stages:
//! 1. Sanity check: eyecatcher, status and address width, before anything is written.
//! 2. Pre-flight scan of the entry list, still read-only.
//! 3. Entry patching, in place.
//! 4. Optional register and transfer address adjustment.
//! 5. The table is marked completed so a second call is rejected.

use crate::arch::{AddressModel, Adjustment};
use crate::layout::Region;
use crate::registers::{RegisterMask, RegisterSaveArea};
use crate::table::{EntryCodec, RelocationEntry, RelocationTable, TableStatus, EYECATCHER};
use crate::utils::{read_be, write_be};

/// Return code: relocation succeeded and a transfer address was returned.
pub const RC_TRANSFER: u8 = 0;
/// Return code: relocation succeeded, the table has no transfer address.
pub const RC_NO_TRANSFER: u8 = 4;

/// Runtime failures. None of them is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RelocError {
    #[error("0x{0:x} does not address a relocation table")]
    BadTablePointer(u64),
    #[error("relocation table has already been relocated")]
    AlreadyRelocated,
    #[error("table uses {table}-byte addresses, this relocator supports at most {supported}")]
    AddressTooWide { table: u8, supported: u8 },
    #[error("entry {index} has invalid length {length}")]
    BadEntryLength { index: usize, length: u8 },
    #[error("entry {index} at displacement 0x{displacement:x} lies outside the region")]
    EntryOutsideRegion { index: usize, displacement: u64 },
}

impl RelocError {
    /// Return code reported to the caller of the relocator.
    pub fn return_code(&self) -> u8 {
        match self {
            RelocError::BadTablePointer(_) => 8,
            RelocError::AlreadyRelocated => 12,
            RelocError::AddressTooWide { .. } => 16,
            RelocError::BadEntryLength { .. } => 20,
            RelocError::EntryOutsideRegion { .. } => 24,
        }
    }
}

/// Result of a successful relocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    /// Relocated transfer address, when the table has one.
    pub transfer_address: Option<u64>,
    pub adjustment: Adjustment,
    pub entries_patched: usize,
    pub registers_patched: usize,
}

impl Relocation {
    pub fn return_code(&self) -> u8 {
        if self.transfer_address.is_some() {
            RC_TRANSFER
        } else {
            RC_NO_TRANSFER
        }
    }
}

/// Validated view of a table found in a region.
struct TableView {
    offset: usize,
    pointer_size: usize,
    header: RelocationTable,
    codec: EntryCodec,
    entries_offset: usize,
    entries_len: usize,
}

/// Relocates regions for one address model.
pub struct Relocator<A: AddressModel> {
    model: A,
}

impl<A: AddressModel> Relocator<A> {
    pub fn new(model: A) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &A {
        &self.model
    }

    /// Relocates `region` in place.
    ///
    /// `region.base` is the address the region now occupies. `table` is the address of the
    /// relocation table inside the region, at that new location. When `registers` is given,
    /// the saved registers selected by the mask are adjusted as well.
    ///
    /// A failure in the sanity checks or the pre-flight scan leaves the region untouched.
    pub fn relocate<D>(
        &self,
        region: &mut Region<D>,
        table: u64,
        registers: Option<(&mut RegisterSaveArea, RegisterMask)>,
    ) -> Result<Relocation, RelocError>
    where
        D: AsRef<[u8]> + AsMut<[u8]>,
    {
        let view = self.inspect(region, table)?;
        let adjustment = Adjustment::between(view.header.assembled_base, region.base);
        tracing::debug!(
            "relocating table at 0x{:x}: assembled base 0x{:x}, new base 0x{:x}, adjustment {:?}",
            table,
            view.header.assembled_base,
            region.base,
            adjustment
        );

        // Pre-flight: every entry must be valid before the first byte is written.
        self.scan(region, &view)?;

        let bytes = region.bytes_mut();
        RelocationTable::write_status(
            &mut bytes[view.offset..],
            view.pointer_size,
            TableStatus::InProgress,
        );

        let entries_patched = self.patch_entries(bytes, &view, adjustment)?;

        let register_width = usize::from(view.header.register_width);
        let mut registers_patched = 0;
        if let Some((save_area, mask)) = registers {
            for register in mask.registers() {
                let old = save_area.get(register);
                let new = self.model.adjust(old, register_width, adjustment);
                save_area.set(register, new);
                registers_patched += 1;
                tracing::trace!("R{}: 0x{:x} -> 0x{:x}", register, old, new);
            }
        }

        let transfer_address = (view.header.transfer_address != 0).then(|| {
            self.model
                .adjust(view.header.transfer_address, register_width, adjustment)
        });

        RelocationTable::write_status(
            &mut bytes[view.offset..],
            view.pointer_size,
            TableStatus::Completed,
        );

        let relocation = Relocation {
            transfer_address,
            adjustment,
            entries_patched,
            registers_patched,
        };
        tracing::debug!(
            "relocation complete: {} entries, {} registers, transfer {:x?}",
            entries_patched,
            registers_patched,
            transfer_address
        );
        Ok(relocation)
    }

    /// Locates and sanity checks the table at `table` without modifying anything.
    fn inspect<D: AsRef<[u8]>>(
        &self,
        region: &Region<D>,
        table: u64,
    ) -> Result<TableView, RelocError> {
        let bad_pointer = RelocError::BadTablePointer(table);
        let offset = region.offset_of(table, 8).ok_or(bad_pointer)?;
        let bytes = &region.bytes()[offset..];
        if bytes[..8] != EYECATCHER {
            return Err(bad_pointer);
        }

        let (pointer_size, header) = RelocationTable::locate(bytes).ok_or(bad_pointer)?;
        let supported = self.model.pointer_size();

        if header.status != TableStatus::NotStarted {
            return Err(RelocError::AlreadyRelocated);
        }
        if pointer_size > supported {
            return Err(RelocError::AddressTooWide {
                table: pointer_size as u8,
                supported: supported as u8,
            });
        }

        let codec = header.codec().ok_or(bad_pointer)?;
        let entries_len = header.entry_list_len();
        let entries_offset = header
            .first_entry
            .checked_sub(header.assembled_base)
            .ok_or(bad_pointer)?;
        if entries_len % u64::from(header.entry_size) != 0
            || !region.contains_offset(entries_offset, entries_len)
        {
            return Err(bad_pointer);
        }

        Ok(TableView {
            offset,
            pointer_size,
            header,
            codec,
            entries_offset: entries_offset as usize,
            entries_len: entries_len as usize,
        })
    }

    fn check_entry(
        &self,
        index: usize,
        entry: RelocationEntry,
        region_size: u64,
    ) -> Result<(), RelocError> {
        if entry.length < 2 {
            return Err(RelocError::BadEntryLength {
                index,
                length: entry.length,
            });
        }
        if entry.length > self.model.max_adcon_len() {
            return Err(RelocError::AddressTooWide {
                table: entry.length,
                supported: self.model.max_adcon_len(),
            });
        }
        match entry.displacement.checked_add(u64::from(entry.length)) {
            Some(end) if end <= region_size => Ok(()),
            _ => Err(RelocError::EntryOutsideRegion {
                index,
                displacement: entry.displacement,
            }),
        }
    }

    fn scan<D: AsRef<[u8]>>(
        &self,
        region: &Region<D>,
        view: &TableView,
    ) -> Result<(), RelocError> {
        let list = &region.bytes()[view.entries_offset..view.entries_offset + view.entries_len];
        let size = usize::from(view.codec.entry_size());
        for (index, chunk) in list.chunks_exact(size).enumerate() {
            self.check_entry(index, view.codec.decode(read_be(chunk)), region.size())?;
        }
        Ok(())
    }

    /// Patches every entry's address constant. Entries are re-validated as they are read, so a
    /// list that patches itself can still fail here after earlier entries were adjusted.
    fn patch_entries(
        &self,
        bytes: &mut [u8],
        view: &TableView,
        adjustment: Adjustment,
    ) -> Result<usize, RelocError> {
        let size = usize::from(view.codec.entry_size());
        let region_size = bytes.len() as u64;
        let mut patched = 0;
        for index in 0..view.entries_len / size {
            let at = view.entries_offset + index * size;
            let entry = view.codec.decode(read_be(&bytes[at..at + size]));
            self.check_entry(index, entry, region_size)?;

            let start = entry.displacement as usize;
            let field = &mut bytes[start..start + usize::from(entry.length)];
            let old = read_be(field);
            let new = self.model.adjust(old, field.len(), adjustment);
            write_be(field, new);
            patched += 1;
            tracing::trace!(
                "entry {}: displacement 0x{:x} length {}: 0x{:x} -> 0x{:x}",
                index,
                entry.displacement,
                entry.length,
                old,
                new
            );
        }
        Ok(patched)
    }
}
