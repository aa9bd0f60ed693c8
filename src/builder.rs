//! Relocation table builder.
//!
//! The builder is the build-time half of the relocation engine. For one region it records every
//! address constant that must be adjusted when the region is loaded somewhere other than its
//! assembled base, and produces the table the relocator consumes at run time.
//!
//! A build unit owns exactly one table:
//! 1. `begin_table` opens it with an entry size and an optional transfer address.
//! 2. `add_entry` resolves each address constant and packs it into an entry.
//! 3. `end_table` closes the list and lays the table out.

use std::str::FromStr;

use crate::arch::{AddressModel, AddressWidth};
use crate::format::{AddressFormat, FieldLocation, UnknownFormat};
use crate::layout::Region;
use crate::symbol::Label;
use crate::table::{
    header_size, EntryCodec, RelocationEntry, RelocationTable, TableStatus, ENTRY_SIZES,
    EYECATCHER,
};
use crate::utils::{align_up, parse_address};

/// Build-time failures. Each one aborts table construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("a relocation table is already open for this region")]
    TableAlreadyOpen,
    #[error("a relocation table was already built for this region")]
    TableAlreadyBuilt,
    #[error("no relocation table has been opened")]
    NoOpenTable,
    #[error("the relocation table is closed")]
    TableClosed,
    #[error("entry size {0} is invalid, must be 2, 3 or 4")]
    InvalidEntrySize(u8),
    #[error("length of '{0}' cannot be determined, value is not relocatable")]
    Unrelocatable(String),
    #[error("'{label}' is {width} byte(s) wide, nothing to relocate")]
    WidthTooSmall { label: String, width: u8 },
    #[error("'{label}' is {width} bytes wide, not representable with {model} addresses")]
    WidthUnsupported {
        label: String,
        width: u8,
        model: AddressWidth,
    },
    #[error("'{label}' at 0x{address:x} is outside the region")]
    OutsideRegion { label: String, address: u64 },
    #[error("displacement 0x{displacement:x} of '{label}' exceeds the entry maximum 0x{max:x}")]
    DisplacementTooLarge {
        label: String,
        displacement: u64,
        max: u64,
    },
    #[error(transparent)]
    UnknownFormat(#[from] UnknownFormat),
    #[error("malformed address constant '{0}'")]
    MalformedAdcon(String),
    #[error("relocation table after 0x{0:x} does not fit below the top of storage")]
    TableOverflow(u64),
}

/// How the address constant of an entry is located relative to its label.
///
/// A catalog format supplies both displacement and width. Explicit values override the catalog
/// one component at a time. Without either, the width comes from the label's length attribute
/// and the displacement is zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntrySpec {
    pub format: Option<AddressFormat>,
    pub length: Option<u8>,
    pub displacement: Option<u64>,
}

impl EntrySpec {
    /// Width from the label's length attribute, no displacement.
    pub fn implied() -> Self {
        Self::default()
    }

    pub fn format(format: AddressFormat) -> Self {
        Self {
            format: Some(format),
            ..Self::default()
        }
    }

    pub fn explicit(length: u8, displacement: u64) -> Self {
        Self {
            format: None,
            length: Some(length),
            displacement: Some(displacement),
        }
    }

    fn resolve(&self, label: &Label) -> Result<FieldLocation, BuildError> {
        let catalog = self.format.map(AddressFormat::location);
        let width = self
            .length
            .or(catalog.map(|l| l.width))
            .or(label.length)
            .ok_or_else(|| BuildError::Unrelocatable(label.name.clone()))?;
        let displacement = self
            .displacement
            .or(catalog.map(|l| l.displacement))
            .unwrap_or(0);
        Ok(FieldLocation::new(displacement, width))
    }
}

/// An address constant named on the command line: `ADDR`, `ADDR:FORMAT` or `ADDR:LEN[+DISP]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adcon {
    pub label: Label,
    pub spec: EntrySpec,
}

impl FromStr for Adcon {
    type Err = BuildError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || BuildError::MalformedAdcon(s.to_string());
        let (address, field) = match s.split_once(':') {
            Some((address, field)) => (address, Some(field)),
            None => (s, None),
        };
        let label = Label::at(parse_address(address).map_err(|_| malformed())?);
        let spec = match field {
            None => EntrySpec::explicit(4, 0),
            Some(field) if field.starts_with(|c: char| c.is_ascii_digit()) => {
                let (length, displacement) = match field.split_once('+') {
                    Some((length, displacement)) => (
                        length,
                        parse_address(displacement).map_err(|_| malformed())?,
                    ),
                    None => (field, 0),
                };
                EntrySpec::explicit(length.parse().map_err(|_| malformed())?, displacement)
            }
            Some(field) => EntrySpec::format(field.parse()?),
        };
        Ok(Self { label, spec })
    }
}

/// Where a closed table is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionState {
    /// Append the table to the region at the next doubleword boundary. The region's location
    /// counter moves past the table.
    Append,
    /// Emit the table at `address` in a section of its own and restore the region's location
    /// counter to where it was.
    Restore { address: u64 },
}

/// A closed table, ready to be placed in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltTable {
    /// Assembled address of the table header.
    pub address: u64,
    pub header: RelocationTable,
    /// Packed entry list.
    pub entries: Vec<u8>,
    /// Pointer size the header is laid out with.
    pub pointer_size: usize,
}

impl BuiltTable {
    /// Header followed by the entry list.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.header.to_bytes(self.pointer_size);
        out.extend_from_slice(&self.entries);
        out
    }

    pub fn len(&self) -> usize {
        header_size(self.pointer_size) + self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries in the table.
    pub fn entry_count(&self) -> usize {
        self.entries.len() / usize::from(self.header.entry_size)
    }
}

struct OpenTable {
    codec: EntryCodec,
    transfer_address: u64,
    entries: Vec<u8>,
}

enum State {
    Idle,
    Open(OpenTable),
    Closed,
}

/// Builds the relocation table for one region.
pub struct TableBuilder<A: AddressModel> {
    model: A,
    assembled_base: u64,
    location_counter: u64,
    state: State,
}

impl<A: AddressModel> TableBuilder<A> {
    /// A builder for a region of `size` bytes assembled at `assembled_base`.
    ///
    /// A region reaching past the top of the address space is cut off there.
    pub fn new(model: A, assembled_base: u64, size: u64) -> Self {
        Self {
            model,
            assembled_base,
            location_counter: assembled_base.saturating_add(size),
            state: State::Idle,
        }
    }

    pub fn for_region<D: AsRef<[u8]>>(model: A, region: &Region<D>) -> Self {
        Self::new(model, region.base, region.size())
    }

    /// Address of the next free byte after the region.
    pub fn location_counter(&self) -> u64 {
        self.location_counter
    }

    /// Opens the region's table.
    pub fn begin_table(
        &mut self,
        entry_size: u8,
        transfer_address: Option<u64>,
    ) -> Result<(), BuildError> {
        match self.state {
            State::Open(_) => return Err(BuildError::TableAlreadyOpen),
            State::Closed => return Err(BuildError::TableAlreadyBuilt),
            State::Idle => {}
        }
        if !ENTRY_SIZES.contains(&entry_size) {
            return Err(BuildError::InvalidEntrySize(entry_size));
        }
        let codec = EntryCodec::new(entry_size, self.model.length_bits())
            .ok_or(BuildError::InvalidEntrySize(entry_size))?;
        tracing::debug!(
            "opened {} relocation table at base 0x{:x}: {}-byte entries, displacement limit 0x{:x}",
            self.model.width(),
            self.assembled_base,
            entry_size,
            codec.max_displacement()
        );
        self.state = State::Open(OpenTable {
            codec,
            transfer_address: transfer_address.unwrap_or(0),
            entries: Vec::new(),
        });
        Ok(())
    }

    /// Records the address constant described by `label` and `spec`.
    pub fn add_entry(
        &mut self,
        label: &Label,
        spec: EntrySpec,
    ) -> Result<RelocationEntry, BuildError> {
        let table = match &mut self.state {
            State::Open(table) => table,
            State::Idle => return Err(BuildError::NoOpenTable),
            State::Closed => return Err(BuildError::TableClosed),
        };

        let requested = spec.resolve(label)?;
        if requested.width < 2 {
            return Err(BuildError::WidthTooSmall {
                label: label.name.clone(),
                width: requested.width,
            });
        }
        let outside = || BuildError::OutsideRegion {
            label: label.name.clone(),
            address: label.address,
        };
        requested
            .displacement
            .checked_add(u64::from(requested.width))
            .ok_or_else(outside)?;
        let field = self
            .model
            .fit_field(requested)
            .ok_or_else(|| BuildError::WidthUnsupported {
                label: label.name.clone(),
                width: requested.width,
                model: self.model.width(),
            })?;

        let region_size = self.location_counter - self.assembled_base;
        let displacement = label
            .address
            .checked_sub(self.assembled_base)
            .and_then(|offset| offset.checked_add(field.displacement))
            .ok_or_else(outside)?;
        displacement
            .checked_add(u64::from(field.width))
            .filter(|end| *end <= region_size)
            .ok_or_else(outside)?;

        let packed = table
            .codec
            .encode(field.width, displacement)
            .ok_or_else(|| BuildError::DisplacementTooLarge {
                label: label.name.clone(),
                displacement,
                max: table.codec.max_displacement(),
            })?;
        let size = usize::from(table.codec.entry_size());
        let start = table.entries.len();
        table.entries.resize(start + size, 0);
        table.codec.write(&mut table.entries[start..], packed);

        tracing::trace!(
            "entry {}: '{}' length {} displacement 0x{:x} packed 0x{:x}",
            start / size,
            label.name,
            field.width,
            displacement,
            packed
        );
        Ok(RelocationEntry {
            length: field.width,
            displacement,
        })
    }

    /// Closes the table and lays it out according to `section`.
    pub fn end_table(&mut self, section: SectionState) -> Result<BuiltTable, BuildError> {
        let table = match std::mem::replace(&mut self.state, State::Closed) {
            State::Open(table) => table,
            State::Idle => {
                self.state = State::Idle;
                return Err(BuildError::NoOpenTable);
            }
            State::Closed => return Err(BuildError::TableClosed),
        };

        let pointer_size = self.model.pointer_size();
        let start = match section {
            SectionState::Append => self.location_counter,
            SectionState::Restore { address } => address,
        };
        let overflow = || BuildError::TableOverflow(start);
        let address = match section {
            SectionState::Append => align_up(start, 8).ok_or_else(overflow)?,
            SectionState::Restore { address } => address,
        };
        let first_entry = address
            .checked_add(header_size(pointer_size) as u64)
            .ok_or_else(overflow)?;
        let end = first_entry
            .checked_add(table.entries.len() as u64)
            .ok_or_else(overflow)?;
        let last_entry_byte = end.wrapping_sub(1);
        let header = RelocationTable {
            eyecatcher: EYECATCHER,
            assembled_base: self.assembled_base,
            transfer_address: table.transfer_address,
            first_entry,
            entry_size: table.codec.entry_size(),
            last_entry_byte,
            register_width: pointer_size as u8,
            status: TableStatus::NotStarted,
        };
        let built = BuiltTable {
            address,
            header,
            entries: table.entries,
            pointer_size,
        };
        if section == SectionState::Append {
            self.location_counter = end;
        }

        tracing::debug!(
            "closed relocation table at 0x{:x}: {} entries, {} bytes",
            address,
            built.entry_count(),
            built.len()
        );
        Ok(built)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::amode24::Amode24;
    use crate::arch::amode31::Amode31;
    use crate::arch::amode64::Amode64;

    fn open<A: AddressModel>(model: A) -> TableBuilder<A> {
        let mut builder = TableBuilder::new(model, 0x1000, 0x100);
        builder.begin_table(4, None).unwrap();
        builder
    }

    #[test]
    fn begin_twice_fails() {
        let mut builder = open(Amode31);
        assert_eq!(builder.begin_table(4, None), Err(BuildError::TableAlreadyOpen));
        builder.end_table(SectionState::Append).unwrap();
        assert_eq!(builder.begin_table(4, None), Err(BuildError::TableAlreadyBuilt));
    }

    #[test]
    fn invalid_entry_size() {
        let mut builder = TableBuilder::new(Amode31, 0x1000, 0x100);
        assert_eq!(builder.begin_table(5, None), Err(BuildError::InvalidEntrySize(5)));
        assert_eq!(builder.begin_table(1, None), Err(BuildError::InvalidEntrySize(1)));
    }

    #[test]
    fn entries_require_an_open_table() {
        let mut builder = TableBuilder::new(Amode31, 0x1000, 0x100);
        let label = Label::with_length("A", 0x1000, 4);
        assert_eq!(
            builder.add_entry(&label, EntrySpec::implied()),
            Err(BuildError::NoOpenTable)
        );
        assert_eq!(
            builder.end_table(SectionState::Append),
            Err(BuildError::NoOpenTable)
        );

        builder.begin_table(2, None).unwrap();
        builder.end_table(SectionState::Append).unwrap();
        assert_eq!(
            builder.add_entry(&label, EntrySpec::implied()),
            Err(BuildError::TableClosed)
        );
        assert_eq!(
            builder.end_table(SectionState::Append),
            Err(BuildError::TableClosed)
        );
    }

    #[test]
    fn unknown_length_is_unrelocatable() {
        let mut builder = open(Amode31);
        assert_eq!(
            builder.add_entry(&Label::new("EXPR", 0x1010), EntrySpec::implied()),
            Err(BuildError::Unrelocatable("EXPR".into()))
        );
    }

    #[test]
    fn rejects_widths_below_two() {
        let mut builder = open(Amode64);
        for width in [0, 1] {
            let err = builder
                .add_entry(&Label::at(0x1010), EntrySpec::explicit(width, 0))
                .unwrap_err();
            assert!(matches!(err, BuildError::WidthTooSmall { .. }));
        }
    }

    #[test]
    fn rejects_doublewords_below_64_bit() {
        let mut builder = open(Amode31);
        let err = builder
            .add_entry(&Label::at(0x1010), EntrySpec::format(AddressFormat::Psw64))
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::WidthUnsupported {
                width: 8,
                model: AddressWidth::Bits31,
                ..
            }
        ));

        let mut builder = open(Amode64);
        let entry = builder
            .add_entry(&Label::at(0x1010), EntrySpec::format(AddressFormat::Psw64))
            .unwrap();
        assert_eq!(entry, RelocationEntry { length: 8, displacement: 0x18 });
    }

    #[test]
    fn catalog_and_explicit_resolution() {
        let mut builder = open(Amode31);
        let ccw = builder
            .add_entry(&Label::at(0x1020), EntrySpec::format(AddressFormat::Ccw0))
            .unwrap();
        assert_eq!(ccw, RelocationEntry { length: 3, displacement: 0x21 });

        // Explicit length overrides the catalog width, displacement still from the catalog.
        let spec = EntrySpec {
            format: Some(AddressFormat::Orb),
            length: Some(2),
            displacement: None,
        };
        let orb = builder.add_entry(&Label::at(0x1040), spec).unwrap();
        assert_eq!(orb, RelocationEntry { length: 2, displacement: 0x48 });

        let implied = builder
            .add_entry(&Label::with_length("P", 0x1010, 4), EntrySpec::implied())
            .unwrap();
        assert_eq!(implied, RelocationEntry { length: 4, displacement: 0x10 });
    }

    #[test]
    fn narrows_fullwords_under_24_bit() {
        let mut builder = open(Amode24);
        let entry = builder
            .add_entry(&Label::at(0x1040), EntrySpec::format(AddressFormat::Ccw1))
            .unwrap();
        assert_eq!(entry, RelocationEntry { length: 3, displacement: 0x45 });
    }

    #[test]
    fn rejects_fields_outside_region() {
        let mut builder = open(Amode31);
        for address in [0x0FFC, 0x10FE] {
            let err = builder
                .add_entry(&Label::at(address), EntrySpec::explicit(4, 0))
                .unwrap_err();
            assert!(matches!(err, BuildError::OutsideRegion { .. }));
        }
    }

    #[test]
    fn huge_displacements_are_outside_region() {
        fn check<A: AddressModel>(model: A) {
            let mut builder = open(model);
            for displacement in [u64::MAX, u64::MAX - 1, u64::MAX - 3] {
                let err = builder
                    .add_entry(&Label::at(0x1000), EntrySpec::explicit(4, displacement))
                    .unwrap_err();
                assert!(matches!(err, BuildError::OutsideRegion { address: 0x1000, .. }));
            }
            let adcon: Adcon = "0x1000:4+0xFFFFFFFFFFFFFFFE".parse().unwrap();
            let err = builder.add_entry(&adcon.label, adcon.spec).unwrap_err();
            assert!(matches!(err, BuildError::OutsideRegion { .. }));

            let table = builder.end_table(SectionState::Append).unwrap();
            assert_eq!(table.entry_count(), 0);
        }
        check(Amode24);
        check(Amode31);
        check(Amode64);
    }

    #[test]
    fn region_at_top_of_storage() {
        let mut builder = TableBuilder::new(Amode64, u64::MAX - 0x0F, 0x100);
        assert_eq!(builder.location_counter(), u64::MAX);
        builder.begin_table(4, None).unwrap();
        builder
            .add_entry(&Label::at(u64::MAX - 0x0F), EntrySpec::explicit(8, 0))
            .unwrap();
        assert_eq!(
            builder.end_table(SectionState::Append),
            Err(BuildError::TableOverflow(u64::MAX))
        );

        let mut builder = TableBuilder::new(Amode31, 0x1000, 0x100);
        builder.begin_table(4, None).unwrap();
        assert_eq!(
            builder.end_table(SectionState::Restore { address: u64::MAX - 8 }),
            Err(BuildError::TableOverflow(u64::MAX - 8))
        );
    }

    #[test]
    fn rejects_displacements_beyond_entry_capacity() {
        let mut builder = TableBuilder::new(Amode31, 0, 0x10000);
        builder.begin_table(2, None).unwrap();
        builder
            .add_entry(&Label::at(0x3FFC), EntrySpec::explicit(4, 0))
            .unwrap();
        let err = builder
            .add_entry(&Label::at(0x4000), EntrySpec::explicit(4, 0))
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::DisplacementTooLarge { max: 0x3FFF, .. }
        ));
    }

    #[test]
    fn append_lays_out_after_region() {
        let mut builder = TableBuilder::new(Amode31, 0x1000, 0x1D);
        builder.begin_table(4, Some(0x1008)).unwrap();
        builder
            .add_entry(&Label::at(0x1010), EntrySpec::explicit(4, 0))
            .unwrap();
        let built = builder.end_table(SectionState::Append).unwrap();

        assert_eq!(built.address, 0x1020);
        assert_eq!(built.header.first_entry, 0x1020 + 30);
        assert_eq!(built.header.last_entry_byte, 0x1020 + 30 + 3);
        assert_eq!(built.header.transfer_address, 0x1008);
        assert_eq!(built.header.register_width, 4);
        assert_eq!(built.entry_count(), 1);
        assert_eq!(built.to_bytes().len(), built.len());
        assert_eq!(builder.location_counter(), 0x1020 + 34);
        // (4 - 1) << 30 | 0x10
        assert_eq!(&built.entries, &[0xC0, 0x00, 0x00, 0x10]);
    }

    #[test]
    fn restore_leaves_location_counter() {
        let mut builder = TableBuilder::new(Amode64, 0x1000, 0x20);
        builder.begin_table(3, None).unwrap();
        let built = builder
            .end_table(SectionState::Restore { address: 0x8000 })
            .unwrap();
        assert_eq!(built.address, 0x8000);
        assert_eq!(built.header.first_entry, 0x8000 + 50);
        assert_eq!(built.header.entry_list_len(), 0);
        assert_eq!(builder.location_counter(), 0x1020);
    }

    #[test]
    fn parses_adcon_specs() {
        let adcon: Adcon = "0x1010".parse().unwrap();
        assert_eq!(adcon.label.address, 0x1010);
        assert_eq!(adcon.spec, EntrySpec::explicit(4, 0));

        let adcon: Adcon = "0x1040:ccw1".parse().unwrap();
        assert_eq!(adcon.spec, EntrySpec::format(AddressFormat::Ccw1));

        let adcon: Adcon = "0x1040:3+0x5".parse().unwrap();
        assert_eq!(adcon.spec, EntrySpec::explicit(3, 5));

        assert!(matches!(
            "0x1040:bogus".parse::<Adcon>(),
            Err(BuildError::UnknownFormat(_))
        ));
        assert!(matches!(
            "zz:4".parse::<Adcon>(),
            Err(BuildError::MalformedAdcon(_))
        ));
    }
}
