//! Entry point for the satk relocation tool.
//!
//! This file handles high-level application flow:
//! 1. Parse command-line arguments using `clap` and set up `tracing`.
//! 2. Select the address model for the requested addressing width.
//! 3. Run the subcommand: build a table, relocate an image, or dump a table.
//!
//! Error handling is done via `anyhow`.

use anyhow::{bail, Context, Result};
use clap::Parser;
use memmap2::Mmap;
use std::fs::File;
use tracing_subscriber::EnvFilter;

use satk::arch::model_for;
use satk::builder::{SectionState, TableBuilder};
use satk::config::{BuildArgs, Command, Config, DumpArgs, RelocateArgs};
use satk::invoker::{Disposition, Invoker};
use satk::layout::Region;
use satk::registers::RegisterSaveArea;
use satk::relocator::Relocator;
use satk::table::{length_bits_for, RelocationTable, EYECATCHER};
use satk::writer;

fn main() -> Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match config.command {
        Command::Build(args) => build(args),
        Command::Relocate(args) => relocate(args),
        Command::Dump(args) => dump(args),
    }
}

fn build(args: BuildArgs) -> Result<()> {
    let data = std::fs::read(&args.region)
        .with_context(|| format!("failed to read {}", args.region.display()))?;
    let region = Region::new(args.base, data);

    let mut builder = TableBuilder::for_region(model_for(args.amode), &region);
    builder.begin_table(args.entry_size, args.transfer)?;
    for adcon in &args.adcons {
        builder
            .add_entry(&adcon.label, adcon.spec)
            .with_context(|| format!("failed to add address constant {}", adcon.label.name))?;
    }
    let table = builder.end_table(SectionState::Append)?;

    writer::write_image(&args.output, &region, &table)?;
    println!(
        "Built {} relocation table with {} entries at 0x{:X} in {}",
        args.amode,
        table.entry_count(),
        table.address,
        args.output.display()
    );
    Ok(())
}

/// Address of the table once an image assembled at `base` is loaded at `new_base`.
fn moved_table(base: u64, table: u64, new_base: u64) -> Result<u64> {
    let table_offset = table
        .checked_sub(base)
        .context("table address is below the image base")?;
    new_base
        .checked_add(table_offset)
        .context("new base plus table offset overflows")
}

fn relocate(args: RelocateArgs) -> Result<()> {
    let table = moved_table(args.base, args.table, args.new_base)?;

    let mmap = writer::map_copy(&args.image, &args.output)?;
    let mut region = Region::new(args.new_base, mmap);

    let mut save_area = RegisterSaveArea::new();
    for (register, value) in &args.registers {
        save_area.set(*register, *value);
    }

    let relocator = Relocator::new(model_for(args.amode));
    let invoker = Invoker::new(&relocator);
    let disposition = invoker.invoke(&mut region, table, args.mask, &mut save_area);
    region.data.flush().context("failed to flush relocated image")?;

    for (register, _) in &args.registers {
        println!("R{register} = 0x{:X}", save_area.get(*register));
    }
    match disposition {
        Disposition::Transfer(address) => {
            println!(
                "Relocated {} to 0x{:X}, transfer to 0x{:X}",
                args.output.display(),
                args.new_base,
                address
            )
        }
        Disposition::Continue => {
            println!("Relocated {} to 0x{:X}", args.output.display(), args.new_base)
        }
        Disposition::Halt(err) => {
            bail!("relocation failed (code {}): {}", err.return_code(), err)
        }
    }
    Ok(())
}

fn dump(args: DumpArgs) -> Result<()> {
    let file = File::open(&args.image)
        .with_context(|| format!("failed to open {}", args.image.display()))?;
    let mmap = unsafe { Mmap::map(&file)? };
    let region = Region::new(args.base, &mmap[..]);

    let offset = region
        .offset_of(args.table, 8)
        .context("table address is outside the image")?;
    let bytes = &region.bytes()[offset..];
    if bytes[..8] != EYECATCHER {
        bail!("no relocation table at 0x{:X}", args.table);
    }
    let (_, header) =
        RelocationTable::locate(bytes).context("relocation table header is malformed")?;

    println!("table at 0x{:X}", args.table);
    println!("  assembled base   0x{:X}", header.assembled_base);
    println!("  transfer address 0x{:X}", header.transfer_address);
    println!("  entries          0x{:X}..=0x{:X}", header.first_entry, header.last_entry_byte);
    println!("  entry size       {}", header.entry_size);
    println!("  register width   {}", header.register_width);
    println!("  status           {:?}", header.status);

    let length_bits = length_bits_for(header.register_width).context("bad register width")?;
    let start = region
        .offset_of(header.first_entry, header.entry_list_len())
        .context("entry list lies outside the image")?;
    let list = &region.bytes()[start..start + header.entry_list_len() as usize];
    for (index, entry) in header.entries(list).enumerate() {
        println!(
            "  [{index:4}] length {} displacement 0x{:X} ({} length bits)",
            entry.length, entry.displacement, length_bits
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_moves_with_the_image() {
        assert_eq!(moved_table(0x1000, 0x1020, 0x5000).unwrap(), 0x5020);
        assert_eq!(moved_table(0x5000, 0x5020, 0x1000).unwrap(), 0x1020);
    }

    #[test]
    fn table_address_errors_instead_of_wrapping() {
        assert!(moved_table(0x1000, 0x0FF0, 0x5000).is_err());
        let err = moved_table(0x1000, 0x1020, 0xFFFF_FFFF_FFFF_FFF0).unwrap_err();
        assert!(err.to_string().contains("overflows"));
    }
}
