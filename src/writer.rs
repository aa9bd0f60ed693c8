//! Image writer.
//!
//! This module writes a relocatable image: the region's bytes followed, at the table's
//! assembled address, by the relocation table.

use anyhow::{bail, Context, Result};
use std::fs::{self, OpenOptions};
use std::path::Path;

use memmap2::MmapMut;

use crate::builder::BuiltTable;
use crate::layout::Region;

/// Lays out `region` and `table` as one contiguous image.
pub fn build_image<D: AsRef<[u8]>>(region: &Region<D>, table: &BuiltTable) -> Result<Vec<u8>> {
    if table.address < region.end() {
        bail!(
            "table at 0x{:x} overlaps the region ending at 0x{:x}",
            table.address,
            region.end()
        );
    }
    let mut buffer = region.bytes().to_vec();
    buffer.resize((table.address - region.base) as usize, 0);
    buffer.extend_from_slice(&table.to_bytes());
    Ok(buffer)
}

/// Write a relocatable image to disk.
pub fn write_image<D: AsRef<[u8]>>(
    output_path: &Path,
    region: &Region<D>,
    table: &BuiltTable,
) -> Result<()> {
    let buffer = build_image(region, table)?;
    fs::write(output_path, &buffer)
        .with_context(|| format!("failed to write {}", output_path.display()))?;
    tracing::debug!("wrote {} bytes to {}", buffer.len(), output_path.display());
    Ok(())
}

/// Copies `input` to `output` and maps the copy writable, so it can be relocated in place.
pub fn map_copy(input: &Path, output: &Path) -> Result<MmapMut> {
    if input != output {
        fs::copy(input, output).with_context(|| {
            format!("failed to copy {} to {}", input.display(), output.display())
        })?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(output)
        .with_context(|| format!("failed to open {}", output.display()))?;
    let mmap = unsafe { MmapMut::map_mut(&file)? };
    Ok(mmap)
}
