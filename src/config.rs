//! Configuration module.
//!
//! This module defines the command-line interface (CLI) using `clap`: building a relocation
//! table for a region image, relocating an image in place, and dumping a table.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::arch::AddressWidth;
use crate::builder::Adcon;
use crate::registers::RegisterMask;
use crate::utils::parse_address;

/// Relocation tables for bare-metal mainframe programs.
///
/// Builds the relocation table of a region assembled at one address and relocates the region
/// after it has been loaded at another, for 24-bit, 31-bit and 64-bit addressing.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    #[command(subcommand)]
    pub command: Command,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info", help = "Set the logging level")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build a relocation table and append it to a region image
    Build(BuildArgs),
    /// Relocate an image to a new base address
    Relocate(RelocateArgs),
    /// Print a relocation table and its entries
    Dump(DumpArgs),
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Raw region image
    #[arg(long)]
    pub region: PathBuf,

    /// Address the region was assembled at
    #[arg(long, value_parser = address)]
    pub base: u64,

    /// Addressing width: 24, 31 or 64
    #[arg(long, default_value = "31")]
    pub amode: AddressWidth,

    /// Bytes per table entry: 2, 3 or 4
    #[arg(long, default_value_t = 4)]
    pub entry_size: u8,

    /// Program entry point to relocate and return
    #[arg(long, value_parser = address)]
    pub transfer: Option<u64>,

    /// Address constant: ADDR, ADDR:FORMAT or ADDR:LEN[+DISP]
    #[arg(long = "adcon", num_args = 1..)]
    pub adcons: Vec<Adcon>,

    /// Output file
    #[arg(short, long, default_value = "region.rel", help = "Path to the relocatable image")]
    pub output: PathBuf,
}

#[derive(Args, Debug)]
pub struct RelocateArgs {
    /// Relocatable image written by `build`
    #[arg(long)]
    pub image: PathBuf,

    /// Address the image was assembled at
    #[arg(long, value_parser = address)]
    pub base: u64,

    /// Assembled address of the relocation table
    #[arg(long, value_parser = address)]
    pub table: u64,

    /// Address the image is loaded at
    #[arg(long, value_parser = address)]
    pub new_base: u64,

    /// Addressing width of the relocator: 24, 31 or 64
    #[arg(long, default_value = "31")]
    pub amode: AddressWidth,

    /// Registers to relocate, four hex digits, leftmost bit R0
    #[arg(long)]
    pub mask: Option<RegisterMask>,

    /// Saved register value: N=VALUE
    #[arg(long = "register", value_parser = register)]
    pub registers: Vec<(usize, u64)>,

    /// Output file
    #[arg(short, long, default_value = "region.bin", help = "Path to the relocated image")]
    pub output: PathBuf,
}

#[derive(Args, Debug)]
pub struct DumpArgs {
    /// Image holding the table
    #[arg(long)]
    pub image: PathBuf,

    /// Address the image was assembled at
    #[arg(long, value_parser = address)]
    pub base: u64,

    /// Address of the relocation table
    #[arg(long, value_parser = address)]
    pub table: u64,
}

fn address(text: &str) -> Result<u64, String> {
    parse_address(text).map_err(|e| format!("invalid address '{text}': {e}"))
}

fn register(text: &str) -> Result<(usize, u64), String> {
    let (number, value) = text
        .split_once('=')
        .ok_or_else(|| format!("expected N=VALUE, got '{text}'"))?;
    let number: usize = number
        .trim_start_matches(['R', 'r'])
        .parse()
        .map_err(|_| format!("invalid register '{number}'"))?;
    if number > 15 {
        return Err(format!("register {number} out of range 0-15"));
    }
    Ok((number, address(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Config::command().debug_assert();
    }

    #[test]
    fn parses_relocate_arguments() {
        let config = Config::try_parse_from([
            "satk",
            "relocate",
            "--image",
            "a.rel",
            "--base",
            "0x1000",
            "--table",
            "0x1020",
            "--new-base",
            "0x5000",
            "--mask",
            "2000",
            "--register",
            "R2=0x1030",
        ])
        .unwrap();
        let Command::Relocate(args) = config.command else {
            panic!("expected relocate");
        };
        assert_eq!(args.new_base, 0x5000);
        assert_eq!(args.mask, Some(RegisterMask(0x2000)));
        assert_eq!(args.registers, vec![(2, 0x1030)]);
        assert_eq!(args.amode, AddressWidth::Bits31);
    }

    #[test]
    fn register_out_of_range() {
        assert!(register("16=0").is_err());
        assert!(register("0x10").is_err());
    }
}
