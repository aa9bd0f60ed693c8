//! Relocation engine for bare-metal mainframe programs.
//!
//! This library lets a program assembled to run at one address execute after being loaded at
//! another. It is organized into several modules:
//! - `arch`: Address-width models (24, 31 and 64 bit).
//! - `format`: Catalog of structures embedding address constants.
//! - `symbol`: Labels naming address constants.
//! - `layout`: Region memory layout.
//! - `table`: Relocation table wire format.
//! - `builder`: Build-time table construction.
//! - `relocator`: Runtime patching.
//! - `registers`: Register save area and relocation mask.
//! - `invoker`: Relocator call convention.
//! - `writer`: Relocatable image output.
//! - `config`: CLI configuration.

pub mod arch;
pub mod builder;
pub mod config;
pub mod format;
pub mod invoker;
pub mod layout;
pub mod registers;
pub mod relocator;
pub mod symbol;
pub mod table;
pub mod utils;
pub mod writer;
