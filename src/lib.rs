// src/lib.rs

//! debasm: Debian binary package assembler
//!
//! Turns staged package trees into package roots ready for `dpkg-deb`.
//!
//! # Pipeline
//!
//! - Debug information: ELF binaries are stripped and their DWARF data moves
//!   into an automatic `<pkg>-dbgsym` package keyed by build-id
//! - Services: systemd units and init scripts are detected, matched against
//!   packager rules through their aliases and turned into maintainer-script
//!   snippets
//! - Control files: relationship substvars are merged into the binary stanza
//!   and `dpkg-gencontrol` writes `DEBIAN/control` with the computed
//!   Installed-Size, Multi-Arch and t64 data
//!
//! Package content lives in a [`filesystem::VfsTree`] until it is deployed;
//! external tools run through [`process::CommandRunner`].

pub mod assembler;
pub mod changelog;
pub mod config;
pub mod dbgsym;
pub mod deb822;
mod error;
pub mod filesystem;
pub mod maintscript;
pub mod package;
pub mod process;
pub mod relationships;
pub mod service;
pub mod substvars;

pub use assembler::{AssembledPackage, BuildContext, PackageAssembler, PackageInput};
pub use config::{AssemblyConfig, AssemblyPlan, BuildOptions, PackagePlan};
pub use error::{Error, Result};
pub use package::{ArchTable, BinaryPackage, ControlFile};
