// tests/common/mod.rs

//! Shared test utilities: a scripted Debian toolchain and an on-disk source tree.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use debasm::process::fake::FakeRunner;
use debasm::process::{CommandOutput, Invocation};
use debasm::{AssemblyConfig, Result};
use tempfile::TempDir;

pub const CONTROL: &str = "\
Source: foo
Maintainer: Jane Doe <jane@example.org>

Package: foo
Architecture: any
Depends: ${misc:Depends}, ${shlibs:Depends}
Description: foo daemon

Package: libfoo1
Architecture: any
Section: libs
Description: foo library

Package: foo-data
Architecture: all
Description: foo data files
";

pub const CHANGELOG: &str = "\
foo (1.2-1) unstable; urgency=medium

  * New upstream release.

 -- Jane Doe <jane@example.org>  Mon, 05 Oct 2026 12:00:00 +0000
";

/// Smallest little-endian ELF64 file treated as a binary; `e_type` 2 is an
/// executable, 3 a shared object
pub fn elf_header(e_type: u16) -> Vec<u8> {
    let mut header = vec![0u8; 232];
    header[..4].copy_from_slice(b"\x7fELF");
    header[4] = 2;
    header[5] = 1;
    header[6] = 1;
    header[16..18].copy_from_slice(&e_type.to_le_bytes());
    header[20..24].copy_from_slice(&1u32.to_le_bytes());
    header
}

/// Answers the tools the assembler drives
///
/// Every ELF binary is reported unstripped, with the hex encoding of its
/// basename as build-id. `dpkg-gencontrol` writes a stub control file.
pub fn toolchain() -> FakeRunner<'static> {
    FakeRunner::new(answer)
}

fn answer(invocation: &Invocation) -> Result<CommandOutput> {
    let args = invocation.get_args();
    match invocation.program() {
        "perl" => Ok(CommandOutput::ok(
            b"Pre-Depends\nDepends\nRecommends\nSuggests\nEnhances\nBreaks\nConflicts\nProvides\nReplaces\n"
                .to_vec(),
        )),
        "dpkg-buildflags" => Ok(CommandOutput::ok(b"Feature: time64\nEnabled: yes\n".to_vec())),
        "file" => {
            let mut out = Vec::new();
            for arg in args.iter().filter(|a| a.starts_with('/')) {
                let name = Path::new(arg)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                out.extend_from_slice(arg.as_bytes());
                out.push(0);
                out.extend_from_slice(
                    format!("ELF 64-bit LSB, BuildID[sha1]={}, not stripped", hex::encode(name))
                        .as_bytes(),
                );
                out.push(0);
            }
            Ok(CommandOutput::ok(out))
        }
        "objcopy" if args.first().map(String::as_str) == Some("--only-keep-debug") => {
            fs::write(&args[3], b"debug info")?;
            Ok(CommandOutput::ok(Vec::new()))
        }
        "dpkg-gencontrol" => {
            let package = args
                .iter()
                .find_map(|a| a.strip_prefix("-DPackage="))
                .or_else(|| args.iter().find_map(|a| a.strip_prefix("-p")))
                .unwrap_or_default();
            let output = args
                .iter()
                .find_map(|a| a.strip_prefix("-O").map(PathBuf::from))
                .or_else(|| {
                    args.iter()
                        .find_map(|a| a.strip_prefix("-P"))
                        .map(|root| Path::new(root).join("DEBIAN/control"))
                });
            if let Some(output) = output {
                fs::write(output, format!("Package: {}\n", package))?;
            }
            Ok(CommandOutput::ok(Vec::new()))
        }
        _ => Ok(CommandOutput::ok(Vec::new())),
    }
}

/// A source package checkout with `debian/` metadata and staged trees
pub struct SourceTree {
    pub dir: TempDir,
}

impl SourceTree {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let debian = dir.path().join("debian");
        fs::create_dir_all(&debian).unwrap();
        fs::write(debian.join("control"), CONTROL).unwrap();
        fs::write(debian.join("changelog"), CHANGELOG).unwrap();
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> AssemblyConfig {
        AssemblyConfig::new().with_base_dir(self.path())
    }

    /// Write a staged file below `debian/tmp/<package>` and return the staging dir
    pub fn stage(&self, package: &str, vpath: &str, content: &[u8], mode: u32) -> PathBuf {
        let staging = self.path().join("debian/tmp").join(package);
        let real = staging.join(vpath.trim_start_matches('/'));
        fs::create_dir_all(real.parent().unwrap()).unwrap();
        fs::write(&real, content).unwrap();
        fs::set_permissions(&real, fs::Permissions::from_mode(mode)).unwrap();
        staging
    }

    /// Write a file below `debian/`
    pub fn debian_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path().join("debian").join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }
}
