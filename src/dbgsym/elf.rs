// src/dbgsym/elf.rs

//! ELF and static archive candidate discovery
//!
//! Only the file header is inspected; everything else about the binaries is
//! left to `file`, `objcopy` and `strip`.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use goblin::elf::Elf;
use goblin::elf::header::{EI_CLASS, ELFCLASS32, ELFCLASS64, ET_DYN, ET_EXEC, EV_CURRENT};

use crate::error::{Error, Result};
use crate::filesystem::VfsTree;

pub const ELF_MAGIC: &[u8; 4] = b"\x7fELF";

const AR_MAGIC: &[u8; 8] = b"!<arch>\n";
const AR_THIN_MAGIC: &[u8; 8] = b"!<thin>\n";

/// Bytes after the archive magic searched for binary content
const AR_SCAN_LEN: usize = 1024 * 1024;

/// Files shorter than this cannot hold a useful binary of the class
const ELF_MIN_SIZE32: usize = 136;
const ELF_MIN_SIZE64: usize = 232;

/// A file in the package tree that may need debug processing
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Installed path inside the package
    pub path: PathBuf,
    /// Current physical content
    pub fs_path: PathBuf,
    pub executable: bool,
}

fn read_prefix(path: &Path, len: usize) -> Result<Vec<u8>> {
    let file = File::open(path)
        .map_err(|e| Error::IoError(format!("opening {}: {}", path.display(), e)))?;
    let mut buffer = Vec::with_capacity(len);
    file.take(len as u64)
        .read_to_end(&mut buffer)
        .map_err(|e| Error::IoError(format!("reading {}: {}", path.display(), e)))?;
    Ok(buffer)
}

/// Whether a header is an ELF executable or shared object
pub fn is_elf_header(header: &[u8]) -> bool {
    let min_size = match header.get(EI_CLASS) {
        Some(&ELFCLASS32) => ELF_MIN_SIZE32,
        Some(&ELFCLASS64) => ELF_MIN_SIZE64,
        _ => return false,
    };
    if header.len() < min_size {
        return false;
    }
    match Elf::parse_header(header) {
        Ok(parsed) => {
            parsed.e_version == u32::from(EV_CURRENT) && matches!(parsed.e_type, ET_EXEC | ET_DYN)
        }
        Err(_) => false,
    }
}

pub fn is_elf_file(path: &Path) -> Result<bool> {
    Ok(is_elf_header(&read_prefix(path, 4096)?))
}

/// An `ar` archive whose members look like compiled objects
pub fn is_static_library(path: &Path) -> Result<bool> {
    let content = read_prefix(path, AR_MAGIC.len() + AR_SCAN_LEN)?;
    if content.len() < AR_MAGIC.len() {
        return Ok(false);
    }
    let (magic, data) = content.split_at(AR_MAGIC.len());
    if magic != AR_MAGIC && magic != AR_THIN_MAGIC {
        return Ok(false);
    }
    Ok(data.contains(&0) || data.windows(ELF_MAGIC.len()).any(|w| w == ELF_MAGIC))
}

/// Files that must never be stripped because of where they live
fn is_exempt(dir: &Path, name: &str) -> bool {
    let dir = format!("{}/", dir.display());
    (name.ends_with(".so") && dir.contains("debug/"))
        || (name.ends_with(".go") && dir.contains("/guile/"))
}

/// Every backed file outside `.build-id` caches and stripping exemptions
fn walk_candidates(tree: &VfsTree) -> Vec<Candidate> {
    let mut found = Vec::new();
    tree.walk_pruned(|_, node, path| {
        if node.is_directory() {
            let under_debug = path
                .parent()
                .and_then(Path::file_name)
                .is_some_and(|n| n == "debug");
            return !(node.name() == ".build-id" && under_debug);
        }
        let Some(fs_path) = node.fs_path() else {
            return false;
        };
        if !node.is_file() {
            return false;
        }
        let dir = path.parent().unwrap_or(Path::new("/"));
        if !is_exempt(dir, node.name()) {
            found.push(Candidate {
                path: path.to_path_buf(),
                fs_path: fs_path.to_path_buf(),
                executable: node.is_executable(),
            });
        }
        false
    });
    found
}

/// ELF executables and shared objects in the package
pub fn find_elf_files(tree: &VfsTree) -> Result<Vec<Candidate>> {
    let mut elf_files = Vec::new();
    for candidate in walk_candidates(tree) {
        if is_elf_file(&candidate.fs_path)? {
            elf_files.push(candidate);
        }
    }
    Ok(elf_files)
}

/// Static libraries in the package, skipping `lib*_g.a` debug builds
pub fn find_static_libraries(tree: &VfsTree) -> Result<Vec<Candidate>> {
    let mut libs = Vec::new();
    for candidate in walk_candidates(tree) {
        let name = candidate
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if name.starts_with("lib") && name.ends_with("_g.a") {
            continue;
        }
        if is_static_library(&candidate.fs_path)? {
            libs.push(candidate);
        }
    }
    Ok(libs)
}

/// Minimal little-endian ELF64 header for tests
#[cfg(test)]
pub(crate) fn fake_elf(e_type: u16) -> Vec<u8> {
    let mut header = vec![0u8; ELF_MIN_SIZE64];
    header[..4].copy_from_slice(ELF_MAGIC);
    header[4] = 2;
    header[5] = 1;
    header[6] = 1;
    header[16..18].copy_from_slice(&e_type.to_le_bytes());
    header[20..24].copy_from_slice(&u32::from(EV_CURRENT).to_le_bytes());
    header
}
