// src/assembler/md5sums.rs

//! `DEBIAN/md5sums` generation

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use tracing::debug;

use crate::error::{Error, Result};
use crate::filesystem::{NodeKind, VfsTree};

fn md5_reader<R: Read>(reader: &mut R) -> io::Result<String> {
    let mut hasher = Md5::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Paths listed in `DEBIAN/conffiles`; only absolute entries count
fn read_conffiles(control_dir: &Path) -> Result<HashSet<String>> {
    let path = control_dir.join("conffiles");
    match fs::read_to_string(&path) {
        Ok(text) => Ok(text
            .lines()
            .filter(|l| l.starts_with('/'))
            .map(str::to_string)
            .collect()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(HashSet::new()),
        Err(e) => Err(Error::IoError(format!("reading {}: {}", path.display(), e))),
    }
}

/// Write `md5sums` into `control_dir` for every regular file of `tree`
///
/// Conffiles are left out. Entries are sorted by path string, the way
/// `dh_md5sums` sorts them. No file is left behind when nothing qualifies.
pub fn generate_md5sums(control_dir: &Path, tree: &VfsTree) -> Result<()> {
    let exclude = read_conffiles(control_dir)?;
    let mut files: Vec<(String, Option<PathBuf>)> = Vec::new();
    tree.walk(|_, node, path| {
        if let NodeKind::File { fs_path } = node.kind() {
            let path = path.to_string_lossy().into_owned();
            if !exclude.contains(&path) {
                files.push((path, fs_path.clone()));
            }
        }
    });
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let md5sums = control_dir.join("md5sums");
    if files.is_empty() {
        if md5sums.exists() {
            fs::remove_file(&md5sums)?;
        }
        return Ok(());
    }

    let mut out = String::new();
    for (path, fs_path) in &files {
        let digest = match fs_path {
            Some(fs_path) => {
                let mut file = File::open(fs_path)
                    .map_err(|e| Error::IoError(format!("opening {}: {}", fs_path.display(), e)))?;
                md5_reader(&mut file)?
            }
            None => md5_reader(&mut io::empty())?,
        };
        out.push_str(&format!("{}  {}\n", digest, path.trim_start_matches('/')));
    }
    fs::write(&md5sums, out)?;
    debug!("Wrote {} md5sums entries to {}", files.len(), md5sums.display());
    Ok(())
}
