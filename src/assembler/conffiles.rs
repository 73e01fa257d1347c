// src/assembler/conffiles.rs

//! `DEBIAN/conffiles`: every regular file under `/etc` is a conffile

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tracing::debug;

use crate::error::Result;
use crate::filesystem::VfsTree;

/// Append the regular files below `/etc` to `control_dir/conffiles`
///
/// Entries already present in the file (from a maintainer-provided
/// conffiles) are kept as they are.
pub fn generate_conffiles(control_dir: &Path, tree: &VfsTree) -> Result<()> {
    let path = control_dir.join("conffiles");
    let etc = Path::new("/etc");
    let entries: Vec<String> = tree
        .files()
        .into_iter()
        .filter(|(p, _)| p.starts_with(etc) && p != etc)
        .map(|(p, _)| p.to_string_lossy().into_owned())
        .collect();

    if !entries.is_empty() {
        let existing = fs::read_to_string(&path).unwrap_or_default();
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        for entry in &entries {
            if existing.lines().any(|l| l == entry) {
                continue;
            }
            writeln!(file, "{}", entry)?;
        }
        debug!("Registered {} conffiles in {}", entries.len(), path.display());
    }
    if path.is_file() {
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644))?;
    }
    Ok(())
}
