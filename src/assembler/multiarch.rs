// src/assembler/multiarch.rs

//! `Multi-Arch: same` auto-detection
//!
//! A package qualifies when everything it ships lives in an
//! architecture-qualified library or include directory, apart from a few
//! architecture-neutral documentation files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;
use crate::filesystem::VfsTree;
use crate::package::{ALL_CONTROL_SCRIPTS, BinaryPackage};

/// Documentation files that may accompany a `Multi-Arch: same` package
fn doc_basenames(arch: &str) -> [String; 8] {
    [
        "copyright".to_string(),
        "changelog.gz".to_string(),
        "changelog.Debian.gz".to_string(),
        format!("changelog.Debian.{}.gz", arch),
        "NEWS.Debian".to_string(),
        "NEWS.Debian.gz".to_string(),
        "README.Debian".to_string(),
        "README.Debian.gz".to_string(),
    ]
}

/// Propose a `Multi-Arch` value for a package without one
///
/// Returns `None` for `Architecture: all` packages, for packages with any
/// maintainer script in `control_dir`, and whenever a shipped path is not
/// architecture-qualified.
pub fn detect_multi_arch(
    package: &BinaryPackage,
    control_dir: &Path,
    tree: &VfsTree,
) -> Result<Option<&'static str>> {
    let arch = package.resolved_architecture()?;
    if arch == "all" {
        return Ok(None);
    }
    if let Some(script) = ALL_CONTROL_SCRIPTS
        .iter()
        .find(|script| control_dir.join(script).is_file())
    {
        debug!(
            "{} has a {} script; not proposing Multi-Arch",
            package.name(),
            script
        );
        return Ok(None);
    }

    let multiarch = package.deb_multiarch()?;
    let no_descend: HashSet<PathBuf> = [
        format!("/usr/lib/{}", multiarch),
        format!("/usr/include/{}", multiarch),
    ]
    .into_iter()
    .map(PathBuf::from)
    .collect();
    let doc_dir = Path::new("/usr/share/doc").join(package.name());
    let files: HashSet<PathBuf> = doc_basenames(arch)
        .iter()
        .map(|name| doc_dir.join(name))
        .collect();
    let intermediate: HashSet<PathBuf> = no_descend
        .iter()
        .chain(files.iter())
        .flat_map(|p| p.ancestors().skip(1).map(Path::to_path_buf))
        .collect();

    let mut offending: Option<PathBuf> = None;
    tree.walk_pruned(|_, _, path| {
        if offending.is_some() || no_descend.contains(path) {
            return false;
        }
        if !intermediate.contains(path) && !files.contains(path) {
            offending = Some(path.to_path_buf());
            return false;
        }
        true
    });

    match offending {
        Some(path) => {
            debug!(
                "{} ships {}; not proposing Multi-Arch",
                package.name(),
                path.display()
            );
            Ok(None)
        }
        None => Ok(Some("same")),
    }
}
