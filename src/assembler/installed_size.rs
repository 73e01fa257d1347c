// src/assembler/installed_size.rs

//! `Installed-Size` computation, matching what dpkg-gencontrol would compute

use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::MetadataExt;

use crate::error::{Error, Result};
use crate::filesystem::{NodeKind, VfsTree};

fn kib(bytes: u64) -> u64 {
    bytes.div_ceil(1024)
}

/// Accumulates installed size over one or more trees
///
/// Hardlinks are counted once across every tree added to the same counter.
#[derive(Debug, Default)]
pub struct InstalledSizeCounter {
    hard_links: HashSet<(u64, u64)>,
    total_kib: u64,
}

impl InstalledSizeCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every node of `tree`, the root included
    pub fn add_tree(&mut self, tree: &VfsTree) -> Result<()> {
        let mut nodes = Vec::with_capacity(tree.len());
        tree.walk(|id, _, _| nodes.push(id));

        for id in nodes {
            let size = match tree.get_node(id).kind() {
                NodeKind::File {
                    fs_path: Some(fs_path),
                } => {
                    let meta = fs::symlink_metadata(fs_path).map_err(|e| {
                        Error::IoError(format!("stat {}: {}", fs_path.display(), e))
                    })?;
                    if meta.nlink() > 1 && !self.hard_links.insert((meta.dev(), meta.ino())) {
                        continue;
                    }
                    kib(meta.size())
                }
                NodeKind::Symlink { target } => kib(target.as_os_str().len() as u64),
                _ => 1,
            };
            self.total_kib += size;
        }
        Ok(())
    }

    /// Total in KiB
    pub fn total_kib(&self) -> u64 {
        self.total_kib
    }
}

/// Installed size of the given trees, in KiB
pub fn installed_size(trees: &[&VfsTree]) -> Result<u64> {
    let mut counter = InstalledSizeCounter::new();
    for tree in trees {
        counter.add_tree(tree)?;
    }
    Ok(counter.total_kib())
}
