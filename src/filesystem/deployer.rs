// src/filesystem/deployer.rs

//! Writing a package tree onto disk
//!
//! Deploys every node of a [`VfsTree`] below a root directory, hardlinking
//! backed files where possible and falling back to copying (cross-device,
//! etc). The result is the directory `dpkg-deb` packs.

use crate::error::{Error, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use super::{NodeKind, VfsTree};

/// Counts of what a deployment wrote
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeployStats {
    pub directories: usize,
    pub files: usize,
    pub symlinks: usize,
    /// Files that had to be copied instead of hardlinked
    pub copied: usize,
}

/// Deploys trees below a root directory
pub struct TreeDeployer {
    root: PathBuf,
}

impl TreeDeployer {
    /// Create a deployer, creating the root if needed
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            fs::create_dir_all(&root)?;
            debug!("Created deployment root: {:?}", root);
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Compute a target path that cannot escape the root
    fn safe_target_path(&self, path: &Path) -> Result<PathBuf> {
        let mut normalized = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Normal(c) => normalized.push(c),
                Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
                Component::ParentDir => {
                    warn!("Path traversal attempt detected: {}", path.display());
                    return Err(Error::InvalidPath(format!(
                        "path traversal detected: {}",
                        path.display()
                    )));
                }
            }
        }

        let target = self.root.join(&normalized);
        if !target.starts_with(&self.root) {
            return Err(Error::InvalidPath(format!(
                "path escapes deployment root: {}",
                path.display()
            )));
        }
        Ok(target)
    }

    /// Create a directory with the given mode
    pub fn deploy_directory(&self, path: &Path, permissions: u32) -> Result<()> {
        let target = self.safe_target_path(path)?;
        fs::create_dir_all(&target)?;
        fs::set_permissions(&target, fs::Permissions::from_mode(permissions))?;
        Ok(())
    }

    /// Deploy a file; `source` of `None` creates an empty file
    ///
    /// Returns whether the content had to be copied.
    pub fn deploy_file(&self, path: &Path, source: Option<&Path>, permissions: u32) -> Result<bool> {
        let target = self.safe_target_path(path)?;
        if target == self.root {
            return Err(Error::InvalidPath("cannot deploy a file as the root".into()));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        if source == Some(target.as_path()) {
            fs::set_permissions(&target, fs::Permissions::from_mode(permissions))?;
            return Ok(false);
        }

        // Hardlinking requires the target not to exist
        if target.symlink_metadata().is_ok() {
            fs::remove_file(&target)?;
        }

        let copied = match source {
            Some(source) => {
                if fs::hard_link(source, &target).is_ok() {
                    false
                } else {
                    debug!("Hardlink failed for {}, falling back to copy", path.display());
                    fs::copy(source, &target).map_err(|e| {
                        Error::IoError(format!(
                            "copy {} -> {}: {}",
                            source.display(),
                            target.display(),
                            e
                        ))
                    })?;
                    true
                }
            }
            None => {
                fs::write(&target, b"")?;
                true
            }
        };

        fs::set_permissions(&target, fs::Permissions::from_mode(permissions))?;
        Ok(copied)
    }

    /// Deploy a symlink, replacing any file already there
    pub fn deploy_symlink(&self, path: &Path, link_target: &Path) -> Result<()> {
        let link_path = self.safe_target_path(path)?;
        if let Some(parent) = link_path.parent() {
            fs::create_dir_all(parent)?;
        }

        if let Ok(meta) = link_path.symlink_metadata() {
            if meta.is_dir() {
                return Err(Error::AlreadyExists(format!(
                    "directory in place of symlink {}",
                    path.display()
                )));
            }
            fs::remove_file(&link_path)?;
        }
        std::os::unix::fs::symlink(link_target, &link_path)?;
        Ok(())
    }

    /// Deploy every node of the tree
    pub fn deploy_tree(&self, tree: &VfsTree) -> Result<DeployStats> {
        let mut nodes = Vec::with_capacity(tree.len());
        tree.walk(|id, _, path| nodes.push((id, path.to_path_buf())));

        let mut stats = DeployStats::default();
        for (id, path) in nodes {
            let node = tree.get_node(id);
            match node.kind() {
                NodeKind::Directory => {
                    self.deploy_directory(&path, node.permissions())?;
                    stats.directories += 1;
                }
                NodeKind::File { fs_path } => {
                    if self.deploy_file(&path, fs_path.as_deref(), node.permissions())? {
                        stats.copied += 1;
                    }
                    stats.files += 1;
                }
                NodeKind::Symlink { target } => {
                    self.deploy_symlink(&path, target)?;
                    stats.symlinks += 1;
                }
            }
        }

        info!(
            "Deployed {} files, {} symlinks and {} directories into {}",
            stats.files,
            stats.symlinks,
            stats.directories,
            self.root.display()
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;
    use tempfile::TempDir;

    fn staged_tree(staging: &Path) -> VfsTree {
        let real = staging.join("hello");
        fs::write(&real, b"hello").unwrap();

        let mut tree = VfsTree::new();
        tree.mkdir_p("/usr/bin").unwrap();
        tree.add_file("/usr/bin/hello", &real, 0o755).unwrap();
        tree.mkdir_p("/usr/share/doc/hello").unwrap();
        tree.add_virtual_file("/usr/share/doc/hello/empty", 0o644)
            .unwrap();
        tree.add_symlink("/usr/bin/hi", "hello").unwrap();
        tree
    }

    #[test]
    fn test_deploy_tree() {
        let staging = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let tree = staged_tree(staging.path());

        let deployer = TreeDeployer::new(out.path().join("root")).unwrap();
        let stats = deployer.deploy_tree(&tree).unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(stats.symlinks, 1);

        let hello = deployer.root().join("usr/bin/hello");
        assert_eq!(fs::read(&hello).unwrap(), b"hello");
        assert_eq!(fs::metadata(&hello).unwrap().mode() & 0o777, 0o755);
        assert_eq!(
            fs::read_link(deployer.root().join("usr/bin/hi")).unwrap(),
            PathBuf::from("hello")
        );
        assert!(deployer.root().join("usr/share/doc/hello/empty").exists());
    }

    #[test]
    fn test_deploy_uses_hardlinks() {
        let dir = TempDir::new().unwrap();
        let tree = staged_tree(dir.path());

        let deployer = TreeDeployer::new(dir.path().join("root")).unwrap();
        deployer.deploy_tree(&tree).unwrap();
        // Redeploying over an existing tree is fine
        deployer.deploy_tree(&tree).unwrap();

        let source = fs::metadata(dir.path().join("hello")).unwrap();
        let target = fs::metadata(deployer.root().join("usr/bin/hello")).unwrap();
        assert_eq!(source.ino(), target.ino());
    }

    #[test]
    fn test_path_traversal_rejected() {
        let dir = TempDir::new().unwrap();
        let deployer = TreeDeployer::new(dir.path()).unwrap();
        assert!(deployer
            .deploy_symlink(Path::new("../../etc/passwd"), Path::new("/x"))
            .is_err());
        assert!(deployer
            .deploy_file(Path::new("/usr/../../x"), None, 0o644)
            .is_err());
    }
}
