// src/filesystem/vfs.rs

//! Virtual package tree with arena allocation and O(1) path lookup
//!
//! Each binary package is staged as a `VfsTree`: an in-memory hierarchy whose
//! file nodes are optionally backed by a real file on disk. The tree is what
//! the assembly pipeline inspects and edits; the real files are only touched
//! through [`VfsTree::detach`], which clones the backing content into a
//! package-private directory before an external tool rewrites it in place.
//!
//! # Design
//!
//! - **Arena Allocation**: All nodes are stored in a contiguous Vec, referenced
//!   by `NodeId` indices.
//!
//! - **O(1) Path Lookup**: A HashMap maps absolute paths to node IDs.
//!
//! - **Deterministic Order**: Children are kept sorted by name, so walks visit
//!   paths in the same order on every run.
//!
//! - **Freezing**: Once cross-package processing starts every tree is frozen;
//!   any later mutation fails with [`Error::ReadOnlyTree`].

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// Index into the arena for referencing nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Type of VFS node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Directory node that can contain children
    Directory,
    /// Regular file, optionally backed by real content on disk
    File {
        /// Physical location of the content (None for an empty virtual file)
        fs_path: Option<PathBuf>,
    },
    /// Symbolic link pointing to a target path
    Symlink {
        /// Target path of the symlink
        target: PathBuf,
    },
}

/// A node in the VFS tree
#[derive(Debug)]
pub struct VfsNode {
    name: String,
    kind: NodeKind,
    parent: Option<NodeId>,
    /// Sorted by child name
    children: Vec<NodeId>,
    permissions: u32,
}

impl VfsNode {
    /// Get the node name
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the node kind
    #[inline]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Get the parent node ID
    #[inline]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Get children node IDs
    #[inline]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Get file permissions
    #[inline]
    pub fn permissions(&self) -> u32 {
        self.permissions
    }

    /// Check if this is a directory
    #[inline]
    pub fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Directory)
    }

    /// Check if this is a regular file
    #[inline]
    pub fn is_file(&self) -> bool {
        matches!(self.kind, NodeKind::File { .. })
    }

    /// Check if this is a symlink
    #[inline]
    pub fn is_symlink(&self) -> bool {
        matches!(self.kind, NodeKind::Symlink { .. })
    }

    /// Check if any execute bit is set
    #[inline]
    pub fn is_executable(&self) -> bool {
        self.permissions & 0o111 != 0
    }

    /// Physical backing path of a file node
    pub fn fs_path(&self) -> Option<&Path> {
        match &self.kind {
            NodeKind::File { fs_path } => fs_path.as_deref(),
            _ => None,
        }
    }

    /// Symlink target
    pub fn symlink_target(&self) -> Option<&Path> {
        match &self.kind {
            NodeKind::Symlink { target } => Some(target),
            _ => None,
        }
    }
}

/// Arena-allocated package tree with O(1) path lookup
///
/// # Example
///
/// ```ignore
/// use debasm::filesystem::VfsTree;
///
/// let mut tree = VfsTree::new();
/// tree.mkdir_p("/usr/bin")?;
/// tree.add_file("/usr/bin/hello", "/build/hello", 0o755)?;
///
/// let node = tree.get("/usr/bin/hello")?;
/// ```
#[derive(Debug)]
pub struct VfsTree {
    nodes: Vec<VfsNode>,
    path_index: HashMap<PathBuf, NodeId>,
    root: NodeId,
    read_only: bool,
}

impl Default for VfsTree {
    fn default() -> Self {
        Self::new()
    }
}

impl VfsTree {
    /// Create a new tree with an empty root directory
    pub fn new() -> Self {
        let root_node = VfsNode {
            name: String::new(),
            kind: NodeKind::Directory,
            parent: None,
            children: Vec::new(),
            permissions: 0o755,
        };

        let root_id = NodeId(0);
        let mut path_index = HashMap::new();
        path_index.insert(PathBuf::from("/"), root_id);

        Self {
            nodes: vec![root_node],
            path_index,
            root: root_id,
            read_only: false,
        }
    }

    /// Mirror a real directory into a new tree
    ///
    /// Regular files keep the real file as backing content; symlinks are
    /// recorded with their literal target and never followed.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut tree = Self::new();

        for entry in WalkDir::new(dir)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| Error::IoError(format!("walking {}: {}", dir.display(), e)))?;
            let rel = entry
                .path()
                .strip_prefix(dir)
                .map_err(|_| Error::InvalidPath(entry.path().display().to_string()))?;
            let vpath = Path::new("/").join(rel);
            let file_type = entry.file_type();

            if file_type.is_symlink() {
                let target = fs::read_link(entry.path())?;
                tree.add_symlink(&vpath, target)?;
                continue;
            }

            let mode = entry
                .metadata()
                .map_err(|e| Error::IoError(format!("stat {}: {}", entry.path().display(), e)))?
                .permissions()
                .mode()
                & 0o7777;

            if file_type.is_dir() {
                tree.mkdir_with_permissions(&vpath, mode)?;
            } else if file_type.is_file() {
                tree.add_file(&vpath, entry.path(), mode)?;
            } else {
                debug!("Ignoring special file {}", entry.path().display());
            }
        }

        Ok(tree)
    }

    /// Get the root node ID
    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Get the total number of nodes in the tree
    #[inline]
    pub fn len(&self) -> usize {
        self.path_index.len()
    }

    /// Check if the tree is empty (only root exists)
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.path_index.len() == 1
    }

    /// Make the tree read-only
    pub fn freeze(&mut self) {
        self.read_only = true;
    }

    /// Get a node by ID
    ///
    /// # Panics
    ///
    /// Panics if the NodeId is invalid (out of bounds).
    #[inline]
    pub fn get_node(&self, id: NodeId) -> &VfsNode {
        &self.nodes[id.0]
    }

    #[inline]
    fn get_node_mut(&mut self, id: NodeId) -> &mut VfsNode {
        &mut self.nodes[id.0]
    }

    /// Look up a node by path
    #[inline]
    pub fn lookup(&self, path: impl AsRef<Path>) -> Option<NodeId> {
        self.path_index.get(&normalize_path(path.as_ref())).copied()
    }

    /// Get a node by path, failing if it does not exist
    pub fn get(&self, path: impl AsRef<Path>) -> Result<&VfsNode> {
        let path = path.as_ref();
        self.lookup(path)
            .map(|id| self.get_node(id))
            .ok_or_else(|| Error::NotFound(format!("path not found: {}", path.display())))
    }

    /// Check if a path exists
    #[inline]
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.lookup(path).is_some()
    }

    /// Get the full path of a node by traversing up to root
    pub fn get_path(&self, id: NodeId) -> PathBuf {
        let mut components = Vec::new();
        let mut current = id;

        while let Some(parent) = self.get_node(current).parent {
            components.push(self.get_node(current).name.as_str());
            current = parent;
        }

        let mut path = PathBuf::from("/");
        for component in components.into_iter().rev() {
            path.push(component);
        }
        path
    }

    fn ensure_writable(&self, path: &Path) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnlyTree(path.to_path_buf()));
        }
        Ok(())
    }

    /// Create a directory at the given path
    ///
    /// Parent directories must already exist. Use `mkdir_p` for recursive creation.
    pub fn mkdir(&mut self, path: impl AsRef<Path>) -> Result<NodeId> {
        self.mkdir_with_permissions(path, 0o755)
    }

    /// Create a directory with specific permissions
    pub fn mkdir_with_permissions(
        &mut self,
        path: impl AsRef<Path>,
        permissions: u32,
    ) -> Result<NodeId> {
        self.insert_node(path.as_ref(), NodeKind::Directory, permissions)
    }

    /// Create a directory and all parent directories as needed
    pub fn mkdir_p(&mut self, path: impl AsRef<Path>) -> Result<NodeId> {
        let path = normalize_path(path.as_ref());

        if let Some(id) = self.path_index.get(&path).copied() {
            if self.get_node(id).is_directory() {
                return Ok(id);
            }
            return Err(Error::InvalidPath(format!(
                "path exists but is not a directory: {}",
                path.display()
            )));
        }
        self.ensure_writable(&path)?;

        let mut to_create = Vec::new();
        let mut current = path.as_path();
        while !self.path_index.contains_key(current) {
            to_create.push(current.to_path_buf());
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }

        let mut last_id = self.root;
        for dir_path in to_create.into_iter().rev() {
            last_id = self.mkdir(&dir_path)?;
        }
        Ok(last_id)
    }

    /// Add a regular file backed by real content
    pub fn add_file(
        &mut self,
        path: impl AsRef<Path>,
        fs_path: impl AsRef<Path>,
        permissions: u32,
    ) -> Result<NodeId> {
        let kind = NodeKind::File {
            fs_path: Some(fs_path.as_ref().to_path_buf()),
        };
        self.insert_node(path.as_ref(), kind, permissions)
    }

    /// Add an empty virtual file with no backing content
    pub fn add_virtual_file(&mut self, path: impl AsRef<Path>, permissions: u32) -> Result<NodeId> {
        self.insert_node(path.as_ref(), NodeKind::File { fs_path: None }, permissions)
    }

    /// Add a symlink to the tree
    pub fn add_symlink(
        &mut self,
        path: impl AsRef<Path>,
        target: impl AsRef<Path>,
    ) -> Result<NodeId> {
        let kind = NodeKind::Symlink {
            target: target.as_ref().to_path_buf(),
        };
        self.insert_node(path.as_ref(), kind, 0o777)
    }

    fn insert_node(&mut self, path: &Path, kind: NodeKind, permissions: u32) -> Result<NodeId> {
        let path = normalize_path(path);
        self.ensure_writable(&path)?;

        if self.path_index.contains_key(&path) {
            return Err(Error::AlreadyExists(format!(
                "path already exists: {}",
                path.display()
            )));
        }

        let parent_path = path
            .parent()
            .ok_or_else(|| Error::InvalidPath("cannot create root".into()))?;

        let parent_id = self.path_index.get(parent_path).copied().ok_or_else(|| {
            Error::NotFound(format!("parent directory not found: {}", parent_path.display()))
        })?;

        if !self.get_node(parent_id).is_directory() {
            return Err(Error::InvalidPath(format!(
                "parent is not a directory: {}",
                parent_path.display()
            )));
        }

        let name = path
            .file_name()
            .ok_or_else(|| Error::InvalidPath(format!("invalid path: {}", path.display())))?
            .to_string_lossy()
            .to_string();

        let node_id = NodeId(self.nodes.len());
        self.nodes.push(VfsNode {
            name,
            kind,
            parent: Some(parent_id),
            children: Vec::new(),
            permissions,
        });

        let slot = {
            let nodes = &self.nodes;
            let new_name = nodes[node_id.0].name.as_str();
            nodes[parent_id.0]
                .children
                .partition_point(|&c| nodes[c.0].name.as_str() < new_name)
        };
        self.get_node_mut(parent_id).children.insert(slot, node_id);
        self.path_index.insert(path, node_id);

        Ok(node_id)
    }

    /// Give a file node its own copy of the backing content
    ///
    /// The content is copied to `<workdir>/<virtual path>`, so the physical
    /// basename always matches the installed one. Returns the new physical
    /// path. Detaching a file that already lives under `workdir` is a no-op.
    pub fn detach(&mut self, path: impl AsRef<Path>, workdir: &Path) -> Result<PathBuf> {
        let path = normalize_path(path.as_ref());
        self.ensure_writable(&path)?;

        let id = self
            .path_index
            .get(&path)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("path not found: {}", path.display())))?;
        let permissions = self.get_node(id).permissions;
        let current = match self.get_node(id).kind() {
            NodeKind::File { fs_path } => fs_path.clone(),
            _ => {
                return Err(Error::InvalidPath(format!(
                    "only regular files can be detached: {}",
                    path.display()
                )));
            }
        };

        if let Some(current) = &current
            && current.starts_with(workdir)
        {
            return Ok(current.clone());
        }

        let rel = path
            .strip_prefix("/")
            .map_err(|_| Error::InvalidPath(path.display().to_string()))?;
        let target = workdir.join(rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        match &current {
            Some(src) => {
                fs::copy(src, &target).map_err(|e| {
                    Error::IoError(format!("copy {} -> {}: {}", src.display(), target.display(), e))
                })?;
            }
            None => fs::write(&target, b"")?,
        }
        fs::set_permissions(&target, fs::Permissions::from_mode(permissions | 0o200))?;
        debug!("Detached {} into {}", path.display(), target.display());

        self.get_node_mut(id).kind = NodeKind::File {
            fs_path: Some(target.clone()),
        };
        Ok(target)
    }

    /// Get children of a directory as an iterator of (name, NodeId) pairs
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = (&str, NodeId)> {
        self.get_node(id)
            .children
            .iter()
            .map(|&child_id| (self.get_node(child_id).name.as_str(), child_id))
    }

    /// Walk the tree depth-first in sorted order, calling the visitor for each node
    pub fn walk<F>(&self, mut visitor: F)
    where
        F: FnMut(NodeId, &VfsNode, &Path),
    {
        self.walk_pruned(|id, node, path| {
            visitor(id, node, path);
            true
        });
    }

    /// Walk the tree depth-first; returning `false` skips the node's children
    pub fn walk_pruned<F>(&self, mut visitor: F)
    where
        F: FnMut(NodeId, &VfsNode, &Path) -> bool,
    {
        let root_path = PathBuf::from("/");
        self.walk_recursive(self.root, &root_path, &mut visitor);
    }

    fn walk_recursive<F>(&self, id: NodeId, current_path: &Path, visitor: &mut F)
    where
        F: FnMut(NodeId, &VfsNode, &Path) -> bool,
    {
        let node = self.get_node(id);
        if !visitor(id, node, current_path) {
            return;
        }

        for &child_id in &node.children {
            let child = self.get_node(child_id);
            let child_path = current_path.join(&child.name);
            self.walk_recursive(child_id, &child_path, visitor);
        }
    }

    /// All regular files as (virtual path, node) pairs, in walk order
    pub fn files(&self) -> Vec<(PathBuf, NodeId)> {
        let mut files = Vec::new();
        self.walk(|id, node, path| {
            if node.is_file() {
                files.push((path.to_path_buf(), id));
            }
        });
        files
    }

    /// Whether the tree holds at least one regular file
    pub fn has_regular_files(&self) -> bool {
        self.path_index
            .values()
            .any(|&id| self.get_node(id).is_file())
    }
}

/// Normalize a path to ensure it starts with / and has no trailing slashes
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    let trimmed = path_str.trim_start_matches("./");

    let normalized = if !trimmed.starts_with('/') {
        format!("/{}", trimmed)
    } else {
        trimmed.to_string()
    };

    let normalized = if normalized.len() > 1 && normalized.ends_with('/') {
        normalized.trim_end_matches('/').to_string()
    } else {
        normalized
    };

    PathBuf::from(normalized)
}

#[cfg(test)]
mod tests;
