// src/filesystem/vfs/tests.rs

use super::*;

#[test]
fn test_new_tree_has_root() {
    let tree = VfsTree::new();
    assert_eq!(tree.len(), 1);
    assert!(tree.is_empty());
    assert!(tree.exists("/"));
    assert!(tree.get_node(tree.root()).is_directory());
}

#[test]
fn test_mkdir_fails_without_parent() {
    let mut tree = VfsTree::new();

    let result = tree.mkdir("/usr/bin");
    assert!(result.is_err());
}

#[test]
fn test_mkdir_p_creates_parents() {
    let mut tree = VfsTree::new();

    tree.mkdir_p("/usr/local/bin").unwrap();

    assert!(tree.exists("/usr"));
    assert!(tree.exists("/usr/local"));
    assert!(tree.exists("/usr/local/bin"));
    // Idempotent for existing directories
    tree.mkdir_p("/usr/local").unwrap();
}

#[test]
fn test_add_file_records_backing_path() {
    let mut tree = VfsTree::new();
    tree.mkdir_p("/usr/bin").unwrap();

    let id = tree.add_file("/usr/bin/hello", "/build/hello", 0o755).unwrap();

    let node = tree.get_node(id);
    assert!(node.is_file());
    assert!(node.is_executable());
    assert_eq!(node.fs_path(), Some(Path::new("/build/hello")));
}

#[test]
fn test_add_symlink() {
    let mut tree = VfsTree::new();
    tree.mkdir_p("/usr/share/doc").unwrap();

    let id = tree.add_symlink("/usr/share/doc/foo-dbgsym", "foo").unwrap();

    let node = tree.get_node(id);
    assert!(node.is_symlink());
    assert_eq!(node.symlink_target(), Some(Path::new("foo")));
}

#[test]
fn test_duplicate_path_fails() {
    let mut tree = VfsTree::new();
    tree.mkdir("/etc").unwrap();

    assert!(matches!(tree.mkdir("/etc"), Err(Error::AlreadyExists(_))));
}

#[test]
fn test_get_path_and_normalize() {
    let mut tree = VfsTree::new();
    let id = tree.mkdir_p("usr/lib/").unwrap();

    assert_eq!(tree.get_path(id), PathBuf::from("/usr/lib"));
    assert_eq!(normalize_path(Path::new("./usr/lib")), PathBuf::from("/usr/lib"));
    assert_eq!(normalize_path(Path::new("/")), PathBuf::from("/"));
}

#[test]
fn test_walk_is_sorted() {
    let mut tree = VfsTree::new();
    tree.mkdir_p("/usr").unwrap();
    tree.add_virtual_file("/usr/zeta", 0o644).unwrap();
    tree.add_virtual_file("/usr/alpha", 0o644).unwrap();
    tree.mkdir("/usr/middle").unwrap();

    let mut visited = Vec::new();
    tree.walk(|_, _, path| visited.push(path.to_path_buf()));

    assert_eq!(
        visited,
        vec![
            PathBuf::from("/"),
            PathBuf::from("/usr"),
            PathBuf::from("/usr/alpha"),
            PathBuf::from("/usr/middle"),
            PathBuf::from("/usr/zeta"),
        ]
    );
}

#[test]
fn test_walk_pruned_skips_children() {
    let mut tree = VfsTree::new();
    tree.mkdir_p("/usr/lib/debug/.build-id/ab").unwrap();
    tree.add_virtual_file("/usr/lib/debug/.build-id/ab/cd.debug", 0o644)
        .unwrap();
    tree.add_virtual_file("/usr/lib/libfoo.so.1", 0o644).unwrap();

    let mut visited = Vec::new();
    tree.walk_pruned(|_, node, path| {
        visited.push(path.to_path_buf());
        node.name() != ".build-id"
    });

    assert!(visited.contains(&PathBuf::from("/usr/lib/debug/.build-id")));
    assert!(!visited.contains(&PathBuf::from("/usr/lib/debug/.build-id/ab")));
    assert!(visited.contains(&PathBuf::from("/usr/lib/libfoo.so.1")));
}

#[test]
fn test_frozen_tree_rejects_mutation() {
    let mut tree = VfsTree::new();
    tree.mkdir_p("/usr/bin").unwrap();
    tree.add_virtual_file("/usr/bin/tool", 0o755).unwrap();
    tree.freeze();

    assert!(matches!(tree.mkdir("/etc"), Err(Error::ReadOnlyTree(_))));
    assert!(matches!(
        tree.add_symlink("/usr/bin/alias", "tool"),
        Err(Error::ReadOnlyTree(_))
    ));
    assert!(matches!(
        tree.add_virtual_file("/usr/bin/other", 0o644),
        Err(Error::ReadOnlyTree(_))
    ));
    assert!(matches!(
        tree.detach("/usr/bin/tool", Path::new("/tmp")),
        Err(Error::ReadOnlyTree(_))
    ));
    // Existing directories are still resolvable
    assert!(tree.mkdir_p("/usr/bin").is_ok());
}

#[test]
fn test_detach_copies_content_and_keeps_basename() {
    let staging = tempfile::tempdir().unwrap();
    let workdir = tempfile::tempdir().unwrap();
    let original = staging.path().join("hello");
    fs::write(&original, b"original").unwrap();

    let mut tree = VfsTree::new();
    tree.mkdir_p("/usr/bin").unwrap();
    tree.add_file("/usr/bin/hello", &original, 0o755).unwrap();

    let detached = tree.detach("/usr/bin/hello", workdir.path()).unwrap();
    assert_eq!(detached, workdir.path().join("usr/bin/hello"));
    assert_eq!(detached.file_name(), original.file_name());

    fs::write(&detached, b"rewritten").unwrap();
    assert_eq!(fs::read(&original).unwrap(), b"original");
    assert_eq!(tree.get("/usr/bin/hello").unwrap().fs_path(), Some(detached.as_path()));

    // Second detach reuses the private copy
    let again = tree.detach("/usr/bin/hello", workdir.path()).unwrap();
    assert_eq!(again, detached);
    assert_eq!(fs::read(&again).unwrap(), b"rewritten");
}

#[test]
fn test_from_dir_mirrors_real_tree() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("usr/bin")).unwrap();
    fs::write(dir.path().join("usr/bin/tool"), b"#!/bin/sh\n").unwrap();
    fs::set_permissions(
        dir.path().join("usr/bin/tool"),
        fs::Permissions::from_mode(0o755),
    )
    .unwrap();
    std::os::unix::fs::symlink("tool", dir.path().join("usr/bin/alias")).unwrap();

    let tree = VfsTree::from_dir(dir.path()).unwrap();

    let tool = tree.get("/usr/bin/tool").unwrap();
    assert!(tool.is_file());
    assert_eq!(tool.permissions(), 0o755);
    assert_eq!(tool.fs_path(), Some(dir.path().join("usr/bin/tool").as_path()));
    let alias = tree.get("/usr/bin/alias").unwrap();
    assert_eq!(alias.symlink_target(), Some(Path::new("tool")));

    assert_eq!(tree.len(), 5);
    assert!(tree.has_regular_files());
}
