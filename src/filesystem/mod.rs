// src/filesystem/mod.rs

//! Package filesystem handling
//!
//! This module provides:
//! - Virtual package tree (VFS) describing the staged content of one binary package
//! - Copy-on-write detaching of backing files before in-place tool rewrites
//! - Deployment of a finished tree into the directory `dpkg-deb` packs

pub mod deployer;
pub mod vfs;

pub use deployer::{DeployStats, TreeDeployer};
pub use vfs::{NodeId, NodeKind, VfsNode, VfsTree};
