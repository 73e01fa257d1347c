// src/dbgsym/mod.rs

//! ELF debug information extraction into dbgsym packages
//!
//! For every unstripped ELF binary in a package this module:
//! - optionally deduplicates DWARF data across binaries with `dwz`
//! - writes one debug file per build-id under `/usr/lib/debug/.build-id/`
//! - strips the binary and attaches a `.gnu_debuglink` back to the debug file
//!
//! Static libraries are stripped of debug sections first. All binaries are
//! detached from their staging content before any tool rewrites them.

pub mod elf;
pub mod probe;
pub mod strip;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::filesystem::VfsTree;
use crate::package::BinaryPackage;
use crate::process::{CommandRunner, Invocation};

pub use elf::Candidate;
pub use probe::{BuildIdProbe, ProbeVerdict, build_id_debug_path};
pub use strip::StaticLibraryStripper;

/// One ELF binary under debug processing
#[derive(Debug, Clone)]
pub struct ElfBinaryRecord {
    /// Installed path
    pub path: PathBuf,
    /// Detached physical path
    pub fs_path: PathBuf,
    pub executable: bool,
    pub stripped: bool,
    pub build_id: Option<String>,
    /// Installed path of the debug file inside the dbgsym tree
    pub debug_file: Option<PathBuf>,
}

/// The debug-symbol companion of a binary package
#[derive(Debug, Default)]
pub struct DbgsymArtifact {
    /// Content of the `<pkg>-dbgsym` package
    pub tree: VfsTree,
    /// Sorted, unique build-ids of the stripped binaries
    pub build_ids: Vec<String>,
}

impl DbgsymArtifact {
    pub fn new() -> Self {
        Self::default()
    }

    /// A dbgsym package is only built when it would ship at least one file
    pub fn has_content(&self) -> bool {
        self.tree.has_regular_files()
    }

    /// Build-ids formatted for the `Build-Ids` field
    pub fn build_ids_field(&self) -> String {
        self.build_ids.join(" ")
    }
}

/// Splits debug information out of a package's ELF binaries
pub struct DebugInfoExtractor<'a> {
    runner: &'a dyn CommandRunner,
    /// Package-private directory for detached binaries and dwz multifiles
    workdir: PathBuf,
    /// Shared directory where debug files are materialized
    dbgsym_store: PathBuf,
    no_sandbox: bool,
    arg_max: Option<usize>,
}

impl<'a> DebugInfoExtractor<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        workdir: impl Into<PathBuf>,
        dbgsym_store: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            workdir: workdir.into(),
            dbgsym_store: dbgsym_store.into(),
            no_sandbox: false,
            arg_max: None,
        }
    }

    /// Pass `--no-sandbox` to `file` (required under fakeroot)
    pub fn with_no_sandbox(mut self, no_sandbox: bool) -> Self {
        self.no_sandbox = no_sandbox;
        self
    }

    pub fn with_arg_max(mut self, arg_max: Option<usize>) -> Self {
        self.arg_max = arg_max;
        self
    }

    fn detach_dir(&self) -> PathBuf {
        self.workdir.join("root")
    }

    /// Process the package tree and return its dbgsym companion
    pub fn extract(&self, package: &BinaryPackage, tree: &mut VfsTree) -> Result<DbgsymArtifact> {
        let mut artifact = DbgsymArtifact::new();
        fs::create_dir_all(&self.workdir)?;

        self.strip_static_libraries(package, tree)?;

        let mut records = self.collect_elf_records(tree)?;
        if records.is_empty() {
            debug!("No ELF binaries in {}", package.name());
            return Ok(artifact);
        }

        let objcopy = package.cross_command("objcopy")?;
        let strip = package.cross_command("strip")?;

        let unstripped: Vec<usize> = (0..records.len())
            .filter(|&i| !records[i].stripped)
            .collect();
        for &i in &unstripped {
            if records[i].build_id.is_none() {
                return Err(Error::PolicyConflict(format!(
                    "The ELF binary {} is not stripped but has no build-id; \
                     cannot place its debug information",
                    records[i].path.display()
                )));
            }
        }

        let unstripped_paths: Vec<PathBuf> =
            unstripped.iter().map(|&i| records[i].fs_path.clone()).collect();
        self.run_dwz(package, &mut artifact, &unstripped_paths)?;

        for &i in &unstripped {
            let debug_file = self.make_debug_file(&objcopy, package, &records[i], &mut artifact)?;
            records[i].debug_file = Some(debug_file);
        }

        // Already stripped binaries are stripped again, like dh_strip does
        let (executables, libraries): (Vec<&ElfBinaryRecord>, Vec<&ElfBinaryRecord>) =
            records.iter().partition(|r| r.executable);
        let executables: Vec<PathBuf> = executables.iter().map(|r| r.fs_path.clone()).collect();
        let libraries: Vec<PathBuf> = libraries.iter().map(|r| r.fs_path.clone()).collect();
        strip::strip_files(self.runner, &strip, &strip::EXECUTABLE_FLAGS, &executables, self.arg_max)?;
        strip::strip_files(self.runner, &strip, &strip::LIBRARY_FLAGS, &libraries, self.arg_max)?;

        for &i in &unstripped {
            self.attach_debug(&objcopy, &records[i], &artifact)?;
        }

        let mut build_ids: Vec<String> = unstripped
            .iter()
            .filter_map(|&i| records[i].build_id.clone())
            .collect();
        build_ids.sort();
        build_ids.dedup();
        artifact.build_ids = build_ids;

        artifact.tree.mkdir_p("/usr/share/doc")?;
        let doc_link = format!("/usr/share/doc/{}-dbgsym", package.name());
        if !artifact.tree.exists(&doc_link) {
            artifact.tree.add_symlink(&doc_link, package.name())?;
        }

        info!(
            "Extracted debug information for {} binaries of {}",
            unstripped.len(),
            package.name()
        );
        Ok(artifact)
    }

    fn strip_static_libraries(&self, package: &BinaryPackage, tree: &mut VfsTree) -> Result<()> {
        let libs = elf::find_static_libraries(tree)?;
        if libs.is_empty() {
            return Ok(());
        }
        let mut detached = Vec::with_capacity(libs.len());
        for lib in &libs {
            detached.push(tree.detach(&lib.path, &self.detach_dir())?);
        }
        StaticLibraryStripper::new(package.cross_command("strip")?)
            .with_arg_max(self.arg_max)
            .strip(self.runner, &detached)
    }

    fn collect_elf_records(&self, tree: &mut VfsTree) -> Result<Vec<ElfBinaryRecord>> {
        let candidates = elf::find_elf_files(tree)?;
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut records = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let fs_path = tree.detach(&candidate.path, &self.detach_dir())?;
            records.push(ElfBinaryRecord {
                path: candidate.path,
                fs_path,
                executable: candidate.executable,
                stripped: true,
                build_id: None,
                debug_file: None,
            });
        }

        let paths: Vec<PathBuf> = records.iter().map(|r| r.fs_path.clone()).collect();
        let verdicts = BuildIdProbe::new()
            .with_no_sandbox(self.no_sandbox)
            .with_arg_max(self.arg_max)
            .probe(self.runner, &paths)?;
        for record in &mut records {
            if let Some(verdict) = verdicts.get(&record.fs_path) {
                record.stripped = verdict.stripped;
                record.build_id = verdict.build_id.clone();
            }
        }
        Ok(records)
    }

    fn run_dwz(
        &self,
        package: &BinaryPackage,
        artifact: &mut DbgsymArtifact,
        unstripped: &[PathBuf],
    ) -> Result<()> {
        if unstripped.is_empty() || package.is_udeb() {
            return Ok(());
        }

        let multifile_dir = PathBuf::from(format!(
            "/usr/lib/debug/.dwz/{}",
            package.deb_multiarch()?
        ));
        let multifile_name = format!("{}.debug", package.name());
        let mut invocation = Invocation::new("dwz");

        let build_time_multifile = if unstripped.len() > 1 {
            let tmp = tempfile::Builder::new()
                .suffix(&multifile_name)
                .tempfile_in(&self.workdir)?
                .into_temp_path();
            invocation = invocation
                .arg(format!("-m{}", tmp.display()))
                .arg(format!("-M{}", multifile_dir.join(&multifile_name).display()));
            Some(tmp)
        } else {
            None
        };

        for path in unstripped {
            invocation = invocation.arg_path(path);
        }
        self.runner.run_checked(&invocation)?;

        if let Some(tmp) = build_time_multifile {
            if fs::metadata(&tmp)?.len() == 0 {
                debug!("dwz did not produce a multifile for {}", package.name());
                return Ok(());
            }
            let kept = tmp
                .keep()
                .map_err(|e| Error::IoError(format!("keeping dwz multifile: {}", e)))?;
            fs::set_permissions(&kept, fs::Permissions::from_mode(0o644))?;
            artifact.tree.mkdir_p(&multifile_dir)?;
            artifact
                .tree
                .add_file(multifile_dir.join(&multifile_name), &kept, 0o644)?;
        }
        Ok(())
    }

    fn make_debug_file(
        &self,
        objcopy: &str,
        package: &BinaryPackage,
        record: &ElfBinaryRecord,
        artifact: &mut DbgsymArtifact,
    ) -> Result<PathBuf> {
        let build_id = record.build_id.as_deref().ok_or_else(|| {
            Error::NotFound(format!("build-id of {}", record.path.display()))
        })?;
        let debug_path = build_id_debug_path(build_id)?;
        if artifact.tree.exists(&debug_path) {
            debug!("Reusing {} for {}", debug_path.display(), record.path.display());
            return Ok(debug_path);
        }

        // objcopy records the physical basename in the debug link, so it must
        // equal the installed one
        let physical = self
            .dbgsym_store
            .join(package.name())
            .join(relative(&debug_path));
        if let Some(parent) = physical.parent() {
            fs::create_dir_all(parent)?;
        }
        let invocation = Invocation::new(objcopy)
            .arg("--only-keep-debug")
            .arg("--compress-debug-sections")
            .arg_path(&record.fs_path)
            .arg_path(&physical);
        self.runner.run_checked(&invocation)?;

        if let Some(parent) = debug_path.parent() {
            artifact.tree.mkdir_p(parent)?;
        }
        artifact.tree.add_file(&debug_path, &physical, 0o644)?;
        Ok(debug_path)
    }

    fn attach_debug(
        &self,
        objcopy: &str,
        record: &ElfBinaryRecord,
        artifact: &DbgsymArtifact,
    ) -> Result<()> {
        let debug_file = record.debug_file.as_ref().ok_or_else(|| {
            Error::NotFound(format!("debug file for {}", record.path.display()))
        })?;
        let physical = artifact.tree.get(debug_file)?.fs_path().ok_or_else(|| {
            Error::NotFound(format!("content of {}", debug_file.display()))
        })?;
        let invocation = Invocation::new(objcopy)
            .arg("--add-gnu-debuglink")
            .arg_path(physical)
            .arg_path(&record.fs_path);
        self.runner.run_checked(&invocation)?;
        Ok(())
    }
}

fn relative(path: &Path) -> &Path {
    path.strip_prefix("/").unwrap_or(path)
}
