// src/assembler/mod.rs

//! Package assembly
//!
//! The [`PackageAssembler`] drives every binary package of a build through
//! two phases:
//!
//! 1. Per-package processing, where the package tree may still change:
//!    debug-info extraction into the dbgsym companion and service
//!    integration.
//! 2. Control-file generation, after every tree has been frozen: the tree is
//!    deployed into its output root, maintainer scripts, triggers and
//!    conffiles are written, and `dpkg-gencontrol` produces `DEBIAN/control`
//!    with the computed Installed-Size, Multi-Arch and t64 data.
//!
//! Shared state of the build (configuration, `debian/control`, the
//! changelog and memoized tool queries) lives in a [`BuildContext`].

pub mod cache;
pub mod conffiles;
pub mod gencontrol;
pub mod installed_size;
pub mod md5sums;
pub mod multiarch;
pub mod t64;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::changelog::ChangelogEntry;
use crate::config::{AssemblyConfig, PackagePlan};
use crate::dbgsym::{DbgsymArtifact, DebugInfoExtractor};
use crate::error::{Error, Result};
use crate::filesystem::{TreeDeployer, VfsTree};
use crate::maintscript::{MaintscriptSnippets, TriggerSet};
use crate::package::{ArchTable, BinaryPackage, ControlFile, UDEB_PACKAGE_TYPE};
use crate::process::CommandRunner;
use crate::relationships::{MergedControl, RelationshipSubstvarMerger};
use crate::service::{ServiceAliasResolver, ServiceManagerRegistry, ServiceRule};
use crate::substvars::Substvars;

pub use cache::ToolQueryCache;
pub use gencontrol::{CommonParams, ControlGenerator, DbgsymGencontrolRequest, GencontrolRequest};
pub use installed_size::{InstalledSizeCounter, installed_size};
pub use multiarch::detect_multi_arch;

/// Shared state of one build
pub struct BuildContext<'a> {
    runner: &'a dyn CommandRunner,
    config: AssemblyConfig,
    control: ControlFile,
    changelog: ChangelogEntry,
    cache: ToolQueryCache,
}

impl<'a> BuildContext<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        config: AssemblyConfig,
        control: ControlFile,
        changelog: ChangelogEntry,
    ) -> Self {
        Self {
            runner,
            config,
            control,
            changelog,
            cache: ToolQueryCache::new(),
        }
    }

    /// Read `debian/control` and `debian/changelog` from the configured paths
    pub fn load(runner: &'a dyn CommandRunner, config: AssemblyConfig) -> Result<Self> {
        let control = ControlFile::load(&config.control)?;
        let changelog = ChangelogEntry::load_top(&config.changelog)?;
        Ok(Self::new(runner, config, control, changelog))
    }

    pub fn runner(&self) -> &'a dyn CommandRunner {
        self.runner
    }

    pub fn config(&self) -> &AssemblyConfig {
        &self.config
    }

    pub fn control(&self) -> &ControlFile {
        &self.control
    }

    pub fn changelog(&self) -> &ChangelogEntry {
        &self.changelog
    }
}

/// One binary package handed to the assembler
#[derive(Debug)]
pub struct PackageInput {
    pub package: BinaryPackage,
    /// Staged payload
    pub tree: VfsTree,
    /// Directory with packager-provided control files, copied into `DEBIAN`
    pub control_source: Option<PathBuf>,
    pub substvars: Substvars,
    pub binary_version: Option<String>,
    pub service_rules: Vec<ServiceRule>,
}

impl PackageInput {
    pub fn new(package: BinaryPackage, tree: VfsTree) -> Self {
        Self {
            package,
            tree,
            control_source: None,
            substvars: Substvars::new(),
            binary_version: None,
            service_rules: Vec::new(),
        }
    }

    pub fn with_control_source(mut self, dir: impl Into<PathBuf>) -> Self {
        self.control_source = Some(dir.into());
        self
    }

    pub fn with_substvars(mut self, substvars: Substvars) -> Self {
        self.substvars = substvars;
        self
    }

    pub fn with_binary_version(mut self, version: impl Into<String>) -> Self {
        self.binary_version = Some(version.into());
        self
    }

    pub fn with_service_rules(mut self, rules: Vec<ServiceRule>) -> Self {
        self.service_rules = rules;
        self
    }

    /// Build the input for a planned package
    ///
    /// The binary stanza comes from `debian/control`, adjusted by the plan's
    /// field overrides, architecture and udeb flag.
    pub fn from_plan(plan: &PackagePlan, control: &ControlFile, arch_table: &ArchTable) -> Result<Self> {
        let mut stanza = control.binary(&plan.name).cloned().ok_or_else(|| {
            Error::NotFound(format!("package {} is not declared in debian/control", plan.name))
        })?;
        for (field, value) in &plan.fields {
            stanza.set(field.as_str(), value.as_str());
        }
        if let Some(architecture) = &plan.architecture {
            stanza.set("Architecture", architecture.as_str());
        }
        if plan.udeb {
            stanza.set("Package-Type", UDEB_PACKAGE_TYPE);
        }

        let package = BinaryPackage::new(stanza, arch_table.clone())?;
        let tree = VfsTree::from_dir(&plan.staging_dir)?;
        let substvars = match &plan.substvars {
            Some(path) => Substvars::load(path)?,
            None => Substvars::new(),
        };

        Ok(Self {
            package,
            tree,
            control_source: plan.control_dir.clone(),
            substvars,
            binary_version: plan.binary_version.clone(),
            service_rules: plan.services.clone(),
        })
    }
}

/// Where an assembled package ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledPackage {
    pub name: String,
    /// Root ready for `dpkg-deb --build`
    pub root: PathBuf,
    pub control_dir: PathBuf,
    /// Root of the dbgsym companion, when one was built
    pub dbgsym_root: Option<PathBuf>,
    pub build_ids: Vec<String>,
    pub multi_arch: Option<String>,
    /// Installed-Size passed on the command line (absent when a substvar provides it)
    pub installed_size: Option<u64>,
}

/// A package after the per-package phase
struct PreparedPackage {
    input: PackageInput,
    dbgsym: DbgsymArtifact,
    snippets: MaintscriptSnippets,
    triggers: TriggerSet,
}

/// Assembles binary packages into package roots
pub struct PackageAssembler<'a> {
    ctx: BuildContext<'a>,
    registry: ServiceManagerRegistry,
}

impl<'a> PackageAssembler<'a> {
    /// Create an assembler with the built-in service managers
    pub fn new(ctx: BuildContext<'a>) -> Self {
        Self {
            ctx,
            registry: ServiceManagerRegistry::with_builtin(),
        }
    }

    pub fn with_registry(mut self, registry: ServiceManagerRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn context(&self) -> &BuildContext<'a> {
        &self.ctx
    }

    /// Assemble every package
    ///
    /// Nothing is written to the output directory before all packages made it
    /// through the per-package phase.
    pub fn assemble(&mut self, inputs: Vec<PackageInput>) -> Result<Vec<AssembledPackage>> {
        for input in &inputs {
            self.check_binnmu(&input.package)?;
        }

        let mut prepared = Vec::with_capacity(inputs.len());
        for input in inputs {
            prepared.push(self.prepare(input)?);
        }

        // Cross-package processing starts here; trees are read-only from now on
        for package in &mut prepared {
            package.input.tree.freeze();
            package.dbgsym.tree.freeze();
        }

        prepared
            .into_iter()
            .map(|package| self.finish(package))
            .collect()
    }

    /// A binNMU must not rebuild architecture-independent packages
    fn check_binnmu(&self, package: &BinaryPackage) -> Result<()> {
        if self.ctx.changelog.is_binary_only() && package.is_arch_all() {
            return Err(Error::PolicyConflict(format!(
                "The package {} is Architecture: all, but the top changelog entry ({}) is a binNMU \
                 (binary-only=yes). binNMUs must only rebuild architecture-dependent packages.",
                package.name(),
                self.ctx.changelog.version
            )));
        }
        Ok(())
    }

    fn prepare(&mut self, mut input: PackageInput) -> Result<PreparedPackage> {
        let runner = self.ctx.runner;
        let name = input.package.name().to_string();
        let options = self.ctx.config.build_options;

        let mut dbgsym = if input.package.is_udeb() || options.nostrip {
            debug!("Not extracting debug information from {}", name);
            DbgsymArtifact::new()
        } else {
            let no_sandbox = self.ctx.cache.is_fakeroot(runner);
            DebugInfoExtractor::new(
                runner,
                self.ctx.config.workdir(&name),
                self.ctx.config.dbgsym_store.clone(),
            )
            .with_no_sandbox(no_sandbox)
            .with_arg_max(self.ctx.config.arg_max)
            .extract(&input.package, &mut input.tree)?
        };

        let dbgsym_name = format!("{}-dbgsym", name);
        if options.skip_dbgsym() || self.ctx.control.has_binary(&dbgsym_name) {
            debug!("Discarding the automatic {} package", dbgsym_name);
            dbgsym = DbgsymArtifact::new();
        }

        let mut snippets = MaintscriptSnippets::new();
        let mut triggers = TriggerSet::new();
        let mut resolver = ServiceAliasResolver::detect(&self.registry, &input.tree, &input.package)?;
        resolver.apply_rules(&input.service_rules)?;
        resolver.integrate(&input.package, &mut snippets, &mut triggers)?;

        Ok(PreparedPackage {
            input,
            dbgsym,
            snippets,
            triggers,
        })
    }

    fn finish(&mut self, mut prepared: PreparedPackage) -> Result<AssembledPackage> {
        let package = &prepared.input.package;
        let name = package.name().to_string();
        let root = self.ctx.config.package_root(&name);
        reset_dir(&root)?;
        TreeDeployer::new(&root)?.deploy_tree(&prepared.input.tree)?;

        let control_dir = root.join("DEBIAN");
        fs::create_dir_all(&control_dir)?;
        fs::set_permissions(&control_dir, fs::Permissions::from_mode(0o755))?;
        if let Some(source) = &prepared.input.control_source {
            copy_control_files(source, &control_dir)?;
        }

        prepared.snippets.write_to(&control_dir, package.is_udeb())?;
        if !package.is_udeb() {
            prepared.triggers.write_to(&control_dir)?;
            conffiles::generate_conffiles(&control_dir, &prepared.input.tree)?;
        }

        self.generate_control_files(&mut prepared, root, control_dir)
    }

    fn generate_control_files(
        &mut self,
        prepared: &mut PreparedPackage,
        root: PathBuf,
        control_dir: PathBuf,
    ) -> Result<AssembledPackage> {
        let runner = self.ctx.runner;
        let PreparedPackage { input, dbgsym, .. } = prepared;
        let package = &input.package;
        let tree = &input.tree;
        let substvars = &mut input.substvars;
        let name = package.name().to_string();
        let workdir = self.ctx.config.workdir(&name);
        fs::create_dir_all(&workdir)?;

        substvars.set_default_empty("misc:Depends");
        substvars.set_default_empty("misc:Pre-Depends");

        let mut common = CommonParams::new();
        let mut specific = Vec::new();
        let mut main_size = None;
        if !substvars.contains("Installed-Size") {
            let control_tree = VfsTree::from_dir(&control_dir)?;
            let size = installed_size(&[tree, &control_tree])?;
            specific.push(format!("-VInstalled-Size={}", size));
            main_size = Some(size);
        }

        let mut multi_arch = package.fields().get("Multi-Arch").map(str::to_string);
        if !package.is_udeb() && multi_arch.is_none() {
            if let Some(value) = detect_multi_arch(package, &control_dir, tree)? {
                info!(
                    "The package \"{}\" looks like it should be \"Multi-Arch: {}\" based on its \
                     contents; setting the field. Add \"Multi-Arch: no\" to debian/control if this is wrong.",
                    name, value
                );
                common.define("Multi-Arch", value);
                multi_arch = Some(value.to_string());
            }
        } else if multi_arch.as_deref() == Some("no") {
            common.unset("Multi-Arch");
        }

        if let Some(version) = &input.binary_version {
            common.version(version);
        }

        let cache = &mut self.ctx.cache;
        t64::apply_t64_provides(package, &control_dir, substvars, || {
            cache.time64_enabled(runner)
        })?;

        let substvars_file = workdir.join("substvars");
        substvars.write_to(&substvars_file)?;

        let has_dbgsym = dbgsym.has_content();
        let fields = self.ctx.cache.relationship_fields(runner)?.to_vec();
        let merged = RelationshipSubstvarMerger::new(&fields).merge(
            &self.ctx.control.source,
            package.fields(),
            substvars,
            has_dbgsym,
        )?;
        let merged = match merged {
            Some(merged) => Some(merged),
            // Plan overrides must reach dpkg-gencontrol even without substvars to merge
            None if self.ctx.control.binary(&name) != Some(package.fields()) => Some(MergedControl {
                source: self.ctx.control.source.clone(),
                binary: package.fields().clone(),
                dbgsym: None,
            }),
            None => None,
        };
        let control_file = match &merged {
            Some(merged) => merged.write_in(&workdir)?,
            None => self.ctx.config.control.clone(),
        };

        let generator = ControlGenerator::new(
            runner,
            &self.ctx.config.changelog,
            &self.ctx.config.control,
        );

        let build_ids = dbgsym.build_ids_field();
        let dbgsym_root = if has_dbgsym {
            let dbgsym_root = self.ctx.config.dbgsym_root(&name);
            reset_dir(&dbgsym_root)?;
            TreeDeployer::new(&dbgsym_root)?.deploy_tree(&dbgsym.tree)?;
            let dbgsym_control_dir = dbgsym_root.join("DEBIAN");
            fs::create_dir_all(&dbgsym_control_dir)?;

            let control_tree = VfsTree::from_dir(&dbgsym_control_dir)?;
            let size = installed_size(&[&dbgsym.tree, &control_tree])?;
            generator.generate_dbgsym(&DbgsymGencontrolRequest {
                package,
                control_file: &control_file,
                dbgsym_root: &dbgsym_root,
                build_ids: &build_ids,
                multi_arch: multi_arch.as_deref(),
                installed_size: size,
                common: &common,
            })?;
            md5sums::generate_md5sums(&dbgsym_control_dir, &dbgsym.tree)?;
            Some(dbgsym_root)
        } else {
            if !build_ids.is_empty() {
                common.define("Build-Ids", &build_ids);
            }
            None
        };

        generator.generate(&GencontrolRequest {
            package,
            control_file: &control_file,
            substvars_file: &substvars_file,
            control_dir: &control_dir,
            common: &common,
            specific: &specific,
        })?;
        if !package.is_udeb() {
            md5sums::generate_md5sums(&control_dir, tree)?;
        }

        info!("Assembled {} in {}", name, root.display());
        Ok(AssembledPackage {
            name,
            root,
            control_dir,
            dbgsym_root,
            build_ids: dbgsym.build_ids.clone(),
            multi_arch,
            installed_size: main_size,
        })
    }
}

/// Remove a previous assembly result and recreate the directory
fn reset_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)
            .map_err(|e| Error::IoError(format!("removing {}: {}", dir.display(), e)))?;
    }
    fs::create_dir_all(dir)?;
    Ok(())
}

/// Copy packager-provided control files, keeping their modes
fn copy_control_files(source: &Path, control_dir: &Path) -> Result<()> {
    let entries = fs::read_dir(source)
        .map_err(|e| Error::IoError(format!("reading {}: {}", source.display(), e)))?;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let target = control_dir.join(entry.file_name());
        fs::copy(entry.path(), &target).map_err(|e| {
            Error::IoError(format!(
                "copy {} -> {}: {}",
                entry.path().display(),
                target.display(),
                e
            ))
        })?;
        debug!("Installed control file {}", target.display());
    }
    Ok(())
}
