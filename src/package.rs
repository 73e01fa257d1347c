// src/package.rs

//! Binary/source package metadata and the dpkg architecture table

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::deb822::{Stanza, parse_stanzas};
use crate::error::{Error, Result};
use crate::process::{CommandRunner, Invocation};

/// Value of `Package-Type` for debian-installer packages
pub const UDEB_PACKAGE_TYPE: &str = "udeb";

/// Maintainer scripts dpkg runs for regular packages
pub const STD_CONTROL_SCRIPTS: [&str; 4] = ["preinst", "prerm", "postinst", "postrm"];

/// Every control file that is an executable hook (regular and udeb)
pub const ALL_CONTROL_SCRIPTS: [&str; 7] = [
    "preinst",
    "prerm",
    "postinst",
    "postrm",
    "config",
    "menutest",
    "isinstallable",
];

/// Values normally provided by `dpkg-architecture`
#[derive(Debug, Clone, Default)]
pub struct ArchTable {
    values: HashMap<String, String>,
}

impl ArchTable {
    /// Variables consulted by the assembler
    pub const KEYS: [&'static str; 7] = [
        "DEB_HOST_ARCH",
        "DEB_HOST_ARCH_BITS",
        "DEB_HOST_MULTIARCH",
        "DEB_HOST_GNU_TYPE",
        "DEB_BUILD_GNU_TYPE",
        "DEB_TARGET_GNU_TYPE",
        "DEB_TARGET_ARCH",
    ];

    /// Build a table from explicit values
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Convenience table for a native (non-cross) build
    pub fn native(arch: &str, bits: &str, multiarch: &str) -> Self {
        Self::from_pairs([
            ("DEB_HOST_ARCH", arch),
            ("DEB_HOST_ARCH_BITS", bits),
            ("DEB_HOST_MULTIARCH", multiarch),
            ("DEB_HOST_GNU_TYPE", multiarch),
            ("DEB_BUILD_GNU_TYPE", multiarch),
            ("DEB_TARGET_GNU_TYPE", multiarch),
            ("DEB_TARGET_ARCH", arch),
        ])
    }

    /// Read the variables from the environment only
    pub fn from_env() -> Self {
        Self::from_pairs(
            Self::KEYS
                .iter()
                .filter_map(|k| std::env::var(k).ok().map(|v| (k.to_string(), v))),
        )
    }

    /// Query `dpkg-architecture`, letting environment values take precedence
    pub fn load(runner: &dyn CommandRunner) -> Result<Self> {
        let output = runner.run_checked(&Invocation::new("dpkg-architecture"))?;
        let mut table = Self::default();
        for line in output.stdout_str().lines() {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            let value = std::env::var(key).unwrap_or_else(|_| value.to_string());
            table.values.insert(key.to_string(), value);
        }
        debug!("Loaded {} dpkg-architecture values", table.values.len());
        Ok(table)
    }

    /// Look up a variable
    pub fn get(&self, key: &str) -> Result<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| Error::ConfigError(format!("{} is not set", key)))
    }

    /// Host and build GNU types differ
    pub fn is_cross_compiling(&self) -> Result<bool> {
        Ok(self.get("DEB_BUILD_GNU_TYPE")? != self.get("DEB_HOST_GNU_TYPE")?)
    }
}

/// A binary package stanza from `debian/control`
#[derive(Debug, Clone)]
pub struct BinaryPackage {
    fields: Stanza,
    arch_table: ArchTable,
}

impl BinaryPackage {
    /// Wrap a binary stanza; `Package` and `Architecture` are required
    pub fn new(fields: Stanza, arch_table: ArchTable) -> Result<Self> {
        for required in ["Package", "Architecture"] {
            if !fields.contains(required) {
                return Err(Error::ParseError(format!(
                    "binary package stanza is missing the {} field",
                    required
                )));
            }
        }
        Ok(Self { fields, arch_table })
    }

    pub fn name(&self) -> &str {
        self.fields.get("Package").unwrap_or_default()
    }

    pub fn fields(&self) -> &Stanza {
        &self.fields
    }

    pub fn arch_table(&self) -> &ArchTable {
        &self.arch_table
    }

    pub fn declared_architecture(&self) -> &str {
        self.fields.get("Architecture").unwrap_or_default()
    }

    pub fn is_arch_all(&self) -> bool {
        self.declared_architecture() == "all"
    }

    /// `Package-Type`, defaulting to `deb`
    pub fn package_type(&self) -> &str {
        self.fields.get("Package-Type").unwrap_or("deb")
    }

    pub fn is_udeb(&self) -> bool {
        self.package_type() == UDEB_PACKAGE_TYPE
    }

    pub fn archive_section(&self) -> &str {
        self.fields.get("Section").unwrap_or("Unknown")
    }

    /// Archive component from `Section` (`contrib/libs` is `contrib`); `main` is empty
    pub fn archive_component(&self) -> &str {
        match self.archive_section().rsplit_once('/') {
            Some(("main", _)) | None => "",
            Some((component, _)) => component,
        }
    }

    fn builds_for_target(&self) -> bool {
        self.fields
            .get("X-DH-Build-For-Type")
            .is_some_and(|v| v.eq_ignore_ascii_case("target"))
    }

    /// `DEB_HOST_<suffix>` (or `DEB_TARGET_<suffix>` for target packages)
    pub fn arch_variable(&self, suffix: &str) -> Result<&str> {
        let prefix = if self.builds_for_target() {
            "DEB_TARGET"
        } else {
            "DEB_HOST"
        };
        self.arch_table.get(&format!("{}_{}", prefix, suffix))
    }

    /// Architecture the package is built for
    pub fn resolved_architecture(&self) -> Result<&str> {
        if self.is_arch_all() {
            return Ok("all");
        }
        self.arch_variable("ARCH")
    }

    pub fn deb_multiarch(&self) -> Result<&str> {
        self.arch_variable("MULTIARCH")
    }

    /// Prefix a toolchain command with the GNU type when cross-compiling
    pub fn cross_command(&self, command: &str) -> Result<String> {
        if self.builds_for_target() {
            let target = self.arch_table.get("DEB_TARGET_GNU_TYPE")?;
            if self.arch_table.get("DEB_HOST_GNU_TYPE")? != target {
                return Ok(format!("{}-{}", target, command));
            }
        }
        if self.arch_table.is_cross_compiling()? {
            return Ok(format!(
                "{}-{}",
                self.arch_table.get("DEB_HOST_GNU_TYPE")?,
                command
            ));
        }
        Ok(command.to_string())
    }
}

/// Parsed `debian/control`: the source stanza and every binary stanza
#[derive(Debug, Clone)]
pub struct ControlFile {
    pub source: Stanza,
    pub binaries: Vec<Stanza>,
}

impl ControlFile {
    pub fn parse(text: &str) -> Result<Self> {
        let mut stanzas = parse_stanzas(text)?.into_iter();
        let source = stanzas
            .next()
            .filter(|s| s.contains("Source"))
            .ok_or_else(|| {
                Error::ParseError("debian/control must start with a Source stanza".into())
            })?;
        Ok(Self {
            source,
            binaries: stanzas.collect(),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::IoError(format!("reading {}: {}", path.display(), e)))?;
        Self::parse(&text)
    }

    /// Find the binary stanza for `name`
    pub fn binary(&self, name: &str) -> Option<&Stanza> {
        self.binaries.iter().find(|s| s.get("Package") == Some(name))
    }

    /// Whether a binary package of that name is declared
    pub fn has_binary(&self, name: &str) -> bool {
        self.binary(name).is_some()
    }
}
