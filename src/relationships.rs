// src/relationships.rs

//! Merging relationship substvars into the binary stanza
//!
//! `dpkg-gencontrol` only expands substvars that a field mentions. Computed
//! dependencies such as `${shlibs:Depends}` are therefore spliced into the
//! declared relationship fields before generation, and the combined control
//! file replaces `debian/control` for that package.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::deb822::Stanza;
use crate::error::{Error, Result};
use crate::substvars::{SubstvarOp, Substvars};

/// Suffix of the generated control file
pub const CONTROL_SUFFIX: &str = "__DEBIAN_control";

/// The control input `dpkg-gencontrol` should read
#[derive(Debug, Clone)]
pub struct MergedControl {
    pub source: Stanza,
    pub binary: Stanza,
    /// Minimal stanza for `<pkg>-dbgsym`, when the package has debug content
    pub dbgsym: Option<Stanza>,
}

impl MergedControl {
    /// Render as a multi-stanza control file
    pub fn render(&self) -> String {
        let mut out = format!("{}\n{}", self.source, self.binary);
        if let Some(dbgsym) = &self.dbgsym {
            out.push('\n');
            out.push_str(&dbgsym.to_string());
        }
        out
    }

    /// Write into `dir` under a fresh name and return the path
    pub fn write_in(&self, dir: &Path) -> Result<PathBuf> {
        let mut file = tempfile::Builder::new()
            .suffix(CONTROL_SUFFIX)
            .tempfile_in(dir)?;
        file.write_all(self.render().as_bytes())?;
        let (_, path) = file
            .keep()
            .map_err(|e| Error::IoError(format!("keeping generated control file: {}", e)))?;
        debug!("Wrote merged control file {}", path.display());
        Ok(path)
    }
}

/// Splices `tool:Field` substvars into relationship fields
#[derive(Debug, Clone)]
pub struct RelationshipSubstvarMerger<'a> {
    /// Relationship fields known to dpkg, in dpkg's order
    relationship_fields: &'a [String],
}

impl<'a> RelationshipSubstvarMerger<'a> {
    pub fn new(relationship_fields: &'a [String]) -> Self {
        Self {
            relationship_fields,
        }
    }

    fn is_relationship_field(&self, field: &str) -> bool {
        self.relationship_fields
            .iter()
            .any(|f| f.eq_ignore_ascii_case(field))
    }

    /// Build the merged control input, or `None` when `debian/control` can be used as is
    pub fn merge(
        &self,
        source: &Stanza,
        binary: &Stanza,
        substvars: &Substvars,
        has_dbgsym: bool,
    ) -> Result<Option<MergedControl>> {
        let mut tokens: HashMap<String, Vec<String>> = HashMap::new();
        let mut needs_dbgsym_stanza = false;

        for substvar in substvars.iter() {
            let Some((_, field)) = substvar.name.rsplit_once(':') else {
                continue;
            };
            if substvar.op.requires_dbgsym_stanza() {
                needs_dbgsym_stanza = true;
            }
            // dpkg substitutes these on its own
            if substvar.op == SubstvarOp::Fixed {
                continue;
            }
            let field = field.to_ascii_lowercase();
            if !self.is_relationship_field(&field) {
                continue;
            }
            tokens
                .entry(field)
                .or_default()
                .push(format!("${{{}}}", substvar.name));
        }

        let needs_dbgsym_stanza = needs_dbgsym_stanza && has_dbgsym;
        if tokens.is_empty() && !needs_dbgsym_stanza {
            return Ok(None);
        }

        let mut merged = binary.clone();
        for field in self.relationship_fields {
            let Some(addendum) = tokens.get(&field.to_ascii_lowercase()) else {
                continue;
            };
            let addendum = addendum.join(", ");
            let value = match merged.get(field) {
                Some(existing) if !existing.trim().is_empty() => {
                    format!("{}, {}", existing.trim_end().trim_end_matches(','), addendum)
                }
                _ => addendum,
            };
            merged.set(field.as_str(), value);
        }

        let dbgsym = if has_dbgsym {
            let name = binary
                .get("Package")
                .ok_or_else(|| Error::ParseError("binary stanza without Package".into()))?;
            let architecture = binary.get("Architecture").unwrap_or_default();
            Some(
                Stanza::new()
                    .with("Package", format!("{}-dbgsym", name))
                    .with("Architecture", architecture)
                    .with("Description", format!("debug symbols for {}", name)),
            )
        } else {
            None
        };

        Ok(Some(MergedControl {
            source: source.clone(),
            binary: merged,
            dbgsym,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> Vec<String> {
        ["Pre-Depends", "Depends", "Recommends", "Suggests", "Provides"]
            .iter()
            .map(|f| f.to_string())
            .collect()
    }

    fn stanzas() -> (Stanza, Stanza) {
        let source = Stanza::new().with("Source", "foo");
        let binary = Stanza::new()
            .with("Package", "libfoo1")
            .with("Architecture", "any")
            .with("Depends", "bar,  ")
            .with("Description", "foo library");
        (source, binary)
    }

    #[test]
    fn test_nothing_to_merge() {
        let fields = fields();
        let (source, binary) = stanzas();
        let substvars = Substvars::parse("misc:Foo=bar\nnamespaceless=1\n").unwrap();
        let merged = RelationshipSubstvarMerger::new(&fields)
            .merge(&source, &binary, &substvars, true)
            .unwrap();
        assert!(merged.is_none());
    }

    #[test]
    fn test_merges_into_existing_and_new_fields() {
        let fields = fields();
        let (source, binary) = stanzas();
        let substvars = Substvars::parse(
            "shlibs:Depends=libc6 (>= 2.36)\nmisc:Depends=\nt64:Provides=libfoo (= 1)\n",
        )
        .unwrap();
        let merged = RelationshipSubstvarMerger::new(&fields)
            .merge(&source, &binary, &substvars, false)
            .unwrap()
            .unwrap();

        assert_eq!(
            merged.binary.get("Depends"),
            Some("bar, ${misc:Depends}, ${shlibs:Depends}")
        );
        assert_eq!(merged.binary.get("Provides"), Some("${t64:Provides}"));
        assert!(merged.dbgsym.is_none());
        assert_eq!(
            merged.render(),
            "Source: foo\n\nPackage: libfoo1\nArchitecture: any\n\
             Depends: bar, ${misc:Depends}, ${shlibs:Depends}\nDescription: foo library\n\
             Provides: ${t64:Provides}\n"
        );
    }

    #[test]
    fn test_fixed_substvar_forces_dbgsym_stanza() {
        let fields = fields();
        let (source, binary) = stanzas();
        let substvars = Substvars::parse("foo:Depends$=bar\n").unwrap();
        let merger = RelationshipSubstvarMerger::new(&fields);

        assert!(merger.merge(&source, &binary, &substvars, false).unwrap().is_none());

        let merged = merger
            .merge(&source, &binary, &substvars, true)
            .unwrap()
            .unwrap();
        assert_eq!(merged.binary.get("Depends"), Some("bar,  "));
        let dbgsym = merged.dbgsym.as_ref().unwrap();
        assert_eq!(dbgsym.get("Package"), Some("libfoo1-dbgsym"));
        assert_eq!(dbgsym.get("Description"), Some("debug symbols for libfoo1"));
        assert_eq!(dbgsym.iter().count(), 3);
    }

    #[test]
    fn test_write_in() {
        let dir = tempfile::tempdir().unwrap();
        let fields = fields();
        let (source, binary) = stanzas();
        let substvars = Substvars::parse("foo:Recommends=baz\n").unwrap();
        let merged = RelationshipSubstvarMerger::new(&fields)
            .merge(&source, &binary, &substvars, false)
            .unwrap()
            .unwrap();

        let path = merged.write_in(dir.path()).unwrap();
        assert!(path.to_string_lossy().ends_with(CONTROL_SUFFIX));
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("Recommends: ${foo:Recommends}\n"));
    }
}
