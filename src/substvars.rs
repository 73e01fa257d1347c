// src/substvars.rs

//! Substitution variables (`debian/<pkg>.substvars`)
//!
//! Each line has the form `name<op>value` where `<op>` is one of `=`, `?=`,
//! `$=` or `!=`. Lines starting with `#` are comments.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};

/// Assignment operator of a substvar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubstvarOp {
    /// `=`: merged into relationship fields
    #[default]
    Merge,
    /// `?=`: like `=` but dpkg does not warn when unused
    Optional,
    /// `$=`: substituted by dpkg automatically, never merged
    Fixed,
    /// `!=`: merged, and must also be available to dbgsym stanzas
    AppendOnce,
}

impl SubstvarOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merge => "=",
            Self::Optional => "?=",
            Self::Fixed => "$=",
            Self::AppendOnce => "!=",
        }
    }

    /// Whether the operator requires a dedicated dbgsym stanza
    pub fn requires_dbgsym_stanza(&self) -> bool {
        matches!(self, Self::Fixed | Self::AppendOnce)
    }
}

impl fmt::Display for SubstvarOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single substitution variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substvar {
    pub name: String,
    pub value: String,
    pub op: SubstvarOp,
}

/// Ordered collection of substvars
#[derive(Debug, Clone, Default)]
pub struct Substvars {
    vars: BTreeMap<String, Substvar>,
}

impl Substvars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse substvars text
    pub fn parse(text: &str) -> Result<Self> {
        let mut substvars = Self::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim_end();
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let eq = line.find('=').ok_or_else(|| {
                Error::ParseError(format!("substvars line {}: missing '='", lineno + 1))
            })?;
            let (name, op) = match line[..eq].chars().last() {
                Some('?') => (&line[..eq - 1], SubstvarOp::Optional),
                Some('$') => (&line[..eq - 1], SubstvarOp::Fixed),
                Some('!') => (&line[..eq - 1], SubstvarOp::AppendOnce),
                _ => (&line[..eq], SubstvarOp::Merge),
            };
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::ParseError(format!(
                    "substvars line {}: empty variable name",
                    lineno + 1
                )));
            }
            substvars.set(name, &line[eq + 1..], op);
        }
        Ok(substvars)
    }

    /// Load substvars from a file; a missing file yields an empty set
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(Error::IoError(format!("reading {}: {}", path.display(), e))),
        }
    }

    /// Write all substvars to `path`
    pub fn write_to(&self, path: &Path) -> Result<()> {
        debug!("Writing substvars to {}", path.display());
        fs::write(path, self.to_string())?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Substvar> {
        self.vars.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Set (or replace) a variable
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>, op: SubstvarOp) {
        let name = name.into();
        self.vars.insert(
            name.clone(),
            Substvar {
                name,
                value: value.into(),
                op,
            },
        );
    }

    /// Define the variable as empty if it is not already set
    pub fn set_default_empty(&mut self, name: &str) {
        if !self.contains(name) {
            self.set(name, "", SubstvarOp::Merge);
        }
    }

    /// Add a relationship clause to a variable, skipping clauses already present
    pub fn add_dependency(&mut self, name: &str, clause: &str) {
        match self.vars.get_mut(name) {
            Some(var) => {
                let mut clauses: Vec<String> = var
                    .value
                    .split(',')
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect();
                if clauses.iter().any(|c| c == clause) {
                    return;
                }
                clauses.push(clause.to_string());
                var.value = clauses.join(", ");
            }
            None => self.set(name, clause, SubstvarOp::Merge),
        }
    }

    /// Iterate in name order
    pub fn iter(&self) -> impl Iterator<Item = &Substvar> {
        self.vars.values()
    }
}

impl fmt::Display for Substvars {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for var in self.vars.values() {
            writeln!(f, "{}{}{}", var.name, var.op, var.value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_operators() {
        let vars = Substvars::parse(
            "# generated\nmisc:Depends=foo\nshlibs:Depends?=libc6 (>= 2.36)\nfoo:Built-Using$=bar (= 1)\nbaz:Recommends!=qux\n",
        )
        .unwrap();

        assert_eq!(vars.get("misc:Depends").unwrap().op, SubstvarOp::Merge);
        assert_eq!(vars.get("shlibs:Depends").unwrap().op, SubstvarOp::Optional);
        assert_eq!(vars.get("shlibs:Depends").unwrap().value, "libc6 (>= 2.36)");
        assert_eq!(vars.get("foo:Built-Using").unwrap().op, SubstvarOp::Fixed);
        assert_eq!(vars.get("baz:Recommends").unwrap().op, SubstvarOp::AppendOnce);
        assert!(SubstvarOp::Fixed.requires_dbgsym_stanza());
        assert!(!SubstvarOp::Optional.requires_dbgsym_stanza());
    }

    #[test]
    fn test_value_may_contain_equals() {
        let vars = Substvars::parse("t64:Provides=libfoo (= ${binary:Version})\n").unwrap();
        let var = vars.get("t64:Provides").unwrap();
        assert_eq!(var.value, "libfoo (= ${binary:Version})");
        assert_eq!(var.op, SubstvarOp::Merge);
    }

    #[test]
    fn test_add_dependency_deduplicates() {
        let mut vars = Substvars::new();
        vars.add_dependency("misc:Depends", "adduser");
        vars.add_dependency("misc:Depends", "init-system-helpers (>= 1.50)");
        vars.add_dependency("misc:Depends", "adduser");

        assert_eq!(
            vars.get("misc:Depends").unwrap().value,
            "adduser, init-system-helpers (>= 1.50)"
        );
    }

    #[test]
    fn test_load_missing_and_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foo.substvars");

        let mut vars = Substvars::load(&path).unwrap();
        assert!(vars.iter().next().is_none());
        vars.set("misc:Pre-Depends", "", SubstvarOp::Merge);
        vars.set("foo:Built-Using", "x", SubstvarOp::Fixed);
        vars.write_to(&path).unwrap();

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "foo:Built-Using$=x\nmisc:Pre-Depends=\n"
        );
        let reloaded = Substvars::load(&path).unwrap();
        assert_eq!(reloaded.get("foo:Built-Using").unwrap().op, SubstvarOp::Fixed);
    }
}
