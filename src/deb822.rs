// src/deb822.rs

//! Minimal deb822 (Debian control file) reader and writer
//!
//! Field order is preserved, field names are matched case-insensitively, and
//! continuation lines are kept verbatim so a parsed stanza dumps back to the
//! same text.

use std::fmt;

use crate::error::{Error, Result};

/// One paragraph of a deb822 file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stanza {
    fields: Vec<(String, String)>,
}

impl Stanza {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Get a field value (case-insensitive lookup)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.fields[i].1.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Set a field, keeping its position if it already exists
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(i) => self.fields[i].1 = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Builder-style `set`
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|i| self.fields.remove(i).1)
    }

    /// Iterate over (name, value) pairs in file order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Display for Stanza {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.fields {
            if value.starts_with('\n') {
                writeln!(f, "{}:{}", name, value)?;
            } else {
                writeln!(f, "{}: {}", name, value)?;
            }
        }
        Ok(())
    }
}

/// Parse every stanza in a deb822 document
pub fn parse_stanzas(text: &str) -> Result<Vec<Stanza>> {
    let mut stanzas = Vec::new();
    let mut current = Stanza::new();

    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                stanzas.push(std::mem::take(&mut current));
            }
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            let (_, value) = current.fields.last_mut().ok_or_else(|| {
                Error::ParseError(format!(
                    "line {}: continuation line without a field",
                    lineno + 1
                ))
            })?;
            value.push('\n');
            value.push_str(line);
            continue;
        }
        let (name, value) = line.split_once(':').ok_or_else(|| {
            Error::ParseError(format!("line {}: expected \"Field: value\"", lineno + 1))
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::ParseError(format!("line {}: empty field name", lineno + 1)));
        }
        if current.contains(name) {
            return Err(Error::ParseError(format!(
                "line {}: duplicate field {}",
                lineno + 1,
                name
            )));
        }
        current.fields.push((name.to_string(), value.trim().to_string()));
    }

    if !current.is_empty() {
        stanzas.push(current);
    }
    Ok(stanzas)
}
