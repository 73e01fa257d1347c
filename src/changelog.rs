// src/changelog.rs

//! Reading the top entry of `debian/changelog`

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// Header of a changelog entry: `source (version) dists; key=value, ...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangelogEntry {
    pub source: String,
    pub version: String,
    pub distributions: Vec<String>,
    pub options: BTreeMap<String, String>,
}

impl ChangelogEntry {
    /// Parse a header line
    pub fn parse_header(line: &str) -> Result<Self> {
        let bad = || Error::ParseError(format!("malformed changelog header: {}", line));

        let (source, rest) = line.trim().split_once(' ').ok_or_else(bad)?;
        let rest = rest.trim_start().strip_prefix('(').ok_or_else(bad)?;
        let (version, rest) = rest.split_once(')').ok_or_else(bad)?;
        let (dists, options) = rest.split_once(';').ok_or_else(bad)?;

        let options = options
            .split(',')
            .filter_map(|kv| kv.trim().split_once('='))
            .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
            .collect();

        Ok(Self {
            source: source.to_string(),
            version: version.to_string(),
            distributions: dists.split_whitespace().map(str::to_string).collect(),
            options,
        })
    }

    /// Read the topmost entry of a changelog file
    pub fn load_top(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::IoError(format!("reading {}: {}", path.display(), e)))?;
        let header = text
            .lines()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| Error::ParseError(format!("{} is empty", path.display())))?;
        Self::parse_header(header)
    }

    /// `binary-only=yes`: the upload is a binNMU
    pub fn is_binary_only(&self) -> bool {
        self.options.get("binary-only").map(String::as_str) == Some("yes")
    }
}
