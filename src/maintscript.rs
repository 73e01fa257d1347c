// src/maintscript.rs

//! Maintainer script snippets and dpkg triggers
//!
//! Snippets are collected per script in two lists: generic snippets and
//! service snippets. On install (`preinst`, `postinst`) generic snippets run
//! first; on removal (`prerm`, `postrm`) both the lists and their contents
//! run in reverse, so teardown mirrors setup.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::package::STD_CONTROL_SCRIPTS;

/// Placeholder replaced by generated snippets in hand-written scripts
pub const DEBHELPER_TOKEN: &str = "#DEBHELPER#";

const SCRIPT_HEADER: &str = "#!/bin/sh\nset -e\n\n";

const ON_CONFIGURE: &str = r#"[ "$1" = "configure" ] || [ "$1" = "abort-upgrade" ] || [ "$1" = "abort-deconfigure" ] || [ "$1" = "abort-remove" ]"#;
const ON_REMOVE: &str = r#"[ "$1" = "remove" ]"#;
const ON_PURGE: &str = r#"[ "$1" = "purge" ]"#;

/// Which list a snippet is recorded in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnippetOrder {
    Generic,
    Service,
}

/// A piece of shell code with the name of whoever produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintscriptSnippet {
    pub source: String,
    pub text: String,
}

impl MaintscriptSnippet {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            text: text.into(),
        }
    }

    fn render(&self) -> String {
        let mut out = format!("# Snippet source: {}\n{}", self.source, self.text);
        if !out.ends_with('\n') {
            out.push('\n');
        }
        out
    }
}

#[derive(Debug, Default)]
struct ScriptSnippets {
    generic: Vec<MaintscriptSnippet>,
    service: Vec<MaintscriptSnippet>,
}

impl ScriptSnippets {
    fn list_mut(&mut self, order: SnippetOrder) -> &mut Vec<MaintscriptSnippet> {
        match order {
            SnippetOrder::Generic => &mut self.generic,
            SnippetOrder::Service => &mut self.service,
        }
    }

    fn ordered(&self, reverse: bool) -> Vec<&MaintscriptSnippet> {
        if reverse {
            self.service
                .iter()
                .rev()
                .chain(self.generic.iter().rev())
                .collect()
        } else {
            self.generic.iter().chain(self.service.iter()).collect()
        }
    }

    fn is_empty(&self) -> bool {
        self.generic.is_empty() && self.service.is_empty()
    }
}

/// Every snippet generated for one binary package
#[derive(Debug, Default)]
pub struct MaintscriptSnippets {
    scripts: BTreeMap<String, ScriptSnippets>,
}

impl MaintscriptSnippets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a snippet for `script`; only the standard scripts are accepted
    pub fn add(&mut self, script: &str, order: SnippetOrder, snippet: MaintscriptSnippet) -> Result<()> {
        if !STD_CONTROL_SCRIPTS.contains(&script) {
            return Err(Error::InvalidPath(format!(
                "{} is not a maintainer script snippets can be added to",
                script
            )));
        }
        self.scripts
            .entry(script.to_string())
            .or_default()
            .list_mut(order)
            .push(snippet);
        Ok(())
    }

    /// Accessor that records into `order` on behalf of `source`
    pub fn accessor(&mut self, source: impl Into<String>, order: SnippetOrder) -> MaintscriptAccessor<'_> {
        MaintscriptAccessor {
            snippets: self,
            source: source.into(),
            order,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.values().all(ScriptSnippets::is_empty)
    }

    /// Full body of `script`, or `None` when nothing was recorded for it
    pub fn render(&self, script: &str) -> Option<String> {
        let snippets = self.scripts.get(script).filter(|s| !s.is_empty())?;
        let reverse = matches!(script, "prerm" | "postrm");
        let mut body = String::new();
        for snippet in snippets.ordered(reverse) {
            body.push_str(&snippet.render());
            body.push('\n');
        }
        Some(body)
    }

    /// Write the scripts into the staged control directory
    ///
    /// A hand-written script already in `control_dir` receives the snippets in
    /// place of its `#DEBHELPER#` token. udeb packages only get `postinst`.
    pub fn write_to(&self, control_dir: &Path, is_udeb: bool) -> Result<()> {
        for script in STD_CONTROL_SCRIPTS {
            if is_udeb && script != "postinst" {
                continue;
            }
            let path = control_dir.join(script);
            let body = self.render(script);
            if body.is_none() && !path.exists() {
                continue;
            }
            let content = if path.exists() {
                let existing = fs::read_to_string(&path)
                    .map_err(|e| Error::IoError(format!("reading {}: {}", path.display(), e)))?;
                let has_token = existing.contains(DEBHELPER_TOKEN);
                let Some(body) = body else {
                    if !has_token {
                        continue;
                    }
                    // Nothing generated; the token just disappears
                    fs::write(&path, existing.replacen(DEBHELPER_TOKEN, "", 1))?;
                    continue;
                };
                if !has_token {
                    return Err(Error::PolicyConflict(format!(
                        "{} has no {} token; generated snippets cannot be inserted",
                        path.display(),
                        DEBHELPER_TOKEN
                    )));
                }
                existing.replacen(DEBHELPER_TOKEN, body.trim_end(), 1)
            } else {
                format!("{}{}", SCRIPT_HEADER, body.unwrap_or_default())
            };
            fs::create_dir_all(control_dir)?;
            fs::write(&path, content)?;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
            debug!("Wrote maintainer script {}", path.display());
        }
        Ok(())
    }
}

/// Records snippets for one producer under common conditions
pub struct MaintscriptAccessor<'a> {
    snippets: &'a mut MaintscriptSnippets,
    source: String,
    order: SnippetOrder,
}

impl MaintscriptAccessor<'_> {
    fn conditional(&mut self, script: &str, condition: &str, body: &str) -> Result<()> {
        let body = if body.contains("<<") {
            // Indenting would break heredoc terminators
            body.to_string()
        } else {
            indent(body, "  ")
        };
        let mut text = format!("if {}; then\n{}", condition, body);
        if !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str("fi\n");
        self.unconditionally_in_script(script, &text)
    }

    /// `postinst` on configure and on every abort path that leaves it configured
    pub fn on_configure(&mut self, body: &str) -> Result<()> {
        self.conditional("postinst", ON_CONFIGURE, body)
    }

    /// `prerm remove`
    pub fn on_before_removal(&mut self, body: &str) -> Result<()> {
        self.conditional("prerm", ON_REMOVE, body)
    }

    /// `postrm remove`
    pub fn on_removed(&mut self, body: &str) -> Result<()> {
        self.conditional("postrm", ON_REMOVE, body)
    }

    /// `postrm purge`
    pub fn on_purge(&mut self, body: &str) -> Result<()> {
        self.conditional("postrm", ON_PURGE, body)
    }

    /// Raw snippet; the caller handles `$1` itself
    pub fn unconditionally_in_script(&mut self, script: &str, text: &str) -> Result<()> {
        let snippet = MaintscriptSnippet::new(self.source.clone(), text);
        self.snippets.add(script, self.order, snippet)
    }
}

fn indent(text: &str, prefix: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        if !line.trim().is_empty() {
            out.push_str(prefix);
        }
        out.push_str(line);
    }
    out
}

/// A dpkg trigger declared for the package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub source: String,
    pub trigger_type: String,
    pub target: String,
}

/// Triggers registered for one package, in registration order
#[derive(Debug, Default)]
pub struct TriggerSet {
    triggers: Vec<Trigger>,
    seen: HashSet<(String, String)>,
}

impl TriggerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a trigger; repeated `(type, target)` pairs are ignored
    pub fn register(
        &mut self,
        source: impl Into<String>,
        trigger_type: impl Into<String>,
        target: impl Into<String>,
    ) {
        let trigger_type = trigger_type.into();
        let target = target.into();
        if !self.seen.insert((trigger_type.clone(), target.clone())) {
            return;
        }
        self.triggers.push(Trigger {
            source: source.into(),
            trigger_type,
            target,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Trigger> {
        self.triggers.iter()
    }

    /// Append to `<control_dir>/triggers`
    pub fn write_to(&self, control_dir: &Path) -> Result<()> {
        if self.triggers.is_empty() {
            return Ok(());
        }
        let path = control_dir.join("triggers");
        let mut content = if path.exists() {
            fs::read_to_string(&path)
                .map_err(|e| Error::IoError(format!("reading {}: {}", path.display(), e)))?
        } else {
            String::new()
        };
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        for trigger in &self.triggers {
            content.push_str(&format!(
                "# Added by {}\n{} {}\n",
                trigger.source, trigger.trigger_type, trigger.target
            ));
        }
        fs::create_dir_all(control_dir)?;
        fs::write(&path, content)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conditional_snippet_is_indented() {
        let mut snippets = MaintscriptSnippets::new();
        snippets
            .accessor("debian/test.manifest", SnippetOrder::Generic)
            .on_purge("rm -f /var/lib/foo\n")
            .unwrap();

        let postrm = snippets.render("postrm").unwrap();
        assert_eq!(
            postrm,
            "# Snippet source: debian/test.manifest\n\
             if [ \"$1\" = \"purge\" ]; then\n  rm -f /var/lib/foo\nfi\n\n"
        );
        assert!(snippets.render("postinst").is_none());
    }

    #[test]
    fn test_heredoc_is_not_indented() {
        let mut snippets = MaintscriptSnippets::new();
        snippets
            .accessor("src", SnippetOrder::Generic)
            .on_configure("cat > /etc/foo <<EOF\nx\nEOF\n")
            .unwrap();
        let postinst = snippets.render("postinst").unwrap();
        assert!(postinst.contains("then\ncat > /etc/foo <<EOF\nx\nEOF\nfi\n"));
    }

    #[test]
    fn test_removal_scripts_run_in_reverse() {
        let mut snippets = MaintscriptSnippets::new();
        for (src, order) in [
            ("g1", SnippetOrder::Generic),
            ("g2", SnippetOrder::Generic),
            ("s1", SnippetOrder::Service),
        ] {
            let mut accessor = snippets.accessor(src, order);
            accessor.unconditionally_in_script("postinst", src).unwrap();
            accessor.unconditionally_in_script("prerm", src).unwrap();
        }

        let sources = |body: String| -> Vec<String> {
            body.lines()
                .filter_map(|l| l.strip_prefix("# Snippet source: "))
                .map(str::to_string)
                .collect()
        };
        assert_eq!(sources(snippets.render("postinst").unwrap()), ["g1", "g2", "s1"]);
        assert_eq!(sources(snippets.render("prerm").unwrap()), ["s1", "g2", "g1"]);
    }

    #[test]
    fn test_only_standard_scripts() {
        let mut snippets = MaintscriptSnippets::new();
        let mut accessor = snippets.accessor("src", SnippetOrder::Generic);
        assert!(accessor.unconditionally_in_script("config", "true").is_err());
    }

    #[test]
    fn test_write_scripts() {
        let dir = tempfile::tempdir().unwrap();
        let mut snippets = MaintscriptSnippets::new();
        let mut accessor = snippets.accessor("src", SnippetOrder::Generic);
        accessor.on_configure("true\n").unwrap();
        accessor.on_removed("true\n").unwrap();
        snippets.write_to(dir.path(), false).unwrap();

        let postinst = dir.path().join("postinst");
        let content = fs::read_to_string(&postinst).unwrap();
        assert!(content.starts_with("#!/bin/sh\nset -e\n\n# Snippet source: src\n"));
        let mode = fs::metadata(&postinst).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o755);
        assert!(dir.path().join("postrm").exists());
    }

    #[test]
    fn test_udeb_only_gets_postinst() {
        let dir = tempfile::tempdir().unwrap();
        let mut snippets = MaintscriptSnippets::new();
        let mut accessor = snippets.accessor("src", SnippetOrder::Generic);
        accessor.on_configure("true\n").unwrap();
        accessor.on_purge("true\n").unwrap();
        snippets.write_to(dir.path(), true).unwrap();

        assert!(dir.path().join("postinst").exists());
        assert!(!dir.path().join("postrm").exists());
    }

    #[test]
    fn test_existing_script_token_substitution() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("postinst"),
            "#!/bin/sh\nset -e\necho custom\n#DEBHELPER#\nexit 0\n",
        )
        .unwrap();
        let mut snippets = MaintscriptSnippets::new();
        snippets
            .accessor("src", SnippetOrder::Generic)
            .unconditionally_in_script("postinst", "echo generated\n")
            .unwrap();
        snippets.write_to(dir.path(), false).unwrap();

        let content = fs::read_to_string(dir.path().join("postinst")).unwrap();
        assert_eq!(
            content,
            "#!/bin/sh\nset -e\necho custom\n# Snippet source: src\necho generated\nexit 0\n"
        );

        fs::write(dir.path().join("prerm"), "#!/bin/sh\n#DEBHELPER#\nexit 0\n").unwrap();
        fs::write(dir.path().join("postrm"), "#!/bin/sh\nexit 0\n").unwrap();
        snippets.write_to(dir.path(), false).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("prerm")).unwrap(),
            "#!/bin/sh\n\nexit 0\n"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("postrm")).unwrap(),
            "#!/bin/sh\nexit 0\n"
        );

        fs::write(dir.path().join("postinst"), "#!/bin/sh\nexit 0\n").unwrap();
        assert!(matches!(
            snippets.write_to(dir.path(), false),
            Err(Error::PolicyConflict(_))
        ));
    }

    #[test]
    fn test_triggers_deduplicated_and_appended() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("triggers"), "interest /usr/share/foo").unwrap();

        let mut triggers = TriggerSet::new();
        triggers.register("systemd", "activate-noawait", "systemd-tmpfiles");
        triggers.register("other", "activate-noawait", "systemd-tmpfiles");
        triggers.write_to(dir.path()).unwrap();

        let content = fs::read_to_string(dir.path().join("triggers")).unwrap();
        assert_eq!(
            content,
            "interest /usr/share/foo\n# Added by systemd\nactivate-noawait systemd-tmpfiles\n"
        );
    }
}
