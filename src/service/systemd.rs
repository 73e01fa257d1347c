// src/service/systemd.rs

//! systemd unit detection and `deb-systemd-helper` snippets

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use super::{
    ServiceContext, ServiceDefinition, ServiceDetector, ServiceIntegrationContext,
    ServiceIntegrator, ServiceManager, ServiceUpgradeRule, shell_words,
};
use crate::error::{Error, Result};
use crate::filesystem::VfsTree;
use crate::package::BinaryPackage;

pub const MANAGER_NAME: &str = "systemd";

/// Unit directories in lookup order; the first unit of a given name wins
const UNIT_DIRS: [&str; 2] = ["/usr/lib/systemd/system", "/lib/systemd/system"];

/// User units have no maintainer-script integration and are refused
const USER_UNIT_DIRS: [&str; 2] = ["/usr/lib/systemd/user", "/lib/systemd/user"];

pub(crate) const EMPTY_DPKG_ROOT: &str = r#"[ -z "${DPKG_ROOT}" ]"#;
const SYSTEMD_IS_RUNNING: &str = "[ -d /run/systemd/system ]";

pub fn manager() -> ServiceManager {
    ServiceManager::new(MANAGER_NAME, SystemdDetector, SystemdIntegrator)
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2
        && bytes[0] == bytes[bytes.len() - 1]
        && (bytes[0] == b'"' || bytes[0] == b'\'')
    {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

#[derive(Debug, Default)]
struct UnitScan {
    units: Vec<PathBuf>,
    had_install: HashSet<String>,
    aliases: HashMap<String, Vec<String>>,
    /// `Also=` units and the units asking for them
    expected: BTreeMap<String, Vec<PathBuf>>,
}

impl UnitScan {
    fn read_unit(&mut self, name: &str, path: &Path, fs_path: Option<&Path>) -> Result<()> {
        let Some(fs_path) = fs_path else {
            return Ok(());
        };
        let content = fs::read_to_string(fs_path)
            .map_err(|e| Error::IoError(format!("reading {}: {}", fs_path.display(), e)))?;
        for line in content.lines() {
            let line = line.trim();
            let lower = line.to_ascii_lowercase();
            if lower == "[install]" {
                self.had_install.insert(name.to_string());
            } else if lower.starts_with("alias=") {
                self.aliases
                    .entry(name.to_string())
                    .or_default()
                    .extend(line[6..].split_whitespace().map(|a| unquote(a).to_string()));
            } else if lower.starts_with("also=") {
                for unit in line[5..].split_whitespace().map(unquote) {
                    self.expected
                        .entry(unit.to_string())
                        .or_default()
                        .push(path.to_path_buf());
                }
            }
        }
        Ok(())
    }
}

fn reject_user_units(tree: &VfsTree, package: &BinaryPackage) -> Result<()> {
    for dir in USER_UNIT_DIRS {
        let Some(dir_id) = tree.lookup(dir) else {
            continue;
        };
        if let Some((name, _)) = tree
            .children(dir_id)
            .find(|(_, id)| tree.get_node(*id).is_file())
        {
            return Err(Error::PolicyConflict(format!(
                "Sorry, systemd user services files are not supported at the moment (saw \"{}/{}\" in {})",
                dir,
                name,
                package.name()
            )));
        }
    }
    Ok(())
}

/// Finds system units shipped by the package
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemdDetector;

impl ServiceDetector for SystemdDetector {
    fn detect(&self, tree: &VfsTree, package: &BinaryPackage) -> Result<Vec<ServiceDefinition>> {
        reject_user_units(tree, package)?;

        let mut scan = UnitScan::default();
        let mut seen = HashSet::new();

        for dir in UNIT_DIRS {
            let Some(dir_id) = tree.lookup(dir) else {
                continue;
            };
            for (name, id) in tree.children(dir_id) {
                let node = tree.get_node(id);
                let path = Path::new(dir).join(name);
                if let Some(target) = node.symlink_target() {
                    let dest = target
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    scan.aliases.entry(dest).or_default().push(name.to_string());
                } else if node.is_file() && seen.insert(name.to_string()) {
                    scan.units.push(path.clone());
                    // Templated units are not inspected
                    if !name.contains('@') {
                        scan.read_unit(name, &path, node.fs_path())?;
                    }
                }
            }
        }

        let mut definitions = Vec::new();
        for path in &scan.units {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if name.contains('@') {
                continue;
            }
            let (_, unit_type) = name.rsplit_once('.').ok_or_else(|| {
                Error::ParseError(format!("systemd unit without a type: {}", path.display()))
            })?;

            let aliases = scan.aliases.get(&name).cloned().unwrap_or_default();
            for alias in &aliases {
                scan.expected.remove(alias);
            }
            scan.expected.remove(&name);

            let mut names = vec![name.clone()];
            if let Some(stem) = name.strip_suffix(".service") {
                names.push(stem.to_string());
            }
            let alias_stems: Vec<String> = aliases
                .iter()
                .filter_map(|a| a.strip_suffix(".service"))
                .map(str::to_string)
                .collect();
            names.extend(aliases);
            names.extend(alias_stems);

            let had_install = scan.had_install.contains(&name);
            definitions.push(
                ServiceDefinition::new(names, path, MANAGER_NAME)?
                    .with_type(unit_type)
                    .with_scope("system")
                    // Every unit is started, only those with [Install] are enabled
                    .with_auto_enable(had_install)
                    .with_auto_start(true)
                    .with_upgrade_rule(ServiceUpgradeRule::Restart)
                    .with_context(ServiceContext::Systemd {
                        had_install_section: had_install,
                    }),
            );
        }

        if let Some((unit, required_by)) = scan.expected.iter().next() {
            let required_by: Vec<String> =
                required_by.iter().map(|p| p.display().to_string()).collect();
            return Err(Error::PolicyConflict(format!(
                "The unit {} was required by {} (via Also=...) but was not present in the package {}",
                unit,
                required_by.join(", "),
                package.name()
            )));
        }
        Ok(definitions)
    }
}

fn enable_snippet(unit: &str, auto_enable: bool) -> String {
    if auto_enable {
        format!(
            "if deb-systemd-helper debian-installed {unit}; then\n\
             \x20   # The following line should be removed in trixie or trixie+1\n\
             \x20   deb-systemd-helper unmask {unit} >/dev/null || true\n\
             \n\
             \x20   if deb-systemd-helper --quiet was-enabled {unit}; then\n\
             \x20       # Create new symlinks, if any.\n\
             \x20       deb-systemd-helper enable {unit} >/dev/null || true\n\
             \x20   fi\n\
             fi\n\
             \n\
             # Update the statefile to add new symlinks (if any), which need to be cleaned\n\
             # up on purge. Also remove old symlinks.\n\
             deb-systemd-helper update-state {unit} >/dev/null || true\n"
        )
    } else {
        format!(
            "# The following line should be removed in trixie or trixie+1\n\
             deb-systemd-helper unmask {unit} >/dev/null || true\n\
             \n\
             # was-enabled defaults to true, so new installations run enable.\n\
             if deb-systemd-helper --quiet was-enabled {unit}; then\n\
             \x20   # Enables the unit on first installation, creates new\n\
             \x20   # symlinks on upgrades if the unit file has changed.\n\
             \x20   deb-systemd-helper enable {unit} >/dev/null || true\n\
             else\n\
             \x20   # Update the statefile to add new symlinks (if any), which need to be\n\
             \x20   # cleaned up on purge. Also remove old symlinks.\n\
             \x20   deb-systemd-helper update-state {unit} >/dev/null || true\n\
             fi\n"
        )
    }
}

/// Emits enable, start, restart and purge handling via `deb-systemd-helper`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemdIntegrator;

impl ServiceIntegrator for SystemdIntegrator {
    fn integrate(
        &self,
        definitions: &[ServiceDefinition],
        ctx: &mut ServiceIntegrationContext<'_>,
    ) -> Result<()> {
        let mut stop_then_start = Vec::new();
        let mut on_purge = Vec::new();
        let mut start_on_install = Vec::new();
        let mut stop_on_removal = Vec::new();
        let mut on_upgrade: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for definition in definitions {
            let unit = definition.name.as_str();
            let had_install = matches!(
                definition.context,
                ServiceContext::Systemd {
                    had_install_section: true
                }
            );
            if had_install {
                ctx.maintscript.on_configure(&enable_snippet(
                    &shell_words(&[unit]),
                    definition.auto_enable_on_install,
                ))?;
                on_purge.push(unit);
            } else if definition.auto_enable_on_install {
                return Err(Error::PolicyConflict(format!(
                    "The service \"{}\" cannot be enabled under \"systemd\" as it has no \"[Install]\" \
                     section. Please correct {} so that it does not enable the service or does not \
                     apply to \"systemd\"",
                    unit, definition.definition_source
                )));
            }

            if definition.auto_start_on_install {
                start_on_install.push(unit);
                stop_on_removal.push(unit);
            }
            match definition.on_upgrade {
                ServiceUpgradeRule::StopThenStart => stop_then_start.push(unit),
                ServiceUpgradeRule::Restart | ServiceUpgradeRule::Reload => on_upgrade
                    .entry(definition.on_upgrade.as_str())
                    .or_default()
                    .push(unit),
                ServiceUpgradeRule::DoNothing => {}
            }
        }

        if !start_on_install.is_empty() || !on_upgrade.is_empty() {
            let mut body = format!(
                "if {} && {}; then\n    systemctl --system daemon-reload >/dev/null || true\n",
                EMPTY_DPKG_ROOT, SYSTEMD_IS_RUNNING
            );
            if !stop_then_start.is_empty() {
                body.push_str(&format!(
                    "    deb-systemd-invoke start {} >/dev/null || true\n",
                    shell_words(&stop_then_start)
                ));
            }
            if !start_on_install.is_empty() {
                body.push_str(&format!(
                    "    if [ -z \"$2\" ]; then\n        deb-systemd-invoke start {} >/dev/null || true\n    fi\n",
                    shell_words(&start_on_install)
                ));
            }
            if !on_upgrade.is_empty() {
                body.push_str("    if [ -n \"$2\" ]; then\n");
                for (action, units) in &on_upgrade {
                    body.push_str(&format!(
                        "        deb-systemd-invoke {} {} >/dev/null || true\n",
                        action,
                        shell_words(units)
                    ));
                }
                body.push_str("    fi\n");
            }
            body.push_str("fi\n");
            ctx.maintscript.on_configure(&body)?;
        }

        if !stop_then_start.is_empty() {
            ctx.maintscript.unconditionally_in_script(
                "preinst",
                &format!(
                    "if {} && [ \"$1\" = upgrade ] && {} ; then\n    deb-systemd-invoke stop {} >/dev/null || true\nfi\n",
                    EMPTY_DPKG_ROOT,
                    SYSTEMD_IS_RUNNING,
                    shell_words(&stop_then_start)
                ),
            )?;
        }

        if !stop_on_removal.is_empty() {
            ctx.maintscript.on_before_removal(&format!(
                "if {} && {} ; then\n    deb-systemd-invoke stop {} >/dev/null || true\nfi\n",
                EMPTY_DPKG_ROOT,
                SYSTEMD_IS_RUNNING,
                shell_words(&stop_on_removal)
            ))?;
        }

        if !on_purge.is_empty() {
            ctx.maintscript.on_purge(&format!(
                "if [ -x \"/usr/bin/deb-systemd-helper\" ]; then\n    deb-systemd-helper purge {} >/dev/null || true\nfi\n",
                shell_words(&on_purge)
            ))?;
        }

        ctx.maintscript.on_removed(&format!(
            "if {} ; then\n    systemctl --system daemon-reload >/dev/null || true\nfi\n",
            SYSTEMD_IS_RUNNING
        ))
    }
}
