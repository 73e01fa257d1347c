// src/service/sysvinit.rs

//! `/etc/init.d` scripts and `update-rc.d`/`invoke-rc.d` snippets

use super::systemd::EMPTY_DPKG_ROOT;
use super::{
    ServiceDefinition, ServiceDetector, ServiceIntegrationContext, ServiceIntegrator,
    ServiceManager, ServiceUpgradeRule, shell_words,
};
use crate::error::Result;
use crate::filesystem::VfsTree;
use crate::package::BinaryPackage;

pub const MANAGER_NAME: &str = "sysvinit";

const INIT_DIR: &str = "/etc/init.d";
const DPKG_ROOT: &str = r#""${DPKG_ROOT}""#;

pub fn manager() -> ServiceManager {
    ServiceManager::new(MANAGER_NAME, SysvinitDetector, SysvinitIntegrator)
}

/// Every executable in `/etc/init.d` is a service
#[derive(Debug, Default, Clone, Copy)]
pub struct SysvinitDetector;

impl ServiceDetector for SysvinitDetector {
    fn detect(&self, tree: &VfsTree, _package: &BinaryPackage) -> Result<Vec<ServiceDefinition>> {
        let Some(dir_id) = tree.lookup(INIT_DIR) else {
            return Ok(Vec::new());
        };
        let mut definitions = Vec::new();
        for (name, id) in tree.children(dir_id) {
            let node = tree.get_node(id);
            if node.is_directory() || !node.is_executable() {
                continue;
            }
            definitions.push(ServiceDefinition::new(
                vec![name.to_string()],
                format!("{}/{}", INIT_DIR, name),
                MANAGER_NAME,
            )?);
        }
        Ok(definitions)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SysvinitIntegrator;

impl ServiceIntegrator for SysvinitIntegrator {
    fn integrate(
        &self,
        definitions: &[ServiceDefinition],
        ctx: &mut ServiceIntegrationContext<'_>,
    ) -> Result<()> {
        for definition in definitions {
            let script_path = shell_words(&[definition.path.to_string_lossy()]);
            let script_name = shell_words(&[definition.name.as_str()]);
            let update_rcd = if definition.auto_enable_on_install {
                "defaults"
            } else {
                "defaults-disabled"
            };

            ctx.maintscript.unconditionally_in_script(
                "preinst",
                &format!(
                    "if [ \"$1\" = \"install\" ] && [ -n \"$2\" ] && [ -x {root}{path} ] ; then\n    \
                     chmod +x {root}{path} >/dev/null || true\nfi\n",
                    root = DPKG_ROOT,
                    path = script_path
                ),
            )?;

            let mut body = format!(
                "if {} && [ -x {} ]; then\n    update-rc.d {} {} >/dev/null || exit 1\n",
                EMPTY_DPKG_ROOT, script_path, script_name, update_rcd
            );
            if definition.auto_start_on_install
                && definition.on_upgrade != ServiceUpgradeRule::StopThenStart
            {
                body.push_str(&format!(
                    "    if [ -z \"$2\" ]; then\n        \
                     invoke-rc.d --skip-systemd-native {} start >/dev/null || exit 1\n    fi\n",
                    script_name
                ));
            }
            match definition.on_upgrade {
                ServiceUpgradeRule::Restart | ServiceUpgradeRule::Reload => {
                    body.push_str(&format!(
                        "    if [ -n \"$2\" ]; then\n        \
                         invoke-rc.d --skip-systemd-native {} {} >/dev/null || exit 1\n    fi\n",
                        script_name, definition.on_upgrade
                    ));
                }
                ServiceUpgradeRule::StopThenStart => {
                    body.push_str(&format!(
                        "    invoke-rc.d --skip-systemd-native {} start >/dev/null || exit 1\n",
                        script_name
                    ));
                    ctx.maintscript.unconditionally_in_script(
                        "preinst",
                        &format!(
                            "if {} && [ \"$1\" = \"upgrade\" ] && [ -x {} ]; then\n    \
                             invoke-rc.d --skip-systemd-native {} stop > /dev/null || true\nfi\n",
                            EMPTY_DPKG_ROOT, script_path, script_name
                        ),
                    )?;
                }
                ServiceUpgradeRule::DoNothing => {}
            }
            body.push_str("fi\n");
            ctx.maintscript.on_configure(&body)?;

            ctx.maintscript.on_removed(&format!(
                "if [ -x {root}{path} ]; then\n    chmod -x {root}{path} > /dev/null || true\nfi\n",
                root = DPKG_ROOT,
                path = script_path
            ))?;
            ctx.maintscript.on_purge(&format!(
                "if {} ; then\n    update-rc.d {} remove >/dev/null\nfi\n",
                EMPTY_DPKG_ROOT, script_name
            ))?;
        }
        Ok(())
    }
}
