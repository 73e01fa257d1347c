// src/service/mod.rs

//! Service manager integration
//!
//! Each service manager contributes a [`ServiceDetector`] that finds service
//! definitions in a package tree and a [`ServiceIntegrator`] that turns the
//! final definitions into maintainer script snippets and triggers. Manifest
//! rules are matched against detected definitions by [`ServiceAliasResolver`].

pub mod resolver;
pub mod systemd;
pub mod sysvinit;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::filesystem::VfsTree;
use crate::maintscript::{MaintscriptAccessor, TriggerSet};
use crate::package::BinaryPackage;

pub use resolver::ServiceAliasResolver;

/// What happens to a running service when its package is upgraded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceUpgradeRule {
    DoNothing,
    Reload,
    Restart,
    StopThenStart,
}

impl ServiceUpgradeRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DoNothing => "do-nothing",
            Self::Reload => "reload",
            Self::Restart => "restart",
            Self::StopThenStart => "stop-then-start",
        }
    }
}

impl fmt::Display for ServiceUpgradeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceUpgradeRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "do-nothing" => Ok(Self::DoNothing),
            "reload" => Ok(Self::Reload),
            "restart" => Ok(Self::Restart),
            "stop-then-start" => Ok(Self::StopThenStart),
            other => Err(Error::ParseError(format!("unknown upgrade rule: {}", other))),
        }
    }
}

/// Manager-specific details carried by a definition
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ServiceContext {
    #[default]
    None,
    Systemd {
        had_install_section: bool,
    },
}

/// Identity of a definition within one manager
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceKey {
    pub name: String,
    pub service_type: String,
    pub scope: String,
    pub manager: String,
}

/// A service as detected by a manager, possibly adjusted by a manifest rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    /// Name used in generated snippets
    pub name: String,
    /// Every name the service answers to; the first is the detected name
    names: Vec<String>,
    /// Installed path of the file defining the service
    pub path: PathBuf,
    pub service_type: String,
    pub scope: String,
    pub auto_enable_on_install: bool,
    pub auto_start_on_install: bool,
    pub on_upgrade: ServiceUpgradeRule,
    /// Where the current settings come from
    pub definition_source: String,
    /// Still carries the detector's defaults
    pub plugin_provided: bool,
    pub context: ServiceContext,
}

impl ServiceDefinition {
    /// A detected definition with the usual defaults
    pub fn new(names: Vec<String>, path: impl Into<PathBuf>, manager: &str) -> Result<Self> {
        let name = names
            .first()
            .cloned()
            .ok_or_else(|| Error::ParseError("a service needs at least one name".into()))?;
        Ok(Self {
            name,
            names,
            path: path.into(),
            service_type: "service".to_string(),
            scope: "system".to_string(),
            auto_enable_on_install: true,
            auto_start_on_install: true,
            on_upgrade: ServiceUpgradeRule::Restart,
            definition_source: format!("Auto-detected by {}", manager),
            plugin_provided: true,
            context: ServiceContext::None,
        })
    }

    pub fn with_type(mut self, service_type: impl Into<String>) -> Self {
        self.service_type = service_type.into();
        self
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    pub fn with_auto_enable(mut self, enable: bool) -> Self {
        self.auto_enable_on_install = enable;
        self
    }

    pub fn with_auto_start(mut self, start: bool) -> Self {
        self.auto_start_on_install = start;
        self
    }

    pub fn with_upgrade_rule(mut self, rule: ServiceUpgradeRule) -> Self {
        self.on_upgrade = rule;
        self
    }

    pub fn with_context(mut self, context: ServiceContext) -> Self {
        self.context = context;
        self
    }

    /// Every name the service answers to, detected name first
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Key under which `manager` registered this definition
    pub fn key(&self, manager: &str) -> ServiceKey {
        ServiceKey {
            name: self.names[0].clone(),
            service_type: self.service_type.clone(),
            scope: self.scope.clone(),
            manager: manager.to_string(),
        }
    }
}

fn default_type() -> String {
    "service".to_string()
}

fn default_scope() -> String {
    "system".to_string()
}

/// A manifest request to adjust how a service is handled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServiceRule {
    pub service: String,
    #[serde(default = "default_type")]
    pub type_of_service: String,
    #[serde(default = "default_scope")]
    pub service_scope: String,
    #[serde(default)]
    pub enable_on_install: Option<bool>,
    #[serde(default)]
    pub start_on_install: Option<bool>,
    #[serde(default)]
    pub on_upgrade: Option<ServiceUpgradeRule>,
    /// Restrict the rule to these managers; each must match
    #[serde(default)]
    pub service_managers: Option<Vec<String>>,
    /// Where the rule was written, for error messages
    #[serde(default)]
    pub definition_source: String,
}

impl ServiceRule {
    pub fn new(service: impl Into<String>, definition_source: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            type_of_service: default_type(),
            service_scope: default_scope(),
            enable_on_install: None,
            start_on_install: None,
            on_upgrade: None,
            service_managers: None,
            definition_source: definition_source.into(),
        }
    }

    pub fn with_managers<I, S>(mut self, managers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.service_managers = Some(managers.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_enable_on_install(mut self, enable: bool) -> Self {
        self.enable_on_install = Some(enable);
        self
    }

    pub fn with_start_on_install(mut self, start: bool) -> Self {
        self.start_on_install = Some(start);
        self
    }

    pub fn with_upgrade_rule(mut self, rule: ServiceUpgradeRule) -> Self {
        self.on_upgrade = Some(rule);
        self
    }

    pub fn applies_to_manager(&self, manager: &str) -> bool {
        self.service_managers
            .as_ref()
            .is_none_or(|managers| managers.iter().any(|m| m == manager))
    }

    /// Whether `key` is within the rule's manager, type and scope filter
    pub fn matches(&self, key: &ServiceKey) -> bool {
        self.applies_to_manager(&key.manager)
            && key.service_type == self.type_of_service
            && key.scope == self.service_scope
    }

    /// Overlay the rule on a detected definition
    pub fn apply_to(&self, definition: &ServiceDefinition) -> Result<ServiceDefinition> {
        if !definition.plugin_provided {
            return Err(Error::PolicyConflict(format!(
                "Conflicting definitions related to {} (type: {}, scope: {}). First definition at {}, \
                 the second at {}. If they are for different service managers, you can often avoid \
                 this problem by explicitly defining which service managers are applicable to each rule.",
                self.service,
                self.type_of_service,
                self.service_scope,
                definition.definition_source,
                self.definition_source
            )));
        }
        let mut updated = definition.clone();
        updated.definition_source = self.definition_source.clone();
        updated.plugin_provided = false;
        if self.service != updated.name && updated.names.contains(&self.service) {
            updated.name = self.service.clone();
        }
        if let Some(enable) = self.enable_on_install {
            updated.auto_enable_on_install = enable;
        }
        if let Some(start) = self.start_on_install {
            updated.auto_start_on_install = start;
        }
        if let Some(rule) = self.on_upgrade {
            updated.on_upgrade = rule;
        }
        Ok(updated)
    }
}

/// What integrators may touch while generating snippets
pub struct ServiceIntegrationContext<'a> {
    pub package: &'a BinaryPackage,
    pub maintscript: MaintscriptAccessor<'a>,
    pub triggers: &'a mut TriggerSet,
}

/// Finds service definitions in a package tree
pub trait ServiceDetector {
    fn detect(&self, tree: &VfsTree, package: &BinaryPackage) -> Result<Vec<ServiceDefinition>>;
}

/// Emits maintainer script snippets for a manager's final definitions
pub trait ServiceIntegrator {
    fn integrate(
        &self,
        definitions: &[ServiceDefinition],
        ctx: &mut ServiceIntegrationContext<'_>,
    ) -> Result<()>;
}

/// A registered service manager
pub struct ServiceManager {
    name: String,
    detector: Box<dyn ServiceDetector>,
    integrator: Box<dyn ServiceIntegrator>,
}

impl ServiceManager {
    pub fn new(
        name: impl Into<String>,
        detector: impl ServiceDetector + 'static,
        integrator: impl ServiceIntegrator + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            detector: Box::new(detector),
            integrator: Box::new(integrator),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn detector(&self) -> &dyn ServiceDetector {
        self.detector.as_ref()
    }

    pub fn integrator(&self) -> &dyn ServiceIntegrator {
        self.integrator.as_ref()
    }
}

impl fmt::Debug for ServiceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceManager")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Service managers in registration order
#[derive(Debug, Default)]
pub struct ServiceManagerRegistry {
    managers: Vec<ServiceManager>,
}

impl ServiceManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `systemd` and `sysvinit`
    pub fn with_builtin() -> Self {
        Self {
            managers: vec![systemd::manager(), sysvinit::manager()],
        }
    }

    pub fn register(&mut self, manager: ServiceManager) -> Result<()> {
        if self.get(manager.name()).is_some() {
            return Err(Error::AlreadyExists(format!(
                "service manager {}",
                manager.name()
            )));
        }
        self.managers.push(manager);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ServiceManager> {
        self.managers.iter().find(|m| m.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServiceManager> {
        self.managers.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.managers.iter().map(ServiceManager::name).collect()
    }
}

/// Render words for a shell command line
pub(crate) fn shell_words<S: AsRef<str>>(words: &[S]) -> String {
    words
        .iter()
        .map(|w| crate::process::escape_shell(w.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detected() -> ServiceDefinition {
        ServiceDefinition::new(
            vec!["foo.service".into(), "foo".into(), "bar.service".into()],
            "/usr/lib/systemd/system/foo.service",
            "systemd",
        )
        .unwrap()
    }

    #[test]
    fn test_definition_needs_a_name() {
        let err = ServiceDefinition::new(Vec::new(), "/etc/init.d/foo", "sysvinit").unwrap_err();
        assert!(matches!(err, Error::ParseError(_)));

        let definition = detected();
        assert_eq!(definition.names()[0], "foo.service");
        assert_eq!(definition.key("systemd").name, "foo.service");
    }

    #[test]
    fn test_rule_overrides() {
        let rule = ServiceRule::new("foo", "debian/manifest:services[0]")
            .with_enable_on_install(false)
            .with_start_on_install(false)
            .with_upgrade_rule(ServiceUpgradeRule::StopThenStart);
        let updated = rule.apply_to(&detected()).unwrap();

        assert_eq!(updated.name, "foo");
        assert!(!updated.auto_enable_on_install);
        assert!(!updated.auto_start_on_install);
        assert_eq!(updated.on_upgrade, ServiceUpgradeRule::StopThenStart);
        assert!(!updated.plugin_provided);
        assert_eq!(updated.definition_source, "debian/manifest:services[0]");
        assert_eq!(updated.key("systemd").name, "foo.service");
    }

    #[test]
    fn test_second_rule_conflicts() {
        let first = ServiceRule::new("foo", "first");
        let second = ServiceRule::new("foo", "second");
        let updated = first.apply_to(&detected()).unwrap();
        let err = second.apply_to(&updated).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("First definition at first"));
        assert!(message.contains("the second at second"));
    }

    #[test]
    fn test_rule_from_toml() {
        let rule: ServiceRule = toml::from_str(
            "service = \"foo\"\non-upgrade = \"stop-then-start\"\nservice-managers = [\"systemd\"]\n",
        )
        .unwrap();
        assert_eq!(rule.type_of_service, "service");
        assert_eq!(rule.service_scope, "system");
        assert_eq!(rule.on_upgrade, Some(ServiceUpgradeRule::StopThenStart));
        assert!(rule.applies_to_manager("systemd"));
        assert!(!rule.applies_to_manager("sysvinit"));
    }

    #[test]
    fn test_upgrade_rule_parse() {
        assert_eq!(
            "reload".parse::<ServiceUpgradeRule>().unwrap(),
            ServiceUpgradeRule::Reload
        );
        assert!("bounce".parse::<ServiceUpgradeRule>().is_err());
    }

    #[test]
    fn test_registry_rejects_duplicates() {
        let mut registry = ServiceManagerRegistry::with_builtin();
        assert_eq!(registry.names(), vec!["systemd", "sysvinit"]);
        assert!(registry.register(systemd::manager()).is_err());
    }
}
