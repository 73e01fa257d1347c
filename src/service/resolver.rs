// src/service/resolver.rs

//! Matching manifest service rules against detected definitions
//!
//! Definitions are nodes keyed by `(name, type, scope, manager)`. Every name a
//! definition answers to is an edge to its key, so a rule naming `foo` reaches
//! `foo.service` in systemd and `foo` in sysvinit alike, plus anything those
//! definitions alias in turn.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use tracing::{debug, info};

use super::{
    ServiceDefinition, ServiceIntegrationContext, ServiceKey, ServiceManagerRegistry, ServiceRule,
};
use crate::error::{Error, Result};
use crate::filesystem::VfsTree;
use crate::maintscript::{MaintscriptSnippets, SnippetOrder, TriggerSet};
use crate::package::BinaryPackage;

/// The alias graph of one binary package
pub struct ServiceAliasResolver<'r> {
    registry: &'r ServiceManagerRegistry,
    definitions: BTreeMap<ServiceKey, ServiceDefinition>,
    aliases: HashMap<String, BTreeSet<ServiceKey>>,
}

impl<'r> ServiceAliasResolver<'r> {
    pub fn new(registry: &'r ServiceManagerRegistry) -> Self {
        Self {
            registry,
            definitions: BTreeMap::new(),
            aliases: HashMap::new(),
        }
    }

    /// Run every registered detector over the package tree
    pub fn detect(
        registry: &'r ServiceManagerRegistry,
        tree: &VfsTree,
        package: &BinaryPackage,
    ) -> Result<Self> {
        let mut resolver = Self::new(registry);
        for manager in registry.iter() {
            let detected = manager.detector().detect(tree, package)?;
            debug!(
                "{} detected {} service(s) in {}",
                manager.name(),
                detected.len(),
                package.name()
            );
            for definition in detected {
                resolver.add_definition(manager.name(), definition)?;
            }
        }
        Ok(resolver)
    }

    /// Register a definition detected by `manager`
    pub fn add_definition(&mut self, manager: &str, definition: ServiceDefinition) -> Result<()> {
        if self.registry.get(manager).is_none() {
            return Err(Error::NotFound(format!("service manager {}", manager)));
        }
        let key = definition.key(manager);
        for name in definition.names() {
            self.aliases
                .entry(name.clone())
                .or_default()
                .insert(key.clone());
        }
        self.definitions.insert(key, definition);
        Ok(())
    }

    pub fn definitions(&self) -> impl Iterator<Item = (&ServiceKey, &ServiceDefinition)> {
        self.definitions.iter()
    }

    pub fn get(&self, key: &ServiceKey) -> Option<&ServiceDefinition> {
        self.definitions.get(key)
    }

    fn examined_managers(&self, rule: &ServiceRule) -> Vec<String> {
        let mut managers: Vec<String> = match &rule.service_managers {
            Some(explicit) => explicit.clone(),
            None => self.registry.names().into_iter().map(str::to_string).collect(),
        };
        managers.sort();
        managers.dedup();
        managers
    }

    fn alias_targets<'a>(
        &'a self,
        name: &'a str,
        rule: &'a ServiceRule,
    ) -> impl Iterator<Item = &'a ServiceKey> + 'a {
        self.aliases
            .get(name)
            .into_iter()
            .flatten()
            .filter(move |key| rule.matches(key))
    }

    /// Every definition the rule reaches through alias edges
    pub fn resolve(&self, rule: &ServiceRule) -> Result<BTreeSet<ServiceKey>> {
        let mut pending: VecDeque<&ServiceKey> = self.alias_targets(&rule.service, rule).collect();
        if pending.is_empty() {
            return Err(Error::UnknownService {
                managers: self.examined_managers(rule).join(", "),
                name: rule.service.clone(),
                type_of_service: rule.type_of_service.clone(),
                scope: rule.service_scope.clone(),
                source_location: rule.definition_source.clone(),
            });
        }

        let mut visited: HashSet<&ServiceKey> = pending.iter().copied().collect();
        let mut resolved = BTreeSet::new();
        while let Some(key) = pending.pop_front() {
            resolved.insert(key.clone());
            let Some(definition) = self.definitions.get(key) else {
                continue;
            };
            for name in definition.names() {
                for target in self.alias_targets(name, rule) {
                    if visited.insert(target) {
                        pending.push_back(target);
                    }
                }
            }
        }
        Ok(resolved)
    }

    /// Check every manager named by the rules is registered
    fn check_managers(&self, rules: &[ServiceRule]) -> Result<()> {
        for rule in rules {
            for manager in rule.service_managers.iter().flatten() {
                if self.registry.get(manager).is_none() {
                    return Err(Error::UnknownServiceManager {
                        manager: manager.clone(),
                        source_location: rule.definition_source.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Resolve one rule and overlay it on every definition it reaches
    pub fn apply_rule(&mut self, rule: &ServiceRule) -> Result<()> {
        self.check_managers(std::slice::from_ref(rule))?;
        let resolved = self.resolve(rule)?;

        let mut seen_managers = BTreeSet::new();
        for key in &resolved {
            let Some(current) = self.definitions.get(key) else {
                continue;
            };
            let updated = rule.apply_to(current)?;
            self.definitions.insert(key.clone(), updated);
            seen_managers.insert(key.manager.as_str());
        }

        if rule.service_managers.is_some() {
            let missing: Vec<String> = self
                .examined_managers(rule)
                .into_iter()
                .filter(|m| !seen_managers.contains(m.as_str()))
                .collect();
            if !missing.is_empty() {
                return Err(Error::MissingServiceManagers {
                    source_location: rule.definition_source.clone(),
                    missing: missing.join(", "),
                });
            }
        }
        debug!(
            "Rule {} applied to {} definition(s)",
            rule.definition_source,
            resolved.len()
        );
        Ok(())
    }

    /// Apply every rule in order; unknown managers are rejected up front
    pub fn apply_rules(&mut self, rules: &[ServiceRule]) -> Result<()> {
        self.check_managers(rules)?;
        for rule in rules {
            self.apply_rule(rule)?;
        }
        Ok(())
    }

    /// Hand each manager its final definitions, in registration order
    pub fn integrate(
        &self,
        package: &BinaryPackage,
        snippets: &mut MaintscriptSnippets,
        triggers: &mut TriggerSet,
    ) -> Result<()> {
        for manager in self.registry.iter() {
            let definitions: Vec<ServiceDefinition> = self
                .definitions
                .iter()
                .filter(|(key, _)| key.manager == manager.name())
                .map(|(_, definition)| definition.clone())
                .collect();
            if definitions.is_empty() {
                continue;
            }
            info!(
                "Integrating {} service(s) of {} with {}",
                definitions.len(),
                package.name(),
                manager.name()
            );
            let mut ctx = ServiceIntegrationContext {
                package,
                maintscript: snippets.accessor(
                    format!("debasm (service manager: {})", manager.name()),
                    SnippetOrder::Service,
                ),
                triggers: &mut *triggers,
            };
            manager.integrator().integrate(&definitions, &mut ctx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{ServiceDetector, ServiceIntegrator, ServiceManager};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct NoDetection;

    impl ServiceDetector for NoDetection {
        fn detect(&self, _: &VfsTree, _: &BinaryPackage) -> Result<Vec<ServiceDefinition>> {
            Ok(Vec::new())
        }
    }

    #[derive(Clone, Default)]
    struct Recorder(Rc<RefCell<Vec<Vec<String>>>>);

    impl ServiceIntegrator for Recorder {
        fn integrate(
            &self,
            definitions: &[ServiceDefinition],
            ctx: &mut ServiceIntegrationContext<'_>,
        ) -> Result<()> {
            self.0
                .borrow_mut()
                .push(definitions.iter().map(|d| d.name.clone()).collect());
            ctx.maintscript
                .unconditionally_in_script("postinst", "true\n")
        }
    }

    fn registry(names: &[&str], recorder: &Recorder) -> ServiceManagerRegistry {
        let mut registry = ServiceManagerRegistry::new();
        for name in names {
            registry
                .register(ServiceManager::new(*name, NoDetection, recorder.clone()))
                .unwrap();
        }
        registry
    }

    fn definition(names: &[&str], manager: &str) -> ServiceDefinition {
        ServiceDefinition::new(
            names.iter().map(|n| n.to_string()).collect(),
            format!("/svc/{}", names[0]),
            manager,
        )
        .unwrap()
    }

    fn key(name: &str, manager: &str) -> ServiceKey {
        ServiceKey {
            name: name.into(),
            service_type: "service".into(),
            scope: "system".into(),
            manager: manager.into(),
        }
    }

    #[test]
    fn test_resolves_across_managers() {
        let recorder = Recorder::default();
        let registry = registry(&["systemd", "sysvinit"], &recorder);
        let mut resolver = ServiceAliasResolver::new(&registry);
        resolver
            .add_definition("systemd", definition(&["foo.service", "foo"], "systemd"))
            .unwrap();
        resolver
            .add_definition("sysvinit", definition(&["foo"], "sysvinit"))
            .unwrap();
        resolver
            .add_definition("sysvinit", definition(&["unrelated"], "sysvinit"))
            .unwrap();

        let resolved = resolver.resolve(&ServiceRule::new("foo", "rule")).unwrap();
        assert_eq!(
            resolved,
            BTreeSet::from([key("foo.service", "systemd"), key("foo", "sysvinit")])
        );
    }

    #[test]
    fn test_alias_cycles_terminate() {
        let recorder = Recorder::default();
        let registry = registry(&["a", "b"], &recorder);
        let mut resolver = ServiceAliasResolver::new(&registry);
        resolver
            .add_definition("a", definition(&["x", "y"], "a"))
            .unwrap();
        resolver
            .add_definition("b", definition(&["y", "z", "x"], "b"))
            .unwrap();
        resolver
            .add_definition("a", definition(&["z", "x"], "a"))
            .unwrap();

        let from_x = resolver.resolve(&ServiceRule::new("x", "rule")).unwrap();
        let from_z = resolver.resolve(&ServiceRule::new("z", "rule")).unwrap();
        assert_eq!(from_x.len(), 3);
        assert_eq!(from_x, from_z);
    }

    #[test]
    fn test_unknown_service_lists_managers() {
        let recorder = Recorder::default();
        let registry = registry(&["systemd", "sysvinit"], &recorder);
        let resolver = ServiceAliasResolver::new(&registry);

        let err = resolver
            .resolve(&ServiceRule::new("ghost", "debian/manifest:services[2]"))
            .unwrap_err();
        match &err {
            Error::UnknownService {
                managers,
                name,
                source_location,
                ..
            } => {
                assert_eq!(managers, "systemd, sysvinit");
                assert_eq!(name, "ghost");
                assert_eq!(source_location, "debian/manifest:services[2]");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_type_and_scope_filter() {
        let recorder = Recorder::default();
        let registry = registry(&["systemd"], &recorder);
        let mut resolver = ServiceAliasResolver::new(&registry);
        resolver
            .add_definition(
                "systemd",
                definition(&["foo.socket", "foo"], "systemd").with_type("socket"),
            )
            .unwrap();

        assert!(resolver.resolve(&ServiceRule::new("foo", "rule")).is_err());
        let mut socket_rule = ServiceRule::new("foo", "rule");
        socket_rule.type_of_service = "socket".into();
        assert_eq!(resolver.resolve(&socket_rule).unwrap().len(), 1);
    }

    #[test]
    fn test_explicit_managers_must_all_match() {
        let recorder = Recorder::default();
        let registry = registry(&["systemd", "sysvinit"], &recorder);
        let mut resolver = ServiceAliasResolver::new(&registry);
        resolver
            .add_definition("systemd", definition(&["foo.service", "foo"], "systemd"))
            .unwrap();

        let rule = ServiceRule::new("foo", "rule").with_managers(["systemd", "sysvinit"]);
        match resolver.apply_rule(&rule).unwrap_err() {
            Error::MissingServiceManagers { missing, .. } => assert_eq!(missing, "sysvinit"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_manager_in_rule() {
        let recorder = Recorder::default();
        let registry = registry(&["systemd"], &recorder);
        let mut resolver = ServiceAliasResolver::new(&registry);
        let rule = ServiceRule::new("foo", "rule").with_managers(["runit"]);
        assert!(matches!(
            resolver.apply_rules(&[rule]),
            Err(Error::UnknownServiceManager { .. })
        ));
    }

    #[test]
    fn test_rules_apply_and_integrate_per_manager() {
        let recorder = Recorder::default();
        let registry = registry(&["systemd", "sysvinit"], &recorder);
        let mut resolver = ServiceAliasResolver::new(&registry);
        resolver
            .add_definition("systemd", definition(&["foo.service", "foo"], "systemd"))
            .unwrap();
        resolver
            .add_definition("systemd", definition(&["bar.service", "bar"], "systemd"))
            .unwrap();
        resolver
            .add_definition("sysvinit", definition(&["foo"], "sysvinit"))
            .unwrap();

        resolver
            .apply_rules(&[ServiceRule::new("foo", "rule").with_start_on_install(false)])
            .unwrap();
        let systemd_foo = resolver.get(&key("foo.service", "systemd")).unwrap();
        assert_eq!(systemd_foo.name, "foo");
        assert!(!systemd_foo.auto_start_on_install);
        assert!(resolver.get(&key("bar.service", "systemd")).unwrap().plugin_provided);

        let package = BinaryPackage::new(
            crate::deb822::Stanza::new()
                .with("Package", "foo")
                .with("Architecture", "any"),
            crate::package::ArchTable::native("amd64", "64", "x86_64-linux-gnu"),
        )
        .unwrap();
        let mut snippets = MaintscriptSnippets::new();
        let mut triggers = TriggerSet::new();
        resolver
            .integrate(&package, &mut snippets, &mut triggers)
            .unwrap();

        assert_eq!(
            *recorder.0.borrow(),
            vec![vec!["bar.service".to_string(), "foo".to_string()], vec!["foo".to_string()]]
        );
        assert!(snippets
            .render("postinst")
            .unwrap()
            .contains("# Snippet source: debasm (service manager: systemd)"));
    }
}
