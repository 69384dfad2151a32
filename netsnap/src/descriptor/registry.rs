//! Registry of loaded drivers, looked up by name.

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use log::{debug, warn};

use super::definition::DriverDescriptor;
use super::loader::DriverLoader;
use crate::config::ScriptLimits;
use crate::error::DescriptorError;
use crate::script::snmp_auto_discover;

/// Read-only set of drivers shared by all tasks.
#[derive(Debug, Default, Clone)]
pub struct DriverRegistry {
    drivers: IndexMap<String, Arc<DriverDescriptor>>,
}

impl DriverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every driver file of a directory.
    pub fn load_dir(dir: &Path, limits: &ScriptLimits) -> Result<Self, DescriptorError> {
        let mut registry = Self::new();
        for driver in DriverLoader::new(limits.clone()).load_dir(dir)? {
            if let Err(e) = registry.register(driver) {
                warn!("{}", e);
            }
        }
        Ok(registry)
    }

    /// Add a driver.
    pub fn register(&mut self, driver: DriverDescriptor) -> Result<Arc<DriverDescriptor>, DescriptorError> {
        let name = driver.name().to_string();
        if self.drivers.contains_key(&name) {
            return Err(DescriptorError::AlreadyRegistered(name));
        }
        let driver = Arc::new(driver);
        self.drivers.insert(name, driver.clone());
        Ok(driver)
    }

    /// Get a driver by name.
    pub fn get(&self, name: &str) -> Result<Arc<DriverDescriptor>, DescriptorError> {
        self.drivers
            .get(name)
            .cloned()
            .ok_or_else(|| DescriptorError::NotFound(name.to_string()))
    }

    /// Check if a driver is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.drivers.contains_key(name)
    }

    /// List all registered driver names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.drivers.keys().map(String::as_str)
    }

    /// Number of registered drivers.
    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    /// Whether no driver is registered.
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// First driver, in registration order, whose `snmpAutoDiscover`
    /// accepts this SNMP identity.
    ///
    /// Drivers without the function are skipped; a failing function counts
    /// as a refusal.
    pub fn discover(
        &self,
        sys_object_id: &str,
        sys_desc: &str,
        limits: &ScriptLimits,
    ) -> Option<Arc<DriverDescriptor>> {
        for driver in self.drivers.values() {
            if !driver.has_function("snmpAutoDiscover") {
                continue;
            }
            match snmp_auto_discover(driver, limits, sys_object_id, sys_desc) {
                Ok(true) => {
                    debug!("Device {} is handled by driver '{}'", sys_object_id, driver.name());
                    return Some(driver.clone());
                }
                Ok(false) => {}
                Err(e) => warn!("snmpAutoDiscover of driver '{}' failed: {}", driver.name(), e),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(name: &str, oid_prefix: &str) -> DriverDescriptor {
        let source = format!(
            r#"
            fn snapshot(cli, device, config) {{}}
            fn snmpAutoDiscover(oid, desc) {{ oid.starts_with("{oid_prefix}") }}
            #{{
                info: #{{ name: "{name}" }},
                cli: #{{
                    ssh: #{{ macros: [ #{{ name: "exec", options: ["exec"], target: "exec" }} ] }},
                    exec: #{{ prompt: `>$` }},
                }},
            }}
            "#
        );
        DriverLoader::default().load_str(name, &source).unwrap()
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = DriverRegistry::new();
        registry.register(driver("JunOS", "1.3.6.1.4.1.2636.")).unwrap();
        assert!(registry.contains("JunOS"));
        assert_eq!(registry.get("JunOS").unwrap().name(), "JunOS");
        assert!(matches!(registry.get("IOS"), Err(DescriptorError::NotFound(_))));
        assert!(matches!(
            registry.register(driver("JunOS", "1.3.6.1.4.1.2636.")),
            Err(DescriptorError::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn test_discover() {
        let mut registry = DriverRegistry::new();
        registry.register(driver("JunOS", "1.3.6.1.4.1.2636.")).unwrap();
        registry.register(driver("CiscoIOS12", "1.3.6.1.4.1.9.")).unwrap();
        let limits = ScriptLimits::default();

        let found = registry.discover("1.3.6.1.4.1.9.1.1208", "Cisco IOS", &limits).unwrap();
        assert_eq!(found.name(), "CiscoIOS12");
        assert!(registry.discover("1.3.6.1.4.1.30065.1", "Arista", &limits).is_none());
        assert_eq!(registry.names().collect::<Vec<_>>(), ["JunOS", "CiscoIOS12"]);
    }

    #[test]
    fn test_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("cisco_ios.rhai"),
            include_str!("../../drivers/cisco_ios.rhai"),
        )
        .unwrap();
        let registry = DriverRegistry::load_dir(dir.path(), &ScriptLimits::default()).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("CiscoIOS12").unwrap().has_function("analyzeSyslog"));
    }
}
