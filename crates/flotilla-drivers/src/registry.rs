//! Driver registry — type key to driver instance, built once at startup.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::error::{DriverError, DriverResult};
use crate::provider::{MockProvider, ProviderDriver, StaticProvider};
use crate::service::{MockService, ServiceDriver};

#[derive(Default, Clone)]
pub struct DriverRegistry {
    providers: HashMap<String, Arc<dyn ProviderDriver>>,
    services: HashMap<String, Arc<dyn ServiceDriver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in drivers named in `providers` and
    /// `services`. Unknown names are rejected.
    pub fn builtin(providers: &[String], services: &[String]) -> DriverResult<Self> {
        let mut registry = Self::new();
        for key in providers {
            let driver: Arc<dyn ProviderDriver> = match key.as_str() {
                "mock" => Arc::new(MockProvider::new()),
                "static" => Arc::new(StaticProvider),
                _ => {
                    return Err(DriverError::NotFound {
                        family: "provider",
                        key: key.clone(),
                    });
                }
            };
            registry.register_provider(key, driver);
        }
        for key in services {
            let driver: Arc<dyn ServiceDriver> = match key.as_str() {
                "mock" => Arc::new(MockService::new()),
                _ => {
                    return Err(DriverError::NotFound {
                        family: "service",
                        key: key.clone(),
                    });
                }
            };
            registry.register_service(key, driver);
        }
        info!(
            providers = ?registry.provider_kinds(),
            services = ?registry.service_kinds(),
            "driver registry built"
        );
        Ok(registry)
    }

    pub fn register_provider(&mut self, key: impl Into<String>, driver: Arc<dyn ProviderDriver>) {
        self.providers.insert(key.into(), driver);
    }

    pub fn register_service(&mut self, key: impl Into<String>, driver: Arc<dyn ServiceDriver>) {
        self.services.insert(key.into(), driver);
    }

    pub fn provider(&self, key: &str) -> DriverResult<Arc<dyn ProviderDriver>> {
        self.providers
            .get(key)
            .cloned()
            .ok_or_else(|| DriverError::NotFound {
                family: "provider",
                key: key.to_string(),
            })
    }

    pub fn service(&self, key: &str) -> DriverResult<Arc<dyn ServiceDriver>> {
        self.services
            .get(key)
            .cloned()
            .ok_or_else(|| DriverError::NotFound {
                family: "service",
                key: key.to_string(),
            })
    }

    /// Registered provider keys, sorted.
    pub fn provider_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.providers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Registered service keys, sorted.
    pub fn service_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.services.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registers_named_drivers() {
        let registry =
            DriverRegistry::builtin(&["static".to_string(), "mock".to_string()], &["mock".to_string()])
                .unwrap();
        assert_eq!(registry.provider_kinds(), vec!["mock", "static"]);
        assert!(registry.service("mock").is_ok());
    }

    #[test]
    fn unknown_key_is_not_found() {
        let registry = DriverRegistry::new();
        let err = registry.provider("ec2").err().unwrap();
        assert_eq!(err.to_string(), "no provider driver registered for type ec2");

        assert!(DriverRegistry::builtin(&["ec2".to_string()], &[]).is_err());
    }
}
