//! Service drivers — backing services (databases, caches) attached to apps.

use rand::Rng;
use rand::distr::Alphanumeric;
use tracing::debug;

use crate::error::{DriverError, DriverResult};
use crate::spec::ServiceSpec;

/// Static information about a service type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescription {
    pub description: String,
    pub plans: Vec<String>,
    pub dashboard: String,
    pub docs: String,
}

/// Provisions service instances and hands back connection URIs.
pub trait ServiceDriver: Send + Sync {
    fn describe(&self) -> ServiceDescription;

    /// Create an instance and return its connection URI.
    fn build_service(&self, service: &ServiceSpec) -> DriverResult<String>;

    fn destroy_service(&self, service: &ServiceSpec) -> DriverResult<()>;

    /// Move an instance to a new spec (rename, plan change) and return
    /// its new connection URI.
    fn update_service(&self, old: &ServiceSpec, new: &ServiceSpec) -> DriverResult<String>;
}

/// Service driver that provisions nothing. Credentials are generated once
/// per driver instance.
#[derive(Debug)]
pub struct MockService {
    user: String,
    password: String,
}

impl MockService {
    pub fn new() -> Self {
        Self {
            user: random_token(16),
            password: random_token(16),
        }
    }

    fn uri(&self, name: &str) -> String {
        format!("mock://{}:{}@localhost:1337/{name}", self.user, self.password)
    }

    fn check_plan(&self, service: &ServiceSpec) -> DriverResult<()> {
        if !self.describe().plans.contains(&service.plan) {
            return Err(DriverError::InvalidPlan {
                kind: service.kind.clone(),
                plan: service.plan.clone(),
            });
        }
        Ok(())
    }
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceDriver for MockService {
    fn describe(&self) -> ServiceDescription {
        ServiceDescription {
            description: "Mock service for testing purposes".to_string(),
            plans: vec!["free".to_string(), "paid".to_string()],
            dashboard: "/services/mock/dashboard".to_string(),
            docs: "/services/mock/docs".to_string(),
        }
    }

    fn build_service(&self, service: &ServiceSpec) -> DriverResult<String> {
        self.check_plan(service)?;
        debug!(service = %service.name, app = %service.app, "mock service built");
        Ok(self.uri(&service.name))
    }

    fn destroy_service(&self, service: &ServiceSpec) -> DriverResult<()> {
        debug!(service = %service.name, app = %service.app, "mock service destroyed");
        Ok(())
    }

    fn update_service(&self, _old: &ServiceSpec, new: &ServiceSpec) -> DriverResult<String> {
        self.check_plan(new)?;
        Ok(self.uri(&new.name))
    }
}

/// Lowercase alphanumeric token.
fn random_token(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, plan: &str) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            app: "app1".to_string(),
            kind: "mock".to_string(),
            plan: plan.to_string(),
        }
    }

    #[test]
    fn uri_names_the_instance() {
        let driver = MockService::new();
        let uri = driver.build_service(&spec("db", "free")).unwrap();
        assert!(uri.starts_with("mock://"));
        assert!(uri.ends_with("@localhost:1337/db"));

        let updated = driver
            .update_service(&spec("db", "free"), &spec("db2", "paid"))
            .unwrap();
        assert!(updated.ends_with("/db2"));
    }

    #[test]
    fn unknown_plan_is_rejected() {
        let driver = MockService::new();
        assert!(matches!(
            driver.build_service(&spec("db", "gold")),
            Err(DriverError::InvalidPlan { .. })
        ));
    }

    #[test]
    fn tokens_are_lowercase_alphanumeric() {
        let token = random_token(16);
        assert_eq!(token.len(), 16);
        assert!(token.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }
}
