//! Backing services attached to apps.

use flotilla_state::Service;
use flotilla_tasks::Task;
use tracing::info;

use crate::controller::{Controller, validate_slug};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::events::log_event;
use crate::specs::service_spec;

const DEFAULT_PLAN: &str = "free";

impl Controller {
    /// Provision a service instance through its driver and attach it to
    /// the app. The name defaults to `{app}-{kind}`, the plan to `free`.
    pub async fn attach_service(
        &self,
        app_id: &str,
        kind: &str,
        name: Option<String>,
        plan: Option<String>,
    ) -> OrchestratorResult<Service> {
        let app = self.app(app_id)?;
        let driver = self.drivers.service(kind)?;
        let name = name.unwrap_or_else(|| format!("{app_id}-{kind}"));
        validate_slug("service", &name)?;
        if self.store.get_service(app_id, &name)?.is_some() {
            return Err(OrchestratorError::InvalidInput(format!(
                "service {name} already attached to {app_id}"
            )));
        }

        let mut service = Service {
            name,
            app: app_id.to_string(),
            owner: app.owner,
            kind: kind.to_string(),
            plan: plan.unwrap_or_else(|| DEFAULT_PLAN.to_string()),
            uri: None,
            created: 0,
        };
        let spec = service_spec(&service);
        let uri = self
            .executor
            .run_single(Task::new(service.name.clone(), move || {
                Ok(driver.build_service(&spec)?)
            }))
            .await
            .map_err(OrchestratorError::driver)?;
        service.uri = Some(uri);

        let service = self.store.insert_service(service)?;
        info!(app = %app_id, service = %service.name, kind, plan = %service.plan, "service attached");
        log_event(app_id, format_args!("Service {} attached", service.name));
        Ok(service)
    }

    /// Destroy a service instance and detach it.
    pub async fn detach_service(&self, app_id: &str, name: &str) -> OrchestratorResult<()> {
        let service = self.service(app_id, name)?;
        let driver = self.drivers.service(&service.kind)?;
        let spec = service_spec(&service);
        self.executor
            .run_single(Task::new(name, move || {
                driver.destroy_service(&spec)?;
                Ok(())
            }))
            .await
            .map_err(OrchestratorError::driver)?;
        self.store.delete_service(app_id, name)?;
        log_event(app_id, format_args!("Service {name} detached"));
        Ok(())
    }

    /// Move a service to a new plan. The driver returns the new URI.
    pub async fn update_service(
        &self,
        app_id: &str,
        name: &str,
        plan: &str,
    ) -> OrchestratorResult<Service> {
        let mut service = self.service(app_id, name)?;
        let driver = self.drivers.service(&service.kind)?;
        let old = service_spec(&service);
        service.plan = plan.to_string();
        let new = service_spec(&service);
        let uri = self
            .executor
            .run_single(Task::new(name, move || Ok(driver.update_service(&old, &new)?)))
            .await
            .map_err(OrchestratorError::driver)?;
        service.uri = Some(uri);
        self.store.update_service(&service)?;
        info!(app = %app_id, service = %name, %plan, "service updated");
        Ok(service)
    }

    pub fn list_services(&self, app_id: &str) -> OrchestratorResult<Vec<Service>> {
        self.app(app_id)?;
        Ok(self.store.list_services(app_id)?)
    }

    fn service(&self, app_id: &str, name: &str) -> OrchestratorResult<Service> {
        self.store
            .get_service(app_id, name)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("service {name} of {app_id}")))
    }
}
