//! Users, keys, providers and flavors.

use std::collections::BTreeMap;

use flotilla_state::{Flavor, Provider, User};
use flotilla_tasks::Task;
use serde_json::{Value, json};
use tracing::info;

use crate::controller::{Controller, validate_slug};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::specs::user_spec;

impl Controller {
    /// Register one provider per enabled provider driver for `owner`, along
    /// with each driver's default flavors. Existing records are kept.
    pub async fn seed(&self, owner: &str) -> OrchestratorResult<()> {
        let mut providers = 0;
        let mut flavors = 0;
        for kind in self.drivers.provider_kinds() {
            if self.store.get_provider(owner, &kind)?.is_none() {
                self.store.insert_provider(Provider {
                    id: kind.clone(),
                    owner: owner.to_string(),
                    kind: kind.clone(),
                    creds: BTreeMap::new(),
                    created: 0,
                })?;
                providers += 1;
            }
            for seed in self.drivers.provider(&kind)?.seed_flavors() {
                if self.store.get_flavor(owner, &seed.id)?.is_some() {
                    continue;
                }
                self.store.insert_flavor(Flavor {
                    id: seed.id,
                    owner: owner.to_string(),
                    provider: kind.clone(),
                    params: seed.params,
                    created: 0,
                })?;
                flavors += 1;
            }
        }

        let user = match self.store.get_user(owner)? {
            Some(user) => user,
            None => self.store.put_user(User {
                username: owner.to_string(),
                keys: BTreeMap::new(),
                created: 0,
            })?,
        };
        self.publish_user(&user).await?;
        info!(%owner, providers, flavors, "user seeded");
        Ok(())
    }

    pub fn create_provider(
        &self,
        owner: &str,
        id: &str,
        kind: &str,
        creds: BTreeMap<String, String>,
    ) -> OrchestratorResult<Provider> {
        validate_slug("provider", id)?;
        self.drivers.provider(kind)?;
        Ok(self.store.insert_provider(Provider {
            id: id.to_string(),
            owner: owner.to_string(),
            kind: kind.to_string(),
            creds,
            created: 0,
        })?)
    }

    pub fn create_flavor(
        &self,
        owner: &str,
        id: &str,
        provider: &str,
        params: BTreeMap<String, String>,
    ) -> OrchestratorResult<Flavor> {
        validate_slug("flavor", id)?;
        if self.store.get_provider(owner, provider)?.is_none() {
            return Err(OrchestratorError::NotFound(format!("provider {provider}")));
        }
        Ok(self.store.insert_flavor(Flavor {
            id: id.to_string(),
            owner: owner.to_string(),
            provider: provider.to_string(),
            params,
            created: 0,
        })?)
    }

    /// Add (or replace) a named SSH public key, creating the user if needed.
    pub async fn add_key(
        &self,
        username: &str,
        name: &str,
        public_key: &str,
    ) -> OrchestratorResult<User> {
        let mut user = self.store.get_user(username)?.unwrap_or_else(|| User {
            username: username.to_string(),
            keys: BTreeMap::new(),
            created: 0,
        });
        user.keys.insert(name.to_string(), public_key.to_string());
        let user = self.store.put_user(user)?;
        self.publish_user(&user).await?;
        info!(%username, key = %name, "key added");
        Ok(user)
    }

    pub async fn remove_key(&self, username: &str, name: &str) -> OrchestratorResult<User> {
        let mut user = self.user(username)?;
        if user.keys.remove(name).is_none() {
            return Err(OrchestratorError::NotFound(format!("key {name} of {username}")));
        }
        let user = self.store.put_user(user)?;
        self.publish_user(&user).await?;
        info!(%username, key = %name, "key removed");
        Ok(user)
    }

    /// Purge a user from CM and delete the record.
    pub async fn delete_user(&self, username: &str) -> OrchestratorResult<()> {
        let user = self.user(username)?;
        let cm = self.cm.clone();
        let spec = user_spec(&user);
        self.executor
            .run_single(Task::new(username, move || {
                cm.purge_user(&spec)?;
                Ok(())
            }))
            .await
            .map_err(OrchestratorError::driver)?;
        self.store.delete_user(username)?;
        info!(%username, "user deleted");
        Ok(())
    }

    async fn publish_user(&self, user: &User) -> OrchestratorResult<Value> {
        let databag = json!({
            "username": user.username,
            "keys": user.keys,
        });
        let cm = self.cm.clone();
        let spec = user_spec(user);
        let bag = databag.clone();
        self.executor
            .run_single(Task::new(user.username.clone(), move || {
                cm.publish_user(&spec, &bag)?;
                Ok(())
            }))
            .await
            .map_err(OrchestratorError::driver)?;
        Ok(databag)
    }

    fn user(&self, username: &str) -> OrchestratorResult<User> {
        self.store
            .get_user(username)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("user {username}")))
    }
}
