//! Releases: pinning a build and a config version.

use std::collections::BTreeMap;

use flotilla_state::{Build, Config, Release};
use tracing::info;

use crate::controller::Controller;
use crate::error::{OrchestratorError, OrchestratorResult};

impl Controller {
    /// Cut a new release for `app_id` from the latest one, swapping in
    /// `config` and/or `build` when given.
    ///
    /// Build config keys the chosen config does not set are merged into a
    /// fresh config version first.
    pub(crate) fn new_release(
        &self,
        app_id: &str,
        user: &str,
        config: Option<Config>,
        build: Option<Build>,
    ) -> OrchestratorResult<Release> {
        let last = self
            .store
            .latest_release(app_id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("release for app {app_id}")))?;

        let mut config = match config {
            Some(c) => c,
            None => self
                .store
                .get_config(app_id, last.config_version)?
                .ok_or_else(|| {
                    OrchestratorError::NotFound(format!("config v{} of {app_id}", last.config_version))
                })?,
        };
        let build = match build {
            Some(b) => Some(b),
            None => match last.build {
                Some(created) => self.store.get_build(app_id, created)?,
                None => None,
            },
        };

        if let Some(build) = &build {
            let missing: BTreeMap<String, String> = build
                .config
                .iter()
                .filter(|(k, _)| !config.values.contains_key(*k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if !missing.is_empty() {
                let mut values = missing;
                values.extend(config.values.clone());
                config = self.insert_next_config(app_id, user, values)?;
            }
        }

        let previous_config = if config.version != last.config_version {
            self.store.get_config(app_id, last.config_version)?
        } else {
            None
        };
        let deployed = build
            .as_ref()
            .filter(|b| Some(b.created) != last.build && !b.sha.is_empty())
            .map(|b| (b.owner.as_str(), b.sha.as_str()));
        let config_change = (config.version != last.config_version).then(|| ConfigChange {
            owner: &config.owner,
            new: &config.values,
            old: previous_config.as_ref().map(|c| &c.values),
        });
        let version = last.version + 1;
        let summary = summarize(user, version, deployed, config_change);

        let release = self.store.insert_release(Release {
            app: app_id.to_string(),
            owner: user.to_string(),
            version,
            summary,
            config_version: config.version,
            build: build.as_ref().map(|b| b.created),
            created: 0,
        })?;
        info!(app = %app_id, version = release.version, summary = %release.summary, "release created");
        Ok(release)
    }

    /// Store `values` as the app's next config version.
    pub(crate) fn insert_next_config(
        &self,
        app_id: &str,
        owner: &str,
        values: BTreeMap<String, String>,
    ) -> OrchestratorResult<Config> {
        let version = self
            .store
            .latest_config(app_id)?
            .map_or(1, |c| c.version + 1);
        Ok(self.store.insert_config(Config {
            app: app_id.to_string(),
            owner: owner.to_string(),
            version,
            values,
            created: 0,
        })?)
    }
}

/// A config version change between two releases.
pub(crate) struct ConfigChange<'a> {
    pub owner: &'a str,
    pub new: &'a BTreeMap<String, String>,
    /// `None` for the first release.
    pub old: Option<&'a BTreeMap<String, String>>,
}

/// Human-readable release summary.
///
/// `deployed` is `(owner, sha)` when the build changed, `config` is set
/// when the config version changed.
pub(crate) fn summarize(
    owner: &str,
    version: u32,
    deployed: Option<(&str, &str)>,
    config: Option<ConfigChange<'_>>,
) -> String {
    let mut summary = String::new();
    if let Some((who, sha)) = deployed {
        let short: String = sha.chars().take(7).collect();
        summary.push_str(&format!("{who} deployed {short}"));
    }

    if let Some(change) = config {
        let empty = BTreeMap::new();
        let old = change.old.unwrap_or(&empty);
        let added: Vec<&str> = change
            .new
            .keys()
            .filter(|k| !old.contains_key(*k))
            .map(String::as_str)
            .collect();
        let changed: Vec<&str> = change
            .new
            .iter()
            .filter(|(k, v)| old.get(*k).is_some_and(|o| o != *v))
            .map(|(k, _)| k.as_str())
            .collect();
        let deleted: Vec<&str> = old
            .keys()
            .filter(|k| !change.new.contains_key(*k))
            .map(String::as_str)
            .collect();

        let parts: Vec<String> = [("added", added), ("changed", changed), ("deleted", deleted)]
            .into_iter()
            .filter(|(_, keys)| !keys.is_empty())
            .map(|(verb, keys)| format!("{verb} {}", keys.join(", ")))
            .collect();
        if !parts.is_empty() {
            if !summary.is_empty() {
                summary.push_str(" and ");
            }
            summary.push_str(&format!("{} {}", change.owner, parts.join(", ")));
        }
    }

    if summary.is_empty() {
        summary = if version == 1 {
            format!("{owner} created the initial release")
        } else {
            format!("{owner} changed nothing")
        };
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn initial_release() {
        let new = BTreeMap::new();
        let change = ConfigChange {
            owner: "alice",
            new: &new,
            old: None,
        };
        assert_eq!(
            summarize("alice", 1, None, Some(change)),
            "alice created the initial release"
        );
    }

    #[test]
    fn deploy_uses_short_sha() {
        assert_eq!(
            summarize("alice", 2, Some(("bob", "abc1234def5678")), None),
            "bob deployed abc1234"
        );
    }

    #[test]
    fn config_diff_lists_each_kind() {
        let old = map(&[("B", "1"), ("C", "1")]);
        let new = map(&[("A", "1"), ("B", "2")]);
        let change = ConfigChange {
            owner: "alice",
            new: &new,
            old: Some(&old),
        };
        assert_eq!(
            summarize("alice", 3, None, Some(change)),
            "alice added A, changed B, deleted C"
        );
    }

    #[test]
    fn deploy_and_config_joined() {
        let old = BTreeMap::new();
        let new = map(&[("PORT", "5000")]);
        let change = ConfigChange {
            owner: "alice",
            new: &new,
            old: Some(&old),
        };
        assert_eq!(
            summarize("alice", 2, Some(("alice", "0123456789")), Some(change)),
            "alice deployed 0123456 and alice added PORT"
        );
    }

    #[test]
    fn no_change() {
        let values = map(&[("A", "1")]);
        let change = ConfigChange {
            owner: "alice",
            new: &values,
            old: Some(&values),
        };
        assert_eq!(summarize("alice", 4, None, Some(change)), "alice changed nothing");
        assert_eq!(summarize("alice", 4, None, None), "alice changed nothing");
    }
}
