//! Subcommand handlers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use flotilla_drivers::{
    CommandOutput, ConfigManager, DirectoryConfigManager, DirectorySettings, DriverRegistry,
    MockConfigManager,
};
use flotilla_orchestrator::{Controller, LayerRequest, LogSettings, PushRequest};
use flotilla_state::StateStore;
use flotilla_tasks::TaskExecutor;
use serde::Serialize;
use tracing::info;

use crate::config::{CmDriver, FlotillaConfig};
use crate::{AppAction, Command, FormationAction, KeyAction, LayerAction, NodeAction, ServiceAction};

/// Open the store and assemble the controller described by `config`.
pub fn build_controller(config: &FlotillaConfig) -> anyhow::Result<Controller> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("create data dir {}", config.data_dir.display()))?;
    let db_path = config.data_dir.join("flotilla.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let drivers = DriverRegistry::builtin(&config.providers.enabled, &config.services.enabled)?;

    let cm: Arc<dyn ConfigManager> = match config.config_management.driver {
        CmDriver::Mock => Arc::new(MockConfigManager::new()),
        CmDriver::Directory => {
            let cm = &config.config_management;
            Arc::new(DirectoryConfigManager::new(DirectorySettings {
                databag_dir: config.databag_dir(),
                converge_command: cm.converge_command.clone(),
                run_command: cm.run_command.clone(),
                controller_command: cm.controller_command.clone(),
            })?)
        }
    };

    let executor = TaskExecutor::new(
        Duration::from_secs(config.tasks.timeout_secs),
        config.tasks.max_parallel,
    );
    let logs = LogSettings {
        dir: config.logs.dir.clone(),
        lines: config.logs.lines,
    };
    Ok(Controller::new(store, Arc::new(drivers), cm, executor).with_logs(logs))
}

pub async fn dispatch(controller: &Controller, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Seed { owner } => {
            controller.seed(&owner).await?;
            print_json(&controller.store().list_flavors(&owner)?)
        }
        Command::Formation { action } => formation(controller, action).await,
        Command::Layer { action } => layer(controller, action).await,
        Command::Node { action } => node(controller, action).await,
        Command::App { action } => app(controller, action).await,
        Command::Service { action } => service(controller, action).await,
        Command::Key { action } => key(controller, action).await,
    }
}

async fn formation(controller: &Controller, action: FormationAction) -> anyhow::Result<()> {
    match action {
        FormationAction::Create { id, owner, domain } => {
            print_json(&controller.create_formation(&id, &owner, domain).await?)
        }
        FormationAction::Converge { id, controller: with_controller } => {
            print_json(&controller.converge_formation(&id, with_controller).await?)
        }
        FormationAction::Balance { id } => {
            let changed = controller.balance_formation(&id).await?;
            print_json(&serde_json::json!({ "changed": changed }))
        }
        FormationAction::Scale { id, layers } => {
            let desired = parse_counts(&layers)?;
            print_json(&controller.scale_layers(&id, &desired).await?)
        }
        FormationAction::Databag { id } => print_json(&controller.calculate_formation(&id)?),
        FormationAction::Destroy { id } => {
            controller.destroy_formation(&id).await?;
            println!("destroyed {id}");
            Ok(())
        }
    }
}

async fn layer(controller: &Controller, action: LayerAction) -> anyhow::Result<()> {
    match action {
        LayerAction::Create {
            formation,
            id,
            owner,
            flavor,
            runtime,
            proxy,
            ssh_username,
            ssh_port,
        } => {
            let layer = controller
                .create_layer(
                    &formation,
                    LayerRequest {
                        id,
                        owner,
                        flavor,
                        proxy,
                        runtime,
                        ssh_username,
                        ssh_port,
                        ..Default::default()
                    },
                )
                .await?;
            println!("created layer {} ({})", layer.id, layer.ssh_public_key);
            Ok(())
        }
        LayerAction::Build { formation, id } => {
            controller.build_layer(&formation, &id).await?;
            println!("built layer {id}");
            Ok(())
        }
        LayerAction::Destroy { formation, id } => {
            controller.destroy_layer(&formation, &id).await?;
            println!("destroyed layer {id}");
            Ok(())
        }
    }
}

async fn node(controller: &Controller, action: NodeAction) -> anyhow::Result<()> {
    match action {
        NodeAction::Create {
            formation,
            layer,
            fqdn,
        } => print_json(&controller.create_node(&formation, &layer, fqdn).await?),
        NodeAction::Build { formation, id } => {
            print_json(&controller.build_node(&formation, &id).await?)
        }
        NodeAction::Destroy { formation, id } => {
            controller.destroy_node(&formation, &id).await?;
            println!("destroyed node {id}");
            Ok(())
        }
        NodeAction::Converge { formation, id } => {
            print_output(controller.converge_node(&formation, &id).await?)
        }
        NodeAction::Run {
            formation,
            id,
            command,
        } => print_output(controller.run_node(&formation, &id, &command).await?),
    }
}

async fn app(controller: &Controller, action: AppAction) -> anyhow::Result<()> {
    match action {
        AppAction::Create {
            id,
            owner,
            formation,
        } => print_json(&controller.create_app(&id, &owner, &formation).await?),
        AppAction::Scale { id, types } => {
            let requested = parse_counts(&types)?;
            let changed = controller.scale_app(&id, &requested).await?;
            print_json(&serde_json::json!({ "changed": changed }))
        }
        AppAction::Push {
            id,
            user,
            sha,
            image,
            url,
        } => {
            let push = PushRequest {
                app: id,
                username: user,
                sha,
                image,
                url,
                ..Default::default()
            };
            print_json(&controller.push(push).await?)
        }
        AppAction::Config { id, user, values } => {
            let changes = parse_config(&values)?;
            print_json(&controller.set_config(&id, &user, &changes).await?)
        }
        AppAction::Releases { id } => print_json(&controller.store().list_releases(&id)?),
        AppAction::Run { id, command } => print_output(controller.run_app(&id, &command).await?),
        AppAction::Logs { id, lines } => {
            print!("{}", controller.app_logs(&id, lines)?);
            Ok(())
        }
        AppAction::Converge { id } => print_json(&controller.converge_app(&id).await?),
        AppAction::Databag { id } => print_json(&controller.calculate_app(&id)?),
        AppAction::Destroy { id } => {
            controller.destroy_app(&id).await?;
            println!("destroyed {id}");
            Ok(())
        }
    }
}

async fn service(controller: &Controller, action: ServiceAction) -> anyhow::Result<()> {
    match action {
        ServiceAction::Attach {
            app,
            kind,
            name,
            plan,
        } => print_json(&controller.attach_service(&app, &kind, name, plan).await?),
        ServiceAction::Update { app, name, plan } => {
            print_json(&controller.update_service(&app, &name, &plan).await?)
        }
        ServiceAction::Detach { app, name } => {
            controller.detach_service(&app, &name).await?;
            println!("detached {name}");
            Ok(())
        }
        ServiceAction::List { app } => print_json(&controller.list_services(&app)?),
    }
}

async fn key(controller: &Controller, action: KeyAction) -> anyhow::Result<()> {
    match action {
        KeyAction::Add {
            user,
            name,
            public_key,
        } => print_json(&controller.add_key(&user, &name, &public_key).await?),
        KeyAction::Remove { user, name } => print_json(&controller.remove_key(&user, &name).await?),
    }
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print command output and fail on a non-zero exit.
fn print_output(out: CommandOutput) -> anyhow::Result<()> {
    print!("{}", out.output);
    if !out.is_success() {
        bail!("command exited {}", out.exit_code);
    }
    Ok(())
}

/// Parse `name=count` pairs.
fn parse_counts(pairs: &[String]) -> anyhow::Result<BTreeMap<String, i64>> {
    pairs
        .iter()
        .map(|pair| {
            let (name, count) = pair
                .split_once('=')
                .with_context(|| format!("expected name=count, got {pair:?}"))?;
            let count = count
                .parse::<i64>()
                .with_context(|| format!("invalid count in {pair:?}"))?;
            Ok((name.to_string(), count))
        })
        .collect()
}

/// Parse `KEY=value` pairs; an empty value unsets the key.
fn parse_config(pairs: &[String]) -> anyhow::Result<BTreeMap<String, Option<String>>> {
    pairs
        .iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .with_context(|| format!("expected KEY=value, got {pair:?}"))?;
            if key.is_empty() {
                bail!("empty key in {pair:?}");
            }
            let value = (!value.is_empty()).then(|| value.to_string());
            Ok((key.to_string(), value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn counts_parse() {
        let counts = parse_counts(&args(&["web=2", "worker=0"])).unwrap();
        assert_eq!(counts.get("web"), Some(&2));
        assert_eq!(counts.get("worker"), Some(&0));
        // Negative counts are left to the controller to reject.
        assert_eq!(parse_counts(&args(&["web=-1"])).unwrap().get("web"), Some(&-1));
        assert!(parse_counts(&args(&["web"])).is_err());
        assert!(parse_counts(&args(&["web=lots"])).is_err());
    }

    #[test]
    fn config_pairs_parse() {
        let changes = parse_config(&args(&["A=1", "B=", "URL=http://x/?a=b"])).unwrap();
        assert_eq!(changes.get("A"), Some(&Some("1".to_string())));
        assert_eq!(changes.get("B"), Some(&None));
        assert_eq!(changes.get("URL"), Some(&Some("http://x/?a=b".to_string())));
        assert!(parse_config(&args(&["=1"])).is_err());
    }

    #[tokio::test]
    async fn logs_come_from_the_configured_dir() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("logs");
        std::fs::create_dir_all(&log_dir).unwrap();
        std::fs::write(log_dir.join("shop.log"), "a\nb\nc\n").unwrap();
        let mut config = FlotillaConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        config.logs.dir = log_dir;
        config.logs.lines = 2;

        let controller = build_controller(&config).unwrap();
        controller.seed("alice").await.unwrap();
        controller.create_formation("f1", "alice", None).await.unwrap();
        controller.create_app("shop", "alice", "f1").await.unwrap();
        assert_eq!(controller.app_logs("shop", None).unwrap(), "b\nc\n");
    }

    #[tokio::test]
    async fn controller_from_config_runs_a_formation() {
        let dir = tempfile::tempdir().unwrap();
        let config = FlotillaConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let controller = build_controller(&config).unwrap();
        controller.seed("alice").await.unwrap();
        controller.create_formation("f1", "alice", None).await.unwrap();

        assert!(dir.path().join("flotilla.redb").exists());
        assert!(dir.path().join("databags/formations/f1.json").exists());
        assert_eq!(controller.store().list_flavors("alice").unwrap().len(), 3);
    }
}
