//! Async drivers: pump a `Manager` and a set of `ClientExecutor`s on tokio.
//!
//! Both sides stay single-threaded cooperative state machines; the drivers
//! only wait for the next due timer or the next inbound message.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::error::LibraryError;
use crate::executor::{CapabilityProbe, ChannelStatus, ClientExecutor};
use crate::manager::Manager;
use crate::model::graph::Graph;
use crate::model::property::PropertyValue;
use crate::plugin::registry::SharedRegistry;
use crate::protocol::{ControlMessage, StatusEvent};
use crate::routing::audience::{Audience, ClientInfo};
use crate::runtime::overrides::OverrideKind;
use crate::transport::ChannelTransport;
use crate::util::clock::{SharedClock, SystemClock};

/// Wait used when nothing is scheduled.
const IDLE_WAIT_MS: u64 = 100;

/// Editor-side requests to a running manager.
#[derive(Debug, Clone)]
pub enum ManagerCommand {
    SetGraph(Graph),
    SetAudience(Audience),
    DeployLoop {
        loop_id: String,
        root_id: String,
        client_id: String,
    },
    StopLoop(String),
    RemoveLoop(String),
    SetOverride {
        node_id: String,
        kind: OverrideKind,
        port_id: String,
        value: PropertyValue,
    },
    RemoveOverride {
        node_id: String,
        kind: OverrideKind,
        port_id: String,
    },
    StopAll,
}

fn wait_for(next_due: Option<u64>, now_ms: u64) -> Duration {
    Duration::from_millis(next_due.map_or(IDLE_WAIT_MS, |due| due.saturating_sub(now_ms)))
}

fn apply_command(manager: &mut Manager, command: ManagerCommand) {
    let result = match command {
        ManagerCommand::SetGraph(graph) => {
            manager.set_graph(graph);
            Ok(())
        }
        ManagerCommand::SetAudience(audience) => {
            manager.set_audience(audience);
            Ok(())
        }
        ManagerCommand::DeployLoop {
            loop_id,
            root_id,
            client_id,
        } => manager.deploy_loop(&loop_id, &root_id, &client_id),
        ManagerCommand::StopLoop(loop_id) => manager.stop_loop(&loop_id),
        ManagerCommand::RemoveLoop(loop_id) => manager.remove_loop(&loop_id),
        ManagerCommand::SetOverride {
            node_id,
            kind,
            port_id,
            value,
        } => manager
            .send_node_override(&node_id, kind, &port_id, value)
            .map(|_| ()),
        ManagerCommand::RemoveOverride {
            node_id,
            kind,
            port_id,
        } => manager
            .remove_node_override(&node_id, kind, &port_id)
            .map(|_| ()),
        ManagerCommand::StopAll => {
            manager.stop_all();
            Ok(())
        }
    };
    if let Err(e) = result {
        warn!("Manager command failed: {}", e);
    }
}

/// Runs the manager until shutdown is signalled, then hands it back.
pub async fn run_manager(
    mut manager: Manager,
    clock: SharedClock,
    mut commands: UnboundedReceiver<ManagerCommand>,
    mut statuses: UnboundedReceiver<(String, StatusEvent)>,
    mut shutdown: watch::Receiver<bool>,
) -> Manager {
    manager.start();
    loop {
        let next = manager.poll();
        let wait = wait_for(next, clock.now_ms());
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            Some(command) = commands.recv() => apply_command(&mut manager, command),
            Some((client, event)) = statuses.recv() => {
                info!("{} -> {:?} {}", client, event.event, event.loop_id.as_deref().unwrap_or("-"));
                manager.on_status(&client, event);
            }
            _ = tokio::time::sleep(wait) => {}
        }
    }
    debug!("Manager driver stopped");
    manager
}

/// Runs one executor until its channel closes or shutdown is signalled.
pub async fn run_executor(
    mut executor: ClientExecutor,
    clock: SharedClock,
    mut inbox: UnboundedReceiver<ControlMessage>,
    mut shutdown: watch::Receiver<bool>,
) -> ClientExecutor {
    loop {
        let next = executor.poll();
        let wait = wait_for(next, clock.now_ms());
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            message = inbox.recv() => match message {
                Some(message) => executor.handle(message),
                None => break,
            },
            _ = tokio::time::sleep(wait) => {}
        }
    }
    debug!("Executor {} driver stopped", executor.client_id());
    executor
}

/// A manager plus in-process executors wired over channels.
pub struct Session {
    commands: UnboundedSender<ManagerCommand>,
    shutdown: watch::Sender<bool>,
    manager: JoinHandle<Manager>,
    executors: Vec<JoinHandle<ClientExecutor>>,
}

impl Session {
    /// Must be called inside a tokio runtime.
    pub fn spawn(
        config: &AppConfig,
        registry: SharedRegistry,
        clients: &[ClientInfo],
        capabilities: Arc<dyn CapabilityProbe>,
    ) -> Self {
        let clock: SharedClock = Arc::new(SystemClock::new());
        let transport = Arc::new(ChannelTransport::new());
        let (status_tx, status_rx) = unbounded_channel();
        let (command_tx, command_rx) = unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let executors = clients
            .iter()
            .map(|client| {
                let inbox = transport.connect(&client.id);
                let executor = ClientExecutor::new(
                    &client.id,
                    registry.clone(),
                    clock.clone(),
                    config.executor.clone(),
                    capabilities.clone(),
                    Arc::new(ChannelStatus::new(&client.id, status_tx.clone())),
                );
                tokio::spawn(run_executor(
                    executor,
                    clock.clone(),
                    inbox,
                    shutdown_rx.clone(),
                ))
            })
            .collect();

        let mut manager = Manager::new(config.manager.clone(), registry, clock.clone(), transport);
        manager.set_audience(Audience::from_clients(clients.iter().cloned()));
        let manager = tokio::spawn(run_manager(manager, clock, command_rx, status_rx, shutdown_rx));

        Self {
            commands: command_tx,
            shutdown: shutdown_tx,
            manager,
            executors,
        }
    }

    pub fn send(&self, command: ManagerCommand) -> Result<(), LibraryError> {
        self.commands
            .send(command)
            .map_err(|_| LibraryError::runtime("manager driver is gone"))
    }

    /// Signals shutdown and waits for every driver to hand its state back.
    pub async fn shutdown(self) -> Result<(Manager, Vec<ClientExecutor>), LibraryError> {
        // Receivers may already be gone; the join below reports real failures.
        let _ = self.shutdown.send(true);
        let manager = self
            .manager
            .await
            .map_err(|e| LibraryError::runtime(format!("manager task failed: {}", e)))?;
        let mut executors = Vec::with_capacity(self.executors.len());
        for handle in self.executors {
            executors.push(
                handle
                    .await
                    .map_err(|e| LibraryError::runtime(format!("executor task failed: {}", e)))?,
            );
        }
        Ok((manager, executors))
    }
}

fn parse_audience(spec: &str) -> Vec<ClientInfo> {
    spec.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| match entry.strip_suffix(":display") {
            Some(id) => ClientInfo::display(id),
            None => ClientInfo::new(entry),
        })
        .collect()
}

/// Command-line entry: `<graph.json> <client[:display],...> [seconds]`.
pub fn run(args: Vec<String>) -> Result<(), LibraryError> {
    let (Some(graph_path), Some(audience)) = (args.get(1), args.get(2)) else {
        return Err(LibraryError::validation(
            "usage: patchflow-cli <graph.json> <client[:display],...> [seconds]",
        ));
    };
    let seconds: u64 = match args.get(3) {
        Some(s) => s
            .parse()
            .map_err(|_| LibraryError::validation(format!("not a number of seconds: {}", s)))?,
        None => 5,
    };

    let graph: Graph = serde_json::from_str(&std::fs::read_to_string(graph_path)?)?;
    let clients = parse_audience(audience);
    let config = AppConfig::load_or_default();
    let registry: SharedRegistry = Arc::new(crate::plugin::registry::NodeRegistry::with_builtins());

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let session = Session::spawn(
            &config,
            registry,
            &clients,
            Arc::new(crate::executor::StaticCapabilities::all()),
        );
        session.send(ManagerCommand::SetGraph(graph))?;
        tokio::time::sleep(Duration::from_secs(seconds)).await;
        session.send(ManagerCommand::StopAll)?;
        tokio::time::sleep(Duration::from_millis(IDLE_WAIT_MS)).await;

        let (manager, executors) = session.shutdown().await?;
        if let Some(error) = manager.last_error() {
            println!("last error: {}", error);
        }
        for executor in &executors {
            println!(
                "{}: {:?} {}",
                executor.client_id(),
                executor.state(),
                executor.current_id().unwrap_or("-")
            );
        }
        Ok::<(), LibraryError>(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audience_spec_marks_displays() {
        let clients = parse_audience("c1, wall:display,,c2");
        assert_eq!(
            clients,
            vec![
                ClientInfo::new("c1"),
                ClientInfo::display("wall"),
                ClientInfo::new("c2")
            ]
        );
    }

    #[test]
    fn idle_wait_without_timers() {
        assert_eq!(wait_for(None, 10), Duration::from_millis(IDLE_WAIT_MS));
        assert_eq!(wait_for(Some(5), 10), Duration::ZERO);
        assert_eq!(wait_for(Some(40), 10), Duration::from_millis(30));
    }
}
