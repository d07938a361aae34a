//! Manager-side deployment: reconcile, bypass, routing, loops, overrides.

use std::collections::BTreeMap;
use std::sync::Arc;

use patchflow::control::{ErrorClass, HostSource};
use patchflow::deploy::topology_signature;
use patchflow::executor::{ClientExecutor, ExecutorState, RecordingStatus, StaticCapabilities};
use patchflow::manager::RecordingVisualSink;
use patchflow::protocol::{ControlMessage, OverrideEntry};
use patchflow::routing::{Audience, ClientInfo, ResolveOptions, resolve_targets, select_clients, stable_hash};
use patchflow::transport::RecordingTransport;
use patchflow::util::clock::ManualClock;
use patchflow::{
    Connection, ExecutorConfig, Graph, Manager, ManagerConfig, NodeInstance, NodeRegistry,
    OverrideKind, PortRef, PropertyValue, SharedRegistry, StatusEvent, StatusKind,
};

struct Fixture {
    manager: Manager,
    transport: Arc<RecordingTransport>,
    clock: Arc<ManualClock>,
    registry: SharedRegistry,
}

fn fixture(clients: &[&str]) -> Fixture {
    let clock = Arc::new(ManualClock::new(1_000));
    let transport = Arc::new(RecordingTransport::new());
    let registry: SharedRegistry = Arc::new(NodeRegistry::with_builtins());
    let mut manager = Manager::new(
        ManagerConfig::default(),
        registry.clone(),
        clock.clone(),
        transport.clone(),
    );
    manager.set_audience(audience(clients));
    Fixture {
        manager,
        transport,
        clock,
        registry,
    }
}

fn audience(ids: &[&str]) -> Audience {
    Audience::from_clients(ids.iter().map(|id| ClientInfo::new(id)))
}

/// osc -> delay1 -> delay2 -> out, and out's deploy command to the first client.
fn chain_graph() -> Graph {
    let mut g = Graph::new();
    g.add_node(NodeInstance::new_with_id("osc", "audio.oscillator"));
    g.add_node(NodeInstance::new_with_id("delay1", "audio.delay"));
    g.add_node(NodeInstance::new_with_id("delay2", "audio.delay"));
    g.add_node(NodeInstance::new_with_id("out", "audio.out"));
    g.add_node(NodeInstance::new_with_id("sel", "route.clients").with_config("index", 0i64));
    g.add_connection(Connection::between(("osc", "out"), ("delay1", "in")));
    g.add_connection(Connection::between(("delay1", "out"), ("delay2", "in")));
    g.add_connection(Connection::between(("delay2", "out"), ("out", "in")));
    g.add_connection(Connection::between(("out", "cmd"), ("sel", "cmd")));
    g
}

fn names(commands: &[(String, ControlMessage)]) -> Vec<(String, &'static str)> {
    commands.iter().map(|(c, m)| (c.clone(), m.name())).collect()
}

fn set_enabled(manager: &mut Manager, node_id: &str, enabled: bool) {
    manager.edit_graph(|g| {
        if let Some(node) = g.get_node_mut(node_id) {
            node.enabled = enabled;
        }
    });
}

#[test]
fn second_pass_without_changes_sends_nothing() {
    let mut f = fixture(&["c1", "c2"]);
    f.manager.set_graph(chain_graph());

    let first = f.manager.reconcile_now().unwrap();
    assert_eq!(
        names(&first.commands),
        vec![("c1".to_string(), "deploy"), ("c1".to_string(), "start")]
    );
    let record = f.manager.patches().record("c1").unwrap();
    assert!(record.patch_id.starts_with("patch-"));
    assert_eq!(record.patch_id.len(), "patch-".len() + 12);

    let second = f.manager.reconcile_now().unwrap();
    assert!(second.is_noop());
}

#[test]
fn disabling_a_bypassable_node_only_sends_an_override() {
    let mut f = fixture(&["c1"]);
    f.manager.set_graph(chain_graph());
    f.manager.reconcile_now().unwrap();
    let patch_id = f.manager.patches().record("c1").unwrap().patch_id.clone();

    set_enabled(&mut f.manager, "delay1", false);
    let outcome = f.manager.reconcile_now().unwrap();
    assert_eq!(names(&outcome.commands), vec![("c1".to_string(), "override-set")]);
    match &outcome.commands[0].1 {
        ControlMessage::OverrideSet(payload) => {
            assert_eq!(payload.loop_id, patch_id);
            let entry = payload.entries().next().unwrap().unwrap();
            assert_eq!(entry.node_id, "delay1");
            assert_eq!(entry.kind, OverrideKind::Config);
            assert_eq!(entry.value, Some(PropertyValue::Boolean(true)));
            assert_eq!(entry.ttl_ms, None);
        }
        other => panic!("expected override-set, got {}", other.name()),
    }

    set_enabled(&mut f.manager, "delay1", true);
    let outcome = f.manager.reconcile_now().unwrap();
    assert_eq!(names(&outcome.commands), vec![("c1".to_string(), "override-remove")]);
    assert_eq!(f.manager.patches().record("c1").unwrap().patch_id, patch_id);
}

#[test]
fn disabling_a_non_bypassable_node_redeploys() {
    let mut f = fixture(&["c1"]);
    f.manager.set_graph(chain_graph());
    f.manager.reconcile_now().unwrap();
    let before = f.manager.patches().record("c1").unwrap().clone();

    set_enabled(&mut f.manager, "osc", false);
    let outcome = f.manager.reconcile_now().unwrap();
    assert_eq!(
        names(&outcome.commands),
        vec![
            ("c1".to_string(), "stop"),
            ("c1".to_string(), "remove"),
            ("c1".to_string(), "deploy"),
            ("c1".to_string(), "start"),
        ]
    );
    let after = f.manager.patches().record("c1").unwrap();
    assert_ne!(after.signature, before.signature);
    assert!(!after.node_ids.contains("osc"));
}

#[test]
fn pass_prepared_before_an_edit_is_discarded() {
    let mut f = fixture(&["c1"]);
    f.manager.set_graph(chain_graph());

    let pass = f.manager.begin_reconcile();
    set_enabled(&mut f.manager, "osc", false);
    let outcome = f.manager.finish_reconcile(pass).unwrap();

    assert!(outcome.is_none());
    assert!(f.transport.sent().is_empty());
    assert!(f.manager.patches().records().is_empty());
    assert!(f.manager.is_reconcile_pending());
}

#[test]
fn aggregator_does_not_change_routing() {
    let registry = NodeRegistry::with_builtins();
    let clients = audience(&["c1", "c2", "c3"]);
    let selector = || {
        NodeInstance::new_with_id("sel", "route.clients")
            .with_config("mode", "range")
            .with_config("count", 2i64)
    };

    let mut direct = Graph::new();
    direct.add_node(NodeInstance::new_with_id("out", "audio.out"));
    direct.add_node(selector());
    direct.add_connection(Connection::between(("out", "cmd"), ("sel", "cmd")));

    let mut via_aggregate = Graph::new();
    via_aggregate.add_node(NodeInstance::new_with_id("out", "audio.out"));
    via_aggregate.add_node(NodeInstance::new_with_id("agg", "route.aggregate"));
    via_aggregate.add_node(selector());
    via_aggregate.add_connection(Connection::between(("out", "cmd"), ("agg", "a")));
    via_aggregate.add_connection(Connection::between(("agg", "cmd"), ("sel", "cmd")));

    let a = resolve_targets(&direct, &registry, &clients, ResolveOptions::default()).unwrap();
    let b = resolve_targets(&via_aggregate, &registry, &clients, ResolveOptions::default()).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.clients().collect::<Vec<_>>(), vec!["c1", "c2"]);
}

#[test]
fn random_selection_is_stable() {
    let registry = NodeRegistry::with_builtins();
    let clients = audience(&["a", "b", "c", "d", "e"]);
    let mut g = Graph::new();
    g.add_node(NodeInstance::new_with_id("out", "audio.out"));
    g.add_node(
        NodeInstance::new_with_id("sel", "route.clients")
            .with_config("mode", "random")
            .with_config("count", 2i64),
    );
    g.add_connection(Connection::between(("out", "cmd"), ("sel", "cmd")));

    let config = &g.get_node("sel").unwrap().config;
    let picked = select_clients("sel", config, &clients);
    assert_eq!(picked, select_clients("sel", config, &clients));

    let mut by_hash: Vec<(String, &str)> = ["a", "b", "c", "d", "e"]
        .into_iter()
        .map(|id| (stable_hash("sel", id), id))
        .collect();
    by_hash.sort();
    let expected: Vec<String> = by_hash.iter().take(2).map(|(_, id)| id.to_string()).collect();
    assert_eq!(picked, expected);

    let first = resolve_targets(&g, &registry, &clients, ResolveOptions::default()).unwrap();
    let second = resolve_targets(&g, &registry, &clients, ResolveOptions::default()).unwrap();
    assert_eq!(first.key, second.key);
}

#[test]
fn signature_ignores_authoring_order() {
    let a = chain_graph();
    let mut b = Graph::new();
    for node in a.nodes.iter().rev() {
        b.add_node(node.clone());
    }
    for conn in a.connections.iter().rev() {
        b.add_connection(Connection::new(conn.source.clone(), conn.target.clone()));
    }
    assert_eq!(topology_signature(&a), topology_signature(&b));

    b.add_connection(Connection::between(("osc", "out"), ("delay2", "in")));
    assert_ne!(topology_signature(&a), topology_signature(&b));
}

#[test]
fn loop_takes_over_nodes_and_client() {
    let mut f = fixture(&["c1", "c2"]);
    f.manager.set_graph(chain_graph());
    f.manager.reconcile_now().unwrap();
    assert!(f.manager.patches().record("c1").is_some());
    f.transport.take();

    f.manager.deploy_loop("L1", "out", "c2").unwrap();
    assert_eq!(
        f.transport.names(),
        vec![("c2".to_string(), "deploy"), ("c2".to_string(), "start")]
    );
    f.transport.take();

    // The patch's root now belongs to the loop; the patch goes away.
    let outcome = f.manager.reconcile_now().unwrap();
    assert_eq!(
        names(&outcome.commands),
        vec![("c1".to_string(), "stop"), ("c1".to_string(), "remove")]
    );
    assert!(f.manager.patches().records().is_empty());

    let hosts = f.manager.hosts_of("delay1");
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].client_id, "c2");
    assert_eq!(hosts[0].deploy_id, "L1");
    assert_eq!(hosts[0].source, HostSource::LoopStatic);

    f.manager.remove_loop("L1").unwrap();
    assert_eq!(
        f.transport.names(),
        vec![("c2".to_string(), "stop"), ("c2".to_string(), "remove")]
    );
    assert!(f.manager.loops().is_empty());
}

#[test]
fn loop_rejects_non_root_and_unknown_client() {
    let mut f = fixture(&["c1"]);
    f.manager.set_graph(chain_graph());

    assert!(f.manager.deploy_loop("L1", "delay1", "c1").is_err());
    assert_eq!(f.manager.last_error().map(|e| e.class), Some(ErrorClass::Loop));
    assert!(f.manager.deploy_loop("L1", "out", "ghost").is_err());
    assert!(f.transport.sent().is_empty());

    f.manager.deploy_loop("L1", "out", "c1").unwrap();
    assert!(f.manager.last_error().is_none());
}

#[test]
fn departed_client_is_forgotten_silently() {
    let mut f = fixture(&["c1", "c2"]);
    f.manager.set_graph(chain_graph());
    f.manager.reconcile_now().unwrap();
    f.transport.take();

    f.manager.set_audience(audience(&["c2"]));
    assert!(f.transport.sent().is_empty());
    assert!(f.manager.patches().record("c1").is_none());
    assert!(f.manager.status("c1").is_none());
}

#[test]
fn self_reported_hosts_win_over_records() {
    let mut f = fixture(&["c1", "c2"]);
    let mut g = chain_graph();
    if let Some(sel) = g.get_node_mut("sel") {
        sel.config.insert("mode".to_string(), "range".into());
        sel.config.insert("count".to_string(), 2i64.into());
    }
    f.manager.set_graph(g);
    f.manager.reconcile_now().unwrap();
    let patch_id = f.manager.patches().record("c1").unwrap().patch_id.clone();

    let hosts = f.manager.hosts_of("osc");
    assert_eq!(hosts.len(), 2);
    assert!(hosts.iter().all(|h| h.source == HostSource::PatchStatic));

    f.manager.on_status(
        "c2",
        patchflow::StatusEvent::new(patchflow::StatusKind::Started, Some(&patch_id)),
    );
    let hosts = f.manager.hosts_of("osc");
    assert_eq!(hosts.len(), 1);
    assert_eq!(hosts[0].client_id, "c2");
    assert_eq!(hosts[0].source, HostSource::PatchStatus);
}

#[test]
fn override_sends_short_ttl_then_commits_durably() {
    let mut f = fixture(&["c1"]);
    f.manager.set_graph(chain_graph());
    f.manager.reconcile_now().unwrap();
    f.transport.take();

    let reached = f
        .manager
        .send_node_override("out", OverrideKind::Input, "volume", 0.4.into())
        .unwrap();
    assert_eq!(reached, 1);
    let sent = f.transport.take();
    let ttl = match &sent[0].1 {
        ControlMessage::OverrideSet(p) => p.entries().next().unwrap().unwrap().ttl_ms,
        other => panic!("unexpected {}", other.name()),
    };
    assert_eq!(ttl, Some(f.manager.config().override_ttl_ms));

    f.clock.advance(f.manager.config().commit_debounce_ms);
    f.manager.poll();
    let sent = f.transport.take();
    assert_eq!(sent.len(), 1);
    match &sent[0].1 {
        ControlMessage::OverrideSet(p) => {
            let entry = p.entries().next().unwrap().unwrap();
            assert_eq!(entry.ttl_ms, None);
            assert_eq!(entry.value, Some(PropertyValue::from(0.4)));
        }
        other => panic!("unexpected {}", other.name()),
    }
}

#[test]
fn several_unwired_roots_are_ambiguous_until_wired() {
    let mut f = fixture(&["c1"]);
    let mut g = Graph::new();
    g.add_node(NodeInstance::new_with_id("a", "audio.out"));
    g.add_node(NodeInstance::new_with_id("b", "audio.out"));
    f.manager.set_graph(g);

    let outcome = f.manager.reconcile_now().unwrap();
    assert!(outcome.is_noop());
    assert_eq!(
        f.manager.last_error().map(|e| e.class),
        Some(ErrorClass::Resolution)
    );

    f.manager.edit_graph(|g| {
        g.add_node(NodeInstance::new_with_id("sel", "route.clients"));
        g.add_connection(Connection::between(("a", "cmd"), ("sel", "cmd")));
    });
    let outcome = f.manager.reconcile_now().unwrap();
    assert!(!outcome.is_noop());
    assert!(f.manager.last_error().is_none());
}

#[test]
fn sole_unwired_root_goes_to_default_client() {
    let clock = Arc::new(ManualClock::new(0));
    let transport = Arc::new(RecordingTransport::new());
    let config = ManagerConfig {
        default_client: Some("c1".to_string()),
        ..ManagerConfig::default()
    };
    let mut manager = Manager::new(
        config,
        Arc::new(NodeRegistry::with_builtins()),
        clock,
        transport.clone(),
    );
    manager.set_audience(audience(&["c1", "c2"]));
    let mut g = Graph::new();
    g.add_node(NodeInstance::new_with_id("out", "audio.out"));
    manager.set_graph(g);

    manager.reconcile_now().unwrap();
    assert_eq!(
        transport.names(),
        vec![("c1".to_string(), "deploy"), ("c1".to_string(), "start")]
    );
}

#[test]
fn local_only_media_needs_a_display_client() {
    let mut f = fixture(&["c1"]);
    let mut g = Graph::new();
    g.add_node(NodeInstance::new_with_id("video", "media.video").with_input("path", "clip.mp4"));
    g.add_node(NodeInstance::new_with_id("scene", "scene.out"));
    g.add_node(NodeInstance::new_with_id("sel", "route.clients"));
    g.add_connection(Connection::between(("video", "image"), ("scene", "image")));
    g.add_connection(Connection::between(("scene", "cmd"), ("sel", "cmd")));
    f.manager.set_graph(g);

    let outcome = f.manager.reconcile_now().unwrap();
    assert!(outcome.is_noop());
    assert_eq!(
        f.manager.last_error().map(|e| e.class),
        Some(ErrorClass::LocalOnlyMedia)
    );

    let mut display = Audience::new();
    display.insert(ClientInfo::display("c1"));
    f.manager.set_audience(display);
    let outcome = f.manager.reconcile_now().unwrap();
    assert_eq!(
        names(&outcome.commands),
        vec![("c1".to_string(), "deploy"), ("c1".to_string(), "start")]
    );
    assert!(f.manager.last_error().is_none());
}

fn client(f: &Fixture, id: &str) -> (ClientExecutor, Arc<RecordingStatus>) {
    let status = Arc::new(RecordingStatus::new());
    let executor = ClientExecutor::new(
        id,
        f.registry.clone(),
        f.clock.clone(),
        ExecutorConfig::default(),
        Arc::new(StaticCapabilities::all()),
        status.clone(),
    );
    (executor, status)
}

/// Delivers manager commands to in-process executors and their statuses back.
fn deliver(
    f: &mut Fixture,
    executors: &mut BTreeMap<String, (ClientExecutor, Arc<RecordingStatus>)>,
) {
    for (client, message) in f.transport.take() {
        if let Some((executor, _)) = executors.get_mut(&client) {
            executor.handle(message);
        }
    }
    for (client, (executor, status)) in executors.iter_mut() {
        executor.poll();
        for event in status.take() {
            f.manager.on_status(client, event);
        }
    }
}

#[test]
fn end_to_end_deploy_and_live_edit() {
    let mut f = fixture(&["c1", "c2"]);
    let sink = Arc::new(RecordingVisualSink::new());
    f.manager = Manager::new(
        ManagerConfig::default(),
        f.registry.clone(),
        f.clock.clone(),
        f.transport.clone(),
    )
    .with_visual_sink(sink.clone());
    f.manager.set_audience(audience(&["c1", "c2"]));

    let mut executors = BTreeMap::new();
    for id in ["c1", "c2"] {
        executors.insert(id.to_string(), client(&f, id));
    }

    f.manager.set_graph(chain_graph());
    f.manager.reconcile_now().unwrap();
    deliver(&mut f, &mut executors);

    let patch_id = f.manager.patches().record("c1").unwrap().patch_id.clone();
    let (c1, _) = &executors["c1"];
    assert_eq!(c1.state(), ExecutorState::Running);
    assert_eq!(c1.current_id(), Some(patch_id.as_str()));
    assert_eq!(executors["c2"].0.state(), ExecutorState::Idle);
    assert!(f.manager.status("c1").unwrap().hosts(&patch_id));
    assert!(
        sink.take()
            .iter()
            .flatten()
            .any(|v| v.node_id == "osc" && v.deployed && !v.in_loop)
    );

    // Nothing drifted, so the next pass is quiet.
    assert!(f.manager.reconcile_now().unwrap().is_noop());

    f.manager
        .send_node_override("out", OverrideKind::Input, "volume", 0.25.into())
        .unwrap();
    f.clock.advance(40);
    deliver(&mut f, &mut executors);
    assert_eq!(
        executors["c1"].0.runtime().effective_input("out", "volume"),
        Some(&PropertyValue::from(0.25))
    );

    f.manager.stop_all();
    deliver(&mut f, &mut executors);
    assert_eq!(executors["c1"].0.state(), ExecutorState::Idle);
    assert!(!f.manager.is_active());
}

fn has_delay(executor: &ClientExecutor, node_id: &str) -> bool {
    match executor.runtime().output(node_id, "out") {
        Some(PropertyValue::Map(signal)) => signal.contains_key("delayMs"),
        other => panic!("{} produced no signal: {:?}", node_id, other),
    }
}

#[test]
fn node_disabled_before_deploy_is_bypassed_from_the_first_tick() {
    let mut f = fixture(&["c1"]);
    let mut g = chain_graph();
    g.get_node_mut("delay1").unwrap().enabled = false;
    f.manager.set_graph(g);

    let outcome = f.manager.reconcile_now().unwrap();
    assert_eq!(
        names(&outcome.commands),
        vec![("c1".to_string(), "deploy"), ("c1".to_string(), "start")]
    );
    let (mut executor, _status) = client(&f, "c1");
    for (_, message) in f.transport.take() {
        executor.handle(message);
    }
    executor.poll();
    assert!(!has_delay(&executor, "delay1"));
    assert!(has_delay(&executor, "delay2"));

    set_enabled(&mut f.manager, "delay1", true);
    let outcome = f.manager.reconcile_now().unwrap();
    assert_eq!(names(&outcome.commands), vec![("c1".to_string(), "override-set")]);
    for (_, message) in f.transport.take() {
        executor.handle(message);
    }
    f.clock.advance(40);
    executor.poll();
    assert!(has_delay(&executor, "delay1"));
}

#[test]
fn loop_error_outlives_unrelated_reconcile() {
    let mut f = fixture(&["c1"]);
    f.manager.set_graph(chain_graph());

    assert!(f.manager.deploy_loop("L1", "out", "ghost").is_err());
    f.manager.reconcile_now().unwrap();
    assert_eq!(f.manager.last_error().map(|e| e.class), Some(ErrorClass::Loop));

    assert!(f.manager.remove_loop("missing").is_err());
    f.manager.deploy_loop("L1", "out", "c1").unwrap();
    assert!(f.manager.last_error().is_none());
}

#[test]
fn rejection_clears_only_when_the_refusing_client_recovers() {
    let mut f = fixture(&["c1", "c2"]);
    f.manager.on_status(
        "c1",
        StatusEvent::new(StatusKind::Rejected, Some("p1")).with("reason", "missing capability"),
    );
    assert_eq!(f.manager.last_error().map(|e| e.class), Some(ErrorClass::Rejected));

    f.manager.on_status("c2", StatusEvent::new(StatusKind::Started, Some("p1")));
    assert_eq!(f.manager.last_error().map(|e| e.class), Some(ErrorClass::Rejected));

    f.manager.on_status("c1", StatusEvent::new(StatusKind::Deployed, Some("p1")));
    assert!(f.manager.last_error().is_none());
}

/// fader -> out.volume, with out deployed to the first client.
fn fader_graph() -> Graph {
    let mut g = Graph::new();
    g.add_node(NodeInstance::new_with_id("fader", "midi.fader").with_config("value", 0.5));
    g.add_node(NodeInstance::new_with_id("out", "audio.out"));
    g.add_node(NodeInstance::new_with_id("sel", "route.clients").with_config("index", 0i64));
    g.add_connection(Connection::between(("fader", "value"), ("out", "volume")));
    g.add_connection(Connection::between(("out", "cmd"), ("sel", "cmd")));
    g
}

/// Override messages touching out.volume, as (message name, value).
fn volume_edits(sent: &[(String, ControlMessage)]) -> Vec<(&'static str, Option<PropertyValue>)> {
    let mut edits = Vec::new();
    for (_, message) in sent {
        let payload = match message {
            ControlMessage::OverrideSet(p) | ControlMessage::OverrideRemove(p) => p,
            _ => continue,
        };
        for entry in payload.entries().filter_map(Result::ok) {
            let OverrideEntry {
                node_id,
                port_id,
                value,
                ..
            } = entry;
            if node_id == "out" && port_id == "volume" {
                edits.push((message.name(), value));
            }
        }
    }
    edits
}

fn run_for(f: &mut Fixture, ms: u64) {
    for _ in 0..ms / 5 {
        f.manager.poll();
        f.clock.advance(5);
    }
}

#[test]
fn live_source_value_reaches_deployed_input_once() {
    let mut f = fixture(&["c1"]);
    f.manager.set_graph(fader_graph());
    f.manager.start();

    run_for(&mut f, 2_000);
    let record = f.manager.patches().record("c1").unwrap().clone();
    assert!(!record.node_ids.contains("fader"));
    assert!(record.node_ids.contains("out"));
    assert_eq!(
        volume_edits(&f.transport.take()),
        vec![("override-set", Some(PropertyValue::from(0.5)))]
    );

    f.manager.edit_graph(|g| {
        if let Some(fader) = g.get_node_mut("fader") {
            fader.config.insert("value".to_string(), 0.8.into());
        }
    });
    run_for(&mut f, 1_000);
    assert_eq!(
        volume_edits(&f.transport.take()),
        vec![("override-set", Some(PropertyValue::from(0.8)))]
    );

    f.manager.edit_graph(|g| {
        let wire = g
            .input_connection(&PortRef::new("out", "volume"))
            .map(|c| c.id.clone());
        if let Some(id) = wire {
            g.remove_connection(&id);
        }
    });
    run_for(&mut f, 1_000);
    let sent = f.transport.take();
    assert_eq!(volume_edits(&sent), vec![("override-remove", None)]);
    assert!(!names(&sent).iter().any(|(_, name)| *name == "deploy"));
    assert_eq!(f.manager.patches().record("c1").unwrap().patch_id, record.patch_id);
}
