//! Integration tests for the power multiplexing engine
//!
//! These tests verify end-to-end behavior of the engine and dispatcher
//! against simulated devices, including:
//! - Node operations resolving to per-plug outcomes
//! - Partial aggregation (one device failing never drops its siblings)
//! - Per-device serialization of concurrent requests
//! - Deadline enforcement against silent devices
//! - Cancellation semantics
//! - Liveness with many concurrent sessions

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pdu_mux::{
    run_dispatcher, run_engine, BoxedIo, Connector, Dispatcher, EngineCommand, EngineEvent,
    NodeOutcome,
};
use pdu_script::{
    ConnectClass, ConnectParams, DeviceInstance, DeviceType, DeviceTypeDef, Operation, ScriptDef,
    ScriptKind, StmtDef, Topology,
};
use pdu_sim::{run_sim_pdu, SimCommand, SimPdu, SimPduConfig};
use tokio::sync::{mpsc, oneshot};

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    /// A connector that wires each device to a fresh simulated PDU over
    /// an in-memory duplex stream
    pub struct SimConnector {
        configs: HashMap<String, SimPduConfig>,
        // keeps the sims' command channels alive for the test duration
        keepalive: Mutex<Vec<mpsc::Sender<SimCommand>>>,
    }

    impl SimConnector {
        pub fn new(configs: HashMap<String, SimPduConfig>) -> Self {
            Self {
                configs,
                keepalive: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Connector for SimConnector {
        async fn connect(&self, device: &str, _params: &ConnectParams) -> io::Result<BoxedIo> {
            let Some(config) = self.configs.get(device) else {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("no simulated device {}", device),
                ));
            };
            let (engine_side, sim_side) = tokio::io::duplex(1024);
            let (cmd_tx, cmd_rx) = mpsc::channel(8);
            self.keepalive.lock().unwrap().push(cmd_tx);
            tokio::spawn(run_sim_pdu(sim_side, SimPdu::new(config.clone()), cmd_rx));
            Ok(Box::new(engine_side))
        }
    }

    /// Device type speaking the stock sim dialect (no reset script, so
    /// the reset operation is unsupported)
    pub fn sim_device_type() -> Arc<DeviceType> {
        let def = DeviceTypeDef::new("sim-rpc", ConnectClass::Tcp, (1..=8).map(|n| n.to_string()))
            .with_expect_timeout_ms(300)
            .with_script(ScriptKind::Login, ScriptDef::new([StmtDef::expect("RPC> ")]))
            .with_script(
                ScriptKind::On,
                ScriptDef::new([StmtDef::send("on %s\r\n"), StmtDef::expect("OK")]),
            )
            .with_script(
                ScriptKind::Off,
                ScriptDef::new([StmtDef::send("off %s\r\n"), StmtDef::expect("OK")]),
            )
            .with_script(
                ScriptKind::Cycle,
                ScriptDef::new([StmtDef::send("reboot %s\r\n"), StmtDef::expect("OK")]),
            )
            .with_script(
                ScriptKind::Status,
                ScriptDef::new([
                    StmtDef::send("status %s\r\n"),
                    StmtDef::expect(r"plug ([0-9]+): (on|off)"),
                    StmtDef::set_status_group(1, 2),
                ]),
            )
            .with_script(
                ScriptKind::Logout,
                ScriptDef::new([StmtDef::send("logout\r\n"), StmtDef::expect("bye")]),
            );
        Arc::new(def.compile().unwrap())
    }

    /// Register a device and its nodes in the topology
    pub fn add_device(
        topo: &mut Topology,
        dtype: &Arc<DeviceType>,
        id: &str,
        nodes: &[(&str, &str)],
    ) {
        topo.add_device(DeviceInstance::new(
            id,
            dtype.name(),
            ConnectParams::Tcp {
                host: format!("{}.mgmt", id),
                port: 23,
            },
        ))
        .unwrap();
        for (node, plug) in nodes {
            topo.add_node(*node, id, *plug).unwrap();
        }
    }

    pub struct Harness {
        pub dispatcher: Dispatcher,
        pub events: mpsc::Receiver<EngineEvent>,
    }

    /// Spawn engine + dispatcher over simulated devices and register
    /// every device in the topology
    pub async fn start(topology: Topology, configs: HashMap<String, SimPduConfig>) -> Harness {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();

        let topology = Arc::new(topology);
        let connector = Arc::new(SimConnector::new(configs));

        let (engine_tx, engine_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(1024);
        tokio::spawn(run_engine(connector, engine_rx, event_tx));

        for device in topology.devices() {
            let dtype = topology.device_type_of(&device.id).unwrap().clone();
            let (reply_tx, reply_rx) = oneshot::channel();
            engine_tx
                .send(EngineCommand::AddDevice {
                    instance: device.clone(),
                    dtype,
                    reply: reply_tx,
                })
                .await
                .unwrap();
            reply_rx.await.unwrap().unwrap();
        }

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        tokio::spawn(run_dispatcher(topology, engine_tx, cmd_rx));

        Harness {
            dispatcher: Dispatcher::new(cmd_tx),
            events: event_rx,
        }
    }

    /// Submit and wait for the aggregated result
    pub async fn run_op(
        harness: &Harness,
        nodes: &[&str],
        op: Operation,
    ) -> HashMap<String, NodeOutcome> {
        let nodes = nodes.iter().map(|n| n.to_string()).collect();
        let (_, result_rx) = harness.dispatcher.submit(nodes, op).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), result_rx)
            .await
            .expect("aggregated result not delivered")
            .unwrap()
            .nodes
    }

    /// Drain every event currently in the channel
    pub fn drain_events(harness: &mut Harness) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(event) = harness.events.try_recv() {
            events.push(event);
        }
        events
    }
}

// ============================================================================
// Node Operation Tests
// ============================================================================

mod operation_tests {
    use super::*;

    #[tokio::test]
    async fn power_on_single_node() {
        let dtype = helpers::sim_device_type();
        let mut topo = Topology::new();
        topo.add_device_type(dtype.clone());
        helpers::add_device(&mut topo, &dtype, "pdu0", &[("n1", "1")]);

        let configs = HashMap::from([("pdu0".to_string(), SimPduConfig::default())]);
        let harness = helpers::start(topo, configs).await;

        let result = helpers::run_op(&harness, &["n1"], Operation::On).await;
        assert_eq!(result["n1"], NodeOutcome::On);
    }

    #[tokio::test]
    async fn power_off_two_plugs_on_one_device() {
        let dtype = helpers::sim_device_type();
        let mut topo = Topology::new();
        topo.add_device_type(dtype.clone());
        helpers::add_device(&mut topo, &dtype, "pdu0", &[("n1", "1"), ("n2", "2")]);

        let configs = HashMap::from([("pdu0".to_string(), SimPduConfig::default())]);
        let harness = helpers::start(topo, configs).await;

        let result = helpers::run_op(&harness, &["n1", "n2"], Operation::Off).await;
        assert_eq!(result["n1"], NodeOutcome::Off);
        assert_eq!(result["n2"], NodeOutcome::Off);
    }

    #[tokio::test]
    async fn status_reports_device_state() {
        let dtype = helpers::sim_device_type();
        let mut topo = Topology::new();
        topo.add_device_type(dtype.clone());
        helpers::add_device(&mut topo, &dtype, "pdu0", &[("n1", "1")]);

        // stock sim plugs start off
        let configs = HashMap::from([("pdu0".to_string(), SimPduConfig::default())]);
        let harness = helpers::start(topo, configs).await;

        let result = helpers::run_op(&harness, &["n1"], Operation::Status).await;
        assert_eq!(result["n1"], NodeOutcome::Off);
    }

    #[tokio::test]
    async fn cycle_without_confirmation_reports_unknown() {
        let dtype = helpers::sim_device_type();
        let mut topo = Topology::new();
        topo.add_device_type(dtype.clone());
        helpers::add_device(&mut topo, &dtype, "pdu0", &[("n1", "1")]);

        let configs = HashMap::from([("pdu0".to_string(), SimPduConfig::default())]);
        let harness = helpers::start(topo, configs).await;

        let result = helpers::run_op(&harness, &["n1"], Operation::Cycle).await;
        assert_eq!(result["n1"], NodeOutcome::Unknown);
    }

    #[tokio::test]
    async fn unsupported_operation_is_its_own_outcome() {
        let dtype = helpers::sim_device_type();
        let mut topo = Topology::new();
        topo.add_device_type(dtype.clone());
        helpers::add_device(&mut topo, &dtype, "pdu0", &[("n1", "1")]);

        let configs = HashMap::from([("pdu0".to_string(), SimPduConfig::default())]);
        let harness = helpers::start(topo, configs).await;

        // the sim device type defines no reset script
        let result = helpers::run_op(&harness, &["n1"], Operation::Reset).await;
        assert_eq!(result["n1"], NodeOutcome::Unsupported);
    }

    #[tokio::test]
    async fn unknown_node_is_unreachable() {
        let dtype = helpers::sim_device_type();
        let mut topo = Topology::new();
        topo.add_device_type(dtype.clone());
        helpers::add_device(&mut topo, &dtype, "pdu0", &[("n1", "1")]);

        let configs = HashMap::from([("pdu0".to_string(), SimPduConfig::default())]);
        let harness = helpers::start(topo, configs).await;

        let result = helpers::run_op(&harness, &["ghost"], Operation::On).await;
        assert_eq!(result["ghost"], NodeOutcome::Unreachable);
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        let dtype = helpers::sim_device_type();
        let mut topo = Topology::new();
        topo.add_device_type(dtype.clone());
        helpers::add_device(&mut topo, &dtype, "pdu0", &[("n1", "1")]);

        // no sim config for pdu0: connects are refused
        let harness = helpers::start(topo, HashMap::new()).await;

        let result = helpers::run_op(&harness, &["n1"], Operation::On).await;
        assert_eq!(result["n1"], NodeOutcome::Unreachable);
    }
}

// ============================================================================
// Aggregation Tests
// ============================================================================

mod aggregation_tests {
    use super::*;

    #[tokio::test]
    async fn one_silent_device_never_drops_its_siblings() {
        let dtype = helpers::sim_device_type();
        let mut topo = Topology::new();
        topo.add_device_type(dtype.clone());
        helpers::add_device(&mut topo, &dtype, "pdu0", &[("n1", "1")]);
        helpers::add_device(&mut topo, &dtype, "pdu1", &[("n2", "1")]);

        let configs = HashMap::from([
            ("pdu0".to_string(), SimPduConfig::default()),
            (
                "pdu1".to_string(),
                SimPduConfig {
                    silent: true,
                    ..Default::default()
                },
            ),
        ]);
        let harness = helpers::start(topo, configs).await;

        let result = helpers::run_op(&harness, &["n1", "n2"], Operation::On).await;
        assert_eq!(result["n1"], NodeOutcome::On);
        assert_eq!(result["n2"], NodeOutcome::Timeout);
    }

    #[tokio::test]
    async fn silent_device_times_out_within_bounds() {
        let dtype = helpers::sim_device_type();
        let mut topo = Topology::new();
        topo.add_device_type(dtype.clone());
        helpers::add_device(&mut topo, &dtype, "pdu0", &[("n1", "1")]);

        let configs = HashMap::from([(
            "pdu0".to_string(),
            SimPduConfig {
                silent: true,
                ..Default::default()
            },
        )]);
        let harness = helpers::start(topo, configs).await;

        let started = Instant::now();
        let result = helpers::run_op(&harness, &["n1"], Operation::On).await;
        let elapsed = started.elapsed();

        assert_eq!(result["n1"], NodeOutcome::Timeout);
        // the device type's expect timeout is 300ms
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_secs(5), "no unbounded hang");
    }

    #[tokio::test]
    async fn many_devices_all_reach_a_terminal_state() {
        let dtype = helpers::sim_device_type();
        let mut topo = Topology::new();
        topo.add_device_type(dtype.clone());

        let mut configs = HashMap::new();
        let mut nodes = Vec::new();
        for i in 0..8 {
            let device = format!("pdu{}", i);
            let node = format!("n{}", i);
            topo.add_device(DeviceInstance::new(
                &device,
                dtype.name(),
                ConnectParams::Tcp {
                    host: format!("{}.mgmt", device),
                    port: 23,
                },
            ))
            .unwrap();
            topo.add_node(&node, &device, "1").unwrap();
            configs.insert(device, SimPduConfig::default());
            nodes.push(node);
        }

        let harness = helpers::start(topo, configs).await;
        let node_refs: Vec<&str> = nodes.iter().map(String::as_str).collect();
        let result = helpers::run_op(&harness, &node_refs, Operation::On).await;

        assert_eq!(result.len(), 8);
        for node in &nodes {
            assert_eq!(result[node], NodeOutcome::On, "node {} not on", node);
        }
    }
}

// ============================================================================
// Serialization Tests
// ============================================================================

mod serialization_tests {
    use super::*;

    #[tokio::test]
    async fn sessions_on_one_device_never_overlap() {
        let dtype = helpers::sim_device_type();
        let mut topo = Topology::new();
        topo.add_device_type(dtype.clone());
        helpers::add_device(&mut topo, &dtype, "pdu0", &[("n1", "1")]);

        // slow the sim down so the second request queues
        let configs = HashMap::from([(
            "pdu0".to_string(),
            SimPduConfig {
                reply_delay_ms: 20,
                ..Default::default()
            },
        )]);
        let mut harness = helpers::start(topo, configs).await;

        let (_, first_rx) = harness
            .dispatcher
            .submit(vec!["n1".to_string()], Operation::On)
            .await
            .unwrap();
        let (_, second_rx) = harness
            .dispatcher
            .submit(vec!["n1".to_string()], Operation::Off)
            .await
            .unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), first_rx)
            .await
            .unwrap()
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), second_rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.nodes["n1"], NodeOutcome::On);
        assert_eq!(second.nodes["n1"], NodeOutcome::Off);

        let events = helpers::drain_events(&mut harness);
        let lifecycle: Vec<&EngineEvent> = events.iter().filter(|e| e.is_lifecycle()).collect();

        let starts: Vec<usize> = lifecycle
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, EngineEvent::SessionStarted { .. }))
            .map(|(i, _)| i)
            .collect();
        let finishes: Vec<usize> = lifecycle
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, EngineEvent::SessionFinished { .. }))
            .map(|(i, _)| i)
            .collect();

        assert_eq!(starts.len(), 2, "expected two sessions");
        assert_eq!(finishes.len(), 2);
        assert!(
            finishes[0] < starts[1],
            "second session started before the first finished"
        );
        assert!(
            lifecycle
                .iter()
                .any(|e| matches!(e, EngineEvent::JobQueued { .. })),
            "second job was never queued"
        );
    }
}

// ============================================================================
// Cancellation Tests
// ============================================================================

mod cancellation_tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_action_never_delivers_a_result() {
        let dtype = helpers::sim_device_type();
        let mut topo = Topology::new();
        topo.add_device_type(dtype.clone());
        helpers::add_device(&mut topo, &dtype, "pdu0", &[("n1", "1")]);
        helpers::add_device(&mut topo, &dtype, "pdu1", &[("n2", "1")]);

        let configs = HashMap::from([
            (
                "pdu0".to_string(),
                SimPduConfig {
                    silent: true,
                    ..Default::default()
                },
            ),
            ("pdu1".to_string(), SimPduConfig::default()),
        ]);
        let harness = helpers::start(topo, configs).await;

        let (id, result_rx) = harness
            .dispatcher
            .submit(vec!["n1".to_string()], Operation::On)
            .await
            .unwrap();
        harness.dispatcher.cancel(id).await.unwrap();

        // the result channel is dropped on cancel; the late timeout
        // report (after the 300ms deadline) is discarded
        let result = tokio::time::timeout(Duration::from_secs(2), result_rx)
            .await
            .expect("cancel did not release the caller");
        assert!(result.is_err(), "cancelled action still delivered a result");

        // the dispatcher keeps serving other requests afterwards
        let result = helpers::run_op(&harness, &["n2"], Operation::On).await;
        assert_eq!(result["n2"], NodeOutcome::On);
    }
}
