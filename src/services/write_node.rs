use log::{debug, error, info, warn};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, Instant, Interval, MissedTickBehavior};

use crate::config::settings::WriteNodeSettings;
use crate::flow::host::FlowHost;
use crate::flow::message::FlowMessage;
use crate::modbus::transport::{
    ClientEvent, EndpointRegistration, ModbusTransport, WriteCompletion, WriteIntent,
};
use crate::services::builder::WriteRequestBuilder;
use crate::services::correlator::RequestCorrelator;
use crate::services::dispatcher::{CompletionDispatcher, Resolution};
use crate::services::status::NodeStatus;
use crate::utils::error::WriteError;

/// Finds the transport named by `settings.server`.
pub fn resolve_transport(
    settings: &WriteNodeSettings,
    transports: &[Arc<dyn ModbusTransport>],
) -> Option<Arc<dyn ModbusTransport>> {
    let server = settings.server.as_deref()?;
    transports.iter().find(|t| t.name() == server).cloned()
}

/// A write endpoint: gates inbound messages, issues correlated writes on a
/// shared transport and turns their completions into flow messages.
///
/// All correlator access happens on the task that owns the node, either
/// through the `handle_*` methods or through [`ModbusWriteNode::run`].
pub struct ModbusWriteNode {
    settings: WriteNodeSettings,
    transport: Option<Arc<dyn ModbusTransport>>,
    host: Arc<dyn FlowHost>,
    correlator: RequestCorrelator,
    builder: WriteRequestBuilder,
    dispatcher: CompletionDispatcher,
    completion_tx: mpsc::UnboundedSender<WriteCompletion>,
    completion_rx: mpsc::UnboundedReceiver<WriteCompletion>,
    events_rx: Option<mpsc::UnboundedReceiver<ClientEvent>>,
    closed: bool,
}

impl ModbusWriteNode {
    /// Activates the node. Without a transport, or when registration fails,
    /// the node stays inert and ignores every input.
    pub fn new(
        settings: WriteNodeSettings,
        transport: Option<Arc<dyn ModbusTransport>>,
        host: Arc<dyn FlowHost>,
    ) -> Self {
        host.set_status(&settings.id, &NodeStatus::waiting());

        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let mut events_rx = None;

        let transport = match transport {
            Some(transport) => {
                let (events_tx, rx) = mpsc::unbounded_channel();
                let registration = EndpointRegistration {
                    endpoint_id: settings.id.clone(),
                    events: events_tx,
                };
                match transport.register(registration) {
                    Ok(()) => {
                        info!("📋 Node '{}' registered on '{}'", settings.label(), transport.name());
                        events_rx = Some(rx);
                        Some(transport)
                    }
                    Err(e) => {
                        error!("❌ Node '{}' failed to register on '{}': {}", settings.label(), transport.name(), e);
                        None
                    }
                }
            }
            None => {
                info!("⏸️  Node '{}' has no server configured, staying inert", settings.label());
                None
            }
        };

        let transport_name = transport
            .as_ref()
            .map(|t| t.name().to_string())
            .unwrap_or_default();

        if transport.is_some() && !settings.show_status_activities {
            host.set_status(&settings.id, &NodeStatus::default_active());
        }

        Self {
            builder: WriteRequestBuilder::from_settings(&settings),
            dispatcher: CompletionDispatcher::new(&settings, &transport_name),
            settings,
            transport,
            host,
            correlator: RequestCorrelator::new(),
            completion_tx,
            completion_rx,
            events_rx,
            closed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.settings.id
    }

    pub fn is_inert(&self) -> bool {
        self.transport.is_none()
    }

    pub fn pending_count(&self) -> usize {
        self.correlator.len()
    }

    pub fn handle_input(&mut self, message: FlowMessage) {
        if self.closed {
            debug!("🔒 Node '{}' is closed, input dropped", self.settings.label());
            return;
        }
        let Some(transport) = self.transport.clone() else {
            return;
        };
        if message.has_invalid_payload() {
            debug!("🚫 Node '{}' dropped message without payload", self.settings.label());
            return;
        }
        if !transport.has_active_client() {
            debug!("📵 No active client on '{}', write skipped", transport.name());
            return;
        }

        match self.builder.build(&mut self.correlator, &message) {
            Ok(command) => {
                transport.emit_write(WriteIntent::new(command, self.completion_tx.clone()));

                if self.settings.show_status_activities {
                    let status = NodeStatus::from_service_state(transport.actual_service_state());
                    self.host.set_status(&self.settings.id, &status);
                }
            }
            Err(err) => self.dispatcher.on_build_error(self.host.as_ref(), &err, &message),
        }
    }

    pub fn handle_completion(&mut self, completion: WriteCompletion) -> Resolution {
        if self.closed {
            debug!("🔒 Completion {} arrived after close", completion.correlation_id());
            return Resolution::Unmatched;
        }
        self.dispatcher
            .dispatch(&mut self.correlator, self.host.as_ref(), completion)
    }

    pub fn handle_client_event(&mut self, event: ClientEvent) {
        debug!("📡 Node '{}' client event {:?}", self.settings.label(), event);
        if self.settings.show_status_activities && !self.closed {
            self.host
                .set_status(&self.settings.id, &NodeStatus::from_client_event(&event));
        }
    }

    /// Fails every pending write older than the configured timeout.
    pub fn expire_pending(&mut self, now: Instant) -> usize {
        let Some(ttl) = self.pending_timeout() else {
            return 0;
        };

        let expired = self.correlator.expire(now, ttl);
        for (id, original) in &expired {
            warn!("⏱️  Write {} timed out after {:?}", id, ttl);
            self.dispatcher
                .fail_with(self.host.as_ref(), &WriteError::Timeout, original);
        }
        expired.len()
    }

    /// Handles every completion and client event already queued, without waiting.
    pub fn process_ready(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(completion) = self.completion_rx.try_recv() {
            self.handle_completion(completion);
            handled += 1;
        }
        while let Some(event) = self.events_rx.as_mut().and_then(|rx| rx.try_recv().ok()) {
            self.handle_client_event(event);
            handled += 1;
        }
        handled
    }

    /// Teardown: in-flight writes are abandoned, not awaited.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.host.set_status(&self.settings.id, &NodeStatus::closed());

        let abandoned = self.correlator.len();
        self.correlator.clear();
        if abandoned > 0 {
            warn!("🗑️  Node '{}' abandoned {} in-flight writes", self.settings.label(), abandoned);
        }

        if let Some(transport) = &self.transport {
            if let Err(e) = transport.deregister(&self.settings.id).await {
                warn!("⚠️  Deregistering '{}' from '{}' failed: {}", self.settings.label(), transport.name(), e);
            }
        }
        self.events_rx = None;

        info!("🛑 Node '{}' closed", self.settings.label());
        self.host.closed(&self.settings.id);
    }

    /// Drives the node until `inputs` is exhausted or `shutdown` resolves,
    /// then closes it.
    pub async fn run<F>(&mut self, mut inputs: mpsc::Receiver<FlowMessage>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut sweep = self.pending_timeout().map(|ttl| {
            let mut sweep = interval((ttl / 2).max(Duration::from_millis(1)));
            sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
            sweep
        });

        loop {
            tokio::select! {
                maybe = inputs.recv() => match maybe {
                    Some(message) => self.handle_input(message),
                    None => {
                        self.process_ready();
                        break;
                    }
                },
                Some(completion) = self.completion_rx.recv() => {
                    self.handle_completion(completion);
                }
                event = next_event(&mut self.events_rx) => match event {
                    Some(event) => self.handle_client_event(event),
                    None => self.events_rx = None,
                },
                _ = next_sweep(&mut sweep) => {
                    self.expire_pending(Instant::now());
                }
                _ = &mut shutdown => {
                    info!("🛑 Shutdown requested for node '{}'", self.settings.label());
                    break;
                }
            }
        }

        self.close().await;
    }

    fn pending_timeout(&self) -> Option<Duration> {
        self.settings.pending_timeout_ms.map(Duration::from_millis)
    }
}

async fn next_event(events: &mut Option<mpsc::UnboundedReceiver<ClientEvent>>) -> Option<ClientEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_sweep(sweep: &mut Option<Interval>) {
    match sweep {
        Some(sweep) => {
            sweep.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::DataType;
    use crate::flow::host::RecordingHost;
    use crate::flow::message::WriteValue;
    use crate::modbus::loopback::{LoopbackTransport, ReplyMode};
    use crate::modbus::protocol::FunctionCode;
    use serde_json::json;

    fn settings() -> WriteNodeSettings {
        WriteNodeSettings {
            id: "write-1".to_string(),
            name: "writer".to_string(),
            unit_id: 1,
            data_type: DataType::Coil,
            address: 10,
            quantity: 1,
            server: Some("plc".to_string()),
            ..WriteNodeSettings::default()
        }
    }

    fn setup(
        settings: WriteNodeSettings,
        mode: ReplyMode,
    ) -> (ModbusWriteNode, Arc<LoopbackTransport>, Arc<RecordingHost>) {
        let transport = Arc::new(LoopbackTransport::new("plc", mode));
        transport.set_active(true).unwrap();
        let host = Arc::new(RecordingHost::new());
        let shared: Arc<dyn ModbusTransport> = transport.clone();
        let node = ModbusWriteNode::new(settings, Some(shared), host.clone());
        (node, transport, host)
    }

    #[test]
    fn test_coil_write_scenario() {
        let (mut node, transport, host) = setup(settings(), ReplyMode::Hold);

        node.handle_input(FlowMessage::with_payload(json!({"value": "true"})).topic("pump/run"));

        let written = transport.written();
        assert_eq!(written.len(), 1);
        let command = &written[0];
        assert_eq!(command.unit_id, 1);
        assert_eq!(command.function_code, FunctionCode::WriteSingleCoil);
        assert_eq!(command.address, 10);
        assert_eq!(command.quantity, 1);
        assert_eq!(command.value, WriteValue::Bool(true));
        assert_eq!(node.pending_count(), 1);

        for intent in transport.take_held() {
            let message = intent.command.clone();
            intent
                .completion
                .succeed(json!({"address": 10, "state": true}), message);
        }
        node.process_ready();

        let sent = host.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic.as_deref(), Some("pump/run"));
        assert_eq!(
            sent[0].payload,
            Some(json!({"value": true, "address": 10, "state": true}))
        );
        assert_eq!(node.pending_count(), 0);
    }

    #[test]
    fn test_out_of_order_completions_resolve_to_their_own_message() {
        let settings = WriteNodeSettings {
            data_type: DataType::HoldingRegister,
            ..settings()
        };
        let (mut node, transport, host) = setup(settings, ReplyMode::Hold);

        for n in 0..6 {
            node.handle_input(
                FlowMessage::with_payload(json!({"value": n, "tag": n})).topic(format!("t{}", n)),
            );
        }
        assert_eq!(node.pending_count(), 6);

        let mut held = transport.take_held();
        // complete in a scrambled order: 5, 0, 4, 1, 3, 2
        let mut order = Vec::new();
        while !held.is_empty() {
            order.push(held.pop().unwrap());
            if !held.is_empty() {
                order.push(held.remove(0));
            }
        }
        for intent in order {
            let message = intent.command.clone();
            let echo = message.value.to_json();
            intent.completion.succeed(json!({"echo": echo}), message);
            node.process_ready();
        }

        let sent = host.sent();
        assert_eq!(sent.len(), 6);
        for outward in &sent {
            let payload = outward.payload.as_ref().unwrap();
            assert_eq!(payload["tag"], payload["echo"]);
            assert_eq!(outward.topic, Some(format!("t{}", payload["tag"])));
        }
        assert_eq!(node.pending_count(), 0);
    }

    #[test]
    fn test_failure_resolves_entry_and_reports() {
        let settings = WriteNodeSettings {
            empty_msg_on_fail: true,
            ..settings()
        };
        let (mut node, _transport, host) = setup(settings, ReplyMode::FailEvery(1));

        let original = FlowMessage::with_payload(json!({"value": false})).topic("door");
        node.handle_input(original.clone());
        node.process_ready();

        assert_eq!(node.pending_count(), 0);
        let reports = host.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].transport, "plc");
        assert_eq!(reports[0].message, original);

        let sent = host.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload, Some(json!("")));
    }

    #[test]
    fn test_gate_rejects_missing_payload() {
        let (mut node, transport, host) = setup(settings(), ReplyMode::Acknowledge);

        node.handle_input(FlowMessage::default().topic("nothing"));
        node.process_ready();

        assert!(transport.written().is_empty());
        assert_eq!(node.pending_count(), 0);
        assert!(host.sent().is_empty());
        assert!(host.logged_errors().is_empty());
    }

    #[test]
    fn test_no_active_client_skips_write() {
        let (mut node, transport, host) = setup(settings(), ReplyMode::Acknowledge);
        transport.set_active(false).unwrap();

        node.handle_input(FlowMessage::with_payload(json!(true)));
        node.process_ready();

        assert!(transport.written().is_empty());
        assert!(host.sent().is_empty());
        assert!(host.reports().is_empty());
    }

    #[test]
    fn test_missing_server_makes_node_inert() {
        let host = Arc::new(RecordingHost::new());
        let mut node = ModbusWriteNode::new(settings(), None, host.clone());

        assert!(node.is_inert());
        node.handle_input(FlowMessage::with_payload(json!(true)));

        assert_eq!(node.pending_count(), 0);
        assert!(host.sent().is_empty());
        assert_eq!(host.statuses(), vec![NodeStatus::waiting()]);
    }

    #[test]
    fn test_resolve_transport_by_server_name() {
        let plc: Arc<dyn ModbusTransport> = Arc::new(LoopbackTransport::new("plc", ReplyMode::Hold));
        let other: Arc<dyn ModbusTransport> = Arc::new(LoopbackTransport::new("other", ReplyMode::Hold));
        let transports = vec![other, plc];

        let found = resolve_transport(&settings(), &transports).unwrap();
        assert_eq!(found.name(), "plc");

        let unnamed = WriteNodeSettings { server: None, ..settings() };
        assert!(resolve_transport(&unnamed, &transports).is_none());
    }

    #[test]
    fn test_unsupported_data_type_takes_error_path() {
        let settings = WriteNodeSettings {
            data_type: DataType::Unknown("Input".to_string()),
            show_errors: true,
            ..settings()
        };
        let (mut node, transport, host) = setup(settings, ReplyMode::Acknowledge);
        let original = FlowMessage::with_payload(json!({"value": 1}));

        node.handle_input(original.clone());

        assert!(transport.written().is_empty());
        assert_eq!(node.pending_count(), 0);
        let logged = host.logged_errors();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].1, original);
    }

    #[test]
    fn test_dropped_intent_fails_write() {
        let (mut node, transport, host) = setup(settings(), ReplyMode::Hold);

        node.handle_input(FlowMessage::with_payload(json!(true)).topic("lost"));
        drop(transport.take_held());
        node.process_ready();

        assert_eq!(node.pending_count(), 0);
        let reports = host.reports();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].error.contains("without completing"));
        assert_eq!(reports[0].message.topic.as_deref(), Some("lost"));
    }

    #[test]
    fn test_status_follows_writes_and_client_events() {
        let settings = WriteNodeSettings {
            show_status_activities: true,
            ..settings()
        };
        let (mut node, transport, host) = setup(settings, ReplyMode::Acknowledge);

        node.handle_input(FlowMessage::with_payload(json!(true)));
        node.process_ready();
        assert!(host.statuses().contains(&NodeStatus::write_done()));

        transport.broadcast(ClientEvent::Broken).unwrap();
        node.process_ready();
        assert_eq!(host.last_status().unwrap().text, "broken");
    }

    #[test]
    fn test_default_status_when_activities_hidden() {
        let (_node, _transport, host) = setup(settings(), ReplyMode::Acknowledge);
        assert_eq!(
            host.statuses(),
            vec![NodeStatus::waiting(), NodeStatus::default_active()]
        );
    }

    #[tokio::test]
    async fn test_teardown_clears_pending_and_tolerates_late_completions() {
        let (mut node, transport, host) = setup(settings(), ReplyMode::Hold);
        for n in 0..3 {
            node.handle_input(FlowMessage::with_payload(json!(n)));
        }
        assert_eq!(node.pending_count(), 3);

        node.close().await;

        assert_eq!(node.pending_count(), 0);
        assert!(transport.registered_endpoints().is_empty());
        assert_eq!(host.closed_nodes(), vec!["write-1".to_string()]);
        assert_eq!(host.last_status(), Some(NodeStatus::closed()));

        for intent in transport.take_held() {
            let message = intent.command.clone();
            intent.completion.succeed(json!({}), message);
        }
        assert_eq!(node.process_ready(), 3);
        assert!(host.sent().is_empty());
        assert!(host.reports().is_empty());

        // inputs after close are ignored
        node.handle_input(FlowMessage::with_payload(json!(1)));
        assert_eq!(transport.written().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_writes_expire() {
        let settings = WriteNodeSettings {
            pending_timeout_ms: Some(100),
            ..settings()
        };
        let (mut node, _transport, host) = setup(settings, ReplyMode::Hold);

        node.handle_input(FlowMessage::with_payload(json!(true)).topic("slow"));
        assert_eq!(node.expire_pending(Instant::now()), 0);

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(node.expire_pending(Instant::now()), 1);

        assert_eq!(node.pending_count(), 0);
        let reports = host.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].error, WriteError::Timeout.to_string());
        assert_eq!(reports[0].message.topic.as_deref(), Some("slow"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_failure_after_timeout_is_not_reported_again() {
        let settings = WriteNodeSettings {
            pending_timeout_ms: Some(100),
            empty_msg_on_fail: true,
            ..settings()
        };
        let (mut node, transport, host) = setup(settings, ReplyMode::Hold);

        node.handle_input(FlowMessage::with_payload(json!(true)).topic("slow"));
        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(node.expire_pending(Instant::now()), 1);

        // transport gives up on the write afterwards
        drop(transport.take_held());
        assert_eq!(node.process_ready(), 1);

        let reports = host.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].error, WriteError::Timeout.to_string());
        assert_eq!(host.sent().len(), 1);
        assert_eq!(host.logged_errors().len(), 1);
    }

    #[tokio::test]
    async fn test_run_processes_inputs_until_closed() {
        let (mut node, transport, host) = setup(settings(), ReplyMode::Acknowledge);
        let (tx, rx) = mpsc::channel(8);

        for n in 0..4 {
            tx.send(FlowMessage::with_payload(json!({"value": n % 2 == 0})).topic(format!("m{}", n)))
                .await
                .unwrap();
        }
        drop(tx);

        node.run(rx, std::future::pending()).await;

        assert_eq!(transport.written().len(), 4);
        assert_eq!(host.sent().len(), 4);
        assert_eq!(node.pending_count(), 0);
        assert_eq!(host.closed_nodes(), vec!["write-1".to_string()]);
    }
}
