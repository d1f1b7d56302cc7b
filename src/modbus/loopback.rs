use async_trait::async_trait;
use log::{debug, info};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

use super::protocol::{FunctionCode, WriteCommand};
use super::transport::{
    ClientEvent, EndpointRegistration, ModbusTransport, ServiceState, WriteIntent,
};
use crate::utils::error::WriteError;

/// How the loopback answers writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyMode {
    /// Acknowledge every write immediately.
    Acknowledge,
    /// Fail every n-th write, acknowledge the rest.
    FailEvery(u32),
    /// Hold intents until the caller resolves them via [`LoopbackTransport::take_held`].
    Hold,
}

struct LoopbackState {
    active: bool,
    mode: ReplyMode,
    endpoints: HashMap<String, mpsc::UnboundedSender<ClientEvent>>,
    held: Vec<WriteIntent>,
    written: Vec<WriteCommand>,
}

/// In-process transport without a physical link.
///
/// Stands in for a real Modbus client in the CLI runner and in tests:
/// answers writes with the echo a device would send back.
pub struct LoopbackTransport {
    name: String,
    state: Mutex<LoopbackState>,
}

impl LoopbackTransport {
    pub fn new(name: &str, mode: ReplyMode) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(LoopbackState {
                active: false,
                mode,
                endpoints: HashMap::new(),
                held: Vec::new(),
                written: Vec::new(),
            }),
        }
    }

    /// Opens or drops the simulated client and tells every endpoint.
    pub fn set_active(&self, active: bool) -> Result<(), WriteError> {
        let mut state = self.state.lock().map_err(|_| WriteError::LockError)?;
        state.active = active;
        let event = if active { ClientEvent::Connected } else { ClientEvent::Closed };
        state
            .endpoints
            .retain(|_, events| events.send(event.clone()).is_ok());
        info!("🔌 Loopback '{}' client {}", self.name, if active { "opened" } else { "closed" });
        Ok(())
    }

    pub fn set_mode(&self, mode: ReplyMode) -> Result<(), WriteError> {
        let mut state = self.state.lock().map_err(|_| WriteError::LockError)?;
        state.mode = mode;
        Ok(())
    }

    pub fn broadcast(&self, event: ClientEvent) -> Result<(), WriteError> {
        let mut state = self.state.lock().map_err(|_| WriteError::LockError)?;
        state
            .endpoints
            .retain(|_, events| events.send(event.clone()).is_ok());
        Ok(())
    }

    /// Intents held in [`ReplyMode::Hold`], oldest first.
    pub fn take_held(&self) -> Vec<WriteIntent> {
        self.state
            .lock()
            .map(|mut state| std::mem::take(&mut state.held))
            .unwrap_or_default()
    }

    pub fn written(&self) -> Vec<WriteCommand> {
        self.state
            .lock()
            .map(|state| state.written.clone())
            .unwrap_or_default()
    }

    pub fn registered_endpoints(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|state| state.endpoints.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// The response a device echoes for a successful write.
pub fn device_echo(command: &WriteCommand) -> Value {
    match command.function_code {
        FunctionCode::WriteSingleCoil => json!({
            "address": command.address,
            "state": command.value,
        }),
        FunctionCode::WriteSingleRegister => json!({
            "address": command.address,
            "value": command.value,
        }),
        FunctionCode::WriteMultipleCoils | FunctionCode::WriteMultipleRegisters => json!({
            "address": command.address,
            "length": command.quantity,
        }),
    }
}

#[async_trait]
impl ModbusTransport for LoopbackTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn has_active_client(&self) -> bool {
        self.state.lock().map(|state| state.active).unwrap_or(false)
    }

    fn actual_service_state(&self) -> ServiceState {
        match self.state.lock() {
            Ok(state) if !state.active => ServiceState::Stopped,
            Ok(state) if !state.held.is_empty() => ServiceState::Queueing,
            Ok(_) => ServiceState::Activated,
            Err(_) => ServiceState::Failed,
        }
    }

    fn register(&self, registration: EndpointRegistration) -> Result<(), WriteError> {
        let mut state = self.state.lock().map_err(|_| WriteError::LockError)?;
        let _ = registration.events.send(ClientEvent::Initialized);
        if state.active {
            let _ = registration.events.send(ClientEvent::Active);
        }
        debug!("📋 Loopback '{}' registered endpoint {}", self.name, registration.endpoint_id);
        state
            .endpoints
            .insert(registration.endpoint_id, registration.events);
        Ok(())
    }

    async fn deregister(&self, endpoint_id: &str) -> Result<(), WriteError> {
        let mut state = self.state.lock().map_err(|_| WriteError::LockError)?;
        state
            .endpoints
            .remove(endpoint_id)
            .map(|_| debug!("📋 Loopback '{}' deregistered endpoint {}", self.name, endpoint_id))
            .ok_or_else(|| WriteError::NotRegistered(endpoint_id.to_string()))
    }

    fn emit_write(&self, intent: WriteIntent) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(_) => {
                let message = intent.command.clone();
                intent.completion.fail(WriteError::LockError, message);
                return;
            }
        };

        state.written.push(intent.command.clone());
        let sequence = state.written.len() as u32;
        let mode = state.mode;

        match mode {
            ReplyMode::Hold => state.held.push(intent),
            ReplyMode::FailEvery(n) if n > 0 && sequence % n == 0 => {
                let message = intent.command.clone();
                intent.completion.fail(
                    WriteError::Transport(format!("simulated failure on write #{}", sequence)),
                    message,
                );
            }
            _ => {
                let message = intent.command.clone();
                intent.completion.succeed(device_echo(&message), message);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::message::WriteValue;
    use crate::modbus::protocol::CorrelationId;
    use crate::modbus::transport::WriteCompletion;

    fn command(function_code: FunctionCode) -> WriteCommand {
        WriteCommand {
            topic: "t".to_string(),
            unit_id: 1,
            function_code,
            address: 10,
            quantity: 2,
            value: WriteValue::Bool(true),
            correlation_id: CorrelationId::generate(),
            message_id: None,
        }
    }

    #[test]
    fn test_device_echo_shapes() {
        assert_eq!(
            device_echo(&command(FunctionCode::WriteSingleCoil)),
            json!({"address": 10, "state": true})
        );
        assert_eq!(
            device_echo(&command(FunctionCode::WriteMultipleRegisters)),
            json!({"address": 10, "length": 2})
        );
    }

    #[test]
    fn test_fail_every_second_write() {
        let transport = LoopbackTransport::new("lb", ReplyMode::FailEvery(2));
        let (tx, mut rx) = mpsc::unbounded_channel();

        transport.emit_write(WriteIntent::new(command(FunctionCode::WriteSingleCoil), tx.clone()));
        transport.emit_write(WriteIntent::new(command(FunctionCode::WriteSingleCoil), tx));

        assert!(matches!(rx.try_recv().unwrap(), WriteCompletion::Done { .. }));
        assert!(matches!(rx.try_recv().unwrap(), WriteCompletion::Failed { .. }));
        assert_eq!(transport.written().len(), 2);
    }

    #[test]
    fn test_hold_keeps_intents_until_taken() {
        let transport = LoopbackTransport::new("lb", ReplyMode::Hold);
        transport.set_active(true).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        transport.emit_write(WriteIntent::new(command(FunctionCode::WriteSingleCoil), tx));
        assert!(rx.try_recv().is_err());
        assert_eq!(transport.actual_service_state(), ServiceState::Queueing);

        let held = transport.take_held();
        assert_eq!(held.len(), 1);
        assert_eq!(transport.actual_service_state(), ServiceState::Activated);
    }

    #[tokio::test]
    async fn test_register_and_deregister() {
        let transport = LoopbackTransport::new("lb", ReplyMode::Acknowledge);
        let (tx, mut events) = mpsc::unbounded_channel();

        transport
            .register(EndpointRegistration { endpoint_id: "n1".to_string(), events: tx })
            .unwrap();
        assert_eq!(events.try_recv().unwrap(), ClientEvent::Initialized);
        assert_eq!(transport.registered_endpoints(), vec!["n1".to_string()]);

        transport.set_active(true).unwrap();
        assert_eq!(events.try_recv().unwrap(), ClientEvent::Connected);

        transport.deregister("n1").await.unwrap();
        assert!(transport.registered_endpoints().is_empty());
        assert_eq!(
            transport.deregister("n1").await,
            Err(WriteError::NotRegistered("n1".to_string()))
        );
    }
}
