//! Outbound requests to the agent gateway.
//!
//! The pipeline issues requests through [`GatewayClient`]; the transport
//! behind it (websocket RPC, a replay harness, a test double) is the host's
//! business. Calls are fire-and-report: a returned error means the request
//! was not accepted, not that the run failed.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LiveError, Result};
use crate::event::{RunId, SessionKey};

/// A user message that starts a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub session_key: SessionKey,
    pub message: String,
    /// Run id assigned by the pipeline, sent as the idempotency key.
    #[serde(rename = "idempotencyKey")]
    pub run_id: RunId,
}

/// Why authoritative history is being reloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReloadReason {
    /// The active run finished.
    Final,
    /// Another run of the session finished.
    ForeignRunFinal,
    /// The active run was abandoned by the stall monitor.
    Stalled,
}

impl ReloadReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Final => "final",
            Self::ForeignRunFinal => "foreign-run-final",
            Self::Stalled => "stalled",
        }
    }
}

/// Outbound side of the gateway connection.
pub trait GatewayClient {
    /// Submit a user message.
    fn send_message(&mut self, request: &SendRequest) -> Result<()>;

    /// Ask the gateway to stop a run. `run_id` is absent when no run id is
    /// known, in which case the session's current run is meant.
    fn abort_run(&mut self, session: &SessionKey, run_id: Option<&RunId>) -> Result<()>;

    /// Request the session's history. The host reports completion through
    /// `ChatPipeline::history_reloaded`.
    fn reload_history(&mut self, session: &SessionKey, reason: ReloadReason) -> Result<()>;
}

/// One request seen by a [`RecordingGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Send(SendRequest),
    Abort {
        session: SessionKey,
        run_id: Option<RunId>,
    },
    Reload {
        session: SessionKey,
        reason: ReloadReason,
    },
}

/// Gateway that records every request and optionally refuses sends.
#[derive(Debug, Default)]
pub struct RecordingGateway {
    calls: Vec<GatewayCall>,
    refuse_sends: Option<String>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `send_message` fail with `reason` until reset with `None`.
    pub fn refuse_sends(&mut self, reason: Option<&str>) {
        self.refuse_sends = reason.map(str::to_string);
    }

    pub fn calls(&self) -> &[GatewayCall] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<GatewayCall> {
        std::mem::take(&mut self.calls)
    }

    /// Reload requests recorded so far, oldest first.
    pub fn reloads(&self) -> Vec<(SessionKey, ReloadReason)> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                GatewayCall::Reload { session, reason } => Some((session.clone(), *reason)),
                _ => None,
            })
            .collect()
    }
}

impl GatewayClient for RecordingGateway {
    fn send_message(&mut self, request: &SendRequest) -> Result<()> {
        if let Some(reason) = &self.refuse_sends {
            return Err(LiveError::gateway("chat.send", reason.clone()));
        }
        debug!(session = %request.session_key, run = %request.run_id, "Recorded send");
        self.calls.push(GatewayCall::Send(request.clone()));
        Ok(())
    }

    fn abort_run(&mut self, session: &SessionKey, run_id: Option<&RunId>) -> Result<()> {
        self.calls.push(GatewayCall::Abort {
            session: session.clone(),
            run_id: run_id.cloned(),
        });
        Ok(())
    }

    fn reload_history(&mut self, session: &SessionKey, reason: ReloadReason) -> Result<()> {
        self.calls.push(GatewayCall::Reload {
            session: session.clone(),
            reason,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_request_wire_shape() {
        let request = SendRequest {
            session_key: SessionKey::from("main"),
            message: "hello".to_string(),
            run_id: RunId::from("r1"),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "sessionKey": "main",
                "message": "hello",
                "idempotencyKey": "r1"
            })
        );
    }

    #[test]
    fn test_recording_gateway_records_in_order() {
        let mut gateway = RecordingGateway::new();
        let session = SessionKey::from("main");
        gateway
            .abort_run(&session, Some(&RunId::from("r1")))
            .unwrap();
        gateway
            .reload_history(&session, ReloadReason::Stalled)
            .unwrap();

        assert_eq!(gateway.calls().len(), 2);
        assert_eq!(gateway.reloads(), vec![(session, ReloadReason::Stalled)]);
        assert_eq!(gateway.take_calls().len(), 2);
        assert!(gateway.calls().is_empty());
    }

    #[test]
    fn test_refused_send() {
        let mut gateway = RecordingGateway::new();
        gateway.refuse_sends(Some("offline"));
        let request = SendRequest {
            session_key: SessionKey::from("main"),
            message: "hi".to_string(),
            run_id: RunId::from("r1"),
        };
        let err = gateway.send_message(&request).unwrap_err();
        assert_eq!(err.to_string(), "Gateway request 'chat.send' failed: offline");
        assert!(gateway.calls().is_empty());
    }
}
