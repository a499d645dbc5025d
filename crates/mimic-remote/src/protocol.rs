//! Wire format of the control channel.
//!
//! Server → client messages are JSON objects tagged by `action`; client →
//! server messages are tagged by `type`.

use mimic_core::{BehaviourSummary, IdleCycleStatus, ManagerStatus, MimicError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

const KNOWN_ACTIONS: [&str; 3] = ["config_update", "update_behaviour_config", "run_behaviour"];

/// A command pushed by the control server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Deep-merge `config` into the whole configuration document.
    ConfigUpdate { config: Value },
    /// Deep-merge `config` into `[behaviours.<behaviour_id>]`.
    UpdateBehaviourConfig { behaviour_id: String, config: Value },
    /// Start a behaviour now, replacing whatever runs.
    RunBehaviour { behaviour_id: String },
}

impl ServerMessage {
    /// Parse one text frame. Unknown actions yield `Ok(None)`; anything
    /// unparseable is a `MessageDecode` error.
    pub fn decode(text: &str) -> Result<Option<Self>> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| MimicError::MessageDecode(e.to_string()))?;
        let action = value
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| MimicError::MessageDecode("missing 'action' field".into()))?;

        if !KNOWN_ACTIONS.contains(&action) {
            debug!(action = %action, "ignoring unknown remote action");
            return Ok(None);
        }

        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| MimicError::MessageDecode(e.to_string()))
    }
}

/// A message sent by this client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    StatusUpdate {
        hostname: String,
        current_behaviour: Option<BehaviourSummary>,
        idle_cycle_status: IdleCycleStatus,
        /// Seconds since the Unix epoch.
        timestamp: f64,
    },
}

impl ClientMessage {
    pub fn status_update(hostname: impl Into<String>, status: &ManagerStatus) -> Self {
        ClientMessage::StatusUpdate {
            hostname: hostname.into(),
            current_behaviour: status.current_behaviour.clone(),
            idle_cycle_status: status.idle_cycle_status,
            timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        }
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Form body of the authentication request.
#[derive(Debug, Serialize)]
pub struct AuthRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub hostname: &'a str,
}

/// Body returned by a successful authentication.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub access_token: String,
    /// Initial configuration, merged like a `config_update`.
    #[serde(default)]
    pub client_config: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimic_core::BehaviourCategory;
    use serde_json::json;

    #[test]
    fn test_decode_each_action() {
        let msg = ServerMessage::decode(r#"{"action":"config_update","config":{"a":1}}"#).unwrap();
        assert_eq!(
            msg,
            Some(ServerMessage::ConfigUpdate {
                config: json!({"a": 1})
            })
        );

        let msg = ServerMessage::decode(
            r#"{"action":"update_behaviour_config","behaviour_id":"work_word","config":{"docs":2}}"#,
        )
        .unwrap();
        assert!(matches!(
            msg,
            Some(ServerMessage::UpdateBehaviourConfig { ref behaviour_id, .. }) if behaviour_id == "work_word"
        ));

        let msg = ServerMessage::decode(r#"{"action":"run_behaviour","behaviour_id":"phish"}"#).unwrap();
        assert_eq!(
            msg,
            Some(ServerMessage::RunBehaviour {
                behaviour_id: "phish".into()
            })
        );
    }

    #[test]
    fn test_decode_unknown_action_is_ignored() {
        assert_eq!(ServerMessage::decode(r#"{"action":"reboot"}"#).unwrap(), None);
    }

    #[test]
    fn test_decode_malformed() {
        for text in [
            "not json",
            r#"{"config":{}}"#,
            r#"{"action":"run_behaviour"}"#,
            r#"{"action":7}"#,
        ] {
            assert!(
                matches!(ServerMessage::decode(text), Err(MimicError::MessageDecode(_))),
                "{text} should fail"
            );
        }
    }

    #[test]
    fn test_status_update_shape() {
        let status = ManagerStatus {
            running: true,
            current_behaviour: Some(BehaviourSummary {
                id: "work_word".into(),
                display_name: "Write documents".into(),
                category: BehaviourCategory::Idle,
            }),
            idle_cycle_status: IdleCycleStatus::Running,
            runs_started: 4,
            queued: 0,
        };
        let text = ClientMessage::status_update("desk-42", &status).to_text().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["type"], "status_update");
        assert_eq!(value["hostname"], "desk-42");
        assert_eq!(
            value["current_behaviour"],
            json!({"id": "work_word", "display_name": "Write documents", "category": "Idle"})
        );
        assert_eq!(value["idle_cycle_status"], "running");
        assert!(value["timestamp"].as_f64().unwrap() > 1_600_000_000.0);
    }

    #[test]
    fn test_status_update_without_behaviour_is_null() {
        let status = ManagerStatus {
            running: false,
            current_behaviour: None,
            idle_cycle_status: IdleCycleStatus::Paused,
            runs_started: 0,
            queued: 0,
        };
        let text = ClientMessage::status_update("h", &status).to_text().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert!(value["current_behaviour"].is_null());
        assert_eq!(value["idle_cycle_status"], "paused");
    }

    #[test]
    fn test_auth_response_optional_config() {
        let r: AuthResponse = serde_json::from_str(r#"{"access_token":"t"}"#).unwrap();
        assert!(r.client_config.is_none());
        let r: AuthResponse =
            serde_json::from_str(r#"{"access_token":"t","client_config":{"x":1}}"#).unwrap();
        assert_eq!(r.client_config, Some(json!({"x": 1})));
    }
}
