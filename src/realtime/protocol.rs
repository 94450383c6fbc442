//! Logical channel protocol shared by the client session and the gateway.
//!
//! Client frames carry an `op` tag. Server frames are either control frames
//! (also `op`-tagged) or bare data frames `{channel, payload}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Connection query parameters sent at connect and on every reconnect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeParams {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ClientFrame {
    Join { channel: String },
    Leave { channel: String },
}

impl ClientFrame {
    pub fn channel(&self) -> &str {
        match self {
            ClientFrame::Join { channel } | ClientFrame::Leave { channel } => channel,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ControlFrame {
    /// Handshake acknowledged
    Ready,
    /// Handshake refused; the connection will be closed by the server
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    pub channel: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Control(ControlFrame),
    Data(DataFrame),
}

impl ServerFrame {
    pub fn data(channel: impl Into<String>, payload: Value) -> Self {
        ServerFrame::Data(DataFrame { channel: channel.into(), payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn client_frames_use_op_tag() {
        let join = serde_json::to_value(ClientFrame::Join { channel: "vitals".into() }).unwrap();
        assert_eq!(join, json!({"op": "join", "channel": "vitals"}));

        let leave: ClientFrame = serde_json::from_value(json!({"op": "leave", "channel": "alerts"})).unwrap();
        assert_eq!(leave, ClientFrame::Leave { channel: "alerts".into() });
    }

    #[test]
    fn server_frames_distinguish_control_from_data() {
        let ready: ServerFrame = serde_json::from_str(r#"{"op":"ready"}"#).unwrap();
        assert_eq!(ready, ServerFrame::Control(ControlFrame::Ready));

        let rejected: ServerFrame = serde_json::from_str(r#"{"op":"rejected","reason":"expired"}"#).unwrap();
        assert_eq!(
            rejected,
            ServerFrame::Control(ControlFrame::Rejected { reason: "expired".into() })
        );

        let data: ServerFrame = serde_json::from_str(r#"{"channel":"vitals","payload":{"bpm":72}}"#).unwrap();
        assert_eq!(data, ServerFrame::data("vitals", json!({"bpm": 72})));
    }

    #[test]
    fn unknown_frames_fail_to_parse() {
        assert!(serde_json::from_str::<ServerFrame>(r#"{"op":"bogus"}"#).is_err());
    }
}
