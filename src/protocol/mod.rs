use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const HEARTBEAT_PAYLOAD: &str = "heartbeat";

/// Frames sent to the server. One JSON object per text frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Input { data: String },
    Chat { data: String, user: String },
    Ping { data: String },
}

impl ClientMessage {
    pub fn ping() -> Self {
        ClientMessage::Ping {
            data: HEARTBEAT_PAYLOAD.to_string(),
        }
    }
}

/// Frames received from the server. Tags this client does not know decode to
/// `Unknown` so newer servers never break older clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Output { data: String },
    InputInfo { data: String },
    System { data: String },
    Chat { data: String, user: String },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("encode error: {0}")]
    Encode(serde_json::Error),
    #[error("decode error: {0}")]
    Decode(serde_json::Error),
}

pub fn encode_client_message(message: &ClientMessage) -> Result<String, WireError> {
    serde_json::to_string(message).map_err(WireError::Encode)
}

pub fn decode_server_message(raw: &str) -> Result<ServerMessage, WireError> {
    serde_json::from_str(raw).map_err(WireError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_frame_encodes_with_snake_case_tag() {
        let frame = ClientMessage::Input {
            data: "ls -la\n".into(),
        };
        let encoded = encode_client_message(&frame).unwrap();
        assert_eq!(encoded, r#"{"type":"input","data":"ls -la\n"}"#);
    }

    #[test]
    fn chat_frame_carries_user() {
        let frame = ClientMessage::Chat {
            data: "hello".into(),
            user: "alice".into(),
        };
        let encoded = encode_client_message(&frame).unwrap();
        assert_eq!(encoded, r#"{"type":"chat","data":"hello","user":"alice"}"#);
    }

    #[test]
    fn ping_frame_uses_heartbeat_payload() {
        let encoded = encode_client_message(&ClientMessage::ping()).unwrap();
        assert_eq!(encoded, r#"{"type":"ping","data":"heartbeat"}"#);
    }

    #[test]
    fn decodes_each_known_server_variant() {
        assert_eq!(
            decode_server_message(r#"{"type":"output","data":"$ "}"#).unwrap(),
            ServerMessage::Output { data: "$ ".into() }
        );
        assert_eq!(
            decode_server_message(r#"{"type":"input_info","data":"bob: ls"}"#).unwrap(),
            ServerMessage::InputInfo {
                data: "bob: ls".into()
            }
        );
        assert_eq!(
            decode_server_message(r#"{"type":"system","data":"총 2명 접속중"}"#).unwrap(),
            ServerMessage::System {
                data: "총 2명 접속중".into()
            }
        );
        assert_eq!(
            decode_server_message(r#"{"type":"chat","data":"hi","user":"bob"}"#).unwrap(),
            ServerMessage::Chat {
                data: "hi".into(),
                user: "bob".into()
            }
        );
    }

    #[test]
    fn unknown_tag_decodes_to_unknown() {
        let decoded = decode_server_message(r#"{"type":"resize","data":"80x24"}"#).unwrap();
        assert_eq!(decoded, ServerMessage::Unknown);
    }

    #[test]
    fn malformed_frame_is_a_decode_error() {
        assert!(matches!(
            decode_server_message("not json"),
            Err(WireError::Decode(_))
        ));
        assert!(matches!(
            decode_server_message(r#"{"type":"chat","data":"hi"}"#),
            Err(WireError::Decode(_))
        ));
    }
}
