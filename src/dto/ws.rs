use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dto::{press::PressResponse, sse::SessionUpdateEvent};

#[derive(Debug, Deserialize, Serialize, ToSchema)]
/// Messages accepted from button WebSocket clients.
#[serde(tag = "type")]
pub enum ButtonInboundMessage {
    /// First message: binds the connection to a user and a session.
    #[serde(rename = "identification")]
    Identification { session_id: Uuid, user_id: Uuid },
    /// A press of the bound user.
    #[serde(rename = "press")]
    Press,
    #[serde(other)]
    Unknown,
}

impl ButtonInboundMessage {
    /// Parse a text frame.
    pub fn from_json_str(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Messages pushed to button WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ButtonOutboundMessage {
    /// Positive acknowledgement of the identification.
    Ack { session_id: Uuid, user_id: Uuid },
    /// Outcome of a press.
    PressFeedback(PressResponse),
    /// Latest session state.
    SessionUpdate(SessionUpdateEvent),
    /// Protocol or lookup error; the server may close afterwards.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identification_is_parsed() {
        let session_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let text = format!(
            r#"{{"type":"identification","session_id":"{session_id}","user_id":"{user_id}"}}"#
        );
        match ButtonInboundMessage::from_json_str(&text).unwrap() {
            ButtonInboundMessage::Identification {
                session_id: s,
                user_id: u,
            } => {
                assert_eq!(s, session_id);
                assert_eq!(u, user_id);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn unknown_types_do_not_fail() {
        assert!(matches!(
            ButtonInboundMessage::from_json_str(r#"{"type":"dance"}"#).unwrap(),
            ButtonInboundMessage::Unknown
        ));
        assert!(matches!(
            ButtonInboundMessage::from_json_str(r#"{"type":"press"}"#).unwrap(),
            ButtonInboundMessage::Press
        ));
    }

    #[test]
    fn outbound_messages_are_tagged() {
        let json = serde_json::to_value(ButtonOutboundMessage::Error {
            message: "nope".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "nope");
    }
}
