//! Message protocol definitions
//!
//! DDP messages exchanged with the server as JSON text frames. Outgoing
//! frames use a Serde tagged enum; incoming frames are parsed into a tagged
//! wire enum and then classified into `DecodedMessage`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{ApiError, SessionError};
use crate::types::CallId;

/// DDP protocol version requested in the handshake
pub const DDP_VERSION: &str = "1";

/// Protocol versions offered to the server, most preferred first
pub const DDP_SUPPORTED_VERSIONS: [&str; 3] = ["1", "pre2", "pre1"];

/// Client → Server message
///
/// Uses tagged enum keyed by `msg` with lowercase naming.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum OutgoingMessage {
    /// Session handshake, sent once the socket opens
    Connect {
        version: String,
        support: Vec<String>,
    },
    /// Remote method call
    Method {
        method: String,
        params: Vec<Value>,
        id: String,
    },
    /// Start a subscription
    Sub {
        id: String,
        name: String,
        params: Vec<Value>,
    },
    /// Stop a subscription
    Unsub { id: String },
    /// Heartbeat
    Ping {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// Heartbeat reply
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

impl OutgoingMessage {
    /// The handshake frame for the versions this client speaks
    pub fn connect() -> Self {
        OutgoingMessage::Connect {
            version: DDP_VERSION.to_string(),
            support: DDP_SUPPORTED_VERSIONS.iter().map(|v| v.to_string()).collect(),
        }
    }

    /// Build a method call frame for the given correlation id
    pub fn method(id: &CallId, method: &str, params: Vec<Value>) -> Self {
        OutgoingMessage::Method {
            method: method.to_string(),
            params,
            id: id.to_string(),
        }
    }

    /// Serialize to a text frame
    pub fn encode(&self) -> Result<String, SessionError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Outcome carried by a `result` frame
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// `result` field (or `null` when the method returned nothing)
    Success(Value),
    /// `error` field parsed into an API error
    Failure(ApiError),
    /// `error` field present but not an error object
    Malformed(String),
}

/// Server → Client message, classified
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMessage {
    Connected {
        session: String,
    },
    /// Server refused every offered protocol version
    Failed {
        version: Option<String>,
    },
    Result {
        id: CallId,
        outcome: CallOutcome,
    },
    Added {
        collection: String,
        id: String,
        fields: Value,
    },
    Changed {
        collection: String,
        id: String,
        fields: Value,
        cleared: Vec<String>,
    },
    Removed {
        collection: String,
        id: String,
    },
    Ready {
        subs: Vec<String>,
    },
    NoSub {
        id: String,
        error: Option<ApiError>,
    },
    Updated {
        methods: Vec<String>,
    },
    Ping {
        id: Option<String>,
    },
    Pong {
        id: Option<String>,
    },
    /// Server could not process something we sent
    ServerError {
        reason: String,
    },
    /// Unparseable or unrecognized frame
    Unknown,
}

/// Wire shape of incoming frames
#[derive(Debug, Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
enum WireMessage {
    Connected {
        session: String,
    },
    Failed {
        #[serde(default)]
        version: Option<String>,
    },
    Result {
        id: String,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<Value>,
    },
    Added {
        collection: String,
        id: String,
        #[serde(default)]
        fields: Value,
    },
    Changed {
        collection: String,
        id: String,
        #[serde(default)]
        fields: Value,
        #[serde(default)]
        cleared: Vec<String>,
    },
    Removed {
        collection: String,
        id: String,
    },
    Ready {
        #[serde(default)]
        subs: Vec<String>,
    },
    Nosub {
        id: String,
        #[serde(default)]
        error: Option<ApiError>,
    },
    Updated {
        #[serde(default)]
        methods: Vec<String>,
    },
    Ping {
        #[serde(default)]
        id: Option<String>,
    },
    Pong {
        #[serde(default)]
        id: Option<String>,
    },
    Error {
        #[serde(default)]
        reason: String,
    },
    #[serde(other)]
    Other,
}

/// Classify a raw text frame
///
/// Total: a frame that cannot be parsed becomes `Unknown` so one bad frame
/// never takes the session down.
pub fn decode(raw: &str) -> DecodedMessage {
    let wire = match serde_json::from_str::<WireMessage>(raw) {
        Ok(wire) => wire,
        Err(e) => {
            warn!("Dropping malformed frame: {}", e);
            return DecodedMessage::Unknown;
        }
    };

    match wire {
        WireMessage::Connected { session } => DecodedMessage::Connected { session },
        WireMessage::Failed { version } => DecodedMessage::Failed { version },
        WireMessage::Result { id, result, error } => DecodedMessage::Result {
            id: CallId(id),
            outcome: classify_result(result, error),
        },
        WireMessage::Added {
            collection,
            id,
            fields,
        } => DecodedMessage::Added {
            collection,
            id,
            fields,
        },
        WireMessage::Changed {
            collection,
            id,
            fields,
            cleared,
        } => DecodedMessage::Changed {
            collection,
            id,
            fields,
            cleared,
        },
        WireMessage::Removed { collection, id } => DecodedMessage::Removed { collection, id },
        WireMessage::Ready { subs } => DecodedMessage::Ready { subs },
        WireMessage::Nosub { id, error } => DecodedMessage::NoSub { id, error },
        WireMessage::Updated { methods } => DecodedMessage::Updated { methods },
        WireMessage::Ping { id } => DecodedMessage::Ping { id },
        WireMessage::Pong { id } => DecodedMessage::Pong { id },
        WireMessage::Error { reason } => DecodedMessage::ServerError { reason },
        WireMessage::Other => DecodedMessage::Unknown,
    }
}

fn classify_result(result: Option<Value>, error: Option<Value>) -> CallOutcome {
    match error {
        Some(error) => match serde_json::from_value::<ApiError>(error) {
            Ok(api_error) => CallOutcome::Failure(api_error),
            Err(e) => CallOutcome::Malformed(format!("unreadable error payload: {}", e)),
        },
        None => CallOutcome::Success(result.unwrap_or(Value::Null)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_frame_serialize() {
        let msg = OutgoingMessage::method(&CallId::from("7"), "login", vec![json!({"resume": "abc"})]);
        let json = msg.encode().unwrap();
        assert_eq!(
            json,
            r#"{"msg":"method","method":"login","params":[{"resume":"abc"}],"id":"7"}"#
        );
    }

    #[test]
    fn test_connect_and_heartbeat_serialize() {
        let json = OutgoingMessage::connect().encode().unwrap();
        assert_eq!(json, r#"{"msg":"connect","version":"1","support":["1","pre2","pre1"]}"#);

        let json = OutgoingMessage::Pong { id: None }.encode().unwrap();
        assert_eq!(json, r#"{"msg":"pong"}"#);

        let json = OutgoingMessage::Pong { id: Some("p1".into()) }.encode().unwrap();
        assert_eq!(json, r#"{"msg":"pong","id":"p1"}"#);
    }

    #[test]
    fn test_decode_connected() {
        let msg = decode(r#"{"msg":"connected","session":"Fd4Sx"}"#);
        assert_eq!(
            msg,
            DecodedMessage::Connected {
                session: "Fd4Sx".to_string()
            }
        );
    }

    #[test]
    fn test_decode_result_success_and_failure() {
        let msg = decode(r#"{"msg":"result","id":"1","result":{"ok":true}}"#);
        assert_eq!(
            msg,
            DecodedMessage::Result {
                id: CallId::from("1"),
                outcome: CallOutcome::Success(json!({"ok": true})),
            }
        );

        let msg = decode(
            r#"{"msg":"result","id":"2","error":{"error":403,"reason":"User not found","message":"User not found [403]","errorType":"Meteor.Error"}}"#,
        );
        match msg {
            DecodedMessage::Result {
                id,
                outcome: CallOutcome::Failure(err),
            } => {
                assert_eq!(id, CallId::from("2"));
                assert_eq!(err.code, Some(403));
                assert_eq!(err.error_type, "Meteor.Error");
            }
            other => panic!("Wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_decode_result_without_payload_is_null() {
        let msg = decode(r#"{"msg":"result","id":"3"}"#);
        assert_eq!(
            msg,
            DecodedMessage::Result {
                id: CallId::from("3"),
                outcome: CallOutcome::Success(Value::Null),
            }
        );
    }

    #[test]
    fn test_decode_result_with_malformed_error() {
        let msg = decode(r#"{"msg":"result","id":"4","error":"boom"}"#);
        assert!(matches!(
            msg,
            DecodedMessage::Result {
                outcome: CallOutcome::Malformed(_),
                ..
            }
        ));
    }

    #[test]
    fn test_decode_stream_events() {
        let msg = decode(
            r#"{"msg":"changed","collection":"stream-room-messages","id":"id","fields":{"eventName":"GENERAL","args":[]}}"#,
        );
        match msg {
            DecodedMessage::Changed {
                collection, fields, cleared, ..
            } => {
                assert_eq!(collection, "stream-room-messages");
                assert_eq!(fields["eventName"], "GENERAL");
                assert!(cleared.is_empty());
            }
            other => panic!("Wrong variant: {:?}", other),
        }

        let msg = decode(r#"{"msg":"removed","collection":"users","id":"u1"}"#);
        assert_eq!(
            msg,
            DecodedMessage::Removed {
                collection: "users".to_string(),
                id: "u1".to_string()
            }
        );
    }

    #[test]
    fn test_decode_ping_with_and_without_id() {
        assert_eq!(decode(r#"{"msg":"ping"}"#), DecodedMessage::Ping { id: None });
        assert_eq!(
            decode(r#"{"msg":"ping","id":"x"}"#),
            DecodedMessage::Ping {
                id: Some("x".to_string())
            }
        );
    }

    #[test]
    fn test_decode_is_total() {
        assert_eq!(decode("not json"), DecodedMessage::Unknown);
        assert_eq!(decode(r#"{"msg":"teleport"}"#), DecodedMessage::Unknown);
        assert_eq!(decode(r#"{"no_msg":1}"#), DecodedMessage::Unknown);
        assert_eq!(decode(r#"{"msg":"result"}"#), DecodedMessage::Unknown);
        assert_eq!(decode("[]"), DecodedMessage::Unknown);
    }

    #[test]
    fn test_decode_nosub_with_error() {
        let msg = decode(r#"{"msg":"nosub","id":"s1","error":{"error":404,"reason":"Subscription not found"}}"#);
        match msg {
            DecodedMessage::NoSub { id, error: Some(err) } => {
                assert_eq!(id, "s1");
                assert_eq!(err.code, Some(404));
            }
            other => panic!("Wrong variant: {:?}", other),
        }
    }
}
