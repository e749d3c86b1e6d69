//! Wire protocol types shared between the relay and a tunnel client.
//!
//! Frames are JSON text messages. The codec that puts them on a WebSocket
//! (or any other duplex transport) lives with whoever owns the socket; this
//! module only describes the shapes that cross the wire.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request bodies and response bodies over 50 MiB are rejected before
/// they ever reach a `TunnelRequest`/`TunnelResponse`.
pub const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

/// `headers` crosses the wire as a JSON object (`{"name": "value"}`), per
/// the data model's `mapping name -> value`, not as an array of pairs.
/// Values already had any repeated header name joined by the caller before
/// reaching these types, so a plain map loses nothing.
mod header_map {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S>(headers: &[(String, String)], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let map: BTreeMap<&str, &str> = headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        map.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let map = BTreeMap::<String, String>::deserialize(deserializer)?;
        Ok(map.into_iter().collect())
    }
}

/// One HTTP request, forwarded from the relay to the tunnel client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelRequest {
    pub id: Uuid,
    pub method: String,
    pub path: String,
    #[serde(with = "header_map")]
    pub headers: Vec<(String, String)>,
    /// Base64-encoded body, if the original request had one.
    pub body: Option<String>,
}

impl TunnelRequest {
    pub fn body_bytes(&self) -> Result<Option<Vec<u8>>, base64::DecodeError> {
        self.body.as_deref().map(|b| BASE64.decode(b)).transpose()
    }

    pub fn with_body_bytes(mut self, bytes: &[u8]) -> Self {
        self.body = if bytes.is_empty() {
            None
        } else {
            Some(BASE64.encode(bytes))
        };
        self
    }
}

/// The matching response, sent back from the tunnel client to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelResponse {
    pub id: Uuid,
    pub status_code: u16,
    #[serde(with = "header_map")]
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl TunnelResponse {
    pub fn body_bytes(&self) -> Result<Option<Vec<u8>>, base64::DecodeError> {
        self.body.as_deref().map(|b| BASE64.decode(b)).transpose()
    }

    pub fn with_body_bytes(mut self, bytes: &[u8]) -> Self {
        self.body = if bytes.is_empty() {
            None
        } else {
            Some(BASE64.encode(bytes))
        };
        self
    }
}

/// Frames sent from the relay to a tunnel client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "request")]
    Request { data: TunnelRequest },
    #[serde(rename = "tunnel-ready")]
    TunnelReady {
        url: String,
        subdomain: String,
        id: Uuid,
    },
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "error")]
    Error { message: String },
}

/// Frames sent from a tunnel client to the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "register")]
    Register { subdomain: Option<String> },
    #[serde(rename = "response")]
    Response { data: TunnelResponse },
    #[serde(rename = "pong")]
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_frame_request_shape() {
        let req = TunnelRequest {
            id: Uuid::nil(),
            method: "GET".into(),
            path: "/".into(),
            headers: vec![],
            body: None,
        };
        let frame = ServerFrame::Request { data: req };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "request");
        assert!(json["data"].is_object());
    }

    #[test]
    fn server_frame_tunnel_ready_is_flat() {
        let frame = ServerFrame::TunnelReady {
            url: "https://foo.example.com".into(),
            subdomain: "foo".into(),
            id: Uuid::nil(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "tunnel-ready");
        assert_eq!(json["subdomain"], "foo");
        assert_eq!(json["url"], "https://foo.example.com");
    }

    #[test]
    fn client_frame_register_roundtrip() {
        let raw = r#"{"type":"register","subdomain":"foo"}"#;
        let frame: ClientFrame = serde_json::from_str(raw).unwrap();
        match frame {
            ClientFrame::Register { subdomain } => {
                assert_eq!(subdomain.as_deref(), Some("foo"));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn body_bytes_roundtrip() {
        let req = TunnelRequest {
            id: Uuid::nil(),
            method: "POST".into(),
            path: "/".into(),
            headers: vec![],
            body: None,
        }
        .with_body_bytes(b"hello");
        assert_eq!(req.body_bytes().unwrap().unwrap(), b"hello");
    }

    #[test]
    fn headers_serialize_as_json_object() {
        let resp = TunnelResponse {
            id: Uuid::nil(),
            status_code: 200,
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
            body: None,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json["headers"].is_object());
        assert_eq!(json["headers"]["content-type"], "text/plain");
    }

    #[test]
    fn headers_deserialize_from_json_object() {
        let raw = r#"{"id":"00000000-0000-0000-0000-000000000000","statusCode":200,"headers":{"content-type":"text/plain"},"body":null}"#;
        let resp: TunnelResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(
            resp.headers,
            vec![("content-type".to_string(), "text/plain".to_string())]
        );
    }

    #[test]
    fn tunnel_response_uses_camel_case_status_code() {
        let resp = TunnelResponse {
            id: Uuid::nil(),
            status_code: 204,
            headers: vec![],
            body: None,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["statusCode"], 204);
        assert!(json.get("status_code").is_none());
    }

    #[test]
    fn empty_body_is_none() {
        let req = TunnelRequest {
            id: Uuid::nil(),
            method: "GET".into(),
            path: "/".into(),
            headers: vec![],
            body: None,
        }
        .with_body_bytes(b"");
        assert!(req.body.is_none());
    }
}
