//! JSON-RPC over HTTP transport for the platform plugin host.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::transport::{EventHandler, Transport};

/// [`Transport`] bound to one plugin callsign on a JSON-RPC endpoint.
///
/// Event delivery needs a socket channel that plain HTTP does not offer,
/// so [`subscribe`](Transport::subscribe) always reports failure.
#[derive(Debug)]
pub struct JsonRpcTransport {
    endpoint: String,
    callsign: String,
    client: Client,
    next_id: AtomicU64,
}

impl JsonRpcTransport {
    pub fn new(endpoint: impl Into<String>, callsign: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent("rssecmanager")
            .build()
            .map_err(|e| Error::Other(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.into(),
            callsign: callsign.into(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    /// Transport towards the security manager plugin named in `config`.
    pub fn security(config: &Config) -> Result<Self> {
        Self::new(config.endpoint.clone(), config.security_callsign.clone())
    }

    /// Transport towards the watermark plugin named in `config`.
    pub fn watermark(config: &Config) -> Result<Self> {
        Self::new(config.endpoint.clone(), config.watermark_callsign.clone())
    }

    fn qualified(&self, method: &str) -> String {
        format!("{}.{}", self.callsign, method)
    }
}

impl Transport for JsonRpcTransport {
    fn invoke(&self, method: &str, params: &Value, timeout: Duration) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": self.qualified(method),
            "params": params,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(timeout)
            .json(&body)
            .send()
            .map_err(|e| Error::Transport(format!("Failed to invoke {}: {}", method, e)))?;

        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "{} answered {}",
                method,
                response.status()
            )));
        }

        let body = response
            .text()
            .map_err(|e| Error::Transport(format!("Failed to read {} response: {}", method, e)))?;
        parse_response(&body)
    }

    fn subscribe(&self, event: &str, _handler: EventHandler) -> bool {
        warn!(
            "Cannot subscribe to {}.{} over HTTP",
            self.callsign,
            event
        );
        false
    }

    fn unsubscribe(&self, _event: &str) {}
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

fn parse_response(body: &str) -> Result<Value> {
    let response: RpcResponse = serde_json::from_str(body)?;
    response.into_result()
}

impl RpcResponse {
    fn into_result(self) -> Result<Value> {
        if let Some(error) = self.error {
            return Err(Error::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        self.result
            .ok_or_else(|| Error::InvalidResponse("Missing result".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{parse_response, JsonRpcTransport, RpcResponse};
    use crate::config::Config;
    use crate::error::Error;
    use crate::transport::Transport;

    #[test]
    fn methods_are_qualified_with_callsign() {
        let transport = JsonRpcTransport::security(&Config::default()).expect("client");
        assert_eq!(
            transport.qualified("openPlaybackSession"),
            "org.rdk.SecManager.1.openPlaybackSession"
        );
    }

    #[test]
    fn rpc_error_maps_to_error() {
        let response: RpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0", "id": 1,
            "error": { "code": -32601, "message": "Unknown method" }
        }))
        .expect("parse");
        match response.into_result() {
            Err(Error::Rpc { code, message }) => {
                assert_eq!(code, -32601);
                assert_eq!(message, "Unknown method");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn result_is_returned() {
        let response: RpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0", "id": 1, "result": { "success": true }
        }))
        .expect("parse");
        assert_eq!(response.into_result().expect("result"), json!({ "success": true }));
    }

    #[test]
    fn missing_result_is_invalid() {
        let response: RpcResponse =
            serde_json::from_value(json!({ "jsonrpc": "2.0", "id": 1 })).expect("parse");
        assert!(matches!(response.into_result(), Err(Error::InvalidResponse(_))));
    }

    #[test]
    fn response_body_is_decoded() {
        let result = parse_response(r#"{"jsonrpc":"2.0","id":7,"result":{"sessionId":42}}"#)
            .expect("result");
        assert_eq!(result["sessionId"], 42);
    }

    #[test]
    fn malformed_body_is_json_error() {
        let err = parse_response("<html>502 Bad Gateway</html>").expect_err("not json");
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn events_are_unsupported() {
        let transport = JsonRpcTransport::watermark(&Config::default()).expect("client");
        assert!(!transport.subscribe("onAddWatermark", std::sync::Arc::new(|_: &serde_json::Value| {})));
    }

    #[test]
    fn unreachable_endpoint_is_transport_error() {
        let transport =
            JsonRpcTransport::new("http://127.0.0.1:1/jsonrpc", "org.rdk.SecManager.1").expect("client");
        let err = transport
            .invoke("closePlaybackSession", &json!({}), std::time::Duration::from_millis(200))
            .expect_err("nothing listens on port 1");
        assert!(matches!(err, Error::Transport(_)));
    }
}
