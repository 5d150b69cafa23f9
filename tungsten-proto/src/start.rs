//! Bodies of the start-handshake HTTP exchange.

use crate::payload::WorkerIdentity;
use serde::{Deserialize, Serialize};

/// Body of the start POST.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    /// Gateway groups the worker is currently avoiding.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_gateways: Vec<String>,

    /// Static worker attributes, repeated here so the scheduler can place
    /// the connection before the WebSocket handshake.
    pub worker: WorkerIdentity,
}

/// Body of the start response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartResponse {
    /// Gateway-assigned connection id.
    pub connection_id: String,

    /// Session token presented in `WORKER_CONNECT`.
    pub session_token: String,

    /// Sync token presented in `WORKER_CONNECT`.
    pub sync_token: String,

    /// WebSocket URL of the assigned gateway.
    pub gateway_endpoint: String,

    /// Opaque tag naming the assigned gateway's group.
    pub gateway_group: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_response_decodes() {
        let json = r#"{
            "connection_id": "c-1",
            "session_token": "st",
            "sync_token": "sy",
            "gateway_endpoint": "ws://127.0.0.1:9000/connect",
            "gateway_group": "grp-a"
        }"#;
        let resp: StartResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.connection_id, "c-1");
        assert_eq!(resp.gateway_group, "grp-a");
    }

    #[test]
    fn test_start_request_omits_empty_exclusions() {
        let req = StartRequest {
            excluded_gateways: Vec::new(),
            worker: WorkerIdentity {
                sdk_version: "0.1.0".to_string(),
                platform: "linux".to_string(),
                instance_id: "host-1".to_string(),
                max_concurrency: None,
                started_at: 0,
            },
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("excluded_gateways"));
    }
}
