//! Connect API client implementation.

use crate::auth::hashed_signing_key;
use crate::error::ApiError;
use crate::routes::{FLUSH_PATH, START_PATH};

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::debug;
use tungsten_proto::{StartRequest, StartResponse};
use url::Url;

/// User agent for requests.
const USER_AGENT_VALUE: &str = concat!(
    "tungsten-rs (https://github.com/tungsten-rs/tungsten-rs, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Upper bound on one start or flush round-trip, so a hung API cannot
/// wedge the reconnect loop or shutdown.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the worker's out-of-band HTTP calls.
///
/// Authentication is per call rather than a default header because the
/// supervisor swaps between the primary and fallback signing keys.
pub struct ConnectApiClient {
    /// Inner HTTP client.
    client: Client,
    /// API base URL.
    api_base: Url,
}

impl ConnectApiClient {
    /// Create a new client.
    ///
    /// The environment tag, platform identifier, and SDK version ride on
    /// every request as default headers.
    pub fn new(
        api_base: Url,
        environment: Option<&str>,
        platform: &str,
        sdk_version: &str,
    ) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("x-connect-platform", HeaderValue::from_str(platform)?);
        headers.insert("x-connect-sdk", HeaderValue::from_str(sdk_version)?);
        if let Some(env) = environment {
            headers.insert("x-connect-env", HeaderValue::from_str(env)?);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self { client, api_base })
    }

    /// Issue the start handshake.
    ///
    /// One POST per connection attempt; exchanges credentials and gateway
    /// exclusions for a session token and a gateway endpoint.
    pub async fn start(
        &self,
        signing_key: &str,
        request: &StartRequest,
    ) -> Result<StartResponse, ApiError> {
        let url = self.route(START_PATH)?;
        debug!(url = %url, excluded = request.excluded_gateways.len(), "Starting connect handshake");

        let response = self
            .client
            .post(url)
            .bearer_auth(hashed_signing_key(signing_key))
            .json(request)
            .send()
            .await?;

        let body = Self::read_ok(response).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Flush one buffered `WORKER_REPLY` frame.
    ///
    /// A 2xx means the platform took ownership of the reply and the
    /// buffered entry can be dropped.
    pub async fn flush_reply(&self, signing_key: &str, frame: &[u8]) -> Result<(), ApiError> {
        let url = self.route(FLUSH_PATH)?;
        debug!(url = %url, bytes = frame.len(), "Flushing buffered reply");

        let response = self
            .client
            .post(url)
            .bearer_auth(hashed_signing_key(signing_key))
            .body(frame.to_vec())
            .send()
            .await?;

        Self::read_ok(response).await?;
        Ok(())
    }

    fn route(&self, path: &str) -> Result<Url, ApiError> {
        self.api_base.join(path).map_err(|e| ApiError::Api {
            status: 0,
            message: format!("invalid API base URL: {e}"),
        })
    }

    /// Map a response to the error taxonomy; returns the body on 2xx.
    async fn read_ok(response: Response) -> Result<Vec<u8>, ApiError> {
        let status = response.status();
        match status {
            s if s.is_success() => Ok(response.bytes().await?.to_vec()),
            StatusCode::UNAUTHORIZED => Err(ApiError::Unauthorized),
            StatusCode::TOO_MANY_REQUESTS => Err(ApiError::ConnectionLimited),
            _ => {
                let message = response.text().await.unwrap_or_default();
                Err(ApiError::Api {
                    status: status.as_u16(),
                    message,
                })
            }
        }
    }
}
