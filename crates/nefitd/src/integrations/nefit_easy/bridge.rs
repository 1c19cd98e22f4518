//! HTTP bridge client.
//!
//! The appliance itself is only reachable through the vendor's encrypted
//! messaging backend. A bridge process speaks that protocol and exposes each
//! appliance endpoint as plain JSON over HTTP; this module is the client for
//! that bridge. Credentials travel with every request so the bridge can keep
//! one backend session per serial number.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use reqwest::RequestBuilder;
use reqwest::Response;
use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::client::ClientError;
use super::client::ClientFactory;
use super::client::Pressure;
use super::client::RemoteClient;
use super::client::Status;
use super::client::SwitchStatus;
use super::client::UserMode;
use super::client::WriteStatus;
use super::settings::Credentials;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const HEADER_SERIAL_NUMBER: &str = "x-serial-number";
const HEADER_ACCESS_KEY: &str = "x-access-key";
const HEADER_PASSWORD: &str = "x-password";

fn transport(e: reqwest::Error) -> ClientError {
    ClientError::Transport(e.to_string())
}

#[derive(Serialize)]
struct ValueBody<T> {
    value: T,
}

pub struct BridgeClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    closed: AtomicBool,
}

impl BridgeClient {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!("{} {}", method, url);
        self.http
            .request(method, url)
            .header(HEADER_SERIAL_NUMBER, &self.credentials.serial_number)
            .header(HEADER_ACCESS_KEY, &self.credentials.access_key)
            .header(HEADER_PASSWORD, &self.credentials.password)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::Closed);
        }
        request.send().await.map_err(transport)
    }

    async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ClientError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(ClientError::Status(status.as_u16()));
        }
        let body = resp.text().await.map_err(transport)?;
        serde_json::from_str(&body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let resp = self.send(self.request(Method::GET, path)).await?;
        Self::decode(resp).await
    }

    /// GET for endpoints the appliance may not implement.
    async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ClientError> {
        let resp = self.send(self.request(Method::GET, path)).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::decode(resp).await.map(Some)
    }

    async fn put<V: Serialize + Send>(&self, path: &str, value: V) -> Result<WriteStatus, ClientError> {
        let request = self
            .request(Method::PUT, path)
            .json(&ValueBody { value });
        let resp = self.send(request).await?;
        Self::decode(resp).await
    }
}

#[async_trait]
impl RemoteClient for BridgeClient {
    async fn status(&self) -> Result<Status, ClientError> {
        self.get("/api/status").await
    }

    async fn pressure(&self) -> Result<Option<Pressure>, ClientError> {
        self.get_optional("/api/pressure").await
    }

    async fn holiday_mode(&self) -> Result<Option<SwitchStatus>, ClientError> {
        self.get_optional("/api/holiday-mode").await
    }

    async fn shower_timer(&self) -> Result<Option<SwitchStatus>, ClientError> {
        self.get_optional("/api/shower-timer").await
    }

    async fn set_temperature(&self, value: f64) -> Result<WriteStatus, ClientError> {
        self.put("/api/temperature", value).await
    }

    async fn set_user_mode(&self, mode: UserMode) -> Result<WriteStatus, ClientError> {
        self.put("/api/user-mode", mode.to_string()).await
    }

    async fn set_fireplace_mode(&self, on: bool) -> Result<WriteStatus, ClientError> {
        self.put("/api/fireplace-mode", on).await
    }

    async fn set_holiday_mode(&self, on: bool) -> Result<WriteStatus, ClientError> {
        self.put("/api/holiday-mode", on).await
    }

    async fn set_shower_timer(&self, on: bool) -> Result<WriteStatus, ClientError> {
        self.put("/api/shower-timer", on).await
    }

    async fn set_shower_time(&self, minutes: u32) -> Result<WriteStatus, ClientError> {
        self.put("/api/shower-time", minutes).await
    }

    async fn end(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let request = self.request(Method::POST, "/api/disconnect");
        if let Err(e) = request.send().await {
            debug!(
                "[{}] Disconnect failed: {}",
                self.credentials.serial_number, e
            );
        }
    }
}

/// Creates [`BridgeClient`]s sharing one HTTP connection pool.
pub struct BridgeClientFactory {
    http: reqwest::Client,
    base_url: String,
}

impl BridgeClientFactory {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(transport)?;
        Ok(Self::with_client(base_url, http))
    }

    pub fn with_client(base_url: &str, http: reqwest::Client) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ClientFactory for BridgeClientFactory {
    type Client = BridgeClient;

    async fn connect(&self, credentials: &Credentials) -> Result<BridgeClient, ClientError> {
        let client = BridgeClient {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            credentials: credentials.clone(),
            closed: AtomicBool::new(false),
        };

        let resp = client
            .send(client.request(Method::POST, "/api/connect"))
            .await?;
        if !resp.status().is_success() {
            return Err(ClientError::Status(resp.status().as_u16()));
        }
        Ok(client)
    }
}
