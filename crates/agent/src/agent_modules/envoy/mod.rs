//! Enphase Envoy gateway: token authentication and telemetry snapshots over its local HTTPS API.
pub mod models;
pub mod token;

use crate::agent_modules::config::EnvoyConfig;
use crate::agent_modules::credentials::{Credential, DeviceSession};
use crate::agent_modules::error::SessionError;
use crate::version::user_agent;
use async_trait::async_trait;
use envflux_common::Snapshot;
use reqwest::{Client, Response, StatusCode, header};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, warn};

use self::models::{
    DeviceDataResponse, InverterEntry, MeterConfig, MeterReadingEntry, ProductionResponse,
    apply_device_data, apply_meter_readings, build_snapshot, parse_serial,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Anything that can produce a telemetry [`Snapshot`] on demand.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<Snapshot, SessionError>;
}

struct Login {
    username: String,
    password: String,
}

pub struct EnvoyClient {
    local: Client,
    cloud: Client,
    base_url: String,
    serial: String,
    login: Option<Login>,
    credential: Option<Credential>,
}

fn base_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

fn absent_if_not_found<T>(
    path: &str,
    result: Result<T, SessionError>,
) -> Result<Option<T>, SessionError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(SessionError::Status { status: 404, .. }) => {
            debug!(path, "Endpoint not available on this firmware.");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

async fn ensure_success(response: Response) -> Result<Response, SessionError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(SessionError::Unauthorized(format!(
            "Device returned {status} for {}",
            response.url().path()
        )));
    }
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error body".to_string());
        return Err(SessionError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}

impl EnvoyClient {
    /// Builds the HTTP clients and resolves the gateway serial number.
    ///
    /// Failure here means the device is unreachable and the agent cannot start.
    pub async fn setup(config: &EnvoyConfig) -> Result<Self, SessionError> {
        // The gateway serves a self-signed certificate; only this client trusts it.
        let local = Client::builder()
            .user_agent(user_agent())
            .danger_accept_invalid_certs(true)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let cloud = Client::builder()
            .user_agent(user_agent())
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        let mut client = Self {
            local,
            cloud,
            base_url: base_url(&config.host),
            serial: String::new(),
            login: None,
            credential: None,
        };

        client.serial = match &config.serial {
            Some(serial) => serial.clone(),
            None => client.discover_serial().await?,
        };
        info!(base_url = %client.base_url, serial = %client.serial, "Connected to Envoy.");
        Ok(client)
    }

    async fn discover_serial(&self) -> Result<String, SessionError> {
        let response = self
            .local
            .get(format!("{}/info", self.base_url))
            .send()
            .await?;
        let body = ensure_success(response).await?.text().await?;
        parse_serial(&body)
            .ok_or_else(|| SessionError::InvalidResponse("No <sn> element in /info".to_string()))
    }

    fn bearer(&self) -> Result<String, SessionError> {
        self.credential
            .as_ref()
            .map(|c| format!("Bearer {}", c.token))
            .ok_or(SessionError::NotAuthenticated)
    }

    async fn check_token(&self, token: &str) -> Result<(), SessionError> {
        let response = self
            .local
            .get(format!("{}/auth/check_jwt", self.base_url))
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .await?;
        let body = ensure_success(response).await?.text().await?;
        if body.contains("Valid token") {
            Ok(())
        } else {
            Err(SessionError::Unauthorized("Device did not accept token".to_string()))
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SessionError> {
        let response = self
            .local
            .get(format!("{}{}", self.base_url, path))
            .header(header::AUTHORIZATION, self.bearer()?)
            .send()
            .await?;
        Ok(ensure_success(response).await?.json::<T>().await?)
    }

    /// Like `get_json`, but a 404 means the firmware does not serve `path`.
    async fn get_optional_json<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, SessionError> {
        absent_if_not_found(path, self.get_json(path).await)
    }

    async fn issue_token(&self, username: &str, password: &str) -> Result<Credential, SessionError> {
        let token = token::request_token(&self.cloud, username, password, &self.serial).await?;
        token::credential_from_token(&token)
    }
}

#[async_trait]
impl DeviceSession for EnvoyClient {
    async fn authenticate(
        &mut self,
        username: &str,
        password: &str,
        token: Option<&str>,
    ) -> Result<(), SessionError> {
        let credential = match token {
            Some(token) => {
                let credential = token::credential_from_token(token)?;
                self.check_token(token).await?;
                credential
            }
            None => self.issue_token(username, password).await?,
        };
        debug!(token_kind = %credential.token_kind, expires_at = %credential.expires_at, "Envoy session authenticated.");
        self.credential = Some(credential);
        self.login = Some(Login {
            username: username.to_string(),
            password: password.to_string(),
        });
        Ok(())
    }

    async fn refresh(&mut self) -> Result<(), SessionError> {
        let login = self.login.as_ref().ok_or(SessionError::NotAuthenticated)?;
        let credential = self.issue_token(&login.username, &login.password).await?;
        self.credential = Some(credential);
        Ok(())
    }

    fn credential(&self) -> Option<Credential> {
        self.credential.clone()
    }
}

#[async_trait]
impl SnapshotSource for EnvoyClient {
    async fn fetch_snapshot(&self) -> Result<Snapshot, SessionError> {
        let production: ProductionResponse = self.get_json("/production.json?details=1").await?;
        let inverters: Vec<InverterEntry> = self.get_json("/api/v1/production/inverters").await?;
        let mut snapshot = build_snapshot(&production, &inverters);

        // CT meters and per-inverter detail are optional extras.
        let meters: Option<Vec<MeterConfig>> = self.get_optional_json("/ivp/meters").await?;
        if let Some(meters) = meters.filter(|m| !m.is_empty()) {
            let readings: Option<Vec<MeterReadingEntry>> =
                self.get_optional_json("/ivp/meters/readings").await?;
            match readings {
                Some(readings) => apply_meter_readings(&mut snapshot, &meters, &readings),
                None => warn!("Envoy lists CT meters but serves no meter readings."),
            }
        }
        let device_data: Option<DeviceDataResponse> =
            self.get_optional_json("/ivp/pdm/device_data").await?;
        if let Some(device_data) = device_data {
            apply_device_data(&mut snapshot, &device_data);
        }

        Ok(snapshot)
    }
}
