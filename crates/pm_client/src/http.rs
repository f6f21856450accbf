//! Blocking JSON-over-HTTPS helper for the auth-server round-trips.

use std::time::Duration;

use serde::Serialize;

use crate::error::ClientError;

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct JsonHttpClient {
    inner: reqwest::blocking::Client,
}

impl JsonHttpClient {
    pub fn new() -> Result<Self, ClientError> {
        Self::with_timeout(DEFAULT_HTTP_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, ClientError> {
        let inner = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Init(e.to_string()))?;
        Ok(Self { inner })
    }

    pub fn post_json<B: Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<serde_json::Value, ClientError> {
        let response = self
            .inner
            .post(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .map_err(|e| ClientError::Network {
                url: url.to_owned(),
                cause: e.to_string(),
            })?;
        Self::read_json("POST", url, response)
    }

    pub fn get_json(&self, url: &str) -> Result<serde_json::Value, ClientError> {
        let response = self
            .inner
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .map_err(|e| ClientError::Network {
                url: url.to_owned(),
                cause: e.to_string(),
            })?;
        Self::read_json("GET", url, response)
    }

    fn read_json(
        method: &'static str,
        url: &str,
        response: reqwest::blocking::Response,
    ) -> Result<serde_json::Value, ClientError> {
        let status = response.status();
        let body = response.text().map_err(|e| ClientError::Network {
            url: url.to_owned(),
            cause: e.to_string(),
        })?;
        if !status.is_success() {
            return Err(ClientError::Http {
                method,
                url: url.to_owned(),
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| ClientError::Json(e.to_string()))
    }
}
