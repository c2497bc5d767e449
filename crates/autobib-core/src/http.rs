//! HTTP client for the metadata backends
//!
//! Requests run on a private current-thread tokio runtime and block the
//! caller until the response arrives or the timeout expires.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use tokio::runtime::{Builder, Runtime};

use crate::config::QueryConfig;
use crate::error::LookupError;

#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
}

#[derive(Debug)]
pub struct HttpClient {
    client: Client,
    runtime: Runtime,
    user_agent: String,
}

impl HttpClient {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, LookupError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LookupError::Http(e.to_string()))?;
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| LookupError::Http(e.to_string()))?;

        Ok(Self {
            client,
            runtime,
            user_agent: user_agent.to_string(),
        })
    }

    pub fn from_config(config: &QueryConfig) -> Result<Self, LookupError> {
        Self::new(&config.user_agent, Duration::from_secs(config.timeout_secs))
    }

    pub fn get(&self, url: &str) -> Result<HttpResponse, LookupError> {
        self.runtime.block_on(self.fetch(url))
    }

    pub fn get_with_params(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<HttpResponse, LookupError> {
        let url = reqwest::Url::parse_with_params(url, params)
            .map_err(|_| LookupError::Http(format!("Invalid URL: {}", url)))?;
        self.get(url.as_str())
    }

    async fn fetch(&self, url: &str) -> Result<HttpResponse, LookupError> {
        let response = self
            .client
            .get(url)
            .header("User-Agent", &self.user_agent)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        if status == 429 {
            return Err(LookupError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(LookupError::Http(format!("HTTP {} for {}", status, url)));
        }

        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();

        let body = response.text().await.map_err(map_reqwest_error)?;

        Ok(HttpResponse {
            status,
            body,
            headers,
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> LookupError {
    if e.is_timeout() {
        LookupError::Timeout
    } else {
        LookupError::Http(e.to_string())
    }
}
