//! Usage collector client

use async_trait::async_trait;
use reqwest::{
    header::{AUTHORIZATION, LOCATION},
    Client, StatusCode,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    auth::TokenProvider,
    bridge::UsageReporter,
    model::{ReportResponse, Usage},
    BridgeError, Result,
};

/// Collector path usage documents are posted to
pub const COLLECTOR_USAGE_PATH: &str = "/v1/metering/collected/usage";

/// Posts usage documents to the collector
///
/// Any HTTP answer is handed back to the bridge, which decides what a
/// status means. A created document must come with a `Location` header.
pub struct HttpUsageReporter {
    client: Client,
    collector_url: String,
    token: Arc<dyn TokenProvider>,
    secured: bool,
}

impl HttpUsageReporter {
    pub fn new(
        client: Client,
        collector_url: impl Into<String>,
        token: Arc<dyn TokenProvider>,
        secured: bool,
    ) -> Self {
        let collector_url: String = collector_url.into();
        Self {
            client,
            collector_url: collector_url.trim_end_matches('/').to_string(),
            token,
            secured,
        }
    }
}

#[async_trait]
impl UsageReporter for HttpUsageReporter {
    async fn report(&self, usage: &Usage) -> Result<ReportResponse> {
        let token = self.token.token();
        if self.secured && token.is_none() {
            warn!("Missing collector token");
            return Err(BridgeError::MissingToken);
        }

        let mut request = self
            .client
            .post(format!("{}{}", self.collector_url, COLLECTOR_USAGE_PATH))
            .json(usage);
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, token);
        }

        let response = request.send().await?;
        let status = response.status();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.json::<Value>().await.ok();

        if status == StatusCode::CREATED && location.is_none() {
            return Err(BridgeError::MissingLocation);
        }
        debug!(status = status.as_u16(), location = ?location, "Collector answered");

        Ok(ReportResponse {
            status: status.as_u16(),
            location,
            body,
        })
    }
}
