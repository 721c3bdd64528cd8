//! Cloud-Controller-style usage event feed over HTTP
//!
//! Pages look like `{ "resources": [...], "next_url": "/v2/...?page=2" | null }`
//! and every resource carries `metadata.guid` and `metadata.created_at`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header::AUTHORIZATION, Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::{debug, warn};

use super::{EventPage, EventSource, PageRequest, SourceError};
use crate::{auth::TokenProvider, model::Event};

#[derive(Debug, Default)]
pub struct PagingStatistics {
    page_read_success: AtomicU64,
    page_read_failures: AtomicU64,
    missing_token: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagingStatisticsSnapshot {
    pub page_read_success: u64,
    pub page_read_failures: u64,
    pub missing_token: u64,
}

impl PagingStatistics {
    pub fn snapshot(&self) -> PagingStatisticsSnapshot {
        PagingStatisticsSnapshot {
            page_read_success: self.page_read_success.load(Ordering::Relaxed),
            page_read_failures: self.page_read_failures.load(Ordering::Relaxed),
            missing_token: self.missing_token.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPage {
    #[serde(default)]
    resources: Vec<Value>,
    #[serde(default)]
    next_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMetadata {
    guid: String,
    created_at: DateTime<Utc>,
}

pub struct HttpEventSource {
    client: Client,
    api_url: String,
    events_path: String,
    token: Arc<dyn TokenProvider>,
    statistics: Arc<PagingStatistics>,
}

impl HttpEventSource {
    pub fn new(
        client: Client,
        api_url: impl Into<String>,
        events_path: impl Into<String>,
        token: Arc<dyn TokenProvider>,
        statistics: Arc<PagingStatistics>,
    ) -> Self {
        let api_url: String = api_url.into();
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            events_path: events_path.into(),
            token,
            statistics,
        }
    }

    pub fn statistics(&self) -> &Arc<PagingStatistics> {
        &self.statistics
    }

    fn page_url(&self, request: &PageRequest) -> Result<Url, SourceError> {
        let raw = match request {
            PageRequest::After(_) => format!("{}{}", self.api_url, self.events_path),
            PageRequest::Link(link) => format!("{}{}", self.api_url, link),
        };
        let mut url = Url::parse(&raw).map_err(|e| SourceError::InvalidUrl {
            url: raw.clone(),
            reason: e.to_string(),
        })?;
        if let PageRequest::After(Some(cursor)) = request {
            url.query_pairs_mut().append_pair("after_guid", cursor);
        }
        Ok(url)
    }

    async fn read(&self, url: Url, token: &str) -> Result<EventPage, SourceError> {
        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, token)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.json::<Value>().await.ok();
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let page: RawPage = response.json().await?;
        let events = page
            .resources
            .into_iter()
            .map(to_event)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(EventPage {
            events,
            next: page.next_url,
        })
    }
}

fn to_event(resource: Value) -> Result<Event, SourceError> {
    let metadata = resource
        .get("metadata")
        .cloned()
        .ok_or_else(|| SourceError::Decode("resource without metadata".to_string()))?;
    let RawMetadata { guid, created_at } =
        serde_json::from_value(metadata).map_err(|e| SourceError::Decode(e.to_string()))?;

    let state = resource
        .pointer("/entity/state")
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut event = Event::new(guid, created_at, resource);
    event.state = state;
    Ok(event)
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn fetch_page(&self, request: PageRequest) -> Result<EventPage, SourceError> {
        let Some(token) = self.token.token() else {
            warn!("Missing upstream token");
            self.statistics.missing_token.fetch_add(1, Ordering::Relaxed);
            return Err(SourceError::MissingToken);
        };

        let url = self.page_url(&request)?;
        debug!(url = %url, "Fetching events page");

        match self.read(url.clone(), &token).await {
            Ok(page) => {
                self.statistics.page_read_success.fetch_add(1, Ordering::Relaxed);
                Ok(page)
            },
            Err(e) => {
                warn!(url = %url, error = %e, "Cannot fetch events page");
                self.statistics.page_read_failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::StaticToken;
    use serde_json::json;
    use wiremock::{
        matchers::{header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    const EVENTS_PATH: &str = "/v2/app_usage_events?order-direction=asc&results-per-page=50";

    fn resource(guid: &str, state: &str) -> Value {
        json!({
            "metadata": { "guid": guid, "created_at": "2024-03-01T10:00:00Z" },
            "entity": { "state": state, "org_guid": "org" }
        })
    }

    fn source(server: &MockServer, token: Option<&str>) -> HttpEventSource {
        HttpEventSource::new(
            Client::new(),
            server.uri(),
            EVENTS_PATH,
            Arc::new(StaticToken::new(token.map(str::to_string))),
            Arc::new(PagingStatistics::default()),
        )
    }

    #[tokio::test]
    async fn test_first_page_after_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/app_usage_events"))
            .and(query_param("after_guid", "g0"))
            .and(header("authorization", "bearer t"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": [resource("g1", "STARTED"), resource("g2", "STOPPED")],
                "next_url": "/v2/app_usage_events?page=2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let source = source(&server, Some("bearer t"));
        let page = source
            .fetch_page(PageRequest::After(Some("g0".to_string())))
            .await
            .unwrap();

        let ids: Vec<_> = page.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["g1", "g2"]);
        assert_eq!(page.events[1].state.as_deref(), Some("STOPPED"));
        assert_eq!(page.events[0].payload, resource("g1", "STARTED"));
        assert_eq!(page.next.as_deref(), Some("/v2/app_usage_events?page=2"));
        assert_eq!(source.statistics().snapshot().page_read_success, 1);
    }

    #[tokio::test]
    async fn test_linked_page() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/app_usage_events"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": [],
                "next_url": null
            })))
            .expect(1)
            .mount(&server)
            .await;

        let page = source(&server, Some("t"))
            .fetch_page(PageRequest::Link("/v2/app_usage_events?page=2".to_string()))
            .await
            .unwrap();
        assert_eq!(page, EventPage::default());
    }

    #[tokio::test]
    async fn test_unknown_cursor_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "code": 10005,
                "error_code": "CF-BadQueryParameter"
            })))
            .mount(&server)
            .await;

        let source = source(&server, Some("t"));
        let err = source
            .fetch_page(PageRequest::After(Some("gone".to_string())))
            .await
            .unwrap_err();
        assert!(err.is_cursor_not_found());
        assert_eq!(source.statistics().snapshot().page_read_failures, 1);
    }

    #[tokio::test]
    async fn test_cursor_is_query_encoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/app_usage_events"))
            .and(query_param("after_guid", "g 1&x=y"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "resources": [] })))
            .expect(1)
            .mount(&server)
            .await;

        // No query string of its own
        let source = HttpEventSource::new(
            Client::new(),
            server.uri(),
            "/v2/app_usage_events",
            Arc::new(StaticToken::new(Some("t".to_string()))),
            Arc::new(PagingStatistics::default()),
        );
        source
            .fetch_page(PageRequest::After(Some("g 1&x=y".to_string())))
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let pairs: Vec<_> = requests[0].url.query_pairs().collect();
        assert_eq!(pairs.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_api_url() {
        let source = HttpEventSource::new(
            Client::new(),
            "not a url",
            EVENTS_PATH,
            Arc::new(StaticToken::new(Some("t".to_string()))),
            Arc::new(PagingStatistics::default()),
        );

        let err = source.fetch_page(PageRequest::After(None)).await.unwrap_err();
        assert!(matches!(err, SourceError::InvalidUrl { .. }));
    }

    #[tokio::test]
    async fn test_missing_token() {
        let server = MockServer::start().await;
        let source = source(&server, None);

        let err = source.fetch_page(PageRequest::After(None)).await.unwrap_err();
        assert!(matches!(err, SourceError::MissingToken));
        assert_eq!(source.statistics().snapshot().missing_token, 1);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_resource() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "resources": [{ "entity": {} }]
            })))
            .mount(&server)
            .await;

        let err = source(&server, Some("t"))
            .fetch_page(PageRequest::After(None))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Decode(_)));
    }
}
