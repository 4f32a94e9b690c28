//! Elasticsearch-compatible HTTP client.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - Other HTTP errors → classified and returned immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Error classification reads the structured `error.type` of the response
//! body together with the status code.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::{SearchEngine, SearchError};
use crate::config::SearchConfig;
use crate::models::Document;

/// HTTP client for one search cluster.
pub struct ElasticClient {
    base_url: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl ElasticClient {
    pub fn new(config: &SearchConfig) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            client,
            max_retries: config.max_retries,
        })
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<RequestBody<'_>>,
    ) -> Result<Value, SearchError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.request(method.clone(), &url);
            request = match &body {
                Some(RequestBody::Json(value)) => request.json(value),
                Some(RequestBody::NdJson(text)) => request
                    .header("Content-Type", "application/x-ndjson")
                    .body(text.to_string()),
                None => request,
            };

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let text = response.text().await?;
                        return Ok(serde_json::from_str(&text).unwrap_or(Value::Null));
                    }

                    let text = response.text().await.unwrap_or_default();
                    let json: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        warn!(%url, %status, attempt, "search engine request failed, retrying");
                        last_err = Some(classify(status, &json, &text));
                        continue;
                    }

                    return Err(classify(status, &json, &text));
                }
                Err(e) => {
                    warn!(%url, attempt, error = %e, "search engine unreachable, retrying");
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| SearchError::Transport("request failed after retries".into())))
    }
}

enum RequestBody<'a> {
    Json(&'a Value),
    NdJson(&'a str),
}

/// Map an error response to a [`SearchError`] variant.
fn classify(status: StatusCode, json: &Value, text: &str) -> SearchError {
    let error_type = json
        .pointer("/error/type")
        .and_then(Value::as_str)
        .unwrap_or("");
    let reason = json
        .pointer("/error/reason")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| text.to_string());

    match error_type {
        "resource_already_exists_exception" | "index_already_exists_exception" => {
            SearchError::AlreadyExists(reason)
        }
        "index_not_found_exception" | "aliases_not_found_exception" => SearchError::NotFound(reason),
        _ if status == StatusCode::NOT_FOUND => SearchError::NotFound(reason),
        _ => SearchError::Status {
            status: status.as_u16(),
            reason,
        },
    }
}

/// Render documents as a `_bulk` NDJSON payload.
pub fn bulk_body(index: &str, docs: &[(i64, Document)]) -> String {
    let mut body = String::new();
    for (id, doc) in docs {
        let action = json!({ "index": { "_index": index, "_id": id.to_string() } });
        body.push_str(&action.to_string());
        body.push('\n');
        body.push_str(&Value::Object(doc.clone()).to_string());
        body.push('\n');
    }
    body
}

/// Summarize item failures of a `_bulk` response.
fn bulk_failures(response: &Value) -> Option<SearchError> {
    if !response.get("errors").and_then(Value::as_bool).unwrap_or(false) {
        return None;
    }
    let items = response.get("items").and_then(Value::as_array)?;
    let failures: Vec<&Value> = items
        .iter()
        .filter_map(|item| item.get("index"))
        .filter_map(|result| result.get("error"))
        .collect();
    let reason = failures
        .first()
        .and_then(|e| e.get("reason"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    Some(SearchError::Bulk {
        failed: failures.len(),
        reason,
    })
}

#[async_trait]
impl SearchEngine for ElasticClient {
    async fn create_index(
        &self,
        index: &str,
        mapping: &Value,
        shards: u32,
        replicas: u32,
    ) -> Result<(), SearchError> {
        let body = json!({
            "settings": {
                "number_of_shards": shards,
                "number_of_replicas": replicas,
            },
            "mappings": mapping,
        });
        self.send(Method::PUT, index, Some(RequestBody::Json(&body)))
            .await
            .map(|_| ())
    }

    async fn bulk_upsert(&self, index: &str, docs: &[(i64, Document)]) -> Result<(), SearchError> {
        if docs.is_empty() {
            return Ok(());
        }
        debug!(index, count = docs.len(), "bulk upsert");
        let payload = bulk_body(index, docs);
        let response = self
            .send(Method::POST, "_bulk", Some(RequestBody::NdJson(&payload)))
            .await?;
        if !response.is_object() {
            return Err(SearchError::Transport(
                "unreadable _bulk response body".to_string(),
            ));
        }
        match bulk_failures(&response) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn delete_document(&self, index: &str, id: i64) -> Result<(), SearchError> {
        let response = self
            .send(Method::DELETE, &format!("{}/_doc/{}", index, id), None)
            .await?;
        // A missing document answers 404 with `result: not_found`.
        if response.get("result").and_then(Value::as_str) == Some("not_found") {
            return Err(SearchError::NotFound(format!("{}/{}", index, id)));
        }
        Ok(())
    }

    async fn delete_index(&self, index: &str) -> Result<(), SearchError> {
        self.send(Method::DELETE, index, None).await.map(|_| ())
    }

    async fn add_alias(&self, index: &str, alias: &str) -> Result<(), SearchError> {
        let body = json!({ "actions": [
            { "remove": { "index": "*", "alias": alias, "must_exist": false } },
            { "add": { "index": index, "alias": alias } },
        ] });
        self.send(Method::POST, "_aliases", Some(RequestBody::Json(&body)))
            .await
            .map(|_| ())
    }

    async fn remove_alias(&self, index: &str, alias: &str) -> Result<(), SearchError> {
        let body = json!({ "actions": [ { "remove": { "index": index, "alias": alias } } ] });
        self.send(Method::POST, "_aliases", Some(RequestBody::Json(&body)))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> ElasticClient {
        ElasticClient::new(&SearchConfig {
            url: server.uri(),
            shards: 1,
            replicas: 0,
            timeout_secs: 5,
            max_retries: 0,
        })
        .unwrap()
    }

    fn doc(value: Value) -> Document {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_bulk_body_is_ndjson() {
        let body = bulk_body("idx", &[(5, doc(json!({"title": "a"}))), (4, doc(json!({})))]);
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 4);
        let action: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action, json!({ "index": { "_index": "idx", "_id": "5" } }));
        assert_eq!(lines[1], r#"{"title":"a"}"#);
        assert!(body.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_create_index_already_exists() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/reports"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": { "type": "resource_already_exists_exception", "reason": "index [reports] already exists" },
                "status": 400
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server)
            .create_index("reports", &json!({}), 1, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_bulk_upsert_reports_item_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("Content-Type", "application/x-ndjson"))
            .and(body_string_contains(r#""_id":"7""#))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": true,
                "items": [
                    { "index": { "_id": "7", "status": 400, "error": { "type": "mapper_parsing_exception", "reason": "bad date" } } }
                ]
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .bulk_upsert("reports", &[(7, doc(json!({"date": "x"})))])
            .await
            .unwrap_err();
        match err {
            SearchError::Bulk { failed, reason } => {
                assert_eq!(failed, 1);
                assert_eq!(reason, "bad date");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bulk_upsert_rejects_unreadable_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"errors": tr"#))
            .mount(&server)
            .await;

        let err = client(&server)
            .bulk_upsert("reports", &[(7, doc(json!({"title": "a"})))])
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Transport(_)));
    }

    #[tokio::test]
    async fn test_delete_missing_document_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/reports/_doc/3"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "_index": "reports", "_id": "3", "result": "not_found"
            })))
            .mount(&server)
            .await;

        let err = client(&server).delete_document("reports", 3).await.unwrap_err();
        assert!(err.is_noop());
    }

    #[tokio::test]
    async fn test_add_alias_detaches_other_indices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_aliases"))
            .and(body_json(json!({ "actions": [
                { "remove": { "index": "*", "alias": "site_report", "must_exist": false } },
                { "add": { "index": "site_report_index_v2", "alias": "site_report" } }
            ] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "acknowledged": true })))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .add_alias("site_report_index_v2", "site_report")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/reports"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let mut c = client(&server);
        c.max_retries = 1;
        let err = c.delete_index("reports").await.unwrap_err();
        assert!(matches!(err, SearchError::Status { status: 503, .. }));
    }
}
