use std::{sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use url::Url;

use crate::{inference::InferenceError, HttpClient};

use super::{ClassificationClient, ClassificationPipeline, FetchOutcome, PipelineError};

/// Calls a remote `/fetch-and-classify` endpoint with the user's bearer token.
pub struct HttpClassificationClient {
    http_client: HttpClient,
    url: Url,
    timeout: Duration,
}

impl HttpClassificationClient {
    pub fn new(http_client: HttpClient, url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let url = Url::parse(url).with_context(|| format!("invalid classifier url {url:?}"))?;
        Ok(Self {
            http_client,
            url,
            timeout,
        })
    }
}

#[async_trait]
impl ClassificationClient for HttpClassificationClient {
    async fn fetch_and_classify(
        &self,
        credential: &str,
        max_results: usize,
        query: Option<&str>,
    ) -> Result<FetchOutcome, PipelineError> {
        let mut params = vec![("max_results", max_results.to_string())];
        if let Some(q) = query.filter(|q| !q.is_empty()) {
            params.push(("q", q.to_string()));
        }

        let resp = self
            .http_client
            .post(self.url.clone())
            .bearer_auth(credential)
            .query(&params)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| PipelineError::TransientFetchFailure(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::UNAUTHORIZED => PipelineError::AuthenticationFailure(body),
                StatusCode::BAD_GATEWAY => {
                    PipelineError::InferenceFailure(InferenceError::Remote(body))
                }
                _ => PipelineError::TransientFetchFailure(format!("{}: {}", status, body)),
            });
        }

        resp.json::<FetchOutcome>()
            .await
            .map_err(|e| PipelineError::TransientFetchFailure(format!("unreadable response: {e}")))
    }
}

/// Runs the in-process pipeline against Gmail with the caller's token.
pub struct LocalClassificationClient {
    pipeline: Arc<ClassificationPipeline>,
}

impl LocalClassificationClient {
    pub fn new(pipeline: Arc<ClassificationPipeline>) -> Self {
        Self { pipeline }
    }
}

#[async_trait]
impl ClassificationClient for LocalClassificationClient {
    async fn fetch_and_classify(
        &self,
        credential: &str,
        max_results: usize,
        query: Option<&str>,
    ) -> Result<FetchOutcome, PipelineError> {
        let mailbox = self.pipeline.mailbox_for(credential);
        self.pipeline
            .fetch_and_classify(&mailbox, max_results, query)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        matchers::{header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    fn client(server: &MockServer) -> HttpClassificationClient {
        HttpClassificationClient::new(
            HttpClient::new(),
            &format!("{}/fetch-and-classify", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_malformed_url() {
        assert!(HttpClassificationClient::new(HttpClient::new(), "not a url", Duration::ZERO).is_err());
    }

    #[tokio::test]
    async fn test_successful_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fetch-and-classify"))
            .and(header("authorization", "Bearer token"))
            .and(query_param("max_results", "15"))
            .and(query_param("q", "in:inbox"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "new_count": 1,
                "processed": [{"id": "a", "categories": ["work", "events"]}],
                "estimated_ms": 500
            })))
            .mount(&server)
            .await;

        let outcome = client(&server)
            .fetch_and_classify("token", 15, Some("in:inbox"))
            .await
            .unwrap();

        assert_eq!(outcome.new_count, 1);
        assert_eq!(outcome.processed[0].categories, vec!["work", "events"]);
    }

    #[tokio::test]
    async fn test_unauthorized_is_authentication_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Session expired"))
            .mount(&server)
            .await;

        let err = client(&server)
            .fetch_and_classify("stale", 10, None)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::AuthenticationFailure(ref m) if m == "Session expired"));
    }

    #[tokio::test]
    async fn test_other_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(query_param("max_results", "1"))
            .respond_with(ResponseTemplate::new(502).set_body_string("model down"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(query_param("max_results", "2"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(query_param("max_results", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "new_count": 4,
                "processed": "not a list"
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        assert!(matches!(
            client.fetch_and_classify("t", 1, None).await,
            Err(PipelineError::InferenceFailure(InferenceError::Remote(_)))
        ));
        assert!(matches!(
            client.fetch_and_classify("t", 2, None).await,
            Err(PipelineError::TransientFetchFailure(_))
        ));
        let outcome = client.fetch_and_classify("t", 3, None).await.unwrap();
        assert!(outcome.processed.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"processed": []}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = HttpClassificationClient::new(
            HttpClient::new(),
            &format!("{}/fetch-and-classify", server.uri()),
            Duration::from_millis(50),
        )
        .unwrap();
        assert!(matches!(
            client.fetch_and_classify("t", 1, None).await,
            Err(PipelineError::TransientFetchFailure(_))
        ));
    }
}
