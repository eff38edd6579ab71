// src/backend/http.rs
// Generic JSON-over-HTTP backend for remote lane providers

use super::{Backend, BackendError, CallContext, ProviderSpec};
use crate::types::{LaneName, LanePayload, QueryContext};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Connect timeout for provider endpoints; the request timeout comes from the lane budget
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LaneRequest<'a> {
    query: &'a str,
    class: &'a str,
    lane: &'a str,
    trace_id: &'a str,
}

/// POSTs the query to a provider endpoint and expects a `LanePayload` JSON body:
/// `{"items": [{"sourceId", "snippet", "confidence"}], "answer": "..."}`.
pub struct HttpBackend {
    spec: ProviderSpec,
    endpoint: String,
    api_key: Option<String>,
    client: Client,
}

/// One connection pool for every HTTP provider. Per-request timeouts come
/// from the lane deadline, so only the connect timeout is set here.
pub fn shared_client() -> crate::error::Result<Client> {
    Ok(Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?)
}

impl HttpBackend {
    /// `client` is normally a clone of [`shared_client`]; clones share the pool
    pub fn new(spec: ProviderSpec, endpoint: impl Into<String>, client: Client) -> Self {
        Self {
            spec,
            endpoint: endpoint.into(),
            api_key: None,
            client,
        }
    }

    /// Send `Authorization: Bearer <key>` with every call
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(
        &self,
        ctx: &CallContext,
        query: &QueryContext,
    ) -> Result<LanePayload, BackendError> {
        let body = LaneRequest {
            query: &query.query,
            class: query.class.as_str(),
            lane: self.spec.lane.as_str(),
            trace_id: &query.trace_id,
        };

        let mut request = self
            .client
            .post(&self.endpoint)
            .timeout(ctx.remaining())
            .header("X-Trace-Id", &query.trace_id)
            .json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status));
        }

        let payload: LanePayload = response.json().await?;
        validate_payload(self.spec.lane, payload)
    }
}

fn status_error(status: StatusCode) -> BackendError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => BackendError::RateLimited(status.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            BackendError::Unavailable(format!("auth rejected ({status})"))
        }
        s if s.is_server_error() => BackendError::Unavailable(s.to_string()),
        s => BackendError::InvalidResponse(format!("unexpected status {s}")),
    }
}

/// The LLM lane must return an answer; retrieval lanes must not return garbage ids
fn validate_payload(lane: LaneName, payload: LanePayload) -> Result<LanePayload, BackendError> {
    if lane == LaneName::Llm
        && payload
            .answer
            .as_deref()
            .is_none_or(|a| a.trim().is_empty())
    {
        return Err(BackendError::InvalidResponse(
            "LLM provider returned no answer".into(),
        ));
    }
    if payload.items.iter().any(|e| e.source_id.trim().is_empty()) {
        return Err(BackendError::InvalidResponse(
            "evidence item without source id".into(),
        ));
    }
    Ok(payload)
}

#[async_trait]
impl Backend for HttpBackend {
    fn spec(&self) -> &ProviderSpec {
        &self.spec
    }

    async fn call(
        &self,
        ctx: &CallContext,
        query: &QueryContext,
    ) -> Result<LanePayload, BackendError> {
        debug!(
            provider = %self.spec.id,
            lane = %self.spec.lane,
            endpoint = %self.endpoint,
            trace_id = %query.trace_id,
            "Calling provider"
        );
        tokio::select! {
            result = self.send(ctx, query) => result,
            _ = ctx.cancel.cancelled() => Err(BackendError::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Evidence;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS),
            BackendError::RateLimited(_)
        ));
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED),
            BackendError::Unavailable(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY),
            BackendError::Unavailable(_)
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND),
            BackendError::InvalidResponse(_)
        ));
    }

    #[test]
    fn test_llm_payload_requires_answer() {
        let err = validate_payload(LaneName::Llm, LanePayload::default()).unwrap_err();
        assert!(matches!(err, BackendError::InvalidResponse(_)));
        assert!(validate_payload(LaneName::Llm, LanePayload::answer("Paris")).is_ok());
        // Retrieval lanes may legitimately find nothing
        assert!(validate_payload(LaneName::Vector, LanePayload::default()).is_ok());
    }

    #[test]
    fn test_evidence_requires_source_id() {
        let payload = LanePayload::evidence(vec![Evidence::new("  ", "x", 0.5)]);
        assert!(validate_payload(LaneName::Web, payload).is_err());
    }

    #[test]
    fn test_payload_body_shape() {
        let payload: LanePayload = serde_json::from_str(
            r#"{"items":[{"sourceId":"kg:Q90","snippet":"Paris is the capital","confidence":0.95}]}"#,
        )
        .unwrap();
        assert_eq!(payload.items[0].source_id, "kg:Q90");
        assert!(payload.answer.is_none());
    }

    #[test]
    fn test_backends_built_from_shared_client() {
        let client = shared_client().unwrap();
        let a = HttpBackend::new(
            ProviderSpec::new("a", LaneName::Web, crate::backend::CostTier::Free),
            "http://127.0.0.1:9/a",
            client.clone(),
        );
        let b = HttpBackend::new(
            ProviderSpec::new("b", LaneName::Vector, crate::backend::CostTier::Free),
            "http://127.0.0.1:9/b",
            client,
        );
        assert_eq!(a.endpoint(), "http://127.0.0.1:9/a");
        assert_eq!(b.endpoint(), "http://127.0.0.1:9/b");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        use crate::backend::CostTier;
        use crate::types::{BudgetTier, QueryClass};
        use tokio_util::sync::CancellationToken;

        let backend = HttpBackend::new(
            ProviderSpec::new("nowhere", LaneName::Web, CostTier::Free),
            "http://127.0.0.1:9/search",
            shared_client().unwrap(),
        );
        let ctx = CallContext::new(
            tokio::time::Instant::now() + Duration::from_secs(2),
            CancellationToken::new(),
        );
        let query = QueryContext::new("q", QueryClass::Simple, BudgetTier::Fast, "t");
        let err = backend.call(&ctx, &query).await.unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
    }
}
