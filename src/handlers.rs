use crate::db_types::{Call, CallStatus};
use crate::error::CallError;
use crate::store::CallFilter;
use crate::types::{
    AppState, InitiateCallRequest, ListCallsQuery, ListCallsResponse, TranscriptResponse,
};

use axum::{
    body::Bytes,
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Set by the upstream authentication layer to the caller's business.
pub const BUSINESS_ID_HEADER: &str = "x-business-id";
pub const VAPI_SIGNATURE_HEADER: &str = "x-vapi-signature";

pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/calls", post(create_call).get(list_calls))
        .route("/api/v1/calls/:id", get(get_call))
        .route("/api/v1/calls/:id/transcript", get(get_transcript))
        .route("/api/v1/webhooks/vapi", post(vapi_webhook))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(app_state)
}

/// Tenant identity of the request.
pub struct BusinessId(pub String);

pub struct MissingBusinessId;

impl IntoResponse for MissingBusinessId {
    fn into_response(self) -> Response {
        let body = json!({ "code": "UNAUTHORIZED", "message": "missing business identity" });
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for BusinessId {
    type Rejection = MissingBusinessId;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(BUSINESS_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| BusinessId(value.to_string()))
            .ok_or(MissingBusinessId)
    }
}

pub async fn create_call(
    State(app_state): State<Arc<AppState>>,
    BusinessId(business_id): BusinessId,
    Json(request): Json<InitiateCallRequest>,
) -> Result<(StatusCode, Json<Call>), CallError> {
    let call = app_state
        .service
        .originate(
            &business_id,
            &request.phone_number,
            request.assistant_id,
            request.metadata,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(call)))
}

pub async fn list_calls(
    State(app_state): State<Arc<AppState>>,
    BusinessId(business_id): BusinessId,
    Query(query): Query<ListCallsQuery>,
) -> Result<Json<ListCallsResponse>, CallError> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<CallStatus>)
        .transpose()?;
    let page = app_state
        .service
        .list_calls(
            &business_id,
            CallFilter { status },
            query.limit.unwrap_or_default(),
            query.offset.unwrap_or_default(),
        )
        .await?;
    Ok(Json(ListCallsResponse {
        calls: page.calls,
        limit: page.limit,
        offset: page.offset,
    }))
}

pub async fn get_call(
    State(app_state): State<Arc<AppState>>,
    BusinessId(business_id): BusinessId,
    Path(call_id): Path<Uuid>,
) -> Result<Json<Call>, CallError> {
    Ok(Json(app_state.service.get_call(&business_id, call_id).await?))
}

pub async fn get_transcript(
    State(app_state): State<Arc<AppState>>,
    BusinessId(business_id): BusinessId,
    Path(call_id): Path<Uuid>,
) -> Result<Json<TranscriptResponse>, CallError> {
    let messages = app_state
        .service
        .get_transcript(&business_id, call_id)
        .await?;
    Ok(Json(TranscriptResponse { call_id, messages }))
}

/// The body is taken as raw bytes; the signature covers exactly what was received.
pub async fn vapi_webhook(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, CallError> {
    let signature = headers
        .get(VAPI_SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    trace!(body_len = body.len(), has_signature = !signature.is_empty(), "vapi webhook");
    app_state
        .service
        .reconcile_webhook(&body, signature)
        .await?;
    debug!("vapi webhook applied");
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::CallService;
    use crate::config::VapiConfig;
    use crate::db_types::TranscriptRole;
    use crate::provider::fake::{utterance, FakeProvider};
    use crate::store::{CallStore, MemoryCallStore};
    use crate::tasks::TranscriptReconciler;
    use crate::vapi::VapiProvider;

    use axum::body::Body;
    use axum::http::Request;
    use hmac::{Hmac, Mac};
    use serde_json::Value;
    use sha2::Sha256;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app_state(provider: Arc<FakeProvider>) -> Arc<AppState> {
        let store = Arc::new(MemoryCallStore::new());
        let reconciler =
            TranscriptReconciler::inline(provider.clone(), store.clone(), Duration::from_secs(5));
        Arc::new(AppState {
            service: CallService::new(provider, store, reconciler),
        })
    }

    async fn send(app_state: &Arc<AppState>, request: Request<Body>) -> (StatusCode, Value) {
        let response = router(app_state.clone())
            .oneshot(request)
            .await
            .expect("response");
        let status = response.status();
        let bytes = hyper::body::to_bytes(response.into_body())
            .await
            .expect("body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    fn get(uri: &str, business_id: &str) -> Request<Body> {
        Request::get(uri)
            .header(BUSINESS_ID_HEADER, business_id)
            .body(Body::empty())
            .expect("request")
    }

    fn create(business_id: &str, body: Value) -> Request<Body> {
        Request::post("/api/v1/calls")
            .header(BUSINESS_ID_HEADER, business_id)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    fn webhook(body: &str) -> Request<Body> {
        Request::post("/api/v1/webhooks/vapi")
            .header(VAPI_SIGNATURE_HEADER, "00")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn create_call_returns_created_record() {
        let provider = Arc::new(FakeProvider::default());
        provider.accept_call("v-99");
        let state = app_state(provider);

        let (status, body) = send(
            &state,
            create("biz-1", json!({ "phone_number": "+15551234567" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "initiated");
        assert_eq!(body["vendor_session_id"], "v-99");
        assert_eq!(body["business_id"], "biz-1");
    }

    #[tokio::test]
    async fn missing_tenant_header_is_unauthorized() {
        let state = app_state(Arc::new(FakeProvider::default()));
        let request = Request::get("/api/v1/calls")
            .body(Body::empty())
            .expect("request");
        let (status, body) = send(&state, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn error_kinds_map_to_status_codes() {
        let provider = Arc::new(FakeProvider::default());
        provider.accept_call("v-1");
        provider.reject_call("vendor down");
        let state = app_state(provider);

        let (status, body) = send(&state, create("biz-1", json!({ "phone_number": "" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");

        let (_, created) = send(
            &state,
            create("biz-1", json!({ "phone_number": "+15551234567" })),
        )
        .await;
        let id = created["id"].as_str().expect("id").to_string();

        let (status, body) = send(&state, get(&format!("/api/v1/calls/{id}"), "biz-2")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "FORBIDDEN");

        let missing = Uuid::new_v4();
        let (status, _) = send(&state, get(&format!("/api/v1/calls/{missing}"), "biz-1")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&state, get("/api/v1/calls?status=dialing", "biz-1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_STATUS");

        let (status, body) = send(
            &state,
            create("biz-1", json!({ "phone_number": "+15550000000" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["code"], "PROVIDER_ERROR");
    }

    #[tokio::test]
    async fn list_reports_applied_page() {
        let provider = Arc::new(FakeProvider::default());
        provider.accept_call("v-1");
        let state = app_state(provider);
        send(
            &state,
            create("biz-1", json!({ "phone_number": "+15551234567" })),
        )
        .await;

        let (status, body) = send(&state, get("/api/v1/calls?limit=500", "biz-1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["limit"], 100);
        assert_eq!(body["offset"], 0);
        assert_eq!(body["calls"].as_array().expect("calls").len(), 1);

        let (_, body) = send(&state, get("/api/v1/calls?status=completed", "biz-1")).await;
        assert_eq!(body["limit"], 20);
        assert!(body["calls"].as_array().expect("calls").is_empty());
    }

    #[tokio::test]
    async fn webhooks_drive_the_call_to_a_transcript() {
        let provider = Arc::new(FakeProvider::default());
        provider.accept_call("v-99");
        let state = app_state(provider.clone());
        let (_, created) = send(
            &state,
            create("biz-1", json!({ "phone_number": "+15551234567" })),
        )
        .await;
        let id = created["id"].as_str().expect("id").to_string();

        provider.push_event("call.started", "v-99");
        let (status, _) = send(&state, webhook(r#"{"type":"call.started","callId":"v-99"}"#)).await;
        assert_eq!(status, StatusCode::OK);

        provider.push_transcript(Ok(vec![
            utterance(TranscriptRole::Assistant, "Hello", 1),
            utterance(TranscriptRole::User, "Hi there", 2),
        ]));
        provider.push_event("call.ended", "v-99");
        let (status, _) = send(&state, webhook(r#"{"type":"call.ended","callId":"v-99"}"#)).await;
        assert_eq!(status, StatusCode::OK);

        let (status, call) = send(&state, get(&format!("/api/v1/calls/{id}"), "biz-1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(call["status"], "completed");
        assert!(call["ended_at"].is_string());

        let (status, body) = send(
            &state,
            get(&format!("/api/v1/calls/{id}/transcript"), "biz-1"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["call_id"], id.as_str());
        let messages = body["messages"].as_array().expect("messages");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "assistant");
        assert_eq!(messages[1]["text"], "Hi there");
    }

    #[tokio::test]
    async fn vapi_signature_header_is_checked_over_raw_body() {
        let secret = "whsec-test";
        let provider = Arc::new(
            VapiProvider::new(VapiConfig {
                api_key: "test-key".to_string(),
                api_base_url: "http://127.0.0.1:9".to_string(),
                webhook_secret: Some(secret.to_string()),
                request_timeout: Duration::from_secs(1),
            })
            .expect("provider"),
        );
        let store = Arc::new(MemoryCallStore::new());
        let mut call = Call::new("biz-1", "+15551234567").expect("call");
        call.vendor_session_id = Some("v-42".to_string());
        store.create(&call).await.expect("create");
        let reconciler =
            TranscriptReconciler::inline(provider.clone(), store.clone(), Duration::from_secs(1));
        let state = Arc::new(AppState {
            service: CallService::new(provider, store.clone(), reconciler),
        });

        let body = r#"{"type":"call.started","callId":"v-42"}"#;
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("mac");
        mac.update(body.as_bytes());
        let signature: String = mac
            .finalize()
            .into_bytes()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        let signed = |payload: &str| {
            Request::post("/api/v1/webhooks/vapi")
                .header(VAPI_SIGNATURE_HEADER, signature.as_str())
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .expect("request")
        };

        let tampered = r#"{"type":"call.started","callId":"v-43"}"#;
        let (status, body_json) = send(&state, signed(tampered)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body_json["code"], "INVALID_SIGNATURE");
        let untouched = store.get_by_id(call.id).await.expect("stored");
        assert_eq!(untouched.status, CallStatus::Initiated);

        let (status, _) = send(&state, signed(body)).await;
        assert_eq!(status, StatusCode::OK);
        let started = store.get_by_id(call.id).await.expect("stored");
        assert_eq!(started.status, CallStatus::InProgress);
    }

    #[tokio::test]
    async fn webhook_for_unknown_call_is_not_found() {
        let provider = Arc::new(FakeProvider::default());
        provider.push_event("call.started", "unknown-123");
        let state = app_state(provider);
        let (status, body) = send(&state, webhook("{}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn health_check_needs_no_tenant() {
        let state = app_state(Arc::new(FakeProvider::default()));
        let request = Request::get("/healthz").body(Body::empty()).expect("request");
        let response = router(state).oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }
}
