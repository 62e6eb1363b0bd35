use crate::config::VapiConfig;
use crate::db_types::TranscriptRole;
use crate::error::ProviderError;
use crate::provider::{
    CallEvent, CallRequest, CallSession, ProviderResult, ProviderTranscriptMessage, VoiceProvider,
};
use crate::vapi_types::{VapiCall, VapiCallRequest, VapiMessage, VapiTime, VapiWebhook};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use sha2::Sha256;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, error, warn};

type HmacSha256 = Hmac<Sha256>;

const MAX_ERROR_BODY_CHARS: usize = 512;

pub struct VapiProvider {
    config: VapiConfig,
    client: reqwest::Client,
}

impl VapiProvider {
    pub fn new(mut config: VapiConfig) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("failed to build http client: {e}")))?;
        config.api_base_url = config.api_base_url.trim().trim_end_matches('/').to_string();
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url, path)
    }

    async fn send(
        &self,
        operation: &str,
        builder: reqwest::RequestBuilder,
    ) -> ProviderResult<reqwest::Response> {
        builder
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| {
                error!(error=%e, operation, "vapi request failed");
                if e.is_timeout() {
                    ProviderError::Unavailable(format!("operation={operation} timed out"))
                } else {
                    ProviderError::Unavailable(format!("operation={operation} request failed: {e}"))
                }
            })
    }

    async fn read_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        response: reqwest::Response,
    ) -> ProviderResult<T> {
        let status = response.status();
        let body = response.text().await.map_err(|e| {
            ProviderError::Unavailable(format!("operation={operation} failed to read body: {e}"))
        })?;
        if !status.is_success() {
            error!(status=%status, operation, "vapi returned an error status");
            return Err(ProviderError::Unavailable(format!(
                "operation={operation} status={} body={}",
                status.as_u16(),
                truncate_error_body(&body)
            )));
        }
        serde_json::from_str(&body).map_err(|e| {
            error!(error=%e, operation, "failed to deserialize vapi response");
            ProviderError::Unavailable(format!("operation={operation} invalid json response: {e}"))
        })
    }
}

#[async_trait]
impl VoiceProvider for VapiProvider {
    fn provider_name(&self) -> &'static str {
        "vapi"
    }

    async fn initiate_call(&self, request: CallRequest) -> ProviderResult<CallSession> {
        let body = VapiCallRequest {
            phone_number: &request.destination,
            assistant_id: request.assistant_ref.as_deref(),
            metadata: (!request.metadata.is_empty()).then_some(&request.metadata),
        };
        let response = self
            .send("initiate_call", self.client.post(self.url("/call/phone")).json(&body))
            .await?;
        let call: VapiCall = self.read_json("initiate_call", response).await?;
        if call.id.trim().is_empty() {
            return Err(ProviderError::Unavailable(
                "operation=initiate_call response has no call id".to_string(),
            ));
        }
        debug!(vendor_session_id=%call.id, status=?call.status, "vapi accepted call");

        Ok(CallSession {
            started_at: call.started_at.as_deref().and_then(parse_rfc3339),
            vendor_session_id: call.id,
            vendor_status: call.status,
        })
    }

    async fn handle_webhook(&self, payload: &[u8], signature: &str) -> ProviderResult<CallEvent> {
        if !self.validate_webhook_signature(payload, signature) {
            warn!(payload_len = payload.len(), "rejecting webhook with bad signature");
            return Err(ProviderError::InvalidSignature);
        }

        let raw: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| ProviderError::MalformedPayload(format!("invalid json: {e}")))?;
        let hook: VapiWebhook = serde_json::from_value(raw.clone())
            .map_err(|e| ProviderError::MalformedPayload(e.to_string()))?;
        if hook.call_id.trim().is_empty() {
            return Err(ProviderError::MalformedPayload("callId is empty".to_string()));
        }

        Ok(CallEvent {
            timestamp: hook
                .timestamp
                .as_deref()
                .and_then(parse_rfc3339)
                .unwrap_or_else(OffsetDateTime::now_utc),
            event_type: hook.event_type,
            vendor_session_id: hook.call_id,
            vendor_status: hook.status,
            cost: hook.cost,
            raw,
        })
    }

    async fn get_transcript(
        &self,
        vendor_session_id: &str,
    ) -> ProviderResult<Vec<ProviderTranscriptMessage>> {
        let path = format!("/call/{vendor_session_id}");
        let response = self
            .send("get_transcript", self.client.get(self.url(&path)))
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound(format!("call {vendor_session_id}")));
        }
        let call: VapiCall = self.read_json("get_transcript", response).await?;
        Ok(to_transcript(call.messages))
    }

    fn validate_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        let Some(secret) = self.config.webhook_secret.as_deref() else {
            return true;
        };
        let digest_hex = signature.trim();
        let digest_hex = digest_hex.strip_prefix("sha256=").unwrap_or(digest_hex);
        let Some(expected) = decode_hex(digest_hex) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    }
}

/// Map vendor messages onto neutral ones, sorted by time.  Entries that do not decode are
/// skipped.  A message without a usable time inherits its predecessor's so the vendor's order
/// survives the sort.
fn to_transcript(messages: Vec<serde_json::Value>) -> Vec<ProviderTranscriptMessage> {
    let mut last_seen: Option<OffsetDateTime> = None;
    let mut transcript = Vec::with_capacity(messages.len());
    for (index, raw) in messages.into_iter().enumerate() {
        let message: VapiMessage = match serde_json::from_value(raw) {
            Ok(message) => message,
            Err(e) => {
                debug!(index, error=%e, "skipping undecodable transcript message");
                continue;
            }
        };
        let role = match message.role.as_str() {
            "assistant" | "bot" => TranscriptRole::Assistant,
            "user" | "customer" => TranscriptRole::User,
            "system" => TranscriptRole::System,
            other => {
                debug!(role=%other, "skipping transcript message with unknown role");
                continue;
            }
        };
        let timestamp = message
            .time
            .as_ref()
            .and_then(vapi_time_to_datetime)
            .or(last_seen)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        last_seen = Some(timestamp);
        transcript.push(ProviderTranscriptMessage {
            role,
            text: message.message.unwrap_or_default(),
            timestamp,
        });
    }
    transcript.sort_by_key(|m| m.timestamp);
    transcript
}

fn vapi_time_to_datetime(time: &VapiTime) -> Option<OffsetDateTime> {
    match time {
        VapiTime::EpochMillis(ms) if ms.is_finite() => {
            let whole = ms.trunc();
            let nanos = whole as i128 * 1_000_000 + ((ms - whole) * 1_000_000.0).round() as i128;
            OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()
        }
        VapiTime::EpochMillis(_) | VapiTime::Unrecognized(_) => None,
        VapiTime::Rfc3339(s) => parse_rfc3339(s),
    }
}

fn parse_rfc3339(s: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(s, &Rfc3339).ok()
}

fn decode_hex(raw: &str) -> Option<Vec<u8>> {
    if raw.is_empty() || raw.len() % 2 != 0 || !raw.is_ascii() {
        return None;
    }
    (0..raw.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&raw[i..i + 2], 16).ok())
        .collect()
}

fn truncate_error_body(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    if trimmed.chars().count() <= MAX_ERROR_BODY_CHARS {
        return trimmed.to_string();
    }
    let truncated: String = trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect();
    format!("{truncated}...")
}
