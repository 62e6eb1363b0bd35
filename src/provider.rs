use crate::config::{AppConfig, ProviderKind};
use crate::db_types::TranscriptRole;
use crate::error::ProviderError;
use crate::vapi::VapiProvider;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use time::OffsetDateTime;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Request to place an outbound call.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CallRequest {
    pub destination: String,
    pub assistant_ref: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// What the provider tells us right after accepting a call.
#[derive(Clone, Debug, PartialEq)]
pub struct CallSession {
    pub vendor_session_id: String,
    pub vendor_status: Option<String>,
    pub started_at: Option<OffsetDateTime>,
}

/// A verified, parsed webhook delivery.  `raw` is kept for audit logging only.
#[derive(Clone, Debug, PartialEq)]
pub struct CallEvent {
    pub event_type: String,
    pub vendor_session_id: String,
    pub vendor_status: Option<String>,
    pub timestamp: OffsetDateTime,
    pub cost: Option<f64>,
    pub raw: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProviderTranscriptMessage {
    pub role: TranscriptRole,
    pub text: String,
    pub timestamp: OffsetDateTime,
}

/// Capabilities the call lifecycle engine needs from a voice vendor.  Everything vendor-specific
/// (REST shapes, event taxonomy, signature scheme) stays behind this trait.
#[async_trait]
pub trait VoiceProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn initiate_call(&self, request: CallRequest) -> ProviderResult<CallSession>;

    /// Verify `signature` over the exact `payload` bytes, then parse them.
    async fn handle_webhook(&self, payload: &[u8], signature: &str) -> ProviderResult<CallEvent>;

    /// Transcript of a finished call, ordered by timestamp ascending.
    async fn get_transcript(
        &self,
        vendor_session_id: &str,
    ) -> ProviderResult<Vec<ProviderTranscriptMessage>>;

    /// Pure check, no network.  With no shared secret configured this always passes.
    fn validate_webhook_signature(&self, payload: &[u8], signature: &str) -> bool;
}

pub fn build_provider(config: &AppConfig) -> ProviderResult<Arc<dyn VoiceProvider>> {
    match config.provider {
        ProviderKind::Vapi => Ok(Arc::new(VapiProvider::new(config.vapi.clone())?)),
    }
}
