use crate::consts::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
use crate::db_types::{Call, CallStatus, TranscriptMessage, Transition};
use crate::error::CallError;
use crate::guard::authorize;
use crate::provider::{CallRequest, VoiceProvider};
use crate::store::{CallFilter, CallStore};
use crate::tasks::{TranscriptJob, TranscriptReconciler};

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, field, info, info_span, warn, Instrument, Span};
use uuid::Uuid;

/// Internal status for a vendor event type.  `None` means the event does not move the call.
fn status_for_event(event_type: &str) -> Option<CallStatus> {
    match event_type {
        "call.started" => Some(CallStatus::InProgress),
        "call.ended" | "call.completed" => Some(CallStatus::Completed),
        "call.failed" => Some(CallStatus::Failed),
        _ => None,
    }
}

/// One page of a business's calls, with the limits actually applied.
#[derive(Debug)]
pub struct CallPage {
    pub calls: Vec<Call>,
    pub limit: i64,
    pub offset: i64,
}

/// Owns the call state machine: places calls through the provider, folds webhook events into
/// stored calls and hands completed calls to the transcript reconciler.
pub struct CallService {
    provider: Arc<dyn VoiceProvider>,
    store: Arc<dyn CallStore>,
    reconciler: TranscriptReconciler,
    span: Span,
}

impl CallService {
    pub fn new(
        provider: Arc<dyn VoiceProvider>,
        store: Arc<dyn CallStore>,
        reconciler: TranscriptReconciler,
    ) -> Self {
        let span = info_span!("call_service", provider = provider.provider_name());
        Self {
            provider,
            store,
            reconciler,
            span,
        }
    }

    /// Record a new call, then ask the provider to place it.  The record is written before the
    /// provider is contacted so a rejected call still leaves a `failed` row behind.
    pub async fn originate(
        &self,
        business_id: &str,
        destination: &str,
        assistant_ref: Option<String>,
        mut metadata: BTreeMap<String, String>,
    ) -> Result<Call, CallError> {
        let call = Call::new(business_id, destination)?;
        let span = info_span!(parent: &self.span, "originate", call_id = %call.id, business_id);
        self.store.create(&call).instrument(span.clone()).await?;

        metadata.insert("call_id".to_string(), call.id.to_string());
        metadata.insert("business_id".to_string(), business_id.to_string());
        let request = CallRequest {
            destination: call.destination.clone(),
            assistant_ref,
            metadata,
        };

        // Runs detached: dropping the request must not abandon a call the vendor may be dialing.
        let placement = place_call(self.provider.clone(), self.store.clone(), call, request);
        tokio::spawn(placement.instrument(span))
            .await
            .map_err(|e| CallError::ProviderUnavailable(format!("call placement aborted: {e}")))?
    }

    /// Verify and apply one provider webhook delivery.
    pub async fn reconcile_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<(), CallError> {
        let span = info_span!(
            parent: &self.span,
            "webhook",
            event_type = field::Empty,
            vendor_session_id = field::Empty,
            call_id = field::Empty
        );
        self.apply_webhook(payload, signature).instrument(span).await
    }

    async fn apply_webhook(&self, payload: &[u8], signature: &str) -> Result<(), CallError> {
        let event = self.provider.handle_webhook(payload, signature).await?;
        let span = Span::current();
        span.record("event_type", event.event_type.as_str());
        span.record("vendor_session_id", event.vendor_session_id.as_str());
        debug!(
            vendor_status = ?event.vendor_status,
            vendor_timestamp = %event.timestamp,
            raw = %event.raw,
            "webhook received"
        );

        let lookup = self
            .store
            .get_by_vendor_session_id(&event.vendor_session_id)
            .await;
        let mut call = match lookup {
            Ok(call) => call,
            Err(e) => {
                warn!(error=%e, "no call matches webhook");
                return Err(e.into());
            }
        };
        span.record("call_id", field::display(call.id));

        let Some(status) = status_for_event(&event.event_type) else {
            info!("ignoring unrecognized webhook event");
            return Ok(());
        };

        // Receipt time, not the vendor's clock, drives the lifecycle timestamps.
        let was_completed = call.status == CallStatus::Completed;
        if call.transition(status) == Transition::IgnoredAfterEnd {
            info!(current=%call.status, incoming=%status, "call already ended; status kept");
        }
        if let Some(cost) = event.cost {
            call.cost = cost;
        }
        self.store.update(&call).await?;
        info!(
            status=%call.status,
            duration_secs = call.duration_secs,
            "call updated from webhook"
        );

        if call.status == CallStatus::Completed && !was_completed {
            let vendor_session_id = event.vendor_session_id;
            self.reconciler
                .schedule(TranscriptJob {
                    call_id: call.id,
                    vendor_session_id,
                })
                .await;
        }
        Ok(())
    }

    pub async fn get_call(&self, business_id: &str, call_id: Uuid) -> Result<Call, CallError> {
        let call = self.store.get_by_id(call_id).await?;
        authorize(business_id, &call)?;
        Ok(call)
    }

    /// Newest first.  A non-positive limit falls back to the default page size.
    pub async fn list_calls(
        &self,
        business_id: &str,
        filter: CallFilter,
        limit: i64,
        offset: i64,
    ) -> Result<CallPage, CallError> {
        let limit = if limit <= 0 {
            DEFAULT_PAGE_LIMIT
        } else {
            limit.min(MAX_PAGE_LIMIT)
        };
        let offset = offset.max(0);
        let calls = self
            .store
            .list_by_business(business_id, &filter, limit, offset)
            .await?;
        Ok(CallPage {
            calls,
            limit,
            offset,
        })
    }

    pub async fn get_transcript(
        &self,
        business_id: &str,
        call_id: Uuid,
    ) -> Result<Vec<TranscriptMessage>, CallError> {
        let call = self.get_call(business_id, call_id).await?;
        Ok(self.store.get_transcripts(call.id).await?)
    }
}

async fn place_call(
    provider: Arc<dyn VoiceProvider>,
    store: Arc<dyn CallStore>,
    mut call: Call,
    request: CallRequest,
) -> Result<Call, CallError> {
    match provider.initiate_call(request).await {
        Ok(session) => {
            info!(
                vendor_session_id = %session.vendor_session_id,
                vendor_status = ?session.vendor_status,
                "call placed"
            );
            call.vendor_session_id = Some(session.vendor_session_id);
            // The vendor call is live; a failed write here is logged, not returned.
            if let Err(e) = store.update(&call).await {
                error!(error=%e, "failed to store vendor session id");
            }
            Ok(call)
        }
        Err(e) => {
            error!(error=%e, "provider did not place call");
            call.transition(CallStatus::Failed);
            if let Err(store_err) = store.update(&call).await {
                error!(error=%store_err, "failed to mark call as failed");
            }
            Err(CallError::ProviderUnavailable(e.to_string()))
        }
    }
}
