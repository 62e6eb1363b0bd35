use crate::calls::CallService;
use crate::db_types::{Call, TranscriptMessage};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub struct AppState {
    pub service: CallService,
}

/// Body of `POST /api/v1/calls`.
#[derive(Debug, Deserialize)]
pub struct InitiateCallRequest {
    pub phone_number: String,
    pub assistant_id: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListCallsQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListCallsResponse {
    pub calls: Vec<Call>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct TranscriptResponse {
    pub call_id: Uuid,
    pub messages: Vec<TranscriptMessage>,
}
