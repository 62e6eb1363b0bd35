mod rest {
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;

    #[derive(Serialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct VapiCallRequest<'a> {
        pub phone_number: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub assistant_id: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub metadata: Option<&'a BTreeMap<String, String>>,
    }

    /// Subset of the call object returned by `POST /call/phone` and `GET /call/{id}`.
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct VapiCall {
        pub id: String,
        #[serde(default)]
        pub status: Option<String>,
        #[serde(default)]
        pub started_at: Option<String>,
        /// Decoded one by one so a single odd entry does not sink the transcript.
        #[serde(default)]
        pub messages: Vec<serde_json::Value>,
    }

    #[derive(Deserialize, Debug)]
    pub struct VapiMessage {
        pub role: String,
        #[serde(default)]
        pub message: Option<String>,
        #[serde(default, alias = "timestamp")]
        pub time: Option<VapiTime>,
    }

    /// Message times show up as RFC 3339 strings and as (possibly fractional) epoch
    /// milliseconds.
    #[derive(Deserialize, Debug, PartialEq)]
    #[serde(untagged)]
    pub enum VapiTime {
        EpochMillis(f64),
        Rfc3339(String),
        Unrecognized(serde_json::Value),
    }
}
pub use rest::*;

mod webhook {
    use serde::Deserialize;

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct VapiWebhook {
        #[serde(rename = "type")]
        pub event_type: String,
        pub call_id: String,
        #[serde(default)]
        pub status: Option<String>,
        #[serde(default)]
        pub timestamp: Option<String>,
        #[serde(default)]
        pub cost: Option<f64>,
    }
}
pub use webhook::*;
