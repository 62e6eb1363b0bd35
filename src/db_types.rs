use crate::error::CallError;

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Initiated,
    Ringing,
    InProgress,
    Completed,
    Failed,
    NoAnswer,
    Busy,
}

impl CallStatus {
    pub const ALL: [CallStatus; 7] = [
        CallStatus::Initiated,
        CallStatus::Ringing,
        CallStatus::InProgress,
        CallStatus::Completed,
        CallStatus::Failed,
        CallStatus::NoAnswer,
        CallStatus::Busy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Initiated => "initiated",
            CallStatus::Ringing => "ringing",
            CallStatus::InProgress => "in_progress",
            CallStatus::Completed => "completed",
            CallStatus::Failed => "failed",
            CallStatus::NoAnswer => "no_answer",
            CallStatus::Busy => "busy",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Completed | CallStatus::Failed | CallStatus::NoAnswer | CallStatus::Busy
        )
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsing is the only way to get a status from the outside, so membership in the known set is
/// checked here.
impl FromStr for CallStatus {
    type Err = CallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CallStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CallError::InvalidStatus(s.to_string()))
    }
}

/// Outcome of applying a status to a call.
#[derive(Debug, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// A non-terminal status arrived after the call had already ended.
    IgnoredAfterEnd,
}

/// One outbound phone session owned by a single business.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Call {
    pub id: Uuid,
    pub business_id: String,
    /// Assigned once the provider accepts the call
    pub vendor_session_id: Option<String>,
    pub destination: String,
    pub status: CallStatus,
    /// Whole seconds between start and end; frozen once the call ends
    pub duration_secs: i64,
    pub cost: f64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Call {
    pub fn new(business_id: &str, destination: &str) -> Result<Self, CallError> {
        if business_id.trim().is_empty() {
            return Err(CallError::Validation("business_id is required".to_string()));
        }
        if destination.trim().is_empty() {
            return Err(CallError::Validation(
                "destination phone number is required".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            business_id: business_id.to_string(),
            vendor_session_id: None,
            destination: destination.trim().to_string(),
            status: CallStatus::Initiated,
            duration_secs: 0,
            cost: 0.0,
            started_at: None,
            ended_at: None,
            created_at: OffsetDateTime::now_utc(),
        })
    }

    pub fn transition(&mut self, status: CallStatus) -> Transition {
        self.transition_at(status, OffsetDateTime::now_utc())
    }

    /// Apply `status` as of `now`.  Redelivered and out-of-order events are accepted, but the
    /// start and end timestamps are only ever set once and the duration is computed exactly
    /// when the end timestamp is set.  An ended call keeps a terminal status.
    pub fn transition_at(&mut self, status: CallStatus, now: OffsetDateTime) -> Transition {
        if self.ended_at.is_some() && !status.is_terminal() {
            return Transition::IgnoredAfterEnd;
        }
        self.status = status;

        if status == CallStatus::InProgress && self.started_at.is_none() {
            self.started_at = Some(now);
        }

        if status.is_terminal() && self.ended_at.is_none() {
            self.ended_at = Some(now);
            if let Some(started_at) = self.started_at {
                self.duration_secs = (now - started_at).whole_seconds().max(0);
            }
        }

        Transition::Applied
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    Assistant,
    User,
    System,
}

impl TranscriptRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptRole::Assistant => "assistant",
            TranscriptRole::User => "user",
            TranscriptRole::System => "system",
        }
    }
}

impl FromStr for TranscriptRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assistant" => Ok(TranscriptRole::Assistant),
            "user" => Ok(TranscriptRole::User),
            "system" => Ok(TranscriptRole::System),
            other => Err(format!("unknown transcript role '{other}'")),
        }
    }
}

/// One utterance of a call.  `seq` is the message's position in the fetched transcript and,
/// together with `call_id`, identifies it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TranscriptMessage {
    #[serde(skip)]
    pub call_id: Uuid,
    pub seq: i32,
    pub role: TranscriptRole,
    pub text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn call() -> Call {
        Call::new("biz-1", "+15551234567").expect("valid call")
    }

    #[test]
    fn new_call_starts_initiated_without_timestamps() {
        let c = call();
        assert_eq!(c.status, CallStatus::Initiated);
        assert!(c.vendor_session_id.is_none());
        assert!(c.started_at.is_none());
        assert!(c.ended_at.is_none());
        assert_eq!(c.duration_secs, 0);
    }

    #[test]
    fn new_call_rejects_empty_destination() {
        let err = Call::new("biz-1", "   ").expect_err("empty destination");
        assert!(matches!(err, CallError::Validation(_)));
        let err = Call::new("", "+15551234567").expect_err("empty business");
        assert!(matches!(err, CallError::Validation(_)));
    }

    #[test]
    fn parsing_rejects_unknown_status() {
        assert_eq!("in_progress".parse::<CallStatus>().ok(), Some(CallStatus::InProgress));
        assert_eq!("no_answer".parse::<CallStatus>().ok(), Some(CallStatus::NoAnswer));
        let err = "on_hold".parse::<CallStatus>().expect_err("unknown status");
        assert!(matches!(err, CallError::InvalidStatus(s) if s == "on_hold"));
    }

    #[test]
    fn in_progress_sets_start_once() {
        let mut c = call();
        let t0 = OffsetDateTime::now_utc();
        c.transition_at(CallStatus::InProgress, t0);
        c.transition_at(CallStatus::InProgress, t0 + Duration::seconds(5));
        assert_eq!(c.started_at, Some(t0));
        assert!(c.ended_at.is_none());
    }

    #[test]
    fn terminal_status_freezes_end_and_duration() {
        let mut c = call();
        let t0 = OffsetDateTime::now_utc();
        c.transition_at(CallStatus::InProgress, t0);
        c.transition_at(CallStatus::Completed, t0 + Duration::seconds(42));
        assert_eq!(c.duration_secs, 42);
        assert_eq!(c.ended_at, Some(t0 + Duration::seconds(42)));

        // redelivery later must not move either value
        c.transition_at(CallStatus::Completed, t0 + Duration::seconds(100));
        assert_eq!(c.duration_secs, 42);
        assert_eq!(c.ended_at, Some(t0 + Duration::seconds(42)));
    }

    #[test]
    fn terminal_without_start_leaves_duration_zero() {
        let mut c = call();
        c.transition(CallStatus::Busy);
        assert_eq!(c.status, CallStatus::Busy);
        assert!(c.ended_at.is_some());
        assert_eq!(c.duration_secs, 0);
    }

    #[test]
    fn terminal_to_terminal_overwrites_status_but_not_timestamps() {
        let mut c = call();
        let t0 = OffsetDateTime::now_utc();
        c.transition_at(CallStatus::InProgress, t0);
        c.transition_at(CallStatus::Completed, t0 + Duration::seconds(10));
        let outcome = c.transition_at(CallStatus::Failed, t0 + Duration::seconds(20));
        assert_eq!(outcome, Transition::Applied);
        assert_eq!(c.status, CallStatus::Failed);
        assert_eq!(c.duration_secs, 10);
        assert_eq!(c.ended_at, Some(t0 + Duration::seconds(10)));
    }

    #[test]
    fn late_interim_status_does_not_reopen_an_ended_call() {
        let mut c = call();
        c.transition(CallStatus::Completed);
        let outcome = c.transition(CallStatus::InProgress);
        assert_eq!(outcome, Transition::IgnoredAfterEnd);
        assert_eq!(c.status, CallStatus::Completed);
        assert!(c.started_at.is_none());
    }

    #[test]
    fn end_timestamp_implies_terminal_status_for_any_sequence() {
        for first in CallStatus::ALL {
            for second in CallStatus::ALL {
                let mut c = call();
                c.transition(first);
                c.transition(second);
                assert_eq!(c.ended_at.is_some(), c.status.is_terminal());
            }
        }
    }
}
