use crate::db_types::{Call, CallStatus, TranscriptMessage};
use crate::error::StoreError;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

pub type StoreResult<T> = Result<T, StoreError>;

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallFilter {
    pub status: Option<CallStatus>,
}

impl CallFilter {
    fn matches(&self, call: &Call) -> bool {
        self.status.map_or(true, |status| call.status == status)
    }
}

/// Persistence for calls and their transcripts.  Dropping a returned future abandons the
/// operation.
#[async_trait]
pub trait CallStore: Send + Sync {
    async fn create(&self, call: &Call) -> StoreResult<()>;

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Call>;

    async fn get_by_vendor_session_id(&self, vendor_session_id: &str) -> StoreResult<Call>;

    async fn update(&self, call: &Call) -> StoreResult<()>;

    /// Newest first.
    async fn list_by_business(
        &self,
        business_id: &str,
        filter: &CallFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Call>>;

    /// Ordered by timestamp ascending.
    async fn get_transcripts(&self, call_id: Uuid) -> StoreResult<Vec<TranscriptMessage>>;

    /// Insert all messages in one write.  Messages already stored under the same
    /// `(call_id, seq)` are skipped; returns how many were new.
    async fn create_transcripts_batch(&self, messages: &[TranscriptMessage]) -> StoreResult<u64>;
}

const CALL_COLUMNS: &str = "id, business_id, vendor_session_id, destination, status, \
                            duration_secs, cost, started_at, ended_at, created_at";

#[derive(sqlx::FromRow)]
struct CallRow {
    id: Uuid,
    business_id: String,
    vendor_session_id: Option<String>,
    destination: String,
    status: String,
    duration_secs: i64,
    cost: f64,
    started_at: Option<OffsetDateTime>,
    ended_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
}

impl TryFrom<CallRow> for Call {
    type Error = StoreError;

    fn try_from(row: CallRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|_| {
                StoreError::Corrupt(format!("call {} has status '{}'", row.id, row.status))
            })?;
        Ok(Call {
            id: row.id,
            business_id: row.business_id,
            vendor_session_id: row.vendor_session_id,
            destination: row.destination,
            status,
            duration_secs: row.duration_secs,
            cost: row.cost,
            started_at: row.started_at,
            ended_at: row.ended_at,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TranscriptRow {
    call_id: Uuid,
    seq: i32,
    role: String,
    text: String,
    timestamp: OffsetDateTime,
}

impl TryFrom<TranscriptRow> for TranscriptMessage {
    type Error = StoreError;

    fn try_from(row: TranscriptRow) -> Result<Self, Self::Error> {
        Ok(TranscriptMessage {
            role: row.role.parse().map_err(StoreError::Corrupt)?,
            call_id: row.call_id,
            seq: row.seq,
            text: row.text,
            timestamp: row.timestamp,
        })
    }
}

pub struct PgCallStore {
    pool: PgPool,
}

impl PgCallStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

#[async_trait]
impl CallStore for PgCallStore {
    async fn create(&self, call: &Call) -> StoreResult<()> {
        let sql = format!(
            "INSERT INTO calls ({CALL_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        );
        sqlx::query(&sql)
            .bind(call.id)
            .bind(&call.business_id)
            .bind(&call.vendor_session_id)
            .bind(&call.destination)
            .bind(call.status.as_str())
            .bind(call.duration_secs)
            .bind(call.cost)
            .bind(call.started_at)
            .bind(call.ended_at)
            .bind(call.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| unique_or_database(e, format!("call {}", call.id)))?;
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Call> {
        let sql = format!("SELECT {CALL_COLUMNS} FROM calls WHERE id = $1");
        sqlx::query_as::<_, CallRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("call {id}")))?
            .try_into()
    }

    async fn get_by_vendor_session_id(&self, vendor_session_id: &str) -> StoreResult<Call> {
        let sql = format!("SELECT {CALL_COLUMNS} FROM calls WHERE vendor_session_id = $1");
        sqlx::query_as::<_, CallRow>(&sql)
            .bind(vendor_session_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| {
                StoreError::NotFound(format!("call with vendor session {vendor_session_id}"))
            })?
            .try_into()
    }

    async fn update(&self, call: &Call) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE calls SET vendor_session_id = $2, status = $3, duration_secs = $4, \
             cost = $5, started_at = $6, ended_at = $7 WHERE id = $1",
        )
        .bind(call.id)
        .bind(&call.vendor_session_id)
        .bind(call.status.as_str())
        .bind(call.duration_secs)
        .bind(call.cost)
        .bind(call.started_at)
        .bind(call.ended_at)
        .execute(&self.pool)
        .await
        .map_err(|e| unique_or_database(e, format!("vendor session for call {}", call.id)))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("call {}", call.id)));
        }
        Ok(())
    }

    async fn list_by_business(
        &self,
        business_id: &str,
        filter: &CallFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Call>> {
        let sql = format!(
            "SELECT {CALL_COLUMNS} FROM calls \
             WHERE business_id = $1 AND ($2::TEXT IS NULL OR status = $2) \
             ORDER BY created_at DESC LIMIT $3 OFFSET $4"
        );
        sqlx::query_as::<_, CallRow>(&sql)
            .bind(business_id)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Call::try_from)
            .collect()
    }

    async fn get_transcripts(&self, call_id: Uuid) -> StoreResult<Vec<TranscriptMessage>> {
        sqlx::query_as::<_, TranscriptRow>(
            "SELECT call_id, seq, role, text, timestamp FROM transcripts \
             WHERE call_id = $1 ORDER BY timestamp ASC, seq ASC",
        )
        .bind(call_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(TranscriptMessage::try_from)
        .collect()
    }

    async fn create_transcripts_batch(&self, messages: &[TranscriptMessage]) -> StoreResult<u64> {
        if messages.is_empty() {
            return Ok(0);
        }
        let mut tx: Transaction<'_, Postgres> = self.pool.begin().await?;
        let mut inserted = 0;
        for message in messages {
            inserted += sqlx::query(
                "INSERT INTO transcripts (call_id, seq, role, text, timestamp) \
                 VALUES ($1, $2, $3, $4, $5) ON CONFLICT (call_id, seq) DO NOTHING",
            )
            .bind(message.call_id)
            .bind(message.seq)
            .bind(message.role.as_str())
            .bind(&message.text)
            .bind(message.timestamp)
            .execute(&mut tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }
}

/// Unique-key violations become `Conflict` so both stores report them the same way.
fn unique_or_database(e: sqlx::Error, what: String) -> StoreError {
    let unique = matches!(
        &e,
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION)
    );
    if unique {
        StoreError::Conflict(what)
    } else {
        StoreError::Database(e)
    }
}

/// Process-local store used when no database is configured, and by tests.  Enforces the same
/// uniqueness as the Postgres schema: one row per id and per vendor session id.
#[derive(Default)]
pub struct MemoryCallStore {
    calls: RwLock<HashMap<Uuid, Call>>,
    transcripts: RwLock<HashMap<Uuid, Vec<TranscriptMessage>>>,
}

impl MemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CallStore for MemoryCallStore {
    async fn create(&self, call: &Call) -> StoreResult<()> {
        let mut calls = self.calls.write().await;
        if calls.contains_key(&call.id) {
            return Err(StoreError::Conflict(format!("call {}", call.id)));
        }
        ensure_vendor_session_free(&calls, call)?;
        calls.insert(call.id, call.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Call> {
        self.calls
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("call {id}")))
    }

    async fn get_by_vendor_session_id(&self, vendor_session_id: &str) -> StoreResult<Call> {
        self.calls
            .read()
            .await
            .values()
            .find(|c| c.vendor_session_id.as_deref() == Some(vendor_session_id))
            .cloned()
            .ok_or_else(|| {
                StoreError::NotFound(format!("call with vendor session {vendor_session_id}"))
            })
    }

    async fn update(&self, call: &Call) -> StoreResult<()> {
        let mut calls = self.calls.write().await;
        if !calls.contains_key(&call.id) {
            return Err(StoreError::NotFound(format!("call {}", call.id)));
        }
        ensure_vendor_session_free(&calls, call)?;
        calls.insert(call.id, call.clone());
        Ok(())
    }

    async fn list_by_business(
        &self,
        business_id: &str,
        filter: &CallFilter,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Call>> {
        let calls = self.calls.read().await;
        let mut owned: Vec<Call> = calls
            .values()
            .filter(|c| c.business_id == business_id && filter.matches(c))
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn get_transcripts(&self, call_id: Uuid) -> StoreResult<Vec<TranscriptMessage>> {
        let mut messages = self
            .transcripts
            .read()
            .await
            .get(&call_id)
            .cloned()
            .unwrap_or_default();
        messages.sort_by_key(|m| (m.timestamp, m.seq));
        Ok(messages)
    }

    async fn create_transcripts_batch(&self, messages: &[TranscriptMessage]) -> StoreResult<u64> {
        let mut transcripts = self.transcripts.write().await;
        let mut inserted = 0;
        for message in messages {
            let stored = transcripts.entry(message.call_id).or_default();
            if !stored.iter().any(|m| m.seq == message.seq) {
                stored.push(message.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}

fn ensure_vendor_session_free(calls: &HashMap<Uuid, Call>, call: &Call) -> StoreResult<()> {
    let Some(vendor_session_id) = call.vendor_session_id.as_deref() else {
        return Ok(());
    };
    let taken = calls.values().any(|other| {
        other.id != call.id && other.vendor_session_id.as_deref() == Some(vendor_session_id)
    });
    if taken {
        return Err(StoreError::Conflict(format!("vendor session {vendor_session_id}")));
    }
    Ok(())
}
