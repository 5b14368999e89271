use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{AggregateId, OutboxError};

/// Unique, time-ordered identifier for an envelope.
///
/// Backed by a UUIDv7, so comparing two ids compares their creation order.
/// The relay relies on this to publish one aggregate's envelopes in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvelopeId(Uuid);

impl EnvelopeId {
    /// Creates a new id for the current instant.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates an envelope ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EnvelopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EnvelopeId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for EnvelopeId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Delivery state of an envelope.
///
/// ```text
/// Pending ──► Publishing ──┬──► Published
///    ▲                     ├──► Failed
///    └─────────────────────┘  (retry, stale recovery)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    #[default]
    Pending,
    Publishing,
    Published,
    Failed,
}

impl EnvelopeStatus {
    /// Returns true once the relay will never touch the envelope again
    /// without operator intervention.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EnvelopeStatus::Published | EnvelopeStatus::Failed)
    }

    /// Returns the storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeStatus::Pending => "pending",
            EnvelopeStatus::Publishing => "publishing",
            EnvelopeStatus::Published => "published",
            EnvelopeStatus::Failed => "failed",
        }
    }

    /// Parses the storage representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(EnvelopeStatus::Pending),
            "publishing" => Some(EnvelopeStatus::Publishing),
            "published" => Some(EnvelopeStatus::Published),
            "failed" => Some(EnvelopeStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for EnvelopeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A durable integration event together with its delivery bookkeeping.
///
/// Everything except `status`, `retry_count`, `available_at`, `claimed_at`
/// and `last_error` is fixed when the envelope is appended. Only the relay
/// changes those fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: EnvelopeId,

    /// Payload discriminator (e.g. "OrderPaid").
    pub event_type: String,

    /// The aggregate that raised the event. Ordering is kept per aggregate.
    pub aggregate_id: AggregateId,

    pub aggregate_type: String,

    pub payload: serde_json::Value,

    pub metadata: HashMap<String, serde_json::Value>,

    pub created_at: DateTime<Utc>,

    pub status: EnvelopeStatus,

    /// Number of failed publish attempts so far.
    pub retry_count: u32,

    /// The relay will not claim the envelope before this instant.
    pub available_at: DateTime<Utc>,

    pub claimed_at: Option<DateTime<Utc>>,

    /// Past this instant the envelope is archived instead of delivered.
    pub expires_at: Option<DateTime<Utc>>,

    pub last_error: Option<String>,
}

impl EventEnvelope {
    /// Deserializes the payload into a concrete event type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// Returns true if the envelope has expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// An envelope that has not been appended yet.
///
/// Ids, timestamps and delivery state are assigned by [`NewEnvelope::into_envelope`]
/// at append time.
#[derive(Debug, Clone)]
pub struct NewEnvelope {
    pub event_type: String,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    pub payload: serde_json::Value,
    pub metadata: HashMap<String, serde_json::Value>,
    pub ttl: Option<Duration>,
}

impl NewEnvelope {
    /// Creates a new envelope builder.
    pub fn builder() -> NewEnvelopeBuilder {
        NewEnvelopeBuilder::default()
    }

    /// Materializes the envelope as a fresh `Pending` row created at `now`.
    pub fn into_envelope(self, now: DateTime<Utc>) -> EventEnvelope {
        EventEnvelope {
            id: EnvelopeId::new(),
            event_type: self.event_type,
            aggregate_id: self.aggregate_id,
            aggregate_type: self.aggregate_type,
            payload: self.payload,
            metadata: self.metadata,
            created_at: now,
            status: EnvelopeStatus::Pending,
            retry_count: 0,
            available_at: now,
            claimed_at: None,
            expires_at: self.ttl.map(|ttl| now + ttl),
            last_error: None,
        }
    }
}

/// Builder for [`NewEnvelope`].
#[derive(Debug, Default)]
pub struct NewEnvelopeBuilder {
    event_type: Option<String>,
    aggregate_id: Option<AggregateId>,
    aggregate_type: Option<String>,
    payload: Option<serde_json::Value>,
    metadata: HashMap<String, serde_json::Value>,
    ttl: Option<Duration>,
}

impl NewEnvelopeBuilder {
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_id = Some(id);
        self
    }

    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Adds a metadata entry.
    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Sets how long the envelope stays deliverable.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Builds the envelope, naming the first missing required field.
    pub fn try_build(self) -> Result<NewEnvelope, OutboxError> {
        let missing = |field: &'static str| OutboxError::InvalidEnvelope(format!("{field} is required"));
        Ok(NewEnvelope {
            event_type: self.event_type.ok_or_else(|| missing("event_type"))?,
            aggregate_id: self.aggregate_id.ok_or_else(|| missing("aggregate_id"))?,
            aggregate_type: self.aggregate_type.ok_or_else(|| missing("aggregate_type"))?,
            payload: self.payload.ok_or_else(|| missing("payload"))?,
            metadata: self.metadata,
            ttl: self.ttl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NewEnvelope {
        NewEnvelope::builder()
            .event_type("OrderPaid")
            .aggregate_id(AggregateId::new())
            .aggregate_type("Order")
            .payload_raw(serde_json::json!({"amount_cents": 1200}))
            .metadata("causation_id", serde_json::json!("abc"))
            .try_build()
            .unwrap()
    }

    #[test]
    fn envelope_ids_sort_by_creation() {
        let ids: Vec<EnvelopeId> = (0..64).map(|_| EnvelopeId::new()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn status_storage_names_round_trip() {
        for status in [
            EnvelopeStatus::Pending,
            EnvelopeStatus::Publishing,
            EnvelopeStatus::Published,
            EnvelopeStatus::Failed,
        ] {
            assert_eq!(EnvelopeStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(EnvelopeStatus::parse("archived"), None);
    }

    #[test]
    fn only_published_and_failed_are_terminal() {
        assert!(!EnvelopeStatus::Pending.is_terminal());
        assert!(!EnvelopeStatus::Publishing.is_terminal());
        assert!(EnvelopeStatus::Published.is_terminal());
        assert!(EnvelopeStatus::Failed.is_terminal());
    }

    #[test]
    fn new_envelope_starts_pending_and_available() {
        let now = Utc::now();
        let envelope = sample().into_envelope(now);

        assert_eq!(envelope.status, EnvelopeStatus::Pending);
        assert_eq!(envelope.retry_count, 0);
        assert_eq!(envelope.available_at, now);
        assert!(envelope.claimed_at.is_none());
        assert!(envelope.expires_at.is_none());
        assert_eq!(envelope.metadata["causation_id"], serde_json::json!("abc"));
    }

    #[test]
    fn ttl_sets_expiry() {
        let now = Utc::now();
        let mut new = sample();
        new.ttl = Some(Duration::minutes(5));
        let envelope = new.into_envelope(now);

        assert_eq!(envelope.expires_at, Some(now + Duration::minutes(5)));
        assert!(!envelope.is_expired(now));
        assert!(envelope.is_expired(now + Duration::minutes(5)));
    }

    #[test]
    fn try_build_names_missing_field() {
        let err = NewEnvelope::builder()
            .event_type("OrderPaid")
            .try_build()
            .unwrap_err();
        assert!(err.to_string().contains("aggregate_id"));
    }

    #[test]
    fn decode_reads_payload() {
        #[derive(Deserialize)]
        struct Paid {
            amount_cents: i64,
        }
        let envelope = sample().into_envelope(Utc::now());
        let paid: Paid = envelope.decode().unwrap();
        assert_eq!(paid.amount_cents, 1200);
    }
}
