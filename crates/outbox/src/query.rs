use crate::{AggregateId, EnvelopeStatus, EventEnvelope};

/// Filter for listing envelopes on the operator surface.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeQuery {
    pub status: Option<EnvelopeStatus>,
    pub event_type: Option<String>,
    pub aggregate_id: Option<AggregateId>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl EnvelopeQuery {
    /// Creates an unfiltered query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filters by delivery status.
    pub fn status(mut self, status: EnvelopeStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Filters by event type.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Filters by source aggregate.
    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_id = Some(id);
        self
    }

    /// Limits the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips a number of results.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if the envelope passes every filter set on this query.
    pub fn matches(&self, envelope: &EventEnvelope) -> bool {
        self.status.is_none_or(|s| envelope.status == s)
            && self
                .event_type
                .as_deref()
                .is_none_or(|t| envelope.event_type == t)
            && self.aggregate_id.is_none_or(|id| envelope.aggregate_id == id)
    }
}
