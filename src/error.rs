use thiserror::Error;

use crate::identity::EntityType;

/// Failure taxonomy shared by ingest and the metric aggregator.
///
/// None of these abort a league run: callers log them, count them, and move
/// on to the next entity or event.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("unresolved {entity_type} {provider}:{local_id} in {league}")]
    UnresolvedEntity {
        provider: String,
        league: String,
        entity_type: EntityType,
        local_id: String,
    },

    #[error("metric {metric} undefined for entity {entity_id}: zero denominator or no usable samples")]
    UndefinedMetric { metric: String, entity_id: i64 },

    #[error("no {provider} payload for event {event}")]
    TransientFetchFailure { provider: String, event: String },

    #[error("mapping {provider}:{local_id} already bound to {existing}")]
    PersistenceConflict {
        provider: String,
        local_id: String,
        existing: i64,
    },

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

impl SignalError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        SignalError::InvalidRecord(msg.into())
    }
}
