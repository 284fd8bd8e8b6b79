use async_trait::async_trait;

use crate::{CoreError, CoreResult};

/// Counter that both tracking numbers and package numbers are drawn from.
///
/// Shipments and packages share this namespace: callers must not assume the
/// two kinds of numbers occupy disjoint ranges.
pub const SHIPMENT_SEQUENCE: &str = "shipment";

/// `last_value` of a counter row created on first use. The first number
/// handed out is `SEQUENCE_SEED + 1`.
pub const SEQUENCE_SEED: i64 = 49_100_000_000;

/// Matches the `VARCHAR(50)` primary key of `sequence_counters`.
pub const SEQUENCE_NAME_MAX_LEN: usize = 50;

/// Issues strictly increasing, never repeated values per counter name.
///
/// Implementations serialize concurrent callers through the durable store
/// (row lock), never through in-process state, so several service replicas
/// can share one counter. A failed allocation surfaces as
/// [`CoreError::ConflictError`] and is not retried here.
#[async_trait]
pub trait SequenceAllocator: Send + Sync {
    async fn next(&self, name: &str) -> CoreResult<i64>;
}

pub fn validate_sequence_name(name: &str) -> CoreResult<()> {
    if name.trim().is_empty() {
        return Err(CoreError::ValidationError("sequence name is empty".to_string()));
    }
    if name.len() > SEQUENCE_NAME_MAX_LEN {
        return Err(CoreError::ValidationError(format!(
            "sequence name '{}' exceeds {} characters",
            name, SEQUENCE_NAME_MAX_LEN
        )));
    }
    Ok(())
}
