pub mod memory;
pub mod metrics;
pub mod models;
pub mod postal;
pub mod repository;
pub mod routing;
pub mod sequence;

pub use metrics::{MetricsRecalculator, PackageMeasure, PackageMetrics, ShipmentAggregates};
pub use models::{
    Address, Package, PackageStatus, PackagingType, Partner, PostalCodeRange, RangeKind,
    ServiceWindow, Shipment, StatusCode,
};
pub use postal::{CountryCode, PostalKey};
pub use routing::{PartnerOverrides, PartnerRef, RangeIndex, RangeMatch, RoutingResolver};
pub use sequence::{SequenceAllocator, SEQUENCE_SEED, SHIPMENT_SEQUENCE};

/// Error taxonomy shared by every layer of the parcel core.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation failed: {0}")]
    ValidationError(String),
    #[error("Conflict: {0}")]
    ConflictError(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl CoreError {
    /// Only a failed counter transaction (or a lost race on a unique number)
    /// may be retried by repeating the whole operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::ConflictError(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
