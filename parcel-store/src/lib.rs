pub mod app_config;
pub mod database;
#[cfg(feature = "kafka")]
pub mod events;
pub mod partner_repo;
pub mod range_repo;
pub mod sequence_repo;
pub mod shipment_repo;
pub mod status_repo;
pub mod telemetry;

pub use app_config::Config;
pub use database::DbClient;
#[cfg(feature = "kafka")]
pub use events::{EventProducer, KafkaEventSink};
pub use partner_repo::PgPartnerRepository;
pub use range_repo::PgRangeRepository;
pub use sequence_repo::PgSequenceAllocator;
pub use shipment_repo::PgShipmentRepository;
pub use status_repo::PgStatusRepository;
