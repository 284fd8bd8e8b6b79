pub mod models;
pub mod pii;

pub use models::events::{ShipmentAssembledEvent, ShipmentChange};
pub use pii::Masked;
