pub mod changes;
pub mod models;
pub mod orchestrator;
pub mod tracking;
pub mod validation;

pub use changes::{ChangeError, ChangeHandler};
pub use models::{PackageDraft, PackagePatch, ShipmentDraft, ShipmentPatch};
pub use orchestrator::{AssemblySettings, ShipmentAssemblyOrchestrator};
pub use tracking::PackageTracker;
pub use validation::{ShipmentValidator, StructuralValidator};
