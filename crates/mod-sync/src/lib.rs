pub mod address;
pub mod clock;
pub mod config;
pub mod driver;
pub mod engine;
pub mod export;
pub mod progress;
pub mod scheduler;
pub mod state;
pub mod teardown;

pub use address::{domain_of, normalize_domain, parse_from_header, ParsedAddress};
pub use clock::SystemClock;
pub use config::SyncConfig;
pub use driver::{StartOutcome, TickOutcome};
pub use engine::{Providers, Stores, SyncEngine};
pub use export::{plan_export, ExportPlan, ExportSummary};
pub use progress::SyncProgress;
pub use scheduler::{due_connections, is_due, SweepReport};
pub use teardown::DeletionOutcome;
