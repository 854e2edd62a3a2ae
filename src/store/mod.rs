//! Persistent graph store: schema, migrations, and the typed handle.

pub mod database;
pub mod schema;

pub use database::{
    BreakerRow, DiagnosticRow, DiagnosticsSummary, QuarantineRow, SigningKeyRow, Store,
    SyncQueueEntry, ToolMetricRow,
};
pub use schema::SCHEMA_VERSION;
