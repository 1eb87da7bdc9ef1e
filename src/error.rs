use thiserror::Error;

use crate::{schema::RecordKind, warehouse::WarehouseError};

/// Failures of a single engine step. Each variant names the table it
/// concerns so the orchestrator can keep going with sibling tables.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),
    #[error("Could not read schema for table {table}: {source}")]
    Introspection {
        table: String,
        source: WarehouseError,
    },
    #[error("No matching columns between uploaded {kind} file and table {table}")]
    NoMatchingColumns { kind: RecordKind, table: String },
    #[error("Failed to stage rows into {table}: {source}")]
    Staging {
        table: String,
        source: WarehouseError,
    },
    #[error("MERGE into {table} failed: {source}")]
    Merge {
        table: String,
        source: WarehouseError,
    },
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
}

pub type EngineResult<T> = Result<T, EngineError>;
