use rust_decimal::Decimal;
use thiserror::Error;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failures surfaced by the schema manager and the store backends.
///
/// A read miss is not an error: lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An existing table does not match the declared model. Needs a manual migration.
    #[error("schema conflict on {table}.{column}: declared {declared}, found {found}")]
    SchemaConflict {
        table: String,
        column: String,
        declared: String,
        found: String,
    },

    #[error("duplicate key {key} in append-only table {table}")]
    DuplicateKey { table: &'static str, key: String },

    #[error("{table} row {key} references unknown {referenced}")]
    ForeignKeyViolation {
        table: &'static str,
        key: String,
        referenced: String,
    },

    #[error("{field} = {value} is outside {bounds}")]
    OutOfRange {
        field: &'static str,
        value: Decimal,
        bounds: &'static str,
    },

    #[error("{field} = {value} does not fit NUMERIC({precision}, {scale})")]
    PrecisionOverflow {
        field: &'static str,
        value: Decimal,
        precision: u32,
        scale: u32,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StoreError::DuplicateKey { .. })
    }

    pub fn is_foreign_key_violation(&self) -> bool {
        matches!(self, StoreError::ForeignKeyViolation { .. })
    }

    pub fn is_schema_conflict(&self) -> bool {
        matches!(self, StoreError::SchemaConflict { .. })
    }
}
