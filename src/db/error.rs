use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database connection error: {0}")]
    Connection(String),
    #[error("database query error: {0}")]
    Query(String),
    #[error("database migration error: {0}")]
    Migration(String),
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("invalid stored data: {0}")]
    InvalidData(String),
    #[error("database task failed: {0}")]
    Task(String),
    #[error("{operation} gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        last: Box<DatabaseError>,
    },
}

impl DatabaseError {
    /// Whether another attempt at the same operation could succeed.
    ///
    /// Lock contention and I/O hiccups surface as connection or query errors.
    /// Constraint violations and rows that fail to decode will fail the same
    /// way every time.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DatabaseError::Connection(_) | DatabaseError::Query(_) | DatabaseError::Task(_)
        )
    }
}
