use thiserror::Error;

/// Crate-wide result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every way a storage operation can fail.
///
/// Platform callbacks are mapped onto these variants explicitly: a failed
/// open becomes [`Error::Connection`], a `blocked` event on delete becomes
/// [`Error::Blocked`], and DOM exceptions are sorted by their name. Anything
/// the adapter has no dedicated variant for is passed through as
/// [`Error::Platform`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The database could not be opened or the connection is unusable.
    #[error("database error: {0}")]
    Connection(String),

    /// A table with that name already exists in the database.
    #[error("duplicate table name \"{table}\" in database \"{database}\"")]
    DuplicateName { database: String, table: String },

    /// Deleting the database was blocked by another open connection.
    #[error("couldn't delete database \"{0}\" due to the operation being blocked")]
    Blocked(String),

    /// The table or record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The platform rejected a write, e.g. a unique index collision.
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// Any other platform failure, as reported by the platform.
    #[error("{0}")]
    Platform(String),

    /// A value could not be converted to or from its stored form.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
