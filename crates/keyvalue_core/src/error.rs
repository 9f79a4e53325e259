//! Error taxonomy for extraction, reconciliation and persistence.

use thiserror::Error;

use crate::triple::OwnerId;

pub type Result<T> = std::result::Result<T, KeyValueError>;

#[derive(Error, Debug)]
pub enum KeyValueError {
    /// The backing table is still missing after it was provisioned and the
    /// operation retried once.
    #[error("keyvalue table is missing after provisioning: {0}")]
    SchemaMissing(#[source] rusqlite::Error),

    /// A replace for one owner failed and was rolled back.
    #[error("failed to replace key values for owner {owner}")]
    ReplaceFailed {
        owner: OwnerId,
        #[source]
        source: rusqlite::Error,
    },

    /// Rows for more than one owner were handed to a single reconcile call.
    #[error("reconcile for owner {expected} received a row owned by {found}")]
    MixedOwnerInput { expected: OwnerId, found: OwnerId },

    #[error("invalid csv options: {0}")]
    InvalidCsvOptions(String),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl KeyValueError {
    /// True when sqlite reports that a table referenced by the statement does
    /// not exist.
    pub fn is_schema_missing(&self) -> bool {
        match self {
            Self::SchemaMissing(_) => true,
            Self::Storage(source) | Self::ReplaceFailed { source, .. } => {
                is_missing_table(source)
            }
            _ => false,
        }
    }
}

pub(crate) fn is_missing_table(error: &rusqlite::Error) -> bool {
    // prepare() reports this either as SqliteFailure or SqlInputError
    // depending on the sqlite build; both carry the message.
    error.to_string().contains("no such table")
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::*;

    #[test]
    fn missing_table_errors_are_detected() {
        let connection = Connection::open_in_memory().expect("open");
        let err = connection
            .execute("DELETE FROM keyvalue WHERE article_id = ?1", [1i64])
            .expect_err("table does not exist");
        assert!(KeyValueError::Storage(err).is_schema_missing());
    }

    #[test]
    fn other_errors_are_not_schema_missing() {
        let err = KeyValueError::MixedOwnerInput {
            expected: OwnerId(1),
            found: OwnerId(2),
        };
        assert!(!err.is_schema_missing());
        assert_eq!(
            err.to_string(),
            "reconcile for owner 1 received a row owned by 2"
        );
    }
}
