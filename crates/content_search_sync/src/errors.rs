use thiserror::Error;

/// The crate's own typed error taxonomy, per §7 of the design: only the two
/// connection classes are meant to be caught and retried by [`crate::backoff`];
/// everything else bubbles all the way up to `main` and ends the process.
#[derive(Debug, Error)]
pub enum EtlError {
    /// A transient failure talking to the source database (connect, query,
    /// or a statement timeout). Matched by the outer backoff.
    #[error("source connection error: {0}")]
    SourceConnection(#[source] anyhow::Error),

    /// A transient failure talking to the sink's bulk API. Matched by the
    /// inner backoff wrapped around [`crate::sink::SinkWriter::flush`].
    #[error("sink connection error: {0}")]
    SinkConnection(#[source] anyhow::Error),

    /// A raw row failed to validate into a sink document.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The checkpoint store could not be read or rewritten.
    #[error("checkpoint store error: {0}")]
    CheckpointIo(#[source] anyhow::Error),

    /// A [`crate::backoff::Backoff`] configured with `max_retries` ran out of
    /// attempts.
    #[error("retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: Box<EtlError>,
    },
}

impl EtlError {
    /// True for the two connection-error kinds that a [`crate::backoff::Backoff`]
    /// is allowed to retry; false for anything that should bubble immediately.
    pub fn is_retriable_connection_error(&self) -> bool {
        matches!(
            self,
            EtlError::SourceConnection(_) | EtlError::SinkConnection(_)
        )
    }
}

/// Raised by [`crate::transform`] when a raw row is missing a required field
/// or carries a value outside its closed set (e.g. an unrecognized role).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{entity} row {id} is missing required field `{field}`")]
    MissingField {
        entity: &'static str,
        id: String,
        field: &'static str,
    },

    #[error(
        "{entity} row {id} has person role `{role}`, which is not one of actor/writer/director"
    )]
    UnknownRole {
        entity: &'static str,
        id: String,
        role: String,
    },

    #[error("{entity} row {id} has an unparsable timestamp in `{field}`: {reason}")]
    BadTimestamp {
        entity: &'static str,
        id: String,
        field: &'static str,
        reason: String,
    },
}
