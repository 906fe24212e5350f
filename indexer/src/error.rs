use std::{fmt, process::ExitCode};

use error_stack::{Context, Result, ResultExt};

/// Indexer error taxonomy.
///
/// The orchestrator is the only layer that decides retry-vs-skip-vs-fatal
/// per kind: `Temporary` and `Validation` fail the batch with the cursor
/// untouched, `Consistency` drops the single fact and lets the batch
/// advance, `InvariantViolation` fails the batch loudly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexerError {
    /// Misconfiguration (unknown event name, bad signature). Should not retry.
    Configuration,
    /// Transient I/O failure (RPC, store). Retry with the window unchanged.
    Temporary,
    /// A log does not match its event schema. The batch is retried unchanged.
    Validation,
    /// A fact references state that does not exist; retrying cannot help.
    Consistency,
    /// Unit arithmetic would go negative or overflow.
    InvariantViolation,
    /// Unrecoverable error. Should not retry.
    Fatal,
}

impl Context for IndexerError {}

impl fmt::Display for IndexerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexerError::Configuration => f.write_str("indexer configuration error"),
            IndexerError::Temporary => f.write_str("temporary indexer error"),
            IndexerError::Validation => f.write_str("event payload validation failed"),
            IndexerError::Consistency => f.write_str("derived state is inconsistent"),
            IndexerError::InvariantViolation => f.write_str("unit conservation violated"),
            IndexerError::Fatal => f.write_str("fatal indexer error"),
        }
    }
}

pub trait ReportExt {
    fn to_exit_code(&self) -> ExitCode;
}

impl<T> ReportExt for Result<T, IndexerError> {
    fn to_exit_code(&self) -> ExitCode {
        match self {
            Ok(_) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("{:?}", err);
                // Exit codes based on sysexits.h
                match err.downcast_ref::<IndexerError>() {
                    Some(IndexerError::Configuration) => ExitCode::from(78),
                    Some(IndexerError::Temporary) => ExitCode::from(75),
                    Some(_) => ExitCode::FAILURE,
                    None => ExitCode::FAILURE,
                }
            }
        }
    }
}

pub trait IndexerErrorResultExt {
    type Ok;

    fn temporary(self, reason: &str) -> Result<Self::Ok, IndexerError>;
    fn validation(self, reason: &str) -> Result<Self::Ok, IndexerError>;
    fn configuration(self, reason: &str) -> Result<Self::Ok, IndexerError>;
}

impl<R> IndexerErrorResultExt for R
where
    R: ResultExt,
{
    type Ok = R::Ok;

    fn temporary(self, reason: &str) -> Result<R::Ok, IndexerError> {
        self.change_context(IndexerError::Temporary)
            .attach_printable(reason.to_string())
    }

    fn validation(self, reason: &str) -> Result<R::Ok, IndexerError> {
        self.change_context(IndexerError::Validation)
            .attach_printable(reason.to_string())
    }

    fn configuration(self, reason: &str) -> Result<R::Ok, IndexerError> {
        self.change_context(IndexerError::Configuration)
            .attach_printable(reason.to_string())
    }
}
