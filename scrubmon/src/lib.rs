#![deny(missing_docs)]
#![deny(unused_doc_comments)]
#![deny(dead_code)]

//! This crate contains the main implementations for the scrubmon library. This includes the scrub
//! time window calculator, the stamp-change poller, the schedule sequence verifier and the
//! auto-repair policy checker, next to the cluster state source used to feed them. There are also
//! config structs available.

use actix::MailboxError;
use config::ConfigError;
use source::SourceError;
use std::fmt;

/// Implementations of the monitoring components as actors.
pub mod actors;
/// A cluster state source backed by the ceph and rados command line tools.
pub mod ceph;
/// Contains global configuration details.
pub mod config;
/// Polling loops which wait for cluster-side scrub state transitions.
pub mod poller;
/// The auto-repair policy and its expected-outcome check.
pub mod repair;
/// End to end verification scenarios combining the other components.
pub mod scenario;
/// The scrub schedule event log and the sequence pattern verifier.
pub mod sequence;
/// The interface to a live cluster, exposing scrub state snapshots.
pub mod source;
/// Placement group identifiers, scrub stamps and snapshot diffing.
pub mod stamps;
/// Scrub time window computation from a reference clock.
pub mod window;

/// Global result type for scrubmon operations
pub type ScrubResult<T> = Result<T, ScrubError>;

/// An error originating in scrubmon
#[derive(Debug)]
pub struct ScrubError {
    kind: ScrubErrorKind,
    internal: InternalError,
}

impl fmt::Display for ScrubError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "error during {}: {}", self.kind, self.internal)
    }
}

impl std::error::Error for ScrubError {
    fn cause(&self) -> Option<&dyn std::error::Error> {
        match self.internal {
            InternalError::Source(ref e) => Some(e),
            InternalError::Other(ref e) => Some(e.as_ref()),
        }
    }
}

impl ScrubError {
    /// Create a new ScrubError from an IO error with an additional message.
    pub fn new_io(msg: String, e: std::io::Error) -> Self {
        ScrubError {
            kind: ScrubErrorKind::LocalIo(msg),
            internal: InternalError::Other(Box::new(e)),
        }
    }

    /// Create a new ScrubError from any kind, with the underlying error included
    pub fn new(kind: ScrubErrorKind, internal: Box<dyn std::error::Error + Send>) -> Self {
        ScrubError {
            kind,
            internal: InternalError::Other(internal),
        }
    }

    /// Return a reference to the embedded [`crate::source::SourceError`], if this error is caused
    /// by a SourceError, or nothing otherwise.
    pub fn source_error(&self) -> Option<&SourceError> {
        match self.internal {
            InternalError::Source(ref e) => Some(e),
            _ => None,
        }
    }
}

/// Wrapper error for the ScrubError
#[derive(Debug)]
enum InternalError {
    Source(SourceError),
    Other(Box<dyn std::error::Error + Send>),
}

impl fmt::Display for InternalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                InternalError::Source(ref e) => e as &dyn std::error::Error,
                InternalError::Other(e) => e.as_ref(),
            }
        )
    }
}

/// Information about where in the chain of operation the error occurred.
#[derive(Debug)]
pub enum ScrubErrorKind {
    /// An error while querying the cluster state source, or when applying or removing cluster
    /// configuration through it.
    Source,
    /// An error in the configuration,
    Config,
    /// An error wile reading or writing to the local storage.
    LocalIo(String),
    /// An error while waiting for an asynchronous task to complete.
    Async,
}

impl fmt::Display for ScrubErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ScrubErrorKind::Source => "querying the cluster state source".to_string(),
                ScrubErrorKind::Config => "configuration".to_string(),
                ScrubErrorKind::LocalIo(msg) => format!("accessing local storage for {}", msg),
                ScrubErrorKind::Async => "waiting for async task completion".to_string(),
            }
        )
    }
}

impl From<SourceError> for ScrubError {
    fn from(e: SourceError) -> Self {
        ScrubError {
            kind: ScrubErrorKind::Source,
            internal: InternalError::Source(e),
        }
    }
}

impl From<ConfigError> for ScrubError {
    fn from(e: ConfigError) -> Self {
        ScrubError {
            kind: ScrubErrorKind::Config,
            internal: InternalError::Other(Box::new(e)),
        }
    }
}

impl From<toml::de::Error> for ScrubError {
    fn from(e: toml::de::Error) -> Self {
        ScrubError {
            kind: ScrubErrorKind::Config,
            internal: InternalError::Other(Box::new(e)),
        }
    }
}

impl From<MailboxError> for ScrubError {
    fn from(e: MailboxError) -> Self {
        ScrubError {
            kind: ScrubErrorKind::Async,
            internal: InternalError::Other(Box::new(e)),
        }
    }
}
