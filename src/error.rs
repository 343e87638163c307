//! Standard error type for ocl-flow.

use std;
use crate::core::error::Error as OclCoreError;
use crate::core::Status;

pub type Result<T> = std::result::Result<T, Error>;

/// An enum containing the error classes surfaced by the runtime.
///
/// Implements the usual error traits.
#[derive(Debug)]
pub enum Error {
    /// A structural problem with a task graph: dangling edge endpoints,
    /// duplicate node names, a leaf that is not a sink, a cycle or malformed
    /// graph JSON.
    Graph(String),
    /// A task could not be set up (missing kernel file, no GPU assigned,
    /// unsupported feature).
    Setup(String),
    /// A task could not compute an output size for its current inputs.
    Requisition(String),
    /// A task reported a fatal error from `process` or `generate`, or a
    /// backing transfer failed mid-run.
    Execution(String),
    /// A pipeline expression could not be parsed.
    Parse(String),
    OclCore(OclCoreError),
    Io(std::io::Error),
    Json(serde_json::Error),
}

// Manual Display/Error impls stand in for `#[derive(thiserror::Error)]`: this
// crate re-exports `ocl_core` as `core` (see lib.rs), which shadows the
// sysroot `core` crate in the extern prelude and breaks thiserror's
// generated `::core::...` paths. The messages below match the `#[error(...)]`
// strings the derive would have produced.
impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            Error::Graph(ref s) => write!(f, "graph error: {}", s),
            Error::Setup(ref s) => write!(f, "setup error: {}", s),
            Error::Requisition(ref s) => write!(f, "requisition error: {}", s),
            Error::Execution(ref s) => write!(f, "execution error: {}", s),
            Error::Parse(ref s) => write!(f, "parse error: {}", s),
            Error::OclCore(ref err) => write!(f, "{}", err),
            Error::Io(ref err) => write!(f, "{}", err),
            Error::Json(ref err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            Error::OclCore(ref err) => Some(err),
            Error::Io(ref err) => Some(err),
            Error::Json(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Error {
        Error::Json(err)
    }
}

impl Error {
    /// Returns the error status code for `OclCore` variants.
    pub fn api_status(&self) -> Option<Status> {
        match *self {
            Error::OclCore(ref err) => err.api_status(),
            _ => None,
        }
    }
}

impl From<OclCoreError> for Error {
    fn from(err: OclCoreError) -> Error {
        Error::OclCore(err)
    }
}

impl From<std::ffi::NulError> for Error {
    fn from(err: std::ffi::NulError) -> Error {
        Error::OclCore(err.into())
    }
}

impl From<Error> for String {
    fn from(err: Error) -> String {
        err.to_string()
    }
}

unsafe impl Send for Error {}
unsafe impl Sync for Error {}
