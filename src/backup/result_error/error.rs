use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::mpsc::SendError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    ThreadPoolBuildError(#[from] rayon::ThreadPoolBuildError),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    GlobSet(#[from] globset::Error),
    #[error(transparent)]
    StripPrefix(#[from] std::path::StripPrefixError),
    #[error("{0:?} does not exist")]
    NotFound(PathBuf),
    #[error("{0:?} is not readable")]
    PermissionDenied(PathBuf),
    #[error("{path:?} {reason}")]
    InvalidPath { path: PathBuf, reason: String },
    #[error("{link:?} points to missing target {target:?}")]
    BrokenLink { link: PathBuf, target: PathBuf },
    #[error("cannot enumerate {path:?}: {source}")]
    TraversalError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0:?} already exists")]
    DestinationExists(PathBuf),
    #[error("renaming {from:?} to {to:?} failed: {source}")]
    RenameFailure {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("destination {dst:?} overlaps source {src:?}")]
    OverlappingDestination { src: PathBuf, dst: PathBuf },
    #[error("run stopped before {0:?} was processed")]
    Cancelled(PathBuf),
    #[error("parent directory {0:?} could not be created")]
    ParentFailed(PathBuf),
    #[error("{0}")]
    ChannelSendError(String),
    #[error("{0}")]
    WorkerPanicked(String),
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{:?} {} failed:\n{}", obj_debug, fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithDebugObjAndFnName {
        error: Box<Error>,
        obj_debug: Box<dyn Debug + Send>,
        fn_name: String,
    },
}

impl<S: Into<String>, O: Debug + Send + 'static> WithDebugObjectAndFnName<S, O> for Error {
    fn with_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self {
        Error::WithDebugObjAndFnName {
            error: Box::new(self),
            obj_debug: Box::new(obj),
            fn_name: fn_name.into(),
        }
    }
}

impl<S: Into<String>> WithMsg<S> for Error {
    fn with_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl<D: Debug> From<SendError<D>> for Error {
    fn from(value: SendError<D>) -> Self {
        Self::ChannelSendError(format!("Failed to send {:?}", value.0))
    }
}

impl Error {
    /// Error kind as shown to the operator, looking through context wrappers.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Error::Io(_) => "IOError",
            Error::ValidationError(_) => "InvalidConfig",
            Error::ThreadPoolBuildError(_) => "ThreadPoolError",
            Error::SerdeYml(_) | Error::SerdeJson(_) => "InvalidConfig",
            Error::GlobSet(_) => "InvalidPattern",
            Error::StripPrefix(_) => "InvalidPath",
            Error::NotFound(_) => "NotFound",
            Error::PermissionDenied(_) => "PermissionDenied",
            Error::InvalidPath { .. } => "InvalidPath",
            Error::BrokenLink { .. } => "BrokenLink",
            Error::TraversalError { .. } => "TraversalError",
            Error::DestinationExists(_) => "DestinationExists",
            Error::RenameFailure { .. } => "RenameFailure",
            Error::OverlappingDestination { .. } => "OverlappingDestination",
            Error::Cancelled(_) => "Cancelled",
            Error::ParentFailed(_) => "ParentFailed",
            Error::ChannelSendError(_) | Error::WorkerPanicked(_) => "InternalError",
            Error::WithMsg { error, .. } => error.kind_name(),
            Error::WithDebugObjAndFnName { error, .. } => error.kind_name(),
        }
    }

    /// Copy-time failures that are worth one more attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Io(_) | Error::RenameFailure { .. } => true,
            Error::WithMsg { error, .. } => error.is_retryable(),
            Error::WithDebugObjAndFnName { error, .. } => error.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_error_from_io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error = Error::from(io_error);

        match error {
            Error::Io(_) => (),
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_error_with_msg() {
        let error = Error::NotFound("missing.txt".into());
        let error_with_msg = error.with_msg("Custom message");

        match error_with_msg {
            Error::WithMsg { msg, .. } => assert_eq!(msg, "Custom message"),
            _ => panic!("Expected WithMsg error"),
        }
    }

    #[test]
    fn test_error_with_debug_object_and_fn_name() {
        let error = Error::DestinationExists("a.bkup".into());
        let error_with_debug = error.with_debug_object_and_fn_name("a.txt", "copy_entry");

        match error_with_debug {
            Error::WithDebugObjAndFnName { fn_name, .. } => assert_eq!(fn_name, "copy_entry"),
            _ => panic!("Expected WithDebugObjAndFnName error"),
        }
    }

    #[test]
    fn test_error_from_send_error() {
        let (tx, rx) = mpsc::channel();
        drop(rx);

        match tx.send("test") {
            Err(send_error) => match Error::from(send_error) {
                Error::ChannelSendError(_) => (),
                _ => panic!("Expected ChannelSendError"),
            },
            Ok(_) => panic!("Expected send error"),
        }
    }

    #[test]
    fn test_kind_name_looks_through_wrappers() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let error = Error::from(io)
            .with_msg("Writing temp file failed")
            .with_debug_object_and_fn_name(42, "copy_entry");
        assert_eq!(error.kind_name(), "IOError");
        assert!(error.is_retryable());

        let error = Error::DestinationExists("x".into()).with_msg("conflict");
        assert_eq!(error.kind_name(), "DestinationExists");
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_error_with_msg_display() {
        let error = Error::NotFound("test.txt".into()).with_msg("Operation failed");
        let error_str = error.to_string();

        assert!(error_str.contains("Operation failed"));
        assert!(error_str.contains("\"test.txt\" does not exist"));
    }

    #[test]
    fn test_error_with_debug_display() {
        let error = Error::PermissionDenied("secret".into()).with_debug_object_and_fn_name(42, "resolve");
        let error_str = error.to_string();

        assert!(error_str.contains("resolve"));
        assert!(error_str.contains("failed"));
        assert!(error_str.contains("is not readable"));
    }
}
