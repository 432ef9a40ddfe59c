//! Error taxonomy of a backup run and the context wrappers used to annotate
//! failures on their way up to the report or the process exit code.

use std::fmt::Debug;
pub mod error;
pub mod result;

/// Records the object being worked on and the function that failed, e.g. the
/// engine settings when the worker pool cannot be built.
pub trait WithDebugObjectAndFnName<S: Into<String>, O: Debug + 'static> {
    fn with_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self;
}

/// Prefixes a human readable message, e.g. which entry was being backed up.
pub trait WithMsg<S: Into<String>> {
    fn with_msg(self, msg: S) -> Self;
}
