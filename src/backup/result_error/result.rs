use crate::backup::result_error::error::Error;
use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use std::fmt::Debug;

pub type Result<T> = std::result::Result<T, Error>;

impl<S: Into<String>, O: Debug + Send + 'static, R> WithDebugObjectAndFnName<S, O> for Result<R> {
    fn with_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self {
        self.map_err(|e| e.with_debug_object_and_fn_name(obj, fn_name))
    }
}

impl<R, S: Into<String>> WithMsg<S> for Result<R> {
    fn with_msg(self, msg: S) -> Self {
        self.map_err(|e| e.with_msg(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_with_msg_wraps_only_errors() {
        let ok: Result<u8> = Ok(1);
        assert_eq!(ok.with_msg("unused").unwrap(), 1);

        let err: Result<u8> = Err(Error::NotFound("x".into()));
        let wrapped = err.with_msg("Resolving target failed").unwrap_err();
        assert!(wrapped.to_string().starts_with("Resolving target failed:"));
    }
}
