pub mod backup_config;
pub mod conflict;
pub mod copy;
pub mod plan;
pub mod report;
pub mod resolve;
pub mod result_error;
pub mod stop;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
