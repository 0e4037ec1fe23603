// Re-export dependencies potentially needed by consumers (like the gateway server)
pub use lxc_common as common;

pub mod executor;
pub mod script;
pub mod test_utils;

pub use executor::{
    CommandExecutor, Invocation, ProcessExecutor, DEFAULT_COMMAND_TIMEOUT,
    DEFAULT_TERMINATION_GRACE, ELEVATION_PREFIX,
};
pub use script::{Script, ScriptRunner, CREATE_SCRIPT_TIMEOUT, DEFAULT_SCRIPT_TIMEOUT};
