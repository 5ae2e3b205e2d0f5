//! Process-backed [`CommandRunner`](waka_core::CommandRunner) implementations.

mod error;
pub use error::{ExecError, ExecResult};

mod util;

pub mod utils;
pub use utils::limits::RlimitConfig;

pub mod proc;
pub use proc::ShellConfig;

#[cfg(feature = "shell")]
pub use proc::shell::ShellRunner;

pub mod prelude {
    pub use crate::error::{ExecError, ExecResult};
    pub use crate::proc::ShellConfig;
    #[cfg(feature = "shell")]
    pub use crate::proc::shell::ShellRunner;
    pub use crate::utils::limits::RlimitConfig;
}
