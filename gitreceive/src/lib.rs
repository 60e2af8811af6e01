pub mod cli;
pub mod git;
pub mod health;
pub mod kubectl;
pub mod receive;
pub mod secret;
pub mod watch;
pub mod workload;

pub(crate) mod process;
pub(crate) mod version;

pub(crate) type Result<T, E = Box<dyn std::error::Error + Send + Sync + 'static>> =
    std::result::Result<T, E>;
