mod build;
mod clean;
mod compile;
mod info;

pub use build::cmd_build;
pub use clean::cmd_clean;
pub use compile::cmd_compile;
pub use info::cmd_info;
