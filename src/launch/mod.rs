//! Process Launch: the server command fixed at build time, its entry point,
//! and supervision of the one container started from the image

pub mod command;
pub mod entrypoint;
pub mod env_file;
pub mod port;
pub mod supervisor;

pub use command::{LaunchCommand, DEFAULT_SERVER};
pub use entrypoint::EntryPoint;
pub use supervisor::{shutdown_signal, LaunchOptions, Launcher, RunningServer, MANAGED_LABEL};
