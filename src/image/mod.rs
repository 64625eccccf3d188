//! Base Selection: image references and base image resolution

pub mod base;
pub mod reference;

pub use base::{BaseResolver, EnvironmentHandle};
pub use reference::{ImageReference, ReferenceError};
