//! Helpers shared by the actions.

pub mod rotation;
pub mod user_host;

pub use rotation::{rotate_file, RotationError};
pub use user_host::{split_user_at_host, UserAtHost, UserHostError};
