//! Session and command-line facade over the layout tuner.

#[cfg(feature = "cli")]
pub mod cli;
pub mod session;

#[cfg(feature = "cli")]
pub use cli::*;
pub use session::*;
