//! olmdev shared library: constants and the application-level error type
//! shared between the crypto crate and the command-line tools.

pub mod constants;
pub mod error;
