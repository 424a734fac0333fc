//! Shared utilities.

pub mod hex;

pub use hex::{from_hex_string, to_hex_string};
