//! Key distribution protocols built on the measurement pipeline.
//!
//! This module contains the live BB84-style key exchange between the kit's
//! sender and receiver, and the offline intercept workflow used to attack it.

pub mod intercept;
pub mod qkd;
pub use qkd::{device, session, sifting};
