//! Quantum Key Distribution (QKD) over the teaching kit.
//!
//! - **sifting**: 16-bit block reconciliation against the peer's basis mask.
//! - **device**: one measurement round driven through the kit firmware.
//! - **session**: the handshake/round/done state machine.

pub mod device;
pub mod session;
pub mod sifting;
