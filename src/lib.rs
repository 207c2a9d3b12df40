pub mod config;
mod core;
pub mod measure;
pub mod protocols;
mod sampler;

pub use crate::core::{
    CancelToken, ControlChannel, END_OF_SESSION, MemoryChannel, Packet, PolarizationMap,
    QuantumLink, Role, Symbol, TraceRecorder, VoltageTrace, Waiter, errors, utils,
};
pub use crate::sampler::{FRAME_SYMBOLS, TraceSampler};
