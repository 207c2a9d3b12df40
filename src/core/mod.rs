mod channels;
pub mod errors;
mod symbols;
mod trace;
pub mod utils;

pub use channels::{
    CancelToken, ControlChannel, END_OF_SESSION, MemoryChannel, Packet, QuantumLink, Role, Waiter,
};
pub use symbols::{PolarizationMap, Symbol};
pub use trace::{TraceRecorder, VoltageTrace};
