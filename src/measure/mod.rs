//! From voltages to raw key material.
//!
//! - **classifier**: seeded k-means over the two photodiode channels.
//! - **decoder**: denoise, collapse repeated samples, strip framing markers.
//! - **assembler**: apply the operator's polarization map to get key and basis bits.

pub mod assembler;
pub mod classifier;
pub mod decoder;

pub use assembler::{RawKey, assemble};
pub use classifier::{ClassAssignment, Classification, Cluster, SymbolClassifier, canonicalize};
pub use decoder::{SymbolRun, TemporalDecoder};
