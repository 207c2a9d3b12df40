//! Offline eavesdropper workflow.
//!
//! Eve logs both photodiode channels during a key exchange, clusters the
//! samples, guesses which cluster is which polarization, and finally applies
//! the sifting mask she overheard on the classical channel. Only one of the
//! possible polarization guesses yields the real key.

use crate::config::PipelineConfig;
use crate::core::errors::{DecodeError, InterceptError, ReconciliationError};
use crate::core::{PolarizationMap, VoltageTrace};
use crate::measure::{
    Classification, RawKey, SymbolClassifier, SymbolRun, TemporalDecoder, assemble,
};
use crate::protocols::qkd::sifting::{ReconciliationMask, sift};
use std::path::Path;

#[derive(Clone, Debug, Default)]
pub struct Interceptor {
    config: PipelineConfig,
}

impl Interceptor {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Loads a voltage log and analyzes it.
    pub fn analyze_file(&self, path: impl AsRef<Path>) -> Result<Analysis, InterceptError> {
        let trace = VoltageTrace::load(path)?;
        self.analyze(&trace)
    }

    /// Denoises the trace and clusters it.
    pub fn analyze(&self, trace: &VoltageTrace) -> Result<Analysis, InterceptError> {
        let trace = trace.denoise(self.config.noise_threshold, self.config.noise_quantum);
        let classification = SymbolClassifier::from_config(&self.config).classify(&trace)?;
        tracing::info!(
            samples = trace.len(),
            noise = classification.clusters.first().map(|c| c.size).unwrap_or(0),
            "trace classified"
        );

        Ok(Analysis {
            trace,
            classification,
            decoder: TemporalDecoder::from_config(&self.config),
        })
    }
}

/// A classified trace, ready to be decoded under any polarization guess.
#[derive(Clone, Debug)]
pub struct Analysis {
    pub trace: VoltageTrace,
    pub classification: Classification,
    decoder: TemporalDecoder,
}

impl Analysis {
    /// Cluster ids, one per transmitted slot.
    pub fn symbols(&self) -> Result<SymbolRun<'_>, DecodeError> {
        self.decoder
            .decode(&self.trace, &self.classification.assignment)
    }

    /// Raw key under the operator's cluster-to-polarization guess.
    pub fn decode(&self, map: &PolarizationMap) -> Result<RawKey, InterceptError> {
        let raw = assemble(self.symbols()?, map)?;
        tracing::info!(symbols = raw.len(), blocks = raw.len() as f64 / 16.0, "raw key decoded");
        Ok(raw)
    }
}

/// Applies an overheard hex mask to the leading bits of `bits`.
///
/// The logged run may extend past the exchange the mask belongs to; anything
/// beyond the mask is ignored.
pub fn apply_mask(bits: &[bool], mask_hex: &str) -> Result<Vec<bool>, InterceptError> {
    let mask = ReconciliationMask::from_hex(mask_hex)?;
    if bits.len() < mask.len() {
        return Err(ReconciliationError::MaskLengthMismatch {
            key: bits.len(),
            mask: mask.len(),
        }
        .into());
    }
    Ok(sift(&bits[..mask.len()], &mask)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::utils::{bits_to_string, parse_bits};

    #[test]
    fn mask_covers_prefix_only() {
        let bits = parse_bits("10101011010110101111").unwrap();
        let sifted = apply_mask(&bits, "f0f0").unwrap();
        assert_eq!(bits_to_string(&sifted), "10100101");
    }

    #[test]
    fn short_key_is_rejected() {
        let bits = parse_bits("1010").unwrap();
        let err = apply_mask(&bits, "ffff").unwrap_err();
        assert_eq!(
            err,
            InterceptError::Reconciliation(ReconciliationError::MaskLengthMismatch {
                key: 4,
                mask: 16
            })
        );
    }
}
