//! Temporal decoding of a classified trace into one symbol per slot.

use crate::config::PipelineConfig;
use crate::core::VoltageTrace;
use crate::core::errors::DecodeError;
use crate::measure::classifier::{ClassAssignment, NOISE_CLUSTER};
use std::sync::Arc;

/// Every this-many decoded elements, starting at 0, is a framing marker.
pub const HEADER_PERIOD: usize = 17;

#[derive(Clone, Debug)]
pub struct TemporalDecoder {
    pub noise_threshold: f64,
}

impl Default for TemporalDecoder {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl TemporalDecoder {
    pub fn new(noise_threshold: f64) -> Self {
        Self { noise_threshold }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.noise_threshold)
    }

    /// Prepares a lazy run over `assignment`.
    ///
    /// Samples where only one channel clears the noise threshold are read as
    /// noise. Nothing is collapsed until the run is iterated.
    pub fn decode<'a>(
        &self,
        trace: &VoltageTrace,
        assignment: &'a ClassAssignment,
    ) -> Result<SymbolRun<'a>, DecodeError> {
        if trace.len() != assignment.len() {
            return Err(DecodeError::LengthMismatch {
                trace: trace.len(),
                labels: assignment.len(),
            });
        }

        let num_classes = assignment.num_classes();
        if let Some((index, &label)) = assignment
            .labels()
            .iter()
            .enumerate()
            .find(|&(_, &l)| l >= num_classes)
        {
            return Err(DecodeError::LabelOutOfRange {
                index,
                label,
                num_classes,
            });
        }

        Ok(SymbolRun::new(
            assignment.labels(),
            trace.untallied(self.noise_threshold).into(),
        ))
    }
}

/// Lazily collapsed cluster ids, with noise and framing markers removed.
///
/// Cloning before iterating, or calling [`SymbolRun::restart`], replays the
/// run from the stored assignment.
#[derive(Clone, Debug)]
pub struct SymbolRun<'a> {
    labels: &'a [usize],
    suppressed: Arc<[bool]>,
    pos: usize,
    collapsed: usize,
}

impl<'a> SymbolRun<'a> {
    fn new(labels: &'a [usize], suppressed: Arc<[bool]>) -> Self {
        Self {
            labels,
            suppressed,
            pos: 0,
            collapsed: 0,
        }
    }

    /// A fresh run over the same samples.
    pub fn restart(&self) -> SymbolRun<'a> {
        SymbolRun::new(self.labels, Arc::clone(&self.suppressed))
    }

    fn label_at(&self, index: usize) -> usize {
        if self.suppressed[index] {
            NOISE_CLUSTER
        } else {
            self.labels[index]
        }
    }

    /// Next collapsed element, header markers included.
    fn next_collapsed(&mut self) -> Option<usize> {
        while self.pos < self.labels.len() && self.label_at(self.pos) == NOISE_CLUSTER {
            self.pos += 1;
        }
        if self.pos >= self.labels.len() {
            return None;
        }

        let label = self.label_at(self.pos);
        while self.pos < self.labels.len() && self.label_at(self.pos) == label {
            self.pos += 1;
        }
        Some(label)
    }
}

impl Iterator for SymbolRun<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            let label = self.next_collapsed()?;
            let index = self.collapsed;
            self.collapsed += 1;
            if index % HEADER_PERIOD != 0 {
                return Some(label);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_trace(n: usize) -> VoltageTrace {
        VoltageTrace::from_pairs(&vec![(1.0, 1.0); n])
    }

    #[test]
    fn all_noise_decodes_to_nothing() {
        let trace = VoltageTrace::from_pairs(&[(0.001, 0.001); 17]);
        let assignment = ClassAssignment::new(vec![0; 17], 5);
        let run = TemporalDecoder::new(0.0025).decode(&trace, &assignment).unwrap();
        assert_eq!(run.count(), 0);
    }

    #[test]
    fn runs_collapse_and_header_is_dropped() {
        // header 4, then 1 1 | 2 | 2 2 (noise-separated) | 3 3
        let labels = vec![4, 4, 0, 1, 1, 0, 2, 0, 2, 2, 3, 3, 0];
        let trace = flat_trace(labels.len());
        let assignment = ClassAssignment::new(labels, 5);
        let run = TemporalDecoder::new(0.0025).decode(&trace, &assignment).unwrap();
        assert_eq!(run.collect::<Vec<_>>(), vec![1, 2, 2, 3]);
    }

    #[test]
    fn adjacent_distinct_ids_stay_separate() {
        let labels = vec![4, 0, 1, 1, 2, 2, 0];
        let trace = flat_trace(labels.len());
        let assignment = ClassAssignment::new(labels, 5);
        let run = TemporalDecoder::new(0.0025).decode(&trace, &assignment).unwrap();
        assert_eq!(run.collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn every_seventeenth_element_is_dropped() {
        let mut labels = Vec::new();
        for i in 0..40 {
            labels.push(1 + i % 3);
            labels.push(0);
        }
        let trace = flat_trace(labels.len());
        let assignment = ClassAssignment::new(labels, 5);
        let decoded: Vec<usize> = TemporalDecoder::new(0.0025)
            .decode(&trace, &assignment)
            .unwrap()
            .collect();
        // 40 collapsed elements, indices 0, 17 and 34 removed
        assert_eq!(decoded.len(), 37);
        assert_eq!(decoded[0], 2);
        assert_eq!(decoded[16], 1 + 18 % 3);
    }

    #[test]
    fn one_sided_samples_read_as_noise() {
        let trace = VoltageTrace::from_pairs(&[
            (1.0, 1.0),
            (0.0, 0.0),
            (1.0, 0.0),
            (0.0, 0.0),
            (1.0, 1.0),
        ]);
        let assignment = ClassAssignment::new(vec![3, 0, 2, 0, 1], 5);
        let run = TemporalDecoder::new(0.0025).decode(&trace, &assignment).unwrap();
        assert_eq!(run.collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn restart_replays_from_start() {
        let labels = vec![4, 0, 1, 0, 2, 0];
        let trace = flat_trace(labels.len());
        let assignment = ClassAssignment::new(labels, 5);
        let mut run = TemporalDecoder::new(0.0025).decode(&trace, &assignment).unwrap();
        assert_eq!(run.next(), Some(1));
        assert_eq!(run.restart().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(run.collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let assignment = ClassAssignment::new(vec![0; 3], 5);
        let err = TemporalDecoder::new(0.0025)
            .decode(&flat_trace(4), &assignment)
            .unwrap_err();
        assert_eq!(err, DecodeError::LengthMismatch { trace: 4, labels: 3 });
    }

    #[test]
    fn out_of_range_label_is_rejected() {
        let assignment = ClassAssignment::new(vec![0, 7], 5);
        let err = TemporalDecoder::new(0.0025)
            .decode(&flat_trace(2), &assignment)
            .unwrap_err();
        assert!(matches!(err, DecodeError::LabelOutOfRange { index: 1, label: 7, .. }));
    }
}
