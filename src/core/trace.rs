use crate::core::errors::TraceError;
use crate::core::utils::noise_floor;
use ndarray::{Array2, ArrayView1};
use std::path::Path;

/// Two-channel photodiode voltages, one row per sample.
#[derive(Clone, Debug, PartialEq)]
pub struct VoltageTrace {
    samples: Array2<f64>,
}

impl VoltageTrace {
    /// Builds a trace from `(channel1, channel2)` pairs.
    pub fn from_pairs(pairs: &[(f64, f64)]) -> Self {
        let rows: Vec<[f64; 2]> = pairs.iter().map(|&(a, b)| [a, b]).collect();
        Self {
            samples: Array2::from(rows),
        }
    }

    /// Parses a voltage log: two whitespace separated columns per line.
    ///
    /// Blank lines are skipped and columns past the second are ignored.
    pub fn parse(text: &str) -> Result<Self, TraceError> {
        let mut recorder = TraceRecorder::new();

        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;
            let mut cols = line.split_whitespace();
            let (Some(first), Some(second)) = (cols.next(), cols.next()) else {
                if line.trim().is_empty() {
                    continue;
                }
                return Err(TraceError::Malformed {
                    line: line_no,
                    text: line.to_string(),
                });
            };

            // `f64::from_str` also takes "nan" and "inf"
            let parse = |s: &str| match s.parse::<f64>() {
                Ok(value) if value.is_finite() => Ok(value),
                _ => Err(TraceError::Malformed {
                    line: line_no,
                    text: line.to_string(),
                }),
            };
            let (ch1, ch2) = (parse(first)?, parse(second)?);

            for value in [ch1, ch2] {
                if value < 0.0 {
                    return Err(TraceError::NegativeVoltage {
                        line: line_no,
                        value,
                    });
                }
            }
            recorder.push(ch1, ch2);
        }

        Ok(recorder.finish())
    }

    /// Reads and parses a voltage log file in full.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TraceError> {
        let text =
            std::fs::read_to_string(path.as_ref()).map_err(|e| TraceError::Io(e.to_string()))?;
        Self::parse(&text)
    }

    pub fn len(&self) -> usize {
        self.samples.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sample matrix of shape `(len, 2)`.
    pub fn samples(&self) -> &Array2<f64> {
        &self.samples
    }

    /// One channel, `0` or `1`.
    pub fn channel(&self, index: usize) -> ArrayView1<'_, f64> {
        self.samples.column(index)
    }

    pub fn sample(&self, index: usize) -> (f64, f64) {
        (self.samples[[index, 0]], self.samples[[index, 1]])
    }

    /// Indices where exactly one channel is above `threshold`.
    pub fn untallied(&self, threshold: f64) -> Vec<bool> {
        self.samples
            .rows()
            .into_iter()
            .map(|row| (row[0] > threshold) != (row[1] > threshold))
            .collect()
    }

    /// Returns a copy where every sample with exactly one channel above
    /// `threshold` is forced to the per-channel noise floors.
    pub fn denoise(&self, threshold: f64, quantum: f64) -> VoltageTrace {
        let floors = [
            noise_floor(self.channel(0).iter().copied(), quantum),
            noise_floor(self.channel(1).iter().copied(), quantum),
        ];

        let mut samples = self.samples.clone();
        for (mut row, untallied) in samples.rows_mut().into_iter().zip(self.untallied(threshold)) {
            if untallied {
                row[0] = floors[0];
                row[1] = floors[1];
            }
        }
        VoltageTrace { samples }
    }
}

/// Append-only collector used while a trace is being acquired.
#[derive(Debug, Default)]
pub struct TraceRecorder {
    rows: Vec<[f64; 2]>,
}

impl TraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, channel1: f64, channel2: f64) {
        self.rows.push([channel1, channel2]);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Freezes the recording into an immutable trace.
    pub fn finish(self) -> VoltageTrace {
        VoltageTrace {
            samples: Array2::from(self.rows),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_column_log() {
        let trace = VoltageTrace::parse("0.01 0.02 \n\n1.5 2.5\n").unwrap();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.sample(1), (1.5, 2.5));
    }

    #[test]
    fn rejects_single_column_line() {
        let err = VoltageTrace::parse("0.1 0.2\n0.3\n").unwrap_err();
        assert_eq!(
            err,
            TraceError::Malformed {
                line: 2,
                text: "0.3".into()
            }
        );
    }

    #[test]
    fn rejects_negative_voltage() {
        let err = VoltageTrace::parse("0.1 -0.2\n").unwrap_err();
        assert!(matches!(err, TraceError::NegativeVoltage { line: 1, .. }));
    }

    #[test]
    fn rejects_non_finite_voltage() {
        for text in ["0.1 0.1\nnan 0.1\n", "0.1 0.1\ninf 0.2\n", "0.1 0.1\n0.3 -infinity\n"] {
            let err = VoltageTrace::parse(text).unwrap_err();
            assert!(
                matches!(err, TraceError::Malformed { line: 2, .. }),
                "{text:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn denoise_forces_untallied_samples_to_floor() {
        let trace = VoltageTrace::from_pairs(&[
            (0.0, 0.0),
            (0.0, 0.0),
            (0.0, 0.0),
            (1.0, 0.0),
            (1.0, 2.0),
        ]);
        let clean = trace.denoise(0.0025, 0.001);
        assert_eq!(clean.sample(3), (0.0, 0.0));
        assert_eq!(clean.sample(4), (1.0, 2.0));
    }
}
