//! Symbol classification of two-channel voltage samples.
//!
//! Samples are normalized per channel (each column scaled to unit L2 norm)
//! and partitioned with Lloyd's k-means, seeded with k-means++ from a fixed
//! RNG seed so that a rerun with the same seed gives the same labels.
//! The result is always canonicalized: the largest cluster is id 0, the
//! noise class every downstream stage expects.

use crate::config::PipelineConfig;
use crate::core::VoltageTrace;
use crate::core::errors::ClassificationError;
use ndarray::{Array2, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;

/// Cluster label used for the background level.
pub const NOISE_CLUSTER: usize = 0;

/// Summary of one class, in volts.
#[derive(Clone, Debug, PartialEq)]
pub struct Cluster {
    pub id: usize,
    pub centroid: (f64, f64),
    /// Population standard deviation per channel.
    pub spread: (f64, f64),
    pub size: usize,
}

impl Cluster {
    /// Display letter, `A` for cluster 0.
    pub fn letter(&self) -> char {
        (b'A' + (self.id % 26) as u8) as char
    }
}

/// One cluster label per trace sample.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassAssignment {
    labels: Vec<usize>,
    num_classes: usize,
}

impl ClassAssignment {
    pub fn new(labels: Vec<usize>, num_classes: usize) -> Self {
        Self {
            labels,
            num_classes,
        }
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Members per cluster id.
    pub fn sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.num_classes];
        for &label in &self.labels {
            if let Some(size) = sizes.get_mut(label) {
                *size += 1;
            }
        }
        sizes
    }
}

/// Labels plus per-cluster statistics.
#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub assignment: ClassAssignment,
    /// Indexed by cluster id.
    pub clusters: Vec<Cluster>,
}

/// Relabels so the cluster with the most members is id 0.
///
/// The largest cluster trades labels with whatever held id 0; ties go to the
/// lowest id. Every other label is left alone.
pub fn canonicalize(classification: Classification) -> Classification {
    let Classification {
        assignment,
        mut clusters,
    } = classification;

    let sizes = assignment.sizes();
    let largest = sizes
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, usize)>, (id, &size)| match best {
            Some((_, best_size)) if best_size >= size => best,
            _ => Some((id, size)),
        })
        .map(|(id, _)| id)
        .unwrap_or(NOISE_CLUSTER);

    if largest == NOISE_CLUSTER {
        return Classification {
            assignment,
            clusters,
        };
    }

    let swap = |label: usize| match label {
        l if l == largest => NOISE_CLUSTER,
        NOISE_CLUSTER => largest,
        l => l,
    };
    let labels = assignment.labels.iter().map(|&l| swap(l)).collect();

    if largest < clusters.len() && !clusters.is_empty() {
        clusters.swap(NOISE_CLUSTER, largest);
    }
    for (id, cluster) in clusters.iter_mut().enumerate() {
        cluster.id = id;
    }

    Classification {
        assignment: ClassAssignment::new(labels, assignment.num_classes),
        clusters,
    }
}

/// Seeded k-means classifier.
#[derive(Clone, Debug)]
pub struct SymbolClassifier {
    pub num_classes: usize,
    pub seed: u64,
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for SymbolClassifier {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

impl SymbolClassifier {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            ..Self::default()
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            num_classes: config.num_classes,
            seed: config.seed,
            max_iterations: config.max_iterations,
            tolerance: config.tolerance,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    /// Partitions the trace into `num_classes` canonical clusters.
    pub fn classify(&self, trace: &VoltageTrace) -> Result<Classification, ClassificationError> {
        let k = self.num_classes;
        let n = trace.len();
        if k == 0 || n < k {
            return Err(ClassificationError::InsufficientSamples {
                samples: n,
                classes: k,
            });
        }

        let (points, norms) = normalize(trace.samples());
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut centroids = kmeans_plus_plus(&points, k, &mut rng);
        let mut labels: Vec<usize> = Vec::new();

        for iteration in 0..self.max_iterations {
            let next: Vec<usize> = points
                .rows()
                .into_iter()
                .map(|p| nearest(p, &centroids).0)
                .collect();
            let labels_changed = next != labels;
            labels = next;

            let updated = update_centroids(&points, &labels, &centroids);
            let shift = centroids
                .rows()
                .into_iter()
                .zip(updated.rows())
                .map(|(a, b)| dist2(a, b).sqrt())
                .fold(0.0, f64::max);
            centroids = updated;

            if !labels_changed && shift <= self.tolerance {
                tracing::debug!(iterations = iteration + 1, classes = k, "k-means converged");
                let raw = summarize(trace, &labels, &centroids, &norms);
                return Ok(canonicalize(raw));
            }
        }

        Err(ClassificationError::NotConverged {
            iterations: self.max_iterations,
        })
    }
}

/// Scales each channel to unit L2 norm. Returns the scaled points and the
/// per-channel norms used (1.0 for an all-zero channel).
fn normalize(samples: &Array2<f64>) -> (Array2<f64>, [f64; 2]) {
    let mut points = samples.clone();
    let mut norms = [1.0; 2];
    for (mut column, norm_slot) in points.columns_mut().into_iter().zip(norms.iter_mut()) {
        let norm = column.dot(&column).sqrt();
        if norm > 0.0 {
            column.mapv_inplace(|v| v / norm);
            *norm_slot = norm;
        }
    }
    (points, norms)
}

fn dist2(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Index and squared distance of the closest centroid; ties go to the lower index.
fn nearest(point: ArrayView1<'_, f64>, centroids: &Array2<f64>) -> (usize, f64) {
    centroids
        .rows()
        .into_iter()
        .enumerate()
        .map(|(i, c)| (i, dist2(point, c)))
        .fold((0, f64::INFINITY), |best, cur| if cur.1 < best.1 { cur } else { best })
}

fn kmeans_plus_plus(points: &Array2<f64>, k: usize, rng: &mut StdRng) -> Array2<f64> {
    let n = points.nrows();
    let mut chosen = Vec::with_capacity(k);
    chosen.push(rng.random_range(0..n));

    let mut d2: Vec<f64> = points
        .rows()
        .into_iter()
        .map(|p| dist2(p, points.row(chosen[0])))
        .collect();

    while chosen.len() < k {
        let total: f64 = d2.iter().sum();
        let next = if total > 0.0 {
            let target = rng.random::<f64>() * total;
            let mut acc = 0.0;
            d2.iter()
                .position(|&d| {
                    acc += d;
                    acc > target
                })
                .unwrap_or(n - 1)
        } else {
            // Fewer distinct points than classes: take the next unused index.
            (0..n).find(|i| !chosen.contains(i)).unwrap_or(0)
        };
        chosen.push(next);

        let newest = points.row(next);
        for (d, p) in d2.iter_mut().zip(points.rows()) {
            *d = d.min(dist2(p, newest));
        }
    }

    points.select(Axis(0), &chosen)
}

/// Recomputes means. An empty cluster takes the point farthest from its own
/// centroid.
fn update_centroids(points: &Array2<f64>, labels: &[usize], previous: &Array2<f64>) -> Array2<f64> {
    let k = previous.nrows();
    let mut sums = Array2::<f64>::zeros((k, 2));
    let mut counts = vec![0usize; k];

    for (p, &label) in points.rows().into_iter().zip(labels) {
        let mut row = sums.row_mut(label);
        row += &p;
        counts[label] += 1;
    }

    let mut centroids = previous.clone();
    for c in 0..k {
        if counts[c] > 0 {
            let mean = sums.row(c).mapv(|v| v / counts[c] as f64);
            centroids.row_mut(c).assign(&mean);
        } else {
            let far = points
                .rows()
                .into_iter()
                .zip(labels)
                .map(|(p, &l)| dist2(p, previous.row(l)))
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 { cur } else { best }
                })
                .0;
            centroids.row_mut(c).assign(&points.row(far));
        }
    }
    centroids
}

/// Per-cluster statistics in volts, before canonicalization.
fn summarize(
    trace: &VoltageTrace,
    labels: &[usize],
    centroids: &Array2<f64>,
    norms: &[f64; 2],
) -> Classification {
    let k = centroids.nrows();
    let clusters = (0..k)
        .map(|id| {
            let members: Vec<(f64, f64)> = labels
                .iter()
                .enumerate()
                .filter(|&(_, &l)| l == id)
                .map(|(i, _)| trace.sample(i))
                .collect();

            if members.is_empty() {
                return Cluster {
                    id,
                    centroid: (centroids[[id, 0]] * norms[0], centroids[[id, 1]] * norms[1]),
                    spread: (0.0, 0.0),
                    size: 0,
                };
            }

            let size = members.len() as f64;
            let mean0 = members.iter().map(|m| m.0).sum::<f64>() / size;
            let mean1 = members.iter().map(|m| m.1).sum::<f64>() / size;
            let var0 = members.iter().map(|m| (m.0 - mean0).powi(2)).sum::<f64>() / size;
            let var1 = members.iter().map(|m| (m.1 - mean1).powi(2)).sum::<f64>() / size;

            Cluster {
                id,
                centroid: (mean0, mean1),
                spread: (var0.sqrt(), var1.sqrt()),
                size: members.len(),
            }
        })
        .collect();

    Classification {
        assignment: ClassAssignment::new(labels.to_vec(), k),
        clusters,
    }
}

/// Calibration table: one row per cluster with centroid and spread.
impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<8} {:>11} {:>10} {:>11} {:>10} {:>7}",
            "cluster", "signal1(V)", "error1(V)", "signal2(V)", "error2(V)", "size"
        )?;
        for c in &self.clusters {
            writeln!(
                f,
                "{:<8} {:>11.4} {:>10.4} {:>11.4} {:>10.4} {:>7}",
                c.letter(),
                c.centroid.0,
                c.spread.0,
                c.centroid.1,
                c.spread.1,
                c.size
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn five_level_trace() -> VoltageTrace {
        let mut pairs = Vec::new();
        for i in 0..40 {
            let jitter = (i % 3) as f64 * 0.001;
            pairs.push((0.004 + jitter, 0.004 + jitter));
        }
        let levels = [(1.0, 0.2), (0.2, 1.0), (0.6, 0.6), (1.4, 1.4)];
        for (i, level) in levels.iter().cycle().take(20).enumerate() {
            let jitter = (i % 2) as f64 * 0.01;
            pairs.push((level.0 + jitter, level.1 - jitter));
        }
        VoltageTrace::from_pairs(&pairs)
    }

    #[test]
    fn noise_is_cluster_zero() {
        let result = SymbolClassifier::new(5).classify(&five_level_trace()).unwrap();
        let sizes = result.assignment.sizes();
        assert_eq!(sizes[0], 40);
        assert!(result.assignment.labels()[..40].iter().all(|&l| l == 0));
        assert_eq!(result.clusters[0].id, 0);
        assert!(result.clusters[0].centroid.0 < 0.01);
    }

    #[test]
    fn separates_signal_levels() {
        let result = SymbolClassifier::new(5).classify(&five_level_trace()).unwrap();
        let labels = result.assignment.labels();
        for i in 40..56 {
            assert_eq!(labels[i], labels[i + 4]);
        }
        let mut distinct: Vec<usize> = labels[40..44].to_vec();
        distinct.sort();
        distinct.dedup();
        assert_eq!(distinct.len(), 4);
        assert!(!distinct.contains(&0));
    }

    #[test]
    fn same_seed_same_result() {
        let trace = five_level_trace();
        let a = SymbolClassifier::new(5).with_seed(11).classify(&trace).unwrap();
        let b = SymbolClassifier::new(5).with_seed(11).classify(&trace).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn too_few_samples() {
        let trace = VoltageTrace::from_pairs(&[(0.0, 0.0), (1.0, 1.0)]);
        let err = SymbolClassifier::new(5).classify(&trace).unwrap_err();
        assert_eq!(
            err,
            ClassificationError::InsufficientSamples {
                samples: 2,
                classes: 5
            }
        );
    }

    #[test]
    fn iteration_bound_is_enforced() {
        let err = SymbolClassifier::new(5)
            .with_max_iterations(1)
            .classify(&five_level_trace())
            .unwrap_err();
        assert_eq!(err, ClassificationError::NotConverged { iterations: 1 });
    }

    #[test]
    fn duplicate_points_still_classify() {
        let trace = VoltageTrace::from_pairs(&[(0.0, 0.0); 6]);
        let result = SymbolClassifier::new(3).classify(&trace).unwrap();
        assert_eq!(result.assignment.sizes()[0], 6);
    }

    #[test]
    fn canonicalize_swaps_largest_into_zero() {
        let clusters = (0..3)
            .map(|id| Cluster {
                id,
                centroid: (id as f64, id as f64),
                spread: (0.0, 0.0),
                size: 0,
            })
            .collect();
        let input = Classification {
            assignment: ClassAssignment::new(vec![0, 2, 2, 2, 1, 0], 3),
            clusters,
        };
        let out = canonicalize(input);
        assert_eq!(out.assignment.labels(), &[2, 0, 0, 0, 1, 2]);
        assert_eq!(out.clusters[0].centroid, (2.0, 2.0));
        assert_eq!(out.clusters[2].centroid, (0.0, 0.0));
        assert_eq!(out.clusters[2].id, 2);
    }

    #[test]
    fn report_lists_every_cluster() {
        let result = SymbolClassifier::new(5).classify(&five_level_trace()).unwrap();
        let report = result.to_string();
        assert!(report.starts_with("cluster"));
        assert_eq!(report.lines().count(), 6);
        assert!(report.lines().nth(1).unwrap().starts_with('A'));
    }
}
