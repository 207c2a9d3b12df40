use crate::core::{Symbol, TraceRecorder, VoltageTrace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Symbols carried per frame; each frame starts with a header marker.
pub const FRAME_SYMBOLS: usize = 16;

/// A generator of synthetic photodiode traces.
///
/// The `TraceSampler` lays out symbols the way the kit's sender transmits
/// them: every 16 symbols are preceded by a long header pulse, and every
/// slot is followed by a gap of background samples. Useful for calibration
/// dry-runs without hardware.
#[derive(Debug, Clone)]
pub struct TraceSampler {
    /// Channel voltages for H, D, V, A.
    pub levels: [(f64, f64); 4],
    /// Background voltage on both channels.
    pub noise_level: (f64, f64),
    /// Half-width of the uniform jitter on signal samples.
    pub jitter: f64,
    /// Width of the uniform jitter added on top of the background.
    pub noise_jitter: f64,
    pub samples_per_slot: usize,
    pub header_samples: usize,
    pub gap_samples: usize,
    /// Fixed seed; `None` draws from the thread RNG.
    pub seed: Option<u64>,
}

impl Default for TraceSampler {
    fn default() -> Self {
        Self {
            levels: [(1.2, 0.2), (0.8, 0.8), (0.2, 1.2), (1.6, 1.6)],
            noise_level: (0.001, 0.001),
            jitter: 0.01,
            noise_jitter: 0.001,
            samples_per_slot: 3,
            header_samples: 6,
            gap_samples: 4,
            seed: None,
        }
    }
}

impl TraceSampler {
    /// Creates a new `TraceSampler` with the default kit levels.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every run reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Voltage pair the sampler uses for `symbol`.
    pub fn level(&self, symbol: Symbol) -> (f64, f64) {
        match symbol.ordinal() {
            Some(o) => self.levels[o as usize],
            None => self.noise_level,
        }
    }

    /// Samples a trace carrying `symbols`.
    ///
    /// The header pulse reuses the H level, so the trace still has exactly
    /// five classes. Noise entries in `symbols` leave an empty slot.
    pub fn run(&self, symbols: &[Symbol]) -> VoltageTrace {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let mut recorder = TraceRecorder::new();

        self.push_noise(&mut recorder, &mut rng, self.gap_samples);
        for frame in symbols.chunks(FRAME_SYMBOLS) {
            self.push_signal(&mut recorder, &mut rng, self.level(Symbol::H), self.header_samples);
            self.push_noise(&mut recorder, &mut rng, self.gap_samples);

            for &symbol in frame {
                match symbol {
                    Symbol::Noise => {
                        self.push_noise(&mut recorder, &mut rng, self.samples_per_slot)
                    }
                    _ => self.push_signal(
                        &mut recorder,
                        &mut rng,
                        self.level(symbol),
                        self.samples_per_slot,
                    ),
                }
                self.push_noise(&mut recorder, &mut rng, self.gap_samples);
            }
        }

        recorder.finish()
    }

    /// Draws `len` uniformly random polarizations.
    pub fn random_symbols(&self, len: usize) -> Vec<Symbol> {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        (0..len)
            .map(|_| Symbol::POLARIZATIONS[rng.random_range(0..4)])
            .collect()
    }

    fn push_signal(
        &self,
        recorder: &mut TraceRecorder,
        rng: &mut StdRng,
        level: (f64, f64),
        count: usize,
    ) {
        for _ in 0..count {
            let a = level.0 + rng.random_range(-self.jitter..=self.jitter);
            let b = level.1 + rng.random_range(-self.jitter..=self.jitter);
            recorder.push(a.max(0.0), b.max(0.0));
        }
    }

    fn push_noise(&self, recorder: &mut TraceRecorder, rng: &mut StdRng, count: usize) {
        for _ in 0..count {
            let a = self.noise_level.0 + rng.random_range(0.0..=self.noise_jitter);
            let b = self.noise_level.1 + rng.random_range(0.0..=self.noise_jitter);
            recorder.push(a, b);
        }
    }
}
