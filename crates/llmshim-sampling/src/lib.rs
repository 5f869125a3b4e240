//! # llmshim-sampling
//!
//! Token-selection pipeline for llmshim.
//!
//! A [`SamplerChain`] is an ordered list of [`Stage`]s built from a
//! temperature/top-p/top-k/seed tuple. Construction order is fixed:
//!
//! 1. top-k filter, iff `top_k > 0`
//! 2. top-p (nucleus) filter, iff `0 < top_p < 1`
//! 3. temperature scaling, iff `temperature > 0` and `|temperature - 1| > 1e-3`
//! 4. chooser: greedy arg-max if `temperature <= 0`, else a seeded draw
//!
//! Greedy mode is deterministic regardless of the other parameters; the
//! stochastic chooser is reproducible for a fixed seed and parameter tuple.

/// Seed used when the caller leaves the seed at 0.
pub const DEFAULT_SEED: u32 = 0xFFFF_FFFF;

/// Temperatures within this distance of 1.0 skip the scaling stage.
pub const TEMPERATURE_EPSILON: f32 = 1e-3;

/// Sampling error type.
#[derive(Debug, Clone, PartialEq)]
pub enum SamplingError {
    InvalidLogits,
    InvalidParams(String),
    NoValidTokens,
}

impl std::fmt::Display for SamplingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SamplingError::InvalidLogits => write!(f, "Invalid logits array"),
            SamplingError::InvalidParams(msg) => write!(f, "Invalid sampler parameters: {msg}"),
            SamplingError::NoValidTokens => write!(f, "No valid tokens after filtering"),
        }
    }
}

impl std::error::Error for SamplingError {}

pub type SamplingResult<T> = std::result::Result<T, SamplingError>;

/// Deterministic RNG for reproducible sampling.
///
/// Uses a simple xorshift64 algorithm for fast, reproducible random numbers.
#[derive(Debug, Clone)]
pub struct SeededRng {
    state: u64,
}

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        // Avoid zero state which would produce all zeros
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    /// Generate next random float in [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        (self.state >> 40) as f32 / (1u64 << 24) as f32
    }
}

/// Inputs to [`SamplerChain::build`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: i32,
    /// 0 selects [`DEFAULT_SEED`].
    pub seed: u32,
}

/// One step of the chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stage {
    /// Keep the `k` highest-scoring candidates.
    TopK(usize),
    /// Keep the smallest high-probability set whose mass reaches `p`.
    TopP(f32),
    /// Divide logits by the temperature.
    Temperature(f32),
    /// Pick the highest-scoring candidate.
    Greedy,
    /// Draw from the softmax distribution with a seeded RNG.
    Dist { seed: u32 },
}

/// Candidate token: (index into the vocabulary, logit).
type Candidate = (usize, f32);

/// An ordered token-selection pipeline.
///
/// The chain owns its RNG, so two chains built from the same parameters
/// produce the same token sequence over the same logits.
#[derive(Debug, Clone)]
pub struct SamplerChain {
    stages: Vec<Stage>,
    rng: Option<SeededRng>,
}

impl SamplerChain {
    /// Build the chain for a parameter tuple.
    ///
    /// Fails only on parameters no stage can interpret (NaN or infinite
    /// temperature / top-p).
    pub fn build(params: &SamplerParams) -> SamplingResult<Self> {
        if !params.temperature.is_finite() {
            return Err(SamplingError::InvalidParams(format!(
                "temperature must be finite (got {})",
                params.temperature
            )));
        }
        if !params.top_p.is_finite() {
            return Err(SamplingError::InvalidParams(format!(
                "top_p must be finite (got {})",
                params.top_p
            )));
        }

        let mut stages = Vec::with_capacity(4);
        if params.top_k > 0 {
            stages.push(Stage::TopK(params.top_k as usize));
        }
        if params.top_p > 0.0 && params.top_p < 1.0 {
            stages.push(Stage::TopP(params.top_p));
        }
        if params.temperature > 0.0 && (params.temperature - 1.0).abs() > TEMPERATURE_EPSILON {
            stages.push(Stage::Temperature(params.temperature));
        }

        let rng = if params.temperature <= 0.0 {
            stages.push(Stage::Greedy);
            None
        } else {
            let seed = if params.seed == 0 {
                DEFAULT_SEED
            } else {
                params.seed
            };
            stages.push(Stage::Dist { seed });
            Some(SeededRng::new(u64::from(seed)))
        };

        Ok(Self { stages, rng })
    }

    /// Stages in application order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Whether the chain ends in the deterministic arg-max chooser.
    pub fn is_greedy(&self) -> bool {
        matches!(self.stages.last(), Some(Stage::Greedy))
    }

    /// Select a token index from `logits`.
    pub fn sample(&mut self, logits: &[f32]) -> SamplingResult<usize> {
        if logits.is_empty() {
            return Err(SamplingError::InvalidLogits);
        }

        let mut candidates: Vec<Candidate> = logits
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, l)| !l.is_nan() && *l != f32::NEG_INFINITY)
            .collect();
        if candidates.is_empty() {
            return Err(SamplingError::NoValidTokens);
        }

        for stage in &self.stages {
            match *stage {
                Stage::TopK(k) => apply_top_k(&mut candidates, k),
                Stage::TopP(p) => apply_top_p(&mut candidates, p),
                Stage::Temperature(t) => {
                    for c in candidates.iter_mut() {
                        c.1 /= t;
                    }
                }
                Stage::Greedy => return argmax(&candidates),
                Stage::Dist { .. } => {
                    let rng = self.rng.as_mut().ok_or(SamplingError::NoValidTokens)?;
                    return sample_from_distribution(&candidates, rng);
                }
            }
        }

        // Every chain ends in a chooser; reaching here means it was built by hand.
        argmax(&candidates)
    }
}

/// Sort candidates by descending logit (stable, so ties keep vocabulary order).
fn sort_desc(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
}

fn apply_top_k(candidates: &mut Vec<Candidate>, k: usize) {
    if k == 0 || k >= candidates.len() {
        return;
    }
    sort_desc(candidates);
    candidates.truncate(k);
}

fn apply_top_p(candidates: &mut Vec<Candidate>, p: f32) {
    sort_desc(candidates);
    let probs = softmax(candidates);

    let mut cumsum = 0.0;
    let mut keep = candidates.len();
    for (idx, prob) in probs.iter().enumerate() {
        cumsum += prob;
        if cumsum >= p {
            keep = idx + 1;
            break;
        }
    }
    candidates.truncate(keep.max(1));
}

fn softmax(candidates: &[Candidate]) -> Vec<f32> {
    let max_logit = candidates
        .iter()
        .map(|c| c.1)
        .fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = candidates.iter().map(|c| (c.1 - max_logit).exp()).collect();
    let sum: f32 = exps.iter().sum();

    if sum > 0.0 && sum.is_finite() {
        exps.iter().map(|&e| e / sum).collect()
    } else {
        vec![1.0 / candidates.len() as f32; candidates.len()]
    }
}

fn argmax(candidates: &[Candidate]) -> SamplingResult<usize> {
    let mut best: Option<Candidate> = None;
    for &c in candidates {
        best = match best {
            Some(b) if c.1 > b.1 || (c.1 == b.1 && c.0 < b.0) => Some(c),
            Some(b) => Some(b),
            None => Some(c),
        };
    }
    best.map(|c| c.0).ok_or(SamplingError::NoValidTokens)
}

fn sample_from_distribution(candidates: &[Candidate], rng: &mut SeededRng) -> SamplingResult<usize> {
    let probs = softmax(candidates);
    let r = rng.next_f32();
    let mut cumsum = 0.0;

    for (c, &prob) in candidates.iter().zip(probs.iter()) {
        cumsum += prob;
        if r < cumsum {
            return Ok(c.0);
        }
    }

    // Rounding left r above the final cumulative sum.
    candidates
        .iter()
        .zip(probs.iter())
        .rev()
        .find(|(_, p)| **p > 0.0)
        .map(|(c, _)| c.0)
        .ok_or(SamplingError::NoValidTokens)
}
