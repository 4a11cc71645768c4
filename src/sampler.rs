//! Stochastic decoding over next-token logits.

use crate::error::GenerationError;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub temperature: f32,
    /// 0 disables top-k filtering.
    pub top_k: usize,
    pub top_p: f32,
    pub repetition_penalty: f32,
    /// 0 disables n-gram banning.
    pub no_repeat_ngram_size: usize,
    pub do_sample: bool,
    pub seed: Option<u64>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: 0.85,
            top_k: 50,
            top_p: 0.95,
            repetition_penalty: 1.15,
            no_repeat_ngram_size: 15,
            do_sample: true,
            seed: None,
        }
    }
}

impl SamplingConfig {
    pub fn validate(&self) -> Result<(), GenerationError> {
        if !(self.temperature > 0.0 && self.temperature.is_finite()) {
            return Err(GenerationError::InvalidConfig(format!(
                "temperature must be > 0, got {}",
                self.temperature
            )));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(GenerationError::InvalidConfig(format!(
                "top_p must be in (0, 1], got {}",
                self.top_p
            )));
        }
        if !(self.repetition_penalty >= 1.0 && self.repetition_penalty.is_finite()) {
            return Err(GenerationError::InvalidConfig(format!(
                "repetition_penalty must be >= 1, got {}",
                self.repetition_penalty
            )));
        }
        Ok(())
    }
}

/// Logits of already seen ids are divided by the penalty when positive and
/// multiplied by it when negative.
pub fn apply_repetition_penalty(logits: &mut [f32], seen: &HashSet<u32>, penalty: f32) {
    if penalty == 1.0 {
        return;
    }
    for &id in seen {
        if let Some(logit) = logits.get_mut(id as usize) {
            if *logit > 0.0 {
                *logit /= penalty;
            } else {
                *logit *= penalty;
            }
        }
    }
}

pub fn apply_top_k(logits: &mut [f32], k: usize) {
    if k == 0 || k >= logits.len() {
        return;
    }
    let mut sorted = logits.to_vec();
    sorted.sort_unstable_by(|a, b| b.total_cmp(a));
    let threshold = sorted[k - 1];
    for logit in logits.iter_mut() {
        if *logit < threshold {
            *logit = f32::NEG_INFINITY;
        }
    }
}

fn softmax(logits: &[f32]) -> Vec<f64> {
    let max = logits
        .iter()
        .copied()
        .filter(|l| l.is_finite())
        .fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return vec![0.0; logits.len()];
    }
    let exp = logits
        .iter()
        .map(|&l| {
            if l.is_finite() {
                ((l - max) as f64).exp()
            } else {
                0.0
            }
        })
        .collect::<Vec<_>>();
    let total: f64 = exp.iter().sum();
    exp.into_iter().map(|e| e / total).collect()
}

/// Keeps the smallest set of most likely ids whose mass reaches `p`.
pub fn apply_top_p(logits: &mut [f32], p: f32) {
    if p >= 1.0 {
        return;
    }
    let probs = softmax(logits);
    let mut order = (0..logits.len()).collect::<Vec<_>>();
    order.sort_unstable_by(|&a, &b| probs[b].total_cmp(&probs[a]));
    let mut cumulative = 0.0;
    let mut keep = 0;
    for &id in &order {
        keep += 1;
        cumulative += probs[id];
        if cumulative >= p as f64 {
            break;
        }
    }
    for &id in &order[keep..] {
        logits[id] = f32::NEG_INFINITY;
    }
}

/// Draws ids one at a time, tracking the running history for the
/// repetition penalty and the n-gram ban.
pub struct Sampler {
    config: SamplingConfig,
    rng: StdRng,
    history: Vec<u32>,
    seen: HashSet<u32>,
    ngrams: HashMap<Vec<u32>, HashSet<u32>>,
}

impl Sampler {
    pub fn new(config: SamplingConfig) -> Result<Self, GenerationError> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            config,
            rng,
            history: vec![],
            seen: HashSet::new(),
            ngrams: HashMap::new(),
        })
    }

    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    pub fn history(&self) -> &[u32] {
        &self.history
    }

    pub fn push(&mut self, id: u32) {
        self.history.push(id);
        self.seen.insert(id);
        let n = self.config.no_repeat_ngram_size;
        if n > 0 && self.history.len() >= n {
            let ngram = &self.history[self.history.len() - n..];
            self.ngrams
                .entry(ngram[..n - 1].to_vec())
                .or_default()
                .insert(ngram[n - 1]);
        }
    }

    pub fn extend(&mut self, ids: &[u32]) {
        for &id in ids {
            self.push(id);
        }
    }

    /// Ids that would repeat an n-gram already present in the history.
    pub fn banned_ids(&self) -> Vec<u32> {
        let n = self.config.no_repeat_ngram_size;
        if n == 0 || self.history.len() + 1 < n {
            return vec![];
        }
        let key = &self.history[self.history.len() + 1 - n..];
        self.ngrams
            .get(key)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns `None` when every id has been filtered out.
    pub fn sample(&mut self, mut logits: Vec<f32>) -> Option<u32> {
        apply_repetition_penalty(&mut logits, &self.seen, self.config.repetition_penalty);
        for id in self.banned_ids() {
            if let Some(logit) = logits.get_mut(id as usize) {
                *logit = f32::NEG_INFINITY;
            }
        }
        if !logits.iter().any(|l| l.is_finite()) {
            return None;
        }
        let id = if self.config.do_sample {
            for logit in logits.iter_mut() {
                *logit /= self.config.temperature;
            }
            apply_top_k(&mut logits, self.config.top_k);
            apply_top_p(&mut logits, self.config.top_p);
            let weights = softmax(&logits);
            let dist = WeightedIndex::new(&weights).ok()?;
            dist.sample(&mut self.rng) as u32
        } else {
            logits
                .iter()
                .enumerate()
                .filter(|(_, l)| l.is_finite())
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i as u32)?
        };
        self.push(id);
        Some(id)
    }
}
