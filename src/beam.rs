use std::cmp::Ordering;

use crate::cache::ContextCache;
use crate::heap::BoundedHeap;
use crate::model::{ContextGenerator, ScoreModel, SequenceValidator};
use crate::types::SEQUENCE_SCORE_FLOOR;

/// An outcome sequence with per-step probabilities and a cumulative
/// log-probability score. Extension produces a new sequence; an existing one
/// is never mutated.
#[derive(Clone, Debug)]
pub struct Sequence {
    outcomes: Vec<String>,
    probs: Vec<f64>,
    score: f64,
}

impl Sequence {
    pub fn empty() -> Self {
        Self {
            outcomes: Vec::new(),
            probs: Vec::new(),
            score: 0.0,
        }
    }

    pub fn extended(&self, outcome: &str, prob: f64) -> Self {
        let mut outcomes = Vec::with_capacity(self.outcomes.len() + 1);
        outcomes.extend_from_slice(&self.outcomes);
        outcomes.push(outcome.to_string());
        let mut probs = Vec::with_capacity(self.probs.len() + 1);
        probs.extend_from_slice(&self.probs);
        probs.push(prob);
        Self {
            outcomes,
            probs,
            score: self.score + prob.ln(),
        }
    }

    pub fn outcomes(&self) -> &[String] {
        &self.outcomes
    }

    pub fn probs(&self) -> &[f64] {
        &self.probs
    }

    pub fn score(&self) -> f64 {
        self.score
    }
}

impl PartialEq for Sequence {
    fn eq(&self, other: &Self) -> bool {
        self.score.to_bits() == other.score.to_bits() && self.outcomes == other.outcomes
    }
}

impl Eq for Sequence {}

impl PartialOrd for Sequence {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Sequence {
    /// Descending by score so the best sequence is the heap minimum; ties
    /// break on the outcome list for determinism.
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .reverse()
            .then_with(|| self.outcomes.cmp(&other.outcomes))
    }
}

/// Generic k-best sequence search over an input slice, driven by a scoring
/// oracle and a context generator, with an optional outcome validator.
pub struct BeamSearch<'a, T> {
    size: usize,
    model: &'a dyn ScoreModel,
    context_gen: &'a dyn ContextGenerator<T>,
    validator: Option<&'a dyn SequenceValidator<T>>,
    cache: Option<ContextCache>,
}

impl<'a, T> BeamSearch<'a, T> {
    pub fn new(
        size: usize,
        model: &'a dyn ScoreModel,
        context_gen: &'a dyn ContextGenerator<T>,
    ) -> Self {
        Self {
            size,
            model,
            context_gen,
            validator: None,
            cache: None,
        }
    }

    pub fn with_validator(mut self, validator: &'a dyn SequenceValidator<T>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_cache(mut self, capacity: usize) -> Self {
        self.cache = Some(ContextCache::new(capacity));
        self
    }

    /// Returns up to `num_sequences` best sequences over `input`, best
    /// first. Empty input yields no sequences.
    pub fn best_sequences(&mut self, num_sequences: usize, input: &[T]) -> Vec<Sequence> {
        if input.is_empty() {
            return Vec::new();
        }
        // Entries memoized against a previous input must not survive.
        if let Some(cache) = &mut self.cache {
            cache.clear();
        }

        let mut frontier = BoundedHeap::new(self.size);
        let mut next = BoundedHeap::new(self.size);
        frontier.add(Sequence::empty());

        for index in 0..input.len() {
            let rounds = self.size.min(frontier.len());
            for _ in 0..rounds {
                let Some(top) = frontier.extract() else {
                    break;
                };
                let context = self.context_gen.context(index, input, top.outcomes());
                let scores = self.eval_cached(&context);
                if scores.is_empty() {
                    continue;
                }
                let cutoff = step_cutoff(&scores, self.size);
                let mut advanced = false;
                for (ox, &prob) in scores.iter().enumerate() {
                    if prob < cutoff {
                        continue;
                    }
                    let outcome = self.model.outcome(ox);
                    let ok = self
                        .validator
                        .map_or(true, |v| v.valid(index, input, top.outcomes(), outcome));
                    if !ok {
                        continue;
                    }
                    let candidate = top.extended(outcome, prob);
                    if candidate.score() > SEQUENCE_SCORE_FLOOR {
                        next.add(candidate);
                        advanced = true;
                    }
                }
                // Must-advance fallback: rather than stall the branch, retry
                // the step without the validator restriction.
                if !advanced && self.validator.is_some() {
                    for (ox, &prob) in scores.iter().enumerate() {
                        if prob < cutoff {
                            continue;
                        }
                        let candidate = top.extended(self.model.outcome(ox), prob);
                        if candidate.score() > SEQUENCE_SCORE_FLOOR {
                            next.add(candidate);
                        }
                    }
                }
            }
            std::mem::swap(&mut frontier, &mut next);
            next.clear();
        }

        let take = num_sequences.min(frontier.len());
        let mut best = Vec::with_capacity(take);
        for _ in 0..take {
            match frontier.extract() {
                Some(sequence) => best.push(sequence),
                None => break,
            }
        }
        best
    }

    pub fn best_sequence(&mut self, input: &[T]) -> Option<Sequence> {
        self.best_sequences(1, input).into_iter().next()
    }

    fn eval_cached(&mut self, context: &[String]) -> Vec<f64> {
        let model = self.model;
        let Some(cache) = &mut self.cache else {
            return model.eval(context);
        };
        let key = context.join("\u{1}");
        if let Some(hit) = cache.get(&key) {
            return hit.to_vec();
        }
        let scores = model.eval(context);
        cache.put(key, scores.clone());
        scores
    }
}

/// Per-step relative cutoff: the K-th largest score of the step.
fn step_cutoff(scores: &[f64], size: usize) -> f64 {
    let mut sorted = scores.to_vec();
    sorted.sort_unstable_by(f64::total_cmp);
    sorted[sorted.len().saturating_sub(size)]
}
