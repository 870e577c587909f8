use rustc_hash::FxHashSet;

use crate::tree::ParseArena;
use crate::types::NodeId;

/// Statistical scoring oracle: maps one feature context to a probability per
/// outcome. Supplied by an external model loader.
pub trait ScoreModel {
    /// Returns one probability per outcome, indexed like `outcome`.
    fn eval(&self, context: &[String]) -> Vec<f64>;

    fn outcome_count(&self) -> usize;

    fn outcome(&self, index: usize) -> &str;
}

/// Produces the feature context for one beam-search step from the input
/// sequence and the outcome history so far.
pub trait ContextGenerator<T> {
    fn context(&self, index: usize, input: &[T], outcomes: &[String]) -> Vec<String>;
}

/// Vetoes outcomes that would produce an ill-formed outcome sequence.
pub trait SequenceValidator<T> {
    fn valid(&self, index: usize, input: &[T], outcomes: &[String], candidate: &str) -> bool;
}

/// Produces the feature context for labeling one constituent among its
/// top-level siblings.
pub trait NodeContextGenerator {
    fn context(&self, arena: &ParseArena, constituents: &[NodeId], index: usize) -> Vec<String>;
}

/// Produces the feature context for deciding whether the constituent being
/// grown over `constituents[start..=end]` is reducible.
pub trait CheckContextGenerator {
    fn context(
        &self,
        arena: &ParseArena,
        constituents: &[NodeId],
        label: &str,
        start: usize,
        end: usize,
    ) -> Vec<String>;
}

/// Produces the feature context for attaching the advance node to one node
/// of the right frontier.
pub trait AttachContextGenerator {
    fn context(
        &self,
        arena: &ParseArena,
        constituents: &[NodeId],
        index: usize,
        frontier: &[NodeId],
        position: usize,
    ) -> Vec<String>;
}

/// Language-specific head-percolation policy, loaded from a serialized rules
/// table by an external collaborator.
pub trait HeadRules {
    /// Picks the head among `constituents` for a node labeled `label`, or
    /// `None` when no rule applies.
    fn head(&self, arena: &ParseArena, constituents: &[NodeId], label: &str) -> Option<NodeId>;

    /// Tag labels treated as floating punctuation.
    fn punctuation_tags(&self) -> &FxHashSet<String>;
}

/// One node's contribution to a feature template: the primary feature, its
/// backoff form, and whether the template position is a unigram.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Cons {
    pub index: usize,
    pub feature: String,
    pub backoff: String,
    pub unigram: bool,
}

impl Cons {
    pub fn new(index: usize, feature: impl Into<String>, backoff: impl Into<String>, unigram: bool) -> Self {
        Self {
            index,
            feature: feature.into(),
            backoff: backoff.into(),
            unigram,
        }
    }
}

pub(crate) fn find_outcome(model: &dyn ScoreModel, name: &str) -> Option<usize> {
    (0..model.outcome_count()).find(|&ix| model.outcome(ix) == name)
}
