//! Statistical bottom-up constituency parser.
//!
//! A sentence enters as a flat sequence of token leaves under an incomplete
//! root and advances through beam-searched derivation stages: part-of-speech
//! tagging, chunking, then constituent building under a pluggable
//! [`AdvancePolicy`] until candidates reduce to a single `TOP` constituent.
//! All scoring is delegated to caller-supplied [`ScoreModel`]s and context
//! generators; this crate owns the derivation machinery, the shared-subtree
//! parse arena, and the treebank bracket format.

mod beam;
mod cache;
mod engine;
mod heap;
mod model;
mod strategy;
mod tree;
pub mod treebank;
mod types;

#[cfg(test)]
mod tests;

pub use beam::{BeamSearch, Sequence};
pub use cache::ContextCache;
pub use engine::{
    ChunkSequenceValidator, Parser, ParserConfig, SequenceModel, TaggedWord,
};
pub use heap::BoundedHeap;
pub use model::{
    AttachContextGenerator, CheckContextGenerator, Cons, ContextGenerator, HeadRules,
    NodeContextGenerator, ScoreModel, SequenceValidator,
};
pub use strategy::{
    AdvancePolicy, ChunkingPolicy, TreeInsertPolicy, DAUGHTER_OUTCOME, DONE_OUTCOME,
    SISTER_OUTCOME,
};
pub use tree::{ParseArena, ParseNode};
pub use types::{
    NodeId, ParseError, Span, COMPLETE_OUTCOME, CONT_PREFIX, DEFAULT_ADVANCE_MASS,
    DEFAULT_BEAM_SIZE, INCOMPLETE_OUTCOME, INC_LABEL, OTHER_OUTCOME, START_PREFIX, TOK_LABEL,
    TOP_LABEL,
};
