use thiserror::Error;

/// Label of the root node of a finished parse.
pub const TOP_LABEL: &str = "TOP";
/// Label of a token leaf; a node whose sole child carries this label is a
/// part-of-speech tag node.
pub const TOK_LABEL: &str = "TK";
/// Label of the root node of an unfinished derivation.
pub const INC_LABEL: &str = "INC";
/// Outcome prefix marking the first node of a new constituent.
pub const START_PREFIX: &str = "S-";
/// Outcome prefix marking the continuation of the current constituent.
pub const CONT_PREFIX: &str = "C-";
/// Outcome marking a node that belongs to no constituent.
pub const OTHER_OUTCOME: &str = "O";
/// Check-model outcome naming a reducible (complete) constituent.
pub const COMPLETE_OUTCOME: &str = "c";
/// Check-model outcome naming a constituent that must keep growing.
pub const INCOMPLETE_OUTCOME: &str = "i";

pub const DEFAULT_BEAM_SIZE: usize = 20;
pub const DEFAULT_ADVANCE_MASS: f64 = 0.95;

pub(crate) const PROB_FLOOR: f64 = 1e-10;
pub(crate) const SEQUENCE_SCORE_FLOOR: f64 = -100_000.0;
pub(crate) const CONTEXT_CACHE_FACTOR: usize = 100;

/// Index of a node in a [`crate::tree::ParseArena`].
pub type NodeId = u32;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed bracket string at offset {offset}: {message}")]
    Bracketing { offset: usize, message: String },
    #[error("span [{start}, {end}) is not contained by the target span [{target_start}, {target_end})")]
    SpanNotContained {
        start: usize,
        end: usize,
        target_start: usize,
        target_end: usize,
    },
    #[error("head rules produced no head for a {label:?} constituent")]
    NoHead { label: String },
    #[error("cannot adjoin onto a childless {label:?} node")]
    NoChildren { label: String },
    #[error("beam search produced no sequence")]
    NoSequence,
    #[error("scoring model is missing required outcome {0:?}")]
    MissingOutcome(String),
}

/// Half-open interval `[start, end)` over the source text, with an optional
/// type tag and a probability. The probability takes no part in equality or
/// ordering.
#[derive(Clone, Debug)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub label: Option<String>,
    pub prob: f64,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "span start {start} exceeds end {end}");
        Self {
            start,
            end,
            label: None,
            prob: 0.0,
        }
    }

    pub fn with_label(start: usize, end: usize, label: impl Into<String>) -> Self {
        let mut span = Self::new(start, end);
        span.label = Some(label.into());
        span
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn contains_index(&self, index: usize) -> bool {
        self.start <= index && index < self.end
    }

    /// True when the spans overlap without either containing the other.
    pub fn crosses(&self, other: &Span) -> bool {
        !self.contains(other)
            && !other.contains(self)
            && ((self.start <= other.start && other.start < self.end)
                || (other.start <= self.start && self.start < other.end))
    }

    pub fn intersects(&self, other: &Span) -> bool {
        self.contains(other)
            || other.contains(self)
            || (self.start <= other.start && other.start < self.end)
            || (other.start <= self.start && self.start < other.end)
    }

    /// Sorts the spans and keeps the first of every intersecting run.
    pub fn drop_overlapping(mut spans: Vec<Span>) -> Vec<Span> {
        spans.sort();
        let mut kept: Vec<Span> = Vec::with_capacity(spans.len());
        for span in spans {
            match kept.last() {
                Some(last) if last.intersects(&span) => {}
                _ => kept.push(span),
            }
        }
        kept
    }
}

impl PartialEq for Span {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start && self.end == other.end && self.label == other.label
    }
}

impl Eq for Span {}

impl PartialOrd for Span {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Span {
    /// Start ascending, then end descending, so a parent orders before its
    /// children.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.start
            .cmp(&other.start)
            .then_with(|| other.end.cmp(&self.end))
            .then_with(|| self.label.cmp(&other.label))
    }
}
