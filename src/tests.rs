use crate::beam::{BeamSearch, Sequence};
use crate::cache::ContextCache;
use crate::engine::{
    ChunkSequenceValidator, Parser, ParserConfig, SequenceModel, TaggedWord,
};
use crate::heap::BoundedHeap;
use crate::model::{
    AttachContextGenerator, CheckContextGenerator, Cons, ContextGenerator, HeadRules,
    NodeContextGenerator, ScoreModel, SequenceValidator,
};
use crate::strategy::{AdvancePolicy, ChunkingPolicy, TreeInsertPolicy, BUILT_COMPLETE};
use crate::tree::ParseArena;
use crate::treebank;
use crate::types::{
    NodeId, ParseError, Span, COMPLETE_OUTCOME, INC_LABEL, TOP_LABEL,
};
use proptest::prelude::*;
use rustc_hash::FxHashSet;

const TAG_OUTCOMES: &[&str] = &["DT", "NN", "VBZ", "."];
const CHUNK_OUTCOMES: &[&str] = &["S-NP", "C-NP", "O"];
const BUILD_OUTCOMES: &[&str] = &["S-TOP", "S-S", "C-S"];
const CHECK_OUTCOMES: &[&str] = &["c", "i"];

fn peaked(outcomes: &[&str], best: &str, peak: f64) -> Vec<f64> {
    let rest = (1.0 - peak) / (outcomes.len() - 1) as f64;
    outcomes
        .iter()
        .map(|&o| if o == best { peak } else { rest })
        .collect()
}

fn context_value<'a>(context: &'a [String], key: &str) -> Option<&'a str> {
    context.iter().find_map(|f| f.strip_prefix(key))
}

struct TagModel;

impl ScoreModel for TagModel {
    fn eval(&self, context: &[String]) -> Vec<f64> {
        let best = match context_value(context, "w=").unwrap_or("") {
            "the" | "The" => "DT",
            "dog" => "NN",
            "barks" => "VBZ",
            _ => ".",
        };
        peaked(TAG_OUTCOMES, best, 0.7)
    }

    fn outcome_count(&self) -> usize {
        TAG_OUTCOMES.len()
    }

    fn outcome(&self, index: usize) -> &str {
        TAG_OUTCOMES[index]
    }
}

struct WordContext;

impl ContextGenerator<String> for WordContext {
    fn context(&self, index: usize, input: &[String], _outcomes: &[String]) -> Vec<String> {
        vec![format!("w={}", input[index])]
    }
}

struct ChunkModel;

impl ScoreModel for ChunkModel {
    fn eval(&self, context: &[String]) -> Vec<f64> {
        let best = match context_value(context, "t=").unwrap_or("") {
            "DT" => "S-NP",
            "NN" => "C-NP",
            _ => "O",
        };
        peaked(CHUNK_OUTCOMES, best, 0.9)
    }

    fn outcome_count(&self) -> usize {
        CHUNK_OUTCOMES.len()
    }

    fn outcome(&self, index: usize) -> &str {
        CHUNK_OUTCOMES[index]
    }
}

struct TagContext;

impl ContextGenerator<TaggedWord> for TagContext {
    fn context(&self, index: usize, input: &[TaggedWord], _outcomes: &[String]) -> Vec<String> {
        vec![format!("t={}", input[index].tag)]
    }
}

struct BuildModel;

impl ScoreModel for BuildModel {
    fn eval(&self, context: &[String]) -> Vec<f64> {
        let best = match context_value(context, "ix=") {
            Some("0") => "S-S",
            _ => "C-S",
        };
        peaked(BUILD_OUTCOMES, best, 0.9)
    }

    fn outcome_count(&self) -> usize {
        BUILD_OUTCOMES.len()
    }

    fn outcome(&self, index: usize) -> &str {
        BUILD_OUTCOMES[index]
    }
}

struct IndexContext;

impl NodeContextGenerator for IndexContext {
    fn context(&self, _arena: &ParseArena, _constituents: &[NodeId], index: usize) -> Vec<String> {
        vec![format!("ix={index}")]
    }
}

/// Complete only when the run reaches the last top-level constituent.
struct CheckModel;

impl ScoreModel for CheckModel {
    fn eval(&self, context: &[String]) -> Vec<f64> {
        let end: usize = context_value(context, "end=")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let len: usize = context_value(context, "len=")
            .and_then(|v| v.parse().ok())
            .unwrap_or(1);
        let complete = if end + 1 == len { 0.9 } else { 0.04 };
        vec![complete, 1.0 - complete]
    }

    fn outcome_count(&self) -> usize {
        CHECK_OUTCOMES.len()
    }

    fn outcome(&self, index: usize) -> &str {
        CHECK_OUTCOMES[index]
    }
}

struct RunContext;

impl CheckContextGenerator for RunContext {
    fn context(
        &self,
        _arena: &ParseArena,
        constituents: &[NodeId],
        _label: &str,
        _start: usize,
        end: usize,
    ) -> Vec<String> {
        vec![format!("end={end}"), format!("len={}", constituents.len())]
    }
}

/// Builds an S over a noun phrase and says "done" for everything else.
struct InsertBuildModel;

const INSERT_BUILD_OUTCOMES: &[&str] = &["S", "VP", "d"];

impl ScoreModel for InsertBuildModel {
    fn eval(&self, context: &[String]) -> Vec<f64> {
        match context_value(context, "n=") {
            Some("NP") => vec![0.96, 0.02, 0.02],
            _ => vec![0.02, 0.02, 0.96],
        }
    }

    fn outcome_count(&self) -> usize {
        INSERT_BUILD_OUTCOMES.len()
    }

    fn outcome(&self, index: usize) -> &str {
        INSERT_BUILD_OUTCOMES[index]
    }
}

/// Daughter-attaches onto an S frontier node and nothing else.
struct InsertAttachModel;

impl ScoreModel for InsertAttachModel {
    fn eval(&self, context: &[String]) -> Vec<f64> {
        match context_value(context, "f=") {
            Some("S") => vec![0.96, 0.04],
            _ => vec![0.02, 0.98],
        }
    }

    fn outcome_count(&self) -> usize {
        2
    }

    fn outcome(&self, index: usize) -> &str {
        ["d", "s"][index]
    }
}

/// Complete only once the checked constituent covers the whole text.
struct InsertCheckModel;

impl ScoreModel for InsertCheckModel {
    fn eval(&self, context: &[String]) -> Vec<f64> {
        if context_value(context, "cover=") == Some("full") {
            vec![0.98, 0.02]
        } else {
            vec![0.02, 0.98]
        }
    }

    fn outcome_count(&self) -> usize {
        CHECK_OUTCOMES.len()
    }

    fn outcome(&self, index: usize) -> &str {
        CHECK_OUTCOMES[index]
    }
}

struct LabelContext;

impl NodeContextGenerator for LabelContext {
    fn context(&self, arena: &ParseArena, constituents: &[NodeId], index: usize) -> Vec<String> {
        vec![format!("n={}", arena.label(constituents[index]))]
    }
}

struct FrontierContext;

impl AttachContextGenerator for FrontierContext {
    fn context(
        &self,
        arena: &ParseArena,
        _constituents: &[NodeId],
        _index: usize,
        frontier: &[NodeId],
        position: usize,
    ) -> Vec<String> {
        vec![format!("f={}", arena.label(frontier[position]))]
    }
}

struct CoverageContext;

impl CheckContextGenerator for CoverageContext {
    fn context(
        &self,
        arena: &ParseArena,
        constituents: &[NodeId],
        _label: &str,
        start: usize,
        _end: usize,
    ) -> Vec<String> {
        let span = arena.span(constituents[start]);
        let full = span.start == 0 && span.end == arena.text().len();
        vec![format!("cover={}", if full { "full" } else { "part" })]
    }
}

/// Constant-distribution model for driving a strategy directly.
struct FixedModel {
    outcomes: Vec<String>,
    probs: Vec<f64>,
}

impl FixedModel {
    fn new(outcomes: &[&str], probs: &[f64]) -> Self {
        Self {
            outcomes: outcomes.iter().map(|&o| o.to_string()).collect(),
            probs: probs.to_vec(),
        }
    }
}

impl ScoreModel for FixedModel {
    fn eval(&self, _context: &[String]) -> Vec<f64> {
        self.probs.clone()
    }

    fn outcome_count(&self) -> usize {
        self.outcomes.len()
    }

    fn outcome(&self, index: usize) -> &str {
        &self.outcomes[index]
    }
}

struct NullNodeContext;

impl NodeContextGenerator for NullNodeContext {
    fn context(&self, _arena: &ParseArena, _constituents: &[NodeId], _index: usize) -> Vec<String> {
        Vec::new()
    }
}

struct NullAttachContext;

impl AttachContextGenerator for NullAttachContext {
    fn context(
        &self,
        _arena: &ParseArena,
        _constituents: &[NodeId],
        _index: usize,
        _frontier: &[NodeId],
        _position: usize,
    ) -> Vec<String> {
        Vec::new()
    }
}

struct NullCheckContext;

impl CheckContextGenerator for NullCheckContext {
    fn context(
        &self,
        _arena: &ParseArena,
        _constituents: &[NodeId],
        _label: &str,
        _start: usize,
        _end: usize,
    ) -> Vec<String> {
        Vec::new()
    }
}

/// Picks the rightmost verb if one is present, the rightmost child
/// otherwise.
#[derive(Default)]
struct VerbHeadRules {
    punct: FxHashSet<String>,
}

impl HeadRules for VerbHeadRules {
    fn head(&self, arena: &ParseArena, constituents: &[NodeId], _label: &str) -> Option<NodeId> {
        constituents
            .iter()
            .rev()
            .find(|&&c| arena.label(c) == "VBZ")
            .copied()
            .or_else(|| constituents.last().copied())
    }

    fn punctuation_tags(&self) -> &FxHashSet<String> {
        &self.punct
    }
}

struct NoHeadRules {
    punct: FxHashSet<String>,
}

impl HeadRules for NoHeadRules {
    fn head(&self, _arena: &ParseArena, _constituents: &[NodeId], _label: &str) -> Option<NodeId> {
        None
    }

    fn punctuation_tags(&self) -> &FxHashSet<String> {
        &self.punct
    }
}

fn tag_node(arena: &mut ParseArena, root: NodeId, leaf: NodeId, label: &str) -> NodeId {
    let span = arena.span(leaf).clone();
    let node = arena.new_node(span, label, 0.0);
    arena.set_head(node, leaf);
    arena.insert(root, node).expect("tag node fits under root");
    node
}

#[test]
fn span_containment_and_crossing() {
    let outer = Span::new(0, 10);
    let inner = Span::new(2, 5);
    let crossing = Span::new(4, 12);
    assert!(outer.contains(&inner));
    assert!(!inner.contains(&outer));
    assert!(outer.contains(&outer));
    assert!(outer.crosses(&crossing));
    assert!(crossing.crosses(&outer));
    assert!(!outer.crosses(&inner));
    assert!(outer.intersects(&crossing));
    assert!(!Span::new(0, 2).intersects(&Span::new(5, 7)));
    assert!(outer.contains_index(9));
    assert!(!outer.contains_index(10));
}

#[test]
fn span_orders_parents_before_children() {
    let mut spans = vec![Span::new(2, 5), Span::new(0, 10), Span::new(0, 4)];
    spans.sort();
    assert_eq!((spans[0].start, spans[0].end), (0, 10));
    assert_eq!((spans[1].start, spans[1].end), (0, 4));
    assert_eq!((spans[2].start, spans[2].end), (2, 5));
}

#[test]
fn drop_overlapping_keeps_first_of_each_run() {
    let spans = vec![
        Span::new(4, 6),
        Span::new(0, 3),
        Span::new(2, 5),
        Span::new(8, 9),
    ];
    let kept = Span::drop_overlapping(spans);
    let points: Vec<(usize, usize)> = kept.iter().map(|s| (s.start, s.end)).collect();
    assert_eq!(points, vec![(0, 3), (4, 6), (8, 9)]);
}

#[test]
fn bounded_heap_retains_smallest() {
    let mut heap = BoundedHeap::new(3);
    for v in [5, 1, 4, 2, 3] {
        heap.add(v);
    }
    assert_eq!(heap.len(), 3);
    assert_eq!(heap.first(), Some(&1));
    let mut drained = Vec::new();
    while let Some(v) = heap.extract() {
        drained.push(v);
    }
    assert_eq!(drained, vec![1, 2, 3]);
}

#[test]
fn bounded_heap_rejects_past_worst_bound_when_full() {
    let mut heap = BoundedHeap::new(2);
    heap.add(1);
    heap.add(2);
    heap.add(10);
    assert_eq!(heap.len(), 2);
    assert_eq!(heap.first(), Some(&1));
    assert_eq!(heap.last(), Some(&2));
}

#[test]
fn bounded_heap_keeps_best_elements_across_evictions() {
    // Once the bound goes stale the heap must still retain the best seen.
    let mut heap = BoundedHeap::new(1);
    for v in [3, 1, 2] {
        heap.add(v);
    }
    assert_eq!(heap.first(), Some(&1));

    let mut heap = BoundedHeap::new(2);
    for v in [3, 5, 1, 4] {
        heap.add(v);
    }
    let mut drained = Vec::new();
    while let Some(v) = heap.extract() {
        drained.push(v);
    }
    assert_eq!(drained, vec![1, 3]);
}

#[test]
fn bounded_heap_zero_capacity_rejects_everything() {
    let mut heap = BoundedHeap::new(0);
    heap.add(7);
    assert!(heap.is_empty());
    assert_eq!(heap.extract(), None);
}

#[test]
fn context_cache_evicts_least_recently_used() {
    let mut cache = ContextCache::new(2);
    cache.put("a".to_string(), vec![1.0]);
    cache.put("b".to_string(), vec![2.0]);
    assert_eq!(cache.get("a"), Some(&[1.0][..]));
    cache.put("c".to_string(), vec![3.0]);
    assert_eq!(cache.get("b"), None);
    assert_eq!(cache.get("a"), Some(&[1.0][..]));
    assert_eq!(cache.get("c"), Some(&[3.0][..]));
    assert_eq!(cache.len(), 2);
}

#[test]
fn context_cache_clear_forgets_everything() {
    let mut cache = ContextCache::new(4);
    cache.put("a".to_string(), vec![1.0]);
    cache.clear();
    assert!(cache.is_empty());
    assert_eq!(cache.get("a"), None);
    cache.put("b".to_string(), vec![2.0]);
    assert_eq!(cache.get("b"), Some(&[2.0][..]));
}

#[test]
fn sequence_extension_is_persistent() {
    let base = Sequence::empty();
    let one = base.extended("x", 0.5);
    let two = one.extended("y", 0.25);
    assert!(base.outcomes().is_empty());
    assert_eq!(one.outcomes(), ["x"]);
    assert_eq!(two.outcomes(), ["x", "y"]);
    assert_eq!(two.probs(), [0.5, 0.25]);
    let expected = 0.5f64.ln() + 0.25f64.ln();
    assert!((two.score() - expected).abs() < 1e-12);
}

#[test]
fn sequence_orders_best_first() {
    let better = Sequence::empty().extended("x", 0.9);
    let worse = Sequence::empty().extended("y", 0.1);
    assert!(better < worse);
    let mut heap = BoundedHeap::new(2);
    heap.add(worse.clone());
    heap.add(better.clone());
    assert_eq!(heap.first(), Some(&better));
}

#[test]
fn beam_search_finds_best_sequence() {
    struct Flip;
    impl ScoreModel for Flip {
        fn eval(&self, context: &[String]) -> Vec<f64> {
            if context_value(context, "i=") == Some("0") {
                vec![0.8, 0.2]
            } else {
                vec![0.3, 0.7]
            }
        }
        fn outcome_count(&self) -> usize {
            2
        }
        fn outcome(&self, index: usize) -> &str {
            ["x", "y"][index]
        }
    }
    struct IxContext;
    impl ContextGenerator<u32> for IxContext {
        fn context(&self, index: usize, _input: &[u32], _outcomes: &[String]) -> Vec<String> {
            vec![format!("i={index}")]
        }
    }
    let model = Flip;
    let cgen = IxContext;
    let mut beam = BeamSearch::new(4, &model, &cgen).with_cache(16);
    let best = beam.best_sequence(&[0, 0]).expect("non-empty input");
    assert_eq!(best.outcomes(), ["x", "y"]);
    let expected = 0.8f64.ln() + 0.7f64.ln();
    assert!((best.score() - expected).abs() < 1e-12);

    let top = beam.best_sequences(1, &[0, 0]);
    assert_eq!(top[0].outcomes(), best.outcomes());

    let all = beam.best_sequences(10, &[0, 0]);
    assert_eq!(all.len(), 4);
    assert_eq!(all[0].outcomes(), ["x", "y"]);
    assert!(all.windows(2).all(|w| w[0].score() >= w[1].score()));
}

#[test]
fn beam_search_empty_input_yields_nothing() {
    let model = TagModel;
    let cgen = WordContext;
    let mut beam = BeamSearch::new(4, &model, &cgen);
    assert!(beam.best_sequences(3, &[]).is_empty());
    assert!(beam.best_sequence(&[]).is_none());
}

#[test]
fn beam_search_must_advance_past_rejecting_validator() {
    struct RejectAll;
    impl SequenceValidator<String> for RejectAll {
        fn valid(
            &self,
            _index: usize,
            _input: &[String],
            _outcomes: &[String],
            _candidate: &str,
        ) -> bool {
            false
        }
    }
    let model = TagModel;
    let cgen = WordContext;
    let validator = RejectAll;
    let mut beam = BeamSearch::new(4, &model, &cgen).with_validator(&validator);
    let input = vec!["the".to_string(), "dog".to_string()];
    let best = beam.best_sequence(&input).expect("fallback still advances");
    assert_eq!(best.outcomes(), ["DT", "NN"]);
}

#[test]
fn chunk_validator_requires_matching_open_chunk() {
    let v = ChunkSequenceValidator;
    let input: Vec<TaggedWord> = Vec::new();
    let s_np = vec!["S-NP".to_string()];
    let c_np = vec!["C-NP".to_string()];
    let other = vec!["O".to_string()];
    assert!(v.valid(0, &input, &[], "O"));
    assert!(v.valid(0, &input, &[], "S-NP"));
    assert!(!v.valid(0, &input, &[], "C-NP"));
    assert!(v.valid(1, &input, &s_np, "C-NP"));
    assert!(v.valid(2, &input, &c_np, "C-NP"));
    assert!(!v.valid(1, &input, &other, "C-NP"));
    assert!(!v.valid(1, &input, &s_np, "C-VP"));
}

#[test]
fn from_tokens_builds_leaves_with_ordinals() {
    let (arena, root) = ParseArena::from_tokens("the  dog barks");
    assert_eq!(arena.label(root), INC_LABEL);
    let leaves = arena.children(root).to_vec();
    assert_eq!(leaves.len(), 3);
    assert_eq!(arena.span_text(leaves[0]), "the");
    assert_eq!(arena.span_text(leaves[1]), "dog");
    assert_eq!(arena.span_text(leaves[2]), "barks");
    assert_eq!(arena.head_index(leaves[2]), 2);
    assert_eq!(arena.span(root).end, "the  dog barks".len());
}

#[test]
fn insert_rejects_uncontained_span() {
    let (mut arena, root) = ParseArena::from_tokens("a b");
    let node = arena.new_node(Span::new(0, 99), "NP", 0.0);
    let err = arena.insert(root, node).unwrap_err();
    assert!(matches!(err, ParseError::SpanNotContained { end: 99, .. }));
}

#[test]
fn insert_reparents_contained_children() {
    let (mut arena, root) = ParseArena::from_tokens("the dog barks");
    let leaves = arena.children(root).to_vec();
    let dt = tag_node(&mut arena, root, leaves[0], "DT");
    let nn = tag_node(&mut arena, root, leaves[1], "NN");
    tag_node(&mut arena, root, leaves[2], "VBZ");
    let np = arena.new_node(Span::new(0, 7), "NP", 0.0);
    arena.set_head(np, nn);
    arena.insert(root, np).expect("np fits under root");
    assert_eq!(arena.child_count(root), 2);
    assert_eq!(arena.children(root)[0], np);
    assert_eq!(arena.children(np), &[dt, nn]);
    assert_eq!(arena.head_index(np), 1);
}

#[test]
fn clone_node_shares_subtrees() {
    let (mut arena, root) = ParseArena::from_tokens("a b");
    let leaves = arena.children(root).to_vec();
    let clone = arena.clone_node(root);
    assert_eq!(arena.children(clone), arena.children(root));
    let extra = arena.new_node(Span::new(0, 1), "X", 0.0);
    arena.replace_child(clone, 0, extra);
    assert_eq!(arena.children(root)[0], leaves[0]);
    assert_eq!(arena.children(clone)[0], extra);
}

#[test]
fn relabel_child_clones_on_write() {
    let (mut arena, root) = ParseArena::from_tokens("a b");
    let original_child = arena.children(root)[0];
    let clone = arena.clone_node(root);
    let labeled = arena.relabel_child(clone, 0, "S-NP");
    assert_eq!(arena.outcome(labeled), Some("S-NP"));
    assert_eq!(arena.outcome(original_child), None);
    assert_eq!(arena.children(root)[0], original_child);
    assert_eq!(arena.children(clone)[0], labeled);
}

#[test]
fn collapse_punctuation_floats_punct_onto_neighbors() {
    let mut arena = ParseArena::new("a , b");
    let left = arena.new_node(Span::new(0, 1), "A", 0.0);
    let comma = arena.new_node(Span::new(2, 3), ",", 0.0);
    let right = arena.new_node(Span::new(4, 5), "B", 0.0);
    let punct: FxHashSet<String> = [",".to_string()].into_iter().collect();
    let collapsed = arena.collapse_punctuation(&[left, comma, right], &punct);
    assert_eq!(collapsed, vec![left, right]);
    assert_eq!(arena.next_punctuation(left), &[comma]);
    assert_eq!(arena.prev_punctuation(right), &[comma]);
    // A second collapse over shared nodes must not double the attachments.
    let again = arena.collapse_punctuation(&[left, comma, right], &punct);
    assert_eq!(again, vec![left, right]);
    assert_eq!(arena.next_punctuation(left), &[comma]);
}

#[test]
fn expand_top_pulls_siblings_inside() {
    let mut arena = ParseArena::new("( a b )");
    let root = arena.new_node(Span::new(0, 7), INC_LABEL, 0.0);
    let lead = arena.new_node(Span::new(0, 1), "-LRB-", 0.0);
    let core = arena.new_node(Span::new(2, 5), "S", 0.0);
    let a = arena.new_node(Span::new(2, 3), "A", 0.0);
    let b = arena.new_node(Span::new(4, 5), "B", 0.0);
    let trail = arena.new_node(Span::new(6, 7), "-RRB-", 0.0);
    arena.add_child(core, a);
    arena.add_child(core, b);
    for child in [lead, core, trail] {
        arena.add_child(root, child);
    }
    arena.expand_top(root, core);
    assert_eq!(arena.children(root), &[core]);
    assert_eq!(arena.children(core), &[lead, a, b, trail]);
    assert_eq!(arena.span(core).start, 0);
    assert_eq!(arena.span(core).end, 7);
}

#[test]
fn prune_unary_splices_same_label_chains() {
    let (mut arena, root) =
        treebank::parse("(TOP (S (S (NP (DT the)))))").expect("well-formed bracketing");
    arena.prune_unary(root);
    assert_eq!(arena.show(root), "(TOP (S (NP (DT the))))");
}

#[test]
fn right_frontier_is_deepest_first() {
    let (arena, root) = treebank::parse("(TOP (S (NP (DT the) (NN dog)) (VP (VBZ barks))))")
        .expect("well-formed bracketing");
    let punct = FxHashSet::default();
    let frontier = arena.right_frontier(root, &punct);
    assert_eq!(frontier.len(), 2);
    assert_eq!(arena.label(frontier[0]), "VP");
    assert_eq!(arena.label(frontier[1]), "S");
}

#[test]
fn adjoin_wraps_last_child_with_sister() {
    let (mut arena, root) = ParseArena::from_tokens("the dog barks");
    let leaves = arena.children(root).to_vec();
    let dt = tag_node(&mut arena, root, leaves[0], "DT");
    let nn = tag_node(&mut arena, root, leaves[1], "NN");
    let vbz = tag_node(&mut arena, root, leaves[2], "VBZ");
    let np = arena.new_node(Span::new(0, 7), "NP", 0.0);
    arena.set_head(np, nn);
    arena.insert(root, np).expect("np fits under root");
    let parent = arena.new_node(Span::new(0, 7), "S", 0.0);
    arena.add_child(parent, np);
    arena.set_head(parent, np);
    let rules = VerbHeadRules::default();
    let adjoined = arena.adjoin(parent, vbz, &rules).expect("head rules apply");
    assert_eq!(arena.children(parent), &[adjoined]);
    assert_eq!(arena.label(adjoined), "NP");
    assert_eq!(arena.children(adjoined), &[np, vbz]);
    assert_eq!(arena.span(parent).end, arena.text().len());
    assert_eq!(arena.head_index(adjoined), 2);
    assert_eq!(arena.children(dt).len(), 1);
}

#[test]
fn adjoin_onto_childless_node_fails() {
    let mut arena = ParseArena::new("a b");
    let empty = arena.new_node(Span::new(0, 1), "NP", 0.0);
    let sister = arena.new_node(Span::new(2, 3), "VBZ", 0.0);
    let rules = VerbHeadRules::default();
    let err = arena.adjoin(empty, sister, &rules).unwrap_err();
    assert!(matches!(err, ParseError::NoChildren { .. }));
}

#[test]
fn set_parents_covers_reachable_subtree() {
    let (mut arena, root) = treebank::parse("(TOP (S (NP (DT the)) (VBZ barks)))")
        .expect("well-formed bracketing");
    arena.set_parents(root);
    assert_eq!(arena.parent(root), root);
    let s = arena.children(root)[0];
    assert_eq!(arena.parent(s), root);
    let np = arena.children(s)[0];
    assert_eq!(arena.parent(np), s);
}

#[test]
fn add_without_applicable_head_rule_fails() {
    let (mut arena, root) = ParseArena::from_tokens("a b");
    let leaves = arena.children(root).to_vec();
    let parent = arena.new_node(Span::new(0, 1), "NP", 0.0);
    arena.add_child(parent, leaves[0]);
    let rules = NoHeadRules {
        punct: FxHashSet::default(),
    };
    let err = arena.add(parent, leaves[1], &rules).unwrap_err();
    assert!(matches!(err, ParseError::NoHead { .. }));
}

#[test]
fn treebank_reader_reconstructs_text_and_spans() {
    let line = "(TOP (S (NP (DT the) (NN dog)) (VBZ barks)))";
    let (arena, root) = treebank::parse(line).expect("well-formed bracketing");
    assert_eq!(arena.text(), "the dog barks");
    assert_eq!(arena.label(root), TOP_LABEL);
    assert_eq!(arena.span(root).start, 0);
    assert_eq!(arena.span(root).end, arena.text().len());
    let s = arena.children(root)[0];
    let np = arena.children(s)[0];
    assert_eq!(arena.span_text(np), "the dog");
    assert_eq!(arena.show(root), line);
}

#[test]
fn treebank_escapes_round_trip() {
    assert_eq!(treebank::encode_token("("), "-LRB-");
    assert_eq!(treebank::decode_token("-RRB-"), ")");
    assert_eq!(treebank::decode_token("dog"), "dog");
    let line = "(TOP (-LRB- -LRB-) (NN dog) (-RRB- -RRB-))";
    let (arena, root) = treebank::parse(line).expect("well-formed bracketing");
    assert_eq!(arena.text(), "( dog )");
    assert_eq!(arena.show(root), line);
}

#[test]
fn treebank_drops_function_tags_unless_retained() {
    let line = "(TOP (S (NP-SBJ (DT the) (NN dog)) (VP-2 (VBZ barks))))";
    let (arena, root) = treebank::parse(line).expect("well-formed bracketing");
    assert_eq!(
        arena.show(root),
        "(TOP (S (NP (DT the) (NN dog)) (VP (VBZ barks))))"
    );
    let (arena, root) =
        treebank::parse_retaining_function_tags(line).expect("well-formed bracketing");
    assert_eq!(arena.show(root), line);

    // Escape-token labels keep their dashes either way.
    let escaped = "(TOP (-LRB- -LRB-) (NN=1 dog))";
    let (arena, root) = treebank::parse(escaped).expect("well-formed bracketing");
    assert_eq!(arena.show(root), "(TOP (-LRB- -LRB-) (NN dog))");
}

#[test]
fn treebank_rejects_malformed_input() {
    for bad in ["(TOP (NN dog)", "dog)", "(TOP ())", "", "(TOP (NN dog)) (S x)"] {
        let err = treebank::parse(bad).err().unwrap();
        assert!(matches!(err, ParseError::Bracketing { .. }), "{bad}");
    }
}

#[test]
fn chunking_policy_requires_check_outcomes() {
    let build = FixedModel::new(&["S-NP"], &[1.0]);
    let bad_check = FixedModel::new(&["c"], &[1.0]);
    let build_cgen = NullNodeContext;
    let check_cgen = NullCheckContext;
    let err = ChunkingPolicy::new(&build, &bad_check, &build_cgen, &check_cgen)
        .err()
        .unwrap();
    assert!(matches!(err, ParseError::MissingOutcome(o) if o == "i"));
}

#[test]
fn tree_insert_policy_builds_and_attaches() {
    let (mut arena, root) = ParseArena::from_tokens("the dog barks");
    let leaves = arena.children(root).to_vec();
    tag_node(&mut arena, root, leaves[0], "DT");
    let nn = tag_node(&mut arena, root, leaves[1], "NN");
    let vbz = tag_node(&mut arena, root, leaves[2], "VBZ");
    let np = arena.new_node(Span::new(0, 7), "NP", 0.0);
    arena.set_head(np, nn);
    arena.insert(root, np).expect("np fits under root");
    arena.set_outcome(np, BUILT_COMPLETE);

    let build = FixedModel::new(&["VP", "d"], &[0.9, 0.1]);
    let attach = FixedModel::new(&["d", "s"], &[0.5, 0.45]);
    let check = FixedModel::new(&["c", "i"], &[0.96, 0.04]);
    let build_cgen = NullNodeContext;
    let attach_cgen = NullAttachContext;
    let check_cgen = NullCheckContext;
    let policy = TreeInsertPolicy::new(
        &build,
        &attach,
        &check,
        &build_cgen,
        &attach_cgen,
        &check_cgen,
    )
    .expect("required outcomes present");
    let rules = VerbHeadRules::default();

    let successors = policy
        .advance(&mut arena, root, 0.95, &rules)
        .expect("advance succeeds");
    assert_eq!(successors.len(), 2);

    // Build successor: a VP wraps the verb at the top level.
    let built = successors[0];
    assert_eq!(arena.child_count(built), 2);
    let vp = arena.children(built)[1];
    assert_eq!(arena.label(vp), "VP");
    assert_eq!(arena.children(vp), &[vbz]);
    assert_eq!(arena.outcome(vp), Some(COMPLETE_OUTCOME));

    // Attach successor: the verb sister-adjoins onto the completed NP.
    let attached = successors[1];
    assert_eq!(arena.child_count(attached), 1);
    let adjoined = arena.children(attached)[0];
    assert_eq!(arena.label(adjoined), "NP");
    assert_eq!(arena.children(adjoined), &[np, vbz]);
    assert_eq!(arena.span(adjoined).end, arena.text().len());
    assert_eq!(arena.outcome(adjoined), Some(COMPLETE_OUTCOME));
    assert_eq!(arena.head_index(adjoined), 2);

    // The shared input candidate is untouched.
    assert_eq!(arena.child_count(root), 2);
    assert_eq!(arena.children(root)[1], vbz);
}

#[test]
fn parses_sentence_with_chunking_strategy() {
    let tag_model = TagModel;
    let tag_cgen = WordContext;
    let chunk_model = ChunkModel;
    let chunk_cgen = TagContext;
    let build_model = BuildModel;
    let build_cgen = IndexContext;
    let check_model = CheckModel;
    let check_cgen = RunContext;
    let policy = ChunkingPolicy::new(&build_model, &check_model, &build_cgen, &check_cgen)
        .expect("check outcomes present");
    let rules = VerbHeadRules::default();
    let parser = Parser::new(
        SequenceModel {
            model: &tag_model,
            context_gen: &tag_cgen,
        },
        SequenceModel {
            model: &chunk_model,
            context_gen: &chunk_cgen,
        },
        &policy,
        &rules,
        ParserConfig::default(),
    );

    let (arena, best) = parser.parse_text("The dog barks .").expect("parse succeeds");
    assert_eq!(arena.label(best), TOP_LABEL);
    assert_eq!(arena.child_count(best), 1);
    let s = arena.children(best)[0];
    assert_eq!(arena.label(s), "S");
    assert_eq!(arena.span(s).start, 0);
    assert_eq!(arena.span(s).end, arena.text().len());
    assert_eq!(arena.head_index(s), 2);
    assert_eq!(arena.parent(s), best);
    assert_eq!(
        arena.show(best),
        "(TOP (S (NP (DT The) (NN dog)) (VBZ barks) (. .)))"
    );
}

#[test]
fn parses_sentence_with_tree_insert_strategy() {
    let tag_model = TagModel;
    let tag_cgen = WordContext;
    let chunk_model = ChunkModel;
    let chunk_cgen = TagContext;
    let build_model = InsertBuildModel;
    let attach_model = InsertAttachModel;
    let check_model = InsertCheckModel;
    let build_cgen = LabelContext;
    let attach_cgen = FrontierContext;
    let check_cgen = CoverageContext;
    let policy = TreeInsertPolicy::new(
        &build_model,
        &attach_model,
        &check_model,
        &build_cgen,
        &attach_cgen,
        &check_cgen,
    )
    .expect("required outcomes present");
    let rules = VerbHeadRules::default();
    let parser = Parser::new(
        SequenceModel {
            model: &tag_model,
            context_gen: &tag_cgen,
        },
        SequenceModel {
            model: &chunk_model,
            context_gen: &chunk_cgen,
        },
        &policy,
        &rules,
        ParserConfig::default(),
    );

    // The NP chunk is grown into an S, marked done, and the verb
    // daughter-attaches onto it to complete the derivation.
    let (arena, best) = parser.parse_text("the dog barks").expect("parse succeeds");
    assert_eq!(arena.label(best), TOP_LABEL);
    assert_eq!(arena.child_count(best), 1);
    let s = arena.children(best)[0];
    assert_eq!(arena.label(s), "S");
    assert_eq!(arena.span(s).start, 0);
    assert_eq!(arena.span(s).end, arena.text().len());
    assert_eq!(arena.head_index(s), 2);
    assert_eq!(
        arena.show(best),
        "(TOP (S (NP (DT the) (NN dog)) (VBZ barks)))"
    );
}

#[test]
fn single_word_completes_at_the_tagging_stage() {
    let tag_model = TagModel;
    let tag_cgen = WordContext;
    let chunk_model = ChunkModel;
    let chunk_cgen = TagContext;
    let build_model = BuildModel;
    let build_cgen = IndexContext;
    let check_model = CheckModel;
    let check_cgen = RunContext;
    let policy = ChunkingPolicy::new(&build_model, &check_model, &build_cgen, &check_cgen)
        .expect("check outcomes present");
    let rules = VerbHeadRules::default();
    let parser = Parser::new(
        SequenceModel {
            model: &tag_model,
            context_gen: &tag_cgen,
        },
        SequenceModel {
            model: &chunk_model,
            context_gen: &chunk_cgen,
        },
        &policy,
        &rules,
        ParserConfig::default(),
    );
    let (arena, best) = parser.parse_text("barks").expect("parse succeeds");
    assert_eq!(arena.show(best), "(TOP (VBZ barks))");
}

#[test]
fn empty_input_returns_bare_root() {
    let tag_model = TagModel;
    let tag_cgen = WordContext;
    let chunk_model = ChunkModel;
    let chunk_cgen = TagContext;
    let build_model = BuildModel;
    let build_cgen = IndexContext;
    let check_model = CheckModel;
    let check_cgen = RunContext;
    let policy = ChunkingPolicy::new(&build_model, &check_model, &build_cgen, &check_cgen)
        .expect("check outcomes present");
    let rules = VerbHeadRules::default();
    let parser = Parser::new(
        SequenceModel {
            model: &tag_model,
            context_gen: &tag_cgen,
        },
        SequenceModel {
            model: &chunk_model,
            context_gen: &chunk_cgen,
        },
        &policy,
        &rules,
        ParserConfig::default(),
    );
    let (arena, best) = parser.parse_text("").expect("parse succeeds");
    assert_eq!(arena.label(best), INC_LABEL);
    assert_eq!(arena.child_count(best), 0);
}

#[test]
fn tag_top_k_ranks_sequences() {
    let tag_model = TagModel;
    let tag_cgen = WordContext;
    let chunk_model = ChunkModel;
    let chunk_cgen = TagContext;
    let build_model = BuildModel;
    let build_cgen = IndexContext;
    let check_model = CheckModel;
    let check_cgen = RunContext;
    let policy = ChunkingPolicy::new(&build_model, &check_model, &build_cgen, &check_cgen)
        .expect("check outcomes present");
    let rules = VerbHeadRules::default();
    let parser = Parser::new(
        SequenceModel {
            model: &tag_model,
            context_gen: &tag_cgen,
        },
        SequenceModel {
            model: &chunk_model,
            context_gen: &chunk_cgen,
        },
        &policy,
        &rules,
        ParserConfig::default(),
    );
    let words: Vec<String> = ["the", "dog"].iter().map(|w| w.to_string()).collect();
    let sequences = parser.tag_top_k(&words, 3);
    assert_eq!(sequences.len(), 3);
    assert_eq!(sequences[0].outcomes(), ["DT", "NN"]);
    assert!(sequences[0].score() >= sequences[1].score());

    let tagged = vec![
        TaggedWord {
            word: "the".to_string(),
            tag: "DT".to_string(),
        },
        TaggedWord {
            word: "dog".to_string(),
            tag: "NN".to_string(),
        },
    ];
    let chunks = parser.chunk_top_k(&tagged, 1);
    assert_eq!(chunks[0].outcomes(), ["S-NP", "C-NP"]);
}

#[test]
fn cons_carries_backoff_features() {
    let cons = Cons::new(2, "VBZ|barks", "VBZ", true);
    assert_eq!(cons.index, 2);
    assert_eq!(cons.feature, "VBZ|barks");
    assert_eq!(cons.backoff, "VBZ");
    assert!(cons.unigram);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn bounded_heap_never_exceeds_capacity(
        capacity in 1usize..8,
        values in prop::collection::vec(-100i32..100, 0..40),
    ) {
        let mut heap = BoundedHeap::new(capacity);
        for &v in &values {
            heap.add(v);
            prop_assert!(heap.len() <= capacity);
        }
        if let Some(&min) = values.iter().min() {
            prop_assert_eq!(heap.first(), Some(&min));
        }
        let mut drained = Vec::new();
        while let Some(v) = heap.extract() {
            drained.push(v);
        }
        let mut sorted = drained.clone();
        sorted.sort_unstable();
        prop_assert_eq!(drained, sorted);
    }

    #[test]
    fn drop_overlapping_leaves_disjoint_spans(
        raw in prop::collection::vec((0usize..20, 1usize..5), 0..12),
    ) {
        let spans: Vec<Span> = raw.iter().map(|&(s, l)| Span::new(s, s + l)).collect();
        let kept = Span::drop_overlapping(spans);
        for pair in kept.windows(2) {
            prop_assert!(!pair[0].intersects(&pair[1]));
        }
    }

    #[test]
    fn context_cache_stays_bounded_and_consistent(
        keys in prop::collection::vec("[a-e]", 1..30),
    ) {
        let mut cache = ContextCache::new(3);
        for (ix, key) in keys.iter().enumerate() {
            cache.put(key.clone(), vec![ix as f64]);
            prop_assert!(cache.len() <= 3);
            prop_assert_eq!(cache.get(key), Some(&[ix as f64][..]));
        }
    }
}
