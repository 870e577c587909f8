use std::cmp::Ordering;
use std::time::Instant;

use crate::beam::{BeamSearch, Sequence};
use crate::heap::BoundedHeap;
use crate::model::{ContextGenerator, HeadRules, ScoreModel, SequenceValidator};
use crate::strategy::AdvancePolicy;
use crate::tree::ParseArena;
use crate::types::{
    NodeId, ParseError, Span, CONTEXT_CACHE_FACTOR, CONT_PREFIX, DEFAULT_ADVANCE_MASS,
    DEFAULT_BEAM_SIZE, PROB_FLOOR, START_PREFIX,
};

/// Knobs for a parsing run.
#[derive(Clone, Debug)]
pub struct ParserConfig {
    /// Beam width for every stage and sequence search.
    pub beam_size: usize,
    /// Probability mass the derivation strategies must cover per step.
    pub advance_mass: f64,
    /// Log a diagnostic when a candidate cannot advance or no complete
    /// parse is found.
    pub report_failed_parse: bool,
    /// Stop deriving once this instant passes; the best parse found so far
    /// is returned.
    pub deadline: Option<Instant>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            beam_size: DEFAULT_BEAM_SIZE,
            advance_mass: DEFAULT_ADVANCE_MASS,
            report_failed_parse: true,
            deadline: None,
        }
    }
}

/// A scoring model paired with the context generator that feeds it.
pub struct SequenceModel<'a, T> {
    pub model: &'a dyn ScoreModel,
    pub context_gen: &'a dyn ContextGenerator<T>,
}

/// Chunker input: one word with its part-of-speech tag.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TaggedWord {
    pub word: String,
    pub tag: String,
}

/// Rejects a continue outcome whose type does not match the chunk opened by
/// the preceding outcome.
pub struct ChunkSequenceValidator;

impl SequenceValidator<TaggedWord> for ChunkSequenceValidator {
    fn valid(
        &self,
        _index: usize,
        _input: &[TaggedWord],
        outcomes: &[String],
        candidate: &str,
    ) -> bool {
        let Some(ty) = candidate.strip_prefix(CONT_PREFIX) else {
            return true;
        };
        match outcomes.last() {
            Some(prev) => {
                prev.strip_prefix(START_PREFIX) == Some(ty)
                    || prev.strip_prefix(CONT_PREFIX) == Some(ty)
            }
            None => false,
        }
    }
}

/// One derivation on the beam: a root with its score snapshot and an
/// insertion sequence number for deterministic tie-breaking.
#[derive(Clone, Debug)]
struct Candidate {
    root: NodeId,
    prob: f64,
    seq: u64,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.prob.to_bits() == other.prob.to_bits() && self.seq == other.seq
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    /// Descending by probability so the best candidate is the heap minimum.
    fn cmp(&self, other: &Self) -> Ordering {
        self.prob
            .total_cmp(&other.prob)
            .reverse()
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Bottom-up beam-search parser: tags, chunks, then derives constituents
/// with the configured strategy until candidates complete.
pub struct Parser<'a> {
    tagger: SequenceModel<'a, String>,
    chunker: SequenceModel<'a, TaggedWord>,
    policy: &'a dyn AdvancePolicy,
    head_rules: &'a dyn HeadRules,
    config: ParserConfig,
}

impl<'a> Parser<'a> {
    pub fn new(
        tagger: SequenceModel<'a, String>,
        chunker: SequenceModel<'a, TaggedWord>,
        policy: &'a dyn AdvancePolicy,
        head_rules: &'a dyn HeadRules,
        config: ParserConfig,
    ) -> Self {
        Self {
            tagger,
            chunker,
            policy,
            head_rules,
            config,
        }
    }

    /// Tokenizes `line` on whitespace and returns the best parse over it.
    pub fn parse_text(&self, line: &str) -> Result<(ParseArena, NodeId), ParseError> {
        let (mut arena, root) = ParseArena::from_tokens(line);
        let best = self.parse(&mut arena, root)?;
        Ok((arena, best))
    }

    /// Returns the single best parse of `root` with its parent links set.
    pub fn parse(&self, arena: &mut ParseArena, root: NodeId) -> Result<NodeId, ParseError> {
        let best = self
            .full_parse(arena, root, 1)?
            .into_iter()
            .next()
            .ok_or(ParseError::NoSequence)?;
        arena.set_parents(best);
        Ok(best)
    }

    /// Derives up to `num_parses` parses of `root`, best first. The input
    /// root must hold one token leaf per word; a childless root is returned
    /// as is.
    pub fn full_parse(
        &self,
        arena: &mut ParseArena,
        root: NodeId,
        num_parses: usize,
    ) -> Result<Vec<NodeId>, ParseError> {
        if arena.child_count(root) == 0 {
            return Ok(vec![root]);
        }
        let token_count = arena.child_count(root);
        let max_stages = 2 * token_count + 3;
        let beam = self.config.beam_size;

        let mut open = BoundedHeap::new(beam);
        let mut next = BoundedHeap::new(beam);
        let mut completed: BoundedHeap<Candidate> = BoundedHeap::new(beam);
        let mut seq_counter: u64 = 0;
        open.add(Candidate {
            root,
            prob: arena.prob(root),
            seq: seq_counter,
        });
        let mut guess: Option<Candidate> = None;

        let mut stage = 0;
        while stage < max_stages && !open.is_empty() {
            if let Some(deadline) = self.config.deadline {
                if Instant::now() >= deadline {
                    break;
                }
            }
            let rounds = beam.min(open.len());
            for _ in 0..rounds {
                let Some(candidate) = open.extract() else {
                    break;
                };
                if stage == 2 && guess.is_none() {
                    guess = Some(candidate.clone());
                }
                let successors = match stage {
                    0 => self.advance_tags(arena, candidate.root)?,
                    1 => self.advance_chunks(arena, candidate.root)?,
                    _ => self.policy.advance(
                        arena,
                        candidate.root,
                        self.config.advance_mass,
                        self.head_rules,
                    )?,
                };
                if successors.is_empty() {
                    if self.config.report_failed_parse {
                        tracing::warn!(stage, "could not advance parse candidate");
                    }
                    self.policy.wrap_top(arena, candidate.root);
                    seq_counter += 1;
                    completed.add(Candidate {
                        root: candidate.root,
                        prob: arena.prob(candidate.root),
                        seq: seq_counter,
                    });
                    continue;
                }
                for successor in successors {
                    seq_counter += 1;
                    if arena.is_complete(successor) {
                        self.policy.wrap_top(arena, successor);
                        completed.add(Candidate {
                            root: successor,
                            prob: arena.prob(successor),
                            seq: seq_counter,
                        });
                    } else {
                        next.add(Candidate {
                            root: successor,
                            prob: arena.prob(successor),
                            seq: seq_counter,
                        });
                    }
                }
            }
            stage += 1;
            std::mem::swap(&mut open, &mut next);
            next.clear();

            if completed.len() >= num_parses {
                let open_best = open.first().map(|c| c.prob);
                let completed_worst = completed.last().map(|c| c.prob);
                if let (Some(best), Some(worst)) = (open_best, completed_worst) {
                    if best < worst {
                        break;
                    }
                } else if open_best.is_none() {
                    break;
                }
            }
        }

        if completed.is_empty() {
            if self.config.report_failed_parse {
                tracing::warn!(text = %arena.text(), "no complete parse found");
            }
            // Fall back to the best derivation seen, incomplete as it is;
            // its root label tells the caller it never finished.
            let fallback = guess
                .or_else(|| open.extract())
                .map_or(root, |c| c.root);
            return Ok(vec![fallback]);
        }
        let take = num_parses.min(completed.len());
        let mut parses = Vec::with_capacity(take);
        for _ in 0..take {
            match completed.extract() {
                Some(candidate) => parses.push(candidate.root),
                None => break,
            }
        }
        Ok(parses)
    }

    /// Stage 0: replace each token leaf with a part-of-speech node, one
    /// successor per tag sequence on the beam.
    fn advance_tags(
        &self,
        arena: &mut ParseArena,
        root: NodeId,
    ) -> Result<Vec<NodeId>, ParseError> {
        let leaves: Vec<NodeId> = arena.children(root).to_vec();
        let words: Vec<String> = leaves
            .iter()
            .map(|&leaf| arena.span_text(leaf).to_string())
            .collect();
        let mut beam =
            BeamSearch::new(self.config.beam_size, self.tagger.model, self.tagger.context_gen)
                .with_cache(CONTEXT_CACHE_FACTOR * self.config.beam_size);
        let sequences = beam.best_sequences(self.config.beam_size, &words);
        if sequences.is_empty() {
            return Err(ParseError::NoSequence);
        }
        let mut successors = Vec::with_capacity(sequences.len());
        for sequence in &sequences {
            let new_root = arena.clone_node(root);
            for (j, &leaf) in leaves.iter().enumerate() {
                let tag = &sequence.outcomes()[j];
                let prob = sequence.probs()[j];
                let span = arena.span(leaf).clone();
                let tag_node = arena.new_node(span, tag.clone(), prob.max(PROB_FLOOR).ln());
                arena.set_head(tag_node, leaf);
                arena.insert(new_root, tag_node)?;
                arena.add_prob(new_root, prob.max(PROB_FLOOR).ln());
            }
            successors.push(new_root);
        }
        Ok(successors)
    }

    /// Stage 1: group part-of-speech nodes into flat chunk constituents, one
    /// successor per chunk sequence on the beam.
    fn advance_chunks(
        &self,
        arena: &mut ParseArena,
        root: NodeId,
    ) -> Result<Vec<NodeId>, ParseError> {
        let original: Vec<NodeId> = arena.children(root).to_vec();
        let children =
            arena.collapse_punctuation(&original, self.head_rules.punctuation_tags());
        let input: Vec<TaggedWord> = children
            .iter()
            .map(|&child| TaggedWord {
                word: arena.span_text(arena.head(child)).to_string(),
                tag: arena.label(child).to_string(),
            })
            .collect();
        let validator = ChunkSequenceValidator;
        let mut beam = BeamSearch::new(
            self.config.beam_size,
            self.chunker.model,
            self.chunker.context_gen,
        )
        .with_validator(&validator);
        let sequences = beam.best_sequences(self.config.beam_size, &input);

        let mut successors = Vec::with_capacity(sequences.len());
        for sequence in &sequences {
            let new_root = arena.clone_node(root);
            let tags = sequence.outcomes();
            let probs = sequence.probs();
            let mut run: Option<(usize, usize, String)> = None;
            for j in 0..=tags.len() {
                if j < tags.len() {
                    arena.add_prob(new_root, probs[j].max(PROB_FLOOR).ln());
                    if tags[j].starts_with(CONT_PREFIX) {
                        if let Some(run) = &mut run {
                            run.1 = j;
                        }
                        continue;
                    }
                }
                if let Some((start, end, ty)) = run.take() {
                    let cons = &children[start..=end];
                    let span = Span::new(
                        arena.span(cons[0]).start,
                        arena.span(cons[cons.len() - 1]).end,
                    );
                    let head = self
                        .head_rules
                        .head(arena, cons, &ty)
                        .ok_or_else(|| ParseError::NoHead { label: ty.clone() })?;
                    let chunk = arena.new_node(span, ty, 0.0);
                    arena.set_head(chunk, head);
                    arena.set_chunk(chunk);
                    arena.insert(new_root, chunk)?;
                }
                if j < tags.len() {
                    if let Some(ty) = tags[j].strip_prefix(START_PREFIX) {
                        run = Some((j, j, ty.to_string()));
                    }
                }
            }
            successors.push(new_root);
        }
        Ok(successors)
    }

    /// The k best tag sequences for `words`, without deriving further.
    pub fn tag_top_k(&self, words: &[String], k: usize) -> Vec<Sequence> {
        let mut beam =
            BeamSearch::new(self.config.beam_size, self.tagger.model, self.tagger.context_gen)
                .with_cache(CONTEXT_CACHE_FACTOR * self.config.beam_size);
        beam.best_sequences(k, words)
    }

    /// The k best chunk sequences for tagged words, without deriving
    /// further.
    pub fn chunk_top_k(&self, input: &[TaggedWord], k: usize) -> Vec<Sequence> {
        let validator = ChunkSequenceValidator;
        let mut beam = BeamSearch::new(
            self.config.beam_size,
            self.chunker.model,
            self.chunker.context_gen,
        )
        .with_validator(&validator);
        beam.best_sequences(k, input)
    }
}
