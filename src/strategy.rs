//! Derivation strategies for the constituent-building stages. Both advance a
//! beam candidate one derivation step, producing zero or more successor roots
//! in the same arena.

use smallvec::SmallVec;

use crate::model::{
    find_outcome, AttachContextGenerator, CheckContextGenerator, HeadRules, NodeContextGenerator,
    ScoreModel,
};
use crate::tree::ParseArena;
use crate::types::{
    NodeId, ParseError, Span, COMPLETE_OUTCOME, INCOMPLETE_OUTCOME, PROB_FLOOR, START_PREFIX,
    CONT_PREFIX, TOP_LABEL,
};

/// Outcome marking a constituent as finished building, ready to attach.
pub const DONE_OUTCOME: &str = "d";
/// Attach outcome: join the advance node as a daughter of a frontier node.
pub const DAUGHTER_OUTCOME: &str = "d";
/// Attach outcome: adjoin the advance node as a sister of a frontier node.
pub const SISTER_OUTCOME: &str = "s";

pub(crate) const BUILT_COMPLETE: &str = "built.c";
pub(crate) const BUILT_INCOMPLETE: &str = "built.i";
const BUILT_PREFIX: &str = "built";

/// One derivation strategy: given a candidate root, produce its successor
/// candidates, and finalize a completed candidate as a `TOP` parse.
pub trait AdvancePolicy {
    fn advance(
        &self,
        arena: &mut ParseArena,
        root: NodeId,
        mass: f64,
        rules: &dyn HeadRules,
    ) -> Result<Vec<NodeId>, ParseError>;

    fn wrap_top(&self, arena: &mut ParseArena, root: NodeId);
}

fn start_type(outcome: &str) -> Option<&str> {
    outcome.strip_prefix(START_PREFIX)
}

fn cont_type(outcome: &str) -> Option<&str> {
    outcome.strip_prefix(CONT_PREFIX)
}

fn is_built(outcome: Option<&str>) -> bool {
    outcome.map_or(false, |o| o.starts_with(BUILT_PREFIX))
}

fn is_complete_outcome(outcome: Option<&str>) -> bool {
    matches!(outcome, Some(o) if o == COMPLETE_OUTCOME || o.ends_with(".c"))
}

fn arg_max(probs: &[f64]) -> Option<usize> {
    let mut max_ix = 0;
    for ix in 1..probs.len() {
        if probs[ix] > probs[max_ix] {
            max_ix = ix;
        }
    }
    if probs.is_empty() {
        None
    } else {
        Some(max_ix)
    }
}

fn log_floor(prob: f64) -> f64 {
    prob.max(PROB_FLOOR).ln()
}

/// A single collapsed child means everything but boundary punctuation has
/// been absorbed into one constituent; push the punctuation inside it. The
/// shared subtree is cloned first so sibling candidates are unaffected.
fn expand_single(arena: &mut ParseArena, root: NodeId, only: NodeId) -> NodeId {
    let new_root = arena.clone_node(root);
    let pos = arena
        .children(new_root)
        .iter()
        .position(|&c| c == only)
        .expect("collapsed child missing from root children");
    let inner = arena.clone_node(only);
    arena.replace_child(new_root, pos, inner);
    arena.expand_top(new_root, inner);
    new_root
}

fn original_index(original: &[NodeId], node: NodeId) -> usize {
    original
        .iter()
        .position(|&c| c == node)
        .expect("collapsed child missing from root children")
}

/// Shift-reduce style strategy: labels chunk-level constituents left to
/// right with start/continue outcomes and reduces a completed run into a new
/// constituent when the check model approves.
pub struct ChunkingPolicy<'a> {
    build_model: &'a dyn ScoreModel,
    check_model: &'a dyn ScoreModel,
    build_cgen: &'a dyn NodeContextGenerator,
    check_cgen: &'a dyn CheckContextGenerator,
    top_start_index: Option<usize>,
    complete_index: usize,
    incomplete_index: usize,
}

impl<'a> ChunkingPolicy<'a> {
    pub fn new(
        build_model: &'a dyn ScoreModel,
        check_model: &'a dyn ScoreModel,
        build_cgen: &'a dyn NodeContextGenerator,
        check_cgen: &'a dyn CheckContextGenerator,
    ) -> Result<Self, ParseError> {
        let top_start = format!("{START_PREFIX}{TOP_LABEL}");
        Ok(Self {
            build_model,
            check_model,
            build_cgen,
            check_cgen,
            top_start_index: find_outcome(build_model, &top_start),
            complete_index: find_outcome(check_model, COMPLETE_OUTCOME)
                .ok_or_else(|| ParseError::MissingOutcome(COMPLETE_OUTCOME.to_string()))?,
            incomplete_index: find_outcome(check_model, INCOMPLETE_OUTCOME)
                .ok_or_else(|| ParseError::MissingOutcome(INCOMPLETE_OUTCOME.to_string()))?,
        })
    }
}

impl AdvancePolicy for ChunkingPolicy<'_> {
    fn advance(
        &self,
        arena: &mut ParseArena,
        root: NodeId,
        mass: f64,
        rules: &dyn HeadRules,
    ) -> Result<Vec<NodeId>, ParseError> {
        let q = 1.0 - mass;
        let original: Vec<NodeId> = arena.children(root).to_vec();
        let children = arena.collapse_punctuation(&original, rules.punctuation_tags());
        if children.is_empty() {
            return Ok(Vec::new());
        }
        if children.len() == 1 {
            if arena.is_tag_node(children[0]) {
                return Ok(Vec::new());
            }
            return Ok(vec![expand_single(arena, root, children[0])]);
        }

        // Find the constituent to label next and the start of the run it
        // would extend.
        let mut last_start: Option<(usize, String)> = None;
        let mut advance_ix = children.len();
        for (ix, &child) in children.iter().enumerate() {
            match arena.outcome(child) {
                None => {
                    advance_ix = ix;
                    break;
                }
                Some(out) => {
                    if let Some(ty) = start_type(out) {
                        last_start = Some((ix, ty.to_string()));
                    }
                }
            }
        }
        if advance_ix == children.len() {
            return Ok(Vec::new());
        }
        let advance_node = children[advance_ix];
        let original_advance_ix = original_index(&original, advance_node);

        let mut bprobs = self
            .build_model
            .eval(&self.build_cgen.context(arena, &children, advance_ix));
        let mut successors = Vec::new();
        let mut bprob_sum = 0.0;
        while bprob_sum < mass {
            let Some(max_ix) = arg_max(&bprobs) else {
                break;
            };
            let bprob = bprobs[max_ix];
            if bprob <= 0.0 {
                break;
            }
            bprobs[max_ix] = 0.0;
            bprob_sum += bprob;
            if Some(max_ix) == self.top_start_index {
                // TOP only appears once the derivation completes.
                continue;
            }
            let tag = self.build_model.outcome(max_ix).to_string();
            if let Some(ty) = start_type(&tag) {
                last_start = Some((advance_ix, ty.to_string()));
            } else if let Some(ty) = cont_type(&tag) {
                match &last_start {
                    Some((_, start_ty)) if start_ty == ty => {}
                    _ => continue,
                }
            }

            let new_root = arena.clone_node(root);
            let labeled = arena.relabel_child(new_root, original_advance_ix, &tag);
            arena.add_prob(new_root, log_floor(bprob));

            let Some((start_ix, start_ty)) = last_start.clone() else {
                successors.push(new_root);
                continue;
            };
            let mut labeled_children = children.clone();
            labeled_children[advance_ix] = labeled;
            let cprobs = self.check_model.eval(&self.check_cgen.context(
                arena,
                &labeled_children,
                &start_ty,
                start_ix,
                advance_ix,
            ));
            let complete = cprobs.get(self.complete_index).copied().unwrap_or(0.0);
            let incomplete = cprobs.get(self.incomplete_index).copied().unwrap_or(0.0);

            if complete > q {
                let cons = &labeled_children[start_ix..=advance_ix];
                // Runs of bare part-of-speech nodes are the chunker's job.
                let flat = cons.iter().all(|&c| arena.is_tag_node(c));
                if !flat {
                    let reduced = arena.clone_node(new_root);
                    arena.add_prob(reduced, log_floor(complete));
                    let span = if start_ix == 0 && advance_ix == children.len() - 1 {
                        // Reducing the whole derivation keeps boundary
                        // punctuation inside the new constituent.
                        arena.span(root).clone()
                    } else {
                        Span::new(arena.span(cons[0]).start, arena.span(labeled).end)
                    };
                    let head = rules
                        .head(arena, cons, &start_ty)
                        .ok_or_else(|| ParseError::NoHead {
                            label: start_ty.clone(),
                        })?;
                    let con = arena.new_node(span, start_ty.clone(), log_floor(complete));
                    arena.set_head(con, head);
                    arena.insert(reduced, con)?;
                    successors.push(reduced);
                }
            }
            if incomplete > q && advance_ix != children.len() - 1 {
                arena.add_prob(new_root, log_floor(incomplete));
                successors.push(new_root);
            }
        }
        Ok(successors)
    }

    fn wrap_top(&self, arena: &mut ParseArena, root: NodeId) {
        let children: Vec<NodeId> = arena.children(root).to_vec();
        let bprobs = self
            .build_model
            .eval(&self.build_cgen.context(arena, &children, 0));
        if let Some(ix) = self.top_start_index {
            let prob = bprobs.get(ix).copied().unwrap_or(0.0);
            arena.add_prob(root, log_floor(prob));
        }
        let cprobs = self
            .check_model
            .eval(&self.check_cgen.context(arena, &children, TOP_LABEL, 0, 0));
        let prob = cprobs.get(self.complete_index).copied().unwrap_or(0.0);
        arena.add_prob(root, log_floor(prob));
        arena.set_label(root, TOP_LABEL);
    }
}

/// Tree-insertion strategy: builds a constituent over the advance node, then
/// attaches it to the right frontier as a daughter or sister once the build
/// model signals it is done.
pub struct TreeInsertPolicy<'a> {
    build_model: &'a dyn ScoreModel,
    attach_model: &'a dyn ScoreModel,
    check_model: &'a dyn ScoreModel,
    build_cgen: &'a dyn NodeContextGenerator,
    attach_cgen: &'a dyn AttachContextGenerator,
    check_cgen: &'a dyn CheckContextGenerator,
    done_index: usize,
    daughter_index: usize,
    sister_index: usize,
    complete_index: usize,
    incomplete_index: usize,
}

impl<'a> TreeInsertPolicy<'a> {
    pub fn new(
        build_model: &'a dyn ScoreModel,
        attach_model: &'a dyn ScoreModel,
        check_model: &'a dyn ScoreModel,
        build_cgen: &'a dyn NodeContextGenerator,
        attach_cgen: &'a dyn AttachContextGenerator,
        check_cgen: &'a dyn CheckContextGenerator,
    ) -> Result<Self, ParseError> {
        Ok(Self {
            build_model,
            attach_model,
            check_model,
            build_cgen,
            attach_cgen,
            check_cgen,
            done_index: find_outcome(build_model, DONE_OUTCOME)
                .ok_or_else(|| ParseError::MissingOutcome(DONE_OUTCOME.to_string()))?,
            daughter_index: find_outcome(attach_model, DAUGHTER_OUTCOME)
                .ok_or_else(|| ParseError::MissingOutcome(DAUGHTER_OUTCOME.to_string()))?,
            sister_index: find_outcome(attach_model, SISTER_OUTCOME)
                .ok_or_else(|| ParseError::MissingOutcome(SISTER_OUTCOME.to_string()))?,
            complete_index: find_outcome(check_model, COMPLETE_OUTCOME)
                .ok_or_else(|| ParseError::MissingOutcome(COMPLETE_OUTCOME.to_string()))?,
            incomplete_index: find_outcome(check_model, INCOMPLETE_OUTCOME)
                .ok_or_else(|| ParseError::MissingOutcome(INCOMPLETE_OUTCOME.to_string()))?,
        })
    }

    /// Common tail of an attach: drop the advance node (and its leading
    /// punctuation) from the top level, refresh ancestor spans, then let the
    /// check model decide whether the updated constituent is complete.
    fn finish_attach(
        &self,
        arena: &mut ParseArena,
        new_root: NodeId,
        ancestors: &[NodeId],
        updated: NodeId,
        advance_node: NodeId,
        attach_log_prob: f64,
        top_children: &[NodeId],
    ) {
        let mut drop: SmallVec<[NodeId; 4]> = SmallVec::new();
        drop.extend_from_slice(arena.prev_punctuation(advance_node));
        drop.push(advance_node);
        arena.remove_children(new_root, &drop);
        for &ancestor in ancestors.iter().rev() {
            arena.update_span(ancestor);
        }
        arena.add_prob(new_root, attach_log_prob);

        let label = arena.label(updated).to_string();
        let cprobs = self
            .check_model
            .eval(&self.check_cgen.context(arena, top_children, &label, 0, 0));
        let complete = cprobs.get(self.complete_index).copied().unwrap_or(0.0);
        let incomplete = cprobs.get(self.incomplete_index).copied().unwrap_or(0.0);
        if complete >= incomplete {
            arena.set_outcome(updated, COMPLETE_OUTCOME);
            arena.add_prob(new_root, log_floor(complete));
        } else {
            arena.set_outcome(updated, INCOMPLETE_OUTCOME);
            arena.add_prob(new_root, log_floor(incomplete));
        }
    }
}

impl AdvancePolicy for TreeInsertPolicy<'_> {
    fn advance(
        &self,
        arena: &mut ParseArena,
        root: NodeId,
        mass: f64,
        rules: &dyn HeadRules,
    ) -> Result<Vec<NodeId>, ParseError> {
        let q = 1.0 - mass;
        let original: Vec<NodeId> = arena.children(root).to_vec();
        let punct = rules.punctuation_tags();
        let children = arena.collapse_punctuation(&original, punct);
        if children.is_empty() {
            return Ok(Vec::new());
        }
        if children.len() == 1 {
            if arena.is_leaf(children[0]) {
                return Ok(Vec::new());
            }
            return Ok(vec![expand_single(arena, root, children[0])]);
        }

        let mut advance_ix = 0;
        while advance_ix < children.len() && is_built(arena.outcome(children[advance_ix])) {
            advance_ix += 1;
        }
        if advance_ix == children.len() {
            return Ok(Vec::new());
        }
        let advance_node = children[advance_ix];
        let original_zero_ix = original_index(&original, children[0]);
        let original_advance_ix = original_index(&original, advance_node);

        let bprobs = self
            .build_model
            .eval(&self.build_cgen.context(arena, &children, advance_ix));
        let done_prob = bprobs.get(self.done_index).copied().unwrap_or(0.0);
        let mut successors = Vec::new();

        if 1.0 - done_prob > q {
            let mut bprobs = bprobs.clone();
            let mut bprob_sum = 0.0;
            while bprob_sum < mass {
                let Some(max_ix) = arg_max(&bprobs) else {
                    break;
                };
                if max_ix == self.done_index {
                    break;
                }
                let bprob = bprobs[max_ix];
                if bprob <= 0.0 {
                    break;
                }
                bprobs[max_ix] = 0.0;
                bprob_sum += bprob;
                let tag = self.build_model.outcome(max_ix).to_string();

                let new_root = arena.clone_node(root);
                let span = arena.span(advance_node).clone();
                let head = arena.head(advance_node);
                let new_node = arena.new_node(span, tag.clone(), log_floor(bprob));
                arena.set_head(new_node, head);
                arena.insert(new_root, new_node)?;
                arena.add_prob(new_root, log_floor(bprob));

                let mut built_children = children.clone();
                built_children[advance_ix] = new_node;
                let cprobs = self.check_model.eval(&self.check_cgen.context(
                    arena,
                    &built_children,
                    &tag,
                    advance_ix,
                    advance_ix,
                ));
                let complete = cprobs.get(self.complete_index).copied().unwrap_or(0.0);
                let incomplete = cprobs.get(self.incomplete_index).copied().unwrap_or(0.0);
                if complete > mass {
                    arena.set_outcome(new_node, COMPLETE_OUTCOME);
                    arena.add_prob(new_root, log_floor(complete));
                    successors.push(new_root);
                } else if incomplete > mass {
                    arena.set_outcome(new_node, INCOMPLETE_OUTCOME);
                    arena.add_prob(new_root, log_floor(incomplete));
                    successors.push(new_root);
                } else {
                    // Both readings survive; fork the candidate.
                    arena.set_outcome(new_node, COMPLETE_OUTCOME);
                    let complete_root = arena.clone_node(new_root);
                    arena.add_prob(complete_root, log_floor(complete));
                    successors.push(complete_root);

                    let pos = arena
                        .children(new_root)
                        .iter()
                        .position(|&c| c == new_node)
                        .expect("built node missing from root children");
                    let incomplete_node = arena.clone_node(new_node);
                    arena.set_outcome(incomplete_node, INCOMPLETE_OUTCOME);
                    arena.replace_child(new_root, pos, incomplete_node);
                    arena.add_prob(new_root, log_floor(incomplete));
                    successors.push(new_root);
                }
            }
        }

        if done_prob > q {
            let built_outcome = if is_complete_outcome(arena.outcome(advance_node)) {
                BUILT_COMPLETE
            } else {
                BUILT_INCOMPLETE
            };
            if advance_ix == 0 {
                // Nothing to the left to attach to; the node stays at the
                // top level.
                let new_root = arena.clone_node(root);
                arena.relabel_child(new_root, original_advance_ix, built_outcome);
                arena.add_prob(new_root, log_floor(done_prob));
                successors.push(new_root);
            } else {
                let frontier = arena.right_frontier(root, punct);
                for (fi, &fnode) in frontier.iter().enumerate() {
                    let aprobs = self.attach_model.eval(&self.attach_cgen.context(
                        arena,
                        &children,
                        advance_ix,
                        &frontier,
                        fi,
                    ));
                    let fnode_complete = is_complete_outcome(arena.outcome(fnode));

                    let daughter = aprobs.get(self.daughter_index).copied().unwrap_or(0.0);
                    if daughter > q && !fnode_complete {
                        let (new_root, path) = arena.clone_root_to(root, original_zero_ix, fnode);
                        let fclone = *path.last().expect("clone path is never empty");
                        arena.add(fclone, advance_node, rules)?;
                        let mut top = children.clone();
                        top[0] = path[0];
                        top.remove(advance_ix);
                        self.finish_attach(
                            arena,
                            new_root,
                            &path[..path.len() - 1],
                            fclone,
                            advance_node,
                            log_floor(done_prob) + log_floor(daughter),
                            &top,
                        );
                        successors.push(new_root);
                    }

                    let sister = aprobs.get(self.sister_index).copied().unwrap_or(0.0);
                    if sister > q && fnode_complete {
                        if fi + 1 == frontier.len() {
                            // The frontier node is a top-level child; adjoin
                            // in place without touching the root's span.
                            let new_root = arena.clone_node(root);
                            let adjoined =
                                arena.adjoin_root(new_root, original_zero_ix, advance_node, rules)?;
                            let mut top = children.clone();
                            top[0] = adjoined;
                            top.remove(advance_ix);
                            self.finish_attach(
                                arena,
                                new_root,
                                &[],
                                adjoined,
                                advance_node,
                                log_floor(done_prob) + log_floor(sister),
                                &top,
                            );
                            successors.push(new_root);
                        } else {
                            let parent = frontier[fi + 1];
                            let (new_root, path) =
                                arena.clone_root_to(root, original_zero_ix, parent);
                            let pclone = *path.last().expect("clone path is never empty");
                            let adjoined = arena.adjoin(pclone, advance_node, rules)?;
                            let mut top = children.clone();
                            top[0] = path[0];
                            top.remove(advance_ix);
                            self.finish_attach(
                                arena,
                                new_root,
                                &path[..path.len() - 1],
                                adjoined,
                                advance_node,
                                log_floor(done_prob) + log_floor(sister),
                                &top,
                            );
                            successors.push(new_root);
                        }
                    }
                }
            }
        }
        Ok(successors)
    }

    fn wrap_top(&self, arena: &mut ParseArena, root: NodeId) {
        arena.set_label(root, TOP_LABEL);
    }
}
