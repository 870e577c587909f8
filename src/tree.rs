use rustc_hash::FxHashSet;
use smallvec::{smallvec, SmallVec};

use crate::model::HeadRules;
use crate::types::{NodeId, ParseError, Span, INC_LABEL, TOK_LABEL, TOP_LABEL};

/// One constituent of a parse. Nodes live in a [`ParseArena`] and refer to
/// their children by index, so cloning a node shares every subtree it does
/// not modify.
#[derive(Clone, Debug)]
pub struct ParseNode {
    pub(crate) span: Span,
    pub(crate) label: String,
    /// Transient derivation outcome, assigned while the node's parent is
    /// being grown.
    pub(crate) outcome: Option<String>,
    /// Cumulative log-probability.
    pub(crate) prob: f64,
    /// The head child, or the node itself for leaves.
    pub(crate) head: NodeId,
    /// Token index of the lexical head.
    pub(crate) head_index: usize,
    pub(crate) children: SmallVec<[NodeId; 4]>,
    /// Punctuation floated off the constituent structure, re-attached here
    /// by `collapse_punctuation`.
    pub(crate) prev_punct: SmallVec<[NodeId; 2]>,
    pub(crate) next_punct: SmallVec<[NodeId; 2]>,
    /// Set on constituents produced by the chunking stage.
    pub(crate) from_chunk: bool,
}

/// Arena of parse nodes over one source text. Derivation candidates are
/// roots into the same arena; beam branches share unmodified subtrees by
/// index and clone-on-write along the path they mutate.
///
/// Parent links live in a separate array and are only consistent for the
/// subtree most recently passed to [`ParseArena::set_parents`]; any shared
/// node has a different parent in every candidate that reaches it.
pub struct ParseArena {
    text: String,
    nodes: Vec<ParseNode>,
    parents: Vec<NodeId>,
}

impl ParseArena {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            nodes: Vec::new(),
            parents: Vec::new(),
        }
    }

    /// Whitespace-tokenizes `line` into one token leaf per word under an
    /// incomplete root, the shape `parse` expects as input.
    pub fn from_tokens(line: &str) -> (Self, NodeId) {
        let mut arena = Self::new(line);
        let mut leaves: SmallVec<[NodeId; 4]> = SmallVec::new();
        let mut start = None;
        let mut ordinal = 0;
        for (ix, ch) in line.char_indices() {
            if ch.is_whitespace() {
                if let Some(s) = start.take() {
                    leaves.push(arena.token_leaf(s, ix, ordinal));
                    ordinal += 1;
                }
            } else if start.is_none() {
                start = Some(ix);
            }
        }
        if let Some(s) = start {
            leaves.push(arena.token_leaf(s, line.len(), ordinal));
        }
        let root = arena.new_node(Span::new(0, line.len()), INC_LABEL, 0.0);
        arena.nodes[root as usize].children = leaves;
        (arena, root)
    }

    fn token_leaf(&mut self, start: usize, end: usize, ordinal: usize) -> NodeId {
        let leaf = self.new_node(Span::new(start, end), TOK_LABEL, 0.0);
        self.nodes[leaf as usize].head_index = ordinal;
        leaf
    }

    pub fn new_node(&mut self, span: Span, label: impl Into<String>, prob: f64) -> NodeId {
        let id = NodeId::try_from(self.nodes.len())
            .expect("parse arena exceeded NodeId capacity (u32)");
        self.nodes.push(ParseNode {
            span,
            label: label.into(),
            outcome: None,
            prob,
            head: id,
            head_index: 0,
            children: SmallVec::new(),
            prev_punct: SmallVec::new(),
            next_punct: SmallVec::new(),
            from_chunk: false,
        });
        self.parents.push(id);
        id
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub(crate) fn set_text(&mut self, text: String) {
        self.text = text;
    }

    pub fn span(&self, id: NodeId) -> &Span {
        &self.nodes[id as usize].span
    }

    pub fn span_text(&self, id: NodeId) -> &str {
        let span = &self.nodes[id as usize].span;
        &self.text[span.start..span.end]
    }

    pub fn label(&self, id: NodeId) -> &str {
        &self.nodes[id as usize].label
    }

    pub fn set_label(&mut self, id: NodeId, label: impl Into<String>) {
        self.nodes[id as usize].label = label.into();
    }

    pub fn outcome(&self, id: NodeId) -> Option<&str> {
        self.nodes[id as usize].outcome.as_deref()
    }

    pub fn set_outcome(&mut self, id: NodeId, outcome: impl Into<String>) {
        self.nodes[id as usize].outcome = Some(outcome.into());
    }

    pub fn prob(&self, id: NodeId) -> f64 {
        self.nodes[id as usize].prob
    }

    pub fn add_prob(&mut self, id: NodeId, log_prob: f64) {
        self.nodes[id as usize].prob += log_prob;
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id as usize].children
    }

    pub fn child_count(&self, id: NodeId) -> usize {
        self.nodes[id as usize].children.len()
    }

    pub fn head(&self, id: NodeId) -> NodeId {
        self.nodes[id as usize].head
    }

    pub fn head_index(&self, id: NodeId) -> usize {
        self.nodes[id as usize].head_index
    }

    /// Makes `head` this node's head and copies its lexical head index.
    pub fn set_head(&mut self, id: NodeId, head: NodeId) {
        let head_index = self.nodes[head as usize].head_index;
        let node = &mut self.nodes[id as usize];
        node.head = head;
        node.head_index = head_index;
    }

    pub(crate) fn set_head_index(&mut self, id: NodeId, head_index: usize) {
        self.nodes[id as usize].head_index = head_index;
    }

    pub(crate) fn add_child(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[parent as usize].children.push(child);
    }

    pub(crate) fn remove_children(&mut self, parent: NodeId, drop: &[NodeId]) {
        self.nodes[parent as usize]
            .children
            .retain(|c| !drop.contains(c));
    }

    pub fn is_chunk(&self, id: NodeId) -> bool {
        self.nodes[id as usize].from_chunk
    }

    pub fn set_chunk(&mut self, id: NodeId) {
        self.nodes[id as usize].from_chunk = true;
    }

    /// A node with exactly one child.
    pub fn is_complete(&self, id: NodeId) -> bool {
        self.nodes[id as usize].children.len() == 1
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.nodes[id as usize].children.is_empty()
    }

    /// A part-of-speech node: its sole child is a token leaf.
    pub fn is_tag_node(&self, id: NodeId) -> bool {
        let node = &self.nodes[id as usize];
        node.children.len() == 1 && self.nodes[node.children[0] as usize].label == TOK_LABEL
    }

    pub fn prev_punctuation(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id as usize].prev_punct
    }

    pub fn next_punctuation(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id as usize].next_punct
    }

    /// Only meaningful after `set_parents` on a root that reaches `id`.
    pub fn parent(&self, id: NodeId) -> NodeId {
        self.parents[id as usize]
    }

    /// Shallow clone: copies the node and its child-id list, sharing every
    /// subtree with the source.
    pub fn clone_node(&mut self, id: NodeId) -> NodeId {
        let node = self.nodes[id as usize].clone();
        let clone = NodeId::try_from(self.nodes.len())
            .expect("parse arena exceeded NodeId capacity (u32)");
        self.nodes.push(node);
        self.parents.push(clone);
        clone
    }

    /// Clones the right-frontier path from `root` down to and including
    /// `target`, sharing every subtree off the path. Returns the new root
    /// and the path of clones, deepest last (so the final element is the
    /// clone of `target`).
    pub fn clone_to(&mut self, root: NodeId, target: NodeId) -> (NodeId, Vec<NodeId>) {
        let mut path = Vec::new();
        let new_root = self.clone_to_inner(root, target, &mut path);
        (new_root, path)
    }

    fn clone_to_inner(&mut self, node: NodeId, target: NodeId, path: &mut Vec<NodeId>) -> NodeId {
        let clone = self.clone_node(node);
        path.push(clone);
        if node == target {
            return clone;
        }
        debug_assert!(
            !self.nodes[clone as usize].children.is_empty(),
            "clone target is not on the right frontier"
        );
        if self.nodes[clone as usize].children.is_empty() {
            return clone;
        }
        let last_ix = self.nodes[clone as usize].children.len() - 1;
        let last = self.nodes[clone as usize].children[last_ix];
        let child_clone = self.clone_to_inner(last, target, path);
        self.nodes[clone as usize].children[last_ix] = child_clone;
        clone
    }

    /// Clones `root`, then frontier-clones its child at `child_ix` down to
    /// `target`. Returns the new root and the path of clones below it,
    /// deepest last.
    pub fn clone_root_to(
        &mut self,
        root: NodeId,
        child_ix: usize,
        target: NodeId,
    ) -> (NodeId, Vec<NodeId>) {
        let new_root = self.clone_node(root);
        let child = self.nodes[new_root as usize].children[child_ix];
        let mut path = Vec::new();
        let child_clone = self.clone_to_inner(child, target, &mut path);
        self.nodes[new_root as usize].children[child_ix] = child_clone;
        (new_root, path)
    }

    /// Clone-on-write relabeling of one top-level child: replaces the child
    /// at `index` with a clone carrying `outcome`, leaving the original
    /// untouched for sibling branches. Returns the clone.
    pub fn relabel_child(&mut self, parent: NodeId, index: usize, outcome: &str) -> NodeId {
        let child = self.nodes[parent as usize].children[index];
        let clone = self.clone_node(child);
        self.nodes[clone as usize].outcome = Some(outcome.to_string());
        self.nodes[parent as usize].children[index] = clone;
        clone
    }

    pub fn replace_child(&mut self, parent: NodeId, index: usize, child: NodeId) {
        self.nodes[parent as usize].children[index] = child;
    }

    /// Inserts `node` under `parent` by span containment: children of
    /// `parent` fully contained in the new node's span are reparented under
    /// it; a child that fully contains the new span receives the insertion
    /// recursively.
    pub fn insert(&mut self, parent: NodeId, node: NodeId) -> Result<(), ParseError> {
        let nspan = self.nodes[node as usize].span.clone();
        let pspan = self.nodes[parent as usize].span.clone();
        if !pspan.contains(&nspan) {
            return Err(ParseError::SpanNotContained {
                start: nspan.start,
                end: nspan.end,
                target_start: pspan.start,
                target_end: pspan.end,
            });
        }
        let mut ix = 0;
        while ix < self.nodes[parent as usize].children.len() {
            let child = self.nodes[parent as usize].children[ix];
            let cspan = self.nodes[child as usize].span.clone();
            if cspan.start >= nspan.end {
                break;
            }
            if nspan.contains(&cspan) {
                self.nodes[parent as usize].children.remove(ix);
                self.nodes[node as usize].children.push(child);
            } else if cspan.contains(&nspan) {
                return self.insert(child, node);
            } else {
                ix += 1;
            }
        }
        self.nodes[parent as usize].children.insert(ix, node);
        Ok(())
    }

    /// Appends `child` (pulling in punctuation floating immediately before
    /// it), extends this node's span to the child's end, and recomputes the
    /// head via `rules`.
    pub fn add(
        &mut self,
        parent: NodeId,
        child: NodeId,
        rules: &dyn HeadRules,
    ) -> Result<(), ParseError> {
        let punct = self.nodes[child as usize].prev_punct.clone();
        for p in punct {
            self.nodes[parent as usize].children.push(p);
        }
        self.nodes[parent as usize].children.push(child);
        let child_end = self.nodes[child as usize].span.end;
        self.nodes[parent as usize].span.end = child_end;
        self.recompute_head(parent, rules)
    }

    /// Sister-adjoins `sister` onto this node's last child: a new
    /// intermediate node of the last child's type replaces it, holding the
    /// old child and the sister. Returns the intermediate node.
    pub fn adjoin(
        &mut self,
        parent: NodeId,
        sister: NodeId,
        rules: &dyn HeadRules,
    ) -> Result<NodeId, ParseError> {
        let Some(last_ix) = self.nodes[parent as usize].children.len().checked_sub(1) else {
            return Err(ParseError::NoChildren {
                label: self.nodes[parent as usize].label.clone(),
            });
        };
        let adj = self.adjoin_at(parent, last_ix, sister, rules)?;
        let sister_end = self.nodes[sister as usize].span.end;
        self.nodes[parent as usize].span.end = sister_end;
        self.recompute_head(parent, rules)?;
        Ok(adj)
    }

    /// Adjunction variant used at the derivation root: the intermediate
    /// node replaces the child at `index` and the root's own span and head
    /// are left alone.
    pub fn adjoin_root(
        &mut self,
        parent: NodeId,
        index: usize,
        sister: NodeId,
        rules: &dyn HeadRules,
    ) -> Result<NodeId, ParseError> {
        self.adjoin_at(parent, index, sister, rules)
    }

    fn adjoin_at(
        &mut self,
        parent: NodeId,
        index: usize,
        sister: NodeId,
        rules: &dyn HeadRules,
    ) -> Result<NodeId, ParseError> {
        let child = self.nodes[parent as usize].children[index];
        let label = self.nodes[child as usize].label.clone();
        let span = Span::new(
            self.nodes[child as usize].span.start,
            self.nodes[sister as usize].span.end,
        );
        let adj = self.new_node(span, label.clone(), 0.0);
        let head = rules
            .head(self, &[child, sister], &label)
            .ok_or(ParseError::NoHead { label })?;
        self.set_head(adj, head);
        self.nodes[adj as usize].children.push(child);
        let punct = self.nodes[sister as usize].prev_punct.clone();
        for p in punct {
            self.nodes[adj as usize].children.push(p);
        }
        self.nodes[adj as usize].children.push(sister);
        self.nodes[parent as usize].children[index] = adj;
        Ok(adj)
    }

    fn recompute_head(&mut self, id: NodeId, rules: &dyn HeadRules) -> Result<(), ParseError> {
        let kids: Vec<NodeId> = self.nodes[id as usize].children.to_vec();
        let label = self.nodes[id as usize].label.clone();
        let head = rules
            .head(self, &kids, &label)
            .ok_or(ParseError::NoHead { label })?;
        self.set_head(id, head);
        Ok(())
    }

    /// Floats punctuation out of a flat node list: each punctuation-typed
    /// node is attached as "next" punctuation on its closest preceding
    /// survivor and "previous" punctuation on its closest following one.
    /// The returned list may alias the input element-for-element when
    /// nothing was removed; callers must not assume a fresh sequence.
    pub fn collapse_punctuation(
        &mut self,
        nodes: &[NodeId],
        punct_tags: &FxHashSet<String>,
    ) -> Vec<NodeId> {
        let mut collapsed = Vec::with_capacity(nodes.len());
        let mut last_keep: Option<NodeId> = None;
        for (ix, &id) in nodes.iter().enumerate() {
            if punct_tags.contains(&self.nodes[id as usize].label) {
                if let Some(prev) = last_keep {
                    let punct = &mut self.nodes[prev as usize].next_punct;
                    if !punct.contains(&id) {
                        punct.push(id);
                    }
                }
                let next = nodes[ix + 1..]
                    .iter()
                    .copied()
                    .find(|&n| !punct_tags.contains(&self.nodes[n as usize].label));
                if let Some(next) = next {
                    let punct = &mut self.nodes[next as usize].prev_punct;
                    if !punct.contains(&id) {
                        punct.push(id);
                    }
                }
            } else {
                collapsed.push(id);
                last_keep = Some(id);
            }
        }
        collapsed
    }

    /// Moves every other child of `parent` inside `root_child` (preserving
    /// order around it) and widens the child's span to match; the inverse of
    /// punctuation collapsing once a derivation is down to one constituent.
    pub fn expand_top(&mut self, parent: NodeId, root_child: NodeId) {
        let kids: SmallVec<[NodeId; 4]> = self.nodes[parent as usize].children.clone();
        let pos = kids
            .iter()
            .position(|&k| k == root_child)
            .expect("expand_top child is not a child of parent");
        let mut inner: SmallVec<[NodeId; 4]> = SmallVec::new();
        inner.extend_from_slice(&kids[..pos]);
        inner.extend_from_slice(&self.nodes[root_child as usize].children);
        inner.extend_from_slice(&kids[pos + 1..]);
        self.nodes[root_child as usize].children = inner;
        self.update_span(root_child);
        self.nodes[parent as usize].children = smallvec![root_child];
    }

    /// Resets the span to the union of the children's spans.
    pub fn update_span(&mut self, id: NodeId) {
        let node = &self.nodes[id as usize];
        if let (Some(&first), Some(&last)) = (node.children.first(), node.children.last()) {
            let start = self.nodes[first as usize].span.start;
            let end = self.nodes[last as usize].span.end;
            let node = &mut self.nodes[id as usize];
            node.span.start = start;
            node.span.end = end;
        }
    }

    /// Full top-down walk assigning every reachable node's parent link.
    /// Nothing else keeps the parent array consistent: shared subtrees make
    /// it stale the moment a sibling branch clones.
    pub fn set_parents(&mut self, root: NodeId) {
        self.parents[root as usize] = root;
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            for ix in 0..self.nodes[id as usize].children.len() {
                let child = self.nodes[id as usize].children[ix];
                self.parents[child as usize] = id;
                stack.push(child);
            }
        }
    }

    /// Splices out unary chains: wherever a child's single child carries the
    /// same label, the grandchild takes the child's slot.
    pub fn prune_unary(&mut self, root: NodeId) {
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            for ix in 0..self.nodes[id as usize].children.len() {
                loop {
                    let child = self.nodes[id as usize].children[ix];
                    let cnode = &self.nodes[child as usize];
                    if cnode.children.len() == 1
                        && self.nodes[cnode.children[0] as usize].label == cnode.label
                    {
                        let grandchild = cnode.children[0];
                        self.nodes[id as usize].children[ix] = grandchild;
                    } else {
                        break;
                    }
                }
                stack.push(self.nodes[id as usize].children[ix]);
            }
        }
    }

    /// Bottom-up head recomputation over the whole subtree; a node whose
    /// label matches no rule heads itself.
    pub fn update_heads(&mut self, root: NodeId, rules: &dyn HeadRules) {
        for id in self.post_order(root) {
            let kids: Vec<NodeId> = self.nodes[id as usize].children.to_vec();
            if kids.is_empty() {
                continue;
            }
            let label = self.nodes[id as usize].label.clone();
            match rules.head(self, &kids, &label) {
                Some(head) => self.set_head(id, head),
                None => self.nodes[id as usize].head = id,
            }
        }
    }

    fn post_order(&self, root: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend_from_slice(&self.nodes[id as usize].children);
        }
        order.reverse();
        order
    }

    /// The path of rightmost constituents from the derivation's first real
    /// constituent down to (but excluding) the part-of-speech level, deepest
    /// first.
    pub fn right_frontier(&self, root: NodeId, punct_tags: &FxHashSet<String>) -> Vec<NodeId> {
        let label = &self.nodes[root as usize].label;
        let mut top = if label == TOP_LABEL || label == INC_LABEL {
            match self.nodes[root as usize]
                .children
                .iter()
                .copied()
                .find(|&c| !punct_tags.contains(&self.nodes[c as usize].label))
            {
                Some(first) => first,
                None => return Vec::new(),
            }
        } else {
            root
        };
        let mut frontier = Vec::new();
        while !self.is_tag_node(top) && !self.nodes[top as usize].children.is_empty() {
            frontier.push(top);
            top = *self.nodes[top as usize]
                .children
                .last()
                .expect("non-leaf node has children");
        }
        frontier.reverse();
        frontier
    }

    /// Renders the subtree in bracketed treebank form.
    pub fn show(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.show_into(id, &mut out);
        out
    }

    fn show_into(&self, id: NodeId, out: &mut String) {
        let node = &self.nodes[id as usize];
        if node.label == TOK_LABEL {
            out.push_str(crate::treebank::encode_token(self.span_text(id)));
            return;
        }
        out.push('(');
        out.push_str(&node.label);
        out.push(' ');
        if node.children.is_empty() {
            out.push_str(crate::treebank::encode_token(self.span_text(id)));
        } else {
            for (ix, &child) in node.children.iter().enumerate() {
                if ix > 0 {
                    out.push(' ');
                }
                self.show_into(child, out);
            }
        }
        out.push(')');
    }
}
