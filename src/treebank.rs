//! Penn-treebank bracket notation: `(TOP (S (NP (DT the) (NN dog)) ...))`.
//! Rendering lives on [`ParseArena::show`]; this module holds the reader and
//! the token escapes shared with it.

use crate::tree::ParseArena;
use crate::types::{NodeId, ParseError, Span, TOK_LABEL};

/// Escapes a token that would collide with bracket syntax.
pub fn encode_token(token: &str) -> &str {
    match token {
        "(" => "-LRB-",
        ")" => "-RRB-",
        "{" => "-LCB-",
        "}" => "-RCB-",
        "[" => "-LSB-",
        "]" => "-RSB-",
        _ => token,
    }
}

/// Inverse of [`encode_token`].
pub fn decode_token(token: &str) -> &str {
    match token {
        "-LRB-" => "(",
        "-RRB-" => ")",
        "-LCB-" => "{",
        "-RCB-" => "}",
        "-LSB-" => "[",
        "-RSB-" => "]",
        _ => token,
    }
}

/// Strips a function tag (`NP-SBJ` becomes `NP`, `NP=2` becomes `NP`).
/// Labels that are themselves escape tokens start with a dash and pass
/// through unchanged.
fn strip_function_tag(label: &str) -> &str {
    if label.starts_with('-') {
        return label;
    }
    match label.find(['-', '=']) {
        Some(ix) => &label[..ix],
        None => label,
    }
}

struct Pending {
    label: String,
    children: Vec<NodeId>,
}

/// Reads one bracketed tree, dropping function tags from constituent
/// labels. The arena's text is rebuilt from the decoded tokens,
/// space-separated, so spans index into a canonical surface form.
pub fn parse(line: &str) -> Result<(ParseArena, NodeId), ParseError> {
    parse_inner(line, false)
}

/// Like [`parse`] but keeps function tags (`NP-SBJ`) on the labels.
pub fn parse_retaining_function_tags(line: &str) -> Result<(ParseArena, NodeId), ParseError> {
    parse_inner(line, true)
}

fn parse_inner(line: &str, retain_function_tags: bool) -> Result<(ParseArena, NodeId), ParseError> {
    let mut arena = ParseArena::new(String::new());
    let mut text = String::new();
    let mut stack: Vec<Pending> = Vec::new();
    let mut root = None;
    let mut ordinal = 0;

    let bytes = line.as_bytes();
    let mut ix = 0;
    while ix < bytes.len() {
        match bytes[ix] {
            b'(' => {
                ix += 1;
                let label_start = ix;
                while ix < bytes.len()
                    && !bytes[ix].is_ascii_whitespace()
                    && bytes[ix] != b'('
                    && bytes[ix] != b')'
                {
                    ix += 1;
                }
                if ix == label_start {
                    return Err(ParseError::Bracketing {
                        offset: label_start,
                        message: "expected constituent label after '('".into(),
                    });
                }
                let raw = &line[label_start..ix];
                let label = if retain_function_tags {
                    raw
                } else {
                    strip_function_tag(raw)
                };
                stack.push(Pending {
                    label: label.to_string(),
                    children: Vec::new(),
                });
            }
            b')' => {
                let Some(pending) = stack.pop() else {
                    return Err(ParseError::Bracketing {
                        offset: ix,
                        message: "unbalanced ')'".into(),
                    });
                };
                if pending.children.is_empty() {
                    return Err(ParseError::Bracketing {
                        offset: ix,
                        message: format!("empty constituent '{}'", pending.label),
                    });
                }
                let first = pending.children[0];
                let last = pending.children[pending.children.len() - 1];
                let span = Span::new(arena.span(first).start, arena.span(last).end);
                let node = arena.new_node(span, pending.label, 0.0);
                for &child in &pending.children {
                    arena.add_child(node, child);
                }
                if arena.is_tag_node(node) {
                    let leaf = arena.children(node)[0];
                    arena.set_head(node, leaf);
                }
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => {
                        if root.is_some() {
                            return Err(ParseError::Bracketing {
                                offset: ix,
                                message: "multiple root constituents".into(),
                            });
                        }
                        root = Some(node);
                    }
                }
                ix += 1;
            }
            b if b.is_ascii_whitespace() => {
                ix += 1;
            }
            _ => {
                let token_start = ix;
                while ix < bytes.len()
                    && !bytes[ix].is_ascii_whitespace()
                    && bytes[ix] != b'('
                    && bytes[ix] != b')'
                {
                    ix += 1;
                }
                let Some(parent) = stack.last_mut() else {
                    return Err(ParseError::Bracketing {
                        offset: token_start,
                        message: "token outside any constituent".into(),
                    });
                };
                let token = decode_token(&line[token_start..ix]);
                if !text.is_empty() {
                    text.push(' ');
                }
                let tok_start = text.len();
                text.push_str(token);
                let leaf = arena.new_node(Span::new(tok_start, text.len()), TOK_LABEL, 0.0);
                arena.set_head_index(leaf, ordinal);
                ordinal += 1;
                parent.children.push(leaf);
            }
        }
    }

    if let Some(last) = stack.last() {
        return Err(ParseError::Bracketing {
            offset: line.len(),
            message: format!("unclosed constituent '{}'", last.label),
        });
    }
    let root = root.ok_or(ParseError::Bracketing {
        offset: line.len(),
        message: "no constituents found".into(),
    })?;
    arena.set_text(text);
    Ok((arena, root))
}
