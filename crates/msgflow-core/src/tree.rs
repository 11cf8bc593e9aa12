//! Bracketed constituency trees into graphs.
//!
//! Parses sentiment-treebank style trees such as
//! `(3 (2 It) (4 (2 's) (3 great)))`: every parenthesized group is a node
//! whose first token is an integer label, followed either by a single word
//! (a leaf) or by one or more child groups.
//!
//! Parsing uses an explicit stack of open nodes instead of recursion, so
//! arbitrarily deep trees cannot overflow the call stack. Nodes are numbered
//! in pre-order (the root is node 0). The edge `parent -> child` is appended
//! when the child's group closes, so edge ids follow post-order.
//!
//! The resulting graph carries two `F64` node fields of shape `[N]`:
//! - `x`: the word id of a leaf, or [`PAD_WORD`] for internal nodes;
//! - `y`: the node label.

use std::collections::HashMap;

use crate::error::CoreError;
use crate::graph::Graph;
use crate::id::NodeId;
use crate::tensor::{DType, Device, Tensor};

/// Word id stored on internal nodes.
pub const PAD_WORD: i64 = -1;

#[derive(Debug, Clone, PartialEq)]
enum Token<'a> {
    Open,
    Close,
    Atom(&'a str),
}

fn tokenize(text: &str) -> Vec<(usize, Token<'_>)> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some(&(i, c)) = chars.peek() {
        match c {
            '(' => {
                tokens.push((i, Token::Open));
                chars.next();
            }
            ')' => {
                tokens.push((i, Token::Close));
                chars.next();
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            _ => {
                let start = i;
                let mut end = text.len();
                while let Some(&(j, c)) = chars.peek() {
                    if c == '(' || c == ')' || c.is_whitespace() {
                        end = j;
                        break;
                    }
                    chars.next();
                }
                tokens.push((start, Token::Atom(&text[start..end])));
            }
        }
    }
    tokens
}

/// An open group on the parse stack.
struct OpenNode {
    id: NodeId,
    label: Option<i64>,
    has_word: bool,
    has_children: bool,
}

/// Parses one bracketed tree.
///
/// Words are lower-cased and looked up in `vocab`; an unknown word, a
/// malformed label, or unbalanced parentheses fail with
/// [`CoreError::InvalidTree`].
pub fn parse_bracket_tree(text: &str, vocab: &HashMap<String, i64>) -> Result<Graph, CoreError> {
    let invalid = |offset: usize, reason: &str| CoreError::InvalidTree {
        offset,
        reason: reason.to_string(),
    };

    let mut labels: Vec<i64> = Vec::new();
    let mut words: Vec<i64> = Vec::new();
    let mut edges: Vec<(u32, u32)> = Vec::new();
    let mut stack: Vec<OpenNode> = Vec::new();
    let mut closed_root = false;

    for (offset, token) in tokenize(text) {
        if closed_root {
            return Err(invalid(offset, "trailing input after root"));
        }
        match token {
            Token::Open => {
                if let Some(parent) = stack.last_mut() {
                    if parent.label.is_none() || parent.has_word {
                        return Err(invalid(offset, "unexpected '('"));
                    }
                    parent.has_children = true;
                }
                let id = NodeId(labels.len() as u32);
                labels.push(0);
                words.push(PAD_WORD);
                stack.push(OpenNode {
                    id,
                    label: None,
                    has_word: false,
                    has_children: false,
                });
            }
            Token::Atom(atom) => {
                let top = stack
                    .last_mut()
                    .ok_or_else(|| invalid(offset, "token outside any group"))?;
                if top.label.is_none() {
                    let label = atom
                        .parse::<i64>()
                        .map_err(|_| invalid(offset, "label is not an integer"))?;
                    top.label = Some(label);
                    labels[top.id.index()] = label;
                } else if !top.has_word && !top.has_children {
                    let word = vocab
                        .get(&atom.to_lowercase())
                        .copied()
                        .ok_or_else(|| invalid(offset, "word not in vocabulary"))?;
                    top.has_word = true;
                    words[top.id.index()] = word;
                } else {
                    return Err(invalid(offset, "unexpected token"));
                }
            }
            Token::Close => {
                let node = stack
                    .pop()
                    .ok_or_else(|| invalid(offset, "unbalanced ')'"))?;
                if node.label.is_none() || !(node.has_word || node.has_children) {
                    return Err(invalid(offset, "empty group"));
                }
                match stack.last() {
                    Some(parent) => edges.push((parent.id.0, node.id.0)),
                    None => closed_root = true,
                }
            }
        }
    }
    if !closed_root {
        return Err(invalid(text.len(), "unterminated tree"));
    }

    let n = labels.len();
    let mut graph = Graph::from_edges(n, &edges)?;
    let as_f64 = |v: &[i64]| v.iter().map(|&x| x as f64).collect::<Vec<_>>();
    graph.set_ndata("x", Tensor::from_vec_typed(&[n], as_f64(&words), DType::F64, Device::Cpu)?)?;
    graph.set_ndata("y", Tensor::from_vec_typed(&[n], as_f64(&labels), DType::F64, Device::Cpu)?)?;
    Ok(graph)
}
