//! The combinator registry: named built-in message and reduce functions.
//!
//! Built-in message functions are named after the operands they read:
//! `copy_u`, `copy_v`, `copy_e` forward one operand, and `{x}_{op}_{y}`
//! combines two distinct operands with a binary op, where `x` and `y` are
//! drawn from `u` (source node), `v` (destination node), and `e` (edge), and
//! `op` is one of `add`, `sub`, `mul`, `div`. Reduce built-ins are `sum`,
//! `max`, `min`, `mean`, and `prod`.
//!
//! The registry is built once per process and is read-only afterwards; look
//! it up through [`CombinatorRegistry::global`]. Each entry records the
//! algebraic facts the scheduler relies on when it fuses a message/reduce
//! pair into a single kernel.

use std::fmt;
use std::sync::OnceLock;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use msgflow_core::{DType, ReduceKind};

use crate::error::ExecError;

/// Which side of an edge an operand is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Target {
    /// The source node of the edge (`u`).
    Src,
    /// The destination node of the edge (`v`).
    Dst,
    /// The edge itself (`e`).
    Edge,
}

impl Target {
    pub const ALL: [Target; 3] = [Target::Src, Target::Dst, Target::Edge];

    pub fn letter(self) -> char {
        match self {
            Target::Src => 'u',
            Target::Dst => 'v',
            Target::Edge => 'e',
        }
    }

    pub fn from_letter(c: char) -> Option<Target> {
        match c {
            'u' => Some(Target::Src),
            'v' => Some(Target::Dst),
            'e' => Some(Target::Edge),
            _ => None,
        }
    }
}

/// Elementwise binary operators usable inside a message combinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 4] = [BinaryOp::Add, BinaryOp::Sub, BinaryOp::Mul, BinaryOp::Div];

    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
        }
    }

    pub fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::Div => lhs / rhs,
        }
    }

    pub fn is_commutative(self) -> bool {
        matches!(self, BinaryOp::Add | BinaryOp::Mul)
    }

    pub fn is_associative(self) -> bool {
        matches!(self, BinaryOp::Add | BinaryOp::Mul)
    }
}

/// What a built-in message combinator computes for one edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Forward one operand unchanged.
    Copy(Target),
    /// `op(lhs, rhs)` with per-row broadcasting.
    Binary {
        lhs: Target,
        op: BinaryOp,
        rhs: Target,
    },
}

impl MessageKind {
    /// Operands read, in `(lhs, rhs)` order.
    pub fn operands(self) -> (Target, Option<Target>) {
        match self {
            MessageKind::Copy(t) => (t, None),
            MessageKind::Binary { lhs, rhs, .. } => (lhs, Some(rhs)),
        }
    }

    /// Combines one element of each operand. `rhs` is ignored for copies.
    pub fn eval(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            MessageKind::Copy(_) => lhs,
            MessageKind::Binary { op, .. } => op.apply(lhs, rhs),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Copy(t) => write!(f, "copy_{}", t.letter()),
            MessageKind::Binary { lhs, op, rhs } => {
                write!(f, "{}_{}_{}", lhs.letter(), op.name(), rhs.letter())
            }
        }
    }
}

/// Registry entry for a reduce built-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReduceCombinator {
    pub kind: ReduceKind,
    /// The combine step does not depend on message order.
    pub commutative: bool,
    /// The combine step can be regrouped, so partial results may be folded
    /// in any chunking.
    pub associative: bool,
}

impl ReduceCombinator {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn identity(&self, dtype: DType) -> f64 {
        self.kind.identity(dtype)
    }

    /// Whether the scheduler may fold this reduction into a message kernel.
    pub fn is_fusable(&self) -> bool {
        self.commutative && self.associative
    }
}

/// Process-wide table of built-in combinators.
#[derive(Debug)]
pub struct CombinatorRegistry {
    messages: IndexMap<String, MessageKind>,
    reducers: IndexMap<String, ReduceCombinator>,
}

static REGISTRY: OnceLock<CombinatorRegistry> = OnceLock::new();

impl CombinatorRegistry {
    /// The shared registry, built on first use.
    pub fn global() -> &'static CombinatorRegistry {
        REGISTRY.get_or_init(CombinatorRegistry::builtin)
    }

    fn builtin() -> CombinatorRegistry {
        let mut messages = IndexMap::new();
        for t in Target::ALL {
            let kind = MessageKind::Copy(t);
            messages.insert(kind.to_string(), kind);
        }
        // Legacy spellings of the copy combinators.
        messages.insert("copy_src".to_string(), MessageKind::Copy(Target::Src));
        messages.insert("copy_edge".to_string(), MessageKind::Copy(Target::Edge));
        for lhs in Target::ALL {
            for rhs in Target::ALL {
                if lhs == rhs {
                    continue;
                }
                for op in BinaryOp::ALL {
                    let kind = MessageKind::Binary { lhs, op, rhs };
                    messages.insert(kind.to_string(), kind);
                }
            }
        }

        let reducers = [
            ReduceKind::Sum,
            ReduceKind::Max,
            ReduceKind::Min,
            ReduceKind::Mean,
            ReduceKind::Prod,
        ]
        .into_iter()
        .map(|kind| {
            // Mean folds like sum and divides once at the end.
            let entry = ReduceCombinator {
                kind,
                commutative: true,
                associative: true,
            };
            (kind.name().to_string(), entry)
        })
        .collect();

        tracing::debug!("combinator registry initialized: {} message built-ins", messages.len());
        CombinatorRegistry { messages, reducers }
    }

    /// Looks up a message combinator by name.
    pub fn message(&self, name: &str) -> Result<MessageKind, ExecError> {
        self.messages
            .get(name)
            .copied()
            .ok_or_else(|| ExecError::UnknownBuiltin {
                name: name.to_string(),
            })
    }

    /// Looks up a reduce combinator by name.
    pub fn reducer(&self, name: &str) -> Result<ReduceCombinator, ExecError> {
        self.reducers
            .get(name)
            .copied()
            .ok_or_else(|| ExecError::UnknownBuiltin {
                name: name.to_string(),
            })
    }

    /// The entry registered for a reduce kind.
    pub fn reducer_for(&self, kind: ReduceKind) -> Result<ReduceCombinator, ExecError> {
        self.reducer(kind.name())
    }

    pub fn message_names(&self) -> impl Iterator<Item = &str> {
        self.messages.keys().map(String::as_str)
    }

    pub fn reducer_names(&self) -> impl Iterator<Item = &str> {
        self.reducers.keys().map(String::as_str)
    }
}
