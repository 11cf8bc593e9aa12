//! Message, reduce, and node functions.
//!
//! Each function is either a named built-in from the
//! [`CombinatorRegistry`](crate::registry::CombinatorRegistry) or an opaque
//! user closure. Built-ins describe their computation symbolically, which is
//! what lets the scheduler fuse a built-in message/reduce pair into one
//! kernel; user closures are always run on materialized batches.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use msgflow_core::{ReduceKind, Tensor};

use crate::batch::{EdgeBatch, NodeBatch};
use crate::error::ExecError;
use crate::registry::{BinaryOp, CombinatorRegistry, MessageKind, Target};

/// Named feature tensors, in insertion order.
pub type FieldMap = IndexMap<String, Tensor>;

pub type UserEdgeFn = Arc<dyn Fn(&EdgeBatch<'_>) -> Result<FieldMap, ExecError> + Send + Sync>;
pub type UserNodeFn = Arc<dyn Fn(&NodeBatch<'_>) -> Result<FieldMap, ExecError> + Send + Sync>;

// ---------------------------------------------------------------------------
// Message functions
// ---------------------------------------------------------------------------

/// A built-in message combinator bound to concrete field names.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltinMessage {
    pub kind: MessageKind,
    pub lhs_field: String,
    /// Field of the second operand; `None` for copies.
    pub rhs_field: Option<String>,
    pub out_field: String,
}

impl BuiltinMessage {
    /// Field read for operand `target`, if this combinator reads it.
    pub fn field_of(&self, target: Target) -> Option<&str> {
        let (lhs, rhs) = self.kind.operands();
        if lhs == target {
            Some(&self.lhs_field)
        } else if rhs == Some(target) {
            self.rhs_field.as_deref()
        } else {
            None
        }
    }

    /// Whether any operand is an edge feature.
    pub fn reads_edges(&self) -> bool {
        self.field_of(Target::Edge).is_some()
    }
}

/// Computes one message per edge.
#[derive(Clone)]
pub enum MessageFn {
    Builtin(BuiltinMessage),
    User(UserEdgeFn),
}

impl MessageFn {
    /// Resolves a registered combinator name.
    ///
    /// Binary combinators read `rhs_field` for their second operand, or
    /// `lhs_field` again when it is `None`. Copies ignore `rhs_field`.
    pub fn builtin(
        name: &str,
        lhs_field: &str,
        rhs_field: Option<&str>,
        out_field: &str,
    ) -> Result<MessageFn, ExecError> {
        let kind = CombinatorRegistry::global().message(name)?;
        let rhs_field = match kind {
            MessageKind::Copy(_) => None,
            MessageKind::Binary { .. } => Some(rhs_field.unwrap_or(lhs_field).to_string()),
        };
        Ok(MessageFn::Builtin(BuiltinMessage {
            kind,
            lhs_field: lhs_field.to_string(),
            rhs_field,
            out_field: out_field.to_string(),
        }))
    }

    /// Wraps a closure that returns one row per edge for every output field.
    pub fn user<F>(f: F) -> MessageFn
    where
        F: Fn(&EdgeBatch<'_>) -> Result<FieldMap, ExecError> + Send + Sync + 'static,
    {
        MessageFn::User(Arc::new(f))
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, MessageFn::Builtin(_))
    }
}

impl fmt::Debug for MessageFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageFn::Builtin(b) => f.debug_tuple("Builtin").field(b).finish(),
            MessageFn::User(_) => f.write_str("User(..)"),
        }
    }
}

fn copy(target: Target, field: &str, out: &str) -> MessageFn {
    MessageFn::Builtin(BuiltinMessage {
        kind: MessageKind::Copy(target),
        lhs_field: field.to_string(),
        rhs_field: None,
        out_field: out.to_string(),
    })
}

fn binary(lhs: Target, op: BinaryOp, rhs: Target, lhs_field: &str, rhs_field: &str, out: &str) -> MessageFn {
    MessageFn::Builtin(BuiltinMessage {
        kind: MessageKind::Binary { lhs, op, rhs },
        lhs_field: lhs_field.to_string(),
        rhs_field: Some(rhs_field.to_string()),
        out_field: out.to_string(),
    })
}

/// Source feature as the message.
pub fn copy_u(field: &str, out: &str) -> MessageFn {
    copy(Target::Src, field, out)
}

/// Destination feature as the message.
pub fn copy_v(field: &str, out: &str) -> MessageFn {
    copy(Target::Dst, field, out)
}

/// Edge feature as the message.
pub fn copy_e(field: &str, out: &str) -> MessageFn {
    copy(Target::Edge, field, out)
}

pub fn u_add_v(lhs: &str, rhs: &str, out: &str) -> MessageFn {
    binary(Target::Src, BinaryOp::Add, Target::Dst, lhs, rhs, out)
}

pub fn u_sub_v(lhs: &str, rhs: &str, out: &str) -> MessageFn {
    binary(Target::Src, BinaryOp::Sub, Target::Dst, lhs, rhs, out)
}

pub fn u_mul_v(lhs: &str, rhs: &str, out: &str) -> MessageFn {
    binary(Target::Src, BinaryOp::Mul, Target::Dst, lhs, rhs, out)
}

pub fn u_div_v(lhs: &str, rhs: &str, out: &str) -> MessageFn {
    binary(Target::Src, BinaryOp::Div, Target::Dst, lhs, rhs, out)
}

pub fn u_add_e(lhs: &str, rhs: &str, out: &str) -> MessageFn {
    binary(Target::Src, BinaryOp::Add, Target::Edge, lhs, rhs, out)
}

pub fn u_sub_e(lhs: &str, rhs: &str, out: &str) -> MessageFn {
    binary(Target::Src, BinaryOp::Sub, Target::Edge, lhs, rhs, out)
}

/// Source feature scaled by an edge weight; the usual weighted aggregation.
pub fn u_mul_e(lhs: &str, rhs: &str, out: &str) -> MessageFn {
    binary(Target::Src, BinaryOp::Mul, Target::Edge, lhs, rhs, out)
}

pub fn u_div_e(lhs: &str, rhs: &str, out: &str) -> MessageFn {
    binary(Target::Src, BinaryOp::Div, Target::Edge, lhs, rhs, out)
}

pub fn v_add_e(lhs: &str, rhs: &str, out: &str) -> MessageFn {
    binary(Target::Dst, BinaryOp::Add, Target::Edge, lhs, rhs, out)
}

pub fn v_mul_e(lhs: &str, rhs: &str, out: &str) -> MessageFn {
    binary(Target::Dst, BinaryOp::Mul, Target::Edge, lhs, rhs, out)
}

// ---------------------------------------------------------------------------
// Reduce functions
// ---------------------------------------------------------------------------

/// A built-in reduction over one message field.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltinReduce {
    pub kind: ReduceKind,
    pub msg_field: String,
    pub out_field: String,
}

/// Folds each node's mailbox into new node features.
#[derive(Clone)]
pub enum ReduceFn {
    Builtin(BuiltinReduce),
    User(UserNodeFn),
}

impl ReduceFn {
    /// Resolves a registered reducer name.
    pub fn builtin(name: &str, msg_field: &str, out_field: &str) -> Result<ReduceFn, ExecError> {
        let entry = CombinatorRegistry::global().reducer(name)?;
        Ok(ReduceFn::Builtin(BuiltinReduce {
            kind: entry.kind,
            msg_field: msg_field.to_string(),
            out_field: out_field.to_string(),
        }))
    }

    /// Wraps a closure over degree-bucketed mailboxes. It must return one row
    /// per node of the batch for every output field.
    pub fn user<F>(f: F) -> ReduceFn
    where
        F: Fn(&NodeBatch<'_>) -> Result<FieldMap, ExecError> + Send + Sync + 'static,
    {
        ReduceFn::User(Arc::new(f))
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, ReduceFn::Builtin(_))
    }
}

impl fmt::Debug for ReduceFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReduceFn::Builtin(b) => f.debug_tuple("Builtin").field(b).finish(),
            ReduceFn::User(_) => f.write_str("User(..)"),
        }
    }
}

fn reduce(kind: ReduceKind, msg: &str, out: &str) -> ReduceFn {
    ReduceFn::Builtin(BuiltinReduce {
        kind,
        msg_field: msg.to_string(),
        out_field: out.to_string(),
    })
}

pub fn sum(msg: &str, out: &str) -> ReduceFn {
    reduce(ReduceKind::Sum, msg, out)
}

pub fn max(msg: &str, out: &str) -> ReduceFn {
    reduce(ReduceKind::Max, msg, out)
}

pub fn min(msg: &str, out: &str) -> ReduceFn {
    reduce(ReduceKind::Min, msg, out)
}

pub fn mean(msg: &str, out: &str) -> ReduceFn {
    reduce(ReduceKind::Mean, msg, out)
}

pub fn prod(msg: &str, out: &str) -> ReduceFn {
    reduce(ReduceKind::Prod, msg, out)
}

// ---------------------------------------------------------------------------
// Node functions
// ---------------------------------------------------------------------------

/// A per-node update, used by `apply_nodes` and as the optional apply step
/// after a reduce.
#[derive(Clone)]
pub struct NodeFn(UserNodeFn);

impl NodeFn {
    pub fn new<F>(f: F) -> NodeFn
    where
        F: Fn(&NodeBatch<'_>) -> Result<FieldMap, ExecError> + Send + Sync + 'static,
    {
        NodeFn(Arc::new(f))
    }

    pub fn call(&self, nodes: &NodeBatch<'_>) -> Result<FieldMap, ExecError> {
        (self.0)(nodes)
    }
}

impl fmt::Debug for NodeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NodeFn(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_by_name_matches_helper() {
        let named = MessageFn::builtin("u_mul_e", "h", Some("w"), "m").unwrap();
        let MessageFn::Builtin(named) = named else {
            panic!("expected built-in");
        };
        let MessageFn::Builtin(helper) = u_mul_e("h", "w", "m") else {
            panic!("expected built-in");
        };
        assert_eq!(named, helper);
        assert_eq!(named.field_of(Target::Edge), Some("w"));
        assert_eq!(named.field_of(Target::Dst), None);
        assert!(named.reads_edges());
    }

    #[test]
    fn binary_builtin_defaults_rhs_to_lhs_field() {
        let MessageFn::Builtin(b) = MessageFn::builtin("u_add_v", "h", None, "m").unwrap() else {
            panic!("expected built-in");
        };
        assert_eq!(b.rhs_field.as_deref(), Some("h"));
    }

    #[test]
    fn unknown_names_are_rejected() {
        assert!(matches!(
            MessageFn::builtin("u_pow_e", "h", None, "m"),
            Err(ExecError::UnknownBuiltin { .. })
        ));
        assert!(matches!(
            ReduceFn::builtin("median", "m", "h"),
            Err(ExecError::UnknownBuiltin { .. })
        ));
    }

    #[test]
    fn user_functions_debug_opaquely() {
        let f = MessageFn::user(|edges| {
            let mut out = FieldMap::new();
            out.insert("m".into(), edges.src("h")?);
            Ok(out)
        });
        assert_eq!(format!("{f:?}"), "User(..)");
        assert!(!f.is_builtin());
    }
}
