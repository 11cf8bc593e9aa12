//! Messages sent along edges and not yet received.
//!
//! `send` computes messages and parks them here, one row per edge id;
//! `recv` reduces the parked messages at their destinations and consumes
//! them. Sending twice on the same edge before a receive keeps only the
//! later message.

use std::collections::BTreeSet;

use msgflow_core::{zero_initializer, CoreError, EdgeId, Frame, IndexKind};

use crate::error::ExecError;
use crate::function::FieldMap;

/// Pending messages in edge space.
#[derive(Debug, Clone)]
pub struct Outbox {
    frame: Frame,
    sent: BTreeSet<EdgeId>,
}

impl Default for Outbox {
    fn default() -> Self {
        Outbox::new()
    }
}

impl Outbox {
    pub fn new() -> Self {
        Outbox {
            frame: Frame::with_default_initializer(0, zero_initializer()),
            sent: BTreeSet::new(),
        }
    }

    /// Number of edges holding a message.
    pub fn len(&self) -> usize {
        self.sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }

    /// Edges holding a message, ascending.
    pub fn edges(&self) -> impl Iterator<Item = EdgeId> + '_ {
        self.sent.iter().copied()
    }

    pub fn contains(&self, edge: EdgeId) -> bool {
        self.sent.contains(&edge)
    }

    /// Stores one message row per edge, overwriting earlier messages on the
    /// same edges. All or nothing.
    pub(crate) fn store(&mut self, num_edges: usize, edges: &[EdgeId], messages: &FieldMap) -> Result<(), ExecError> {
        if num_edges > self.frame.num_rows() {
            self.frame.grow(num_edges - self.frame.num_rows())?;
        }
        let rows: Vec<usize> = edges.iter().map(|e| e.index()).collect();
        self.frame.commit(&rows, messages)?;
        self.sent.extend(edges.iter().copied());
        Ok(())
    }

    /// Message rows of `edges`, in that order, for every stored field.
    pub(crate) fn gather(&self, edges: &[EdgeId]) -> Result<FieldMap, ExecError> {
        if let Some(&missing) = edges.iter().find(|&&e| !self.sent.contains(&e)) {
            return Err(CoreError::index(IndexKind::Edge, missing.index(), self.frame.num_rows()).into());
        }
        let rows: Vec<usize> = edges.iter().map(|e| e.index()).collect();
        let mut out = FieldMap::new();
        for field in self.frame.fields() {
            out.insert(field.to_string(), self.frame.gather(field, &rows)?);
        }
        Ok(out)
    }

    /// Drops the messages of `edges`.
    pub(crate) fn consume(&mut self, edges: &[EdgeId]) {
        for e in edges {
            self.sent.remove(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use msgflow_core::Tensor;

    use super::*;

    fn rows(values: &[f64]) -> FieldMap {
        FieldMap::from([("m".to_string(), Tensor::scalar_rows(values, 1))])
    }

    #[test]
    fn later_send_overwrites() {
        let mut outbox = Outbox::new();
        outbox.store(3, &[EdgeId(0), EdgeId(2)], &rows(&[1.0, 2.0])).unwrap();
        outbox.store(3, &[EdgeId(2)], &rows(&[5.0])).unwrap();
        assert_eq!(outbox.edges().collect::<Vec<_>>(), vec![EdgeId(0), EdgeId(2)]);
        let m = outbox.gather(&[EdgeId(2), EdgeId(0)]).unwrap();
        assert_eq!(m["m"].data(), &[5.0, 1.0]);
    }

    #[test]
    fn consumed_edges_cannot_be_gathered() {
        let mut outbox = Outbox::new();
        outbox.store(2, &[EdgeId(1)], &rows(&[1.0])).unwrap();
        outbox.consume(&[EdgeId(1)]);
        assert!(outbox.is_empty());
        assert!(outbox.gather(&[EdgeId(1)]).is_err());
    }

    #[test]
    fn outbox_grows_with_the_graph() {
        let mut outbox = Outbox::new();
        outbox.store(1, &[EdgeId(0)], &rows(&[1.0])).unwrap();
        outbox.store(4, &[EdgeId(3)], &rows(&[2.0])).unwrap();
        assert_eq!(outbox.gather(&[EdgeId(0), EdgeId(3)]).unwrap()["m"].data(), &[1.0, 2.0]);
    }
}
