//! Feature frames: per-node and per-edge field tables.
//!
//! A [`Frame`] maps field names to tensors whose leading dimension equals the
//! frame's row count. Every write is validated. Fields keep their insertion
//! order. Each name is interned to a [`FieldId`] the first time it is
//! written; removing a field does not renumber the others, and writing the
//! same name again brings back its old id.
//!
//! # Initializers
//!
//! When the row count grows (nodes or edges are added), every existing field
//! needs values for the new rows. Those come from an [`Initializer`]: a
//! per-field one if registered, else the frame-wide default. If neither
//! exists the rows are recorded as pending and the field becomes unreadable
//! until an initializer is registered or the rows are overwritten. The error
//! is raised lazily, at read time, as [`CoreError::UninitializedField`].

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use indexmap::IndexMap;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::{CoreError, IndexKind};
use crate::id::FieldId;
use crate::tensor::{DType, Device, Shape, Tensor};

/// Fills rows `range` of a field.
///
/// Receives the shape of the block to produce (`[range.len(), *feature]`),
/// the field's dtype and device, and the row range being filled. Must return
/// a tensor of exactly that shape.
pub type Initializer = Arc<dyn Fn(&[usize], DType, Device, Range<usize>) -> Tensor + Send + Sync>;

/// Initializer producing zeros.
pub fn zero_initializer() -> Initializer {
    Arc::new(|shape: &[usize], dtype: DType, device: Device, _range: Range<usize>| {
        Tensor::zeros(shape, dtype, device)
    })
}

/// Initializer producing uniform values in `[low, high)`.
///
/// Deterministic: the generator is seeded from `seed` and the first row of the
/// range, so the same rows always receive the same values.
pub fn uniform_initializer(seed: u64, low: f64, high: f64) -> Initializer {
    Arc::new(move |shape: &[usize], dtype: DType, device: Device, range: Range<usize>| {
        let mut rng = ChaCha8Rng::seed_from_u64(seed ^ range.start as u64);
        Tensor::zeros(shape, dtype, device).map(|_| low + (high - low) * rng.gen::<f64>())
    })
}

/// One stored field.
#[derive(Clone)]
struct Column {
    data: Tensor,
    /// Rows never written and not yet initialized.
    pending: BTreeSet<usize>,
}

impl Column {
    /// Groups pending rows into maximal contiguous ranges.
    fn pending_runs(&self) -> Vec<Range<usize>> {
        let mut runs: Vec<Range<usize>> = Vec::new();
        for &r in &self.pending {
            match runs.last_mut() {
                Some(last) if last.end == r => last.end = r + 1,
                _ => runs.push(r..r + 1),
            }
        }
        runs
    }
}

/// A table of named fields sharing one row count.
#[derive(Clone, Default)]
pub struct Frame {
    num_rows: usize,
    columns: IndexMap<String, Column>,
    field_ids: HashMap<String, FieldId>,
    initializers: HashMap<String, Initializer>,
    default_initializer: Option<Initializer>,
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("num_rows", &self.num_rows)
            .field("fields", &self.columns.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Frame {
    /// Creates an empty frame with `num_rows` rows and no fields.
    pub fn new(num_rows: usize) -> Self {
        Frame {
            num_rows,
            ..Frame::default()
        }
    }

    /// Creates an empty frame whose fields fall back to `init`.
    pub fn with_default_initializer(num_rows: usize, init: Initializer) -> Self {
        Frame {
            num_rows,
            default_initializer: Some(init),
            ..Frame::default()
        }
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Field names in insertion order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.columns.contains_key(field)
    }

    /// Stable identifier of a field, if present.
    pub fn field_id(&self, field: &str) -> Option<FieldId> {
        if !self.columns.contains_key(field) {
            return None;
        }
        self.field_ids.get(field).copied()
    }

    fn intern(&mut self, field: &str) {
        if !self.field_ids.contains_key(field) {
            let id = FieldId(self.field_ids.len() as u32);
            self.field_ids.insert(field.to_string(), id);
        }
    }

    /// Device shared by the frame's fields, if any field is stored.
    pub fn device(&self) -> Option<Device> {
        self.columns.values().next().map(|c| c.data.device())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Borrows a whole field.
    pub fn get(&self, field: &str) -> Result<&Tensor, CoreError> {
        let column = self
            .columns
            .get(field)
            .ok_or_else(|| CoreError::UnknownField {
                field: field.to_string(),
            })?;
        if !column.pending.is_empty() {
            return Err(CoreError::UninitializedField {
                field: field.to_string(),
                rows: column.pending.len(),
            });
        }
        Ok(&column.data)
    }

    /// Copies the given rows of a field.
    pub fn gather(&self, field: &str, rows: &[usize]) -> Result<Tensor, CoreError> {
        self.get(field)?.gather_rows(rows)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Replaces (or creates) a whole field.
    ///
    /// The leading dimension must equal the row count and the device must
    /// match the frame's other fields.
    pub fn set(&mut self, field: &str, tensor: Tensor) -> Result<(), CoreError> {
        if tensor.shape().is_empty() || tensor.num_rows() != self.num_rows {
            return Err(CoreError::shape(
                format!("set field '{field}'"),
                &[self.num_rows],
                tensor.shape(),
            ));
        }
        self.check_device(field, tensor.device())?;
        let column = Column {
            data: tensor,
            pending: BTreeSet::new(),
        };
        match self.columns.get_mut(field) {
            Some(existing) => *existing = column,
            None => {
                self.intern(field);
                self.columns.insert(field.to_string(), column);
            }
        }
        Ok(())
    }

    /// Overwrites selected rows of a field.
    ///
    /// If the field does not exist yet it is created; its other rows are
    /// filled by the initializer or left pending.
    pub fn set_rows(&mut self, field: &str, rows: &[usize], tensor: &Tensor) -> Result<(), CoreError> {
        let mut updates = IndexMap::new();
        updates.insert(field.to_string(), tensor.clone());
        self.commit(rows, &updates)
    }

    /// Writes several fields for the same rows, all or nothing.
    ///
    /// Every update is validated (and new fields are fully built) before the
    /// first write, so a failure leaves the frame untouched.
    pub fn commit(&mut self, rows: &[usize], updates: &IndexMap<String, Tensor>) -> Result<(), CoreError> {
        if let Some(&bad) = rows.iter().find(|&&r| r >= self.num_rows) {
            return Err(CoreError::index(IndexKind::Row, bad, self.num_rows));
        }
        let mut device = self.device();
        let mut staged: Vec<(&str, Option<Column>)> = Vec::with_capacity(updates.len());
        for (field, tensor) in updates {
            if tensor.shape().is_empty() || tensor.num_rows() != rows.len() {
                return Err(CoreError::shape(
                    format!("write field '{field}'"),
                    &[rows.len()],
                    tensor.shape(),
                ));
            }
            if let Some(expected) = device {
                if expected != tensor.device() {
                    return Err(CoreError::DeviceMismatch {
                        expected,
                        got: tensor.device(),
                    });
                }
            }
            device = Some(tensor.device());
            match self.columns.get(field) {
                Some(existing) => {
                    existing
                        .data
                        .check_row_compatible(tensor, &format!("write field '{field}'"))?;
                    staged.push((field.as_str(), None));
                }
                None => {
                    let column = self.build_column(field, rows, tensor)?;
                    staged.push((field.as_str(), Some(column)));
                }
            }
        }

        for (field, new_column) in staged {
            match new_column {
                Some(column) => {
                    self.intern(field);
                    self.columns.insert(field.to_string(), column);
                }
                None => {
                    let tensor = &updates[field];
                    if let Some(column) = self.columns.get_mut(field) {
                        column.data.scatter_rows(rows, tensor)?;
                        for r in rows {
                            column.pending.remove(r);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Removes a field, returning its data if it was fully initialized.
    pub fn remove(&mut self, field: &str) -> Option<Tensor> {
        self.columns
            .shift_remove(field)
            .filter(|c| c.pending.is_empty())
            .map(|c| c.data)
    }

    fn check_device(&self, field: &str, device: Device) -> Result<(), CoreError> {
        let other = self
            .columns
            .iter()
            .find(|(name, _)| name.as_str() != field)
            .map(|(_, c)| c.data.device());
        match other {
            Some(expected) if expected != device => Err(CoreError::DeviceMismatch {
                expected,
                got: device,
            }),
            _ => Ok(()),
        }
    }

    /// Builds a full-height column for a field first written on `rows`.
    fn build_column(&self, field: &str, rows: &[usize], tensor: &Tensor) -> Result<Column, CoreError> {
        let mut shape = Shape::from_slice(&[self.num_rows]);
        shape.extend_from_slice(tensor.feature_shape());
        let mut data = Tensor::zeros(&shape, tensor.dtype(), tensor.device());
        data.scatter_rows(rows, tensor)?;
        let mut pending: BTreeSet<usize> = (0..self.num_rows).collect();
        for r in rows {
            pending.remove(r);
        }
        let mut column = Column { data, pending };
        if let Some(init) = self.initializer_for(field) {
            fill_pending(field, &mut column, &init)?;
        }
        Ok(column)
    }

    // -----------------------------------------------------------------------
    // Initializers
    // -----------------------------------------------------------------------

    fn initializer_for(&self, field: &str) -> Option<Initializer> {
        self.initializers
            .get(field)
            .or(self.default_initializer.as_ref())
            .cloned()
    }

    /// Registers an initializer for one field and fills its pending rows.
    pub fn register_initializer(&mut self, field: &str, init: Initializer) -> Result<(), CoreError> {
        self.initializers.insert(field.to_string(), init.clone());
        if let Some(column) = self.columns.get_mut(field) {
            fill_pending(field, column, &init)?;
        }
        Ok(())
    }

    /// Sets the initializer used by fields without their own, and fills every
    /// pending row it now covers.
    pub fn set_default_initializer(&mut self, init: Initializer) -> Result<(), CoreError> {
        self.default_initializer = Some(init);
        let fields: Vec<String> = self.columns.keys().cloned().collect();
        for field in fields {
            if let Some(init) = self.initializer_for(&field) {
                if let Some(column) = self.columns.get_mut(&field) {
                    fill_pending(&field, column, &init)?;
                }
            }
        }
        Ok(())
    }

    /// Adds `count` rows, initializing them where an initializer exists.
    ///
    /// Every grown column is built before any is replaced, so a failing
    /// initializer leaves the frame at its old row count.
    pub fn grow(&mut self, count: usize) -> Result<(), CoreError> {
        if count == 0 {
            return Ok(());
        }
        let old = self.num_rows;
        let new_rows = old + count;
        let mut grown: Vec<Column> = Vec::with_capacity(self.columns.len());
        for (field, column) in &self.columns {
            let mut shape = Shape::from_slice(&[count]);
            shape.extend_from_slice(column.data.feature_shape());
            let filler = Tensor::zeros(&shape, column.data.dtype(), column.data.device());
            let mut next = Column {
                data: Tensor::concat_rows(&[column.data.clone(), filler])?,
                pending: column.pending.clone(),
            };
            next.pending.extend(old..new_rows);
            if let Some(init) = self.initializer_for(field) {
                fill_pending(field, &mut next, &init)?;
            }
            grown.push(next);
        }
        for (column, next) in self.columns.values_mut().zip(grown) {
            *column = next;
        }
        self.num_rows = new_rows;
        tracing::trace!("frame grew from {} to {} rows", old, self.num_rows);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Batching
    // -----------------------------------------------------------------------

    /// Stacks frames row-wise. Every frame must carry the first frame's fields.
    pub fn concat(frames: &[&Frame]) -> Result<Frame, CoreError> {
        let first = frames.first().ok_or(CoreError::EmptyBatch)?;
        let mut out = Frame::new(frames.iter().map(|f| f.num_rows).sum());
        out.initializers = first.initializers.clone();
        out.default_initializer = first.default_initializer.clone();
        for field in first.fields() {
            let parts = frames
                .iter()
                .map(|f| f.get(field).cloned())
                .collect::<Result<Vec<_>, _>>()?;
            out.set(field, Tensor::concat_rows(&parts)?)?;
        }
        Ok(out)
    }

    /// Copies a contiguous block of rows into a new frame.
    pub fn slice(&self, range: Range<usize>) -> Result<Frame, CoreError> {
        let mut out = Frame::new(range.len());
        out.initializers = self.initializers.clone();
        out.default_initializer = self.default_initializer.clone();
        for field in self.fields() {
            out.set(field, self.get(field)?.slice_rows(range.clone())?)?;
        }
        Ok(out)
    }
}

/// Runs the initializer over every pending run of a column.
fn fill_pending(field: &str, column: &mut Column, init: &Initializer) -> Result<(), CoreError> {
    for run in column.pending_runs() {
        let mut shape = Shape::from_slice(&[run.len()]);
        shape.extend_from_slice(column.data.feature_shape());
        let block = init(&shape, column.data.dtype(), column.data.device(), run.clone());
        if block.shape() != shape.as_slice() {
            return Err(CoreError::shape(
                format!("initializer for '{field}'"),
                &shape,
                block.shape(),
            ));
        }
        let rows: Vec<usize> = run.collect();
        column.data.scatter_rows(&rows, &block)?;
    }
    column.pending.clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ones(rows: usize, width: usize) -> Tensor {
        Tensor::ones(&[rows, width], DType::F32, Device::Cpu)
    }

    #[test]
    fn set_validates_leading_dimension() {
        let mut frame = Frame::new(3);
        frame.set("h", ones(3, 2)).unwrap();
        let err = frame.set("w", ones(2, 2)).unwrap_err();
        assert!(matches!(err, CoreError::ShapeMismatch { .. }));
        assert!(!frame.contains("w"));
    }

    #[test]
    fn get_unknown_field() {
        let frame = Frame::new(1);
        assert!(matches!(frame.get("nope"), Err(CoreError::UnknownField { .. })));
    }

    #[test]
    fn set_rejects_mixed_devices() {
        let mut frame = Frame::new(2);
        frame.set("a", ones(2, 1)).unwrap();
        let err = frame.set("b", ones(2, 1).to_device(Device::Accel(0))).unwrap_err();
        assert!(matches!(err, CoreError::DeviceMismatch { .. }));
        // Replacing the only field may move it.
        frame.set("a", ones(2, 1).to_device(Device::Accel(0))).unwrap();
        assert_eq!(frame.device(), Some(Device::Accel(0)));
    }

    #[test]
    fn grow_without_initializer_is_lazy_error() {
        let mut frame = Frame::new(2);
        frame.set("h", ones(2, 2)).unwrap();
        frame.grow(1).unwrap();
        match frame.get("h") {
            Err(CoreError::UninitializedField { field, rows }) => {
                assert_eq!(field, "h");
                assert_eq!(rows, 1);
            }
            other => panic!("expected UninitializedField, got {:?}", other),
        }

        frame.register_initializer("h", zero_initializer()).unwrap();
        let h = frame.get("h").unwrap();
        assert_eq!(h.shape(), &[3, 2]);
        assert_eq!(h.row(2), &[0.0, 0.0]);
    }

    #[test]
    fn grow_with_default_initializer_fills_immediately() {
        let mut frame = Frame::new(1);
        frame
            .set_default_initializer(Arc::new(|shape: &[usize], dtype: DType, device: Device, _: Range<usize>| {
                Tensor::full(shape, 7.0, dtype, device)
            }))
            .unwrap();
        frame.set("h", ones(1, 1)).unwrap();
        frame.grow(2).unwrap();
        assert_eq!(frame.get("h").unwrap().data(), &[1.0, 7.0, 7.0]);
    }

    #[test]
    fn initializer_receives_the_filled_range() {
        let mut frame = Frame::new(2);
        frame.set("h", ones(2, 1)).unwrap();
        frame
            .register_initializer(
                "h",
                Arc::new(|shape: &[usize], dtype: DType, device: Device, range: Range<usize>| {
                    let data = range.map(|r| r as f64).collect();
                    Tensor::from_vec_typed(shape, data, dtype, device).unwrap()
                }),
            )
            .unwrap();
        frame.grow(3).unwrap();
        assert_eq!(frame.get("h").unwrap().data(), &[1.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn overwriting_pending_rows_makes_field_readable() {
        let mut frame = Frame::new(1);
        frame.set("h", ones(1, 1)).unwrap();
        frame.grow(1).unwrap();
        frame.set_rows("h", &[1], &ones(1, 1).scale(3.0)).unwrap();
        assert_eq!(frame.get("h").unwrap().data(), &[1.0, 3.0]);
    }

    #[test]
    fn partial_write_of_new_field() {
        let mut frame = Frame::new(3);
        frame.set_rows("m", &[2], &ones(1, 2)).unwrap();
        assert!(matches!(
            frame.get("m"),
            Err(CoreError::UninitializedField { rows: 2, .. })
        ));

        let mut frame = Frame::new(3);
        frame.set_default_initializer(zero_initializer()).unwrap();
        frame.set_rows("m", &[2], &ones(1, 2)).unwrap();
        assert_eq!(frame.get("m").unwrap().data(), &[0., 0., 0., 0., 1., 1.]);
    }

    #[test]
    fn commit_is_all_or_nothing() {
        let mut frame = Frame::new(2);
        frame.set("a", ones(2, 2)).unwrap();
        let mut updates = IndexMap::new();
        updates.insert("b".to_string(), ones(1, 1));
        // Wrong feature width for the existing field.
        updates.insert("a".to_string(), ones(1, 3));
        assert!(frame.commit(&[0], &updates).is_err());
        assert!(!frame.contains("b"));
        assert_eq!(frame.get("a").unwrap().data(), &[1.0; 4]);
    }

    #[test]
    fn field_ids_follow_insertion_order() {
        let mut frame = Frame::new(1);
        frame.set("x", ones(1, 1)).unwrap();
        frame.set("y", ones(1, 1)).unwrap();
        assert_eq!(frame.field_id("x"), Some(FieldId(0)));
        assert_eq!(frame.field_id("y"), Some(FieldId(1)));
        assert_eq!(frame.field_id("z"), None);
    }

    #[test]
    fn removing_a_field_keeps_other_ids() {
        let mut frame = Frame::new(1);
        frame.set("x", ones(1, 1)).unwrap();
        frame.set("y", ones(1, 1)).unwrap();
        frame.remove("x");
        assert_eq!(frame.field_id("x"), None);
        assert_eq!(frame.field_id("y"), Some(FieldId(1)));

        frame.set("z", ones(1, 1)).unwrap();
        assert_eq!(frame.field_id("z"), Some(FieldId(2)));
        frame.set("x", ones(1, 1)).unwrap();
        assert_eq!(frame.field_id("x"), Some(FieldId(0)));
    }

    #[test]
    fn grow_is_all_or_nothing() {
        let mut frame = Frame::new(2);
        frame.set("a", ones(2, 1)).unwrap();
        frame.set("b", ones(2, 1)).unwrap();
        frame.register_initializer("a", zero_initializer()).unwrap();
        frame
            .register_initializer(
                "b",
                Arc::new(|_: &[usize], dtype: DType, device: Device, _: Range<usize>| {
                    Tensor::zeros(&[7, 1], dtype, device)
                }),
            )
            .unwrap();
        assert!(matches!(frame.grow(1), Err(CoreError::ShapeMismatch { .. })));
        assert_eq!(frame.num_rows(), 2);
        assert_eq!(frame.get("a").unwrap().num_rows(), 2);
        assert_eq!(frame.get("b").unwrap().num_rows(), 2);
    }

    #[test]
    fn uniform_initializer_is_deterministic() {
        let init = uniform_initializer(42, -1.0, 1.0);
        let a = init(&[4, 2], DType::F64, Device::Cpu, 0..4);
        let b = init(&[4, 2], DType::F64, Device::Cpu, 0..4);
        assert_eq!(a, b);
        assert!(a.data().iter().all(|v| (-1.0..1.0).contains(v)));

        let c = init(&[3, 5], DType::F32, Device::Accel(1), 4..7);
        assert_eq!(c.shape(), &[3, 5]);
        assert_eq!((c.dtype(), c.device()), (DType::F32, Device::Accel(1)));
        assert!(c.data().iter().all(|&v| v == v as f32 as f64 && (-1.0..=1.0).contains(&v)));
    }

    #[test]
    fn concat_and_slice() {
        let mut a = Frame::new(1);
        a.set("h", ones(1, 1)).unwrap();
        let mut b = Frame::new(2);
        b.set("h", ones(2, 1).scale(2.0)).unwrap();
        let c = Frame::concat(&[&a, &b]).unwrap();
        assert_eq!(c.get("h").unwrap().data(), &[1.0, 2.0, 2.0]);
        assert_eq!(c.slice(1..3).unwrap().get("h").unwrap().data(), &[2.0, 2.0]);
    }
}
