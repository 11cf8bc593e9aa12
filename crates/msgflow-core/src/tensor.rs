//! Dense host tensors: the tensor-algebra interface consumed by the engine.
//!
//! A [`Tensor`] is a row-major buffer with a shape, an element type
//! ([`DType`]), and a placement tag ([`Device`]). The leading dimension is
//! the item axis (one row per node or edge); the remaining dimensions are the
//! per-item feature shape.
//!
//! # Storage
//!
//! Elements are stored as `f64` regardless of dtype. An `F32` tensor rounds
//! every value through `f32` on construction and after every op, so results
//! match what a single-precision backend would produce.
//!
//! # Placement
//!
//! Devices are tags only; all arithmetic runs on the host. Every binary op
//! checks that both operands carry the same tag and fails with
//! [`CoreError::DeviceMismatch`] otherwise. There is no implicit transfer.

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{CoreError, IndexKind};

/// Tensor shape. Most feature tensors have rank <= 4.
pub type Shape = SmallVec<[usize; 4]>;

// ---------------------------------------------------------------------------
// Element type and placement
// ---------------------------------------------------------------------------

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    F32,
    F64,
}

impl DType {
    /// Rounds a value to the precision of this dtype.
    pub fn round(self, value: f64) -> f64 {
        match self {
            DType::F32 => value as f32 as f64,
            DType::F64 => value,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => f.write_str("f32"),
            DType::F64 => f.write_str("f64"),
        }
    }
}

/// Placement of a tensor's storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Device {
    #[default]
    Cpu,
    /// An accelerator identified by ordinal.
    Accel(u32),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => f.write_str("cpu"),
            Device::Accel(n) => write!(f, "accel:{n}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Reductions
// ---------------------------------------------------------------------------

/// Reduction kinds supported along a tensor axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceKind {
    Sum,
    Max,
    Min,
    Mean,
    Prod,
}

impl ReduceKind {
    /// The identity element of the combine step for the given dtype.
    ///
    /// `Max` and `Min` use infinities so that any finite message wins. The
    /// value is rounded to `dtype`, like every stored element.
    pub fn identity(self, dtype: DType) -> f64 {
        let value = match self {
            ReduceKind::Sum | ReduceKind::Mean => 0.0,
            ReduceKind::Prod => 1.0,
            ReduceKind::Max => f64::NEG_INFINITY,
            ReduceKind::Min => f64::INFINITY,
        };
        dtype.round(value)
    }

    /// Folds one value into an accumulator.
    pub fn combine(self, acc: f64, value: f64) -> f64 {
        match self {
            ReduceKind::Sum | ReduceKind::Mean => acc + value,
            ReduceKind::Prod => acc * value,
            ReduceKind::Max => acc.max(value),
            ReduceKind::Min => acc.min(value),
        }
    }

    /// Turns an accumulator over `count` values into the final result.
    ///
    /// Only `Mean` does any work; an empty reduction yields the identity.
    pub fn finalize(self, acc: f64, count: usize) -> f64 {
        match self {
            ReduceKind::Mean if count > 0 => acc / count as f64,
            _ => acc,
        }
    }

    /// Lower-case name used by the combinator registry.
    pub fn name(self) -> &'static str {
        match self {
            ReduceKind::Sum => "sum",
            ReduceKind::Max => "max",
            ReduceKind::Min => "min",
            ReduceKind::Mean => "mean",
            ReduceKind::Prod => "prod",
        }
    }
}

// ---------------------------------------------------------------------------
// Tensor
// ---------------------------------------------------------------------------

/// A dense, row-major tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Shape,
    dtype: DType,
    device: Device,
    data: Vec<f64>,
}

fn numel(shape: &[usize]) -> usize {
    shape.iter().product()
}

impl Tensor {
    /// Builds an `F32` CPU tensor from a flat buffer.
    ///
    /// Fails with [`CoreError::ShapeMismatch`] if the buffer length does not
    /// match the shape.
    pub fn from_vec(shape: &[usize], data: Vec<f64>) -> Result<Tensor, CoreError> {
        Tensor::from_vec_typed(shape, data, DType::F32, Device::Cpu)
    }

    /// Builds a tensor with an explicit dtype and device.
    pub fn from_vec_typed(
        shape: &[usize],
        mut data: Vec<f64>,
        dtype: DType,
        device: Device,
    ) -> Result<Tensor, CoreError> {
        if numel(shape) != data.len() {
            return Err(CoreError::shape("from_vec", shape, &[data.len()]));
        }
        if dtype == DType::F32 {
            data.iter_mut().for_each(|v| *v = dtype.round(*v));
        }
        Ok(Tensor {
            shape: Shape::from_slice(shape),
            dtype,
            device,
            data,
        })
    }

    /// A tensor filled with `value`.
    pub fn full(shape: &[usize], value: f64, dtype: DType, device: Device) -> Tensor {
        Tensor {
            shape: Shape::from_slice(shape),
            dtype,
            device,
            data: vec![dtype.round(value); numel(shape)],
        }
    }

    pub fn zeros(shape: &[usize], dtype: DType, device: Device) -> Tensor {
        Tensor::full(shape, 0.0, dtype, device)
    }

    pub fn ones(shape: &[usize], dtype: DType, device: Device) -> Tensor {
        Tensor::full(shape, 1.0, dtype, device)
    }

    /// An `F32` CPU tensor of shape `[values.len(), width]` where row `i` is
    /// `values[i]` repeated `width` times.
    pub fn scalar_rows(values: &[f64], width: usize) -> Tensor {
        let data = values
            .iter()
            .flat_map(|&v| std::iter::repeat(v).take(width))
            .collect();
        Tensor {
            shape: Shape::from_slice(&[values.len(), width]),
            dtype: DType::F32,
            device: Device::Cpu,
            data,
        }
        .rounded()
    }

    fn rounded(mut self) -> Tensor {
        if self.dtype == DType::F32 {
            let dtype = self.dtype;
            self.data.iter_mut().for_each(|v| *v = dtype.round(*v));
        }
        self
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Size of the leading (item) dimension. A rank-0 tensor has one row.
    pub fn num_rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(1)
    }

    /// Per-item feature shape (everything after the leading dimension).
    pub fn feature_shape(&self) -> &[usize] {
        if self.shape.is_empty() {
            &[]
        } else {
            &self.shape[1..]
        }
    }

    /// Number of elements in one row.
    pub fn row_len(&self) -> usize {
        numel(self.feature_shape())
    }

    /// Borrows row `i`. Panics if out of range; use [`Tensor::try_row`] for
    /// a checked variant.
    pub fn row(&self, i: usize) -> &[f64] {
        let w = self.row_len();
        &self.data[i * w..(i + 1) * w]
    }

    pub fn try_row(&self, i: usize) -> Result<&[f64], CoreError> {
        if i >= self.num_rows() {
            return Err(CoreError::index(IndexKind::Row, i, self.num_rows()));
        }
        Ok(self.row(i))
    }

    /// Returns a copy tagged with another device.
    pub fn to_device(&self, device: Device) -> Tensor {
        Tensor {
            device,
            ..self.clone()
        }
    }

    /// Returns a copy converted to another dtype.
    pub fn to_dtype(&self, dtype: DType) -> Tensor {
        Tensor {
            dtype,
            ..self.clone()
        }
        .rounded()
    }

    /// Reinterprets the buffer under a new shape with the same element count.
    pub fn reshape(&self, shape: &[usize]) -> Result<Tensor, CoreError> {
        if numel(shape) != self.numel() {
            return Err(CoreError::shape("reshape", &self.shape, shape));
        }
        Ok(Tensor {
            shape: Shape::from_slice(shape),
            ..self.clone()
        })
    }

    // -----------------------------------------------------------------------
    // Compatibility checks
    // -----------------------------------------------------------------------

    /// Fails unless `other` lives on the same device.
    pub fn check_device(&self, other: &Tensor) -> Result<(), CoreError> {
        if self.device != other.device {
            return Err(CoreError::DeviceMismatch {
                expected: self.device,
                got: other.device,
            });
        }
        Ok(())
    }

    /// Fails unless `other` has the same device, dtype, and feature shape.
    pub fn check_row_compatible(&self, other: &Tensor, context: &str) -> Result<(), CoreError> {
        self.check_device(other)?;
        if self.dtype != other.dtype {
            return Err(CoreError::DTypeMismatch {
                expected: self.dtype,
                got: other.dtype,
            });
        }
        if self.feature_shape() != other.feature_shape() {
            return Err(CoreError::shape(
                context,
                self.feature_shape(),
                other.feature_shape(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Row indexing
    // -----------------------------------------------------------------------

    /// Gathers the given rows into a new tensor, in order. Repeats allowed.
    pub fn gather_rows(&self, rows: &[usize]) -> Result<Tensor, CoreError> {
        let n = self.num_rows();
        let w = self.row_len();
        let mut data = Vec::with_capacity(rows.len() * w);
        for &r in rows {
            if r >= n {
                return Err(CoreError::index(IndexKind::Row, r, n));
            }
            data.extend_from_slice(self.row(r));
        }
        let mut shape = Shape::from_slice(&[rows.len()]);
        shape.extend_from_slice(self.feature_shape());
        Ok(Tensor {
            shape,
            dtype: self.dtype,
            device: self.device,
            data,
        })
    }

    /// Overwrites the given rows with the rows of `src`, in order.
    ///
    /// All indices and shapes are validated before any row is written.
    pub fn scatter_rows(&mut self, rows: &[usize], src: &Tensor) -> Result<(), CoreError> {
        self.check_row_compatible(src, "scatter_rows")?;
        if src.num_rows() != rows.len() {
            return Err(CoreError::shape(
                "scatter_rows",
                &[rows.len()],
                &[src.num_rows()],
            ));
        }
        let n = self.num_rows();
        if let Some(&bad) = rows.iter().find(|&&r| r >= n) {
            return Err(CoreError::index(IndexKind::Row, bad, n));
        }
        let w = self.row_len();
        for (i, &r) in rows.iter().enumerate() {
            self.data[r * w..(r + 1) * w].copy_from_slice(src.row(i));
        }
        Ok(())
    }

    /// Copies a contiguous range of rows.
    pub fn slice_rows(&self, range: Range<usize>) -> Result<Tensor, CoreError> {
        let n = self.num_rows();
        if range.start > range.end || range.end > n {
            return Err(CoreError::index(IndexKind::Row, range.end, n));
        }
        let w = self.row_len();
        let mut shape = Shape::from_slice(&[range.len()]);
        shape.extend_from_slice(self.feature_shape());
        Ok(Tensor {
            shape,
            dtype: self.dtype,
            device: self.device,
            data: self.data[range.start * w..range.end * w].to_vec(),
        })
    }

    /// Stacks tensors along the leading dimension.
    ///
    /// All parts must agree on device, dtype, and feature shape.
    pub fn concat_rows(parts: &[Tensor]) -> Result<Tensor, CoreError> {
        let first = parts
            .first()
            .ok_or_else(|| CoreError::shape("concat_rows: no inputs", &[1], &[0]))?;
        let mut data = Vec::with_capacity(parts.iter().map(Tensor::numel).sum());
        let mut rows = 0;
        for part in parts {
            first.check_row_compatible(part, "concat_rows")?;
            rows += part.num_rows();
            data.extend_from_slice(&part.data);
        }
        let mut shape = Shape::from_slice(&[rows]);
        shape.extend_from_slice(first.feature_shape());
        Ok(Tensor {
            shape,
            dtype: first.dtype,
            device: first.device,
            data,
        })
    }

    // -----------------------------------------------------------------------
    // Elementwise ops
    // -----------------------------------------------------------------------

    /// Applies `f` to every element, in storage order.
    pub fn map(&self, mut f: impl FnMut(f64) -> f64) -> Tensor {
        Tensor {
            data: self.data.iter().map(|&v| f(v)).collect(),
            ..self.clone()
        }
        .rounded()
    }

    /// Multiplies every element by a scalar.
    pub fn scale(&self, factor: f64) -> Tensor {
        self.map(|v| v * factor)
    }

    /// Combines two tensors elementwise with per-row broadcasting.
    ///
    /// Both operands must have the same number of rows. Their feature shapes
    /// must be equal, or one of them must hold a single element per row, in
    /// which case that element is broadcast across the other's row.
    pub fn zip_with(
        &self,
        other: &Tensor,
        context: &str,
        f: impl Fn(f64, f64) -> f64,
    ) -> Result<Tensor, CoreError> {
        self.check_device(other)?;
        if self.dtype != other.dtype {
            return Err(CoreError::DTypeMismatch {
                expected: self.dtype,
                got: other.dtype,
            });
        }
        if self.num_rows() != other.num_rows() {
            return Err(CoreError::shape(context, &self.shape, &other.shape));
        }
        let out_feature = broadcast_feature(self.feature_shape(), other.feature_shape())
            .ok_or_else(|| CoreError::shape(context, &self.shape, &other.shape))?;
        let rows = self.num_rows();
        let width = numel(&out_feature);
        let (lw, rw) = (self.row_len(), other.row_len());
        let mut data = Vec::with_capacity(rows * width);
        for r in 0..rows {
            let (l, rr) = (self.row(r), other.row(r));
            for k in 0..width {
                let a = if lw == 1 { l[0] } else { l[k] };
                let b = if rw == 1 { rr[0] } else { rr[k] };
                data.push(f(a, b));
            }
        }
        let mut shape = Shape::from_slice(&[rows]);
        shape.extend_from_slice(&out_feature);
        if self.shape.is_empty() && other.shape.is_empty() {
            shape.clear();
        }
        Ok(Tensor {
            shape,
            dtype: self.dtype,
            device: self.device,
            data,
        }
        .rounded())
    }

    pub fn add(&self, other: &Tensor) -> Result<Tensor, CoreError> {
        self.zip_with(other, "add", |a, b| a + b)
    }

    pub fn sub(&self, other: &Tensor) -> Result<Tensor, CoreError> {
        self.zip_with(other, "sub", |a, b| a - b)
    }

    pub fn mul(&self, other: &Tensor) -> Result<Tensor, CoreError> {
        self.zip_with(other, "mul", |a, b| a * b)
    }

    pub fn div(&self, other: &Tensor) -> Result<Tensor, CoreError> {
        self.zip_with(other, "div", |a, b| a / b)
    }

    pub fn maximum(&self, other: &Tensor) -> Result<Tensor, CoreError> {
        self.zip_with(other, "maximum", f64::max)
    }

    pub fn minimum(&self, other: &Tensor) -> Result<Tensor, CoreError> {
        self.zip_with(other, "minimum", f64::min)
    }

    /// Picks from `on_true` where `mask` is non-zero, else from `on_false`.
    pub fn select(mask: &Tensor, on_true: &Tensor, on_false: &Tensor) -> Result<Tensor, CoreError> {
        on_true.check_row_compatible(on_false, "select")?;
        on_true.check_device(mask)?;
        if mask.shape() != on_true.shape() {
            return Err(CoreError::shape("select", on_true.shape(), mask.shape()));
        }
        let data = mask
            .data
            .iter()
            .zip(on_true.data.iter().zip(&on_false.data))
            .map(|(&m, (&t, &f))| if m != 0.0 { t } else { f })
            .collect();
        Ok(Tensor {
            data,
            ..on_true.clone()
        })
    }

    // -----------------------------------------------------------------------
    // Reductions
    // -----------------------------------------------------------------------

    /// Reduces along `axis`, removing it from the shape.
    pub fn reduce(&self, axis: usize, kind: ReduceKind) -> Result<Tensor, CoreError> {
        if axis >= self.shape.len() {
            return Err(CoreError::index(IndexKind::Axis, axis, self.shape.len()));
        }
        let outer = numel(&self.shape[..axis]);
        let len = self.shape[axis];
        let inner = numel(&self.shape[axis + 1..]);
        let identity = kind.identity(self.dtype);
        let mut data = vec![identity; outer * inner];
        for o in 0..outer {
            for j in 0..len {
                let base = (o * len + j) * inner;
                for i in 0..inner {
                    let acc = &mut data[o * inner + i];
                    *acc = kind.combine(*acc, self.data[base + i]);
                }
            }
        }
        data.iter_mut().for_each(|v| *v = kind.finalize(*v, len));
        let mut shape = self.shape.clone();
        shape.remove(axis);
        Ok(Tensor {
            shape,
            dtype: self.dtype,
            device: self.device,
            data,
        }
        .rounded())
    }

    pub fn sum(&self, axis: usize) -> Result<Tensor, CoreError> {
        self.reduce(axis, ReduceKind::Sum)
    }

    pub fn mean(&self, axis: usize) -> Result<Tensor, CoreError> {
        self.reduce(axis, ReduceKind::Mean)
    }

    // -----------------------------------------------------------------------
    // Comparison
    // -----------------------------------------------------------------------

    /// Elementwise closeness: `|a - b| <= atol + rtol * |b|` everywhere, with
    /// equal shapes.
    pub fn allclose(&self, other: &Tensor, rtol: f64, atol: f64) -> bool {
        self.shape == other.shape
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(&a, &b)| a == b || (a - b).abs() <= atol + rtol * b.abs())
    }
}

/// Output feature shape of a broadcasting elementwise op, if compatible.
///
/// Equal shapes pass through; a side with a single element per row takes the
/// other side's shape.
pub fn broadcast_feature(lhs: &[usize], rhs: &[usize]) -> Option<Shape> {
    if lhs == rhs {
        Some(Shape::from_slice(lhs))
    } else if numel(rhs) == 1 {
        Some(Shape::from_slice(lhs))
    } else if numel(lhs) == 1 {
        Some(Shape::from_slice(rhs))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(shape: &[usize], data: &[f64]) -> Tensor {
        Tensor::from_vec(shape, data.to_vec()).unwrap()
    }

    #[test]
    fn from_vec_checks_length() {
        let err = Tensor::from_vec(&[2, 2], vec![1.0; 3]).unwrap_err();
        assert!(matches!(err, CoreError::ShapeMismatch { .. }));
    }

    #[test]
    fn f32_rounds_values() {
        let x = Tensor::from_vec(&[1], vec![0.1]).unwrap();
        assert_eq!(x.data()[0], 0.1f32 as f64);
        let y = Tensor::from_vec_typed(&[1], vec![0.1], DType::F64, Device::Cpu).unwrap();
        assert_eq!(y.data()[0], 0.1);
    }

    #[test]
    fn gather_and_scatter_rows() {
        let x = t(&[3, 2], &[0., 0., 1., 1., 2., 2.]);
        let g = x.gather_rows(&[2, 0, 2]).unwrap();
        assert_eq!(g.shape(), &[3, 2]);
        assert_eq!(g.data(), &[2., 2., 0., 0., 2., 2.]);

        let mut y = Tensor::zeros(&[3, 2], DType::F32, Device::Cpu);
        y.scatter_rows(&[1], &t(&[1, 2], &[5., 6.])).unwrap();
        assert_eq!(y.data(), &[0., 0., 5., 6., 0., 0.]);

        let err = y.scatter_rows(&[3], &t(&[1, 2], &[5., 6.])).unwrap_err();
        assert!(matches!(err, CoreError::InvalidIndex { index: 3, .. }));
    }

    #[test]
    fn scatter_rejects_other_device() {
        let mut y = Tensor::zeros(&[2, 1], DType::F32, Device::Cpu);
        let src = Tensor::ones(&[1, 1], DType::F32, Device::Accel(0));
        let err = y.scatter_rows(&[0], &src).unwrap_err();
        assert!(matches!(err, CoreError::DeviceMismatch { .. }));
    }

    #[test]
    fn elementwise_broadcasts_single_element_rows() {
        let x = t(&[2, 3], &[1., 2., 3., 4., 5., 6.]);
        let w = t(&[2, 1], &[10., 100.]);
        let y = x.mul(&w).unwrap();
        assert_eq!(y.shape(), &[2, 3]);
        assert_eq!(y.data(), &[10., 20., 30., 400., 500., 600.]);

        let z = w.add(&x).unwrap();
        assert_eq!(z.data(), &[11., 12., 13., 104., 105., 106.]);
    }

    #[test]
    fn elementwise_rejects_incompatible_features() {
        let x = t(&[2, 3], &[0.; 6]);
        let y = t(&[2, 2], &[0.; 4]);
        assert!(matches!(x.add(&y), Err(CoreError::ShapeMismatch { .. })));
    }

    #[test]
    fn reduce_along_middle_axis() {
        // [2, 3, 2]: mailbox of two nodes, three messages each.
        let x = t(
            &[2, 3, 2],
            &[1., 1., 2., 2., 3., 3., 4., 4., 5., 5., 6., 6.],
        );
        assert_eq!(x.sum(1).unwrap().data(), &[6., 6., 15., 15.]);
        assert_eq!(x.mean(1).unwrap().data(), &[2., 2., 5., 5.]);
        assert_eq!(
            x.reduce(1, ReduceKind::Max).unwrap().data(),
            &[3., 3., 6., 6.]
        );
        assert_eq!(x.reduce(1, ReduceKind::Min).unwrap().shape(), &[2, 2]);
        assert!(matches!(
            x.reduce(3, ReduceKind::Sum),
            Err(CoreError::InvalidIndex { kind: IndexKind::Axis, .. })
        ));
    }

    #[test]
    fn select_picks_by_mask() {
        let m = t(&[3], &[1., 0., 1.]);
        let a = t(&[3], &[1., 2., 3.]);
        let b = t(&[3], &[-1., -2., -3.]);
        assert_eq!(Tensor::select(&m, &a, &b).unwrap().data(), &[1., -2., 3.]);
    }

    #[test]
    fn concat_and_slice_rows() {
        let a = t(&[1, 2], &[1., 2.]);
        let b = t(&[2, 2], &[3., 4., 5., 6.]);
        let c = Tensor::concat_rows(&[a, b]).unwrap();
        assert_eq!(c.shape(), &[3, 2]);
        assert_eq!(c.slice_rows(1..3).unwrap().data(), &[3., 4., 5., 6.]);
    }

    #[test]
    fn scalar_rows_repeats_values() {
        let x = Tensor::scalar_rows(&[1., 2.], 3);
        assert_eq!(x.shape(), &[2, 3]);
        assert_eq!(x.row(1), &[2., 2., 2.]);
    }

    #[test]
    fn reduce_identities() {
        assert_eq!(ReduceKind::Sum.identity(DType::F32), 0.0);
        assert_eq!(ReduceKind::Prod.identity(DType::F32), 1.0);
        assert_eq!(ReduceKind::Max.identity(DType::F64), f64::NEG_INFINITY);
        assert_eq!(ReduceKind::Min.identity(DType::F32), f64::INFINITY);
        assert_eq!(ReduceKind::Mean.finalize(6.0, 3), 2.0);
        assert_eq!(ReduceKind::Mean.finalize(0.0, 0), 0.0);
    }
}
