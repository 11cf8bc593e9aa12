//! Compressed sparse row matrices.
//!
//! [`SparseMatrix`] is the compact adjacency index owned by the graph store.
//! Each stored entry remembers an entry id: for adjacency matrices this is
//! the [`EdgeId`] of the edge the entry came from. Within a row, entries are
//! ordered by entry id, which for adjacency means edge insertion order.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, IndexKind};
use crate::id::EdgeId;
use crate::tensor::{Shape, Tensor};

/// A CSR matrix with optional explicit values.
///
/// When `values` is `None` every stored entry has the value `1.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CsrParts")]
pub struct SparseMatrix {
    nrows: usize,
    ncols: usize,
    /// Row `r` owns entries `indptr[r]..indptr[r + 1]`.
    indptr: Vec<usize>,
    /// Column index of each entry.
    indices: Vec<u32>,
    /// Entry id of each entry (edge id for adjacency matrices).
    entry_ids: Vec<EdgeId>,
    values: Option<Vec<f64>>,
}

/// Unvalidated CSR arrays, as read from a serialized matrix.
#[derive(Deserialize)]
struct CsrParts {
    nrows: usize,
    ncols: usize,
    indptr: Vec<usize>,
    indices: Vec<u32>,
    entry_ids: Vec<EdgeId>,
    values: Option<Vec<f64>>,
}

impl TryFrom<CsrParts> for SparseMatrix {
    type Error = CoreError;

    fn try_from(parts: CsrParts) -> Result<Self, Self::Error> {
        let nnz = parts.indices.len();
        if Some(parts.indptr.len()) != parts.nrows.checked_add(1) {
            return Err(CoreError::shape("csr indptr", &[parts.nrows.saturating_add(1)], &[parts.indptr.len()]));
        }
        if parts.indptr[0] != 0 || parts.indptr[parts.nrows] != nnz || parts.indptr.windows(2).any(|w| w[0] > w[1]) {
            return Err(CoreError::shape("csr indptr", &[nnz], &[parts.indptr[parts.nrows]]));
        }
        if parts.entry_ids.len() != nnz {
            return Err(CoreError::shape("csr entry ids", &[nnz], &[parts.entry_ids.len()]));
        }
        if let Some(values) = &parts.values {
            if values.len() != nnz {
                return Err(CoreError::shape("csr values", &[nnz], &[values.len()]));
            }
        }
        if let Some(&c) = parts.indices.iter().find(|&&c| c as usize >= parts.ncols) {
            return Err(CoreError::index(IndexKind::Row, c as usize, parts.ncols));
        }
        // Entry ids must be a permutation of 0..nnz.
        let mut seen = vec![false; nnz];
        for id in &parts.entry_ids {
            match seen.get_mut(id.index()) {
                Some(slot) if !*slot => *slot = true,
                _ => return Err(CoreError::index(IndexKind::Edge, id.index(), nnz)),
            }
        }
        Ok(SparseMatrix {
            nrows: parts.nrows,
            ncols: parts.ncols,
            indptr: parts.indptr,
            indices: parts.indices,
            entry_ids: parts.entry_ids,
            values: parts.values,
        })
    }
}

impl SparseMatrix {
    /// Builds a matrix from `(row, col[, value])` triples.
    ///
    /// The position of a triple in the input becomes its entry id. Entries are
    /// grouped by row with a stable counting sort, so entry ids ascend within
    /// each row.
    pub fn from_triples(
        nrows: usize,
        ncols: usize,
        rows: &[u32],
        cols: &[u32],
        values: Option<&[f64]>,
    ) -> Result<SparseMatrix, CoreError> {
        if rows.len() != cols.len() {
            return Err(CoreError::shape("from_triples", &[rows.len()], &[cols.len()]));
        }
        if let Some(vals) = values {
            if vals.len() != rows.len() {
                return Err(CoreError::shape("from_triples", &[rows.len()], &[vals.len()]));
            }
        }
        if let Some(&r) = rows.iter().find(|&&r| r as usize >= nrows) {
            return Err(CoreError::index(IndexKind::Row, r as usize, nrows));
        }
        if let Some(&c) = cols.iter().find(|&&c| c as usize >= ncols) {
            return Err(CoreError::index(IndexKind::Row, c as usize, ncols));
        }
        Ok(SparseMatrix::assemble(nrows, ncols, rows, cols, values))
    }

    /// Counting-sorts in-range triples into CSR. Callers guarantee every row
    /// is below `nrows`, every column below `ncols`, and matching lengths.
    pub(crate) fn assemble(nrows: usize, ncols: usize, rows: &[u32], cols: &[u32], values: Option<&[f64]>) -> SparseMatrix {
        let nnz = rows.len();
        let mut indptr = vec![0usize; nrows + 1];
        for &r in rows {
            indptr[r as usize + 1] += 1;
        }
        for r in 0..nrows {
            indptr[r + 1] += indptr[r];
        }

        let mut cursor = indptr.clone();
        let mut indices = vec![0u32; nnz];
        let mut entry_ids = vec![EdgeId(0); nnz];
        let mut sorted_values = values.map(|_| vec![0.0; nnz]);
        for (k, (&r, &c)) in rows.iter().zip(cols).enumerate() {
            let slot = cursor[r as usize];
            cursor[r as usize] += 1;
            indices[slot] = c;
            entry_ids[slot] = EdgeId(k as u32);
            if let (Some(out), Some(vals)) = (sorted_values.as_mut(), values) {
                out[slot] = vals[k];
            }
        }

        SparseMatrix {
            nrows,
            ncols,
            indptr,
            indices,
            entry_ids,
            values: sorted_values,
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    pub fn indptr(&self) -> &[usize] {
        &self.indptr
    }

    /// Column indices of row `r`.
    pub fn row_indices(&self, r: usize) -> &[u32] {
        &self.indices[self.indptr[r]..self.indptr[r + 1]]
    }

    /// Entry ids of row `r`, ascending.
    pub fn row_entries(&self, r: usize) -> &[EdgeId] {
        &self.entry_ids[self.indptr[r]..self.indptr[r + 1]]
    }

    /// Number of stored entries in row `r`.
    pub fn row_nnz(&self, r: usize) -> usize {
        self.indptr[r + 1] - self.indptr[r]
    }

    /// Value of the `k`-th stored entry (in storage order).
    pub fn value_at(&self, k: usize) -> f64 {
        self.values.as_ref().map_or(1.0, |v| v[k])
    }

    /// Swaps rows and columns, keeping entry ids.
    pub fn transpose(&self) -> SparseMatrix {
        let mut rows = vec![0u32; self.nnz()];
        let mut cols = vec![0u32; self.nnz()];
        let mut vals = self.values.as_ref().map(|_| vec![0.0; self.nnz()]);
        for r in 0..self.nrows {
            for k in self.indptr[r]..self.indptr[r + 1] {
                let id = self.entry_ids[k].index();
                rows[id] = self.indices[k];
                cols[id] = r as u32;
                if let Some(v) = vals.as_mut() {
                    v[id] = self.value_at(k);
                }
            }
        }
        // Entry ids are a permutation of 0..nnz, so the triples above are
        // already in id order and rebuilding keeps every id.
        SparseMatrix::assemble(self.ncols, self.nrows, &rows, &cols, vals.as_deref())
    }

    /// Sparse-dense product: `out[r] = sum_k value_k * dense[col_k]`.
    ///
    /// `dense` must have `ncols` rows; the feature shape is preserved.
    pub fn spmm(&self, dense: &Tensor) -> Result<Tensor, CoreError> {
        if dense.num_rows() != self.ncols {
            return Err(CoreError::shape(
                "spmm",
                &[self.ncols],
                &[dense.num_rows()],
            ));
        }
        let w = dense.row_len();
        let mut out = vec![0.0; self.nrows * w];
        for r in 0..self.nrows {
            let acc = &mut out[r * w..(r + 1) * w];
            for k in self.indptr[r]..self.indptr[r + 1] {
                let v = self.value_at(k);
                let src = dense.row(self.indices[k] as usize);
                for (a, &x) in acc.iter_mut().zip(src) {
                    *a += v * x;
                }
            }
        }
        let mut shape = Shape::from_slice(&[self.nrows]);
        shape.extend_from_slice(dense.feature_shape());
        Tensor::from_vec_typed(&shape, out, dense.dtype(), dense.device())
    }

    /// Expands to a dense `[nrows, ncols]` tensor (duplicates are summed).
    pub fn to_dense(&self) -> Result<Tensor, CoreError> {
        let mut data = vec![0.0; self.nrows * self.ncols];
        for r in 0..self.nrows {
            for k in self.indptr[r]..self.indptr[r + 1] {
                data[r * self.ncols + self.indices[k] as usize] += self.value_at(k);
            }
        }
        Tensor::from_vec(&[self.nrows, self.ncols], data)
    }
}
