//! Compact sparse tensors and their sub-batch split/concat primitives.

use ndarray::{Array1, Array2, ArrayD, Axis, Ix1, s};

use super::{BatchError, Feed, TensorValue};
use crate::metadata::SparseTensorNames;

/// `(values, indices, dense_shape)` describing the non-zero entries of a
/// notional dense tensor whose leading dimension is `dense_shape[0]`.
///
/// `indices` is either 1-D (one position per value) or 2-D with one column
/// per dense dimension. Rows are ordered by their leading index.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseTensor {
    names: SparseTensorNames,
    values: TensorValue,
    indices: ArrayD<i64>,
    dense_shape: Array1<i64>,
}

impl SparseTensor {
    /// # Errors
    ///
    /// Returns [`BatchError::Sparse`] when the parts disagree: values that
    /// are not 1-D, indices that are not 1-D or 2-D, a row count different
    /// from the value count, a column count different from the dense rank,
    /// or leading indices that are unsorted or outside `dense_shape[0]`.
    /// Empty indices may have shape `(0,)` whatever the rank.
    pub fn new(
        names: SparseTensorNames,
        values: TensorValue,
        indices: ArrayD<i64>,
        dense_shape: Array1<i64>,
    ) -> Result<Self, BatchError> {
        let tensor = Self {
            names,
            values,
            indices,
            dense_shape,
        };
        tensor.validate()?;
        Ok(tensor)
    }

    /// Pull the three named parts out of `feed`.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::MissingTensor`] when a part is absent and
    /// [`BatchError::Sparse`] when indices or dense shape are not integer
    /// tensors or the parts disagree.
    pub fn from_feed(names: &SparseTensorNames, feed: &Feed) -> Result<Self, BatchError> {
        let get = |name: &str| {
            feed.get(name).ok_or_else(|| BatchError::MissingTensor {
                name: name.to_owned(),
                index: 0,
            })
        };
        let values = get(&names.values)?.clone();
        let TensorValue::Int(indices) = get(&names.indices)? else {
            return Err(sparse_error(names, "indices must be an integer tensor"));
        };
        let TensorValue::Int(dense_shape) = get(&names.dense_shape)? else {
            return Err(sparse_error(names, "dense_shape must be an integer tensor"));
        };
        let dense_shape = dense_shape
            .clone()
            .into_dimensionality::<Ix1>()
            .map_err(|_| sparse_error(names, "dense_shape must be 1-D"))?;
        Self::new(names.clone(), values, indices.clone(), dense_shape)
    }

    fn err(&self, reason: impl Into<String>) -> BatchError {
        sparse_error(&self.names, reason)
    }

    fn validate(&self) -> Result<(), BatchError> {
        if self.values.ndim() != 1 {
            return Err(self.err(format!(
                "values must be 1-D, got shape {:?}",
                self.values.shape()
            )));
        }
        let rank = self.dense_shape.len();
        let (rows, cols) = match self.indices.shape() {
            [rows] => (*rows, 1),
            [rows, cols] => (*rows, *cols),
            other => {
                return Err(self.err(format!("indices must be 1-D or 2-D, got shape {other:?}")));
            }
        };
        if rank == 0 || (rows > 0 && cols != rank) {
            return Err(self.err(format!(
                "indices have {cols} columns but dense_shape has rank {rank}"
            )));
        }
        if self.values.batch_len() != Some(rows) {
            return Err(self.err(format!(
                "{rows} indices but {} values",
                self.values.shape()[0]
            )));
        }
        if self.dense_shape.iter().any(|&d| d < 0) {
            return Err(self.err(format!(
                "dense_shape must not be negative, got {}",
                self.dense_shape
            )));
        }
        let lead = self.leading_indices();
        if lead.windows(2).any(|w| w[0] > w[1]) {
            return Err(self.err("indices must be sorted by their leading position"));
        }
        let limit = self.dense_shape[0];
        if let Some(&bad) = lead.iter().find(|&&r| r < 0 || r >= limit) {
            return Err(self.err(format!(
                "leading index {bad} is outside dense_shape[0] = {limit}"
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn names(&self) -> &SparseTensorNames {
        &self.names
    }

    #[must_use]
    pub fn values(&self) -> &TensorValue {
        &self.values
    }

    #[must_use]
    pub fn indices(&self) -> &ArrayD<i64> {
        &self.indices
    }

    #[must_use]
    pub fn dense_shape(&self) -> &Array1<i64> {
        &self.dense_shape
    }

    /// Leading dimension of the notional dense tensor.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        usize::try_from(self.dense_shape[0]).unwrap_or_default()
    }

    fn leading_indices(&self) -> Vec<i64> {
        if self.indices.is_empty() {
            Vec::new()
        } else if self.indices.ndim() == 1 {
            self.indices.iter().copied().collect()
        } else {
            self.indices.index_axis(Axis(1), 0).iter().copied().collect()
        }
    }

    /// Merge the three parts into one flat feed.
    #[must_use]
    pub fn to_dict(&self) -> Feed {
        let mut feed = Feed::with_capacity(3);
        feed.insert(self.names.values.clone(), self.values.clone());
        feed.insert(
            self.names.indices.clone(),
            TensorValue::Int(self.indices.clone()),
        );
        feed.insert(
            self.names.dense_shape.clone(),
            TensorValue::Int(self.dense_shape.clone().into_dyn()),
        );
        feed
    }

    /// Split along the notional leading dimension into windows of `sizes`
    /// rows. Each part is indexed relative to its own window.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Partition`] unless `sizes` sums to
    /// `dense_shape[0]`.
    pub fn split(&self, sizes: &[usize]) -> Result<Vec<Self>, BatchError> {
        let total: usize = sizes.iter().sum();
        if total != self.batch_size() {
            return Err(BatchError::Partition {
                total,
                expected: self.batch_size(),
            });
        }
        let lead = self.leading_indices();
        let mut parts = Vec::with_capacity(sizes.len());
        let mut row_offset = 0_i64;
        let mut start = 0;
        for &size in sizes {
            let size = i64::try_from(size).map_err(|_| self.err("window too large"))?;
            let upper = row_offset + size;
            let end = lead.partition_point(|&r| r < upper);
            let values = self.values.slice_rows(&self.names.values, start..end)?;
            let indices = match self.indices.ndim() {
                1 => self.indices.slice(s![start..end]).mapv(|r| r - row_offset).into_dyn(),
                _ => {
                    let mut window = self.indices.slice(s![start..end, ..]).to_owned();
                    window
                        .index_axis_mut(Axis(1), 0)
                        .mapv_inplace(|r| r - row_offset);
                    window.into_dyn()
                }
            };
            let mut dense_shape = self.dense_shape.clone();
            dense_shape[0] = size;
            parts.push(Self {
                names: self.names.clone(),
                values,
                indices,
                dense_shape,
            });
            row_offset = upper;
            start = end;
        }
        Ok(parts)
    }

    /// Reassemble windows produced by [`SparseTensor::split`] or by
    /// per-window evaluation, re-offsetting each window's leading indices.
    ///
    /// Windows with no entries may carry indices of shape `(0,)` regardless
    /// of rank; an all-empty result keeps the column count of the first
    /// window that has one.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Sparse`] for an empty `parts` list or windows
    /// whose trailing dense dimensions or index ranks disagree.
    pub fn concat(parts: &[Self]) -> Result<Self, BatchError> {
        let first = parts.first().ok_or_else(|| BatchError::Sparse {
            name: String::new(),
            reason: "nothing to concatenate".into(),
        })?;
        let trailing = first.dense_shape.slice(s![1..]);
        if let Some(odd) = parts
            .iter()
            .find(|p| p.dense_shape.slice(s![1..]) != trailing)
        {
            return Err(first.err(format!(
                "dense shapes {} and {} disagree beyond the leading dimension",
                first.dense_shape, odd.dense_shape
            )));
        }
        let cols = parts
            .iter()
            .find(|p| p.indices.ndim() == 2)
            .map(|p| p.indices.shape()[1]);

        let mut rows: Vec<i64> = Vec::new();
        let mut offset = 0_i64;
        for part in parts {
            let count = part.indices.shape()[0];
            if count > 0 {
                match (cols, part.indices.ndim()) {
                    (None, 1) => rows.extend(part.indices.iter().map(|r| r + offset)),
                    (Some(_), 2) => {
                        for row in part.indices.outer_iter() {
                            rows.extend(
                                row.iter()
                                    .enumerate()
                                    .map(|(j, &r)| if j == 0 { r + offset } else { r }),
                            );
                        }
                    }
                    _ => return Err(first.err("indices ranks disagree across windows")),
                }
            }
            offset += part.dense_shape[0];
        }
        let indices = match cols {
            None => Array1::from(rows).into_dyn(),
            Some(k) => {
                let n = rows.len() / k.max(1);
                Array2::from_shape_vec((n, k), rows)?.into_dyn()
            }
        };
        let values = parts.iter().map(|p| &p.values).collect::<Vec<_>>();
        let values = TensorValue::concat_rows(&first.names.values, &values)?;
        let mut dense_shape = first.dense_shape.clone();
        dense_shape[0] = offset;
        Self::new(first.names.clone(), values, indices, dense_shape)
    }
}

fn sparse_error(names: &SparseTensorNames, reason: impl Into<String>) -> BatchError {
    BatchError::Sparse {
        name: names.values.clone(),
        reason: reason.into(),
    }
}
