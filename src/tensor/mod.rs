//! Tensor feeds for model evaluation and the sub-batching engine over them.
//!
//! A [`Feed`] maps tensor names to [`TensorValue`]s in insertion order. Sparse
//! tensors travel in compact form as [`SparseTensor`] and flatten into a feed
//! through [`SparseTensor::to_dict`].

pub mod batch;
pub mod sparse;

use std::ops::Range;

use indexmap::IndexMap;
use ndarray::{Array1, ArrayD, ArrayViewD, Axis, Slice};
use serde_json::Value;
use thiserror::Error;

use crate::data::DataError;

pub use batch::{
    SubBatchFetch, effective_max_batch_size, merge_evaluated_subbatches, run_in_subbatches,
    split_feeds,
};
pub use sparse::SparseTensor;

/// Tensor name to value, in feed order.
pub type Feed = IndexMap<String, TensorValue>;

/// Errors raised while splitting, merging, or evaluating feeds.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("max_batch_size must not be negative, got {0}")]
    NegativeBatchSize(i64),
    #[error("tensor \"{name}\" is a scalar and has no batch dimension")]
    Scalar { name: String },
    #[error("tensor \"{name}\" has leading dimension {found}, expected {expected}")]
    LengthMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("tensor \"{name}\" mixes element types across sub-batches")]
    MixedTypes { name: String },
    #[error("tensor \"{name}\" is missing from sub-batch {index}")]
    MissingTensor { name: String, index: usize },
    #[error("sparse tensor \"{name}\": {reason}")]
    Sparse { name: String, reason: String },
    #[error("sub-batch sizes sum to {total}, expected {expected}")]
    Partition { total: usize, expected: usize },
    #[error("invalid batching configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
    #[error(transparent)]
    Data(#[from] DataError),
}

/// A dense tensor with one of the element types models exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorValue {
    Float(ArrayD<f32>),
    Int(ArrayD<i64>),
    Text(ArrayD<String>),
}

macro_rules! tensor_from {
    ($variant:ident, $elem:ty) => {
        impl From<ArrayD<$elem>> for TensorValue {
            fn from(array: ArrayD<$elem>) -> Self {
                Self::$variant(array)
            }
        }

        impl From<Vec<$elem>> for TensorValue {
            fn from(items: Vec<$elem>) -> Self {
                Self::$variant(Array1::from(items).into_dyn())
            }
        }
    };
}

tensor_from!(Float, f32);
tensor_from!(Int, i64);
tensor_from!(Text, String);

fn slice_rows<T: Clone>(array: &ArrayD<T>, rows: Range<usize>) -> ArrayD<T> {
    array.slice_axis(Axis(0), Slice::from(rows)).to_owned()
}

fn concat_rows<T: Clone>(parts: &[&ArrayD<T>]) -> Result<ArrayD<T>, BatchError> {
    let views: Vec<ArrayViewD<'_, T>> = parts.iter().map(|a| a.view()).collect();
    Ok(ndarray::concatenate(Axis(0), &views)?)
}

fn view_to_json<T>(view: ArrayViewD<'_, T>, leaf: &impl Fn(&T) -> Value) -> Value {
    if view.ndim() == 0 {
        return view.iter().next().map_or(Value::Null, leaf);
    }
    Value::Array(
        view.axis_iter(Axis(0))
            .map(|sub| view_to_json(sub, leaf))
            .collect(),
    )
}

fn float_json(x: &f32) -> Value {
    serde_json::Number::from_f64(f64::from(*x)).map_or(Value::Null, Value::Number)
}

impl TensorValue {
    /// Element type tag, as used in metadata dtypes.
    #[must_use]
    pub fn dtype(&self) -> &'static str {
        match self {
            Self::Float(_) => "float32",
            Self::Int(_) => "int64",
            Self::Text(_) => "string",
        }
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Float(a) => a.shape(),
            Self::Int(a) => a.shape(),
            Self::Text(a) => a.shape(),
        }
    }

    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape().len()
    }

    /// Size of the leading (batch) dimension; `None` for scalars.
    #[must_use]
    pub fn batch_len(&self) -> Option<usize> {
        self.shape().first().copied()
    }

    pub(crate) fn leading_len(&self, name: &str) -> Result<usize, BatchError> {
        self.batch_len().ok_or_else(|| BatchError::Scalar {
            name: name.to_owned(),
        })
    }

    /// Copy rows `rows` of the leading dimension.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Scalar`] for rank-0 tensors and
    /// [`BatchError::LengthMismatch`] when `rows` runs past the end.
    pub fn slice_rows(&self, name: &str, rows: Range<usize>) -> Result<Self, BatchError> {
        let len = self.leading_len(name)?;
        if rows.end > len || rows.start > rows.end {
            return Err(BatchError::LengthMismatch {
                name: name.to_owned(),
                expected: len,
                found: rows.end,
            });
        }
        Ok(match self {
            Self::Float(a) => Self::Float(slice_rows(a, rows)),
            Self::Int(a) => Self::Int(slice_rows(a, rows)),
            Self::Text(a) => Self::Text(slice_rows(a, rows)),
        })
    }

    /// Concatenate `parts` along the leading dimension.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::MixedTypes`] when element types differ and
    /// [`BatchError::Shape`] when trailing dimensions disagree.
    pub fn concat_rows(name: &str, parts: &[&Self]) -> Result<Self, BatchError> {
        macro_rules! gather {
            ($variant:ident) => {{
                let arrays = parts
                    .iter()
                    .map(|p| match p {
                        Self::$variant(a) => Ok(a),
                        _ => Err(BatchError::MixedTypes {
                            name: name.to_owned(),
                        }),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::$variant(concat_rows(&arrays)?))
            }};
        }
        for part in parts {
            part.leading_len(name)?;
        }
        match parts.first() {
            None => Err(BatchError::MissingTensor {
                name: name.to_owned(),
                index: 0,
            }),
            Some(Self::Float(_)) => gather!(Float),
            Some(Self::Int(_)) => gather!(Int),
            Some(Self::Text(_)) => gather!(Text),
        }
    }

    /// The whole tensor as nested JSON lists.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Float(a) => view_to_json(a.view(), &float_json),
            Self::Int(a) => view_to_json(a.view(), &|x: &i64| Value::from(*x)),
            Self::Text(a) => view_to_json(a.view(), &|s: &String| Value::String(s.clone())),
        }
    }

    /// Row `index` of the leading dimension as nested JSON lists.
    pub(crate) fn row_to_json(&self, index: usize) -> Value {
        match self {
            Self::Float(a) => view_to_json(a.index_axis(Axis(0), index), &float_json),
            Self::Int(a) => view_to_json(a.index_axis(Axis(0), index), &|x: &i64| {
                Value::from(*x)
            }),
            Self::Text(a) => view_to_json(a.index_axis(Axis(0), index), &|s: &String| {
                Value::String(s.clone())
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    fn slices_and_concatenates_rows() {
        let t = TensorValue::from(array![[1.0_f32, 2.0], [3.0, 4.0], [5.0, 6.0]].into_dyn());
        let head = t.slice_rows("t", 0..2).unwrap_or_else(|e| panic!("{e}"));
        let tail = t.slice_rows("t", 2..3).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(head.shape(), &[2, 2]);
        let back =
            TensorValue::concat_rows("t", &[&head, &tail]).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(back, t);
    }

    #[rstest]
    fn mixed_types_do_not_concatenate() {
        let a = TensorValue::from(vec![1.0_f32]);
        let b = TensorValue::from(vec![1_i64]);
        assert!(matches!(
            TensorValue::concat_rows("t", &[&a, &b]),
            Err(BatchError::MixedTypes { .. })
        ));
    }

    #[rstest]
    fn scalars_have_no_rows() {
        let s = TensorValue::Int(ndarray::arr0(3_i64).into_dyn());
        assert_eq!(s.batch_len(), None);
        assert!(matches!(
            s.slice_rows("s", 0..1),
            Err(BatchError::Scalar { .. })
        ));
        assert_eq!(s.to_json(), json!(3));
    }

    #[rstest]
    fn renders_nested_rows() {
        let t = TensorValue::from(array![[1_i64, 2], [3, 4]].into_dyn());
        assert_eq!(t.to_json(), json!([[1, 2], [3, 4]]));
        assert_eq!(t.row_to_json(1), json!([3, 4]));
    }
}
