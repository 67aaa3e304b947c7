//! Row/column reshaping, base-64 decoding, top-k selection, noise injection,
//! and a worker-pool map used around model evaluation.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use indexmap::IndexMap;
use ndarray::{Array2, ArrayD};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use rayon::{ThreadPool, ThreadPoolBuilder, prelude::*};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::tensor::{Feed, TensorValue};

/// A JSON object treated as one row of features.
pub type Row = Map<String, Value>;

/// Feature name to the values of every row, in row order.
pub type Columns = IndexMap<String, Vec<Value>>;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("row {row} is missing column \"{column}\"")]
    MissingColumn { column: String, row: usize },
    #[error("row {row} has unexpected columns {columns:?}")]
    UnexpectedColumns { row: usize, columns: Vec<String> },
    #[error("column \"{column}\" row {row}: expected {expected}, found {found}")]
    Mismatch {
        column: String,
        row: usize,
        expected: String,
        found: String,
    },
    #[error("column \"{column}\" row {row} is not a list")]
    NotAList { column: String, row: usize },
    #[error("column \"{column}\" has {found} rows, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        found: usize,
    },
    #[error("tensor \"{name}\" is a scalar and cannot be split into rows")]
    Scalar { name: String },
    #[error("\"b64\" entry at {path} must be a string")]
    B64NotString { path: String },
    #[error("invalid base-64 at {path}: {source}")]
    Base64 {
        path: String,
        #[source]
        source: base64::DecodeError,
    },
    #[error("top-k needs an array with a batch dimension")]
    Unbatched,
    #[error("noise sigma for \"{name}\" must be finite and non-negative, got {sigma}")]
    Sigma { name: String, sigma: f64 },
    #[error("noise can only be added to float tensors; \"{name}\" is {dtype}")]
    NotFloat { name: String, dtype: &'static str },
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
    #[error("failed to build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Element kind and nested list shape of a JSON value.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Signature {
    kind: &'static str,
    shape: Vec<usize>,
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.shape.is_empty() {
            f.write_str(self.kind)
        } else {
            write!(f, "{}{:?}", self.kind, self.shape)
        }
    }
}

fn signature(value: &Value) -> Signature {
    let scalar = |kind| Signature {
        kind,
        shape: Vec::new(),
    };
    match value {
        Value::Null => scalar("null"),
        Value::Bool(_) => scalar("bool"),
        Value::Number(_) => scalar("number"),
        Value::String(_) => scalar("string"),
        Value::Object(_) => scalar("object"),
        Value::Array(items) => {
            let mut inner = items.iter().map(signature);
            let Some(first) = inner.next() else {
                return Signature {
                    kind: "empty",
                    shape: vec![0],
                };
            };
            if inner.any(|s| s != first) {
                return Signature {
                    kind: "ragged",
                    shape: vec![items.len()],
                };
            }
            let mut shape = vec![items.len()];
            shape.extend(first.shape);
            Signature {
                kind: first.kind,
                shape,
            }
        }
    }
}

fn column_keys(rows: &[Row], keys: Option<&[&str]>) -> Result<Vec<String>, DataError> {
    let columns: Vec<String> = match (keys, rows.first()) {
        (Some(keys), _) => keys.iter().map(|&k| k.to_owned()).collect(),
        (None, Some(first)) => first.keys().cloned().collect(),
        (None, None) => return Ok(Vec::new()),
    };
    for (row_index, row) in rows.iter().enumerate() {
        if let Some(missing) = columns.iter().find(|c| !row.contains_key(c.as_str())) {
            return Err(DataError::MissingColumn {
                column: missing.clone(),
                row: row_index,
            });
        }
        if keys.is_none() && row.len() != columns.len() {
            return Err(DataError::UnexpectedColumns {
                row: row_index,
                columns: row
                    .keys()
                    .filter(|k| !columns.contains(*k))
                    .cloned()
                    .collect(),
            });
        }
    }
    Ok(columns)
}

fn check_signature(
    column: &str,
    row: usize,
    value: &Value,
    expected: &mut Option<Signature>,
) -> Result<(), DataError> {
    let found = signature(value);
    match expected {
        Some(expected) if *expected != found => Err(DataError::Mismatch {
            column: column.to_owned(),
            row,
            expected: expected.to_string(),
            found: found.to_string(),
        }),
        Some(_) => Ok(()),
        None => {
            *expected = Some(found);
            Ok(())
        }
    }
}

/// Turn rows into columns, keeping only `keys` when given.
///
/// Every value in a column must share one element kind and shape.
///
/// # Errors
///
/// Returns [`DataError::MissingColumn`] or [`DataError::UnexpectedColumns`]
/// for rows that do not share the column set, and [`DataError::Mismatch`]
/// when a value's kind or shape differs from the column's first value.
pub fn columnarize(rows: &[Row], keys: Option<&[&str]>) -> Result<Columns, DataError> {
    let columns = column_keys(rows, keys)?;
    let mut out = Columns::with_capacity(columns.len());
    for column in columns {
        let mut expected = None;
        let mut values = Vec::with_capacity(rows.len());
        for (row_index, row) in rows.iter().enumerate() {
            let value = &row[column.as_str()];
            check_signature(&column, row_index, value, &mut expected)?;
            values.push(value.clone());
        }
        out.insert(column, values);
    }
    Ok(out)
}

/// Like [`columnarize`], but each value is itself a list and the lists are
/// concatenated.
///
/// # Errors
///
/// As [`columnarize`], plus [`DataError::NotAList`] for non-list values.
/// Element kinds and shapes must agree across all rows.
pub fn concat(rows: &[Row], keys: Option<&[&str]>) -> Result<Columns, DataError> {
    let columns = column_keys(rows, keys)?;
    let mut out = Columns::with_capacity(columns.len());
    for column in columns {
        let mut expected = None;
        let mut values = Vec::new();
        for (row_index, row) in rows.iter().enumerate() {
            let Value::Array(items) = &row[column.as_str()] else {
                return Err(DataError::NotAList {
                    column,
                    row: row_index,
                });
            };
            for item in items {
                check_signature(&column, row_index, item, &mut expected)?;
            }
            values.extend(items.iter().cloned());
        }
        out.insert(column, values);
    }
    Ok(out)
}

/// Inverse of [`columnarize`].
///
/// # Errors
///
/// Returns [`DataError::LengthMismatch`] when columns differ in length.
pub fn rowify(columns: &Columns) -> Result<Vec<Row>, DataError> {
    let Some(len) = columns.values().next().map(Vec::len) else {
        return Ok(Vec::new());
    };
    if let Some((column, values)) = columns.iter().find(|(_, v)| v.len() != len) {
        return Err(DataError::LengthMismatch {
            column: column.clone(),
            expected: len,
            found: values.len(),
        });
    }
    Ok((0..len)
        .map(|i| {
            columns
                .iter()
                .map(|(name, values)| (name.clone(), values[i].clone()))
                .collect()
        })
        .collect())
}

/// Split a batched feed into rows of nested JSON lists.
///
/// # Errors
///
/// Returns [`DataError::Scalar`] for rank-0 tensors and
/// [`DataError::LengthMismatch`] when leading dimensions differ.
pub fn rowify_tensors(feed: &Feed) -> Result<Vec<Row>, DataError> {
    let mut len = None;
    for (name, value) in feed {
        let found = value
            .batch_len()
            .ok_or_else(|| DataError::Scalar { name: name.clone() })?;
        match len {
            Some(expected) if expected != found => {
                return Err(DataError::LengthMismatch {
                    column: name.clone(),
                    expected,
                    found,
                });
            }
            _ => len = Some(found),
        }
    }
    Ok((0..len.unwrap_or(0))
        .map(|i| {
            feed.iter()
                .map(|(name, value)| (name.clone(), value.row_to_json(i)))
                .collect()
        })
        .collect())
}

/// A JSON value with `{"b64": ...}` mappings replaced by decoded bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Json(Value),
    Bytes(Vec<u8>),
    List(Vec<Decoded>),
    Map(IndexMap<String, Decoded>),
}

/// Recursively decode every mapping whose only key is `b64`.
///
/// # Errors
///
/// Returns [`DataError::B64NotString`] or [`DataError::Base64`] naming the
/// JSON path of the offending entry.
pub fn b64_decode(value: &Value) -> Result<Decoded, DataError> {
    decode_at(value, "$")
}

fn decode_at(value: &Value, path: &str) -> Result<Decoded, DataError> {
    match value {
        Value::Object(map) if map.len() == 1 && map.contains_key("b64") => {
            let path = format!("{path}.b64");
            let Some(text) = map["b64"].as_str() else {
                return Err(DataError::B64NotString { path });
            };
            STANDARD
                .decode(text)
                .map(Decoded::Bytes)
                .map_err(|source| DataError::Base64 { path, source })
        }
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| Ok::<_, DataError>((k.clone(), decode_at(v, &format!("{path}.{k}"))?)))
            .collect::<Result<_, _>>()
            .map(Decoded::Map),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| decode_at(v, &format!("{path}[{i}]")))
            .collect::<Result<_, _>>()
            .map(Decoded::List),
        other => Ok(Decoded::Json(other.clone())),
    }
}

/// Indices of the `k` largest values of each batch element, largest first.
///
/// Each element is flattened over its trailing dimensions; `k` is clipped
/// to the element size. Ties keep the lower index first.
///
/// # Errors
///
/// Returns [`DataError::Unbatched`] for rank-0 arrays.
pub fn top_k_indices(array: &ArrayD<f32>, k: usize) -> Result<Array2<usize>, DataError> {
    let Some(&batch) = array.shape().first() else {
        return Err(DataError::Unbatched);
    };
    let per_element: usize = array.shape()[1..].iter().product();
    let k = k.min(per_element);
    let mut flat = Vec::with_capacity(batch * k);
    for element in array.outer_iter() {
        let values: Vec<f32> = element.iter().copied().collect();
        let mut order: Vec<usize> = (0..values.len()).collect();
        order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
        flat.extend(order.into_iter().take(k));
    }
    Ok(Array2::from_shape_vec((batch, k), flat)?)
}

/// Add `N(0, sigma)` noise to each float feature named in `sigmas`.
///
/// Features without a sigma are copied unchanged; sigmas for features not
/// in the feed are ignored.
///
/// # Errors
///
/// Returns [`DataError::Sigma`] for a negative sigma, or one that is not
/// finite once narrowed to the `f32` tensor precision, and
/// [`DataError::NotFloat`] when a noised feature is not a float tensor.
pub fn add_gaussian_noise<R: Rng + ?Sized>(
    feed: &Feed,
    sigmas: &IndexMap<String, f64>,
    rng: &mut R,
) -> Result<Feed, DataError> {
    feed.iter()
        .map(|(name, value)| {
            let Some(&sigma) = sigmas.get(name) else {
                return Ok((name.clone(), value.clone()));
            };
            let TensorValue::Float(array) = value else {
                return Err(DataError::NotFloat {
                    name: name.clone(),
                    dtype: value.dtype(),
                });
            };
            let scale = sigma as f32;
            let normal = Some(scale)
                .filter(|s| s.is_finite() && *s >= 0.0)
                .and_then(|s| Normal::new(0.0_f32, s).ok())
                .ok_or_else(|| DataError::Sigma {
                    name: name.clone(),
                    sigma,
                })?;
            let noisy = array.mapv(|x| x + normal.sample(&mut *rng));
            Ok((name.clone(), TensorValue::Float(noisy)))
        })
        .collect()
}

/// Apply `f` to every argument on a worker pool, keeping argument order.
///
/// Runs on `pool` when given, which is left running afterwards. Otherwise a
/// pool of `workers` threads (rayon's default when `None`) is built for the
/// call; its threads are scoped to the call and joined before returning.
///
/// # Errors
///
/// Returns [`DataError::Pool`] if a pool cannot be built.
pub fn parallel_map<A, R, F>(
    f: F,
    args: Vec<A>,
    workers: Option<usize>,
    pool: Option<&ThreadPool>,
) -> Result<Vec<R>, DataError>
where
    A: Send,
    R: Send,
    F: Fn(A) -> R + Sync + Send,
{
    let run = |pool: &ThreadPool| pool.install(|| args.into_par_iter().map(&f).collect::<Vec<R>>());
    if let Some(pool) = pool {
        return Ok(run(pool));
    }
    let builder = ThreadPoolBuilder::new()
        .num_threads(workers.unwrap_or(0))
        .thread_name(|idx| format!("xmeta-worker-{idx}"));
    with_scoped_pool(builder, run)
}

/// Build a pool whose threads live inside a `std::thread::scope`, run `op`
/// on it, and join every worker before returning.
fn with_scoped_pool<T, Op>(builder: ThreadPoolBuilder, op: Op) -> Result<T, DataError>
where
    Op: FnOnce(&ThreadPool) -> T,
{
    let out = builder.build_scoped(
        |thread| thread.run(),
        |pool| {
            debug!(threads = pool.current_num_threads(), "built worker pool");
            op(pool)
        },
    )?;
    debug!("worker pool joined");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::{SeedableRng, rngs::StdRng};
    use rstest::rstest;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use serde_json::json;

    fn rows(value: Value) -> Vec<Row> {
        value
            .as_array()
            .unwrap_or_else(|| panic!("rows must be a list"))
            .iter()
            .map(|r| r.as_object().cloned().unwrap_or_else(|| panic!("row must be an object")))
            .collect()
    }

    #[rstest]
    fn columnarizes_and_rowifies() {
        let input = rows(json!([{"a": [1, 2], "b": "x"}, {"a": [3, 4], "b": "y"}]));
        let columns = columnarize(&input, None).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(columns["a"], vec![json!([1, 2]), json!([3, 4])]);
        assert_eq!(rowify(&columns).unwrap_or_else(|e| panic!("{e}")), input);
    }

    #[rstest]
    fn allowlist_filters_columns() {
        let input = rows(json!([{"a": 1, "b": 2}, {"a": 3, "b": 4}]));
        let columns = columnarize(&input, Some(&["b"])).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(columns.keys().collect::<Vec<_>>(), vec!["b"]);
    }

    #[rstest]
    #[case(json!([{"a": [1, 2]}, {"a": [1]}]), "number[2]")]
    #[case(json!([{"a": 1}, {"a": "1"}]), "found string")]
    #[case(json!([{"a": 1}, {"b": 1}]), "missing column")]
    fn columnarize_rejects(#[case] input: Value, #[case] fragment: &str) {
        let msg = columnarize(&rows(input), None)
            .err()
            .map(|e| e.to_string())
            .unwrap_or_default();
        assert!(msg.contains(fragment), "{msg}");
    }

    #[rstest]
    fn concat_joins_lists() {
        let input = rows(json!([{"a": [1, 2]}, {"a": [3]}]));
        let columns = concat(&input, None).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(columns["a"], vec![json!(1), json!(2), json!(3)]);
        assert!(concat(&rows(json!([{"a": 1}])), None).is_err());
    }

    #[rstest]
    fn rowify_tensors_checks_leading_dims() {
        let mut feed = Feed::new();
        feed.insert("x".into(), TensorValue::from(array![[1_i64, 2], [3, 4]].into_dyn()));
        feed.insert("y".into(), TensorValue::from(vec![0.5_f32, 1.5]));
        let out = rowify_tensors(&feed).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(out[1]["x"], json!([3, 4]));
        assert_eq!(out[1]["y"], json!(1.5));
        feed.insert("z".into(), TensorValue::from(vec![1_i64]));
        assert!(matches!(
            rowify_tensors(&feed),
            Err(DataError::LengthMismatch { .. })
        ));
    }

    #[rstest]
    fn decodes_nested_b64() {
        let value = json!({"img": {"b64": "aGk="}, "n": [1, {"b64": "AA=="}], "keep": {"b64": "x", "other": 1}});
        let decoded = b64_decode(&value).unwrap_or_else(|e| panic!("{e}"));
        let Decoded::Map(map) = decoded else {
            panic!("expected a map");
        };
        assert_eq!(map["img"], Decoded::Bytes(b"hi".to_vec()));
        assert_eq!(
            map["n"],
            Decoded::List(vec![Decoded::Json(json!(1)), Decoded::Bytes(vec![0])])
        );
        assert!(matches!(map["keep"], Decoded::Map(_)));
        let msg = b64_decode(&json!([{"b64": "***"}]))
            .err()
            .map(|e| e.to_string())
            .unwrap_or_default();
        assert!(msg.contains("$[0].b64"), "{msg}");
    }

    #[rstest]
    #[case(2, array![[2, 0], [0, 1]])]
    #[case(9, array![[2, 0, 1], [0, 1, 2]])]
    fn top_k_clips_to_element_size(#[case] k: usize, #[case] expected: Array2<usize>) {
        let scores = array![[0.5_f32, 0.1, 0.9], [3.0, 2.0, 1.0]].into_dyn();
        let top = top_k_indices(&scores, k).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(top, expected);
    }

    #[rstest]
    fn noise_only_touches_named_floats() {
        let mut feed = Feed::new();
        feed.insert("x".into(), TensorValue::from(vec![0.0_f32; 4]));
        feed.insert("ids".into(), TensorValue::from(vec![1_i64, 2]));
        let mut sigmas = IndexMap::new();
        sigmas.insert("x".to_owned(), 1.0);
        let mut rng = StdRng::seed_from_u64(7);
        let noisy = add_gaussian_noise(&feed, &sigmas, &mut rng).unwrap_or_else(|e| panic!("{e}"));
        assert_ne!(noisy["x"], feed["x"]);
        assert_eq!(noisy["ids"], feed["ids"]);

        sigmas.insert("ids".to_owned(), 1.0);
        assert!(matches!(
            add_gaussian_noise(&feed, &sigmas, &mut rng),
            Err(DataError::NotFloat { .. })
        ));
        sigmas.shift_remove("ids");
        sigmas.insert("x".to_owned(), -1.0);
        assert!(matches!(
            add_gaussian_noise(&feed, &sigmas, &mut rng),
            Err(DataError::Sigma { .. })
        ));
    }

    #[rstest]
    #[case(1e300)]
    #[case(f64::from(f32::MAX) * 2.0)]
    #[case(f64::INFINITY)]
    #[case(f64::NAN)]
    fn sigma_beyond_tensor_precision_is_rejected(#[case] sigma: f64) {
        let feed: Feed = [("x".to_owned(), TensorValue::from(vec![0.0_f32, 1.0]))].into();
        let sigmas: IndexMap<String, f64> = [("x".to_owned(), sigma)].into();
        let result = add_gaussian_noise(&feed, &sigmas, &mut StdRng::seed_from_u64(1));
        assert!(matches!(result, Err(DataError::Sigma { .. })), "{result:?}");
    }

    #[rstest]
    #[case(None)]
    #[case(Some(3))]
    fn parallel_map_keeps_order(#[case] workers: Option<usize>) {
        let out = parallel_map(|x: u32| x * 2, (0..50).collect(), workers, None)
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(out, (0..50).map(|x| x * 2).collect::<Vec<_>>());
    }

    #[rstest]
    fn parallel_map_uses_external_pool() {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(2)
            .build()
            .unwrap_or_else(|e| panic!("{e}"));
        let out = parallel_map(|s: &str| s.len(), vec!["a", "bb"], None, Some(&pool))
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(out, vec![1, 2]);
        assert_eq!(pool.install(|| 1 + 1), 2);
    }

    #[rstest]
    fn owned_pool_workers_finish_before_return() {
        let exited = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&exited);
        let builder = ThreadPoolBuilder::new()
            .num_threads(3)
            .exit_handler(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        let sum = with_scoped_pool(builder, |pool| {
            pool.install(|| (1..=10).into_par_iter().sum::<u32>())
        })
        .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(sum, 55);
        assert_eq!(exited.load(Ordering::SeqCst), 3);
    }
}
