//! Integration tests for sparse windows and batched feed evaluation.

use explain_metadata::config::BatchingConfig;
use explain_metadata::metadata::{Framework, InputMetadata};
use explain_metadata::tensor::{
    BatchError, SubBatchFetch, effective_max_batch_size, merge_evaluated_subbatches,
    run_in_subbatches, split_feeds,
};
use explain_metadata::{ExplainMetadata, Feed, SparseTensor, TensorValue};
use ndarray::{Array1, Array2, ArrayD, array};
use proptest::prelude::*;
use rstest::{fixture, rstest};
use std::collections::BTreeSet;

mod support;
use support::sparse_names;

fn sparse(values: Vec<f32>, indices: Array2<i64>, shape: Vec<i64>) -> SparseTensor {
    SparseTensor::new(
        sparse_names("tokens"),
        TensorValue::from(values),
        indices.into_dyn(),
        Array1::from(shape),
    )
    .unwrap_or_else(|e| panic!("{e}"))
}

#[fixture]
fn six_rows() -> SparseTensor {
    sparse(
        vec![10.0, 20.0, 30.0, 40.0],
        array![[0, 0], [2, 1], [3, 0], [5, 2]],
        vec![6, 4],
    )
}

fn dense_rows(rows: usize) -> Feed {
    let x: Vec<f32> = (0..rows * 2).map(|v| v as f32).collect();
    let x = ArrayD::from_shape_vec(vec![rows, 2], x).unwrap_or_else(|e| panic!("{e}"));
    let ids: Vec<i64> = (0..rows).map(|v| v as i64).collect();
    let mut feed = Feed::new();
    feed.insert("x".into(), TensorValue::from(x));
    feed.insert("ids".into(), TensorValue::from(ids));
    feed
}

#[rstest]
fn sparse_split_produces_relative_windows(six_rows: SparseTensor) {
    let parts = six_rows.split(&[3, 3]).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(
        parts,
        vec![
            sparse(vec![10.0, 20.0], array![[0, 0], [2, 1]], vec![3, 4]),
            sparse(vec![30.0, 40.0], array![[0, 0], [2, 2]], vec![3, 4]),
        ]
    );
    let merged = SparseTensor::concat(&parts).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(merged, six_rows);
}

#[rstest]
fn split_feeds_flattens_every_part(six_rows: SparseTensor) {
    let side: Feed = [("keys".to_owned(), TensorValue::from(vec![1_i64, 2, 3, 4, 5, 6]))].into();
    let feeds = split_feeds(&dense_rows(6), &[six_rows], &side, 4)
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(feeds.len(), 2);
    let keys: Vec<&str> = feeds[0].keys().map(String::as_str).collect();
    assert_eq!(
        keys,
        ["x", "ids", "tokens/values", "tokens/indices", "tokens/shape", "keys"]
    );
    assert_eq!(feeds[0]["x"].batch_len(), Some(4));
    assert_eq!(feeds[1]["keys"].batch_len(), Some(2));
    assert_eq!(feeds[1]["tokens/shape"], TensorValue::from(vec![2_i64, 4]));
}

#[rstest]
#[case(0, 1)]
#[case(6, 1)]
#[case(10, 1)]
#[case(4, 2)]
#[case(1, 6)]
fn split_feeds_window_count(six_rows: SparseTensor, #[case] max: i64, #[case] count: usize) {
    let feeds = split_feeds(&dense_rows(6), &[six_rows], &Feed::new(), max)
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(feeds.len(), count);
}

#[rstest]
fn split_feeds_rejects_bad_input(six_rows: SparseTensor) {
    let negative = split_feeds(&dense_rows(6), &[], &Feed::new(), -1);
    assert!(matches!(negative, Err(BatchError::NegativeBatchSize(-1))));

    let short = split_feeds(&dense_rows(5), &[six_rows], &Feed::new(), 2);
    assert!(matches!(short, Err(BatchError::LengthMismatch { .. })));

    let empty = split_feeds(&Feed::new(), &[], &Feed::new(), 3).unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(empty, vec![Feed::new()]);
}

#[rstest]
fn merge_reassembles_split_parts(six_rows: SparseTensor) {
    let dense = dense_rows(6);
    let sizes = [4, 2];
    let windows = six_rows.split(&sizes).unwrap_or_else(|e| panic!("{e}"));
    let feeds = split_feeds(&dense, &[six_rows.clone()], &Feed::new(), 4)
        .unwrap_or_else(|e| panic!("{e}"));
    let dense_fetches: Vec<Feed> = feeds
        .iter()
        .map(|f| {
            ["x", "ids"]
                .into_iter()
                .map(|k| (k.to_owned(), f[k].clone()))
                .collect()
        })
        .collect();
    let sparse_fetches: Vec<Vec<SparseTensor>> = windows.into_iter().map(|w| vec![w]).collect();
    let merged = merge_evaluated_subbatches(&dense_fetches, &sparse_fetches, &[])
        .unwrap_or_else(|e| panic!("{e}"));

    let mut expected = dense;
    expected.extend(six_rows.to_dict());
    assert_eq!(merged, expected);
}

fn identity(feed: Feed) -> Result<SubBatchFetch, BatchError> {
    let names = sparse_names("tokens");
    let sparse = SparseTensor::from_feed(&names, &feed)?;
    let dense = feed
        .into_iter()
        .filter(|(k, _)| !names.iter().any(|n| n == k.as_str()))
        .collect();
    Ok(SubBatchFetch {
        dense,
        sparse: vec![sparse],
        side: Feed::new(),
    })
}

#[rstest]
#[case(BatchingConfig { max_batch_size: 0, workers: None })]
#[case(BatchingConfig { max_batch_size: 2, workers: None })]
#[case(BatchingConfig { max_batch_size: 2, workers: Some(3) })]
fn run_in_subbatches_matches_whole_batch(six_rows: SparseTensor, #[case] config: BatchingConfig) {
    let dense = dense_rows(6);
    let merged = run_in_subbatches(&dense, &[six_rows.clone()], &Feed::new(), &config, identity)
        .unwrap_or_else(|e| panic!("{e}"));
    let mut expected = dense;
    expected.extend(six_rows.to_dict());
    assert_eq!(merged, expected);
}

#[rstest]
fn run_in_subbatches_rejects_zero_workers() {
    let config = BatchingConfig {
        max_batch_size: 2,
        workers: Some(0),
    };
    let result = run_in_subbatches(&dense_rows(4), &[], &Feed::new(), &config, identity);
    assert!(matches!(result, Err(BatchError::Config(_))));
}

#[rstest]
fn sequential_inputs_disable_splitting() {
    let config = BatchingConfig {
        max_batch_size: 8,
        workers: None,
    };
    let plain = ExplainMetadata::builder(Framework::Tensorflow)
        .input(InputMetadata::builder("x").build().unwrap_or_else(|e| panic!("{e}")))
        .build()
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(effective_max_batch_size(&plain, &config), 8);

    let sequential = ExplainMetadata::builder(Framework::Tensorflow)
        .input(
            InputMetadata::builder("x")
                .is_sequential(true)
                .build()
                .unwrap_or_else(|e| panic!("{e}")),
        )
        .build()
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(effective_max_batch_size(&sequential, &config), 0);
}

/// A sorted sparse tensor over `rows` leading positions, rank 1 or rank 2
/// with `cols` trailing positions, plus a partition of `rows` that may
/// include empty windows.
fn sparse_and_partition() -> impl Strategy<Value = (SparseTensor, Vec<usize>)> {
    (1_usize..12, 1_usize..5, any::<bool>())
        .prop_flat_map(|(rows, cols, one_d)| {
            (
                Just(rows),
                Just(cols),
                Just(one_d),
                prop::collection::btree_set((0..rows, 0..cols), 0..=rows * cols / 2),
                prop::collection::vec(0_usize..4, 1..rows + 2),
            )
        })
        .prop_map(|(rows, cols, one_d, cells, mut sizes)| {
            // Trim or pad the window sizes so they sum to `rows`.
            let mut total = 0;
            sizes.retain(|s| {
                let keep = total + s <= rows;
                if keep {
                    total += s;
                }
                keep
            });
            if total < rows {
                sizes.push(rows - total);
            }
            let tensor = if one_d {
                let positions: BTreeSet<i64> = cells.iter().map(|&(r, _)| r as i64).collect();
                let values: Vec<f32> = (0..positions.len()).map(|v| v as f32).collect();
                SparseTensor::new(
                    sparse_names("tokens"),
                    TensorValue::from(values),
                    Array1::from_iter(positions).into_dyn(),
                    Array1::from(vec![rows as i64]),
                )
                .unwrap_or_else(|e| panic!("{e}"))
            } else {
                let n = cells.len();
                let flat: Vec<i64> = cells
                    .iter()
                    .flat_map(|&(r, c)| [r as i64, c as i64])
                    .collect();
                let indices =
                    Array2::from_shape_vec((n, 2), flat).unwrap_or_else(|e| panic!("{e}"));
                let values: Vec<f32> = (0..n).map(|v| v as f32).collect();
                sparse(values, indices, vec![rows as i64, cols as i64])
            };
            (tensor, sizes)
        })
}

proptest! {
    #[test]
    fn sparse_split_conserves_entries((tensor, sizes) in sparse_and_partition()) {
        let parts = tensor.split(&sizes).unwrap_or_else(|e| panic!("{e}"));
        prop_assert_eq!(parts.len(), sizes.len());
        let leading: usize = parts.iter().map(SparseTensor::batch_size).sum();
        prop_assert_eq!(leading, tensor.batch_size());
        let entries: usize = parts.iter().map(|p| p.indices().shape()[0]).sum();
        prop_assert_eq!(entries, tensor.indices().shape()[0]);
        for (part, &size) in parts.iter().zip(&sizes) {
            prop_assert_eq!(part.batch_size(), size);
            prop_assert_eq!(part.indices().ndim(), tensor.indices().ndim());
        }
        let merged = SparseTensor::concat(&parts).unwrap_or_else(|e| panic!("{e}"));
        prop_assert_eq!(merged, tensor);
    }
}
