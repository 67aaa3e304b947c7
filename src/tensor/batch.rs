//! Splitting heterogeneous feeds into bounded sub-batches and merging the
//! evaluated sub-batches back together.
//!
//! A feed has three parts: dense tensors, compact sparse tensors, and side
//! inputs. Every part is cut along the same leading-dimension windows, so
//! each sub-batch is self-contained and may be evaluated in any order.

use tracing::debug;

use super::{BatchError, Feed, SparseTensor, TensorValue};
use crate::{config::BatchingConfig, data::parallel_map, metadata::ExplainMetadata};

/// What evaluating one sub-batch produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubBatchFetch {
    pub dense: Feed,
    pub sparse: Vec<SparseTensor>,
    pub side: Feed,
}

/// Total batch size: any dense value, else any side value, else the first
/// sparse tensor's leading dense dimension.
fn batch_size(dense: &Feed, sparse: &[SparseTensor], side: &Feed) -> Result<Option<usize>, BatchError> {
    if let Some((name, value)) = dense.first().or_else(|| side.first()) {
        return value.leading_len(name).map(Some);
    }
    Ok(sparse.first().map(SparseTensor::batch_size))
}

fn window_sizes(total: usize, max_batch_size: usize) -> Vec<usize> {
    if max_batch_size == 0 || total <= max_batch_size {
        return vec![total];
    }
    let mut sizes = vec![max_batch_size; total / max_batch_size];
    if total % max_batch_size != 0 {
        sizes.push(total % max_batch_size);
    }
    sizes
}

fn check_len(name: &str, value: &TensorValue, expected: usize) -> Result<(), BatchError> {
    let found = value.leading_len(name)?;
    if found == expected {
        Ok(())
    } else {
        Err(BatchError::LengthMismatch {
            name: name.to_owned(),
            expected,
            found,
        })
    }
}

fn split_dense(feed: &Feed, sizes: &[usize]) -> Result<Vec<Feed>, BatchError> {
    let mut out = vec![Feed::with_capacity(feed.len()); sizes.len()];
    for (name, value) in feed {
        let mut start = 0;
        for (slot, &size) in out.iter_mut().zip(sizes) {
            slot.insert(name.clone(), value.slice_rows(name, start..start + size)?);
            start += size;
        }
    }
    Ok(out)
}

/// Split a feed into sub-batches of at most `max_batch_size` rows.
///
/// Each returned feed merges the dense slice, every sparse tensor's window
/// (flattened through [`SparseTensor::to_dict`]), and the side slice. A
/// `max_batch_size` of zero keeps the whole batch; with no data at all a
/// single empty feed is returned.
///
/// # Errors
///
/// Returns [`BatchError::NegativeBatchSize`] for a negative size and
/// [`BatchError::LengthMismatch`] when the parts disagree on the batch size.
pub fn split_feeds(
    dense: &Feed,
    sparse: &[SparseTensor],
    side: &Feed,
    max_batch_size: i64,
) -> Result<Vec<Feed>, BatchError> {
    let max_batch_size =
        usize::try_from(max_batch_size).map_err(|_| BatchError::NegativeBatchSize(max_batch_size))?;
    let Some(total) = batch_size(dense, sparse, side)? else {
        return Ok(vec![Feed::new()]);
    };
    for (name, value) in dense.iter().chain(side) {
        check_len(name, value, total)?;
    }
    if let Some(bad) = sparse.iter().find(|t| t.batch_size() != total) {
        return Err(BatchError::LengthMismatch {
            name: bad.names().values.clone(),
            expected: total,
            found: bad.batch_size(),
        });
    }

    let sizes = window_sizes(total, max_batch_size);
    let dense_parts = split_dense(dense, &sizes)?;
    let side_parts = split_dense(side, &sizes)?;
    let sparse_parts = sparse
        .iter()
        .map(|t| t.split(&sizes))
        .collect::<Result<Vec<_>, _>>()?;

    let feeds: Vec<Feed> = dense_parts
        .into_iter()
        .zip(side_parts)
        .enumerate()
        .map(|(i, (mut feed, side))| {
            for windows in &sparse_parts {
                feed.extend(windows[i].to_dict());
            }
            feed.extend(side);
            feed
        })
        .collect();
    debug!(
        batch_size = total,
        max_batch_size,
        sub_batches = feeds.len(),
        "split feeds"
    );
    Ok(feeds)
}

fn merge_dense(parts: &[Feed]) -> Result<Feed, BatchError> {
    let Some(first) = parts.first() else {
        return Ok(Feed::new());
    };
    first
        .keys()
        .map(|name| {
            let values = parts
                .iter()
                .enumerate()
                .map(|(index, part)| {
                    part.get(name).ok_or_else(|| BatchError::MissingTensor {
                        name: name.clone(),
                        index,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok((name.clone(), TensorValue::concat_rows(name, &values)?))
        })
        .collect()
}

/// Reassemble evaluated sub-batches, in order, into one flat fetch.
///
/// Dense and side tensors are concatenated along the leading dimension;
/// sparse tensors at the same position in each sub-batch are merged with
/// [`SparseTensor::concat`].
///
/// # Errors
///
/// Returns [`BatchError::MissingTensor`] when a sub-batch lacks a tensor the
/// first one has, and propagates concatenation failures.
pub fn merge_evaluated_subbatches(
    dense_fetches: &[Feed],
    sparse_fetches: &[Vec<SparseTensor>],
    side_fetches: &[Feed],
) -> Result<Feed, BatchError> {
    let mut merged = merge_dense(dense_fetches)?;
    if let Some(first) = sparse_fetches.first() {
        for (position, tensor) in first.iter().enumerate() {
            let windows = sparse_fetches
                .iter()
                .enumerate()
                .map(|(index, fetch)| {
                    fetch
                        .get(position)
                        .cloned()
                        .ok_or_else(|| BatchError::MissingTensor {
                            name: tensor.names().values.clone(),
                            index,
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            merged.extend(SparseTensor::concat(&windows)?.to_dict());
        }
    }
    merged.extend(merge_dense(side_fetches)?);
    debug!(
        sub_batches = dense_fetches.len().max(sparse_fetches.len()),
        tensors = merged.len(),
        "merged sub-batches"
    );
    Ok(merged)
}

/// The sub-batch size to use for `metadata`: sequential inputs describe a
/// single prediction and must never be split.
#[must_use]
pub fn effective_max_batch_size(metadata: &ExplainMetadata, config: &BatchingConfig) -> usize {
    if metadata.inputs().values().any(|i| i.is_sequential()) {
        0
    } else {
        config.max_batch_size
    }
}

/// Split the feed per `config`, evaluate every sub-batch, and merge the
/// results in sub-batch order.
///
/// Sub-batches run on a worker pool of `config.workers` threads when set,
/// otherwise one after another.
///
/// # Errors
///
/// Returns the first error produced by `eval`, or a [`BatchError`] from
/// configuration, splitting, the worker pool, or merging.
pub fn run_in_subbatches<F, E>(
    dense: &Feed,
    sparse: &[SparseTensor],
    side: &Feed,
    config: &BatchingConfig,
    eval: F,
) -> Result<Feed, E>
where
    F: Fn(Feed) -> Result<SubBatchFetch, E> + Sync + Send,
    E: From<BatchError> + Send,
{
    let config = config.clone().validate().map_err(BatchError::Config)?;
    let max_batch_size = i64::try_from(config.max_batch_size).unwrap_or(i64::MAX);
    let feeds = split_feeds(dense, sparse, side, max_batch_size)?;
    let fetches = match config.workers {
        Some(workers) if feeds.len() > 1 => parallel_map(&eval, feeds, Some(workers), None)
            .map_err(BatchError::from)?
            .into_iter()
            .collect::<Result<Vec<_>, E>>()?,
        _ => feeds.into_iter().map(&eval).collect::<Result<Vec<_>, E>>()?,
    };

    let mut dense_fetches = Vec::with_capacity(fetches.len());
    let mut sparse_fetches = Vec::with_capacity(fetches.len());
    let mut side_fetches = Vec::with_capacity(fetches.len());
    for fetch in fetches {
        dense_fetches.push(fetch.dense);
        sparse_fetches.push(fetch.sparse);
        side_fetches.push(fetch.side);
    }
    Ok(merge_evaluated_subbatches(
        &dense_fetches,
        &sparse_fetches,
        &side_fetches,
    )?)
}
