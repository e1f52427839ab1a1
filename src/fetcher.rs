use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

use crate::helpers;

/// Produces the records for a single block.
pub trait UnitSource {
    type Item;
    type Error: Display;

    /// `Ok(None)` means the unit has nothing to contribute.
    fn fetch_unit(
        &self,
        unit: u64,
    ) -> impl Future<Output = Result<Option<Vec<Self::Item>>, Self::Error>>;
}

/// Persists the records gathered for one chunk.
pub trait ChunkSink<T> {
    type Error: std::error::Error + 'static;

    fn emit(
        &mut self,
        chunk_start: u64,
        chunk_end: u64,
        items: Vec<T>,
    ) -> impl Future<Output = Result<(), Self::Error>>;
}

#[derive(Debug, thiserror::Error)]
pub enum RunError<E: std::error::Error + 'static> {
    #[error("start block {start} is greater than end block {end}")]
    InvalidRange { start: u64, end: u64 },

    #[error("chunk size must be at least 1")]
    InvalidChunkSize,

    #[error("failed to emit blocks {chunk_start}-{chunk_end}")]
    Emit {
        chunk_start: u64,
        chunk_end: u64,
        source: E,
    },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stats {
    pub total_units: u128,
    pub total_elapsed: Duration,
    pub average_per_unit: Duration,
    pub total_items: u64,
    pub failed_units: u64,
    pub chunks: u64,
}

/// Fetches every unit of `start..=end`, emitting one batch per chunk.
///
/// Each unit is attempted once, in ascending order. A failed fetch is logged
/// and the unit contributes nothing; a failed emit aborts the run.
pub async fn run<U, K>(
    start: u64,
    end: u64,
    chunk_size: u64,
    source: &U,
    sink: &mut K,
) -> Result<Stats, RunError<K::Error>>
where
    U: UnitSource,
    K: ChunkSink<U::Item>,
{
    if start > end {
        return Err(RunError::InvalidRange { start, end });
    }

    if chunk_size == 0 {
        return Err(RunError::InvalidChunkSize);
    }

    let started = Instant::now();
    let mut total_items = 0u64;
    let mut failed_units = 0u64;
    let mut chunks = 0u64;

    for (chunk_start, chunk_end) in helpers::build_chunks(start, end, chunk_size) {
        let mut items = Vec::new();

        for unit in chunk_start..=chunk_end {
            match source.fetch_unit(unit).await {
                Ok(Some(found)) => items.extend(found),
                Ok(None) => tracing::debug!(unit, "No data for block"),
                Err(err) => {
                    tracing::warn!(unit, %err, "Failed to fetch block, skipping");
                    failed_units += 1;
                }
            }
        }

        tracing::debug!(chunk_start, chunk_end, items = items.len(), "Emitting chunk");

        total_items += items.len() as u64;
        sink.emit(chunk_start, chunk_end, items)
            .await
            .map_err(|source| RunError::Emit {
                chunk_start,
                chunk_end,
                source,
            })?;
        chunks += 1;
    }

    let total_elapsed = started.elapsed();
    let total_units = helpers::unit_count(start, end);
    let average_per_unit = Duration::from_secs_f64(total_elapsed.as_secs_f64() / total_units as f64);

    Ok(Stats {
        total_units,
        total_elapsed,
        average_per_unit,
        total_items,
        failed_units,
        chunks,
    })
}
