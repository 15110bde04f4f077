//! Streaming table construction over pooled chunk buffers.
//!
//! A [`Table`] is a logical `height × width` matrix stored as a sequence of
//! chunk buffers checked out from the [`PoolManager`].  Each chunk holds
//! `chunk_rows` whole rows, so a row is always one contiguous slice and a
//! lookup `(row, col)` resolves to `(row / chunk_rows, (row % chunk_rows) *
//! width + col)`.  The chunk size follows from the configured chunk budget
//! and never from `height`, which keeps the working set of one fill step
//! bounded however tall the table is.

use std::error::Error as StdError;

#[cfg(not(target_arch = "wasm32"))]
use rayon::prelude::*;
use tracing::debug;

use crate::error::{EngineError, Result, RowError};
use crate::field::Field;
use crate::pool::{PoolManager, PooledBuffer};
use crate::streaming::StreamingRows;

/// Order in which the row function is invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GenerationOrder {
    /// Rows are generated one at a time, strictly `0, 1, …, height - 1`.
    #[default]
    Sequential,
    /// Rows of a chunk are generated concurrently on the rayon pool.  Writes
    /// still land in row order; only the call order is relaxed.
    Parallel,
}

/// Chunk geometry chosen for a given row width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    /// Elements reserved per chunk.
    pub capacity: usize,
    /// Whole rows per chunk.
    pub chunk_rows: usize,
}

/// Builds tables chunk by chunk into pooled storage.
#[derive(Debug, Clone)]
pub struct TableBuilder {
    pool: PoolManager,
    field: Field,
    chunk_budget: usize,
    order: GenerationOrder,
}

impl TableBuilder {
    /// Builder writing into `pool`, with chunks of at most `chunk_budget`
    /// elements where the size classes allow it.
    pub fn new(pool: PoolManager, field: Field, chunk_budget: usize) -> Self {
        Self {
            pool,
            field,
            chunk_budget: chunk_budget.max(1),
            order: GenerationOrder::Sequential,
        }
    }

    /// Sets the row generation order.
    pub fn with_order(mut self, order: GenerationOrder) -> Self {
        self.order = order;
        self
    }

    /// Current row generation order.
    pub fn order(&self) -> GenerationOrder {
        self.order
    }

    /// Picks the chunk geometry for rows of `width` elements.
    ///
    /// Prefers the largest class within the chunk budget, then the smallest
    /// class holding one row, then an oversize chunk sized to the budget.
    pub fn chunk_layout(&self, width: usize) -> Result<ChunkLayout> {
        if width == 0 {
            return Err(EngineError::shape("table width must be positive"));
        }
        let fitting: Vec<usize> = self
            .pool
            .class_capacities()
            .into_iter()
            .filter(|&cap| cap >= width)
            .collect();
        let capacity = fitting
            .iter()
            .rev()
            .find(|&&cap| cap <= self.chunk_budget)
            .or_else(|| fitting.first())
            .copied()
            .unwrap_or_else(|| (self.chunk_budget / width).max(1) * width);
        Ok(ChunkLayout {
            capacity,
            chunk_rows: capacity / width,
        })
    }

    /// Builds a `height × width` table from a fallible row function.
    ///
    /// On any failure every chunk acquired so far is released before the
    /// error is returned.
    pub fn build_table_streaming<F, E>(&self, height: usize, width: usize, row_gen: F) -> Result<Table>
    where
        F: Fn(usize) -> std::result::Result<Vec<u64>, E> + Sync,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        let layout = self.chunk_layout(width)?;
        let mut table = Table {
            height,
            width,
            chunk_rows: layout.chunk_rows,
            chunks: Vec::with_capacity(height.div_ceil(layout.chunk_rows)),
            pool: self.pool.clone(),
        };
        let mut start = 0;
        while start < height {
            let rows = layout.chunk_rows.min(height - start);
            let mut chunk = self.pool.checkout(rows * width)?;
            self.fill_chunk(&mut chunk, start, width, &row_gen)?;
            debug!(
                chunk = table.chunks.len(),
                first_row = start,
                rows,
                origin = ?chunk.origin(),
                "chunk filled"
            );
            table.chunks.push(chunk);
            start += rows;
        }
        debug!(height, width, chunks = table.chunks.len(), "table built");
        Ok(table)
    }

    /// Infallible variant of [`Self::build_table_streaming`].
    pub fn build_table<F>(&self, height: usize, width: usize, row_gen: F) -> Result<Table>
    where
        F: Fn(usize) -> Vec<u64> + Sync,
    {
        self.build_table_streaming(height, width, |idx| {
            Ok::<_, RowError>(row_gen(idx))
        })
    }

    /// Builds `height` rows from a shared row source.
    pub fn build_from_rows(&self, height: usize, rows: &StreamingRows) -> Result<Table> {
        self.build_table_streaming(height, rows.width(), |idx| rows.row(idx))
    }

    fn fill_chunk<F, E>(&self, chunk: &mut [u64], start: usize, width: usize, row_gen: &F) -> Result<()>
    where
        F: Fn(usize) -> std::result::Result<Vec<u64>, E> + Sync,
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        let field = self.field;
        let write_row = |offset: usize, slot: &mut [u64]| -> Result<()> {
            let row = start + offset;
            let values = row_gen(row).map_err(|err| EngineError::RowGeneration {
                row,
                source: err.into(),
            })?;
            if values.len() != width {
                return Err(EngineError::shape(format!(
                    "row {row} has {} elements, expected {width}",
                    values.len()
                )));
            }
            for (dst, value) in slot.iter_mut().zip(values) {
                *dst = field.reduce(value);
            }
            Ok(())
        };

        match self.order {
            GenerationOrder::Sequential => chunk
                .chunks_mut(width)
                .enumerate()
                .try_for_each(|(offset, slot)| write_row(offset, slot)),
            GenerationOrder::Parallel => {
                #[cfg(not(target_arch = "wasm32"))]
                {
                    let failures: Vec<EngineError> = chunk
                        .par_chunks_mut(width)
                        .enumerate()
                        .filter_map(|(offset, slot)| write_row(offset, slot).err())
                        .collect();
                    // collect keeps row order, so the first failure is the lowest row.
                    match failures.into_iter().next() {
                        Some(err) => Err(err),
                        None => Ok(()),
                    }
                }
                #[cfg(target_arch = "wasm32")]
                {
                    chunk
                        .chunks_mut(width)
                        .enumerate()
                        .try_for_each(|(offset, slot)| write_row(offset, slot))
                }
            }
        }
    }
}

/// Read-only `height × width` matrix backed by pooled chunks.
///
/// Dropping the table returns every chunk to the pool.
#[derive(Debug)]
pub struct Table {
    height: usize,
    width: usize,
    chunk_rows: usize,
    chunks: Vec<PooledBuffer>,
    pool: PoolManager,
}

impl Table {
    /// Number of rows.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Returns true if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.height == 0
    }

    /// Rows per chunk (the last chunk may hold fewer).
    pub fn chunk_rows(&self) -> usize {
        self.chunk_rows
    }

    /// Number of chunk buffers owned by the table.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Raw elements of chunk `idx`, row-major.
    pub fn chunk(&self, idx: usize) -> Option<&[u64]> {
        self.chunks.get(idx).map(|c| &c[..])
    }

    /// Element at `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> Option<u64> {
        if col >= self.width {
            return None;
        }
        self.row(row).map(|r| r[col])
    }

    /// Row `idx` as a contiguous slice.
    pub fn row(&self, idx: usize) -> Option<&[u64]> {
        if idx >= self.height {
            return None;
        }
        let chunk = self.chunks.get(idx / self.chunk_rows)?;
        let offset = (idx % self.chunk_rows) * self.width;
        chunk.get(offset..offset + self.width)
    }

    /// Iterates over all rows in order.
    pub fn rows(&self) -> impl Iterator<Item = &[u64]> + '_ {
        self.chunks
            .iter()
            .flat_map(move |chunk| chunk.chunks_exact(self.width))
    }

    /// Copies column `col` into a fresh vector.
    pub fn column(&self, col: usize) -> Option<Vec<u64>> {
        if col >= self.width {
            return None;
        }
        Some(self.rows().map(|row| row[col]).collect())
    }

    /// Copies column `col` into a buffer checked out from the table's pool.
    pub fn column_pooled(&self, col: usize) -> Result<PooledBuffer> {
        if col >= self.width {
            return Err(EngineError::shape(format!(
                "column {col} out of range for width {}",
                self.width
            )));
        }
        let mut out = self.pool.checkout(self.height)?;
        for (dst, row) in out.iter_mut().zip(self.rows()) {
            *dst = row[col];
        }
        Ok(out)
    }

    pub(crate) fn chunks(&self) -> &[PooledBuffer] {
        &self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;

    fn pool(classes: &[usize], ceilings: &[usize]) -> PoolManager {
        PoolManager::new(PoolConfig::from_classes(classes, ceilings).unwrap()).unwrap()
    }

    fn builder(pool: &PoolManager, budget: usize) -> TableBuilder {
        TableBuilder::new(pool.clone(), Field::goldilocks(), budget)
    }

    fn sample_row(idx: usize) -> Vec<u64> {
        (0..5).map(|col| (idx * 10 + col) as u64).collect()
    }

    #[test]
    fn lookups_match_row_function() {
        let pool = pool(&[16, 64], &[2, 2]);
        let table = builder(&pool, 64).build_table(37, 5, sample_row).unwrap();
        assert_eq!(table.chunk_rows(), 12);
        assert_eq!(table.chunk_count(), 4);
        for i in 0..37 {
            assert_eq!(table.row(i).unwrap(), &sample_row(i)[..]);
            for j in 0..5 {
                assert_eq!(table.get(i, j), Some(sample_row(i)[j]));
            }
        }
        assert_eq!(table.get(37, 0), None);
        assert_eq!(table.get(0, 5), None);
        assert_eq!(table.rows().count(), 37);
    }

    #[test]
    fn columns_follow_rows() {
        let pool = pool(&[16, 64], &[2, 2]);
        let table = builder(&pool, 16).build_table(10, 5, sample_row).unwrap();
        let col = table.column(2).unwrap();
        assert_eq!(col, (0..10).map(|i| (i * 10 + 2) as u64).collect::<Vec<_>>());
        let pooled = table.column_pooled(2).unwrap();
        assert_eq!(&pooled[..], &col[..]);
        assert!(table.column(5).is_none());
        assert!(table.column_pooled(5).is_err());
    }

    #[test]
    fn empty_table_holds_no_buffers() {
        let pool = pool(&[16], &[2]);
        let table = builder(&pool, 16).build_table(0, 4, sample_row).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.chunk_count(), 0);
        assert_eq!(table.rows().count(), 0);
        assert_eq!(pool.stats().checked_out(), 0);
    }

    #[test]
    fn zero_width_is_invalid() {
        let pool = pool(&[16], &[2]);
        let err = builder(&pool, 16).build_table(4, 0, |_| Vec::new()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidShape(_)));
    }

    #[test]
    fn failing_row_releases_every_chunk() {
        let pool = pool(&[16], &[8]);
        let err = builder(&pool, 16)
            .build_table_streaming(20, 4, |idx| {
                if idx == 13 {
                    Err("generator exhausted")
                } else {
                    Ok(vec![idx as u64; 4])
                }
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::RowGeneration { row: 13, .. }));
        let stats = pool.stats();
        assert_eq!(stats.checked_out(), 0);
        assert_eq!(stats.classes[0].idle, stats.classes[0].pooled_total);
    }

    #[test]
    fn wrong_row_length_is_rejected() {
        let pool = pool(&[16], &[2]);
        let err = builder(&pool, 16)
            .build_table(3, 4, |idx| vec![0; if idx == 1 { 3 } else { 4 }])
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidShape(_)));
        assert_eq!(pool.stats().checked_out(), 0);
    }

    #[test]
    fn sequential_generation_is_monotonic() {
        let pool = pool(&[16], &[2]);
        let seen = parking_lot::Mutex::new(Vec::new());
        builder(&pool, 16)
            .build_table(9, 2, |idx| {
                seen.lock().push(idx);
                vec![0, 1]
            })
            .unwrap();
        assert_eq!(seen.into_inner(), (0..9).collect::<Vec<_>>());
    }

    #[test]
    fn parallel_generation_preserves_layout() {
        let pool = pool(&[64, 1024], &[4, 4]);
        let sequential = builder(&pool, 1024).build_table(300, 5, sample_row).unwrap();
        let parallel = builder(&pool, 1024)
            .with_order(GenerationOrder::Parallel)
            .build_table(300, 5, sample_row)
            .unwrap();
        assert!(sequential.rows().eq(parallel.rows()));
    }

    #[test]
    fn parallel_generation_reports_lowest_failing_row() {
        let pool = pool(&[1024], &[2]);
        let err = builder(&pool, 1024)
            .with_order(GenerationOrder::Parallel)
            .build_table_streaming(100, 2, |idx| {
                if idx % 30 == 29 {
                    Err(format!("row {idx}"))
                } else {
                    Ok(vec![1, 2])
                }
            })
            .unwrap_err();
        assert!(matches!(err, EngineError::RowGeneration { row: 29, .. }));
        assert_eq!(pool.stats().checked_out(), 0);
    }

    #[test]
    fn values_are_reduced_into_the_field() {
        let pool = pool(&[16], &[1]);
        let table = TableBuilder::new(pool, Field::new(101, 2), 16)
            .build_table(2, 2, |idx| vec![100 + idx as u64, 202])
            .unwrap();
        assert_eq!(table.row(0).unwrap(), &[100, 0]);
        assert_eq!(table.row(1).unwrap(), &[0, 0]);
    }

    #[test]
    fn chunk_layout_prefers_largest_class_within_budget() {
        let pool = pool(&[64, 1024, 65536], &[4, 4, 2]);
        let b = builder(&pool, 1 << 16);
        assert_eq!(
            b.chunk_layout(32).unwrap(),
            ChunkLayout {
                capacity: 65536,
                chunk_rows: 2048
            }
        );
        let small = builder(&pool, 100);
        assert_eq!(small.chunk_layout(32).unwrap().capacity, 64);
        // No class within budget holds a row of 200.
        assert_eq!(small.chunk_layout(200).unwrap().capacity, 1024);
        let huge = builder(&pool, 1 << 20);
        assert_eq!(
            huge.chunk_layout(100_000).unwrap(),
            ChunkLayout {
                capacity: 1_000_000,
                chunk_rows: 10
            }
        );
    }

    #[test]
    fn dropping_the_table_returns_chunks() {
        let pool = pool(&[64], &[2]);
        let table = builder(&pool, 64).build_table(50, 4, |i| vec![i as u64; 4]).unwrap();
        assert_eq!(table.chunk_count(), 4);
        assert_eq!(pool.stats().checked_out(), 4);
        drop(table);
        let stats = pool.stats();
        assert_eq!(stats.checked_out(), 0);
        assert_eq!(stats.classes[0].idle, 2);
        assert_eq!(stats.classes[0].fallback_allocations, 2);
    }

    #[test]
    fn unallocatable_chunk_surfaces_allocation_failure() {
        let pool = pool(&[64], &[2]);
        let kept = builder(&pool, 64).build_table(10, 4, |i| vec![i as u64; 4]).unwrap();
        let width = 1usize << 60;
        let err = builder(&pool, 64)
            .build_table(3, width, |_| Vec::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::AllocationFailure { .. }));
        assert_eq!(pool.stats().checked_out(), kept.chunk_count());
        drop(kept);
        let stats = pool.stats();
        assert_eq!(stats.checked_out(), 0);
        assert_eq!(stats.oversize_allocations, 0);
    }
}
