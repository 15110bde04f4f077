//! Reusable row sources for streaming table construction.
use std::fmt;
use std::sync::Arc;

use crate::error::RowError;

type RowFn = dyn Fn(usize) -> Result<Vec<u64>, RowError> + Send + Sync;

#[derive(Clone)]
/// A fixed-width row function shared behind an `Arc`.
///
/// The function must be a pure function of the row index; builders may call
/// it from several threads and rely on getting the same row back for the
/// same index.
pub struct StreamingRows {
    width: usize,
    generator: Arc<RowFn>,
}

impl fmt::Debug for StreamingRows {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingRows")
            .field("width", &self.width)
            .finish()
    }
}

impl StreamingRows {
    /// Wraps an infallible row closure.
    pub fn new<F>(width: usize, generator: F) -> Self
    where
        F: Fn(usize) -> Vec<u64> + Send + Sync + 'static,
    {
        Self::fallible(width, move |idx| Ok(generator(idx)))
    }

    /// Wraps a row closure that may fail.
    pub fn fallible<F>(width: usize, generator: F) -> Self
    where
        F: Fn(usize) -> Result<Vec<u64>, RowError> + Send + Sync + 'static,
    {
        Self {
            width,
            generator: Arc::new(generator),
        }
    }

    /// Every row has `width` elements.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Produces row `idx`.
    pub fn row(&self, idx: usize) -> Result<Vec<u64>, RowError> {
        (self.generator)(idx)
    }

    /// Row `idx` filled with `idx` itself in every column.
    pub fn constant_index(width: usize) -> Self {
        Self::new(width, move |idx| vec![idx as u64; width])
    }
}
