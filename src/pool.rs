use std::collections::HashSet;
use std::hash::Hash;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::Span;

use crate::error::CellError;

/// Fixed-size pool each stage fans out on. `map` blocks until every item
/// is done and keeps input order.
pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    pub fn new(size: usize) -> Result<Self, CellError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(|index| format!("ncbi-cell-{index}"))
            .build()
            .map_err(|err| CellError::WorkerPool(err.to_string()))?;
        Ok(Self { pool })
    }

    pub fn map<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        // Workers log inside the caller's span.
        let span = Span::current();
        self.pool
            .install(|| items.par_iter().map(|item| span.in_scope(|| f(item))).collect())
    }
}

/// Drops missing values and repeats, keeping first-occurrence order.
pub fn dedup_present<T>(items: Vec<Option<T>>) -> Vec<T>
where
    T: Eq + Hash + Clone,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .flatten()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
