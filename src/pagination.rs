//! Pagination engine.
//!
//! The filter can't be pushed into storage, so the engine over-fetches
//! in batches, applies the filter in-process, and stops once it has
//! `page_size + 1` matches (the extra match is the probe that proves a
//! next page exists). Batch size adapts to observed selectivity so low
//! selectivity doesn't degrade to one-row-at-a-time scanning.

use crate::error::{ArchiveError, ArchiveResult};
use crate::filter::{Bindings, FilterProgram};
use crate::name::Name;
use crate::storage::{Row, StorageAdapter};
use crate::token::ContinuationToken;
use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 10_000;
const DEFAULT_BATCH: usize = 64;
const MAX_BATCH: usize = 4096;
const MIN_RATIO: f64 = 0.001;

/// Applies the page-size policy: `<= 0` is invalid,
/// `0`/unset uses the default, anything above the hard cap is clamped
/// silently.
pub fn resolve_page_size(requested: i64) -> ArchiveResult<usize> {
    if requested < 0 {
        return Err(ArchiveError::invalid_argument(
            "page_size must not be negative",
        ));
    }
    if requested == 0 {
        return Ok(DEFAULT_PAGE_SIZE);
    }
    Ok((requested as usize).min(MAX_PAGE_SIZE))
}

/// Turns a decoded row into the filter's variable bindings. A trait
/// rather than a plain closure because a real implementation needs to
/// fetch a Result's child Records to build the `taskrun`/`pipelinerun`
/// bindings, which is an async storage call.
#[async_trait]
pub trait RowBinder: Send + Sync {
    async fn bind(&self, row: &Row) -> ArchiveResult<Bindings>;
}

/// Adapts a plain synchronous closure into a [`RowBinder`], for callers
/// (and tests) that don't need additional I/O to build bindings.
pub struct FnBinder<F>(pub F);

#[async_trait]
impl<F> RowBinder for FnBinder<F>
where
    F: Fn(&Row) -> ArchiveResult<Bindings> + Send + Sync,
{
    async fn bind(&self, row: &Row) -> ArchiveResult<Bindings> {
        (self.0)(row)
    }
}

/// Adaptively-sized batcher: `ratio = matched / returned` from the
/// previous batch (clamped away from zero), next batch size is
/// `clamp(ceil(page_size / ratio), DEFAULT_BATCH, MAX_BATCH)`.
struct AdaptiveBatcher {
    page_size: usize,
    ratio: f64,
}

impl AdaptiveBatcher {
    fn new(page_size: usize) -> Self {
        AdaptiveBatcher {
            page_size,
            ratio: 1.0,
        }
    }

    fn next_batch_size(&self) -> usize {
        let ratio = self.ratio.max(MIN_RATIO);
        let raw = (self.page_size as f64 / ratio).ceil() as usize;
        raw.clamp(DEFAULT_BATCH, MAX_BATCH)
    }

    fn observe(&mut self, matched: usize, returned: usize) {
        if returned > 0 {
            self.ratio = (matched as f64 / returned as f64).max(MIN_RATIO);
        }
    }
}

pub struct Page {
    pub results: Vec<Row>,
    pub next_page_token: Option<String>,
}

/// Runs the over-fetch-and-filter scan loop and assembles a page.
///
/// `filter_text` is the caller-supplied filter source (used only for the
/// continuation-token fingerprint); `program` is the already-compiled
/// predicate; `binder` turns a raw row into filter bindings.
pub async fn list_page(
    storage: &dyn StorageAdapter,
    page_size: usize,
    filter_text: &str,
    program: &dyn FilterProgram,
    binder: &dyn RowBinder,
    resume: Option<ContinuationToken>,
    mut cancel: watch::Receiver<bool>,
) -> ArchiveResult<Page> {
    let mut batcher = AdaptiveBatcher::new(page_size);
    let mut matches: Vec<Row> = Vec::with_capacity(page_size + 1);

    let mut batch_size = batcher.next_batch_size();
    let mut next_batch = match &resume {
        Some(token) => storage
            .scan_inclusive(&token.resume_name, batch_size)
            .await?,
        None => storage.scan(None, batch_size).await?,
    };

    loop {
        if *cancel.borrow() {
            return Err(ArchiveError::Cancelled);
        }

        let returned = next_batch.len();
        let mut matched_in_batch = 0usize;
        let mut cursor: Option<Name> = None;

        for row in next_batch {
            cursor = Some(row.name.clone());
            let bindings = binder.bind(&row).await?;
            if program.evaluate(&bindings)? {
                matched_in_batch += 1;
                matches.push(row);
                if matches.len() == page_size + 1 {
                    break;
                }
            }
        }

        batcher.observe(matched_in_batch, returned);
        debug!(
            batch_size,
            returned, matched_in_batch, next_batch_size = batcher.next_batch_size(),
            "pagination batch scanned"
        );

        if matches.len() == page_size + 1 {
            let probe = matches.pop().expect("just checked len == page_size + 1");
            let token = ContinuationToken::new(probe.name, filter_text);
            return Ok(Page {
                results: matches,
                next_page_token: Some(token.encode()),
            });
        }

        if returned < batch_size {
            // Store exhausted: fewer rows came back than we asked for.
            return Ok(Page {
                results: matches,
                next_page_token: None,
            });
        }

        let cursor = cursor.expect("returned > 0 when returned == batch_size and batch_size > 0");
        batch_size = batcher.next_batch_size();
        next_batch = storage.scan(Some(&cursor), batch_size).await?;
    }
}
