//! Extraction seams consumed by the pipeline.
//!
//! The pipeline orchestrates against these traits rather than the concrete
//! crawlers, so alternative sources (and test fixtures) can slot in without
//! touching the orchestration.

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::domain::entities::{MarketSignal, RawPriceRecord};
use crate::domain::errors::EtlResult;

/// A source of raw price records.
///
/// The stream is finite and lazy; it is not restartable mid-consumption.
/// Source-level failures surface as `Err` items so consumers can count them
/// without losing the rest of the batch.
pub trait PriceSource: Send + Sync {
    fn stream_records<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BoxStream<'a, EtlResult<RawPriceRecord>>;
}

/// A source of community market signals.
///
/// Returns the collected signals plus per-feed error descriptions; only
/// cancellation aborts the whole collection.
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn collect(
        &self,
        cancel: &CancellationToken,
    ) -> EtlResult<(Vec<MarketSignal>, Vec<String>)>;
}
