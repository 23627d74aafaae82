//! Week-over-week price change analysis.
//!
//! Compares a current price against the average of observations recorded in
//! the `[now-8d, now-6d]` window. An empty window yields `None` — the caller
//! stores a null change rather than failing the record.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, warn};

use crate::domain::errors::{EtlError, EtlResult};
use crate::domain::repositories::Store;

pub struct PriceAnalyzer {
    store: Arc<dyn Store>,
}

impl PriceAnalyzer {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Compute `price_change_pct = (current − avg_7d_ago) / avg_7d_ago × 100`,
    /// rounded to two decimals, where the average covers `[now-8d, now-6d]`.
    ///
    /// Returns `Ok(None)` with a logged warning when the window is empty.
    pub async fn price_change_pct(
        &self,
        sku_id: i64,
        current_price: f64,
        now: DateTime<Utc>,
    ) -> EtlResult<Option<f64>> {
        if current_price <= 0.0 {
            return Err(EtlError::validation(format!(
                "invalid price {current_price} for sku {sku_id}: must be positive"
            )));
        }

        let from = now - ChronoDuration::days(8);
        let to = now - ChronoDuration::days(6);
        let history = self.store.historical_prices(sku_id, from, to).await?;

        if history.is_empty() {
            warn!("Insufficient price history for sku {sku_id}: window [{from}, {to}] is empty");
            return Ok(None);
        }

        let avg = history.iter().map(|p| p.price).sum::<f64>() / history.len() as f64;
        if avg == 0.0 {
            return Err(EtlError::validation(format!(
                "historical average price is zero for sku {sku_id}"
            )));
        }

        let pct = round2((current_price - avg) / avg * 100.0);
        debug!(
            "sku {sku_id}: current {current_price:.2}, 7d avg {avg:.2}, change {pct:+.2}%"
        );
        Ok(Some(pct))
    }

    /// Average price over the `[now-8d, now-6d]` window, for the risk phase.
    pub async fn week_ago_average(
        &self,
        sku_id: i64,
        now: DateTime<Utc>,
    ) -> EtlResult<Option<f64>> {
        let from = now - ChronoDuration::days(8);
        let to = now - ChronoDuration::days(6);
        let history = self.store.historical_prices(sku_id, from, to).await?;
        if history.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            history.iter().map(|p| p.price).sum::<f64>() / history.len() as f64,
        ))
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
