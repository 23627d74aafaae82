//! Store boundary over the relational schema.
//!
//! Implementations run each operation in its own transaction, retry transient
//! failures internally, and surface typed errors on constraint violations.
//! Callers must not assume ordering between independent calls.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::domain::entities::{
    LatestPrice, MarketSignal, PriceObservation, PricePoint, ProductIdentity, RiskAlert,
};
use crate::domain::errors::EtlResult;

#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or update a product under its `(brand, model_name)` natural key.
    ///
    /// A conflicting row keeps its id and takes the new chipset/vram/is_oc:
    /// product specs are authoritative from the latest observation.
    async fn upsert_product(&self, identity: &ProductIdentity) -> EtlResult<i64>;

    /// Insert or update a price row under `(product_id, source, recorded_at)`.
    ///
    /// Re-runs may recompute `price_change_pct` once more history exists, so
    /// a conflict updates price, source_url and price_change_pct in place.
    async fn insert_price(&self, sku_id: i64, observation: &PriceObservation) -> EtlResult<()>;

    /// Insert or update a signal under `(keyword, date, post_url)`.
    ///
    /// A conflict updates title and sentiment_score and increments
    /// mention_count by exactly 1, counting reprocessings.
    async fn insert_signal(&self, signal: &MarketSignal) -> EtlResult<()>;

    /// Append a risk alert. No conflict target: alerts are a time-series and
    /// duplicates across firings are meaningful.
    async fn insert_alert(&self, alert: &RiskAlert) -> EtlResult<()>;

    /// Price observations for a product in `[from, to]`, ordered by
    /// recorded_at ascending.
    async fn historical_prices(
        &self,
        sku_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> EtlResult<Vec<PricePoint>>;

    /// Keyword → sum(mention_count) over the date window `[from, to]`.
    async fn keyword_counts(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EtlResult<HashMap<String, i64>>;

    /// Most recent price per product, limited to observations since `since`.
    async fn latest_prices(&self, since: DateTime<Utc>) -> EtlResult<Vec<LatestPrice>>;

    /// Display label ("BRAND CHIPSET MODEL") for a product, if it exists.
    async fn product_label(&self, sku_id: i64) -> EtlResult<Option<String>>;
}
