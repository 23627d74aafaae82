//! PostgreSQL implementation of the store boundary.
//!
//! Each operation runs in its own short transaction against a bounded
//! connection pool and is retried on transient failures. Conflict targets
//! follow the natural keys: products update their spec fields, price rows
//! update in place, market signals increment their mention counter, and risk
//! alerts append unconditionally.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::constants::GPU_CATEGORY;
use crate::domain::entities::{
    LatestPrice, MarketSignal, PriceObservation, PricePoint, ProductIdentity, RiskAlert,
};
use crate::domain::errors::{EtlError, EtlResult};
use crate::domain::repositories::Store;
use crate::infrastructure::config::{RetryConfig, StoreConfig};
use crate::infrastructure::retry::Retryer;

pub struct PgStore {
    pool: PgPool,
    retryer: Retryer,
    cancel: CancellationToken,
}

impl PgStore {
    /// Connect the bounded pool. A connect failure after retries is the
    /// fatal-initialization case: the caller aborts the run.
    pub async fn connect(
        store: &StoreConfig,
        retry: &RetryConfig,
        cancel: CancellationToken,
    ) -> EtlResult<Self> {
        let retryer = Retryer::from_config(retry);
        let url = store.url();
        let pool = retryer
            .run("store connect", &cancel, || {
                let url = url.clone();
                async move {
                    PgPoolOptions::new()
                        .max_connections(store.pool_size)
                        .acquire_timeout(Duration::from_secs(store.acquire_timeout_seconds))
                        .connect(&url)
                        .await
                        .map_err(|e| EtlError::transient(format!("connect failed: {e}")))
                }
            })
            .await
            .map_err(|e| match e {
                EtlError::Cancelled => EtlError::Cancelled,
                other => EtlError::store_unavailable(other.to_string()),
            })?;

        info!(
            "Connected to store at {}:{}/{} (pool size {})",
            store.host, store.port, store.name, store.pool_size
        );

        Ok(Self {
            pool,
            retryer,
            cancel,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PgStore {
    async fn upsert_product(&self, identity: &ProductIdentity) -> EtlResult<i64> {
        let key = format!("({}, {})", identity.brand, identity.model_name);
        let id = self
            .retryer
            .run("upsert product", &self.cancel, || {
                let key = key.clone();
                async move {
                    let mut tx = self
                        .pool
                        .begin()
                        .await
                        .map_err(|e| EtlError::from_sqlx(e, &key))?;
                    let row = sqlx::query(
                        r#"
                        INSERT INTO products
                            (category, chipset, brand, model_name, vram, is_oc, created_at, updated_at)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
                        ON CONFLICT (brand, model_name)
                        DO UPDATE SET
                            chipset = EXCLUDED.chipset,
                            vram = EXCLUDED.vram,
                            is_oc = EXCLUDED.is_oc,
                            updated_at = EXCLUDED.updated_at
                        RETURNING id
                        "#,
                    )
                    .bind(GPU_CATEGORY)
                    .bind(identity.chipset.as_str())
                    .bind(&identity.brand)
                    .bind(&identity.model_name)
                    .bind(&identity.vram)
                    .bind(identity.is_oc)
                    .bind(Utc::now())
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| EtlError::from_sqlx(e, &key))?;
                    tx.commit().await.map_err(|e| EtlError::from_sqlx(e, &key))?;
                    row.try_get::<i64, _>("id")
                        .map_err(|e| EtlError::from_sqlx(e, &key))
                }
            })
            .await?;

        debug!(
            "Upserted product {} {} (sku_id {id})",
            identity.brand, identity.model_name
        );
        Ok(id)
    }

    async fn insert_price(&self, sku_id: i64, observation: &PriceObservation) -> EtlResult<()> {
        let key = format!(
            "({sku_id}, {}, {})",
            observation.source, observation.recorded_at
        );
        self.retryer
            .run("insert price", &self.cancel, || {
                let key = key.clone();
                async move {
                    let mut tx = self
                        .pool
                        .begin()
                        .await
                        .map_err(|e| EtlError::from_sqlx(e, &key))?;
                    sqlx::query(
                        r#"
                        INSERT INTO price_logs
                            (sku_id, price, source, source_url, recorded_at, price_change_pct)
                        VALUES ($1, $2, $3, $4, $5, $6)
                        ON CONFLICT (sku_id, source, recorded_at)
                        DO UPDATE SET
                            price = EXCLUDED.price,
                            source_url = EXCLUDED.source_url,
                            price_change_pct = EXCLUDED.price_change_pct
                        "#,
                    )
                    .bind(sku_id)
                    .bind(observation.price)
                    .bind(&observation.source)
                    .bind(observation.source_url.as_deref())
                    .bind(observation.recorded_at)
                    .bind(observation.price_change_pct)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| EtlError::from_sqlx(e, &key))?;
                    tx.commit().await.map_err(|e| EtlError::from_sqlx(e, &key))
                }
            })
            .await?;
        Ok(())
    }

    async fn insert_signal(&self, signal: &MarketSignal) -> EtlResult<()> {
        let key = format!("({}, {}, {})", signal.keyword, signal.date, signal.post_url);
        self.retryer
            .run("insert signal", &self.cancel, || {
                let key = key.clone();
                async move {
                    let mut tx = self
                        .pool
                        .begin()
                        .await
                        .map_err(|e| EtlError::from_sqlx(e, &key))?;
                    sqlx::query(
                        r#"
                        INSERT INTO market_signals
                            (keyword, post_title, post_url, subreddit, sentiment_score,
                             mention_count, date)
                        VALUES ($1, $2, $3, $4, $5, 1, $6)
                        ON CONFLICT (keyword, date, post_url)
                        DO UPDATE SET
                            post_title = EXCLUDED.post_title,
                            sentiment_score = EXCLUDED.sentiment_score,
                            mention_count = market_signals.mention_count + 1
                        "#,
                    )
                    .bind(&signal.keyword)
                    .bind(&signal.post_title)
                    .bind(&signal.post_url)
                    .bind(&signal.subreddit)
                    .bind(signal.sentiment_score)
                    .bind(signal.date)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| EtlError::from_sqlx(e, &key))?;
                    tx.commit().await.map_err(|e| EtlError::from_sqlx(e, &key))
                }
            })
            .await?;
        Ok(())
    }

    async fn insert_alert(&self, alert: &RiskAlert) -> EtlResult<()> {
        let key = format!("alert for sku {}", alert.sku_id);
        self.retryer
            .run("insert alert", &self.cancel, || {
                let key = key.clone();
                async move {
                    let mut tx = self
                        .pool
                        .begin()
                        .await
                        .map_err(|e| EtlError::from_sqlx(e, &key))?;
                    sqlx::query(
                        r#"
                        INSERT INTO risk_alerts
                            (sku_id, risk_index, threshold, contributing_factors,
                             acknowledged, created_at)
                        VALUES ($1, $2, $3, $4, FALSE, $5)
                        "#,
                    )
                    .bind(alert.sku_id)
                    .bind(alert.risk_index)
                    .bind(alert.threshold)
                    .bind(alert.contributing_factors.clone())
                    .bind(alert.created_at)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| EtlError::from_sqlx(e, &key))?;
                    tx.commit().await.map_err(|e| EtlError::from_sqlx(e, &key))
                }
            })
            .await?;
        Ok(())
    }

    async fn historical_prices(
        &self,
        sku_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> EtlResult<Vec<PricePoint>> {
        let key = format!("history for sku {sku_id}");
        let rows = self
            .retryer
            .run("historical prices", &self.cancel, || {
                let key = key.clone();
                async move {
                    sqlx::query(
                        r#"
                        SELECT price, recorded_at
                        FROM price_logs
                        WHERE sku_id = $1 AND recorded_at >= $2 AND recorded_at <= $3
                        ORDER BY recorded_at ASC
                        "#,
                    )
                    .bind(sku_id)
                    .bind(from)
                    .bind(to)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| EtlError::from_sqlx(e, &key))
                }
            })
            .await?;

        rows.into_iter()
            .map(|row| {
                Ok(PricePoint {
                    price: row
                        .try_get("price")
                        .map_err(|e| EtlError::from_sqlx(e, &key))?,
                    recorded_at: row
                        .try_get("recorded_at")
                        .map_err(|e| EtlError::from_sqlx(e, &key))?,
                })
            })
            .collect()
    }

    async fn keyword_counts(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EtlResult<HashMap<String, i64>> {
        let rows = self
            .retryer
            .run("keyword counts", &self.cancel, || async move {
                sqlx::query(
                    r#"
                    SELECT keyword, COALESCE(SUM(mention_count), 0) AS total
                    FROM market_signals
                    WHERE date >= $1 AND date <= $2
                    GROUP BY keyword
                    "#,
                )
                .bind(from)
                .bind(to)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| EtlError::from_sqlx(e, "keyword window"))
            })
            .await?;

        let mut counts = HashMap::with_capacity(rows.len());
        for row in rows {
            let keyword: String = row
                .try_get("keyword")
                .map_err(|e| EtlError::from_sqlx(e, "keyword window"))?;
            let total: i64 = row
                .try_get("total")
                .map_err(|e| EtlError::from_sqlx(e, "keyword window"))?;
            counts.insert(keyword, total);
        }
        Ok(counts)
    }

    async fn latest_prices(&self, since: DateTime<Utc>) -> EtlResult<Vec<LatestPrice>> {
        let rows = self
            .retryer
            .run("latest prices", &self.cancel, || async move {
                sqlx::query(
                    r#"
                    SELECT DISTINCT ON (sku_id) sku_id, price, recorded_at
                    FROM price_logs
                    WHERE recorded_at >= $1
                    ORDER BY sku_id, recorded_at DESC
                    "#,
                )
                .bind(since)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| EtlError::from_sqlx(e, "latest prices"))
            })
            .await?;

        rows.into_iter()
            .map(|row| {
                Ok(LatestPrice {
                    sku_id: row
                        .try_get("sku_id")
                        .map_err(|e| EtlError::from_sqlx(e, "latest prices"))?,
                    price: row
                        .try_get("price")
                        .map_err(|e| EtlError::from_sqlx(e, "latest prices"))?,
                    recorded_at: row
                        .try_get("recorded_at")
                        .map_err(|e| EtlError::from_sqlx(e, "latest prices"))?,
                })
            })
            .collect()
    }

    async fn product_label(&self, sku_id: i64) -> EtlResult<Option<String>> {
        let row = self
            .retryer
            .run("product label", &self.cancel, || async move {
                sqlx::query(
                    r#"
                    SELECT brand, chipset, model_name
                    FROM products
                    WHERE id = $1
                    "#,
                )
                .bind(sku_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| EtlError::from_sqlx(e, "product label"))
            })
            .await?;

        match row {
            Some(row) => {
                let brand: String = row
                    .try_get("brand")
                    .map_err(|e| EtlError::from_sqlx(e, "product label"))?;
                let chipset: String = row
                    .try_get("chipset")
                    .map_err(|e| EtlError::from_sqlx(e, "product label"))?;
                let model: String = row
                    .try_get("model_name")
                    .map_err(|e| EtlError::from_sqlx(e, "product label"))?;
                Ok(Some(format!("{brand} {chipset} {model}")))
            }
            None => Ok(None),
        }
    }
}
