//! In-process store used by the test suites.
//!
//! Implements the exact natural-key semantics of the relational store —
//! products keep their id across upserts, price rows update in place,
//! signals increment their mention counter, alerts append — so pipeline and
//! analyzer properties can be exercised without a database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::Mutex;

use crate::domain::constants::DANAWA_SOURCE;
use crate::domain::entities::{
    LatestPrice, MarketSignal, PriceObservation, PricePoint, ProductIdentity, RiskAlert,
};
use crate::domain::errors::{EtlError, EtlResult};
use crate::domain::repositories::Store;

#[derive(Debug, Clone)]
struct StoredProduct {
    id: i64,
    identity: ProductIdentity,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StoredSignal {
    signal: MarketSignal,
    mention_count: i64,
}

#[derive(Default)]
struct Inner {
    products: Vec<StoredProduct>,
    prices: HashMap<(i64, String, DateTime<Utc>), PriceObservation>,
    signals: HashMap<(String, NaiveDate, String), StoredSignal>,
    alerts: Vec<RiskAlert>,
    next_id: i64,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail as StoreUnavailable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> EtlResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(EtlError::store_unavailable("simulated outage"))
        } else {
            Ok(())
        }
    }

    /// Seed price observations for a product, one row per point.
    pub async fn seed_prices(&self, sku_id: i64, points: &[PricePoint]) {
        let mut inner = self.inner.lock().await;
        for point in points {
            inner.prices.insert(
                (sku_id, DANAWA_SOURCE.to_string(), point.recorded_at),
                PriceObservation {
                    price: point.price,
                    source: DANAWA_SOURCE.to_string(),
                    source_url: None,
                    recorded_at: point.recorded_at,
                    price_change_pct: None,
                },
            );
        }
    }

    /// Seed aggregated keyword counts; each entry becomes one signal row with
    /// the given mention count.
    pub async fn seed_keyword_counts(&self, entries: &[(&str, NaiveDate, i64)]) {
        let mut inner = self.inner.lock().await;
        for (i, (keyword, date, count)) in entries.iter().enumerate() {
            let url = format!("https://seed.example/{i}");
            inner.signals.insert(
                (keyword.to_string(), *date, url.clone()),
                StoredSignal {
                    signal: MarketSignal {
                        keyword: keyword.to_string(),
                        post_title: format!("seed {keyword}"),
                        post_url: url,
                        subreddit: "seed".to_string(),
                        date: *date,
                        sentiment_score: None,
                        mention_count: *count,
                    },
                    mention_count: *count,
                },
            );
        }
    }

    pub async fn product_count(&self) -> usize {
        self.inner.lock().await.products.len()
    }

    pub async fn price_count(&self) -> usize {
        self.inner.lock().await.prices.len()
    }

    pub async fn signal_count(&self) -> usize {
        self.inner.lock().await.signals.len()
    }

    pub async fn alert_count(&self) -> usize {
        self.inner.lock().await.alerts.len()
    }

    pub async fn alerts(&self) -> Vec<RiskAlert> {
        self.inner.lock().await.alerts.clone()
    }

    pub async fn mention_count(
        &self,
        keyword: &str,
        date: NaiveDate,
        post_url: &str,
    ) -> Option<i64> {
        self.inner
            .lock()
            .await
            .signals
            .get(&(keyword.to_string(), date, post_url.to_string()))
            .map(|s| s.mention_count)
    }

    pub async fn product_id(&self, brand: &str, model_name: &str) -> Option<i64> {
        self.inner
            .lock()
            .await
            .products
            .iter()
            .find(|p| p.identity.brand == brand && p.identity.model_name == model_name)
            .map(|p| p.id)
    }

    pub async fn product_identities(&self) -> Vec<ProductIdentity> {
        self.inner
            .lock()
            .await
            .products
            .iter()
            .map(|p| p.identity.clone())
            .collect()
    }

    pub async fn price_rows(&self, sku_id: i64) -> Vec<PriceObservation> {
        let mut rows: Vec<_> = self
            .inner
            .lock()
            .await
            .prices
            .iter()
            .filter(|((id, _, _), _)| *id == sku_id)
            .map(|(_, obs)| obs.clone())
            .collect();
        rows.sort_by_key(|o| o.recorded_at);
        rows
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_product(&self, identity: &ProductIdentity) -> EtlResult<i64> {
        self.check_available()?;
        let now = Utc::now();
        let mut inner = self.inner.lock().await;

        if let Some(existing) = inner.products.iter_mut().find(|p| {
            p.identity.brand == identity.brand && p.identity.model_name == identity.model_name
        }) {
            existing.identity.chipset = identity.chipset;
            existing.identity.vram = identity.vram.clone();
            existing.identity.is_oc = identity.is_oc;
            existing.updated_at = now;
            return Ok(existing.id);
        }

        inner.next_id += 1;
        let id = inner.next_id;
        inner.products.push(StoredProduct {
            id,
            identity: identity.clone(),
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn insert_price(&self, sku_id: i64, observation: &PriceObservation) -> EtlResult<()> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        inner.prices.insert(
            (
                sku_id,
                observation.source.clone(),
                observation.recorded_at,
            ),
            observation.clone(),
        );
        Ok(())
    }

    async fn insert_signal(&self, signal: &MarketSignal) -> EtlResult<()> {
        self.check_available()?;
        let mut inner = self.inner.lock().await;
        let key = (
            signal.keyword.clone(),
            signal.date,
            signal.post_url.clone(),
        );
        match inner.signals.get_mut(&key) {
            Some(existing) => {
                existing.signal.post_title = signal.post_title.clone();
                existing.signal.sentiment_score = signal.sentiment_score;
                existing.mention_count += 1;
                existing.signal.mention_count = existing.mention_count;
            }
            None => {
                inner.signals.insert(
                    key,
                    StoredSignal {
                        signal: signal.clone(),
                        mention_count: 1,
                    },
                );
            }
        }
        Ok(())
    }

    async fn insert_alert(&self, alert: &RiskAlert) -> EtlResult<()> {
        self.check_available()?;
        self.inner.lock().await.alerts.push(alert.clone());
        Ok(())
    }

    async fn historical_prices(
        &self,
        sku_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> EtlResult<Vec<PricePoint>> {
        self.check_available()?;
        let inner = self.inner.lock().await;
        let mut points: Vec<_> = inner
            .prices
            .iter()
            .filter(|((id, _, at), _)| *id == sku_id && *at >= from && *at <= to)
            .map(|(_, obs)| PricePoint {
                recorded_at: obs.recorded_at,
                price: obs.price,
            })
            .collect();
        points.sort_by_key(|p| p.recorded_at);
        Ok(points)
    }

    async fn keyword_counts(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> EtlResult<HashMap<String, i64>> {
        self.check_available()?;
        let inner = self.inner.lock().await;
        let mut counts = HashMap::new();
        for ((keyword, date, _), stored) in &inner.signals {
            if *date >= from && *date <= to {
                *counts.entry(keyword.clone()).or_insert(0) += stored.mention_count;
            }
        }
        Ok(counts)
    }

    async fn latest_prices(&self, since: DateTime<Utc>) -> EtlResult<Vec<LatestPrice>> {
        self.check_available()?;
        let inner = self.inner.lock().await;
        let mut latest: HashMap<i64, LatestPrice> = HashMap::new();
        for ((sku_id, _, recorded_at), obs) in &inner.prices {
            if *recorded_at < since {
                continue;
            }
            let candidate = LatestPrice {
                sku_id: *sku_id,
                price: obs.price,
                recorded_at: *recorded_at,
            };
            latest
                .entry(*sku_id)
                .and_modify(|current| {
                    if candidate.recorded_at > current.recorded_at {
                        *current = candidate;
                    }
                })
                .or_insert(candidate);
        }
        let mut rows: Vec<_> = latest.into_values().collect();
        rows.sort_by_key(|r| r.sku_id);
        Ok(rows)
    }

    async fn product_label(&self, sku_id: i64) -> EtlResult<Option<String>> {
        self.check_available()?;
        Ok(self
            .inner
            .lock()
            .await
            .products
            .iter()
            .find(|p| p.id == sku_id)
            .map(|p| p.identity.label()))
    }
}
