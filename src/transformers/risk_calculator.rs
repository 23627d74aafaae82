//! Composite inventory-risk index and alert decision.
//!
//! `risk = (current_price − avg_7d_ago_price) + (new_release_mentions × 0.3)`.
//! A product is high-risk when the index strictly exceeds the configured
//! threshold; the resulting alert carries the factors that produced it.
//! Products without enough history or signals are skipped with a warning.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

use crate::domain::entities::RiskAlert;
use crate::domain::errors::{EtlError, EtlResult};
use crate::domain::repositories::Store;
use crate::transformers::price_analyzer::{round2, PriceAnalyzer};

/// Weight applied to new-release mentions in the risk formula.
pub const NEW_RELEASE_WEIGHT: f64 = 0.3;

/// Outcome of assessing one product.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    pub risk_index: f64,
    pub price_delta: f64,
    pub week_ago_avg: f64,
    pub high_risk: bool,
}

pub struct RiskCalculator {
    store: Arc<dyn Store>,
    price_analyzer: PriceAnalyzer,
    threshold: f64,
}

impl RiskCalculator {
    pub fn new(store: Arc<dyn Store>, threshold: f64) -> Self {
        let price_analyzer = PriceAnalyzer::new(store.clone());
        Self {
            store,
            price_analyzer,
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Assess one product. Returns `Ok(None)` (with a warning) when the
    /// 7-day history window is empty — no alert can fire without a baseline.
    pub async fn assess(
        &self,
        sku_id: i64,
        current_price: f64,
        new_release_mentions: i64,
        now: DateTime<Utc>,
    ) -> EtlResult<Option<RiskAssessment>> {
        if current_price <= 0.0 {
            return Err(EtlError::validation(format!(
                "invalid price {current_price} for sku {sku_id}: must be positive"
            )));
        }
        if new_release_mentions < 0 {
            return Err(EtlError::validation(format!(
                "invalid new_release_mentions {new_release_mentions}: must be non-negative"
            )));
        }

        let Some(week_ago_avg) = self.price_analyzer.week_ago_average(sku_id, now).await? else {
            warn!("Skipping risk assessment for sku {sku_id}: no 7-day price history");
            return Ok(None);
        };

        let price_delta = current_price - week_ago_avg;
        let risk_index = round2(risk_index(price_delta, new_release_mentions));
        let high_risk = risk_index > self.threshold;

        info!(
            "sku {sku_id} risk: current={current_price:.2}, week_avg={week_ago_avg:.2}, \
             delta={price_delta:.2}, mentions={new_release_mentions}, \
             risk={risk_index:.2}, threshold={:.2}, high_risk={high_risk}",
            self.threshold
        );

        Ok(Some(RiskAssessment {
            risk_index,
            price_delta,
            week_ago_avg,
            high_risk,
        }))
    }

    /// Build the alert record for a high-risk assessment.
    pub fn build_alert(
        &self,
        sku_id: i64,
        current_price: f64,
        assessment: &RiskAssessment,
        new_release_mentions: i64,
        sentiment_score: f64,
        now: DateTime<Utc>,
    ) -> RiskAlert {
        let price_change_pct = if assessment.week_ago_avg != 0.0 {
            round2(assessment.price_delta / assessment.week_ago_avg * 100.0)
        } else {
            0.0
        };

        let reason = alert_reason(price_change_pct, new_release_mentions);

        RiskAlert {
            sku_id,
            risk_index: assessment.risk_index,
            threshold: self.threshold,
            contributing_factors: json!({
                "current_price": round2(current_price),
                "last_week_avg_price": round2(assessment.week_ago_avg),
                "price_delta": round2(assessment.price_delta),
                "price_change_pct": price_change_pct,
                "new_release_mentions": new_release_mentions,
                "sentiment_score": sentiment_score,
                "reason": reason,
            }),
            created_at: now,
        }
    }

    /// Persist the alert. Pure insert: alerts are an append-only stream.
    pub async fn emit_alert(&self, alert: &RiskAlert) -> EtlResult<()> {
        self.store.insert_alert(alert).await?;
        warn!(
            "RISK ALERT: sku {} risk_index={:.2} threshold={:.2}",
            alert.sku_id, alert.risk_index, alert.threshold
        );
        Ok(())
    }
}

/// The composite formula itself.
pub fn risk_index(price_delta: f64, new_release_mentions: i64) -> f64 {
    price_delta + new_release_mentions as f64 * NEW_RELEASE_WEIGHT
}

/// Sum mentions of keywords in the new-release family: anything whose
/// lowercase form mentions "new release", "leak" or "5070".
pub fn new_release_mentions(counts: &HashMap<String, i64>) -> i64 {
    counts
        .iter()
        .filter(|(keyword, _)| {
            let lower = keyword.to_lowercase();
            lower.contains("new release") || lower.contains("leak") || lower.contains("5070")
        })
        .map(|(_, count)| *count)
        .sum()
}

/// Human-readable cause line carried inside the alert factors.
fn alert_reason(price_change_pct: f64, new_release_mentions: i64) -> &'static str {
    let price_dropping = price_change_pct < -5.0;
    let rumors_surging = new_release_mentions > 10;
    match (price_dropping, rumors_surging) {
        (true, true) => "가격 하락 + 신제품 루머 증가",
        (true, false) => "가격 급락",
        (false, true) => "신제품 루머 급증",
        (false, false) => "재고 위험 감지",
    }
}
