//! Keyword-weighted sentiment scoring over community signals.
//!
//! Aggregates mention counts per keyword over a day window and computes
//! `Σ count × weight`. The score is unbounded and the computation is
//! idempotent: the same stored data always yields the same score.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, NaiveDate};
use tracing::{debug, info};

use crate::domain::errors::EtlResult;
use crate::domain::repositories::Store;
use crate::infrastructure::config::RiskConfig;

/// Aggregated counts and their weighted score for one window.
#[derive(Debug, Clone, PartialEq)]
pub struct SentimentSnapshot {
    pub counts: HashMap<String, i64>,
    pub score: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct SentimentWeights {
    pub new_release: f64,
    pub price_drop: f64,
    pub default: f64,
}

impl From<&RiskConfig> for SentimentWeights {
    fn from(risk: &RiskConfig) -> Self {
        Self {
            new_release: risk.weight_new_release,
            price_drop: risk.weight_price_drop,
            default: risk.weight_default,
        }
    }
}

impl SentimentWeights {
    /// Weight for a keyword: "New Release" and "Price Drop" carry their own
    /// weights, everything else scores the default.
    pub fn for_keyword(&self, keyword: &str) -> f64 {
        let lower = keyword.to_lowercase();
        if lower == "new release" {
            self.new_release
        } else if lower == "price drop" {
            self.price_drop
        } else {
            self.default
        }
    }
}

pub struct SentimentAnalyzer {
    store: Arc<dyn Store>,
    weights: SentimentWeights,
}

impl SentimentAnalyzer {
    pub fn new(store: Arc<dyn Store>, weights: SentimentWeights) -> Self {
        Self { store, weights }
    }

    /// Aggregate mentions over the `window_days` ending at `today` (both
    /// bounds inclusive) and score them.
    pub async fn score_window(
        &self,
        today: NaiveDate,
        window_days: i64,
    ) -> EtlResult<SentimentSnapshot> {
        let from = today - ChronoDuration::days(window_days);
        let counts = self.store.keyword_counts(from, today).await?;
        let score = weighted_score(&counts, &self.weights);

        info!(
            "Sentiment over [{from}, {today}]: {} keywords, score {score}",
            counts.len()
        );
        Ok(SentimentSnapshot { counts, score })
    }
}

/// `Σ count_k × w_k` over the given keyword counts.
pub fn weighted_score(counts: &HashMap<String, i64>, weights: &SentimentWeights) -> f64 {
    let mut score = 0.0;
    for (keyword, count) in counts {
        let weight = weights.for_keyword(keyword);
        let contribution = *count as f64 * weight;
        debug!("keyword '{keyword}': count={count}, weight={weight}, contribution={contribution}");
        score += contribution;
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryStore;
    use chrono::Utc;

    fn weights() -> SentimentWeights {
        SentimentWeights::from(&RiskConfig::default())
    }

    fn counts(pairs: &[(&str, i64)]) -> HashMap<String, i64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn score_applies_documented_weights() {
        // 5·3 + 2·2 + 1·1 = 20
        let score = weighted_score(
            &counts(&[("New Release", 5), ("Price Drop", 2), ("Leak", 1)]),
            &weights(),
        );
        assert_eq!(score, 20.0);
    }

    #[test]
    fn unknown_keywords_score_default_weight() {
        let score = weighted_score(&counts(&[("Issues", 4), ("Used Market", 3)]), &weights());
        assert_eq!(score, 7.0);
    }

    #[test]
    fn empty_counts_score_zero() {
        assert_eq!(weighted_score(&HashMap::new(), &weights()), 0.0);
    }

    #[test]
    fn weight_lookup_is_case_insensitive() {
        let w = weights();
        assert_eq!(w.for_keyword("NEW RELEASE"), 3.0);
        assert_eq!(w.for_keyword("price drop"), 2.0);
        assert_eq!(w.for_keyword("Leak"), 1.0);
    }

    #[tokio::test]
    async fn scoring_over_store_window_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let today = Utc::now().date_naive();
        store
            .seed_keyword_counts(&[("New Release", today, 5), ("Price Drop", today, 2)])
            .await;

        let analyzer = SentimentAnalyzer::new(store, weights());
        let first = analyzer.score_window(today, 7).await.unwrap();
        let second = analyzer.score_window(today, 7).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.score, 19.0);
    }

    #[tokio::test]
    async fn counts_outside_window_are_excluded() {
        let store = Arc::new(MemoryStore::new());
        let today = Utc::now().date_naive();
        let old = today - ChronoDuration::days(30);
        store
            .seed_keyword_counts(&[("New Release", today, 2), ("New Release", old, 50)])
            .await;

        let analyzer = SentimentAnalyzer::new(store, weights());
        let snapshot = analyzer.score_window(today, 7).await.unwrap();
        assert_eq!(snapshot.counts.get("New Release"), Some(&2));
        assert_eq!(snapshot.score, 6.0);
    }
}
