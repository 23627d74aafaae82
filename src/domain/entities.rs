//! Plain records flowing through the ETL stages.
//!
//! These mirror the relational schema (products, price_logs, market_signals,
//! risk_alerts) without any ORM machinery: extractors produce raw records,
//! the normalizer yields product identities, analyzers attach derived fields
//! and the store persists them under their natural keys.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of supported GPU chipsets (RTX 4070 family).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Chipset {
    Rtx4070,
    Rtx4070Super,
    Rtx4070Ti,
    Rtx4070TiSuper,
}

impl Chipset {
    /// All supported variants, longest names first so that listing-side
    /// matching can disambiguate "Ti" from "Ti Super".
    pub const ALL: [Chipset; 4] = [
        Chipset::Rtx4070TiSuper,
        Chipset::Rtx4070Super,
        Chipset::Rtx4070Ti,
        Chipset::Rtx4070,
    ];

    /// Canonical display form, as persisted in the products table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Chipset::Rtx4070 => "RTX 4070",
            Chipset::Rtx4070Super => "RTX 4070 Super",
            Chipset::Rtx4070Ti => "RTX 4070 Ti",
            Chipset::Rtx4070TiSuper => "RTX 4070 Ti Super",
        }
    }

    /// Parse a canonical chipset string back into the closed set.
    pub fn parse(value: &str) -> Option<Chipset> {
        Chipset::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(value.trim()))
    }
}

impl std::fmt::Display for Chipset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured product identity produced by the normalizer.
///
/// `(brand, model_name)` is the natural key for upserts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductIdentity {
    pub brand: String,
    pub chipset: Chipset,
    pub model_name: String,
    pub vram: String,
    pub is_oc: bool,
}

impl ProductIdentity {
    /// Human-readable label used in alerts and logs.
    pub fn label(&self) -> String {
        format!("{} {} {}", self.brand, self.chipset, self.model_name)
    }
}

/// One historical price point attached to a listing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub recorded_at: DateTime<Utc>,
    pub price: f64,
}

/// Raw record scraped from a price listing, before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPriceRecord {
    pub raw_product_name: String,
    pub price: f64,
    pub source: String,
    pub source_url: String,
    pub recorded_at: DateTime<Utc>,
    /// Daily points from the listing's price chart, bounded to ~90 days.
    pub history: Vec<PricePoint>,
}

/// One price observation, keyed by `(product_id, source, recorded_at)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub price: f64,
    pub source: String,
    pub source_url: Option<String>,
    pub recorded_at: DateTime<Utc>,
    /// Week-over-week change; `None` when the history window is empty.
    pub price_change_pct: Option<f64>,
}

/// One keyword hit inside one community post on one date.
///
/// Keyed by `(keyword, date, post_url)`; the store increments
/// `mention_count` on re-ingest of the same key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSignal {
    pub keyword: String,
    pub post_title: String,
    pub post_url: String,
    pub subreddit: String,
    pub date: NaiveDate,
    pub sentiment_score: Option<f64>,
    pub mention_count: i64,
}

/// A persisted risk event. Append-only; no natural key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAlert {
    pub sku_id: i64,
    pub risk_index: f64,
    /// Threshold in effect when the alert fired.
    pub threshold: f64,
    pub contributing_factors: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Latest known price per product, used by the risk analysis phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatestPrice {
    pub sku_id: i64,
    pub price: f64,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chipset_roundtrip() {
        for chipset in Chipset::ALL {
            assert_eq!(Chipset::parse(chipset.as_str()), Some(chipset));
        }
        assert_eq!(Chipset::parse("RTX 3080"), None);
    }

    #[test]
    fn longest_variants_listed_first() {
        assert_eq!(Chipset::ALL[0], Chipset::Rtx4070TiSuper);
        assert_eq!(Chipset::ALL[3], Chipset::Rtx4070);
    }

    #[test]
    fn identity_label_contains_all_parts() {
        let identity = ProductIdentity {
            brand: "ASUS".into(),
            chipset: Chipset::Rtx4070Super,
            model_name: "Dual".into(),
            vram: "12GB".into(),
            is_oc: true,
        };
        assert_eq!(identity.label(), "ASUS RTX 4070 Super Dual");
    }
}
