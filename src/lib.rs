//! GPU market-intelligence ETL pipeline.
//!
//! A periodically executed three-stage engine: scrape GPU prices from 다나와,
//! collect keyword-filtered community signals from Reddit RSS feeds,
//! normalize product names into a structured identity, compute week-over-week
//! price change, weighted sentiment and a composite inventory-risk index, and
//! persist everything idempotently to a relational store.
//!
//! Modern Rust module organization (Rust 2024+ style):
//! - Each module is defined in its own .rs file or directory
//! - No mod.rs files - clean, modern structure

pub mod domain {
    //! Core records, closed sets, error taxonomy and the store boundary.
    pub mod constants;
    pub mod entities;
    pub mod errors;
    pub mod repositories;

    pub use entities::*;
    pub use errors::{EtlError, EtlResult, NormalizationError};
}

pub mod infrastructure {
    //! Ambient stack: configuration, logging, HTTP, retry and the store impl.
    pub mod config;
    pub mod http_client;
    pub mod logging;
    pub mod pg_store;
    pub mod retry;

    pub use config::AppConfig;
    pub use http_client::{HttpClient, HttpClientConfig};
    pub use logging::init_logging;
    pub use pg_store::PgStore;
    pub use retry::Retryer;
}

pub mod extractors {
    //! Upstream sources: 다나와 price listings and Reddit RSS feeds.
    pub mod danawa;
    pub mod reddit;
    pub mod sources;

    pub use danawa::DanawaCrawler;
    pub use reddit::RedditCollector;
    pub use sources::{PriceSource, SignalSource};
}

pub mod transformers {
    //! Pure and store-backed analysis stages.
    pub mod normalizer;
    pub mod price_analyzer;
    pub mod risk_calculator;
    pub mod sentiment_analyzer;

    pub use normalizer::ProductNormalizer;
    pub use price_analyzer::PriceAnalyzer;
    pub use risk_calculator::RiskCalculator;
    pub use sentiment_analyzer::SentimentAnalyzer;
}

pub mod pipeline;
pub mod scheduler;

pub mod test_support;
