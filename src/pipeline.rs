//! End-to-end pipeline orchestration.
//!
//! One run walks a linear phase machine: Init → Extract → Transform → Load →
//! Analyze → Done. Record-level failures are counted and swallowed; only an
//! unrecoverable store outage (or cancellation) fails the run. Risk analysis
//! happens strictly after price loading so it observes every price just
//! written. A second invocation of the same run mode while one is in flight
//! is skipped with a warning, never queued.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use chrono::{Duration as ChronoDuration, Utc};
use futures::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::entities::{PriceObservation, ProductIdentity, RawPriceRecord};
use crate::domain::errors::{EtlError, EtlResult};
use crate::domain::repositories::Store;
use crate::extractors::danawa::DanawaCrawler;
use crate::extractors::reddit::RedditCollector;
use crate::extractors::sources::{PriceSource, SignalSource};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::http_client::{HttpClient, HttpClientConfig};
use crate::infrastructure::retry::Retryer;
use crate::transformers::normalizer::ProductNormalizer;
use crate::transformers::price_analyzer::PriceAnalyzer;
use crate::transformers::risk_calculator::{new_release_mentions, RiskCalculator};
use crate::transformers::sentiment_analyzer::{SentimentAnalyzer, SentimentWeights};

/// Which slice of the pipeline a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RunMode {
    Full,
    PriceOnly,
    SignalsOnly,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunMode::Full => "full",
            RunMode::PriceOnly => "price-only",
            RunMode::SignalsOnly => "signals-only",
        };
        f.write_str(name)
    }
}

/// Linear phase machine for one run; no reentry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPhase {
    Init,
    Extract,
    Transform,
    Load,
    Analyze,
    Done,
}

impl RunPhase {
    fn name(&self) -> &'static str {
        match self {
            RunPhase::Init => "INIT",
            RunPhase::Extract => "EXTRACT",
            RunPhase::Transform => "TRANSFORM",
            RunPhase::Load => "LOAD",
            RunPhase::Analyze => "ANALYZE",
            RunPhase::Done => "DONE",
        }
    }
}

/// Counters and failure detail returned to the caller for logging.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub run_id: Uuid,
    pub mode: RunMode,
    pub prices_extracted: usize,
    pub signals_extracted: usize,
    pub products_normalized: usize,
    pub prices_loaded: usize,
    pub signals_loaded: usize,
    pub alerts_generated: usize,
    pub errors: Vec<String>,
    pub duration_seconds: f64,
    pub success: bool,
    pub fatal_error: Option<String>,
}

impl PipelineStats {
    fn new(mode: RunMode) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            mode,
            prices_extracted: 0,
            signals_extracted: 0,
            products_normalized: 0,
            prices_loaded: 0,
            signals_loaded: 0,
            alerts_generated: 0,
            errors: Vec::new(),
            duration_seconds: 0.0,
            success: false,
            fatal_error: None,
        }
    }

    fn record_error(&mut self, message: String) {
        warn!("{message}");
        self.errors.push(message);
    }
}

/// Result of asking the pipeline to run.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(Box<PipelineStats>),
    /// The same run mode was already in flight; this invocation was dropped.
    Skipped { mode: RunMode },
}

impl RunOutcome {
    pub fn stats(&self) -> Option<&PipelineStats> {
        match self {
            RunOutcome::Completed(stats) => Some(stats),
            RunOutcome::Skipped { .. } => None,
        }
    }
}

struct InFlightGuard {
    set: Arc<StdMutex<HashSet<RunMode>>>,
    mode: RunMode,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.mode);
        }
    }
}

pub struct EtlPipeline {
    store: Arc<dyn Store>,
    price_source: Arc<dyn PriceSource>,
    signal_source: Arc<dyn SignalSource>,
    normalizer: ProductNormalizer,
    price_analyzer: PriceAnalyzer,
    sentiment_analyzer: SentimentAnalyzer,
    risk_calculator: RiskCalculator,
    sentiment_window_days: i64,
    in_flight: Arc<StdMutex<HashSet<RunMode>>>,
}

impl EtlPipeline {
    /// Wire the production extractors against the given store.
    pub fn new(store: Arc<dyn Store>, config: &AppConfig) -> EtlResult<Self> {
        let http = Arc::new(HttpClient::new(HttpClientConfig::from(&config.crawl))?);
        let retryer = Retryer::from_config(&config.retry);
        let price_source = Arc::new(DanawaCrawler::new(
            http.clone(),
            retryer.clone(),
            &config.crawl,
        ));
        let signal_source = Arc::new(RedditCollector::new(http, retryer, &config.crawl));
        Ok(Self::with_sources(store, config, price_source, signal_source))
    }

    /// Wire the pipeline against explicit sources.
    pub fn with_sources(
        store: Arc<dyn Store>,
        config: &AppConfig,
        price_source: Arc<dyn PriceSource>,
        signal_source: Arc<dyn SignalSource>,
    ) -> Self {
        let weights = SentimentWeights::from(&config.risk);
        Self {
            price_source,
            signal_source,
            normalizer: ProductNormalizer::new(),
            price_analyzer: PriceAnalyzer::new(store.clone()),
            sentiment_analyzer: SentimentAnalyzer::new(store.clone(), weights),
            risk_calculator: RiskCalculator::new(store.clone(), config.risk.risk_threshold),
            sentiment_window_days: config.risk.sentiment_window_days,
            store,
            in_flight: Arc::new(StdMutex::new(HashSet::new())),
        }
    }

    /// Extract prices → normalize → upsert products → compute price change →
    /// insert prices.
    pub async fn run_price_only(&self, cancel: &CancellationToken) -> RunOutcome {
        self.run(RunMode::PriceOnly, cancel).await
    }

    /// Extract feeds → insert signals.
    pub async fn run_signals_only(&self, cancel: &CancellationToken) -> RunOutcome {
        self.run(RunMode::SignalsOnly, cancel).await
    }

    /// Both extractions plus sentiment, risk and conditional alerts.
    pub async fn run_full(&self, cancel: &CancellationToken) -> RunOutcome {
        self.run(RunMode::Full, cancel).await
    }

    async fn run(&self, mode: RunMode, cancel: &CancellationToken) -> RunOutcome {
        let Some(_guard) = self.try_begin(mode) else {
            warn!("Pipeline run ({mode}) already in flight, skipping this invocation");
            return RunOutcome::Skipped { mode };
        };

        let mut stats = PipelineStats::new(mode);
        let started = Instant::now();
        self.enter_phase(RunPhase::Init, &stats);
        info!("Starting pipeline run {} ({mode})", stats.run_id);

        match self.execute(mode, cancel, &mut stats).await {
            Ok(()) => {
                stats.success = true;
            }
            Err(e) => {
                error!("Pipeline run {} failed: {e}", stats.run_id);
                stats.success = false;
                stats.fatal_error = Some(e.to_string());
            }
        }

        stats.duration_seconds = started.elapsed().as_secs_f64();
        self.enter_phase(RunPhase::Done, &stats);
        self.log_summary(&stats);
        RunOutcome::Completed(Box::new(stats))
    }

    fn try_begin(&self, mode: RunMode) -> Option<InFlightGuard> {
        let mut set = self.in_flight.lock().ok()?;
        if !set.insert(mode) {
            return None;
        }
        Some(InFlightGuard {
            set: self.in_flight.clone(),
            mode,
        })
    }

    async fn execute(
        &self,
        mode: RunMode,
        cancel: &CancellationToken,
        stats: &mut PipelineStats,
    ) -> EtlResult<()> {
        match mode {
            RunMode::PriceOnly => self.run_price_phases(cancel, stats).await,
            RunMode::SignalsOnly => self.run_signal_phases(cancel, stats).await,
            RunMode::Full => {
                self.run_price_phases(cancel, stats).await?;
                self.run_signal_phases(cancel, stats).await?;
                self.run_analysis_phase(cancel, stats).await
            }
        }
    }

    async fn run_price_phases(
        &self,
        cancel: &CancellationToken,
        stats: &mut PipelineStats,
    ) -> EtlResult<()> {
        self.enter_phase(RunPhase::Extract, stats);
        let mut extracted = Vec::new();
        {
            let mut stream = self.price_source.stream_records(cancel);
            while let Some(item) = stream.next().await {
                if cancel.is_cancelled() {
                    return Err(EtlError::Cancelled);
                }
                match item {
                    Ok(record) => {
                        stats.prices_extracted += 1;
                        extracted.push(record);
                    }
                    Err(EtlError::Cancelled) => return Err(EtlError::Cancelled),
                    Err(e) => stats.record_error(format!("price extraction: {e}")),
                }
            }
        }
        info!("Price extraction complete: {} records", stats.prices_extracted);

        self.enter_phase(RunPhase::Transform, stats);
        let mut batch: Vec<(RawPriceRecord, ProductIdentity)> = Vec::with_capacity(extracted.len());
        for record in extracted {
            match self.normalizer.normalize(&record.raw_product_name) {
                Ok(identity) => {
                    stats.products_normalized += 1;
                    batch.push((record, identity));
                }
                Err(e) => {
                    stats.record_error(format!(
                        "normalize '{}': {e}",
                        record.raw_product_name
                    ));
                }
            }
        }
        info!(
            "Normalization complete: {} products",
            stats.products_normalized
        );

        self.enter_phase(RunPhase::Load, stats);
        for (record, identity) in &batch {
            if cancel.is_cancelled() {
                return Err(EtlError::Cancelled);
            }
            match self.load_price_record(record, identity).await {
                Ok(()) => stats.prices_loaded += 1,
                Err(e @ (EtlError::StoreUnavailable { .. } | EtlError::Cancelled)) => {
                    return Err(e);
                }
                Err(e) => stats.record_error(format!("load '{}': {e}", identity.label())),
            }
        }
        info!("Price loading complete: {} records", stats.prices_loaded);
        Ok(())
    }

    /// Upsert the product, attach the week-over-week change, write the
    /// current observation and its history points.
    async fn load_price_record(
        &self,
        record: &RawPriceRecord,
        identity: &ProductIdentity,
    ) -> EtlResult<()> {
        let sku_id = self.store.upsert_product(identity).await?;

        let price_change_pct = self
            .price_analyzer
            .price_change_pct(sku_id, record.price, record.recorded_at)
            .await?;

        self.store
            .insert_price(
                sku_id,
                &PriceObservation {
                    price: record.price,
                    source: record.source.clone(),
                    source_url: Some(record.source_url.clone()),
                    recorded_at: record.recorded_at,
                    price_change_pct,
                },
            )
            .await?;

        for point in &record.history {
            self.store
                .insert_price(
                    sku_id,
                    &PriceObservation {
                        price: point.price,
                        source: record.source.clone(),
                        source_url: Some(record.source_url.clone()),
                        recorded_at: point.recorded_at,
                        price_change_pct: None,
                    },
                )
                .await?;
        }
        Ok(())
    }

    async fn run_signal_phases(
        &self,
        cancel: &CancellationToken,
        stats: &mut PipelineStats,
    ) -> EtlResult<()> {
        self.enter_phase(RunPhase::Extract, stats);
        let (signals, feed_errors) = self.signal_source.collect(cancel).await?;
        stats.signals_extracted += signals.len();
        for error in feed_errors {
            stats.record_error(format!("feed extraction: {error}"));
        }
        info!("Signal extraction complete: {} signals", signals.len());

        self.enter_phase(RunPhase::Load, stats);
        for signal in &signals {
            if cancel.is_cancelled() {
                return Err(EtlError::Cancelled);
            }
            match self.store.insert_signal(signal).await {
                Ok(()) => stats.signals_loaded += 1,
                Err(e @ (EtlError::StoreUnavailable { .. } | EtlError::Cancelled)) => {
                    return Err(e);
                }
                Err(e) => {
                    stats.record_error(format!("load signal '{}': {e}", signal.keyword));
                }
            }
        }
        info!("Signal loading complete: {} signals", stats.signals_loaded);
        Ok(())
    }

    /// Sentiment + risk over everything just loaded. Runs strictly after the
    /// load phases so every new price is visible to the window queries.
    async fn run_analysis_phase(
        &self,
        cancel: &CancellationToken,
        stats: &mut PipelineStats,
    ) -> EtlResult<()> {
        self.enter_phase(RunPhase::Analyze, stats);

        let now = Utc::now();
        let snapshot = self
            .sentiment_analyzer
            .score_window(now.date_naive(), self.sentiment_window_days)
            .await?;
        let mentions = new_release_mentions(&snapshot.counts);
        info!(
            "Sentiment score {:.1}, new-release mentions {mentions}",
            snapshot.score
        );

        let latest = self
            .store
            .latest_prices(now - ChronoDuration::days(1))
            .await?;

        for current in latest {
            if cancel.is_cancelled() {
                return Err(EtlError::Cancelled);
            }
            match self
                .risk_calculator
                .assess(current.sku_id, current.price, mentions, now)
                .await
            {
                Ok(Some(assessment)) if assessment.high_risk => {
                    let label = self
                        .store
                        .product_label(current.sku_id)
                        .await
                        .ok()
                        .flatten()
                        .unwrap_or_else(|| format!("sku {}", current.sku_id));
                    warn!(
                        "High-risk product {label}: risk {:.2} > threshold {:.2}",
                        assessment.risk_index,
                        self.risk_calculator.threshold()
                    );
                    let alert = self.risk_calculator.build_alert(
                        current.sku_id,
                        current.price,
                        &assessment,
                        mentions,
                        snapshot.score,
                        now,
                    );
                    match self.risk_calculator.emit_alert(&alert).await {
                        Ok(()) => stats.alerts_generated += 1,
                        Err(e @ (EtlError::StoreUnavailable { .. } | EtlError::Cancelled)) => {
                            return Err(e);
                        }
                        Err(e) => stats.record_error(format!(
                            "alert for sku {}: {e}",
                            current.sku_id
                        )),
                    }
                }
                Ok(_) => {}
                Err(e @ (EtlError::StoreUnavailable { .. } | EtlError::Cancelled)) => {
                    return Err(e);
                }
                Err(e) => {
                    stats.record_error(format!("risk for sku {}: {e}", current.sku_id));
                }
            }
        }
        info!(
            "Risk analysis complete: {} alerts generated",
            stats.alerts_generated
        );
        Ok(())
    }

    fn enter_phase(&self, phase: RunPhase, stats: &PipelineStats) {
        info!("[run {}] phase {}", stats.run_id, phase.name());
    }

    fn log_summary(&self, stats: &PipelineStats) {
        info!(
            "Pipeline run {} ({}) finished: success={}, duration={:.2}s",
            stats.run_id, stats.mode, stats.success, stats.duration_seconds
        );
        info!(
            "  extracted: {} prices, {} signals | normalized: {} | loaded: {} prices, {} signals | alerts: {}",
            stats.prices_extracted,
            stats.signals_extracted,
            stats.products_normalized,
            stats.prices_loaded,
            stats.signals_loaded,
            stats.alerts_generated
        );
        if !stats.errors.is_empty() {
            warn!("  {} record-level errors", stats.errors.len());
            for (i, error) in stats.errors.iter().take(10).enumerate() {
                warn!("    {}. {error}", i + 1);
            }
            if stats.errors.len() > 10 {
                warn!("    … and {} more", stats.errors.len() - 10);
            }
        }
        if let Some(fatal) = &stats.fatal_error {
            error!("  fatal: {fatal}");
        }
    }
}
