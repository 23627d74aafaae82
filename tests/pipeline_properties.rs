//! End-to-end pipeline and scheduler behaviour against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use gpu_market_etl::domain::entities::{MarketSignal, PricePoint, RawPriceRecord};
use gpu_market_etl::domain::errors::EtlResult;
use gpu_market_etl::extractors::sources::{PriceSource, SignalSource};
use gpu_market_etl::infrastructure::config::AppConfig;
use gpu_market_etl::pipeline::{EtlPipeline, RunOutcome};
use gpu_market_etl::scheduler::{JobId, JobScheduler};
use gpu_market_etl::test_support::MemoryStore;

/// Replays a fixed batch, optionally pausing per record.
struct FixturePriceSource {
    records: Vec<RawPriceRecord>,
    delay: Option<Duration>,
}

impl FixturePriceSource {
    fn new(records: Vec<RawPriceRecord>) -> Self {
        Self {
            records,
            delay: None,
        }
    }

    fn slow(records: Vec<RawPriceRecord>, delay: Duration) -> Self {
        Self {
            records,
            delay: Some(delay),
        }
    }
}

impl PriceSource for FixturePriceSource {
    fn stream_records<'a>(
        &'a self,
        _cancel: &'a CancellationToken,
    ) -> BoxStream<'a, EtlResult<RawPriceRecord>> {
        let delay = self.delay;
        futures::stream::iter(self.records.clone())
            .then(move |record| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Ok(record)
            })
            .boxed()
    }
}

struct FixtureSignalSource {
    signals: Vec<MarketSignal>,
    delay: Option<Duration>,
}

impl FixtureSignalSource {
    fn new(signals: Vec<MarketSignal>) -> Self {
        Self {
            signals,
            delay: None,
        }
    }

    fn slow(signals: Vec<MarketSignal>, delay: Duration) -> Self {
        Self {
            signals,
            delay: Some(delay),
        }
    }
}

#[async_trait]
impl SignalSource for FixtureSignalSource {
    async fn collect(
        &self,
        _cancel: &CancellationToken,
    ) -> EtlResult<(Vec<MarketSignal>, Vec<String>)> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok((self.signals.clone(), Vec::new()))
    }
}

fn price_record(name: &str, price: f64, url: &str) -> RawPriceRecord {
    RawPriceRecord {
        raw_product_name: name.to_string(),
        price,
        source: "다나와".to_string(),
        source_url: url.to_string(),
        // Within the last day so the risk phase picks it up as current.
        recorded_at: Utc::now() - ChronoDuration::hours(1),
        history: Vec::new(),
    }
}

fn signal(keyword: &str, url: &str) -> MarketSignal {
    MarketSignal {
        keyword: keyword.to_string(),
        post_title: format!("post about {keyword}"),
        post_url: url.to_string(),
        subreddit: "nvidia".to_string(),
        date: Utc::now().date_naive(),
        sentiment_score: None,
        mention_count: 1,
    }
}

fn pipeline_with(
    store: Arc<MemoryStore>,
    prices: FixturePriceSource,
    signals: FixtureSignalSource,
) -> Arc<EtlPipeline> {
    let config = AppConfig::default();
    Arc::new(EtlPipeline::with_sources(
        store,
        &config,
        Arc::new(prices),
        Arc::new(signals),
    ))
}

#[tokio::test]
async fn price_run_loads_products_and_prices() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline_with(
        store.clone(),
        FixturePriceSource::new(vec![
            price_record("ASUS Dual 지포스 RTX 4070 SUPER OC 12GB", 899_000.0, "https://d/1"),
            price_record("MSI RTX 4070 Ti 게이밍 X 트리오 12GB", 1_099_000.0, "https://d/2"),
        ]),
        FixtureSignalSource::new(Vec::new()),
    );

    let outcome = pipeline.run_price_only(&CancellationToken::new()).await;
    let stats = outcome.stats().expect("run completed");

    assert!(stats.success);
    assert_eq!(stats.prices_extracted, 2);
    assert_eq!(stats.products_normalized, 2);
    assert_eq!(stats.prices_loaded, 2);
    assert!(stats.errors.is_empty());
    assert_eq!(store.product_count().await, 2);
    assert_eq!(store.price_count().await, 2);
}

#[tokio::test]
async fn unnormalizable_records_are_counted_not_fatal() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline_with(
        store.clone(),
        FixturePriceSource::new(vec![
            price_record("ASUS RTX 3080 10GB", 700_000.0, "https://d/old"),
            price_record("ZOTAC RTX 4070 Twin Edge 12GB", 780_000.0, "https://d/3"),
        ]),
        FixtureSignalSource::new(Vec::new()),
    );

    let outcome = pipeline.run_price_only(&CancellationToken::new()).await;
    let stats = outcome.stats().expect("run completed");

    assert!(stats.success);
    assert_eq!(stats.prices_extracted, 2);
    assert_eq!(stats.products_normalized, 1);
    assert_eq!(stats.errors.len(), 1);
    assert!(stats.errors[0].contains("chipset-not-4070-series"));
    assert_eq!(store.product_count().await, 1);
}

#[tokio::test]
async fn reingesting_the_same_batch_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let records = vec![
        price_record("ASUS Dual 지포스 RTX 4070 SUPER OC 12GB", 899_000.0, "https://d/1"),
        price_record("MSI RTX 4070 Ti 게이밍 X 트리오 12GB", 1_099_000.0, "https://d/2"),
    ];
    let signals = vec![signal("New Release", "https://r/1"), signal("Leak", "https://r/1")];

    for _ in 0..2 {
        let pipeline = pipeline_with(
            store.clone(),
            FixturePriceSource::new(records.clone()),
            FixtureSignalSource::new(signals.clone()),
        );
        let outcome = pipeline.run_price_only(&CancellationToken::new()).await;
        assert!(outcome.stats().expect("completed").success);
        let outcome = pipeline.run_signals_only(&CancellationToken::new()).await;
        assert!(outcome.stats().expect("completed").success);
    }

    // Products and prices converge to identical state.
    assert_eq!(store.product_count().await, 2);
    assert_eq!(store.price_count().await, 2);
    // Signals keep their row count but count the reprocessing.
    assert_eq!(store.signal_count().await, 2);
    let today = Utc::now().date_naive();
    assert_eq!(
        store.mention_count("New Release", today, "https://r/1").await,
        Some(2)
    );
    assert_eq!(store.mention_count("Leak", today, "https://r/1").await, Some(2));
}

#[tokio::test]
async fn first_ingest_sets_mention_count_to_one() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline_with(
        store.clone(),
        FixturePriceSource::new(Vec::new()),
        FixtureSignalSource::new(vec![signal("Price Drop", "https://r/9")]),
    );

    let outcome = pipeline.run_signals_only(&CancellationToken::new()).await;
    let stats = outcome.stats().expect("completed");
    assert!(stats.success);
    assert_eq!(stats.signals_loaded, 1);
    assert_eq!(
        store
            .mention_count("Price Drop", Utc::now().date_naive(), "https://r/9")
            .await,
        Some(1)
    );
}

#[tokio::test]
async fn full_run_emits_alert_when_risk_exceeds_threshold() {
    let store = Arc::new(MemoryStore::new());
    // Week-ago baseline 900,000 → delta 100,000 with the current price below.
    store
        .seed_prices(
            1,
            &[PricePoint {
                recorded_at: Utc::now() - ChronoDuration::days(7),
                price: 900_000.0,
            }],
        )
        .await;

    let records = vec![price_record(
        "ASUS Dual 지포스 RTX 4070 SUPER OC 12GB",
        1_000_000.0,
        "https://d/1",
    )];
    let signals = vec![signal("New Release", "https://r/1")];

    let pipeline = pipeline_with(
        store.clone(),
        FixturePriceSource::new(records.clone()),
        FixtureSignalSource::new(signals.clone()),
    );
    let outcome = pipeline.run_full(&CancellationToken::new()).await;
    let stats = outcome.stats().expect("completed");

    assert!(stats.success);
    assert_eq!(stats.alerts_generated, 1);
    let alerts = store.alerts().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].threshold, 100.0);
    let factors = &alerts[0].contributing_factors;
    assert!(factors.get("price_delta").is_some());
    assert!(factors.get("new_release_mentions").is_some());
    assert!(factors.get("sentiment_score").is_some());

    // Alerts are append-only: an unchanged re-run appends the same number again.
    let pipeline = pipeline_with(
        store.clone(),
        FixturePriceSource::new(records),
        FixtureSignalSource::new(signals),
    );
    let outcome = pipeline.run_full(&CancellationToken::new()).await;
    assert!(outcome.stats().expect("completed").success);
    assert_eq!(store.alert_count().await, 2);
}

#[tokio::test]
async fn full_run_without_history_emits_no_alert() {
    let store = Arc::new(MemoryStore::new());
    let records = vec![price_record(
        "ASUS Dual 지포스 RTX 4070 SUPER OC 12GB",
        1_000_000.0,
        "https://d/1",
    )];
    let pipeline = pipeline_with(
        store.clone(),
        FixturePriceSource::new(records),
        FixtureSignalSource::new(vec![signal("New Release", "https://r/1")]),
    );

    let outcome = pipeline.run_full(&CancellationToken::new()).await;
    let stats = outcome.stats().expect("completed");

    // No 7-day baseline: price_change_pct is null and the product is skipped.
    assert!(stats.success);
    assert_eq!(stats.alerts_generated, 0);
    assert_eq!(store.alert_count().await, 0);
    let rows = store.price_rows(1).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].price_change_pct, None);
}

#[tokio::test]
async fn price_change_is_stored_against_week_old_average() {
    let store = Arc::new(MemoryStore::new());
    store
        .seed_prices(
            1,
            &[PricePoint {
                recorded_at: Utc::now() - ChronoDuration::days(7),
                price: 1_000_000.0,
            }],
        )
        .await;

    let pipeline = pipeline_with(
        store.clone(),
        FixturePriceSource::new(vec![price_record(
            "ASUS Dual 지포스 RTX 4070 SUPER OC 12GB",
            1_100_000.0,
            "https://d/1",
        )]),
        FixtureSignalSource::new(Vec::new()),
    );
    let outcome = pipeline.run_price_only(&CancellationToken::new()).await;
    assert!(outcome.stats().expect("completed").success);

    let rows = store.price_rows(1).await;
    let current = rows
        .iter()
        .find(|r| r.price == 1_100_000.0)
        .expect("current observation stored");
    assert_eq!(current.price_change_pct, Some(10.00));
}

#[tokio::test]
async fn store_outage_fails_the_run() {
    let store = Arc::new(MemoryStore::new());
    store.set_unavailable(true);
    let pipeline = pipeline_with(
        store.clone(),
        FixturePriceSource::new(vec![price_record(
            "ASUS Dual 지포스 RTX 4070 SUPER OC 12GB",
            899_000.0,
            "https://d/1",
        )]),
        FixtureSignalSource::new(Vec::new()),
    );

    let outcome = pipeline.run_price_only(&CancellationToken::new()).await;
    let stats = outcome.stats().expect("completed");
    assert!(!stats.success);
    assert!(stats.fatal_error.as_deref().unwrap().contains("store unavailable"));
}

#[tokio::test]
async fn concurrent_same_mode_invocation_is_skipped() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline_with(
        store,
        FixturePriceSource::slow(
            vec![price_record(
                "ASUS Dual 지포스 RTX 4070 SUPER OC 12GB",
                899_000.0,
                "https://d/1",
            )],
            Duration::from_millis(300),
        ),
        FixtureSignalSource::new(Vec::new()),
    );

    let first = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.run_price_only(&CancellationToken::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = pipeline.run_price_only(&CancellationToken::new()).await;

    assert!(matches!(second, RunOutcome::Skipped { .. }));
    let first = first.await.expect("task joined");
    assert!(first.stats().expect("completed").success);
}

#[tokio::test]
async fn different_modes_may_run_concurrently() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline_with(
        store,
        FixturePriceSource::slow(
            vec![price_record(
                "ASUS Dual 지포스 RTX 4070 SUPER OC 12GB",
                899_000.0,
                "https://d/1",
            )],
            Duration::from_millis(200),
        ),
        FixtureSignalSource::new(vec![signal("Leak", "https://r/2")]),
    );

    let price_run = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.run_price_only(&CancellationToken::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let signal_run = pipeline.run_signals_only(&CancellationToken::new()).await;

    assert!(signal_run.stats().expect("completed").success);
    assert!(price_run.await.expect("joined").stats().expect("completed").success);
}

#[tokio::test]
async fn cancellation_aborts_the_run() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline_with(
        store,
        FixturePriceSource::slow(
            vec![
                price_record("ASUS Dual 지포스 RTX 4070 SUPER OC 12GB", 899_000.0, "https://d/1"),
                price_record("MSI RTX 4070 Ti 게이밍 X 트리오 12GB", 1_099_000.0, "https://d/2"),
            ],
            Duration::from_millis(100),
        ),
        FixtureSignalSource::new(Vec::new()),
    );

    let cancel = CancellationToken::new();
    let run = {
        let pipeline = pipeline.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { pipeline.run_price_only(&cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let outcome = run.await.expect("joined");
    let stats = outcome.stats().expect("completed");
    assert!(!stats.success);
    assert!(stats.fatal_error.as_deref().unwrap().contains("cancelled"));
}

// ---------------------------------------------------------------------------
// Scheduler behaviour
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scheduler_drops_overlapping_firing_of_same_job() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline_with(
        store,
        FixturePriceSource::new(Vec::new()),
        FixtureSignalSource::slow(
            vec![signal("Leak", "https://r/2")],
            Duration::from_millis(300),
        ),
    );
    let scheduler = Arc::new(JobScheduler::new(pipeline, AppConfig::default().schedule));

    let first = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.trigger(JobId::RedditCollection).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = scheduler.trigger(JobId::RedditCollection).await;

    assert!(!second, "colliding firing must be dropped");
    assert!(first.await.expect("joined"));
    // Only the firing that ran is recorded.
    assert_eq!(scheduler.recent_history(10).len(), 1);
}

#[tokio::test]
async fn failing_job_does_not_prevent_the_other_job() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline_with(
        store.clone(),
        FixturePriceSource::new(vec![price_record(
            "ASUS Dual 지포스 RTX 4070 SUPER OC 12GB",
            899_000.0,
            "https://d/1",
        )]),
        FixtureSignalSource::new(vec![signal("Leak", "https://r/2")]),
    );
    let scheduler = Arc::new(JobScheduler::new(pipeline, AppConfig::default().schedule));

    // Job A fails against an unavailable store.
    store.set_unavailable(true);
    assert!(scheduler.trigger(JobId::PriceCrawl).await);

    // The scheduler is unharmed: job B fires and succeeds once the store is back.
    store.set_unavailable(false);
    assert!(scheduler.trigger(JobId::RedditCollection).await);

    let history = scheduler.recent_history(10);
    assert_eq!(history.len(), 2);
    let price = history.iter().find(|o| o.job == JobId::PriceCrawl).unwrap();
    let reddit = history
        .iter()
        .find(|o| o.job == JobId::RedditCollection)
        .unwrap();
    assert!(!price.success);
    assert!(price.error.is_some());
    assert!(reddit.success);
}

#[tokio::test]
async fn scheduler_history_is_bounded() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline_with(
        store,
        FixturePriceSource::new(Vec::new()),
        FixtureSignalSource::new(Vec::new()),
    );
    let mut schedule = AppConfig::default().schedule;
    schedule.history_limit = 2;
    let scheduler = Arc::new(JobScheduler::new(pipeline, schedule));

    for _ in 0..4 {
        assert!(scheduler.trigger(JobId::RedditCollection).await);
    }
    assert_eq!(scheduler.recent_history(10).len(), 2);
}

#[tokio::test]
async fn scheduler_stop_waits_for_in_flight_job() {
    let store = Arc::new(MemoryStore::new());
    let pipeline = pipeline_with(
        store.clone(),
        FixturePriceSource::new(Vec::new()),
        FixtureSignalSource::slow(
            vec![signal("Leak", "https://r/2")],
            Duration::from_millis(200),
        ),
    );
    let scheduler = Arc::new(JobScheduler::new(pipeline, AppConfig::default().schedule));
    scheduler.clone().start();
    assert!(scheduler.is_running());

    let job = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.trigger(JobId::RedditCollection).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    scheduler.stop().await;

    assert!(job.await.expect("joined"));
    assert!(!scheduler.is_running());
    // The in-flight job settled within the grace period and was persisted.
    assert_eq!(store.signal_count().await, 1);
}
