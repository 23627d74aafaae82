//! Reddit RSS feed extractor for GPU market signals.
//!
//! Fetches each configured subreddit's feed, scans title + body
//! case-insensitively against the curated keyword set and emits one signal
//! per post×keyword match. A keyword contributes at most one mention per
//! post regardless of how often it appears. HTTP 429 triggers a bounded
//! wait and a single retry; a feed that cannot be parsed skips the whole
//! subreddit with a logged warning.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use scraper::{Html, Selector};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::constants::{REDDIT_RSS_URL, SIGNAL_KEYWORDS};
use crate::domain::entities::MarketSignal;
use crate::domain::errors::{EtlError, EtlResult};
use crate::infrastructure::config::CrawlConfig;
use crate::infrastructure::http_client::HttpClient;
use crate::infrastructure::retry::Retryer;

/// One post as parsed from a feed.
#[derive(Debug, Clone, PartialEq)]
struct FeedEntry {
    title: String,
    url: String,
    body: String,
}

pub struct RedditCollector {
    http: Arc<HttpClient>,
    retryer: Retryer,
    subreddits: Vec<String>,
    keywords: Vec<String>,
    rate_limit_wait: Duration,
    subreddit_delay: Duration,
}

impl RedditCollector {
    pub fn new(http: Arc<HttpClient>, retryer: Retryer, crawl: &CrawlConfig) -> Self {
        Self {
            http,
            retryer,
            subreddits: crawl.subreddits.clone(),
            keywords: SIGNAL_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            rate_limit_wait: Duration::from_secs(crawl.rate_limit_wait_seconds),
            subreddit_delay: Duration::from_secs(crawl.subreddit_delay_seconds),
        }
    }

    /// Collect signals across all configured subreddits.
    ///
    /// Subreddit-level failures are returned alongside the signals so the
    /// caller can count them; the remaining subreddits still run.
    pub async fn collect_all(
        &self,
        cancel: &CancellationToken,
    ) -> EtlResult<(Vec<MarketSignal>, Vec<String>)> {
        info!("Starting Reddit signal collection");

        let mut signals = Vec::new();
        let mut errors = Vec::new();

        for (i, subreddit) in self.subreddits.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(EtlError::Cancelled);
            }

            match self.collect_subreddit(subreddit, cancel).await {
                Ok(found) => {
                    info!("Extracted {} signals from r/{subreddit}", found.len());
                    signals.extend(found);
                }
                Err(EtlError::Cancelled) => return Err(EtlError::Cancelled),
                Err(e) => {
                    warn!("Skipping r/{subreddit}: {e}");
                    errors.push(format!("r/{subreddit}: {e}"));
                }
            }

            // Politeness delay between subreddit fetches.
            if i + 1 < self.subreddits.len() {
                tokio::select! {
                    _ = tokio::time::sleep(self.subreddit_delay) => {}
                    _ = cancel.cancelled() => return Err(EtlError::Cancelled),
                }
            }
        }

        info!("Total signals collected: {}", signals.len());
        Ok((signals, errors))
    }

    async fn collect_subreddit(
        &self,
        subreddit: &str,
        cancel: &CancellationToken,
    ) -> EtlResult<Vec<MarketSignal>> {
        let body = self.fetch_feed(subreddit, cancel).await?;
        let entries = Self::parse_entries(&body, subreddit)?;
        if entries.is_empty() {
            warn!("No entries found in r/{subreddit} feed");
            return Ok(Vec::new());
        }
        debug!("Found {} entries in r/{subreddit}", entries.len());

        let today = Utc::now().date_naive();
        let mut signals = Vec::new();
        for entry in &entries {
            signals.extend(self.signals_from_entry(entry, subreddit, today));
        }
        Ok(signals)
    }

    /// Fetch the feed, honouring the 429 protocol: a bounded wait (the
    /// Retry-After hint capped at the configured maximum) followed by a
    /// single retry. Other transient failures go through the Retryer.
    async fn fetch_feed(&self, subreddit: &str, cancel: &CancellationToken) -> EtlResult<String> {
        let url = REDDIT_RSS_URL.replace("{subreddit}", subreddit);

        match self.http.get_text(&url, cancel).await {
            Ok(body) => Ok(body),
            Err(EtlError::RateLimited {
                retry_after,
                message,
            }) => {
                let wait = retry_after
                    .unwrap_or(self.rate_limit_wait)
                    .min(self.rate_limit_wait);
                warn!("Rate limit hit for r/{subreddit} ({message}), waiting {wait:?} before single retry");
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = cancel.cancelled() => return Err(EtlError::Cancelled),
                }
                self.http.get_text(&url, cancel).await
            }
            Err(e) if e.is_retryable() => {
                self.retryer
                    .run("reddit feed fetch", cancel, || self.http.get_text(&url, cancel))
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Walk feed entries out of the XML. Handles Atom (`entry`) and RSS
    /// (`item`) shapes; a document with neither is a feed-level parse error.
    fn parse_entries(xml: &str, subreddit: &str) -> EtlResult<Vec<FeedEntry>> {
        let document = Html::parse_document(xml);

        let entry_selector = Selector::parse("entry, item").expect("static selector");
        let title_selector = Selector::parse("title").expect("static selector");
        let link_selector = Selector::parse("link").expect("static selector");
        let body_selector = Selector::parse("content, summary, description")
            .expect("static selector");

        let elements: Vec<_> = document.select(&entry_selector).collect();
        if elements.is_empty() {
            let feed_root = Selector::parse("feed, rss, channel").expect("static selector");
            if document.select(&feed_root).next().is_none() {
                return Err(EtlError::parse(
                    "feed",
                    format!("r/{subreddit} response is not a feed document"),
                ));
            }
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for element in elements {
            let title = element
                .select(&title_selector)
                .next()
                .map(|t| t.text().collect::<String>().trim().to_string())
                .unwrap_or_default();

            let url = element
                .select(&link_selector)
                .next()
                .map(|link| {
                    link.value()
                        .attr("href")
                        .map(|h| h.to_string())
                        .unwrap_or_else(|| link.text().collect::<String>().trim().to_string())
                })
                .unwrap_or_default();

            let body = element
                .select(&body_selector)
                .next()
                .map(|b| b.text().collect::<String>())
                .unwrap_or_default();

            if title.is_empty() && url.is_empty() {
                debug!("Skipping feed entry without title or link");
                continue;
            }
            entries.push(FeedEntry { title, url, body });
        }
        Ok(entries)
    }

    /// One signal per matched keyword; each keyword counts at most once per
    /// post even when it appears repeatedly.
    fn signals_from_entry(
        &self,
        entry: &FeedEntry,
        subreddit: &str,
        today: chrono::NaiveDate,
    ) -> Vec<MarketSignal> {
        let haystack = format!("{} {}", entry.title, entry.body).to_lowercase();

        self.keywords
            .iter()
            .filter(|keyword| haystack.contains(&keyword.to_lowercase()))
            .map(|keyword| MarketSignal {
                keyword: keyword.clone(),
                post_title: entry.title.clone(),
                post_url: entry.url.clone(),
                subreddit: subreddit.to_string(),
                date: today,
                sentiment_score: None,
                mention_count: 1,
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl crate::extractors::sources::SignalSource for RedditCollector {
    async fn collect(
        &self,
        cancel: &CancellationToken,
    ) -> EtlResult<(Vec<MarketSignal>, Vec<String>)> {
        self.collect_all(cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::http_client::HttpClientConfig;

    fn collector() -> RedditCollector {
        let http = Arc::new(HttpClient::new(HttpClientConfig::default()).unwrap());
        let retryer = Retryer::new(
            1,
            Duration::from_millis(1),
            Duration::from_millis(1),
        );
        RedditCollector::new(http, retryer, &CrawlConfig::default())
    }

    const ATOM_FIXTURE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
        <feed xmlns="http://www.w3.org/2005/Atom">
          <title>r/nvidia</title>
          <entry>
            <title>RTX 5070 leak suggests imminent new release</title>
            <link href="https://www.reddit.com/r/nvidia/comments/abc123/"/>
            <content type="html">&lt;p&gt;Leak after leak, the new release is close.&lt;/p&gt;</content>
          </entry>
          <entry>
            <title>Undervolting guide</title>
            <link href="https://www.reddit.com/r/nvidia/comments/def456/"/>
            <content type="html">&lt;p&gt;No relevant words here.&lt;/p&gt;</content>
          </entry>
          <entry>
            <title>Huge price drop on 4070 Super</title>
            <link href="https://www.reddit.com/r/nvidia/comments/ghi789/"/>
            <content type="html">&lt;p&gt;Used market is flooded too.&lt;/p&gt;</content>
          </entry>
        </feed>
    "#;

    #[test]
    fn parses_atom_entries() {
        let entries = RedditCollector::parse_entries(ATOM_FIXTURE, "nvidia").unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(
            entries[0].url,
            "https://www.reddit.com/r/nvidia/comments/abc123/"
        );
        assert!(entries[0].body.contains("the new release is close"));
    }

    #[test]
    fn non_feed_document_is_a_parse_error() {
        let result = RedditCollector::parse_entries(
            "<html><body><h1>blocked</h1></body></html>",
            "nvidia",
        );
        assert!(matches!(result, Err(EtlError::Parse { .. })));
    }

    #[test]
    fn keyword_scan_is_case_insensitive_and_once_per_post() {
        let collector = collector();
        let entry = FeedEntry {
            title: "LEAK: new release coming".to_string(),
            url: "https://reddit.com/post/1".to_string(),
            // "leak" appears again in the body; still one mention.
            body: "another leak confirms the NEW RELEASE".to_string(),
        };
        let today = Utc::now().date_naive();
        let signals = collector.signals_from_entry(&entry, "nvidia", today);

        let keywords: Vec<_> = signals.iter().map(|s| s.keyword.as_str()).collect();
        assert_eq!(keywords, vec!["New Release", "Leak"]);
        assert!(signals.iter().all(|s| s.mention_count == 1));
        assert!(signals.iter().all(|s| s.date == today));
    }

    #[test]
    fn unmatched_posts_produce_no_signals() {
        let collector = collector();
        let entry = FeedEntry {
            title: "Driver 551.23 discussion".to_string(),
            url: "https://reddit.com/post/2".to_string(),
            body: "nothing interesting".to_string(),
        };
        let signals = collector.signals_from_entry(&entry, "nvidia", Utc::now().date_naive());
        assert!(signals.is_empty());
    }

    #[test]
    fn full_fixture_yields_expected_signals() {
        let collector = collector();
        let entries = RedditCollector::parse_entries(ATOM_FIXTURE, "nvidia").unwrap();
        let today = Utc::now().date_naive();
        let signals: Vec<_> = entries
            .iter()
            .flat_map(|e| collector.signals_from_entry(e, "nvidia", today))
            .collect();

        // Post 1: New Release + Leak. Post 2: none. Post 3: Price Drop + Used Market.
        assert_eq!(signals.len(), 4);
        assert!(signals.iter().any(|s| s.keyword == "Price Drop"));
        assert!(signals.iter().any(|s| s.keyword == "Used Market"));
    }
}
