//! 다나와 price extractor for the RTX 4070 family.
//!
//! For each chipset in the closed set, searches the graphics-card category,
//! parses the listing items, and harvests up to ~90 days of chart history
//! from each listing's detail page. A bad listing is logged and skipped; the
//! batch never aborts because of a single entry.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use regex::Regex;
use scraper::{Html, Selector};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::constants::{DANAWA_BASE_URL, DANAWA_GPU_CATEGORY_CODE, DANAWA_SOURCE};
use crate::domain::entities::{Chipset, PricePoint, RawPriceRecord};
use crate::domain::errors::{EtlError, EtlResult};
use crate::infrastructure::config::CrawlConfig;
use crate::infrastructure::http_client::HttpClient;
use crate::infrastructure::retry::Retryer;

/// One listing as parsed from the search results page.
#[derive(Debug, Clone, PartialEq)]
struct ListedProduct {
    name: String,
    price: f64,
    url: String,
}

pub struct DanawaCrawler {
    http: Arc<HttpClient>,
    retryer: Retryer,
    fan_out: usize,
    history_days: i64,
    item_selector: Selector,
    name_selector: Selector,
    price_selector: Selector,
    history_point_re: Regex,
}

impl DanawaCrawler {
    pub fn new(http: Arc<HttpClient>, retryer: Retryer, crawl: &CrawlConfig) -> Self {
        Self {
            http,
            retryer,
            fan_out: crawl.fan_out,
            history_days: crawl.history_days,
            item_selector: Selector::parse(".product_list .product_item")
                .expect("static selector"),
            name_selector: Selector::parse(".prod_name a").expect("static selector"),
            price_selector: Selector::parse(".price_sect strong").expect("static selector"),
            // Chart points embedded in the detail page as {"date":"2025.07.01","price":"1,234,000"}.
            history_point_re: Regex::new(
                r#""date"\s*:\s*"(\d{4})[.\-/](\d{1,2})[.\-/](\d{1,2})"\s*,\s*"price"\s*:\s*"?([0-9,]+)"?"#,
            )
            .expect("static regex"),
        }
    }

    /// Lazy, finite sequence of raw records across all chipsets.
    ///
    /// Chipset crawls proceed concurrently up to the configured fan-out; a
    /// chipset-level failure surfaces as a single `Err` item so the caller
    /// can count it without losing the remaining chipsets.
    pub fn record_stream<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> impl Stream<Item = EtlResult<RawPriceRecord>> + 'a {
        stream::iter(Chipset::ALL)
            .map(move |chipset| self.crawl_chipset(chipset, cancel))
            .buffer_unordered(self.fan_out)
            .flat_map(|result| {
                let items: Vec<EtlResult<RawPriceRecord>> = match result {
                    Ok(records) => records.into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                };
                stream::iter(items)
            })
    }

    /// Crawl one chipset: search listing, filter matches, attach history.
    pub async fn crawl_chipset(
        &self,
        chipset: Chipset,
        cancel: &CancellationToken,
    ) -> EtlResult<Vec<RawPriceRecord>> {
        info!("Starting 다나와 crawl for chipset: {chipset}");

        let url = self.search_url(chipset)?;
        let html = self
            .retryer
            .run("다나와 listing fetch", cancel, || {
                self.http.get_text(&url, cancel)
            })
            .await?;

        let listed = self.parse_listing(&html, chipset)?;
        if listed.is_empty() {
            warn!("No products found for chipset: {chipset}");
            return Ok(Vec::new());
        }
        info!("Found {} listings for {chipset}", listed.len());

        let now = Utc::now();
        let mut records = Vec::with_capacity(listed.len());
        for product in listed {
            if cancel.is_cancelled() {
                return Err(EtlError::Cancelled);
            }
            let history = match self.fetch_history(&product.url, cancel).await {
                Ok(points) => points,
                Err(EtlError::Cancelled) => return Err(EtlError::Cancelled),
                Err(e) => {
                    warn!("Price history unavailable for '{}': {e}", product.name);
                    Vec::new()
                }
            };
            records.push(RawPriceRecord {
                raw_product_name: product.name,
                price: product.price,
                source: DANAWA_SOURCE.to_string(),
                source_url: product.url,
                recorded_at: now,
                history,
            });
        }

        info!("Extracted {} price records for {chipset}", records.len());
        Ok(records)
    }

    fn search_url(&self, chipset: Chipset) -> EtlResult<String> {
        let mut url = url::Url::parse(DANAWA_BASE_URL)
            .map_err(|e| EtlError::validation(format!("bad base url: {e}")))?;
        // The site expects the tight "RTX4070 …" spelling in search terms.
        let search_term = chipset.as_str().replace("RTX ", "RTX");
        url.query_pairs_mut()
            .append_pair("cate", DANAWA_GPU_CATEGORY_CODE)
            .append_pair("limit", "40")
            .append_pair("sort", "saveDESC")
            .append_pair("search", &search_term);
        Ok(url.into())
    }

    /// Parse the search results page into listed products for `chipset`.
    ///
    /// Items that fail to parse are logged and skipped. A page with no item
    /// containers at all is a parse failure for the whole chipset.
    fn parse_listing(&self, html: &str, chipset: Chipset) -> EtlResult<Vec<ListedProduct>> {
        let document = Html::parse_document(html);
        let items: Vec<_> = document.select(&self.item_selector).collect();

        if items.is_empty() {
            return Err(EtlError::parse(
                "다나와 listing",
                format!("no product items found for {chipset}"),
            ));
        }

        let mut products = Vec::new();
        for (index, item) in items.iter().enumerate() {
            match self.parse_item(item) {
                Some(product) => {
                    if Self::matches_chipset(&product.name, chipset) {
                        products.push(product);
                    }
                }
                None => {
                    debug!("Skipping unparsable listing item at index {index}");
                }
            }
        }
        Ok(products)
    }

    fn parse_item(&self, item: &scraper::ElementRef<'_>) -> Option<ListedProduct> {
        let name_elem = item.select(&self.name_selector).next()?;
        let name = name_elem.text().collect::<String>().trim().to_string();
        if name.is_empty() {
            return None;
        }

        let href = name_elem.value().attr("href").unwrap_or_default();
        let url = if href.is_empty() || href.starts_with("http") {
            href.to_string()
        } else {
            format!("http://prod.danawa.com{href}")
        };

        let price_text = item
            .select(&self.price_selector)
            .next()?
            .text()
            .collect::<String>();
        let price = Self::parse_price_text(&price_text)?;

        Some(ListedProduct { name, price, url })
    }

    /// Strip thousands separators and the 원 suffix.
    fn parse_price_text(raw: &str) -> Option<f64> {
        let cleaned = raw.trim().replace(',', "").replace('원', "");
        match cleaned.trim().parse::<f64>() {
            Ok(price) if price > 0.0 => Some(price),
            _ => {
                warn!("Failed to parse price text: {raw:?}");
                None
            }
        }
    }

    /// Whitespace-insensitive chipset match, rejecting "Ti Super" listings
    /// when crawling plain "Ti".
    fn matches_chipset(product_name: &str, chipset: Chipset) -> bool {
        let product = product_name.to_uppercase().replace(' ', "");
        let wanted = chipset.as_str().to_uppercase().replace(' ', "");

        if !product.contains(&wanted) {
            return false;
        }
        if chipset == Chipset::Rtx4070Ti && product.contains("TISUPER") {
            return false;
        }
        if chipset == Chipset::Rtx4070 && (product.contains("4070TI") || product.contains("4070SUPER"))
        {
            return false;
        }
        if chipset == Chipset::Rtx4070Super && product.contains("TISUPER") {
            return false;
        }
        true
    }

    /// Fetch the detail page and extract chart points within the history
    /// window, oldest first.
    async fn fetch_history(
        &self,
        detail_url: &str,
        cancel: &CancellationToken,
    ) -> EtlResult<Vec<PricePoint>> {
        if detail_url.is_empty() {
            return Ok(Vec::new());
        }
        let html = self
            .retryer
            .run("다나와 detail fetch", cancel, || {
                self.http.get_text(detail_url, cancel)
            })
            .await?;
        Ok(self.parse_history(&html, Utc::now()))
    }

    fn parse_history(&self, html: &str, now: chrono::DateTime<Utc>) -> Vec<PricePoint> {
        let cutoff = now - ChronoDuration::days(self.history_days);
        let mut points = Vec::new();

        for caps in self.history_point_re.captures_iter(html) {
            let (Ok(year), Ok(month), Ok(day)) = (
                caps[1].parse::<i32>(),
                caps[2].parse::<u32>(),
                caps[3].parse::<u32>(),
            ) else {
                continue;
            };
            let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
                continue;
            };
            let Ok(price) = caps[4].replace(',', "").parse::<f64>() else {
                continue;
            };
            let recorded_at = Utc
                .from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight is valid"));
            if recorded_at >= cutoff && recorded_at <= now && price > 0.0 {
                points.push(PricePoint { recorded_at, price });
            }
        }

        points.sort_by_key(|p| p.recorded_at);
        points.dedup_by_key(|p| p.recorded_at);
        points
    }
}

impl crate::extractors::sources::PriceSource for DanawaCrawler {
    fn stream_records<'a>(
        &'a self,
        cancel: &'a CancellationToken,
    ) -> BoxStream<'a, EtlResult<RawPriceRecord>> {
        self.record_stream(cancel).boxed()
    }
}
