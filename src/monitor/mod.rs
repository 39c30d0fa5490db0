pub mod feeds;
pub mod keywords;
pub mod variants;

use crate::http::build_client;
use crate::models::{CatalogSource, Product, ResolvedProduct, Site};
use crate::proxy::ProxyPool;
use crate::rfrl::resolve_first_reject_last;
use feeds::CatalogEntry;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum MonitorError {
    /// The storefront soft-banned this traffic; the task is burned.
    #[error("rate limited by storefront")]
    RateLimited,
    #[error("transport failed on every egress: {0}")]
    Transport(String),
    #[error("feed parse failed: {0}")]
    Feed(String),
    #[error("{0} entries matched and auto-pick is disabled")]
    Ambiguous(usize),
    #[error("configuration: {0}")]
    Config(String),
}

/// One monitor cycle either resolves a purchasable variant or asks to be
/// re-polled after a delay, optionally carrying a one-shot user notice.
#[derive(Debug)]
pub enum MonitorOutcome {
    Resolved(ResolvedProduct),
    NotFoundRetry {
        delay: Duration,
        notice: Option<String>,
    },
}

#[derive(Debug, Clone, Error)]
enum FetchError {
    #[error("rate limited")]
    RateLimited,
    #[error("transport: {0}")]
    Transport(String),
    #[error("HTTP {0}")]
    Status(u16),
}

fn classify_status(status: u16) -> Option<FetchError> {
    match status {
        403 | 429 | 430 => Some(FetchError::RateLimited),
        s if (200..300).contains(&s) => None,
        s => Some(FetchError::Status(s)),
    }
}

fn collapse_errors(errors: Vec<Option<FetchError>>) -> MonitorError {
    if errors
        .iter()
        .any(|e| matches!(e, Some(FetchError::RateLimited)))
    {
        return MonitorError::RateLimited;
    }
    let summary = errors
        .iter()
        .flatten()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    MonitorError::Transport(if summary.is_empty() {
        "no egress available".to_string()
    } else {
        summary
    })
}

/// Polls one site for one product until a concrete variant is found.
pub struct Monitor {
    site: Site,
    product: Product,
    sizes: Vec<String>,
    pool: ProxyPool,
    monitor_delay: Duration,
    option_index: usize,
    empty_streak: u32,
    empty_notice_sent: bool,
}

impl Monitor {
    pub fn new(
        site: Site,
        product: Product,
        sizes: Vec<String>,
        pool: ProxyPool,
        monitor_delay_ms: u64,
    ) -> Result<Self, MonitorError> {
        let option_index = variants::option_index(&site)
            .map_err(|err| MonitorError::Config(err.to_string()))?;
        Ok(Self {
            site,
            product,
            sizes,
            pool,
            monitor_delay: Duration::from_millis(monitor_delay_ms),
            option_index,
            empty_streak: 0,
            empty_notice_sent: false,
        })
    }

    /// Runs one locate cycle. Source priority: direct URL, then known
    /// variant id (cart probe), then full catalog scan.
    pub async fn poll_once(&mut self) -> Result<MonitorOutcome, MonitorError> {
        crate::metrics::inc_poll(&self.site.label);
        if let Some(url) = self.product.url.clone() {
            return self.poll_direct_url(&url).await;
        }
        if let Some(variant_id) = self.product.variant_id {
            return self.poll_cart_probe(variant_id).await;
        }
        self.poll_catalog().await
    }

    async fn poll_direct_url(&self, url: &str) -> Result<MonitorOutcome, MonitorError> {
        let detail_url = format!("{}.json", url.trim_end_matches('/'));
        let body = self.race_get(&detail_url).await?;
        let entry = feeds::parse_product_detail(&body)
            .map_err(|err| MonitorError::Feed(err.to_string()))?;
        self.settle_entry(entry, Some(url.to_string()))
    }

    async fn poll_cart_probe(&self, variant_id: u64) -> Result<MonitorOutcome, MonitorError> {
        let cart_url = format!("{}/cart/add.js", self.site.base_url());
        let attempts = self
            .pool
            .attempts()
            .into_iter()
            .map(|proxy| {
                let cart_url = cart_url.clone();
                async move {
                    let client = build_client(proxy.as_ref(), None);
                    let response = client
                        .post(&cart_url)
                        .form(&[("id", variant_id.to_string()), ("qty", "1".to_string())])
                        .send()
                        .await
                        .map_err(|err| FetchError::Transport(err.to_string()))?;
                    let status = response.status().as_u16();
                    if status == 404 {
                        return Ok(false);
                    }
                    if let Some(err) = classify_status(status) {
                        return Err(err);
                    }
                    let body = response
                        .text()
                        .await
                        .map_err(|err| FetchError::Transport(err.to_string()))?;
                    Ok(!body.contains("Cannot find variant"))
                }
            })
            .collect();
        let live = resolve_first_reject_last(attempts)
            .await
            .map_err(collapse_errors)?;
        if !live {
            debug!(
                target = "talaria.monitor",
                variant_id,
                "cart probe missed, variant not live yet"
            );
            return Ok(MonitorOutcome::NotFoundRetry {
                delay: self.monitor_delay,
                notice: None,
            });
        }
        info!(target = "talaria.monitor", variant_id, "cart probe hit");
        let title = self
            .product
            .query
            .clone()
            .unwrap_or_else(|| format!("variant {variant_id}"));
        Ok(MonitorOutcome::Resolved(ResolvedProduct {
            title,
            handle: String::new(),
            url: self.site.base_url().to_string(),
            variant_id,
            size: self.sizes.first().cloned().unwrap_or_default(),
        }))
    }

    async fn poll_catalog(&mut self) -> Result<MonitorOutcome, MonitorError> {
        let feed_url = match self.site.source {
            CatalogSource::ProductsJson => format!("{}/products.json", self.site.base_url()),
            CatalogSource::Sitemap => {
                format!("{}/sitemap_products_1.xml", self.site.base_url())
            }
            CatalogSource::Atom => format!("{}/collections/all.atom", self.site.base_url()),
        };
        let body = self.race_get(&feed_url).await?;
        let mut entries = match self.site.source {
            CatalogSource::ProductsJson => feeds::parse_products_json(&body),
            CatalogSource::Sitemap => feeds::parse_sitemap(&body),
            CatalogSource::Atom => feeds::parse_atom(&body),
        }
        .map_err(|err| MonitorError::Feed(err.to_string()))?;

        // newly restocked items first when several entries qualify
        entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let matched: Vec<CatalogEntry> = entries
            .into_iter()
            .filter(|entry| {
                keywords::matches_keywords(
                    &entry.title,
                    &entry.handle,
                    &self.product.pos_keywords,
                    &self.product.neg_keywords,
                )
            })
            .collect();

        if matched.len() > 1 && !self.product.pick_first {
            return Err(MonitorError::Ambiguous(matched.len()));
        }
        if matched.len() > 1 {
            debug!(
                target = "talaria.monitor",
                candidates = matched.len(),
                "multiple matches, proceeding with most recently updated"
            );
        }
        let Some(mut chosen) = matched.into_iter().next() else {
            return Ok(self.note_empty_cycle());
        };
        self.empty_streak = 0;
        let product_url = chosen.url.clone().unwrap_or_else(|| {
            format!("{}/products/{}", self.site.base_url(), chosen.handle)
        });
        if chosen.variants.is_empty() {
            let detail_url = format!(
                "{}/products/{}.json",
                self.site.base_url(),
                chosen.handle
            );
            let body = self.race_get(&detail_url).await?;
            chosen = feeds::parse_product_detail(&body)
                .map_err(|err| MonitorError::Feed(err.to_string()))?;
        }
        self.settle_entry(chosen, Some(product_url))
    }

    /// First empty cycle stays quiet; the second consecutive one surfaces
    /// a single "no items" notice and then goes quiet again. Preserved
    /// as-is from production behavior.
    fn note_empty_cycle(&mut self) -> MonitorOutcome {
        self.empty_streak += 1;
        let notice = if self.empty_streak >= 2 && !self.empty_notice_sent {
            self.empty_notice_sent = true;
            warn!(
                target = "talaria.monitor",
                site = %self.site.label,
                "no items available yet"
            );
            Some("no items available yet".to_string())
        } else {
            debug!(
                target = "talaria.monitor",
                site = %self.site.label,
                streak = self.empty_streak,
                "no qualifying entries"
            );
            None
        };
        MonitorOutcome::NotFoundRetry {
            delay: self.monitor_delay,
            notice,
        }
    }

    fn settle_entry(
        &self,
        entry: CatalogEntry,
        url: Option<String>,
    ) -> Result<MonitorOutcome, MonitorError> {
        match variants::pick_variant(&entry.variants, &self.sizes, self.option_index) {
            Some((variant_id, size)) => {
                info!(
                    target = "talaria.monitor",
                    title = %entry.title,
                    variant_id,
                    size = %size,
                    "product resolved"
                );
                Ok(MonitorOutcome::Resolved(ResolvedProduct {
                    url: url.unwrap_or_else(|| {
                        format!("{}/products/{}", self.site.base_url(), entry.handle)
                    }),
                    title: entry.title,
                    handle: entry.handle,
                    variant_id,
                    size,
                }))
            }
            None => Ok(MonitorOutcome::NotFoundRetry {
                delay: self.monitor_delay,
                notice: None,
            }),
        }
    }

    async fn race_get(&self, url: &str) -> Result<String, MonitorError> {
        let attempts = self
            .pool
            .attempts()
            .into_iter()
            .map(|proxy| {
                let url = url.to_string();
                async move {
                    let client = build_client(proxy.as_ref(), None);
                    let response = client
                        .get(&url)
                        .send()
                        .await
                        .map_err(|err| FetchError::Transport(err.to_string()))?;
                    if let Some(err) = classify_status(response.status().as_u16()) {
                        return Err(err);
                    }
                    response
                        .text()
                        .await
                        .map_err(|err| FetchError::Transport(err.to_string()))
                }
            })
            .collect();
        resolve_first_reject_last(attempts)
            .await
            .map_err(collapse_errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor_with(product: Product, sizes: &[&str]) -> Monitor {
        let site = Site {
            url: "https://kith.com".to_string(),
            label: "Kith".to_string(),
            source: CatalogSource::ProductsJson,
            option_index: None,
        };
        Monitor::new(
            site,
            product,
            sizes.iter().map(|s| s.to_string()).collect(),
            ProxyPool::default(),
            500,
        )
        .expect("monitor")
    }

    fn keyword_product(pos: &[&str], neg: &[&str]) -> Product {
        Product {
            pos_keywords: pos.iter().map(|s| s.to_string()).collect(),
            neg_keywords: neg.iter().map(|s| s.to_string()).collect(),
            ..Product::default()
        }
    }

    fn scan(
        monitor: &mut Monitor,
        body: &str,
    ) -> Result<MonitorOutcome, MonitorError> {
        let mut entries = feeds::parse_products_json(body).map_err(|e| {
            MonitorError::Feed(e.to_string())
        })?;
        entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let matched: Vec<CatalogEntry> = entries
            .into_iter()
            .filter(|entry| {
                keywords::matches_keywords(
                    &entry.title,
                    &entry.handle,
                    &monitor.product.pos_keywords,
                    &monitor.product.neg_keywords,
                )
            })
            .collect();
        if matched.is_empty() {
            return Ok(monitor.note_empty_cycle());
        }
        monitor.empty_streak = 0;
        if matched.len() > 1 && !monitor.product.pick_first {
            return Err(MonitorError::Ambiguous(matched.len()));
        }
        let chosen = matched.into_iter().next().expect("non-empty");
        monitor.settle_entry(chosen, None)
    }

    const FEED: &str = r#"{"products":[{"title":"Air Foo Low White",
        "handle":"air-foo-low-white","updated_at":"2020-02-01T00:00:00Z",
        "variants":[{"id":111,"option1":"9","inventory_quantity":3}]}]}"#;

    #[test]
    fn resolves_matching_entry_and_size() {
        let mut monitor = monitor_with(keyword_product(&["FOO", "WHITE"], &["BLACK"]), &["9"]);
        match scan(&mut monitor, FEED).expect("scan") {
            MonitorOutcome::Resolved(resolved) => {
                assert_eq!(resolved.variant_id, 111);
                assert_eq!(resolved.size, "9");
                assert_eq!(resolved.handle, "air-foo-low-white");
            }
            other => panic!("expected resolution, got {other:?}"),
        }
    }

    #[test]
    fn negative_keyword_blocks_resolution() {
        let mut monitor = monitor_with(keyword_product(&["FOO"], &["WHITE"]), &["9"]);
        match scan(&mut monitor, FEED).expect("scan") {
            MonitorOutcome::NotFoundRetry { .. } => {}
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn second_consecutive_empty_scan_notices_once() {
        let mut monitor = monitor_with(keyword_product(&["NOPE"], &[]), &["9"]);
        let empty = r#"{"products":[]}"#;
        for (cycle, expect_notice) in [(1, false), (2, true), (3, false), (4, false)] {
            match scan(&mut monitor, empty).expect("scan") {
                MonitorOutcome::NotFoundRetry { notice, .. } => {
                    assert_eq!(notice.is_some(), expect_notice, "cycle {cycle}");
                }
                other => panic!("expected retry, got {other:?}"),
            }
        }
    }

    #[test]
    fn empty_streak_resets_but_notice_stays_one_shot() {
        let mut monitor = monitor_with(keyword_product(&["FOO", "WHITE"], &[]), &["9"]);
        let empty = r#"{"products":[]}"#;
        // one empty cycle, then a hit, then two more empties: the notice
        // already fired once and stays suppressed
        monitor.note_empty_cycle();
        monitor.note_empty_cycle();
        assert!(monitor.empty_notice_sent);
        assert!(matches!(
            scan(&mut monitor, FEED).expect("scan"),
            MonitorOutcome::Resolved(_)
        ));
        for _ in 0..2 {
            match scan(&mut monitor, empty).expect("scan") {
                MonitorOutcome::NotFoundRetry { notice, .. } => assert!(notice.is_none()),
                other => panic!("expected retry, got {other:?}"),
            }
        }
    }

    #[test]
    fn ambiguous_match_fails_when_auto_pick_disabled() {
        let mut product = keyword_product(&["FOO"], &[]);
        product.pick_first = false;
        let mut monitor = monitor_with(product, &["9"]);
        let feed = r#"{"products":[
            {"title":"Foo One","handle":"foo-one","updated_at":"2020-01-01T00:00:00Z",
             "variants":[{"id":1,"option1":"9"}]},
            {"title":"Foo Two","handle":"foo-two","updated_at":"2020-02-01T00:00:00Z",
             "variants":[{"id":2,"option1":"9"}]}]}"#;
        assert!(matches!(
            scan(&mut monitor, feed),
            Err(MonitorError::Ambiguous(2))
        ));
    }

    #[test]
    fn ambiguous_match_takes_most_recent_by_default() {
        let mut monitor = monitor_with(keyword_product(&["FOO"], &[]), &["9"]);
        let feed = r#"{"products":[
            {"title":"Foo Stale","handle":"foo-stale","updated_at":"2020-01-01T00:00:00Z",
             "variants":[{"id":1,"option1":"9"}]},
            {"title":"Foo Fresh","handle":"foo-fresh","updated_at":"2020-02-01T00:00:00Z",
             "variants":[{"id":2,"option1":"9"}]}]}"#;
        match scan(&mut monitor, feed).expect("scan") {
            MonitorOutcome::Resolved(resolved) => assert_eq!(resolved.variant_id, 2),
            other => panic!("expected resolution, got {other:?}"),
        }
    }

    #[test]
    fn soft_ban_statuses_collapse_to_rate_limited() {
        let errors = vec![
            Some(FetchError::Transport("timeout".to_string())),
            Some(FetchError::RateLimited),
        ];
        assert!(matches!(collapse_errors(errors), MonitorError::RateLimited));
        assert!(classify_status(430).is_some());
        assert!(classify_status(200).is_none());
    }
}
