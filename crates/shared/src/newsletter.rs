use anyhow::Result;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::cache::CacheStore;
use crate::chart::{render_charts, ChartRenderer};
use crate::collector::{top_stocks_key, MarketCollector, INDICES_KEY, NEWS_KEY};
use crate::config::Settings;
use crate::fetcher::{Fetched, PageSource, RetryPolicy, RetryingFetcher};
use crate::generator::TextGenerator;
use crate::models::{now_timestamp, Direction, NewsletterResult};
use crate::pipeline::{shape, summarize};
use crate::prompt::{build_context, build_prompt};

/// A query must mention at least one of these to be processed
pub const TRIGGER_KEYWORDS: &[&str] = &["오늘자", "국내", "시장", "주식"];
const ENGLISH_TRIGGER_KEYWORDS: &[&str] = &["today", "domestic", "market", "stock"];

pub const GUIDANCE_MESSAGE: &str = "올바른 키워드를 입력해주세요. 예: \"오늘자 국내 시장\"";

pub fn is_market_query(query: &str) -> bool {
    let lower = query.to_lowercase();
    TRIGGER_KEYWORDS.iter().any(|k| query.contains(k))
        || ENGLISH_TRIGGER_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Runs the collect → shape → chart → generate pipeline for one query
pub struct NewsletterService {
    settings: Settings,
    cache: CacheStore,
    collector: MarketCollector,
    charts: Box<dyn ChartRenderer>,
    generator: Box<dyn TextGenerator>,
}

impl NewsletterService {
    pub fn new(
        settings: Settings,
        source: Arc<dyn PageSource>,
        charts: Box<dyn ChartRenderer>,
        generator: Box<dyn TextGenerator>,
    ) -> Self {
        let cache = CacheStore::new(settings.cache_directory(), settings.cache_duration());
        Self::with_cache(settings, cache, source, charts, generator)
    }

    pub fn with_cache(
        settings: Settings,
        cache: CacheStore,
        source: Arc<dyn PageSource>,
        charts: Box<dyn ChartRenderer>,
        generator: Box<dyn TextGenerator>,
    ) -> Self {
        let fetcher = RetryingFetcher::new(source, RetryPolicy::from_settings(&settings));
        let collector = MarketCollector::new(fetcher, &settings);

        tracing::info!(
            cache_dir = %cache.dir().display(),
            ttl_secs = cache.ttl().as_secs(),
            "newsletter service ready"
        );

        Self {
            settings,
            cache,
            collector,
            charts,
            generator,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Never fails: rejections, degraded data and internal faults all come
    /// back as a `NewsletterResult`.
    pub async fn run(&self, query: &str) -> NewsletterResult {
        tracing::info!(query, "processing query");

        if !is_market_query(query) {
            tracing::info!(query, "query rejected, no trigger keyword");
            return NewsletterResult::rejected(GUIDANCE_MESSAGE);
        }

        match AssertUnwindSafe(self.try_run(query)).catch_unwind().await {
            Ok(result) => {
                tracing::info!(
                    images = result.images.len(),
                    cached = result.cached_data,
                    degraded = ?result.degraded_feeds,
                    "query processed"
                );
                result
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!("query aborted: {}", reason);
                NewsletterResult::failure(format!("internal error: {}", reason))
            }
        }
    }

    async fn try_run(&self, query: &str) -> NewsletterResult {
        let mut feeds = FeedTracker::default();

        let fetched = self.collector.collect_indices(&self.cache).await;
        let indices = feeds.track(INDICES_KEY, fetched);

        let fetched = self.collector.collect_top_stocks(&self.cache, Direction::Rise).await;
        let rising = feeds.track(&top_stocks_key(Direction::Rise), fetched);

        let fetched = self.collector.collect_top_stocks(&self.cache, Direction::Fall).await;
        let falling = feeds.track(&top_stocks_key(Direction::Fall), fetched);

        let fetched = self.collector.collect_news(&self.cache).await;
        let news = feeds.track(NEWS_KEY, fetched);

        let bundle = shape(&indices, &rising, &falling);
        let summary = summarize(&bundle);

        let images = render_charts(
            self.charts.as_ref(),
            &bundle,
            &self.settings.output_directory(),
        );

        let now = chrono::Local::now();
        let context = build_context(&bundle, &summary, &news, now);
        let prompt = build_prompt(query, &context, now);

        let newsletter = match self.generator.generate(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("newsletter generation failed: {}", e);
                format!("뉴스레터 생성 중 오류 발생: {}", e)
            }
        };

        NewsletterResult {
            success: true,
            newsletter,
            message: None,
            images,
            summary: Some(summary),
            timestamp: now_timestamp(),
            cached_data: feeds.any_cached,
            degraded_feeds: feeds.degraded,
        }
    }

    pub fn clear_cache(&self) -> Result<usize> {
        self.cache.clear(None)
    }
}

#[derive(Default)]
struct FeedTracker {
    any_cached: bool,
    degraded: Vec<String>,
}

impl FeedTracker {
    fn track<T>(&mut self, key: &str, fetched: Fetched<T>) -> T {
        self.any_cached |= fetched.from_cache();
        if fetched.is_degraded() {
            self.degraded.push(key.to_string());
        }
        fetched.data
    }
}
