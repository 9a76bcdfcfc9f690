use crate::cache::{CacheStore, Codec};
use crate::config::Settings;
use crate::fallback;
use crate::fetcher::{Fetched, RetryingFetcher};
use crate::models::{now_timestamp, Direction, MarketIndex, NewsItem, StockRecord};
use crate::parser;

pub const INDICES_KEY: &str = "market_indices";
pub const NEWS_KEY: &str = "market_news";

pub fn top_stocks_key(direction: Direction) -> String {
    format!("top_stocks_{}", direction)
}

/// Collects the four market feeds through the retrying fetcher
pub struct MarketCollector {
    fetcher: RetryingFetcher,
    base_url: String,
    top_stocks_count: usize,
    news_count: usize,
}

impl MarketCollector {
    pub fn new(fetcher: RetryingFetcher, settings: &Settings) -> Self {
        Self {
            fetcher,
            base_url: settings.base_url().trim_end_matches('/').to_string(),
            top_stocks_count: settings.top_stocks_count(),
            news_count: settings.news_count(),
        }
    }

    pub async fn collect_indices<C: Codec>(&self, cache: &CacheStore<C>) -> Fetched<Vec<MarketIndex>> {
        let url = format!("{}/sise/", self.base_url);
        let timestamp = now_timestamp();

        self.fetcher
            .fetch(
                cache,
                &url,
                INDICES_KEY,
                |html| parser::parse_indices(html, &timestamp),
                || fallback::indices(&timestamp),
            )
            .await
    }

    pub async fn collect_top_stocks<C: Codec>(
        &self,
        cache: &CacheStore<C>,
        direction: Direction,
    ) -> Fetched<Vec<StockRecord>> {
        let page = match direction {
            Direction::Rise => "sise_rise.naver",
            Direction::Fall => "sise_fall.naver",
        };
        let url = format!("{}/sise/{}", self.base_url, page);
        let count = self.top_stocks_count;

        let mut fetched = self
            .fetcher
            .fetch(
                cache,
                &url,
                &top_stocks_key(direction),
                |html| parser::parse_top_stocks(html, direction),
                || fallback::top_stocks(direction, count),
            )
            .await;

        fetched.data.truncate(count);
        fetched
    }

    pub async fn collect_news<C: Codec>(&self, cache: &CacheStore<C>) -> Fetched<Vec<NewsItem>> {
        let url = format!("{}/news/mainnews.naver", self.base_url);
        let count = self.news_count;

        let mut fetched = self
            .fetcher
            .fetch(cache, &url, NEWS_KEY, parser::parse_news, || fallback::news(count))
            .await;

        fetched.data.truncate(count);
        fetched
    }
}
