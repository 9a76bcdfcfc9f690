// Public modules
pub mod cache;
pub mod chart;
pub mod collector;
pub mod config;
pub mod fallback;
pub mod fetcher;
pub mod generator;
pub mod models;
pub mod newsletter;
pub mod parser;
pub mod pipeline;
pub mod prompt;
pub mod report;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use cache::{CacheStore, Clock, Codec, JsonCodec, SystemClock};
pub use chart::{ChartRenderer, ChartSpec, RenderError, SvgChartRenderer};
pub use collector::MarketCollector;
pub use config::{default_settings_path, Credentials, Settings};
pub use fetcher::{
    DataOrigin, FetchError, Fetched, HttpPageSource, PageSource, RetryPolicy, RetryingFetcher,
};
pub use generator::{GeminiGenerator, GenerationError, TextGenerator};
pub use models::{Direction, MarketIndex, NewsItem, NewsletterResult, StockRecord};
pub use newsletter::NewsletterService;
pub use pipeline::{SummaryStats, TabularBundle};
pub use report::save_newsletter;
