//! Page parsers for the Naver Finance market pages.

use scraper::{ElementRef, Html, Selector};

use crate::fetcher::FetchError;
use crate::models::{Direction, MarketIndex, NewsItem, StockRecord};

/// Element id prefix on the market summary page, and the display name
const INDEX_IDS: &[(&str, &str)] = &[("KOSPI", "KOSPI"), ("KOSDAQ", "KOSDAQ"), ("KPI200", "KOSPI200")];

fn selector(css: &str) -> Result<Selector, FetchError> {
    Selector::parse(css).map_err(|e| FetchError::Parse(format!("bad selector {}: {}", css, e)))
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse "2,512.30", "+0.42%", "-1,200" and friends
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-' || *c == '+')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

pub fn parse_indices(html: &str, timestamp: &str) -> Result<Vec<MarketIndex>, FetchError> {
    let document = Html::parse_document(html);
    let mut indices = Vec::new();

    for (id, name) in INDEX_IDS {
        let now_sel = selector(&format!("#{}_now", id))?;
        let change_sel = selector(&format!("#{}_change", id))?;

        let current_value = match document
            .select(&now_sel)
            .next()
            .and_then(|e| parse_number(&element_text(e)))
        {
            Some(v) => v,
            None => continue,
        };

        // e.g. "10.50 +0.42% 상승"
        let change_text = document
            .select(&change_sel)
            .next()
            .map(element_text)
            .unwrap_or_default();
        let mut tokens = change_text.split_whitespace();
        let change_abs = tokens.next().and_then(parse_number).unwrap_or(0.0).abs();
        let change_rate = tokens.next().and_then(parse_number).unwrap_or(0.0);

        let change_value = if change_rate < 0.0 || change_text.contains("하락") {
            -change_abs
        } else {
            change_abs
        };

        indices.push(MarketIndex {
            name: name.to_string(),
            current_value,
            change_value,
            change_rate,
            timestamp: timestamp.to_string(),
        });
    }

    if indices.is_empty() {
        return Err(FetchError::Parse("no market indices found".into()));
    }
    Ok(indices)
}

pub fn parse_top_stocks(html: &str, direction: Direction) -> Result<Vec<StockRecord>, FetchError> {
    let document = Html::parse_document(html);
    let row_sel = selector("table.type_2 tr")?;
    let name_sel = selector("a.tltle")?;
    let rank_sel = selector("td.no")?;
    let number_sel = selector("td.number")?;

    let mut stocks = Vec::new();

    for row in document.select(&row_sel) {
        let name = match row.select(&name_sel).next() {
            Some(link) => element_text(link),
            None => continue,
        };

        let numbers: Vec<String> = row.select(&number_sel).map(element_text).collect();
        // Columns: price, change, change rate, ...
        let (Some(price), Some(rate)) = (
            numbers.first().and_then(|s| parse_number(s)),
            numbers.get(2).and_then(|s| parse_number(s)),
        ) else {
            continue;
        };

        let rank = row
            .select(&rank_sel)
            .next()
            .and_then(|e| element_text(e).parse::<u32>().ok())
            .unwrap_or(stocks.len() as u32 + 1);

        stocks.push(StockRecord {
            rank,
            name,
            current_price: price.round() as i64,
            change_rate: rate,
            direction,
        });
    }

    if stocks.is_empty() {
        return Err(FetchError::Parse(format!("no {} stocks found", direction)));
    }
    Ok(stocks)
}

pub fn parse_news(html: &str) -> Result<Vec<NewsItem>, FetchError> {
    let document = Html::parse_document(html);
    let block_sel = selector("dl")?;
    let subject_sel = selector("dd.articleSubject a, dt.articleSubject a")?;
    let summary_sel = selector("dd.articleSummary")?;

    let mut news = Vec::new();

    for block in document.select(&block_sel) {
        let title = match block.select(&subject_sel).next() {
            Some(a) => element_text(a),
            None => continue,
        };
        if title.is_empty() {
            continue;
        }

        // The summary cell also carries press name and date spans; keep the lead text
        let summary = block
            .select(&summary_sel)
            .next()
            .and_then(|dd| {
                dd.text()
                    .map(str::trim)
                    .find(|t| !t.is_empty())
                    .map(String::from)
            })
            .unwrap_or_default();

        news.push(NewsItem { title, summary });
    }

    if news.is_empty() {
        return Err(FetchError::Parse("no news headlines found".into()));
    }
    Ok(news)
}
