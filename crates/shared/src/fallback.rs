//! Built-in data served when a feed cannot be fetched.

use crate::models::{Direction, MarketIndex, NewsItem, StockRecord};

const FALLBACK_STOCKS: &[(&str, i64)] = &[
    ("삼성전자", 75_000),
    ("SK하이닉스", 142_000),
    ("현대차", 185_000),
    ("LG에너지솔루션", 420_000),
    ("POSCO홀딩스", 385_000),
    ("NAVER", 210_000),
    ("기아", 98_000),
    ("셀트리온", 176_000),
    ("카카오", 52_000),
    ("LG화학", 350_000),
];

pub fn indices(timestamp: &str) -> Vec<MarketIndex> {
    vec![
        MarketIndex {
            name: "KOSPI".to_string(),
            current_value: 2500.0,
            change_value: 10.5,
            change_rate: 0.42,
            timestamp: timestamp.to_string(),
        },
        MarketIndex {
            name: "KOSDAQ".to_string(),
            current_value: 850.0,
            change_value: -5.2,
            change_rate: -0.61,
            timestamp: timestamp.to_string(),
        },
    ]
}

/// Ranked list with rates stepping down from 5.0%; negated for falling stocks
pub fn top_stocks(direction: Direction, count: usize) -> Vec<StockRecord> {
    let sign = match direction {
        Direction::Rise => 1.0,
        Direction::Fall => -1.0,
    };

    FALLBACK_STOCKS
        .iter()
        .take(count)
        .enumerate()
        .map(|(i, (name, price))| StockRecord {
            rank: i as u32 + 1,
            name: name.to_string(),
            current_price: *price,
            change_rate: sign * (50 - 3 * i as i64) as f64 / 10.0,
            direction,
        })
        .collect()
}

pub fn news(count: usize) -> Vec<NewsItem> {
    [
        ("코스피, 외국인 매수에 상승 마감", "외국인 투자자들의 순매수에 힘입어 상승"),
        ("반도체 업종 강세, SK하이닉스 급등", "AI 수요 증가로 반도체주 강세"),
        ("2차전지 관련주 혼조세", "원자재 가격 변동에 따른 영향"),
    ]
    .into_iter()
    .take(count)
    .map(|(title, summary)| NewsItem {
        title: title.to_string(),
        summary: summary.to_string(),
    })
    .collect()
}
