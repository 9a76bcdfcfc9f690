use serde::{Deserialize, Serialize};

use crate::models::{MarketIndex, StockRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRow {
    pub name: String,
    pub value: f64,
    pub change: f64,
    pub change_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockRow {
    pub rank: u32,
    pub name: String,
    pub price: i64,
    pub change_rate: f64,
}

/// Rows that can be laid out as a text table
pub trait TableRow {
    fn headers() -> &'static [&'static str];
    fn cells(&self) -> Vec<String>;
}

impl TableRow for IndexRow {
    fn headers() -> &'static [&'static str] {
        &["지수명", "현재가", "전일대비", "등락률(%)"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            format!("{:.2}", self.value),
            format!("{:+.2}", self.change),
            format!("{:+.2}", self.change_rate),
        ]
    }
}

impl TableRow for StockRow {
    fn headers() -> &'static [&'static str] {
        &["순위", "종목명", "현재가", "등락률(%)"]
    }

    fn cells(&self) -> Vec<String> {
        vec![
            self.rank.to_string(),
            self.name.clone(),
            self.price.to_string(),
            format!("{:+.2}", self.change_rate),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table<R> {
    pub rows: Vec<R>,
}

impl<R: TableRow> Table<R> {
    pub fn new(rows: Vec<R>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn head(&self, n: usize) -> &[R] {
        &self.rows[..n.min(self.rows.len())]
    }

    /// Render as a column-aligned plain-text table
    pub fn to_text(&self) -> String {
        let headers: Vec<String> = R::headers().iter().map(|h| h.to_string()).collect();
        let body: Vec<Vec<String>> = self.rows.iter().map(TableRow::cells).collect();

        let mut widths: Vec<usize> = headers.iter().map(|h| display_width(h)).collect();
        for row in &body {
            for (i, cell) in row.iter().enumerate() {
                if let Some(w) = widths.get_mut(i) {
                    *w = (*w).max(display_width(cell));
                }
            }
        }

        let mut out = String::new();
        for line in std::iter::once(&headers).chain(body.iter()) {
            let padded: Vec<String> = line
                .iter()
                .zip(&widths)
                .map(|(cell, width)| {
                    let pad = width.saturating_sub(display_width(cell));
                    format!("{}{}", " ".repeat(pad), cell)
                })
                .collect();
            out.push_str(padded.join("  ").trim_end());
            out.push('\n');
        }
        out
    }
}

/// Hangul and other wide characters take two columns in a terminal
fn display_width(s: &str) -> usize {
    s.chars()
        .map(|c| if (c as u32) >= 0x1100 { 2 } else { 1 })
        .sum()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabularBundle {
    pub indices: Table<IndexRow>,
    pub rising: Table<StockRow>,
    pub falling: Table<StockRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub avg_index_change: f64,
    pub max_rising_rate: f64,
    pub min_falling_rate: f64,
    pub rising_count: usize,
    pub falling_count: usize,
}

fn stock_rows(stocks: &[StockRecord]) -> Vec<StockRow> {
    stocks
        .iter()
        .map(|s| StockRow {
            rank: s.rank,
            name: s.name.clone(),
            price: s.current_price,
            change_rate: s.change_rate,
        })
        .collect()
}

pub fn shape(indices: &[MarketIndex], rising: &[StockRecord], falling: &[StockRecord]) -> TabularBundle {
    let index_rows = indices
        .iter()
        .map(|idx| IndexRow {
            name: idx.name.clone(),
            value: idx.current_value,
            change: idx.change_value,
            change_rate: idx.change_rate,
        })
        .collect();

    TabularBundle {
        indices: Table::new(index_rows),
        rising: Table::new(stock_rows(rising)),
        falling: Table::new(stock_rows(falling)),
    }
}

pub fn summarize(bundle: &TabularBundle) -> SummaryStats {
    let avg_index_change = if bundle.indices.is_empty() {
        0.0
    } else {
        bundle.indices.rows.iter().map(|r| r.change_rate).sum::<f64>() / bundle.indices.len() as f64
    };

    let max_rising_rate = bundle
        .rising
        .rows
        .iter()
        .map(|r| r.change_rate)
        .fold(None, |acc: Option<f64>, x| Some(acc.map_or(x, |a| a.max(x))))
        .unwrap_or(0.0);

    let min_falling_rate = bundle
        .falling
        .rows
        .iter()
        .map(|r| r.change_rate)
        .fold(None, |acc: Option<f64>, x| Some(acc.map_or(x, |a| a.min(x))))
        .unwrap_or(0.0);

    SummaryStats {
        avg_index_change,
        max_rising_rate,
        min_falling_rate,
        rising_count: bundle.rising.len(),
        falling_count: bundle.falling.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback;
    use crate::models::Direction;

    #[test]
    fn test_summarize_fallback_data() {
        let bundle = shape(
            &fallback::indices("now"),
            &fallback::top_stocks(Direction::Rise, 10),
            &fallback::top_stocks(Direction::Fall, 10),
        );
        let stats = summarize(&bundle);

        assert!((stats.avg_index_change - (-0.095)).abs() < 1e-9);
        assert_eq!(stats.max_rising_rate, 5.0);
        assert_eq!(stats.min_falling_rate, -5.0);
        assert_eq!(stats.rising_count, 10);
        assert_eq!(stats.falling_count, 10);
    }

    #[test]
    fn test_summarize_empty_sets_are_zero() {
        let bundle = shape(&[], &[], &[]);
        let stats = summarize(&bundle);

        assert_eq!(stats.avg_index_change, 0.0);
        assert_eq!(stats.max_rising_rate, 0.0);
        assert_eq!(stats.min_falling_rate, 0.0);
        assert_eq!(stats.rising_count, 0);
        assert_eq!(stats.falling_count, 0);
    }

    #[test]
    fn test_summarize_is_deterministic() {
        let rising = fallback::top_stocks(Direction::Rise, 4);
        let a = summarize(&shape(&fallback::indices("t"), &rising, &[]));
        let b = summarize(&shape(&fallback::indices("t"), &rising, &[]));
        assert_eq!(a, b);
    }

    #[test]
    fn test_to_text_aligns_columns() {
        let bundle = shape(&fallback::indices("now"), &[], &[]);
        let text = bundle.indices.to_text();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("지수명"));
        assert!(lines[1].contains("KOSPI"));
        assert!(lines[1].ends_with("+0.42"));
        assert!(lines[2].ends_with("-0.61"));
    }

    #[test]
    fn test_head_clamps() {
        let bundle = shape(&[], &fallback::top_stocks(Direction::Rise, 3), &[]);
        assert_eq!(bundle.rising.head(5).len(), 3);
        assert_eq!(bundle.rising.head(2).len(), 2);
    }
}
