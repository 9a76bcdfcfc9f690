use chrono::{DateTime, Local};

use crate::models::NewsItem;
use crate::pipeline::{SummaryStats, TabularBundle};

/// Serialize the collected data into the context block handed to the model
pub fn build_context(
    bundle: &TabularBundle,
    summary: &SummaryStats,
    news: &[NewsItem],
    now: DateTime<Local>,
) -> String {
    let mut context = String::new();

    context.push_str(&format!(
        "# 주식 시장 데이터 (기준: {})\n\n",
        now.format("%Y년 %m월 %d일")
    ));

    context.push_str("## 1. 주요 지수\n");
    context.push_str(&bundle.indices.to_text());
    context.push('\n');

    context.push_str("## 2. 상승률 상위 종목\n");
    context.push_str(&bundle.rising.to_text());
    context.push('\n');

    context.push_str("## 3. 하락률 상위 종목\n");
    context.push_str(&bundle.falling.to_text());
    context.push('\n');

    context.push_str("## 4. 시장 통계\n");
    context.push_str(&format!("- 평균 지수 등락률: {:.2}%\n", summary.avg_index_change));
    context.push_str(&format!("- 최대 상승률: {:.2}%\n", summary.max_rising_rate));
    context.push_str(&format!("- 최대 하락률: {:.2}%\n", summary.min_falling_rate));
    context.push_str(&format!("- 상승 종목 수: {}개\n", summary.rising_count));
    context.push_str(&format!("- 하락 종목 수: {}개\n\n", summary.falling_count));

    context.push_str("## 5. 주요 뉴스\n");
    for item in news {
        if item.summary.is_empty() {
            context.push_str(&format!("- {}\n", item.title));
        } else {
            context.push_str(&format!("- {}: {}\n", item.title, item.summary));
        }
    }

    context
}

pub fn build_prompt(query: &str, context: &str, now: DateTime<Local>) -> String {
    format!(
        r#"당신은 금융 전문 애널리스트입니다. 아래 데이터만을 근거로 읽기 쉬운 국내 주식 시장 뉴스레터를 작성하세요.

사용자 질의: {query}

{context}

작성 형식:

# 📈 오늘의 국내 주식 시장 리포트

## 🎯 시장 개요
지수 흐름과 전반적인 분위기를 2-3문장으로 요약

## 📊 주요 지수 동향
지수별 움직임 분석

## 🚀 주목할 상승 종목
상승률 상위 종목과 배경

## 📉 하락 종목 분석
하락 종목의 원인과 시사점

## 💡 투자 인사이트
데이터에서 읽을 수 있는 시사점

## 📰 주요 뉴스 요약
시장에 영향을 준 뉴스

---
*본 리포트는 {timestamp} 기준으로 작성되었습니다.*
*투자 판단의 책임은 투자자 본인에게 있습니다.*

구체적인 수치를 인용하고, 전문적이되 친근한 어조를 유지하세요."#,
        query = query,
        context = context,
        timestamp = now.format("%Y년 %m월 %d일 %H:%M"),
    )
}
