use std::fs;
use std::path::{Path, PathBuf};

use crate::pipeline::TabularBundle;

const TOP_N: usize = 5;
const POSITIVE: &str = "#2ecc71";
const NEGATIVE: &str = "#e74c3c";

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("chart '{0}' has no data")]
    Empty(String),

    #[error("failed to write chart {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub label: String,
    pub value: f64,
    pub color: &'static str,
}

/// A horizontal bar chart, one bar per row
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSpec {
    /// File stem of the rendered image
    pub name: &'static str,
    pub title: &'static str,
    pub x_label: &'static str,
    pub bars: Vec<Bar>,
}

pub trait ChartRenderer: Send + Sync {
    fn render(&self, chart: &ChartSpec, out_dir: &Path) -> Result<PathBuf, RenderError>;
}

fn signed_color(value: f64) -> &'static str {
    if value > 0.0 {
        POSITIVE
    } else {
        NEGATIVE
    }
}

/// The three fixed charts: index performance, top rising, top falling
pub fn chart_specs(bundle: &TabularBundle) -> Vec<ChartSpec> {
    let indices = ChartSpec {
        name: "indices_performance",
        title: "Major Indices Performance",
        x_label: "Change Rate (%)",
        bars: bundle
            .indices
            .rows
            .iter()
            .map(|r| Bar {
                label: r.name.clone(),
                value: r.change_rate,
                color: signed_color(r.change_rate),
            })
            .collect(),
    };

    let rising = ChartSpec {
        name: "top_rising",
        title: "Top 5 Rising Stocks",
        x_label: "Change Rate (%)",
        bars: bundle
            .rising
            .head(TOP_N)
            .iter()
            .map(|r| Bar {
                label: r.name.clone(),
                value: r.change_rate,
                color: POSITIVE,
            })
            .collect(),
    };

    let falling = ChartSpec {
        name: "top_falling",
        title: "Top 5 Falling Stocks",
        x_label: "Change Rate (%)",
        bars: bundle
            .falling
            .head(TOP_N)
            .iter()
            .map(|r| Bar {
                label: r.name.clone(),
                value: r.change_rate,
                color: NEGATIVE,
            })
            .collect(),
    };

    vec![indices, rising, falling]
}

/// Render every chart, skipping the ones that fail
pub fn render_charts(
    renderer: &dyn ChartRenderer,
    bundle: &TabularBundle,
    out_dir: &Path,
) -> Vec<PathBuf> {
    let mut paths = Vec::new();

    for chart in chart_specs(bundle) {
        match renderer.render(&chart, out_dir) {
            Ok(path) => {
                tracing::debug!(chart = chart.name, path = %path.display(), "chart rendered");
                paths.push(path);
            }
            Err(e) => {
                tracing::error!(chart = chart.name, "chart skipped: {}", e);
            }
        }
    }

    paths
}

/// Writes charts as standalone SVG files
#[derive(Debug, Clone)]
pub struct SvgChartRenderer {
    pub width: u32,
    pub bar_height: u32,
}

impl Default for SvgChartRenderer {
    fn default() -> Self {
        Self {
            width: 800,
            bar_height: 36,
        }
    }
}

impl SvgChartRenderer {
    const LABEL_WIDTH: f64 = 180.0;
    const MARGIN: f64 = 30.0;
    const HEADER: f64 = 60.0;
    const FOOTER: f64 = 50.0;

    pub fn to_svg(&self, chart: &ChartSpec) -> String {
        let width = self.width as f64;
        let bar_h = self.bar_height as f64;
        let height = Self::HEADER + bar_h * chart.bars.len() as f64 + Self::FOOTER;

        let plot_left = Self::LABEL_WIDTH;
        let plot_width = width - plot_left - Self::MARGIN;

        // Axis range always includes zero so bars grow from a visible baseline
        let min = chart.bars.iter().map(|b| b.value).fold(0.0_f64, f64::min);
        let max = chart.bars.iter().map(|b| b.value).fold(0.0_f64, f64::max);
        let span = if (max - min).abs() < f64::EPSILON { 1.0 } else { max - min };
        let x_of = |v: f64| plot_left + (v - min) / span * plot_width;
        let zero_x = x_of(0.0);

        let mut svg = String::new();
        svg.push_str(&format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{}\" height=\"{:.0}\" viewBox=\"0 0 {} {:.0}\">\n",
            self.width, height, self.width, height
        ));
        svg.push_str("  <rect width=\"100%\" height=\"100%\" fill=\"#ffffff\"/>\n");
        svg.push_str(&format!(
            "  <text x=\"{:.1}\" y=\"35\" font-family=\"sans-serif\" font-size=\"20\" font-weight=\"bold\" text-anchor=\"middle\">{}</text>\n",
            width / 2.0,
            escape_xml(chart.title)
        ));

        for (i, bar) in chart.bars.iter().enumerate() {
            let y = Self::HEADER + bar_h * i as f64;
            let x = x_of(bar.value.min(0.0));
            let w = (x_of(bar.value) - zero_x).abs();

            svg.push_str(&format!(
                "  <text x=\"{:.1}\" y=\"{:.1}\" font-family=\"sans-serif\" font-size=\"13\" text-anchor=\"end\">{}</text>\n",
                plot_left - 8.0,
                y + bar_h * 0.6,
                escape_xml(&bar.label)
            ));
            svg.push_str(&format!(
                "  <rect x=\"{:.1}\" y=\"{:.1}\" width=\"{:.1}\" height=\"{:.1}\" fill=\"{}\" fill-opacity=\"0.7\"/>\n",
                x,
                y + bar_h * 0.15,
                w,
                bar_h * 0.7,
                bar.color
            ));
            svg.push_str(&format!(
                "  <text x=\"{:.1}\" y=\"{:.1}\" font-family=\"sans-serif\" font-size=\"11\" fill=\"#555\">{:+.2}</text>\n",
                x + w + 4.0,
                y + bar_h * 0.6,
                bar.value
            ));
        }

        let axis_bottom = height - Self::FOOTER;
        svg.push_str(&format!(
            "  <line x1=\"{:.1}\" y1=\"{:.1}\" x2=\"{:.1}\" y2=\"{:.1}\" stroke=\"#000\" stroke-width=\"0.5\"/>\n",
            zero_x,
            Self::HEADER,
            zero_x,
            axis_bottom
        ));
        svg.push_str(&format!(
            "  <text x=\"{:.1}\" y=\"{:.1}\" font-family=\"sans-serif\" font-size=\"12\" text-anchor=\"middle\">{}</text>\n",
            plot_left + plot_width / 2.0,
            axis_bottom + 30.0,
            escape_xml(chart.x_label)
        ));
        svg.push_str("</svg>\n");
        svg
    }
}

impl ChartRenderer for SvgChartRenderer {
    fn render(&self, chart: &ChartSpec, out_dir: &Path) -> Result<PathBuf, RenderError> {
        if chart.bars.is_empty() {
            return Err(RenderError::Empty(chart.name.to_string()));
        }

        let path = out_dir.join(format!("{}.svg", chart.name));
        let io_err = |source| RenderError::Io {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(out_dir).map_err(io_err)?;
        fs::write(&path, self.to_svg(chart)).map_err(io_err)?;

        Ok(path)
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback;
    use crate::models::Direction;
    use crate::pipeline::shape;
    use tempfile::TempDir;

    fn bundle() -> TabularBundle {
        shape(
            &fallback::indices("now"),
            &fallback::top_stocks(Direction::Rise, 10),
            &fallback::top_stocks(Direction::Fall, 10),
        )
    }

    #[test]
    fn test_chart_specs_shape() {
        let specs = chart_specs(&bundle());

        assert_eq!(specs.len(), 3);
        assert_eq!(specs[0].bars.len(), 2);
        assert_eq!(specs[0].bars[0].color, POSITIVE);
        assert_eq!(specs[0].bars[1].color, NEGATIVE);
        assert_eq!(specs[1].bars.len(), TOP_N);
        assert_eq!(specs[2].bars.len(), TOP_N);
    }

    #[test]
    fn test_svg_renderer_writes_all_charts() {
        let dir = TempDir::new().unwrap();
        let paths = render_charts(&SvgChartRenderer::default(), &bundle(), dir.path());

        assert_eq!(paths.len(), 3);
        for path in &paths {
            let content = fs::read_to_string(path).unwrap();
            assert!(content.starts_with("<svg"));
        }
        assert!(paths[0].ends_with("indices_performance.svg"));
    }

    #[test]
    fn test_empty_chart_is_skipped() {
        let dir = TempDir::new().unwrap();
        let bundle = shape(&fallback::indices("now"), &[], &[]);
        let paths = render_charts(&SvgChartRenderer::default(), &bundle, dir.path());

        assert_eq!(paths.len(), 1);
    }

    #[test]
    fn test_svg_escapes_labels() {
        let chart = ChartSpec {
            name: "x",
            title: "A & B",
            x_label: "<rate>",
            bars: vec![Bar {
                label: "S&P".into(),
                value: 1.0,
                color: POSITIVE,
            }],
        };
        let svg = SvgChartRenderer::default().to_svg(&chart);

        assert!(svg.contains("A &amp; B"));
        assert!(svg.contains("&lt;rate&gt;"));
        assert!(svg.contains("S&amp;P"));
    }

    #[test]
    fn test_svg_has_one_element_per_line() {
        let chart = ChartSpec {
            name: "x",
            title: "등락률",
            x_label: "%",
            bars: vec![
                Bar {
                    label: "KOSPI".into(),
                    value: 0.42,
                    color: POSITIVE,
                },
                Bar {
                    label: "KOSDAQ".into(),
                    value: -0.61,
                    color: NEGATIVE,
                },
            ],
        };
        let svg = SvgChartRenderer::default().to_svg(&chart);

        // Header, background, title, three per bar, axis, label, footer
        assert_eq!(svg.lines().count(), 6 + 3 * 2);
        assert!(svg.lines().all(|l| l.trim_start().starts_with('<')));
        assert!(svg.ends_with("</svg>\n"));
        assert!(svg.contains("+0.42"));
        assert!(svg.contains("-0.61"));
    }
}
