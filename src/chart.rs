#![cfg(feature = "web")]
use image::{ImageOutputFormat, RgbImage};
use plotters::prelude::*;
use std::io::Cursor;

use crate::error::{DashboardError, Result};
use crate::pivot::{PivotTable, TOTAL_LABEL, ValueMode};
use crate::table::parse_date_str;
use crate::theme;

/// Chart types supported for pivot tables
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChartKind {
    /// Grouped bars: one group per pivot row, one bar per column
    Bar,

    /// One line per pivot row across the column labels; used for time-like columns
    Line,
}

impl ChartKind {
    /// Line charts for pivots whose columns are months or dates, bars otherwise.
    pub fn for_pivot(pivot: &PivotTable) -> Self {
        let series = series_labels(pivot);
        let time_like = |label: &&String| {
            parse_date_str(label).is_some() || parse_date_str(&format!("{}-01", label)).is_some()
        };
        if series.len() > 1 && series.iter().all(time_like) {
            ChartKind::Line
        } else {
            ChartKind::Bar
        }
    }
}

/// Options for chart rendering
#[derive(Clone, Debug)]
pub struct ChartOptions {
    /// Caption drawn above the plot
    pub title: String,

    /// Width of the image in pixels
    pub width: u32,

    /// Height of the image in pixels
    pub height: u32,

    pub kind: ChartKind,

    /// Draw caption and axis labels. Without them no font is needed.
    pub labels: bool,
}

impl Default for ChartOptions {
    fn default() -> Self {
        Self {
            title: String::new(),
            width: 800,
            height: 600,
            kind: ChartKind::Bar,
            labels: true,
        }
    }
}

fn series_labels(pivot: &PivotTable) -> Vec<&String> {
    pivot
        .columns
        .iter()
        .filter(|c| c.as_str() != TOTAL_LABEL)
        .collect()
}

fn render_error<E: std::fmt::Display>(e: E) -> DashboardError {
    DashboardError::Render(e.to_string())
}

/// Renders a pivot table as a PNG chart
///
/// Draws into an in-memory RGB buffer with plotters and encodes it as PNG. The
/// `Total` column and row are left out. Series colours follow the theme palette.
///
/// # Arguments
/// * `pivot` - Pivot table to draw
/// * `options` - Size, title and chart type
///
/// # Returns
/// * `Result<Vec<u8>>` - PNG bytes, or a render error
pub fn render_pivot_chart(pivot: &PivotTable, options: &ChartOptions) -> Result<Vec<u8>> {
    let (width, height) = (options.width.max(1), options.height.max(1));
    let mut pixels = vec![255u8; (width * height * 3) as usize];

    {
        let root = BitMapBackend::with_buffer(&mut pixels, (width, height)).into_drawing_area();
        root.fill(&WHITE).map_err(render_error)?;
        match options.kind {
            ChartKind::Bar => draw_bars(&root, pivot, options)?,
            ChartKind::Line => draw_lines(&root, pivot, options)?,
        }
        root.present().map_err(render_error)?;
    }

    let image = RgbImage::from_raw(width, height, pixels)
        .ok_or_else(|| DashboardError::Render("pixel buffer has the wrong size".to_string()))?;
    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), ImageOutputFormat::Png)
        .map_err(render_error)?;
    Ok(png)
}

fn y_upper(pivot: &PivotTable, series: usize) -> f64 {
    let max = pivot
        .rows
        .iter()
        .flat_map(|r| r.values.iter().take(series))
        .fold(0.0f64, |m, v| m.max(*v));
    match pivot.mode {
        ValueMode::Percent => 100.0,
        ValueMode::Number if max <= 0.0 => 1.0,
        ValueMode::Number => max * 1.1,
    }
}

fn draw_bars<DB: DrawingBackend>(
    root: &DrawingArea<DB, plotters::coord::Shift>,
    pivot: &PivotTable,
    options: &ChartOptions,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    let series = series_labels(pivot);
    let groups = pivot.rows.len().max(1);
    let y_max = y_upper(pivot, series.len());

    let mut builder = ChartBuilder::on(root);
    builder.margin(10);
    if options.labels {
        builder
            .caption(&options.title, (theme::FONT_FAMILY, theme::TITLE_FONT_SIZE * 2))
            .x_label_area_size(40)
            .y_label_area_size(50);
    }
    let mut chart = builder
        .build_cartesian_2d(-0.5f64..groups as f64 - 0.5, 0f64..y_max)
        .map_err(render_error)?;

    if options.labels {
        let labels: Vec<&str> = pivot.rows.iter().map(|r| r.label.as_str()).collect();
        chart
            .configure_mesh()
            .disable_x_mesh()
            .light_line_style(theme::rgb(theme::GRID_COLOR))
            .x_labels(groups)
            .x_label_formatter(&|x| {
                let i = x.round();
                if (x - i).abs() < 1e-6 && i >= 0.0 {
                    labels.get(i as usize).map(|l| l.to_string()).unwrap_or_default()
                } else {
                    String::new()
                }
            })
            .y_desc(pivot.mode_label())
            .draw()
            .map_err(render_error)?;
    }

    let slot = 0.8 / series.len().max(1) as f64;
    for (s, label) in series.iter().enumerate() {
        let color = theme::series_rgb(s);
        let bars = pivot.rows.iter().enumerate().map(move |(g, row)| {
            let left = g as f64 - 0.4 + s as f64 * slot;
            let value = row.values.get(s).copied().unwrap_or(0.0);
            Rectangle::new([(left, 0.0), (left + slot, value)], color.filled())
        });
        let drawn = chart.draw_series(bars).map_err(render_error)?;
        if options.labels {
            drawn
                .label(label.as_str())
                .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], color.filled()));
        }
    }

    if options.labels && series.len() > 1 {
        chart
            .configure_series_labels()
            .border_style(theme::rgb(theme::GRID_COLOR))
            .background_style(WHITE)
            .draw()
            .map_err(render_error)?;
    }
    Ok(())
}

fn draw_lines<DB: DrawingBackend>(
    root: &DrawingArea<DB, plotters::coord::Shift>,
    pivot: &PivotTable,
    options: &ChartOptions,
) -> Result<()>
where
    DB::ErrorType: 'static,
{
    let series = series_labels(pivot);
    let points = series.len().max(2);
    let y_max = y_upper(pivot, series.len());

    let mut builder = ChartBuilder::on(root);
    builder.margin(10);
    if options.labels {
        builder
            .caption(&options.title, (theme::FONT_FAMILY, theme::TITLE_FONT_SIZE * 2))
            .x_label_area_size(40)
            .y_label_area_size(50);
    }
    let mut chart = builder
        .build_cartesian_2d(0f64..(points - 1) as f64, 0f64..y_max)
        .map_err(render_error)?;

    if options.labels {
        chart
            .configure_mesh()
            .light_line_style(theme::rgb(theme::GRID_COLOR))
            .x_labels(series.len())
            .x_label_formatter(&|x| {
                let i = x.round();
                if (x - i).abs() < 1e-6 && i >= 0.0 {
                    series.get(i as usize).map(|l| l.to_string()).unwrap_or_default()
                } else {
                    String::new()
                }
            })
            .y_desc(pivot.mode_label())
            .draw()
            .map_err(render_error)?;
    }

    for (r, row) in pivot.rows.iter().enumerate() {
        let color = theme::series_rgb(r);
        let line = LineSeries::new(
            row.values
                .iter()
                .take(series.len())
                .enumerate()
                .map(|(i, v)| (i as f64, *v)),
            color.stroke_width(2),
        );
        let drawn = chart.draw_series(line).map_err(render_error)?;
        if options.labels {
            drawn
                .label(row.label.as_str())
                .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 12, y)], color));
        }
    }

    if options.labels && !pivot.rows.is_empty() {
        chart
            .configure_series_labels()
            .border_style(theme::rgb(theme::GRID_COLOR))
            .background_style(WHITE)
            .draw()
            .map_err(render_error)?;
    }
    Ok(())
}

impl PivotTable {
    /// Y-axis caption for charts of this pivot.
    pub fn mode_label(&self) -> &'static str {
        match self.mode {
            ValueMode::Number => "Count",
            ValueMode::Percent => "%",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pivot::{PivotSpec, build_pivot};
    use crate::table::Table;

    const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

    fn monthly() -> PivotTable {
        let table = Table::from_rows(
            &["area", "month"],
            vec![
                vec!["APAC".into(), "2024-01".into()],
                vec!["APAC".into(), "2024-02".into()],
                vec!["EMEA".into(), "2024-02".into()],
            ],
        )
        .unwrap();
        build_pivot(&table, &PivotSpec::new("area").by_column("month")).unwrap()
    }

    fn plain(kind: ChartKind) -> ChartOptions {
        ChartOptions {
            width: 320,
            height: 200,
            kind,
            labels: false,
            ..ChartOptions::default()
        }
    }

    #[test]
    fn month_columns_pick_line_chart() {
        assert_eq!(ChartKind::for_pivot(&monthly()), ChartKind::Line);

        let table = Table::from_rows(&["area"], vec![vec!["APAC".into()]]).unwrap();
        let pivot = build_pivot(&table, &PivotSpec::new("area")).unwrap();
        assert_eq!(ChartKind::for_pivot(&pivot), ChartKind::Bar);
    }

    #[test]
    fn renders_png_bars_and_lines() {
        let pivot = monthly();
        for kind in [ChartKind::Bar, ChartKind::Line] {
            let png = render_pivot_chart(&pivot, &plain(kind)).unwrap();
            assert!(png.starts_with(PNG_SIGNATURE));
        }
    }

    #[test]
    fn empty_pivot_still_renders() {
        let table = Table::from_rows(&["area"], vec![]).unwrap();
        let pivot = build_pivot(&table, &PivotSpec::new("area")).unwrap();
        let png = render_pivot_chart(&pivot, &plain(ChartKind::Bar)).unwrap();
        assert!(png.starts_with(PNG_SIGNATURE));
    }
}
