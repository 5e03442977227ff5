//! Time-series chart rendering.
//!
//! The core hands a [`ChartInput`] to a [`ChartRenderer`] and gets PNG bytes
//! back. [`PngChartRenderer`] draws cases against the left axis and hospital
//! admissions and deaths against the right axis, with a title, axis names,
//! tick values, date labels and a legend.

mod font;

use crate::error::{BotError, Result};
use crate::model::DATE_FORMAT;
use chrono::NaiveDate;
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

/// Values to plot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartInput {
    pub title: String,
    /// Ascending x axis.
    pub dates: Vec<NaiveDate>,
    pub cases: Vec<f64>,
    pub hospital: Vec<f64>,
    pub deceased: Vec<f64>,
    /// Highest value on the primary (cases) axis.
    pub max_primary: i64,
    /// Highest value on the secondary (hospital / deceased) axis.
    pub max_secondary: i64,
}

impl ChartInput {
    fn validate(&self) -> Result<()> {
        if self.dates.is_empty() {
            return Err(BotError::Render("no data points to plot".to_owned()));
        }
        let n = self.dates.len();
        if self.cases.len() != n || self.hospital.len() != n || self.deceased.len() != n {
            return Err(BotError::Render(format!(
                "series lengths differ from the {n} dates on the x axis"
            )));
        }
        if self.dates.windows(2).any(|w| w[0] > w[1]) {
            return Err(BotError::Render("dates are not ascending".to_owned()));
        }
        Ok(())
    }
}

/// Chart rasterizer.
pub trait ChartRenderer: Send + Sync {
    /// Render `input` to an encoded image.
    fn render(&self, input: &ChartInput) -> Result<Vec<u8>>;

    /// File name to attach the image under.
    fn file_name(&self) -> &'static str {
        "chart.png"
    }
}

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS: Rgb<u8> = Rgb([40, 40, 40]);
const GRID: Rgb<u8> = Rgb([225, 225, 225]);
const CASES: Rgb<u8> = Rgb([0x3b, 0x8e, 0xc4]);
const HOSPITAL: Rgb<u8> = Rgb([0x4f, 0xa8, 0x1c]);
const DECEASED: Rgb<u8> = Rgb([0xe0, 0x4a, 0x2f]);

const MARGIN_LEFT: u32 = 125;
const MARGIN_RIGHT: u32 = 100;
const MARGIN_TOP: u32 = 70;
const MARGIN_BOTTOM: u32 = 80;
const GRID_LINES: u32 = 4;

const TITLE_SCALE: u32 = 3;
const LABEL_SCALE: u32 = 2;
const PRIMARY_AXIS_NAME: &str = "Cases";
const SECONDARY_AXIS_NAME: &str = "Hospital / Deaths";
const LEGEND: [(&str, Rgb<u8>); 3] = [
    ("Cases", CASES),
    ("Hospital admissions", HOSPITAL),
    ("Deaths", DECEASED),
];

/// Line chart encoded as PNG.
#[derive(Debug, Clone, Copy)]
pub struct PngChartRenderer {
    width: u32,
    height: u32,
}

impl Default for PngChartRenderer {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 512,
        }
    }
}

impl PngChartRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    fn plot_area(&self) -> Result<(u32, u32, u32, u32)> {
        let right = self.width.checked_sub(MARGIN_RIGHT);
        let bottom = self.height.checked_sub(MARGIN_BOTTOM);
        match (right, bottom) {
            (Some(right), Some(bottom)) if right > MARGIN_LEFT + 1 && bottom > MARGIN_TOP + 1 => {
                Ok((MARGIN_LEFT, MARGIN_TOP, right, bottom))
            }
            _ => Err(BotError::Render(format!(
                "canvas {}x{} is too small",
                self.width, self.height
            ))),
        }
    }
}

impl ChartRenderer for PngChartRenderer {
    fn render(&self, input: &ChartInput) -> Result<Vec<u8>> {
        input.validate()?;
        let (left, top, right, bottom) = self.plot_area()?;
        let mut img = RgbImage::from_pixel(self.width, self.height, BACKGROUND);

        for i in 1..=GRID_LINES {
            let y = bottom - (bottom - top) * i / GRID_LINES;
            draw_line(&mut img, (left as i64, y as i64), (right as i64, y as i64), GRID);
        }
        draw_line(&mut img, (left as i64, top as i64), (left as i64, bottom as i64), AXIS);
        draw_line(&mut img, (right as i64, top as i64), (right as i64, bottom as i64), AXIS);
        draw_line(&mut img, (left as i64, bottom as i64), (right as i64, bottom as i64), AXIS);

        let first = input.dates[0];
        let span = (input.dates[input.dates.len() - 1] - first).num_days().max(1) as f64;
        let x_of = |date: NaiveDate| -> i64 {
            let frac = (date - first).num_days() as f64 / span;
            left as i64 + (frac * f64::from(right - left)).round() as i64
        };
        let y_of = |value: f64, max: i64| -> i64 {
            let max = max.max(1) as f64;
            let frac = (value / max).clamp(0.0, 1.0);
            bottom as i64 - (frac * f64::from(bottom - top)).round() as i64
        };

        let series = [
            (&input.cases, input.max_primary, CASES),
            (&input.hospital, input.max_secondary, HOSPITAL),
            (&input.deceased, input.max_secondary, DECEASED),
        ];
        for (values, max, color) in series {
            let points: Vec<(i64, i64)> = input
                .dates
                .iter()
                .zip(values.iter())
                .map(|(date, value)| (x_of(*date), y_of(*value, max)))
                .collect();
            if let [only] = points.as_slice() {
                draw_line(&mut img, *only, *only, color);
            }
            for pair in points.windows(2) {
                draw_line(&mut img, pair[0], pair[1], color);
            }
        }

        draw_labels(&mut img, input, (left, top, right, bottom), x_of);

        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|e| BotError::Render(format!("cannot encode png: {e}")))?;
        Ok(bytes)
    }
}

/// Title, axis names, tick values, date labels and legend around the plot.
fn draw_labels(
    img: &mut RgbImage,
    input: &ChartInput,
    (left, top, right, bottom): (u32, u32, u32, u32),
    x_of: impl Fn(NaiveDate) -> i64,
) {
    let (left, top, right, bottom) = (
        i64::from(left),
        i64::from(top),
        i64::from(right),
        i64::from(bottom),
    );
    let label_height = i64::from(font::GLYPH_HEIGHT * LABEL_SCALE);
    let width_of = |text: &str| i64::from(font::text_width(text, LABEL_SCALE));

    let title_x = (i64::from(img.width()) - i64::from(font::text_width(&input.title, TITLE_SCALE))) / 2;
    font::draw_text(img, title_x.max(0), 12, &input.title, TITLE_SCALE, AXIS);

    let name_y = top - label_height - 8;
    font::draw_text(img, left, name_y, PRIMARY_AXIS_NAME, LABEL_SCALE, AXIS);
    let secondary_x = right - width_of(SECONDARY_AXIS_NAME);
    font::draw_text(img, secondary_x, name_y, SECONDARY_AXIS_NAME, LABEL_SCALE, AXIS);

    for i in 0..=GRID_LINES {
        let y = bottom - (bottom - top) * i64::from(i) / i64::from(GRID_LINES);
        let text_y = y - label_height / 2;
        let primary = tick_value(input.max_primary, i);
        font::draw_text(img, left - 8 - width_of(&primary), text_y, &primary, LABEL_SCALE, AXIS);
        let secondary = tick_value(input.max_secondary, i);
        font::draw_text(img, right + 8, text_y, &secondary, LABEL_SCALE, AXIS);
    }

    // First and last date at the plot edges, the middle one when it fits.
    let date_y = bottom + 10;
    let first = input.dates[0];
    let last = input.dates[input.dates.len() - 1];
    let first_label = first.format(DATE_FORMAT).to_string();
    font::draw_text(img, left, date_y, &first_label, LABEL_SCALE, AXIS);
    if last != first {
        let last_label = last.format(DATE_FORMAT).to_string();
        font::draw_text(img, right - width_of(&last_label), date_y, &last_label, LABEL_SCALE, AXIS);

        let middle = input.dates[input.dates.len() / 2];
        let middle_label = middle.format(DATE_FORMAT).to_string();
        let middle_x = x_of(middle) - width_of(&middle_label) / 2;
        let gap = 16;
        if middle_x > left + width_of(&first_label) + gap
            && middle_x + width_of(&middle_label) + gap < right - width_of(&last_label)
        {
            font::draw_text(img, middle_x, date_y, &middle_label, LABEL_SCALE, AXIS);
        }
    }

    let legend_y = bottom + 42;
    let mut x = left;
    for (label, color) in LEGEND {
        font::fill_rect(img, x, legend_y, 20, font::GLYPH_HEIGHT * LABEL_SCALE, color);
        x += 28;
        font::draw_text(img, x, legend_y, label, LABEL_SCALE, AXIS);
        x += width_of(label) + 36;
    }
}

/// Value at grid line `i` of an axis running from zero to `max`.
fn tick_value(max: i64, i: u32) -> String {
    (i128::from(max.max(1)) * i128::from(i) / i128::from(GRID_LINES)).to_string()
}

/// Bresenham line, clipped to the image.
fn draw_line(img: &mut RgbImage, from: (i64, i64), to: (i64, i64), color: Rgb<u8>) {
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        if x >= 0 && y >= 0 && (x as u64) < u64::from(img.width()) && (y as u64) < u64::from(img.height()) {
            img.put_pixel(x as u32, y as u32, color);
        }
        if x == to.0 && y == to.1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}
