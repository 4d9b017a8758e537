//! 2×2 confusion matrix and its SVG heatmap.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const CELL: u32 = 120;
const MARGIN_LEFT: u32 = 90;
const MARGIN_TOP: u32 = 50;
const MARGIN_BOTTOM: u32 = 70;

/// Counts of (true label, predicted label) pairs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Label 0 predicted 0.
    pub true_negative: usize,
    /// Label 0 predicted 1.
    pub false_positive: usize,
    /// Label 1 predicted 0.
    pub false_negative: usize,
    /// Label 1 predicted 1.
    pub true_positive: usize,
}

impl ConfusionMatrix {
    /// Tally predictions against true labels.
    #[must_use]
    pub fn from_predictions(labels: &[u8], predictions: &[u8]) -> Self {
        let mut matrix = Self::default();
        for (&label, &predicted) in labels.iter().zip(predictions) {
            match (label, predicted) {
                (0, 0) => matrix.true_negative += 1,
                (0, _) => matrix.false_positive += 1,
                (_, 0) => matrix.false_negative += 1,
                _ => matrix.true_positive += 1,
            }
        }
        matrix
    }

    /// Rows = true label, columns = predicted label.
    #[must_use]
    pub const fn as_grid(&self) -> [[usize; 2]; 2] {
        [
            [self.true_negative, self.false_positive],
            [self.false_negative, self.true_positive],
        ]
    }

    /// Total number of rows tallied.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.true_negative + self.false_positive + self.false_negative + self.true_positive
    }

    /// Write the matrix as an annotated SVG heatmap.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the file cannot be written.
    pub fn write_svg(&self, path: &Path) -> std::io::Result<()> {
        let width = MARGIN_LEFT + 2 * CELL + 20;
        let height = MARGIN_TOP + 2 * CELL + MARGIN_BOTTOM;
        let max = self.as_grid().iter().flatten().copied().max().unwrap_or(0);

        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(
            writer,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" font-family="sans-serif" style="background-color: white;">"#
        )?;
        writeln!(
            writer,
            r#"<text x="{}" y="30" font-size="18" text-anchor="middle">Confusion Matrix</text>"#,
            MARGIN_LEFT + CELL
        )?;

        for (row, counts) in self.as_grid().iter().enumerate() {
            for (col, &count) in counts.iter().enumerate() {
                #[allow(clippy::cast_possible_truncation)]
                let (x, y) = (MARGIN_LEFT + col as u32 * CELL, MARGIN_TOP + row as u32 * CELL);
                let (fill, ink) = blues(count, max);
                writeln!(
                    writer,
                    r#"<rect x="{x}" y="{y}" width="{CELL}" height="{CELL}" fill="{fill}" stroke="white"/>"#
                )?;
                writeln!(
                    writer,
                    r#"<text x="{}" y="{}" font-size="22" text-anchor="middle" fill="{ink}">{count}</text>"#,
                    x + CELL / 2,
                    y + CELL / 2 + 8
                )?;
            }
        }

        for class in 0..2u32 {
            writeln!(
                writer,
                r#"<text x="{}" y="{}" font-size="14" text-anchor="middle">{class}</text>"#,
                MARGIN_LEFT + class * CELL + CELL / 2,
                MARGIN_TOP + 2 * CELL + 20
            )?;
            writeln!(
                writer,
                r#"<text x="{}" y="{}" font-size="14" text-anchor="end">{class}</text>"#,
                MARGIN_LEFT - 10,
                MARGIN_TOP + class * CELL + CELL / 2 + 5
            )?;
        }
        writeln!(
            writer,
            r#"<text x="{}" y="{}" font-size="14" text-anchor="middle">Predicted Label</text>"#,
            MARGIN_LEFT + CELL,
            MARGIN_TOP + 2 * CELL + 50
        )?;
        writeln!(
            writer,
            r#"<text x="25" y="{y}" font-size="14" text-anchor="middle" transform="rotate(-90 25 {y})">True Label</text>"#,
            y = MARGIN_TOP + CELL
        )?;
        writeln!(writer, "</svg>")?;
        writer.flush()
    }
}

/// White → dark blue fill, and a text color readable on it.
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_precision_loss)]
fn blues(count: usize, max: usize) -> (String, &'static str) {
    let t = if max == 0 { 0.0 } else { count as f64 / max as f64 };
    let lerp = |from: f64, to: f64| (from + (to - from) * t).round() as u8;
    let fill = format!("#{:02x}{:02x}{:02x}", lerp(247.0, 8.0), lerp(251.0, 48.0), lerp(255.0, 107.0));
    let ink = if t > 0.5 { "white" } else { "black" };
    (fill, ink)
}
