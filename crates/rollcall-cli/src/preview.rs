//! ASCII rendering of camera frames with labelled face boxes.

use image::RgbImage;
use rollcall_core::{to_luma, BoundingBox};

const ASCII_RAMP: &[char] = &[' ', '.', '·', ':', ';', '+', '=', 'x', 'X', '#', '@'];
const DEFAULT_WIDTH: usize = 80;
const DEFAULT_HEIGHT: usize = 30;
/// Rows kept free below the picture for the status line.
const STATUS_ROWS: usize = 3;

/// A face box drawn over the preview, optionally labelled.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub region: BoundingBox,
    pub label: Option<String>,
}

impl Overlay {
    pub fn new(region: BoundingBox, label: Option<&str>) -> Self {
        Self {
            region,
            label: label.map(str::to_string),
        }
    }
}

pub struct AsciiRenderer {
    width: usize,
    height: usize,
}

impl AsciiRenderer {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    /// Size the picture to the current terminal, leaving room for the status line.
    pub fn fit_terminal() -> Self {
        let (cols, rows) = crossterm::terminal::size()
            .map(|(w, h)| (w as usize, h as usize))
            .unwrap_or((DEFAULT_WIDTH, DEFAULT_HEIGHT));
        Self::new(cols, rows.saturating_sub(STATUS_ROWS))
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Render `frame` mirrored horizontally, like a webcam preview, with each
    /// overlay's box and label. Rows are joined with `\r\n` for raw mode.
    pub fn render(&self, frame: &RgbImage, overlays: &[Overlay]) -> String {
        let mut grid = self.image_to_ascii(frame);
        let (img_w, img_h) = frame.dimensions();
        for overlay in overlays {
            self.draw_overlay(&mut grid, overlay, img_w, img_h);
        }
        grid.iter()
            .map(|row| row.iter().collect::<String>())
            .collect::<Vec<_>>()
            .join("\r\n")
    }

    fn image_to_ascii(&self, frame: &RgbImage) -> Vec<Vec<char>> {
        let gray = to_luma(frame);
        let (img_w, img_h) = gray.dimensions();
        let mut grid = vec![vec![' '; self.width]; self.height];
        if img_w == 0 || img_h == 0 {
            return grid;
        }

        for (ty, row) in grid.iter_mut().enumerate() {
            for (tx, cell) in row.iter_mut().enumerate() {
                let mirrored = self.width - 1 - tx;
                let x = (mirrored * img_w as usize / self.width) as u32;
                let y = (ty * img_h as usize / self.height) as u32;
                let brightness = gray.get_pixel(x.min(img_w - 1), y.min(img_h - 1))[0] as usize;
                *cell = ASCII_RAMP[brightness * (ASCII_RAMP.len() - 1) / 255];
            }
        }
        grid
    }

    /// Map an image-space box into mirrored grid cells `(x1, y1, x2, y2)`, inclusive.
    fn to_cells(
        &self,
        region: &BoundingBox,
        img_w: u32,
        img_h: u32,
    ) -> Option<(usize, usize, usize, usize)> {
        if img_w == 0 || img_h == 0 {
            return None;
        }
        let sx = |x: u32| (x as usize * self.width / img_w as usize).min(self.width - 1);
        let sy = |y: u32| (y as usize * self.height / img_h as usize).min(self.height - 1);

        let left = sx(region.x.min(img_w));
        let right = sx(region.x.saturating_add(region.width).min(img_w).saturating_sub(1));
        let top = sy(region.y.min(img_h));
        let bottom = sy(region.y.saturating_add(region.height).min(img_h).saturating_sub(1));

        let x1 = self.width - 1 - right;
        let x2 = self.width - 1 - left;
        Some((x1, top, x2, bottom))
    }

    fn draw_overlay(&self, grid: &mut [Vec<char>], overlay: &Overlay, img_w: u32, img_h: u32) {
        let Some((x1, y1, x2, y2)) = self.to_cells(&overlay.region, img_w, img_h) else {
            return;
        };

        for x in x1..=x2 {
            grid[y1][x] = '─';
            grid[y2][x] = '─';
        }
        for row in grid.iter_mut().take(y2 + 1).skip(y1) {
            row[x1] = '│';
            row[x2] = '│';
        }
        grid[y1][x1] = '┌';
        grid[y1][x2] = '┐';
        grid[y2][x1] = '└';
        grid[y2][x2] = '┘';

        if let Some(label) = &overlay.label {
            // Above the box, or inside the top edge when the box touches row 0
            let y = y1.checked_sub(1).unwrap_or(y1);
            for (i, ch) in label.chars().enumerate() {
                let x = x1 + i;
                if x >= self.width {
                    break;
                }
                grid[y][x] = ch;
            }
        }
    }
}
