use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Side length of every stored template and every live crop.
pub const TEMPLATE_SIZE: u32 = 100;

/// Mean absolute difference below which a crop matches a template.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 50.0;

/// Axis-aligned face region in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Number of raw detection windows merged into this region (0 if ungrouped).
    pub neighbors: u32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            neighbors: 0,
        }
    }

    /// Intersect with a `width`×`height` frame. `None` if nothing is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(Self {
            width: w,
            height: h,
            ..*self
        })
    }
}

/// A stored reference image for one enrolled person.
#[derive(Debug, Clone)]
pub struct Template {
    /// Person name, taken from the template file stem.
    pub name: String,
    /// `TEMPLATE_SIZE`×`TEMPLATE_SIZE` RGB image.
    pub image: RgbImage,
}

/// Result of matching one live crop against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Difference to the accepted template, or the smallest difference seen
    /// when nothing matched (`f32::INFINITY` for an empty gallery).
    pub difference: f32,
    /// Gallery position of the accepted template.
    pub index: Option<usize>,
    /// Name of the accepted template.
    pub name: Option<String>,
}

/// How the gallery is walked when looking for a match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// Accept the first template (in gallery order) under the threshold.
    #[default]
    First,
    /// Accept the template with the lowest difference under the threshold.
    Best,
}

/// Strategy for comparing a live crop against a gallery of templates.
pub trait Matcher {
    fn compare(&self, crop: &RgbImage, gallery: &[Template]) -> MatchResult;
}

/// Mean-absolute-pixel-difference matcher with a fixed global threshold.
#[derive(Debug, Clone, Copy)]
pub struct PixelDiffMatcher {
    pub threshold: f32,
    pub policy: MatchPolicy,
}

impl Default for PixelDiffMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
            policy: MatchPolicy::First,
        }
    }
}

impl Matcher for PixelDiffMatcher {
    fn compare(&self, crop: &RgbImage, gallery: &[Template]) -> MatchResult {
        let mut lowest = f32::INFINITY;
        let mut accepted: Option<usize> = None;

        for (i, template) in gallery.iter().enumerate() {
            let diff = mean_abs_diff(crop, &template.image);
            if diff < self.threshold && diff < lowest {
                accepted = Some(i);
            }
            lowest = lowest.min(diff);

            if accepted.is_some() && self.policy == MatchPolicy::First {
                break;
            }
        }

        match accepted {
            Some(idx) => MatchResult {
                matched: true,
                difference: lowest,
                index: Some(idx),
                name: Some(gallery[idx].name.clone()),
            },
            None => MatchResult {
                matched: false,
                difference: lowest,
                index: None,
                name: None,
            },
        }
    }
}

/// Mean absolute difference over every channel sample of two equally sized
/// images. Images of different dimensions never match (`f32::INFINITY`).
pub fn mean_abs_diff(a: &RgbImage, b: &RgbImage) -> f32 {
    if a.dimensions() != b.dimensions() {
        return f32::INFINITY;
    }
    let samples = a.as_raw().len();
    if samples == 0 {
        return 0.0;
    }
    let total: u64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw().iter())
        .map(|(&p, &q)| p.abs_diff(q) as u64)
        .sum();
    (total as f64 / samples as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(value: u8) -> RgbImage {
        RgbImage::from_pixel(TEMPLATE_SIZE, TEMPLATE_SIZE, Rgb([value, value, value]))
    }

    fn template(name: &str, value: u8) -> Template {
        Template {
            name: name.into(),
            image: solid(value),
        }
    }

    #[test]
    fn test_mean_abs_diff_identical() {
        assert_eq!(mean_abs_diff(&solid(90), &solid(90)), 0.0);
    }

    #[test]
    fn test_mean_abs_diff_uniform_offset() {
        assert!((mean_abs_diff(&solid(100), &solid(130)) - 30.0).abs() < 1e-6);
        assert!((mean_abs_diff(&solid(130), &solid(100)) - 30.0).abs() < 1e-6);
    }

    #[test]
    fn test_mean_abs_diff_counts_every_channel() {
        // Only the red channel differs by 90 → mean over 3 samples is 30
        let a = RgbImage::from_pixel(2, 2, Rgb([0, 10, 10]));
        let b = RgbImage::from_pixel(2, 2, Rgb([90, 10, 10]));
        assert!((mean_abs_diff(&a, &b) - 30.0).abs() < 1e-6);
    }

    #[test]
    fn test_mean_abs_diff_dimension_mismatch() {
        let a = RgbImage::new(10, 10);
        let b = RgbImage::new(10, 11);
        assert!(mean_abs_diff(&a, &b).is_infinite());
    }

    #[test]
    fn test_first_policy_takes_first_under_threshold() {
        // Both "near" (diff 40) and "exact" (diff 0) are under threshold;
        // "near" comes first in the gallery and wins.
        let gallery = vec![template("far", 0), template("near", 160), template("exact", 120)];
        let result = PixelDiffMatcher::default().compare(&solid(120), &gallery);
        assert!(result.matched);
        assert_eq!(result.name.as_deref(), Some("near"));
        assert_eq!(result.index, Some(1));
        assert!((result.difference - 40.0).abs() < 1e-6);
    }

    #[test]
    fn test_best_policy_scans_all() {
        let gallery = vec![template("far", 0), template("near", 160), template("exact", 120)];
        let matcher = PixelDiffMatcher {
            policy: MatchPolicy::Best,
            ..PixelDiffMatcher::default()
        };
        let result = matcher.compare(&solid(120), &gallery);
        assert!(result.matched);
        assert_eq!(result.name.as_deref(), Some("exact"));
        assert_eq!(result.difference, 0.0);
    }

    #[test]
    fn test_zero_difference_matches_when_earlier_are_far() {
        let gallery = vec![template("a", 0), template("b", 255), template("bob", 77)];
        let result = PixelDiffMatcher::default().compare(&solid(77), &gallery);
        assert_eq!(result.name.as_deref(), Some("bob"));
        assert_eq!(result.difference, 0.0);
    }

    #[test]
    fn test_threshold_is_strict() {
        // Difference of exactly 50 does not match
        let gallery = vec![template("edge", 150)];
        let result = PixelDiffMatcher::default().compare(&solid(100), &gallery);
        assert!(!result.matched);
        assert!((result.difference - 50.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_gallery() {
        let result = PixelDiffMatcher::default().compare(&solid(1), &[]);
        assert!(!result.matched);
        assert!(result.difference.is_infinite());
        assert_eq!(result.name, None);
    }

    #[test]
    fn test_clamp_to_frame() {
        let b = BoundingBox::new(90, 40, 20, 20);
        let clamped = b.clamp_to(100, 50).unwrap();
        assert_eq!((clamped.width, clamped.height), (10, 10));
        assert!(BoundingBox::new(100, 0, 5, 5).clamp_to(100, 50).is_none());
    }

    #[test]
    fn test_match_policy_serde() {
        let p: MatchPolicy = serde_json::from_str("\"best\"").unwrap();
        assert_eq!(p, MatchPolicy::Best);
        assert_eq!(MatchPolicy::default(), MatchPolicy::First);
    }
}
