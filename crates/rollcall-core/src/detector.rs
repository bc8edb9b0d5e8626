//! Haar-feature cascade face detector.
//!
//! Classical Viola–Jones detection: a window slides over the frame at a
//! pyramid of scales, each window is pushed through a sequence of stages of
//! stump classifiers evaluated on an integral image, and the surviving
//! windows are merged by rectangle grouping.

use crate::types::BoundingBox;
use image::{GrayImage, RgbImage};
use roxmltree::Node;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

// --- Named constants ---
pub const DEFAULT_SCALE_FACTOR: f32 = 1.1;
pub const DEFAULT_MIN_NEIGHBORS: u32 = 4;
/// Relative tolerance used when grouping overlapping detection windows.
const GROUP_EPS: f32 = 0.2;
/// OpenCV's stock frontal-face cascade.
pub const DEFAULT_CASCADE_FILE: &str = "haarcascade_frontalface_default.xml";
/// Where distribution OpenCV packages install their Haar cascades.
pub const SYSTEM_CASCADE_DIRS: &[&str] = &[
    "/usr/share/opencv4/haarcascades",
    "/usr/share/opencv/haarcascades",
    "/usr/local/share/opencv4/haarcascades",
];

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("cascade file not found: {0}; copy OpenCV's {DEFAULT_CASCADE_FILE} there")]
    NotFound(String),
    #[error("failed to read cascade: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse cascade XML: {0}")]
    Parse(#[from] roxmltree::Error),
    #[error("invalid cascade: {0}")]
    Invalid(String),
}

/// Rectangle of a Haar feature, in base-window coordinates.
#[derive(Debug, Clone)]
pub struct WeightedRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub weight: f32,
}

/// A Haar-like feature: the weighted sum of two or three rectangle sums.
#[derive(Debug, Clone)]
pub struct HaarFeature {
    pub rects: Vec<WeightedRect>,
}

/// Depth-one decision tree over a single feature.
#[derive(Debug, Clone)]
pub struct Stump {
    /// Index into [`CascadeModel::features`].
    pub feature: usize,
    /// Compared against the variance-normalised feature value.
    pub threshold: f32,
    /// Vote when the feature value is below `threshold`.
    pub left: f32,
    /// Vote otherwise.
    pub right: f32,
}

/// One boosted stage; a window is rejected when the vote sum is below `threshold`.
#[derive(Debug, Clone)]
pub struct Stage {
    pub threshold: f32,
    pub classifiers: Vec<Stump>,
}

/// An upright Haar cascade of stump classifiers.
#[derive(Debug, Clone)]
pub struct CascadeModel {
    pub window_width: u32,
    pub window_height: u32,
    pub features: Vec<HaarFeature>,
    pub stages: Vec<Stage>,
}

impl CascadeModel {
    /// Parse a cascade in the layout OpenCV's `CascadeClassifier` writes
    /// (`<opencv_storage><cascade>` with `stages` and `features` lists).
    ///
    /// Only upright HAAR features with depth-one weak classifiers are
    /// accepted, which covers the stock frontal-face cascades.
    pub fn from_opencv_xml(xml: &str) -> Result<Self, CascadeError> {
        let doc = roxmltree::Document::parse(xml)?;
        let cascade = doc
            .descendants()
            .find(|n| n.has_tag_name("cascade"))
            .ok_or_else(|| invalid("missing <cascade> element"))?;

        if let Some(kind) = child(cascade, "featureType").ok().and_then(|n| n.text()) {
            if kind.trim() != "HAAR" {
                return Err(invalid(format!("unsupported feature type {}", kind.trim())));
            }
        }

        let window_width = parse_child(cascade, "width")?;
        let window_height = parse_child(cascade, "height")?;

        let mut stages = Vec::new();
        for (s, stage) in items(child(cascade, "stages")?).enumerate() {
            let threshold = parse_child(stage, "stageThreshold")?;
            let mut classifiers = Vec::new();
            for weak in items(child(stage, "weakClassifiers")?) {
                let nodes = numbers(child(weak, "internalNodes")?)?;
                let leaves = numbers(child(weak, "leafValues")?)?;
                if nodes.len() != 4 || leaves.len() != 2 {
                    return Err(invalid(format!(
                        "stage {s}: only single-split weak classifiers are supported"
                    )));
                }
                if nodes[2] < 0.0 {
                    return Err(invalid(format!("stage {s}: negative feature index")));
                }
                classifiers.push(Stump {
                    feature: nodes[2] as usize,
                    threshold: nodes[3],
                    left: leaves[0],
                    right: leaves[1],
                });
            }
            stages.push(Stage { threshold, classifiers });
        }

        let mut features = Vec::new();
        for (i, feature) in items(child(cascade, "features")?).enumerate() {
            let tilted = child(feature, "tilted")
                .ok()
                .and_then(|n| n.text())
                .is_some_and(|t| t.trim() != "0");
            if tilted {
                return Err(invalid(format!("feature {i}: tilted features are not supported")));
            }
            let mut rects = Vec::new();
            for rect in items(child(feature, "rects")?) {
                let v = numbers(rect)?;
                if v.len() != 5 || v[..4].iter().any(|c| *c < 0.0) {
                    return Err(invalid(format!("feature {i}: malformed rectangle")));
                }
                rects.push(WeightedRect {
                    x: v[0] as u32,
                    y: v[1] as u32,
                    width: v[2] as u32,
                    height: v[3] as u32,
                    weight: v[4],
                });
            }
            features.push(HaarFeature { rects });
        }

        Ok(Self {
            window_width,
            window_height,
            features,
            stages,
        })
    }

    fn validate(&self) -> Result<(), CascadeError> {
        if self.window_width == 0 || self.window_height == 0 {
            return Err(invalid("window size must be non-zero"));
        }
        if self.stages.is_empty() {
            return Err(invalid("cascade has no stages"));
        }
        for (i, feature) in self.features.iter().enumerate() {
            if feature.rects.is_empty() {
                return Err(invalid(format!("feature {i} has no rectangles")));
            }
            for r in &feature.rects {
                if r.width == 0
                    || r.height == 0
                    || r.x + r.width > self.window_width
                    || r.y + r.height > self.window_height
                {
                    return Err(invalid(format!(
                        "feature {i} rectangle {}x{}+{}+{} outside {}x{} window",
                        r.width, r.height, r.x, r.y, self.window_width, self.window_height
                    )));
                }
            }
        }
        for (s, stage) in self.stages.iter().enumerate() {
            let features = self.features.len();
            if let Some(stump) = stage.classifiers.iter().find(|c| c.feature >= features) {
                return Err(invalid(format!(
                    "stage {s} references feature {} of {features}",
                    stump.feature
                )));
            }
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> CascadeError {
    CascadeError::Invalid(msg.into())
}

fn child<'a, 'input>(node: Node<'a, 'input>, tag: &str) -> Result<Node<'a, 'input>, CascadeError> {
    node.children()
        .find(|n| n.has_tag_name(tag))
        .ok_or_else(|| invalid(format!("<{}> has no <{tag}>", node.tag_name().name())))
}

/// Element children of an OpenCV sequence node (the `<_>` entries).
fn items<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element())
}

fn parse_child<T: FromStr>(node: Node, tag: &str) -> Result<T, CascadeError> {
    let text = child(node, tag)?.text().unwrap_or("").trim();
    text.parse().map_err(|_| invalid(format!("<{tag}> is not a number: {text:?}")))
}

/// Whitespace-separated numbers; OpenCV writes weights like `-1.`.
fn numbers(node: Node) -> Result<Vec<f32>, CascadeError> {
    node.text()
        .unwrap_or("")
        .split_whitespace()
        .map(|t| {
            t.parse::<f32>().map_err(|_| {
                invalid(format!("<{}> holds non-number {t:?}", node.tag_name().name()))
            })
        })
        .collect()
}

/// BT.601 luma with OpenCV's fixed-point rounding, the conversion the
/// cascade was trained against.
pub fn to_luma(frame: &RgbImage) -> GrayImage {
    GrayImage::from_fn(frame.width(), frame.height(), |x, y| {
        let [r, g, b] = frame.get_pixel(x, y).0;
        let luma = (r as u32 * 4899 + g as u32 * 9617 + b as u32 * 1868 + 8192) >> 14;
        image::Luma([luma as u8])
    })
}

/// Multi-scale detection parameters.
#[derive(Debug, Clone, Copy)]
pub struct DetectionParams {
    /// Window growth per pyramid level (> 1.0).
    pub scale_factor: f32,
    /// Minimum number of overlapping raw windows a region needs to be kept.
    /// Zero disables grouping and returns raw windows.
    pub min_neighbors: u32,
    /// Smallest window considered, defaults to the cascade window.
    pub min_size: Option<(u32, u32)>,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            scale_factor: DEFAULT_SCALE_FACTOR,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
            min_size: None,
        }
    }
}

/// Anything that finds face regions in a grayscale frame.
pub trait FaceDetector {
    /// Face regions in detection order.
    fn detect(&self, gray: &GrayImage) -> Vec<BoundingBox>;
}

/// Haar cascade detector.
pub struct HaarCascade {
    model: CascadeModel,
    params: DetectionParams,
}

/// Feature rectangle resolved for one pyramid level.
struct ScaledRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    weight: f64,
}

impl HaarCascade {
    /// Load an OpenCV cascade XML file from disk.
    pub fn load(path: &Path, params: DetectionParams) -> Result<Self, CascadeError> {
        if !path.exists() {
            return Err(CascadeError::NotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        let model = CascadeModel::from_opencv_xml(&contents)?;

        tracing::info!(
            path = %path.display(),
            stages = model.stages.len(),
            features = model.features.len(),
            window = ?(model.window_width, model.window_height),
            "loaded Haar cascade"
        );

        Self::from_model(model, params)
    }

    pub fn from_model(model: CascadeModel, params: DetectionParams) -> Result<Self, CascadeError> {
        model.validate()?;
        if params.scale_factor <= 1.0 {
            return Err(invalid(format!(
                "scale factor must be greater than 1.0, got {}",
                params.scale_factor
            )));
        }
        Ok(Self { model, params })
    }

    pub fn params(&self) -> &DetectionParams {
        &self.params
    }

    /// Resolve every feature for a window scaled by `factor`.
    ///
    /// Rounding shifts rectangle areas, so the first rectangle's weight is
    /// recomputed to keep multi-rectangle features zero-sum.
    fn scale_features(&self, factor: f32, win_w: u32, win_h: u32) -> Vec<Vec<ScaledRect>> {
        self.model
            .features
            .iter()
            .map(|feature| {
                let mut rects: Vec<ScaledRect> = feature
                    .rects
                    .iter()
                    .map(|r| {
                        let x = ((r.x as f32 * factor).round() as u32).min(win_w - 1);
                        let y = ((r.y as f32 * factor).round() as u32).min(win_h - 1);
                        let width = ((r.width as f32 * factor).round() as u32)
                            .clamp(1, win_w - x);
                        let height = ((r.height as f32 * factor).round() as u32)
                            .clamp(1, win_h - y);
                        ScaledRect {
                            x,
                            y,
                            width,
                            height,
                            weight: r.weight as f64,
                        }
                    })
                    .collect();

                if rects.len() > 1 {
                    let rest: f64 = rects[1..]
                        .iter()
                        .map(|r| r.weight * (r.width * r.height) as f64)
                        .sum();
                    let area0 = (rects[0].width * rects[0].height) as f64;
                    rects[0].weight = -rest / area0;
                }
                rects
            })
            .collect()
    }

    /// Run all stages on the window at (`x`, `y`). True if every stage passes.
    fn evaluate(
        &self,
        integral: &IntegralImage,
        features: &[Vec<ScaledRect>],
        x: u32,
        y: u32,
        win_w: u32,
        win_h: u32,
    ) -> bool {
        let inv_area = 1.0 / (win_w as f64 * win_h as f64);
        let mean = integral.sum(x, y, win_w, win_h) as f64 * inv_area;
        let variance = integral.sq_sum(x, y, win_w, win_h) as f64 * inv_area - mean * mean;
        let norm = if variance > 0.0 { variance.sqrt() } else { 1.0 };

        for stage in &self.model.stages {
            let mut votes = 0.0f64;
            for stump in &stage.classifiers {
                let value: f64 = features[stump.feature]
                    .iter()
                    .map(|r| r.weight * integral.sum(x + r.x, y + r.y, r.width, r.height) as f64)
                    .sum::<f64>()
                    * inv_area;
                votes += if value < stump.threshold as f64 * norm {
                    stump.left as f64
                } else {
                    stump.right as f64
                };
            }
            if votes < stage.threshold as f64 {
                return false;
            }
        }
        true
    }
}

impl FaceDetector for HaarCascade {
    fn detect(&self, gray: &GrayImage) -> Vec<BoundingBox> {
        let (width, height) = gray.dimensions();
        let base_w = self.model.window_width;
        let base_h = self.model.window_height;
        let (min_w, min_h) = self.params.min_size.unwrap_or((base_w, base_h));

        if width < base_w || height < base_h {
            return Vec::new();
        }

        let integral = IntegralImage::new(gray);
        let mut candidates = Vec::new();
        let mut factor = 1.0f32;

        loop {
            let win_w = (base_w as f32 * factor).round() as u32;
            let win_h = (base_h as f32 * factor).round() as u32;
            if win_w > width || win_h > height {
                break;
            }

            if win_w >= min_w && win_h >= min_h {
                // Coarser stride at small scales, matching the usual 2px step
                // on the downscaled image.
                let base_step = if factor > 2.0 { 1.0 } else { 2.0 };
                let step = (base_step * factor).round().max(1.0) as u32;
                let features = self.scale_features(factor, win_w, win_h);

                let mut y = 0;
                while y + win_h <= height {
                    let mut x = 0;
                    while x + win_w <= width {
                        if self.evaluate(&integral, &features, x, y, win_w, win_h) {
                            candidates.push(BoundingBox::new(x, y, win_w, win_h));
                        }
                        x += step;
                    }
                    y += step;
                }
            }

            factor *= self.params.scale_factor;
        }

        let raw = candidates.len();
        let faces = group_rectangles(candidates, self.params.min_neighbors, GROUP_EPS);
        tracing::debug!(raw, grouped = faces.len(), "cascade detection");
        faces
    }
}

/// Summed-area tables of pixel values and squared pixel values.
///
/// Both tables are (width + 1) × (height + 1) with a zero first row and column.
struct IntegralImage {
    stride: usize,
    sums: Vec<u64>,
    sq_sums: Vec<u64>,
}

impl IntegralImage {
    fn new(gray: &GrayImage) -> Self {
        let (w, h) = (gray.width() as usize, gray.height() as usize);
        let stride = w + 1;
        let mut sums = vec![0u64; stride * (h + 1)];
        let mut sq_sums = vec![0u64; stride * (h + 1)];
        let raw = gray.as_raw();

        for y in 0..h {
            let mut row = 0u64;
            let mut row_sq = 0u64;
            for x in 0..w {
                let p = raw[y * w + x] as u64;
                row += p;
                row_sq += p * p;
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row;
                sq_sums[(y + 1) * stride + x + 1] = sq_sums[y * stride + x + 1] + row_sq;
            }
        }

        Self {
            stride,
            sums,
            sq_sums,
        }
    }

    fn sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        Self::rect(&self.sums, self.stride, x, y, w, h)
    }

    fn sq_sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        Self::rect(&self.sq_sums, self.stride, x, y, w, h)
    }

    fn rect(table: &[u64], stride: usize, x: u32, y: u32, w: u32, h: u32) -> u64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        (table[y1 * stride + x1] + table[y0 * stride + x0])
            - (table[y0 * stride + x1] + table[y1 * stride + x0])
    }
}

/// Two windows are similar when every edge is within `eps` of their mean size.
fn similar(a: &BoundingBox, b: &BoundingBox, eps: f32) -> bool {
    let delta = eps * (a.width.min(b.width) + a.height.min(b.height)) as f32 * 0.5;
    let close = |p: u32, q: u32| (p as f32 - q as f32).abs() <= delta;
    close(a.x, b.x)
        && close(a.y, b.y)
        && close(a.x + a.width, b.x + b.width)
        && close(a.y + a.height, b.y + b.height)
}

fn find_root(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Merge overlapping raw detections into face regions.
///
/// Windows are clustered transitively by [`similar`], each cluster is
/// averaged into one region, clusters with `min_neighbors` or fewer members
/// are dropped, and so are regions nested inside a stronger region.
/// `min_neighbors == 0` returns the input unchanged.
pub fn group_rectangles(rects: Vec<BoundingBox>, min_neighbors: u32, eps: f32) -> Vec<BoundingBox> {
    if min_neighbors == 0 || rects.is_empty() {
        return rects;
    }

    let n = rects.len();
    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&rects[i], &rects[j], eps) {
                let ri = find_root(&mut parent, i);
                let rj = find_root(&mut parent, j);
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    // Per-cluster sums of x, y, width, height, in order of first appearance.
    let mut label = vec![usize::MAX; n];
    let mut clusters: Vec<([u64; 4], u32)> = Vec::new();
    for (i, r) in rects.iter().enumerate() {
        let root = find_root(&mut parent, i);
        if label[root] == usize::MAX {
            label[root] = clusters.len();
            clusters.push(([0; 4], 0));
        }
        let (sums, count) = &mut clusters[label[root]];
        sums[0] += r.x as u64;
        sums[1] += r.y as u64;
        sums[2] += r.width as u64;
        sums[3] += r.height as u64;
        *count += 1;
    }

    let averaged: Vec<BoundingBox> = clusters
        .iter()
        .map(|(sums, count)| {
            let c = *count as f64;
            let avg = |s: u64| (s as f64 / c).round() as u32;
            BoundingBox {
                x: avg(sums[0]),
                y: avg(sums[1]),
                width: avg(sums[2]),
                height: avg(sums[3]),
                neighbors: *count,
            }
        })
        .collect();

    averaged
        .iter()
        .enumerate()
        .filter(|(i, r1)| {
            let n1 = r1.neighbors;
            if n1 <= min_neighbors {
                return false;
            }
            let nested = averaged.iter().enumerate().any(|(j, r2)| {
                let n2 = r2.neighbors;
                if j == *i || n2 <= min_neighbors {
                    return false;
                }
                let dx = (r2.width as f32 * eps).round() as i64;
                let dy = (r2.height as f32 * eps).round() as i64;
                let edges = |r: &BoundingBox| {
                    (r.x as i64, r.y as i64, r.width as i64, r.height as i64)
                };
                let (x1, y1, w1, h1) = edges(*r1);
                let (x2, y2, w2, h2) = edges(r2);
                x1 >= x2 - dx
                    && y1 >= y2 - dy
                    && x1 + w1 <= x2 + w2 + dx
                    && y1 + h1 <= y2 + h2 + dy
                    && (n2 > n1.max(3) || n1 < 3)
            });
            !nested
        })
        .map(|(_, r)| *r)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn rect(x: u32, y: u32, width: u32, height: u32, weight: f32) -> WeightedRect {
        WeightedRect {
            x,
            y,
            width,
            height,
            weight,
        }
    }

    /// Single-feature, single-stump cascade over a 24x24 window.
    fn one_stump(rects: Vec<WeightedRect>, stage: f32, stump: (f32, f32, f32)) -> CascadeModel {
        let (threshold, left, right) = stump;
        CascadeModel {
            window_width: 24,
            window_height: 24,
            features: vec![HaarFeature { rects }],
            stages: vec![Stage {
                threshold: stage,
                classifiers: vec![Stump {
                    feature: 0,
                    threshold,
                    left,
                    right,
                }],
            }],
        }
    }

    /// Fixed zero vote, so the stage threshold alone decides.
    fn constant_cascade(stage_threshold: f32) -> CascadeModel {
        one_stump(vec![rect(0, 0, 24, 24, 1.0)], stage_threshold, (0.0, 0.0, 0.0))
    }

    /// Fires when the left half of the window is brighter than the right half.
    fn left_bright_cascade() -> CascadeModel {
        let rects = vec![rect(0, 0, 24, 24, -1.0), rect(0, 0, 12, 24, 2.0)];
        one_stump(rects, 0.5, (0.2, 0.0, 1.0))
    }

    fn raw_params() -> DetectionParams {
        DetectionParams {
            min_neighbors: 0,
            ..DetectionParams::default()
        }
    }

    fn default_detector(model: CascadeModel) -> HaarCascade {
        HaarCascade::from_model(model, DetectionParams::default()).unwrap()
    }

    fn split_image(left: u8, right: u8) -> GrayImage {
        GrayImage::from_fn(64, 32, |x, _| Luma([if x < 32 { left } else { right }]))
    }

    #[test]
    fn test_integral_sums() {
        let gray = GrayImage::from_fn(4, 3, |x, y| Luma([(x + y * 4) as u8]));
        let integral = IntegralImage::new(&gray);
        // Whole image: 0 + 1 + ... + 11
        assert_eq!(integral.sum(0, 0, 4, 3), 66);
        // 2x2 block at (1,1): 5 + 6 + 9 + 10
        assert_eq!(integral.sum(1, 1, 2, 2), 30);
        assert_eq!(integral.sq_sum(1, 1, 2, 2), 25 + 36 + 81 + 100);
    }

    #[test]
    fn test_reject_all_cascade_finds_nothing() {
        let cascade = default_detector(constant_cascade(1.0));
        let gray = GrayImage::from_pixel(40, 40, Luma([128]));
        assert!(cascade.detect(&gray).is_empty());
    }

    #[test]
    fn test_accept_all_cascade_groups_into_one_region() {
        let cascade = default_detector(constant_cascade(-1.0));
        let gray = GrayImage::from_pixel(40, 40, Luma([128]));
        let faces = cascade.detect(&gray);
        assert_eq!(faces.len(), 1);
        assert!(faces[0].neighbors > DEFAULT_MIN_NEIGHBORS);
    }

    #[test]
    fn test_frame_smaller_than_window() {
        let cascade = default_detector(constant_cascade(-1.0));
        assert!(cascade.detect(&GrayImage::new(20, 40)).is_empty());
    }

    #[test]
    fn test_feature_windows_straddle_edge() {
        let cascade = HaarCascade::from_model(left_bright_cascade(), raw_params()).unwrap();
        let faces = cascade.detect(&split_image(200, 20));
        assert!(!faces.is_empty());
        for f in &faces {
            assert!(f.x < 32 && f.x + f.width > 32, "window {f:?} does not cross the edge");
        }
    }

    #[test]
    fn test_feature_polarity() {
        let cascade = HaarCascade::from_model(left_bright_cascade(), raw_params()).unwrap();
        assert!(cascade.detect(&split_image(20, 200)).is_empty());
    }

    #[test]
    fn test_group_rectangles_drops_weak_clusters() {
        let mut rects: Vec<BoundingBox> =
            (0..6).map(|i| BoundingBox::new(10 + i, 10, 30, 30)).collect();
        rects.push(BoundingBox::new(200, 200, 30, 30));
        let grouped = group_rectangles(rects, 4, GROUP_EPS);
        assert_eq!(grouped.len(), 1);
        let g = grouped[0];
        assert_eq!(g.neighbors, 6);
        // mean of 10..=15 is 12.5 → rounds to 13
        assert_eq!((g.x, g.y, g.width, g.height), (13, 10, 30, 30));
    }

    #[test]
    fn test_group_rectangles_zero_neighbors_passthrough() {
        let rects = vec![BoundingBox::new(0, 0, 5, 5), BoundingBox::new(1, 1, 5, 5)];
        assert_eq!(group_rectangles(rects.clone(), 0, GROUP_EPS), rects);
    }

    #[test]
    fn test_group_rectangles_removes_nested() {
        // A strong large cluster and a weaker small cluster inside it
        let mut rects: Vec<BoundingBox> =
            (0..10).map(|_| BoundingBox::new(0, 0, 100, 100)).collect();
        rects.extend((0..5).map(|_| BoundingBox::new(30, 30, 20, 20)));
        let grouped = group_rectangles(rects, 4, GROUP_EPS);
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].width, 100);
    }

    /// `left_bright_cascade` in the layout of OpenCV's stock cascade files.
    fn left_bright_xml(tilted: &str) -> String {
        format!(
            r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier"><stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>24</height>
  <width>24</width>
  <stageParams>
    <maxWeakCount>1</maxWeakCount></stageParams>
  <featureParams>
    <maxCatCount>0</maxCatCount></featureParams>
  <stageNum>1</stageNum>
  <stages>
    <!-- stage 0 -->
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>5.0000000000000000e-01</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 2.0000000298023224e-01</internalNodes>
          <leafValues>
            0. 1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          0 0 24 24 -1.</_>
        <_>
          0 0 12 24 2.</_></rects>{tilted}</_></features></cascade>
</opencv_storage>
"#
        )
    }

    #[test]
    fn test_parse_opencv_xml_layout() {
        let model = CascadeModel::from_opencv_xml(&left_bright_xml("")).unwrap();
        assert_eq!((model.window_width, model.window_height), (24, 24));
        assert_eq!(model.stages.len(), 1);
        assert_eq!(model.stages[0].threshold, 0.5);
        let stump = &model.stages[0].classifiers[0];
        assert_eq!(stump.feature, 0);
        assert!((stump.threshold - 0.2).abs() < 1e-6);
        assert_eq!((stump.left, stump.right), (0.0, 1.0));
        let rects = &model.features[0].rects;
        assert_eq!(rects.len(), 2);
        assert_eq!((rects[1].width, rects[1].height, rects[1].weight), (12, 24, 2.0));
        assert_eq!(rects[0].weight, -1.0);
    }

    #[test]
    fn test_load_opencv_xml_file_and_detect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CASCADE_FILE);
        std::fs::write(&path, left_bright_xml("")).unwrap();

        let cascade = HaarCascade::load(&path, raw_params()).unwrap();
        let faces = cascade.detect(&split_image(200, 20));
        assert!(!faces.is_empty());
        assert!(cascade.detect(&split_image(20, 200)).is_empty());
    }

    #[test]
    fn test_xml_rejects_tilted_features() {
        let xml = left_bright_xml("\n      <tilted>1</tilted>");
        assert!(matches!(CascadeModel::from_opencv_xml(&xml), Err(CascadeError::Invalid(_))));
    }

    #[test]
    fn test_xml_rejects_malformed_documents() {
        assert!(matches!(
            CascadeModel::from_opencv_xml("<opencv_storage><cascade>"),
            Err(CascadeError::Parse(_))
        ));
        assert!(matches!(
            CascadeModel::from_opencv_xml("<opencv_storage></opencv_storage>"),
            Err(CascadeError::Invalid(_))
        ));
        let bad_leaf = left_bright_xml("").replace("0. 1.", "0. one");
        assert!(matches!(CascadeModel::from_opencv_xml(&bad_leaf), Err(CascadeError::Invalid(_))));
    }

    #[test]
    fn test_dangling_feature_reference_is_invalid() {
        let xml = left_bright_xml("").replace("0 -1 0 2.0", "0 -1 3 2.0");
        let model = CascadeModel::from_opencv_xml(&xml).unwrap();
        assert!(matches!(
            HaarCascade::from_model(model, DetectionParams::default()),
            Err(CascadeError::Invalid(_))
        ));
    }

    #[test]
    fn test_to_luma_uses_bt601_weights() {
        let frame = RgbImage::from_fn(4, 1, |x, _| {
            image::Rgb(match x {
                0 => [255, 0, 0],
                1 => [0, 255, 0],
                2 => [0, 0, 255],
                _ => [255, 255, 255],
            })
        });
        let gray = to_luma(&frame);
        let values: Vec<u8> = gray.pixels().map(|p| p.0[0]).collect();
        assert_eq!(values, vec![76, 150, 29, 255]);
    }

    #[test]
    fn test_rejects_scale_factor_one() {
        let params = DetectionParams {
            scale_factor: 1.0,
            ..DetectionParams::default()
        };
        assert!(matches!(
            HaarCascade::from_model(constant_cascade(0.0), params),
            Err(CascadeError::Invalid(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let path = Path::new("/nonexistent/cascade.xml");
        let err = HaarCascade::load(path, DetectionParams::default());
        assert!(matches!(err, Err(CascadeError::NotFound(_))));
    }
}
