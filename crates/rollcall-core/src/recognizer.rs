//! Per-frame recognition: detect faces, crop and normalize each region,
//! and match it against the template gallery.

use crate::detector::{to_luma, FaceDetector};
use crate::types::{BoundingBox, MatchResult, Matcher, Template, TEMPLATE_SIZE};
use image::imageops::FilterType;
use image::RgbImage;

/// One detected face and its match outcome.
#[derive(Debug, Clone)]
pub struct Recognition {
    pub region: BoundingBox,
    pub result: MatchResult,
}

impl Recognition {
    /// Name of the matched template, if any.
    pub fn name(&self) -> Option<&str> {
        self.result.name.as_deref()
    }
}

/// Detector + matcher + gallery, borrowed for the duration of a recognition loop.
pub struct FaceRecognizer<'a> {
    detector: &'a dyn FaceDetector,
    matcher: &'a dyn Matcher,
    gallery: Vec<Template>,
}

impl<'a> FaceRecognizer<'a> {
    pub fn new(
        detector: &'a dyn FaceDetector,
        matcher: &'a dyn Matcher,
        gallery: Vec<Template>,
    ) -> Self {
        Self {
            detector,
            matcher,
            gallery,
        }
    }

    pub fn gallery(&self) -> &[Template] {
        &self.gallery
    }

    /// Detect every face in `frame` and match each one independently.
    pub fn recognize(&self, frame: &RgbImage) -> Vec<Recognition> {
        let regions = self.detector.detect(&to_luma(frame));

        regions
            .into_iter()
            .filter_map(|region| {
                let crop = crop_face(frame, &region, TEMPLATE_SIZE)?;
                let result = self.matcher.compare(&crop, &self.gallery);
                tracing::debug!(
                    region = ?(region.x, region.y, region.width, region.height),
                    matched = result.matched,
                    difference = result.difference,
                    name = result.name.as_deref().unwrap_or(""),
                    "face compared"
                );
                Some(Recognition { region, result })
            })
            .collect()
    }
}

/// Crop `region` out of `frame` and resize it to `size`×`size` (bilinear).
///
/// `None` when the region lies entirely outside the frame.
pub fn crop_face(frame: &RgbImage, region: &BoundingBox, size: u32) -> Option<RgbImage> {
    let r = region.clamp_to(frame.width(), frame.height())?;
    let crop = image::imageops::crop_imm(frame, r.x, r.y, r.width, r.height).to_image();
    Some(image::imageops::resize(&crop, size, size, FilterType::Triangle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PixelDiffMatcher;
    use image::{GrayImage, Rgb};

    struct FixedDetector(Vec<BoundingBox>);

    impl FaceDetector for FixedDetector {
        fn detect(&self, _gray: &GrayImage) -> Vec<BoundingBox> {
            self.0.clone()
        }
    }

    /// Left half of the frame is dark, right half bright.
    fn frame() -> RgbImage {
        RgbImage::from_fn(200, 100, |x, _| {
            if x < 100 {
                Rgb([30, 30, 30])
            } else {
                Rgb([220, 220, 220])
            }
        })
    }

    fn gallery() -> Vec<Template> {
        vec![
            Template {
                name: "dark".into(),
                image: RgbImage::from_pixel(TEMPLATE_SIZE, TEMPLATE_SIZE, Rgb([30, 30, 30])),
            },
            Template {
                name: "bright".into(),
                image: RgbImage::from_pixel(TEMPLATE_SIZE, TEMPLATE_SIZE, Rgb([220, 220, 220])),
            },
        ]
    }

    #[test]
    fn test_crop_face_resizes() {
        let crop = crop_face(&frame(), &BoundingBox::new(10, 10, 40, 60), TEMPLATE_SIZE).unwrap();
        assert_eq!(crop.dimensions(), (TEMPLATE_SIZE, TEMPLATE_SIZE));
        assert!(crop.pixels().all(|p| p.0 == [30, 30, 30]));
    }

    #[test]
    fn test_crop_face_outside_frame() {
        assert!(crop_face(&frame(), &BoundingBox::new(500, 0, 10, 10), TEMPLATE_SIZE).is_none());
    }

    #[test]
    fn test_recognize_each_region_independently() {
        let detector = FixedDetector(vec![
            BoundingBox::new(120, 10, 50, 50),
            BoundingBox::new(10, 10, 50, 50),
        ]);
        let matcher = PixelDiffMatcher::default();
        let recognizer = FaceRecognizer::new(&detector, &matcher, gallery());

        let found = recognizer.recognize(&frame());
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].name(), Some("bright"));
        assert_eq!(found[1].name(), Some("dark"));
        assert_eq!(found[1].region, BoundingBox::new(10, 10, 50, 50));
    }

    #[test]
    fn test_unmatched_region_is_unlabeled() {
        // A region straddling both halves differs from both templates by ~95
        let detector = FixedDetector(vec![BoundingBox::new(50, 0, 100, 100)]);
        let matcher = PixelDiffMatcher::default();
        let recognizer = FaceRecognizer::new(&detector, &matcher, gallery());

        let found = recognizer.recognize(&frame());
        assert_eq!(found.len(), 1);
        assert!(!found[0].result.matched);
        assert_eq!(found[0].name(), None);
    }

    #[test]
    fn test_no_faces() {
        let detector = FixedDetector(vec![]);
        let matcher = PixelDiffMatcher::default();
        let recognizer = FaceRecognizer::new(&detector, &matcher, gallery());
        assert!(recognizer.recognize(&frame()).is_empty());
        assert_eq!(recognizer.gallery().len(), 2);
    }

    #[test]
    fn test_detector_sees_bt601_luma() {
        struct GreenCheck;
        impl FaceDetector for GreenCheck {
            fn detect(&self, gray: &GrayImage) -> Vec<BoundingBox> {
                // Pure green is 150 under BT.601 and 182 under Rec.709.
                assert!(gray.pixels().all(|p| p.0[0] == 150));
                Vec::new()
            }
        }
        let matcher = PixelDiffMatcher::default();
        let recognizer = FaceRecognizer::new(&GreenCheck, &matcher, gallery());
        let green = RgbImage::from_pixel(32, 32, Rgb([0, 255, 0]));
        assert!(recognizer.recognize(&green).is_empty());
    }
}
