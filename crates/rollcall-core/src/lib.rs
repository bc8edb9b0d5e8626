//! rollcall-core: Face detection and matching engine.
//!
//! Detects faces with a classical Haar-feature cascade, keeps one 100×100
//! template image per enrolled person, and matches live crops against the
//! templates by mean absolute pixel difference.

pub mod detector;
pub mod recognizer;
pub mod templates;
pub mod types;

pub use detector::{
    to_luma, CascadeError, CascadeModel, DetectionParams, FaceDetector, HaarCascade,
};
pub use recognizer::{FaceRecognizer, Recognition};
pub use templates::{TemplateError, TemplateStore};
pub use types::{BoundingBox, MatchPolicy, MatchResult, Matcher, PixelDiffMatcher, Template};
