//! Face template store: one normalized image per enrolled person.
//!
//! Templates live in a single directory, one file per person, with the file
//! stem as the person's name. New templates are written as PNG so a saved
//! crop reloads bit-exact; any format the `image` crate decodes is accepted
//! on load.

use crate::detector::FaceDetector;
use crate::recognizer::crop_face;
use crate::types::{BoundingBox, Template, TEMPLATE_SIZE};
use crate::detector::to_luma;
use image::imageops::FilterType;
use image::{ImageFormat, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const TEMPLATE_EXTENSION: &str = "png";

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("a name is required")]
    MissingInput,
    #[error("invalid template name: {0:?}")]
    InvalidName(String),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("no usable images found in {0}")]
    EmptyStore(String),
    #[error("template I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Directory of per-person template images.
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    /// Open (and create if needed) the template directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, TemplateError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Detect a face in `frame` and store the first region as `name`'s template.
    ///
    /// Replaces any earlier template for the same name once the new file is
    /// in place. Nothing is written when no face is found.
    pub fn save(
        &self,
        name: &str,
        frame: &RgbImage,
        detector: &dyn FaceDetector,
    ) -> Result<BoundingBox, TemplateError> {
        let name = validate_name(name)?;

        let faces = detector.detect(&to_luma(frame));
        let region = faces.first().ok_or(TemplateError::NoFaceDetected)?;
        let crop = crop_face(frame, region, TEMPLATE_SIZE).ok_or(TemplateError::NoFaceDetected)?;

        let path = self.dir.join(format!("{name}.{TEMPLATE_EXTENSION}"));
        let staging = self.dir.join(format!(".{name}.{TEMPLATE_EXTENSION}.tmp"));
        let written = crop
            .save_with_format(&staging, ImageFormat::Png)
            .map_err(TemplateError::from)
            .and_then(|()| fs::rename(&staging, &path).map_err(TemplateError::from));
        if let Err(e) = written {
            let _ = fs::remove_file(&staging);
            return Err(e);
        }
        self.remove_existing(name, &path)?;

        tracing::info!(
            name,
            path = %path.display(),
            region = ?(region.x, region.y, region.width, region.height),
            "template saved"
        );
        Ok(*region)
    }

    /// Decode every template in file-name order, resized to the template size.
    ///
    /// Files that fail to decode are skipped. An empty result is reported as
    /// [`TemplateError::EmptyStore`].
    pub fn load_all(&self) -> Result<Vec<Template>, TemplateError> {
        let mut templates = Vec::new();

        for path in self.files()? {
            let Some(name) = stem(&path) else {
                continue;
            };
            let image = match image::open(&path) {
                Ok(img) => img.to_rgb8(),
                Err(e) => {
                    tracing::debug!(
                        path = %path.display(),
                        error = %e,
                        "skipping undecodable template"
                    );
                    continue;
                }
            };
            let image = if image.dimensions() == (TEMPLATE_SIZE, TEMPLATE_SIZE) {
                image
            } else {
                image::imageops::resize(&image, TEMPLATE_SIZE, TEMPLATE_SIZE, FilterType::Triangle)
            };
            templates.push(Template { name, image });
        }

        if templates.is_empty() {
            return Err(TemplateError::EmptyStore(self.dir.display().to_string()));
        }

        tracing::debug!(count = templates.len(), "templates loaded");
        Ok(templates)
    }

    /// Enrolled names (file stems) without decoding the images.
    pub fn names(&self) -> Result<Vec<String>, TemplateError> {
        Ok(self.files()?.iter().filter_map(|p| stem(p)).collect())
    }

    /// Regular files with an image extension, sorted by file name.
    fn files(&self) -> Result<Vec<PathBuf>, TemplateError> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() && ImageFormat::from_path(entry.path()).is_ok() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Delete templates for `name` stored under any extension but `keep`'s.
    fn remove_existing(&self, name: &str, keep: &Path) -> Result<(), TemplateError> {
        for path in self.files()? {
            if path != keep && stem(&path).as_deref() == Some(name) {
                fs::remove_file(&path)?;
                tracing::debug!(path = %path.display(), "replaced existing template");
            }
        }
        Ok(())
    }
}

fn stem(path: &Path) -> Option<String> {
    path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
}

/// Names become file stems, so they must be non-empty single path components.
fn validate_name(name: &str) -> Result<&str, TemplateError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(TemplateError::MissingInput);
    }
    if trimmed.contains(['/', '\\', '\0']) || trimmed.contains("..") {
        return Err(TemplateError::InvalidName(name.to_string()));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Rgb};

    struct FixedDetector(Vec<BoundingBox>);

    impl FaceDetector for FixedDetector {
        fn detect(&self, _gray: &GrayImage) -> Vec<BoundingBox> {
            self.0.clone()
        }
    }

    fn frame() -> RgbImage {
        RgbImage::from_fn(320, 240, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 90]))
    }

    fn one_face() -> FixedDetector {
        FixedDetector(vec![BoundingBox::new(40, 30, 120, 120), BoundingBox::new(200, 50, 60, 60)])
    }

    #[test]
    fn test_save_then_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = TemplateStore::open(dir.path().join("faces")).unwrap();

        let region = store.save("bob", &frame(), &one_face()).unwrap();
        assert_eq!((region.x, region.y), (40, 30));

        let templates = store.load_all().unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].name, "bob");
        assert_eq!(templates[0].image.dimensions(), (TEMPLATE_SIZE, TEMPLATE_SIZE));

        let expected = crop_face(&frame(), &region, TEMPLATE_SIZE).unwrap();
        assert_eq!(templates[0].image, expected);
    }

    #[test]
    fn test_no_face_leaves_directory_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = TemplateStore::open(dir.path()).unwrap();

        let err = store.save("bob", &frame(), &FixedDetector(vec![])).unwrap_err();
        assert!(matches!(err, TemplateError::NoFaceDetected));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_resave_overwrites_other_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let store = TemplateStore::open(dir.path()).unwrap();
        RgbImage::from_pixel(50, 50, Rgb([1, 2, 3]))
            .save(dir.path().join("bob.jpg"))
            .unwrap();

        store.save("bob", &frame(), &one_face()).unwrap();

        assert_eq!(store.names().unwrap(), vec!["bob".to_string()]);
        assert!(dir.path().join("bob.png").exists());
        assert!(!dir.path().join("bob.jpg").exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_failed_write_keeps_previous_template() {
        let dir = tempfile::tempdir().unwrap();
        let store = TemplateStore::open(dir.path()).unwrap();
        RgbImage::from_pixel(50, 50, Rgb([1, 2, 3]))
            .save(dir.path().join("bob.jpg"))
            .unwrap();
        // A directory squatting on the target path makes the final rename fail.
        fs::create_dir(dir.path().join("bob.png")).unwrap();

        let err = store.save("bob", &frame(), &one_face()).unwrap_err();
        assert!(matches!(err, TemplateError::Io(_)));
        assert!(dir.path().join("bob.jpg").exists());
        assert!(!dir.path().join(".bob.png.tmp").exists());
        assert_eq!(store.names().unwrap(), vec!["bob".to_string()]);
    }

    #[test]
    fn test_names_lists_only_image_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = TemplateStore::open(dir.path()).unwrap();
        fs::write(dir.path().join("notes.txt"), b"not an image").unwrap();
        fs::write(dir.path().join("README"), b"faces live here").unwrap();
        RgbImage::from_pixel(10, 10, Rgb([7, 7, 7]))
            .save(dir.path().join("dave.png"))
            .unwrap();

        assert_eq!(store.names().unwrap(), vec!["dave".to_string()]);
    }

    #[test]
    fn test_save_detects_on_bt601_luma() {
        struct LumaCheck;
        impl FaceDetector for LumaCheck {
            fn detect(&self, gray: &GrayImage) -> Vec<BoundingBox> {
                // Pure red is 76 under BT.601 and 54 under Rec.709.
                assert_eq!(gray.get_pixel(0, 0).0[0], 76);
                vec![BoundingBox::new(0, 0, 20, 20)]
            }
        }
        let dir = tempfile::tempdir().unwrap();
        let store = TemplateStore::open(dir.path()).unwrap();
        let red = RgbImage::from_pixel(40, 40, Rgb([255, 0, 0]));
        store.save("erin", &red, &LumaCheck).unwrap();
    }

    #[test]
    fn test_load_skips_undecodable_and_resizes() {
        let dir = tempfile::tempdir().unwrap();
        let store = TemplateStore::open(dir.path()).unwrap();
        fs::write(dir.path().join("notes.txt"), b"not an image").unwrap();
        RgbImage::from_pixel(40, 60, Rgb([9, 9, 9]))
            .save(dir.path().join("carol.png"))
            .unwrap();
        RgbImage::from_pixel(100, 100, Rgb([5, 5, 5]))
            .save(dir.path().join("alice.png"))
            .unwrap();

        let templates = store.load_all().unwrap();
        let names: Vec<&str> = templates.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["alice", "carol"]);
        assert!(templates.iter().all(|t| t.image.dimensions() == (TEMPLATE_SIZE, TEMPLATE_SIZE)));
    }

    #[test]
    fn test_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = TemplateStore::open(dir.path()).unwrap();
        assert!(matches!(store.load_all(), Err(TemplateError::EmptyStore(_))));
    }

    #[test]
    fn test_name_validation() {
        let dir = tempfile::tempdir().unwrap();
        let store = TemplateStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.save("   ", &frame(), &one_face()),
            Err(TemplateError::MissingInput)
        ));
        assert!(matches!(
            store.save("../evil", &frame(), &one_face()),
            Err(TemplateError::InvalidName(_))
        ));
        assert!(matches!(
            store.save("a/b", &frame(), &one_face()),
            Err(TemplateError::InvalidName(_))
        ));
        assert!(matches!(
            store.save("..", &frame(), &one_face()),
            Err(TemplateError::InvalidName(_))
        ));
        assert!(matches!(
            store.save("nul\0byte", &frame(), &one_face()),
            Err(TemplateError::InvalidName(_))
        ));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        // Only separators, `..` and NUL are refused; a leading dot is a valid stem.
        store.save(".frank", &frame(), &one_face()).unwrap();
        assert_eq!(store.names().unwrap(), vec![".frank".to_string()]);
    }
}
