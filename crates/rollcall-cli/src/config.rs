use rollcall_core::detector::{
    DEFAULT_CASCADE_FILE, DEFAULT_MIN_NEIGHBORS, DEFAULT_SCALE_FACTOR, SYSTEM_CASCADE_DIRS,
};
use rollcall_core::types::DEFAULT_MATCH_THRESHOLD;
use rollcall_core::{DetectionParams, MatchPolicy, PixelDiffMatcher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const CONFIG_FILE: &str = "rollcall.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Application configuration: TOML file, then `ROLLCALL_*` overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root for the credential database, templates, attendance log and log file.
    pub data_dir: PathBuf,
    /// V4L2 device path.
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Frames discarded after the stream starts (auto-exposure settling).
    pub warmup_frames: usize,
    /// OpenCV Haar cascade XML. Defaults to `<data_dir>/haarcascade_frontalface_default.xml`,
    /// then to the copy an installed OpenCV package ships.
    pub cascade_path: Option<PathBuf>,
    pub scale_factor: f32,
    pub min_neighbors: u32,
    /// Mean absolute pixel difference below which a face matches a template.
    pub match_threshold: f32,
    pub match_policy: MatchPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            camera_device: "/dev/video0".to_string(),
            camera_width: 640,
            camera_height: 480,
            warmup_frames: 4,
            cascade_path: None,
            scale_factor: DEFAULT_SCALE_FACTOR,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            match_policy: MatchPolicy::First,
        }
    }
}

impl Config {
    /// Resolve and load the configuration.
    ///
    /// File lookup: `explicit`, then `ROLLCALL_CONFIG`, then
    /// `<default data dir>/rollcall.toml` if present; otherwise defaults.
    /// Environment overrides are applied next, then `data_dir_override`.
    pub fn load(
        explicit: Option<&Path>,
        data_dir_override: Option<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("ROLLCALL_CONFIG").ok().map(PathBuf::from))
            .or_else(|| {
                let candidate = default_data_dir().join(CONFIG_FILE);
                candidate.exists().then_some(candidate)
            });

        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                })?;
                Self::from_toml_str(&contents)?
            }
            None => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        if let Some(dir) = data_dir_override {
            config.data_dir = dir;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply `ROLLCALL_*` overrides from `lookup`. Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("ROLLCALL_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(device) = lookup("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = device;
        }
        if let Some(path) = lookup("ROLLCALL_CASCADE_PATH") {
            self.cascade_path = Some(PathBuf::from(path));
        }
        if let Some(threshold) = lookup("ROLLCALL_MATCH_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.match_threshold = threshold;
        }
        match lookup("ROLLCALL_MATCH_POLICY").as_deref() {
            Some("first") => self.match_policy = MatchPolicy::First,
            Some("best") => self.match_policy = MatchPolicy::Best,
            _ => {}
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera_width == 0 || self.camera_width > 4096 {
            return Err(ConfigError::Invalid(format!(
                "camera width must be between 1 and 4096, got {}",
                self.camera_width
            )));
        }
        if self.camera_height == 0 || self.camera_height > 4096 {
            return Err(ConfigError::Invalid(format!(
                "camera height must be between 1 and 4096, got {}",
                self.camera_height
            )));
        }
        if !(self.scale_factor > 1.0 && self.scale_factor <= 2.0) {
            return Err(ConfigError::Invalid(format!(
                "scale factor must be in (1.0, 2.0], got {}",
                self.scale_factor
            )));
        }
        if !(self.match_threshold > 0.0 && self.match_threshold <= 255.0) {
            return Err(ConfigError::Invalid(format!(
                "match threshold must be in (0, 255], got {}",
                self.match_threshold
            )));
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("admin_users.db")
    }

    pub fn faces_dir(&self) -> PathBuf {
        self.data_dir.join("faces")
    }

    pub fn attendance_path(&self) -> PathBuf {
        self.data_dir.join("attendance.csv")
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("rollcall.log")
    }

    pub fn cascade_path(&self) -> PathBuf {
        let system: Vec<&Path> = SYSTEM_CASCADE_DIRS.iter().map(Path::new).collect();
        self.cascade_path_in(&system)
    }

    /// Configured path, else the first existing default among the data
    /// directory and `system_dirs`, else the data directory location.
    fn cascade_path_in(&self, system_dirs: &[&Path]) -> PathBuf {
        if let Some(path) = &self.cascade_path {
            return path.clone();
        }
        let local = self.data_dir.join(DEFAULT_CASCADE_FILE);
        if local.exists() {
            return local;
        }
        system_dirs
            .iter()
            .map(|dir| dir.join(DEFAULT_CASCADE_FILE))
            .find(|path| path.exists())
            .unwrap_or(local)
    }

    pub fn detection_params(&self) -> DetectionParams {
        DetectionParams {
            scale_factor: self.scale_factor,
            min_neighbors: self.min_neighbors,
            min_size: None,
        }
    }

    pub fn matcher(&self) -> PixelDiffMatcher {
        PixelDiffMatcher {
            threshold: self.match_threshold,
            policy: self.match_policy,
        }
    }
}

/// `$XDG_DATA_HOME/rollcall`, falling back to `~/.local/share/rollcall`.
fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}
