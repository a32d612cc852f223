use docent_core::recognizer::{DEFAULT_API_BASE, DEFAULT_MODEL};
use docent_core::{Catalog, CatalogError};
use docent_hw::pipeline::DEFAULT_JPEG_QUALITY;
use docent_hw::Resolution;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("API_KEY is not set; export your Gemini API key before starting the guide")]
    MissingApiKey,
}

/// Guide configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Gemini API key (`API_KEY`). Required for recognition.
    api_key: Option<String>,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Requested capture size; the camera may deliver another.
    pub capture_width: u32,
    pub capture_height: u32,
    /// JPEG quality for uploaded snapshots (1–100).
    pub jpeg_quality: u8,
    /// Frames dropped at the start of each snapshot (AGC/AE stabilization).
    pub warmup_frames: usize,
    pub model: String,
    pub api_base: String,
    /// Catalog TOML; the embedded catalog when unset.
    pub catalog_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from `API_KEY` and `DOCENT_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Resolution::default();
        Self {
            api_key: var("API_KEY")
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty()),
            camera_device: var("DOCENT_CAMERA_DEVICE").unwrap_or_else(|| "/dev/video0".to_string()),
            capture_width: parse_or(&var, "DOCENT_CAPTURE_WIDTH", defaults.width),
            capture_height: parse_or(&var, "DOCENT_CAPTURE_HEIGHT", defaults.height),
            jpeg_quality: parse_or(&var, "DOCENT_JPEG_QUALITY", DEFAULT_JPEG_QUALITY).clamp(1, 100),
            warmup_frames: parse_or(&var, "DOCENT_WARMUP_FRAMES", 2),
            model: var("DOCENT_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_base: var("DOCENT_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            catalog_path: var("DOCENT_CATALOG").map(PathBuf::from),
        }
    }

    /// The API key, or a configuration error when it is missing.
    pub fn api_key(&self) -> Result<&str, ConfigError> {
        self.api_key.as_deref().ok_or(ConfigError::MissingApiKey)
    }

    pub fn resolution(&self) -> Resolution {
        Resolution {
            width: self.capture_width,
            height: self.capture_height,
        }
    }

    /// Load the configured catalog, or the embedded one.
    pub fn load_catalog(&self) -> Result<Catalog, CatalogError> {
        match &self.catalog_path {
            Some(path) => Catalog::load(path),
            None => Ok(Catalog::builtin().clone()),
        }
    }
}

fn parse_or<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match var(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[]);
        assert_eq!(c.camera_device, "/dev/video0");
        assert_eq!(c.resolution(), Resolution { width: 1280, height: 720 });
        assert_eq!(c.jpeg_quality, 60);
        assert_eq!(c.model, "gemini-2.5-flash");
        assert!(c.api_base.starts_with("https://generativelanguage.googleapis.com"));
        assert!(c.catalog_path.is_none());
    }

    #[test]
    fn test_missing_api_key_fails_fast() {
        assert_eq!(config(&[]).api_key(), Err(ConfigError::MissingApiKey));
        assert_eq!(
            config(&[("API_KEY", "   ")]).api_key(),
            Err(ConfigError::MissingApiKey)
        );
        assert_eq!(config(&[("API_KEY", " abc ")]).api_key(), Ok("abc"));
    }

    #[test]
    fn test_overrides() {
        let c = config(&[
            ("DOCENT_CAMERA_DEVICE", "/dev/video4"),
            ("DOCENT_CAPTURE_WIDTH", "640"),
            ("DOCENT_CAPTURE_HEIGHT", "480"),
            ("DOCENT_JPEG_QUALITY", "250"),
            ("DOCENT_WARMUP_FRAMES", "0"),
            ("DOCENT_MODEL", "gemini-2.0-flash"),
        ]);
        assert_eq!(c.camera_device, "/dev/video4");
        assert_eq!(c.resolution(), Resolution { width: 640, height: 480 });
        // 250 does not fit in u8, so the default applies.
        assert_eq!(c.jpeg_quality, 60);
        assert_eq!(c.warmup_frames, 0);
        assert_eq!(c.model, "gemini-2.0-flash");
    }

    #[test]
    fn test_bad_numbers_use_defaults() {
        let c = config(&[("DOCENT_CAPTURE_WIDTH", "wide"), ("DOCENT_JPEG_QUALITY", "0")]);
        assert_eq!(c.capture_width, 1280);
        assert_eq!(c.jpeg_quality, 1);
    }

    #[test]
    fn test_builtin_catalog_by_default() {
        let catalog = config(&[]).load_catalog().unwrap();
        assert!(catalog.contains("campana-1920"));
    }

    #[test]
    fn test_missing_catalog_file() {
        let c = config(&[("DOCENT_CATALOG", "/nonexistent/catalog.toml")]);
        assert!(c.load_catalog().is_err());
    }
}
