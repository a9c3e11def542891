//! Runtime Settings
//!
//! Settings the user can change while the client runs. They are persisted
//! under the `settings` key; fields missing from a stored value keep their
//! defaults, so older snapshots load cleanly.

use serde::{Deserialize, Serialize};

use crate::backend::RequestOptions;

/// Image limits for multimodal messages
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MultimodalSettings {
    /// Largest accepted image in KiB
    pub max_image_size: u32,
    /// Accepted MIME types
    pub allowed_formats: Vec<String>,
    /// Images per message
    pub max_images: usize,
    /// Show previews before sending
    pub enable_image_preview: bool,
    /// Recompress large images
    pub compress_images: bool,
    /// Recompression quality (0-1)
    pub image_quality: f32,
}

impl Default for MultimodalSettings {
    fn default() -> Self {
        Self {
            max_image_size: 5120,
            allowed_formats: ["image/jpeg", "image/png", "image/webp", "image/gif"]
                .map(String::from)
                .to_vec(),
            max_images: 5,
            enable_image_preview: true,
            compress_images: true,
            image_quality: 0.8,
        }
    }
}

/// User-adjustable runtime settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Model selected at startup; empty for "first available"
    pub default_model: String,
    /// Sampling options sent with every chat
    pub default_options: RequestOptions,
    /// Write conversations through to storage on every mutation
    pub auto_save: bool,
    /// Show per-response metrics
    pub show_metrics: bool,
    /// Reconnect automatically after losing the service
    pub auto_reconnect: bool,
    /// Run periodic health checks
    pub health_check: bool,
    /// Conversations idle longer than this many days are removed
    pub cleanup_days: u32,
    /// Ask thinking-capable models for their reasoning trace
    pub enable_thinking: bool,
    /// Image limits
    pub multimodal: MultimodalSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_model: String::new(),
            default_options: RequestOptions {
                temperature: Some(0.7),
                top_k: Some(40),
                top_p: Some(0.9),
                num_predict: Some(2048),
                ..RequestOptions::default()
            },
            auto_save: true,
            show_metrics: true,
            auto_reconnect: true,
            health_check: true,
            cleanup_days: 30,
            enable_thinking: false,
            multimodal: MultimodalSettings::default(),
        }
    }
}

const MS_PER_DAY: u64 = 24 * 60 * 60 * 1000;

impl Settings {
    /// Retention window in milliseconds. Zero days falls back to 30.
    #[must_use]
    pub fn max_age_ms(&self) -> u64 {
        let days = if self.cleanup_days == 0 {
            30
        } else {
            self.cleanup_days
        };
        u64::from(days) * MS_PER_DAY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.cleanup_days, 30);
        assert!(settings.auto_reconnect);
        assert!(!settings.enable_thinking);
        assert_eq!(settings.default_options.top_k, Some(40));
        assert_eq!(settings.multimodal.max_images, 5);
        assert_eq!(settings.max_age_ms(), 30 * MS_PER_DAY);
    }

    #[test]
    fn test_partial_snapshot_merges_over_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"defaultModel":"qwen3","cleanupDays":7}"#).unwrap();
        assert_eq!(settings.default_model, "qwen3");
        assert_eq!(settings.cleanup_days, 7);
        assert!(settings.health_check);
        assert_eq!(settings.multimodal, MultimodalSettings::default());
    }

    #[test]
    fn test_zero_cleanup_days_uses_default_window() {
        let settings = Settings {
            cleanup_days: 0,
            ..Settings::default()
        };
        assert_eq!(settings.max_age_ms(), 30 * MS_PER_DAY);
    }
}
