use serde::{Deserialize, Serialize};

use crate::layout::MAX_KEYS;

// no default values and no aliases, everything is required.
// `Config::default()` is only used when config.json is missing or invalid.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Config {
    pub render: RenderConfig,
    pub playback: PlaybackConfig,
    pub performance: PerformanceConfig,
    pub window: WindowConfig,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RenderConfig {
    /// Look-ahead in seconds covered by the full height of the note area.
    pub time_window: f64,
    /// Note outline thickness in normalized screen widths.
    pub note_border_width: f64,
    pub batch_capacity: usize,
    pub first_key: usize,
    pub last_key: usize,
    pub background_rgba: [f64; 4],
    /// Notes longer than this are skipped. `null` renders everything.
    pub max_note_length_seconds: Option<f64>,
}

// no default values and no aliases, everything is required.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PlaybackConfig {
    pub speed: f64,
    pub seek_step_seconds: f64,
    pub lead_in_seconds: f64,
    pub start_paused: bool,
}

// no default values and no aliases, everything is required.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PerformanceConfig {
    pub msaa_samples: u32,
    pub fps_limiter: f64,
    pub prefer_vrr: bool,
    /// Size of the per-key worker pool. 0 uses the available hardware parallelism.
    pub worker_threads: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            render: RenderConfig::default(),
            playback: PlaybackConfig {
                speed: 1.0,
                seek_step_seconds: 5.0,
                lead_in_seconds: 1.0,
                start_paused: false,
            },
            performance: PerformanceConfig {
                msaa_samples: 4,
                fps_limiter: 240.0,
                prefer_vrr: true,
                worker_threads: 0,
            },
            window: WindowConfig {
                width: 1280,
                height: 720,
            },
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            time_window: 0.3,
            note_border_width: 0.0015,
            batch_capacity: 1024,
            first_key: 0,
            last_key: 128,
            background_rgba: [0.0, 0.0, 0.0, 0.6],
            max_note_length_seconds: None,
        }
    }
}

impl RenderConfig {
    /// Returns a copy that the renderer can use without further checks.
    pub fn sanitized(&self) -> RenderConfig {
        let defaults = RenderConfig::default();
        let time_window = if self.time_window.is_finite() && self.time_window > 0.0 {
            self.time_window
        } else {
            defaults.time_window
        };
        let note_border_width = if self.note_border_width.is_finite() {
            self.note_border_width.max(0.0)
        } else {
            defaults.note_border_width
        };
        let last_key = self.last_key.min(MAX_KEYS);
        let first_key = self.first_key.min(last_key);
        let max_note_length_seconds = self
            .max_note_length_seconds
            .filter(|max| max.is_finite() && *max > 0.0);

        RenderConfig {
            time_window,
            note_border_width,
            batch_capacity: self.batch_capacity.max(1),
            first_key,
            last_key,
            background_rgba: self.background_rgba,
            max_note_length_seconds,
        }
    }

    pub fn background_color(&self) -> wgpu::Color {
        wgpu::Color {
            r: (self.background_rgba[0] / 255.0).clamp(0.0, 1.0),
            g: (self.background_rgba[1] / 255.0).clamp(0.0, 1.0),
            b: (self.background_rgba[2] / 255.0).clamp(0.0, 1.0),
            a: self.background_rgba[3].clamp(0.0, 1.0),
        }
    }
}
