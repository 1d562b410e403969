//! Project files: pages of layers plus the audio sources and export settings.
//!
//! ```json
//! {
//!   "settings": { "width": 1280, "height": 720, "fps": 30, "codec": "h264" },
//!   "audioSources": ["music/bed.mp3"],
//!   "pages": [
//!     { "duration": 3.0, "background": "#101820",
//!       "layers": [{ "type": "image", "source": "photo.jpg", "x": 0, "y": 0,
//!                    "width": 1280, "height": 720, "fadeIn": 0.5 }] }
//!   ]
//! }
//! ```

use crate::audio::source::AudioSource;
use crate::encode::config::VideoCodec;
use crate::foundation::core::{Fps, FrameIndex, Rgba8};
use crate::foundation::error::{ExportError, ExportResult};

/// Output settings of an export.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportSettings {
    /// Output width in pixels (even).
    pub width: u32,
    /// Output height in pixels (even).
    pub height: u32,
    /// Output frame rate.
    pub fps: Fps,
    /// Output video codec.
    pub codec: VideoCodec,
    /// Target video bitrate in bits per second.
    pub bitrate: u64,
    /// Mix and encode the project's audio sources.
    pub audio: bool,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: Fps { num: 30, den: 1 },
            codec: VideoCodec::H264,
            bitrate: 5_000_000,
            audio: true,
        }
    }
}

/// A whole project: pages played back to back.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(default)]
    pub settings: ExportSettings,
    #[serde(default)]
    pub audio_sources: Vec<AudioSource>,
    pub pages: Vec<Page>,
}

/// One page of the timeline.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    /// Page length in seconds.
    pub duration: f64,
    #[serde(default = "default_background")]
    pub background: Rgba8,
    /// Layers, bottom first.
    #[serde(default)]
    pub layers: Vec<Layer>,
}

fn default_background() -> Rgba8 {
    Rgba8::BLACK
}

/// Largest layer size, as a multiple of the export size on the same axis.
const MAX_LAYER_SCALE: f64 = 4.0;

fn default_opacity() -> f64 {
    1.0
}

/// A rectangle placed on a page, in output pixels.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    #[serde(flatten)]
    pub content: LayerContent,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    /// Fade-in length in seconds, from `start`.
    #[serde(default)]
    pub fade_in: f64,
    /// Fade-out length in seconds, ending at `end` (or the page end).
    #[serde(default)]
    pub fade_out: f64,
    /// Page-local time the layer appears, in seconds.
    #[serde(default)]
    pub start: f64,
    /// Page-local time the layer disappears; defaults to the end of the page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<f64>,
}

/// What a layer draws.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LayerContent {
    /// A flat color.
    Solid { color: Rgba8 },
    /// An image file, stretched to the layer rectangle.
    Image { source: String },
}

impl Layer {
    /// Effective opacity at page-local time `t` on a page lasting `page_duration` seconds.
    pub fn opacity_at(&self, t: f64, page_duration: f64) -> f64 {
        let end = self.end.unwrap_or(page_duration).min(page_duration);
        if t < self.start || t >= end {
            return 0.0;
        }
        let mut alpha = self.opacity.clamp(0.0, 1.0);
        if self.fade_in > 0.0 {
            alpha *= ((t - self.start) / self.fade_in).min(1.0);
        }
        if self.fade_out > 0.0 {
            alpha *= ((end - t) / self.fade_out).min(1.0);
        }
        alpha.clamp(0.0, 1.0)
    }

    fn validate(&self, canvas_width: u32, canvas_height: u32) -> ExportResult<()> {
        let finite = [
            self.x,
            self.y,
            self.width,
            self.height,
            self.opacity,
            self.fade_in,
            self.fade_out,
            self.start,
        ];
        if finite.iter().any(|v| !v.is_finite()) || self.end.is_some_and(|e| !e.is_finite()) {
            return Err(ExportError::validation("layer values must be finite"));
        }
        if self.width < 0.0 || self.height < 0.0 {
            return Err(ExportError::validation("layer width/height must be >= 0"));
        }
        if self.width > f64::from(canvas_width) * MAX_LAYER_SCALE
            || self.height > f64::from(canvas_height) * MAX_LAYER_SCALE
        {
            return Err(ExportError::validation(format!(
                "layer {}x{} exceeds {MAX_LAYER_SCALE}x the export size",
                self.width, self.height
            )));
        }
        if !(0.0..=1.0).contains(&self.opacity) {
            return Err(ExportError::validation("layer opacity must be in [0, 1]"));
        }
        if self.fade_in < 0.0 || self.fade_out < 0.0 || self.start < 0.0 {
            return Err(ExportError::validation(
                "layer fadeIn/fadeOut/start must be >= 0",
            ));
        }
        if let Some(end) = self.end
            && end <= self.start
        {
            return Err(ExportError::validation("layer end must be after its start"));
        }
        if let LayerContent::Image { source } = &self.content
            && source.trim().is_empty()
        {
            return Err(ExportError::validation("image layer source must not be empty"));
        }
        Ok(())
    }
}

impl Project {
    /// Parse a project from JSON and validate it.
    pub fn from_json(text: &str) -> ExportResult<Self> {
        let project: Self = serde_json::from_str(text)
            .map_err(|e| ExportError::validation(format!("invalid project JSON: {e}")))?;
        project.validate()?;
        Ok(project)
    }

    pub fn validate(&self) -> ExportResult<()> {
        let s = &self.settings;
        if s.width == 0 || s.height == 0 {
            return Err(ExportError::validation("export width/height must be > 0"));
        }
        if !s.width.is_multiple_of(2) || !s.height.is_multiple_of(2) {
            return Err(ExportError::validation("export width/height must be even"));
        }
        if s.bitrate == 0 {
            return Err(ExportError::validation("export bitrate must be > 0"));
        }
        if self.pages.is_empty() {
            return Err(ExportError::validation("project must have at least one page"));
        }
        for (i, page) in self.pages.iter().enumerate() {
            if !page.duration.is_finite() || page.duration <= 0.0 {
                return Err(ExportError::validation(format!(
                    "page {i} duration must be a positive number of seconds"
                )));
            }
            for layer in &page.layers {
                layer
                    .validate(s.width, s.height)
                    .map_err(|e| ExportError::validation(format!("page {i}: {e}")))?;
            }
        }
        Ok(())
    }

    /// Total length in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.pages.iter().map(|p| p.duration).sum()
    }

    /// Number of frames rendered at the export frame rate.
    pub fn total_frames(&self) -> u64 {
        self.settings.fps.secs_to_frames_ceil(self.duration_secs())
    }

    /// Page shown at `frame`, with the page-local time in seconds.
    ///
    /// Times past the last page clamp onto it.
    pub fn page_at(&self, frame: FrameIndex) -> Option<(usize, f64)> {
        let t = self.settings.fps.frames_to_secs(frame.0);
        let mut start = 0.0;
        for (i, page) in self.pages.iter().enumerate() {
            if t < start + page.duration {
                return Some((i, (t - start).max(0.0)));
            }
            start += page.duration;
        }
        let last = self.pages.len().checked_sub(1)?;
        let page = &self.pages[last];
        Some((last, (t - (start - page.duration)).min(page.duration)))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/export/project.rs"]
mod tests;
