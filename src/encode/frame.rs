use crate::foundation::error::{ExportError, ExportResult};

type ReleaseHook = Box<dyn FnOnce() + Send + 'static>;

/// One rendered RGBA8 frame on its way to the video encoder.
///
/// The frame owns its pixels. Submitting it to a worker moves it; the worker releases it right
/// after the encoder has seen it. Release runs exactly once, from `Drop`, whichever path the
/// frame takes (encoded, rejected, or discarded).
pub struct VideoFrame {
    width: u32,
    height: u32,
    timestamp_us: i64,
    data: Vec<u8>,
    on_release: Option<ReleaseHook>,
}

impl VideoFrame {
    /// Wrap straight-alpha RGBA8 pixels (`width * height * 4` bytes).
    pub fn new(width: u32, height: u32, timestamp_us: i64, data: Vec<u8>) -> ExportResult<Self> {
        let expected = (width as usize) * (height as usize) * 4;
        if width == 0 || height == 0 {
            return Err(ExportError::validation("frame width/height must be non-zero"));
        }
        if data.len() != expected {
            return Err(ExportError::validation(format!(
                "frame data size mismatch: got {} bytes, expected {expected} ({width}x{height}x4)",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            timestamp_us,
            data,
            on_release: None,
        })
    }

    /// Attach a callback that runs when the frame is released.
    ///
    /// Used by producers that pool pixel buffers.
    pub fn with_release_hook(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_release = Some(Box::new(hook));
        self
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Presentation timestamp in microseconds.
    pub fn timestamp_us(&self) -> i64 {
        self.timestamp_us
    }

    /// Borrow the RGBA8 pixels.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Release the frame now.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for VideoFrame {
    fn drop(&mut self) {
        self.data = Vec::new();
        if let Some(hook) = self.on_release.take() {
            hook();
        }
    }
}

impl std::fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp_us", &self.timestamp_us)
            .field("bytes", &self.data.len())
            .finish()
    }
}
