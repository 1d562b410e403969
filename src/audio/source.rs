use crate::foundation::error::{ExportError, ExportResult};
use std::path::{Path, PathBuf};

/// Reference to one audio input: an `http(s)://` URL, a `file://` URL, or a filesystem path.
///
/// Every source is mixed from offset 0; callers pre-trim sources to their timeline position.
#[derive(Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct AudioSource(pub String);

impl AudioSource {
    /// Wrap a URL or path.
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// The reference as given.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Return `true` for `http://` and `https://` references.
    pub fn is_remote(&self) -> bool {
        let s = self.0.trim_start();
        starts_with_ignore_case(s, "http://") || starts_with_ignore_case(s, "https://")
    }
}

impl From<&str> for AudioSource {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len()
        && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

/// Loads the encoded bytes of an audio source.
///
/// Failures must be reported as [`ExportError::FetchFailed`] so the mixer treats them as soft.
pub trait SourceFetcher: Send + Sync {
    /// Fetch all bytes of `source`.
    fn fetch(&self, source: &AudioSource) -> ExportResult<Vec<u8>>;
}

/// Default fetcher: local files relative to a base directory, plus HTTP(S) with the `http`
/// feature.
#[derive(Debug)]
pub struct DefaultFetcher {
    base_dir: PathBuf,
    #[cfg(feature = "http")]
    client: reqwest::blocking::Client,
}

impl DefaultFetcher {
    /// Create a fetcher resolving relative paths against `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            #[cfg(feature = "http")]
            client: reqwest::blocking::Client::new(),
        }
    }

    /// Directory relative paths are resolved against.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn resolve_path(&self, reference: &str) -> PathBuf {
        let raw = reference.strip_prefix("file://").unwrap_or(reference);
        let path = Path::new(raw);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    fn fetch_file(&self, source: &AudioSource) -> ExportResult<Vec<u8>> {
        let path = self.resolve_path(source.as_str());
        std::fs::read(&path).map_err(|e| ExportError::FetchFailed {
            source_ref: source.as_str().to_owned(),
            reason: format!("{}: {e}", path.display()),
        })
    }

    #[cfg(feature = "http")]
    fn fetch_http(&self, source: &AudioSource) -> ExportResult<Vec<u8>> {
        let failed = |reason: String| ExportError::FetchFailed {
            source_ref: source.as_str().to_owned(),
            reason,
        };
        let resp = self
            .client
            .get(source.as_str())
            .send()
            .map_err(|e| failed(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(failed(format!("HTTP status {status}")));
        }
        let bytes = resp.bytes().map_err(|e| failed(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    #[cfg(not(feature = "http"))]
    fn fetch_http(&self, source: &AudioSource) -> ExportResult<Vec<u8>> {
        Err(ExportError::FetchFailed {
            source_ref: source.as_str().to_owned(),
            reason: "remote audio sources require the 'http' feature".to_owned(),
        })
    }
}

impl Default for DefaultFetcher {
    fn default() -> Self {
        Self::new(".")
    }
}

impl SourceFetcher for DefaultFetcher {
    fn fetch(&self, source: &AudioSource) -> ExportResult<Vec<u8>> {
        if source.is_remote() {
            self.fetch_http(source)
        } else {
            self.fetch_file(source)
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/audio/source.rs"]
mod tests;
