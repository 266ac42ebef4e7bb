use std::fmt;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Deterministic job identity: URL-safe base64 (no padding) of the input path.
///
/// Every request for the same file maps to the same key, which is what makes
/// enqueueing idempotent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey(String);

impl JobKey {
    pub fn from_path(path: &Path) -> Self {
        Self(URL_SAFE_NO_PAD.encode(path.as_os_str().as_encoded_bytes()))
    }

    /// Wrap a key received from a client. Returns `None` for text that is not
    /// URL-safe base64.
    pub fn parse(id: &str) -> Option<Self> {
        URL_SAFE_NO_PAD.decode(id).ok().map(|_| Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The input path this key was derived from.
    pub fn decode(&self) -> Option<PathBuf> {
        let bytes = URL_SAFE_NO_PAD.decode(&self.0).ok()?;
        String::from_utf8(bytes).ok().map(PathBuf::from)
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_path_same_key() {
        let a = JobKey::from_path(Path::new("/lib/Movie (2001)/film.mkv"));
        let b = JobKey::from_path(Path::new("/lib/Movie (2001)/film.mkv"));
        let c = JobKey::from_path(Path::new("/lib/Movie (2001)/film2.mkv"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn key_is_url_safe_and_unpadded() {
        // Bytes chosen so that standard base64 would emit '+' and '/'.
        let key = JobKey::from_path(Path::new("/a/\u{00ff}\u{00fe}>?.mkv"));
        let s = key.as_str();
        assert!(!s.contains(['+', '/', '=']), "{s}");
        assert_eq!(
            key.decode().unwrap(),
            PathBuf::from("/a/\u{00ff}\u{00fe}>?.mkv")
        );
    }

    #[test]
    fn known_encoding() {
        assert_eq!(JobKey::from_path(Path::new("/a.mkv")).as_str(), "L2EubWt2");
    }

    #[test]
    fn parse_rejects_non_base64() {
        assert!(JobKey::parse("L2EubWt2").is_some());
        assert!(JobKey::parse("not base64!").is_none());
        assert!(JobKey::parse("L2Eub+t2").is_none());
    }
}
