//! Format classification
//!
//! Decides from a filename alone whether the native decoder should be tried.
//! Only extensions known to be undecodable go straight to the transcoder;
//! ambiguous containers (m4a may hold AAC or ALAC) are tried natively first
//! and fall back on a format error.

use cadence_common::config::default_unsupported_extensions;
use cadence_common::track::extension_of;
use std::collections::HashSet;

/// Classifier verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Playability {
    Native,
    Transcode,
}

/// Extension-based classifier
#[derive(Debug, Clone)]
pub struct FormatClassifier {
    unsupported: HashSet<String>,
}

impl FormatClassifier {
    pub fn new<I, S>(unsupported: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            unsupported: unsupported
                .into_iter()
                .map(|ext| ext.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn classify(&self, filename: &str) -> Playability {
        match extension_of(filename) {
            Some(ext) if self.unsupported.contains(&ext) => Playability::Transcode,
            _ => Playability::Native,
        }
    }

    /// Whether a probed codec name is one the native stack cannot decode
    pub fn is_unsupported_codec(&self, codec: &str) -> bool {
        self.unsupported.contains(&codec.to_ascii_lowercase())
    }
}

impl Default for FormatClassifier {
    fn default() -> Self {
        Self::new(default_unsupported_extensions())
    }
}
