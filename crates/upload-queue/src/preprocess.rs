//! Optional client-side preprocessing (e.g. image transforms) before chunking.

use std::fmt;
use std::sync::Arc;

use vaultup_transfer::FileSource;

use crate::transport::BoxFuture;

/// Image formats offered to the preprocessing hook by default.
pub const IMAGE_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/gif",
    "image/bmp",
];

/// Error returned by a preprocessing hook. Always fatal for the item.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct PreprocessError(pub String);

/// Replacement bytes produced by a hook.
pub struct Preprocessed {
    pub source: Arc<dyn FileSource>,
    pub size_bytes: u64,
}

impl fmt::Debug for Preprocessed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Preprocessed")
            .field("source", &self.source.name())
            .field("size_bytes", &self.size_bytes)
            .finish()
    }
}

/// Transforms a file before it is chunked.
pub trait PreprocessHook: Send + Sync {
    fn preprocess<'a>(
        &'a self,
        source: Arc<dyn FileSource>,
        mime_type: &'a str,
    ) -> BoxFuture<'a, Result<Preprocessed, PreprocessError>>;
}

/// A hook plus the mime types it is invoked for.
#[derive(Clone)]
pub struct Preprocessor {
    hook: Arc<dyn PreprocessHook>,
    mime_types: Vec<String>,
}

impl Preprocessor {
    /// Runs `hook` for the default [`IMAGE_MIME_TYPES`].
    pub fn new(hook: Arc<dyn PreprocessHook>) -> Self {
        Self::with_mime_types(hook, IMAGE_MIME_TYPES.iter().copied())
    }

    /// Runs `hook` for a caller-declared allow-list.
    pub fn with_mime_types<I, S>(hook: Arc<dyn PreprocessHook>, mime_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            hook,
            mime_types: mime_types
                .into_iter()
                .map(|m| essence(m.as_ref()))
                .collect(),
        }
    }

    /// Whether the hook should run for `mime_type`.
    pub fn applies_to(&self, mime_type: &str) -> bool {
        let essence = essence(mime_type);
        self.mime_types.iter().any(|m| *m == essence)
    }

    pub(crate) fn hook(&self) -> &dyn PreprocessHook {
        self.hook.as_ref()
    }
}

impl fmt::Debug for Preprocessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Preprocessor")
            .field("mime_types", &self.mime_types)
            .finish_non_exhaustive()
    }
}

/// `Image/PNG; q=1` -> `image/png`.
fn essence(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
