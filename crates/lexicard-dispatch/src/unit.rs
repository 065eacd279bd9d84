//! Work units: one retriable piece of remote work each.
//!
//! A [`WorkUnit`] bundles an immutable target, a retry budget that only ever
//! goes down, a classifier that turns a status code into a
//! [`Classification`], and a result handler that runs at most once. The
//! dispatcher moves the same `Arc<WorkUnit>` through every retry, so identity
//! and budget survive re-enqueueing.
//!
//! Two variants exist:
//!
//! - **page fetch** hands the response body to a caller-supplied closure,
//!   which typically parses it into domain objects.
//! - **file download** writes the response body to a file under an output
//!   directory, then optionally notifies a callback with the saved path.
//!
//! Malformed targets are rejected when the unit is built, never inside the
//! dispatcher.

use std::{
    fmt,
    panic::AssertUnwindSafe,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU32, Ordering},
};

use bytes::Bytes;
use lexicard_core::{Classification, UnitId, UnitKindLabel};
use parking_lot::Mutex;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Url,
};

use crate::{
    client::FetchRequest,
    error::{DispatchError, Result},
    DEFAULT_MAX_RETRIES,
};

/// Extension every downloadable audio file must carry.
const AUDIO_EXTENSION: &str = ".mp3";

/// Maps a raw status code onto how the dispatcher treats it.
pub type Classifier = fn(u16) -> Classification;

/// Receives the body of a successfully fetched page.
pub type PageHandler = Box<dyn FnOnce(String) + Send + 'static>;

/// Receives the path of a successfully saved download.
pub type SavedHandler = Box<dyn FnOnce(&Path) + Send + 'static>;

/// Default status classification shared by both unit variants.
///
/// | status            | class               |
/// |-------------------|---------------------|
/// | 200               | `Success`           |
/// | 404               | `PermanentSkip`     |
/// | 429, 500 and up   | `RetryableCritical` |
/// | anything else     | `RetryableOther`    |
pub fn classify_status(status_code: u16) -> Classification {
    match status_code {
        200 => Classification::Success,
        404 => Classification::PermanentSkip,
        429 => Classification::RetryableCritical,
        s if s >= 500 => Classification::RetryableCritical,
        _ => Classification::RetryableOther,
    }
}

/// Builds the dictionary entry URL for a word.
///
/// The word is trimmed, lowercased and has its spaces replaced by hyphens;
/// the first homonym (`_1`) is always requested.
///
/// ```
/// use lexicard_dispatch::unit::dictionary_page_url;
/// assert_eq!(
///     dictionary_page_url("https://dict.example/definition/english/", " Look Up "),
///     "https://dict.example/definition/english/look-up_1"
/// );
/// ```
pub fn dictionary_page_url(base_url: &str, word: &str) -> String {
    let formatted = word.trim().to_lowercase().replace(' ', "-");
    format!("{}/{}_1", base_url.trim_end_matches('/'), formatted)
}

/// Extracts the audio file name a download URL points at.
///
/// Query string and fragment are ignored. The last path segment must end in
/// `.mp3` (any case) and have a non-empty stem.
///
/// # Errors
///
/// Returns `DispatchError::InvalidTarget` for empty URLs and URLs that do not
/// name an MP3 file.
pub fn extract_file_name(url: &str) -> Result<String> {
    if url.is_empty() {
        return Err(DispatchError::invalid_target("URL cannot be empty"));
    }

    let clean = url.split(['?', '#']).next().unwrap_or(url);
    let file_name = clean.rsplit('/').next().unwrap_or(clean);

    if file_name.len() > AUDIO_EXTENSION.len()
        && file_name.to_ascii_lowercase().ends_with(AUDIO_EXTENSION)
    {
        Ok(file_name.to_string())
    } else {
        Err(DispatchError::invalid_target(format!("URL does not point to an MP3 file: {url}")))
    }
}

/// Validated request target: absolute http(s) URL plus extra headers.
#[derive(Debug, Clone)]
pub struct Target {
    url: Url,
    headers: HeaderMap,
}

impl Target {
    /// Parses and validates a target URL.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidTarget` if the URL is empty, cannot be
    /// parsed, has no host, or does not use http/https.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DispatchError::invalid_target("URL cannot be empty"));
        }

        let url = Url::parse(trimmed)
            .map_err(|e| DispatchError::invalid_target(format!("cannot parse '{trimmed}': {e}")))?;

        match url.scheme() {
            "http" | "https" => {},
            other => {
                return Err(DispatchError::invalid_target(format!(
                    "unsupported scheme '{other}' in '{trimmed}'"
                )));
            },
        }

        if url.host_str().is_none() {
            return Err(DispatchError::invalid_target(format!("missing host in '{trimmed}'")));
        }

        Ok(Self { url, headers: HeaderMap::new() })
    }

    /// Adds a header sent with every attempt.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidTarget` if the name or value is not a
    /// valid HTTP header.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| DispatchError::invalid_target(format!("invalid header '{name}': {e}")))?;
        let header_value = HeaderValue::from_str(value).map_err(|e| {
            DispatchError::invalid_target(format!("invalid value for header '{name}': {e}"))
        })?;
        self.headers.insert(header_name, header_value);
        Ok(self)
    }

    /// Target URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Extra request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

enum Payload {
    Page { handler: Mutex<Option<PageHandler>> },
    Download { path: PathBuf, on_saved: Mutex<Option<SavedHandler>> },
}

/// One unit of retriable remote work.
pub struct WorkUnit {
    id: UnitId,
    target: Target,
    payload: Payload,
    classifier: Classifier,
    max_retries: u32,
    retries_remaining: AtomicU32,
    attempts: AtomicU32,
    last_error: Mutex<Option<DispatchError>>,
}

impl WorkUnit {
    /// Creates a page-fetch unit whose body is handed to `handler` on
    /// success.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidTarget` if `url` is not a valid http(s)
    /// URL.
    pub fn page(url: &str, handler: impl FnOnce(String) + Send + 'static) -> Result<Self> {
        let target = Target::parse(url)?;
        Ok(Self::new(target, Payload::Page { handler: Mutex::new(Some(Box::new(handler))) }))
    }

    /// Creates a download unit that saves the body under `output_dir`.
    ///
    /// The file name is taken from the URL (see [`extract_file_name`]).
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidTarget` if the URL is invalid or does
    /// not name an MP3 file.
    pub fn download(url: &str, output_dir: impl AsRef<Path>) -> Result<Self> {
        let file_name = extract_file_name(url.trim())?;
        let target = Target::parse(url)?;
        let path = output_dir.as_ref().join(file_name);
        Ok(Self::new(target, Payload::Download { path, on_saved: Mutex::new(None) }))
    }

    fn new(target: Target, payload: Payload) -> Self {
        Self {
            id: UnitId::new(),
            target,
            payload,
            classifier: classify_status,
            max_retries: DEFAULT_MAX_RETRIES,
            retries_remaining: AtomicU32::new(DEFAULT_MAX_RETRIES),
            attempts: AtomicU32::new(0),
            last_error: Mutex::new(None),
        }
    }

    /// Sets the retry budget: the unit is attempted at most `retries + 1`
    /// times.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self.retries_remaining = AtomicU32::new(retries);
        self
    }

    /// Replaces the status classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Adds a header sent with every attempt.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidTarget` for invalid header names or
    /// values.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        self.target = self.target.with_header(name, value)?;
        Ok(self)
    }

    /// Registers a callback run with the saved path after a download
    /// succeeds. Has no effect on page units.
    #[must_use]
    pub fn on_saved(self, callback: impl FnOnce(&Path) + Send + 'static) -> Self {
        if let Payload::Download { on_saved, .. } = &self.payload {
            *on_saved.lock() = Some(Box::new(callback));
        }
        self
    }

    /// Stable identity across retries.
    pub fn id(&self) -> UnitId {
        self.id
    }

    /// Variant label.
    pub fn kind(&self) -> UnitKindLabel {
        match self.payload {
            Payload::Page { .. } => UnitKindLabel::PageFetch,
            Payload::Download { .. } => UnitKindLabel::FileDownload,
        }
    }

    /// Target URL.
    pub fn url(&self) -> &Url {
        self.target.url()
    }

    /// Request target.
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Destination file for download units.
    pub fn target_path(&self) -> Option<&Path> {
        match &self.payload {
            Payload::Page { .. } => None,
            Payload::Download { path, .. } => Some(path),
        }
    }

    /// Initial retry budget.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Retries still available.
    pub fn retries_remaining(&self) -> u32 {
        self.retries_remaining.load(Ordering::Acquire)
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    /// The most recent failure, if any attempt failed.
    pub fn last_error(&self) -> Option<DispatchError> {
        self.last_error.lock().clone()
    }

    /// Whether another attempt is allowed.
    pub fn should_retry(&self) -> bool {
        self.retries_remaining() > 0
    }

    /// Consumes one retry and returns how many remain. Never goes below zero.
    pub fn decrement_retries(&self) -> u32 {
        let previous = self
            .retries_remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |value| {
                Some(value.saturating_sub(1))
            })
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    /// Classifies a status code with this unit's classifier.
    pub fn classify(&self, status_code: u16) -> Classification {
        (self.classifier)(status_code)
    }

    pub(crate) fn begin_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    pub(crate) fn record_error(&self, error: DispatchError) {
        *self.last_error.lock() = Some(error);
    }

    pub(crate) fn to_request(&self, attempt_number: u32) -> FetchRequest {
        FetchRequest {
            unit_id: self.id,
            url: self.target.url().clone(),
            headers: self.target.headers().clone(),
            attempt_number,
        }
    }

    /// Hands a successful payload to the unit's result handler.
    ///
    /// Download units write the body to their target path first; a write
    /// failure is reported as a retryable `StorageError` and leaves the
    /// callback untouched so a later attempt can still run it.
    pub(crate) async fn deliver(&self, body: Bytes) -> Result<()> {
        match &self.payload {
            Payload::Page { handler } => {
                let Some(handler) = handler.lock().take() else {
                    return Err(DispatchError::internal("page handler already consumed"));
                };
                let page = String::from_utf8_lossy(&body).into_owned();
                std::panic::catch_unwind(AssertUnwindSafe(move || handler(page)))
                    .map_err(|_| DispatchError::internal("page handler panicked"))
            },
            Payload::Download { path, on_saved } => {
                tokio::fs::write(path, &body)
                    .await
                    .map_err(|e| DispatchError::storage(path.clone(), e.to_string()))?;

                let callback = on_saved.lock().take();
                if let Some(callback) = callback {
                    std::panic::catch_unwind(AssertUnwindSafe(move || callback(path)))
                        .map_err(|_| DispatchError::internal("download callback panicked"))?;
                }
                Ok(())
            },
        }
    }
}

impl fmt::Debug for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkUnit")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("url", &self.target.url().as_str())
            .field("retries_remaining", &self.retries_remaining())
            .field("attempts", &self.attempts())
            .finish_non_exhaustive()
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.target.url())
    }
}
