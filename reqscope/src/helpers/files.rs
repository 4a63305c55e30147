//! Serving files: confined path joins and file responses.

use crate::context::current_app;
use crate::errors::{NotFoundError, ScopeError};
use crate::wrappers::{Body, Response};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use md5::{Digest, Md5};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::debug;

const CHUNK_SIZE: usize = 8 * 1024;
const FALLBACK_MIMETYPE: &str = "application/octet-stream";

/// Joins `paths` onto `directory`, refusing anything that would leave it.
///
/// Parent segments that climb above the base, absolute segments, and
/// symlinks pointing outside the base all fail with
/// [`ScopeError::NotFound`], as does a base directory that does not exist.
pub fn safe_join(directory: impl AsRef<Path>, paths: &[&str]) -> Result<PathBuf, ScopeError> {
    let requested = paths.join("/");
    let not_found = || ScopeError::from(NotFoundError::new(requested.clone()));

    let base = std::fs::canonicalize(directory.as_ref()).map_err(|_| not_found())?;
    let mut joined = base.clone();
    for segment in paths {
        for component in Path::new(segment).components() {
            match component {
                Component::Normal(part) => joined.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !joined.pop() {
                        return Err(not_found());
                    }
                }
                Component::RootDir | Component::Prefix(_) => return Err(not_found()),
            }
        }
    }

    if !joined.starts_with(&base) {
        debug!(requested = %requested, "rejected path outside base directory");
        return Err(not_found());
    }
    if !resolves_inside(&joined, &base) {
        debug!(requested = %requested, "rejected link outside base directory");
        return Err(not_found());
    }
    Ok(joined)
}

/// Resolves the deepest existing ancestor of `joined` and checks it stays
/// under `base`. The components below it do not exist yet and were already
/// normalised, so they cannot climb back out.
fn resolves_inside(joined: &Path, base: &Path) -> bool {
    for ancestor in joined.ancestors() {
        match std::fs::canonicalize(ancestor) {
            Ok(real) => return real.starts_with(base),
            // Dangling link: its target is unknown.
            Err(_) if ancestor.symlink_metadata().is_ok() => return false,
            Err(_) => {}
        }
    }
    false
}

/// What [`send_file`] sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    /// A file on disk, streamed in chunks.
    Path(PathBuf),
    /// In-memory content.
    Bytes(Bytes),
}

impl FileSource {
    fn file_name(&self) -> Option<String> {
        match self {
            Self::Path(path) => path.file_name().map(|name| name.to_string_lossy().into_owned()),
            Self::Bytes(_) => None,
        }
    }
}

impl From<PathBuf> for FileSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for FileSource {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<&str> for FileSource {
    fn from(path: &str) -> Self {
        Self::Path(PathBuf::from(path))
    }
}

impl From<Bytes> for FileSource {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for FileSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

/// Options for [`send_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFileOptions {
    /// Content type; guessed from the file name when unset.
    pub mimetype: Option<String>,
    /// Send `Content-Disposition: attachment`.
    pub as_attachment: bool,
    /// Name offered to the client; defaults to the file's own name.
    pub attachment_filename: Option<String>,
    /// Set an `ETag`.
    pub add_etags: bool,
    /// Cache lifetime; defaults to the application's send-file max-age.
    pub cache_timeout: Option<Duration>,
    /// Overrides the file's modification time.
    pub last_modified: Option<DateTime<Utc>>,
}

impl Default for SendFileOptions {
    fn default() -> Self {
        Self {
            mimetype: None,
            as_attachment: false,
            attachment_filename: None,
            add_etags: true,
            cache_timeout: None,
            last_modified: None,
        }
    }
}

impl SendFileOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the content type.
    #[must_use]
    pub fn mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.mimetype = Some(mimetype.into());
        self
    }

    /// Sends the file as an attachment.
    #[must_use]
    pub fn as_attachment(mut self) -> Self {
        self.as_attachment = true;
        self
    }

    /// Sets the attachment file name.
    #[must_use]
    pub fn attachment_filename(mut self, name: impl Into<String>) -> Self {
        self.attachment_filename = Some(name.into());
        self
    }

    /// Enables or disables the `ETag`.
    #[must_use]
    pub fn add_etags(mut self, add: bool) -> Self {
        self.add_etags = add;
        self
    }

    /// Sets the cache lifetime.
    #[must_use]
    pub fn cache_timeout(mut self, timeout: Duration) -> Self {
        self.cache_timeout = Some(timeout);
        self
    }

    /// Overrides the modification time.
    #[must_use]
    pub fn last_modified(mut self, when: DateTime<Utc>) -> Self {
        self.last_modified = Some(when);
        self
    }
}

/// Builds a response carrying a file or in-memory content.
///
/// Requires an application context, whose configuration supplies the
/// default cache lifetime.
pub async fn send_file(
    source: impl Into<FileSource>,
    options: SendFileOptions,
) -> Result<Response, ScopeError> {
    let app = current_app()?;
    let source = source.into();
    let filename = options.attachment_filename.clone().or_else(|| source.file_name());

    let mimetype = match (&options.mimetype, &filename, &source) {
        (Some(mimetype), _, _) => mimetype.clone(),
        (None, Some(name), _) => guess_mimetype(name),
        (None, None, FileSource::Path(_)) => FALLBACK_MIMETYPE.to_string(),
        (None, None, FileSource::Bytes(_)) => return Err(ScopeError::IndeterminateMimetype),
    };

    let (mut response, size, modified, etag) = match source {
        FileSource::Path(path) => {
            let metadata = tokio::fs::metadata(&path).await.map_err(|err| match err.kind() {
                ErrorKind::NotFound => ScopeError::from(NotFoundError::new(path.display().to_string())),
                _ => ScopeError::from(err),
            })?;
            if !metadata.is_file() {
                return Err(NotFoundError::new(path.display().to_string()).into());
            }
            let size = metadata.len();
            let modified: DateTime<Utc> = metadata.modified()?.into();
            let etag = format!(
                "{}-{size}-{}",
                modified.timestamp(),
                hex::encode(Md5::digest(path.to_string_lossy().as_bytes()))
            );
            let file = File::open(&path).await?;
            let response = Response::new(Body::from_stream(file_chunks(file)));
            (response, size, Some(modified), etag)
        }
        FileSource::Bytes(bytes) => {
            let size = bytes.len() as u64;
            let etag = hex::encode(Md5::digest(&bytes));
            (Response::new(bytes), size, None, etag)
        }
    };

    response.set_mimetype(&mimetype)?;
    response.set_content_length(size);

    if options.as_attachment {
        let disposition = match &filename {
            Some(name) => format!("attachment; filename={name}"),
            None => "attachment".to_string(),
        };
        response.set_content_disposition(&disposition)?;
    }

    if let Some(when) = options.last_modified.or(modified) {
        response.set_last_modified(when)?;
    }

    let max_age = options
        .cache_timeout
        .unwrap_or_else(|| app.send_file_max_age());
    response.set_public_cache(Some(max_age.as_secs()));
    let expires = chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::zero());
    response.set_expires(Utc::now() + expires)?;

    if options.add_etags {
        response.set_etag(&etag)?;
    }

    debug!(mimetype = %mimetype, size, attachment = options.as_attachment, "prepared file response");
    Ok(response)
}

/// Sends `filename` from inside `directory`.
///
/// Fails with [`ScopeError::NotFound`] when the name escapes the directory
/// or does not name a regular file.
pub async fn send_from_directory(
    directory: impl AsRef<Path>,
    filename: &str,
    options: SendFileOptions,
) -> Result<Response, ScopeError> {
    let path = safe_join(directory, &[filename])?;
    let is_file = tokio::fs::metadata(&path)
        .await
        .map(|metadata| metadata.is_file())
        .unwrap_or(false);
    if !is_file {
        return Err(NotFoundError::new(filename).into());
    }
    send_file(path, options).await
}

fn guess_mimetype(name: &str) -> String {
    mime_guess::from_path(name)
        .first_raw()
        .unwrap_or(FALLBACK_MIMETYPE)
        .to_string()
}

fn file_chunks(file: File) -> impl Stream<Item = Result<Bytes, ScopeError>> + Send {
    stream::try_unfold(file, |mut file| async move {
        let mut buf = BytesMut::with_capacity(CHUNK_SIZE);
        let read = file.read_buf(&mut buf).await.map_err(ScopeError::from)?;
        if read == 0 {
            Ok::<_, ScopeError>(None)
        } else {
            Ok(Some((buf.freeze(), file)))
        }
    })
}
