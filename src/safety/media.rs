//!
//! Media files on disk and byte-range requests for them.
//!
//! Every upload lands in `<root>/videos/` under a random name, whatever its
//! type. `images/` and `thumbnails/` exist for the layout but stay empty.
//!

use crate::ODM::models::{Media, MediaSource, MediaType};
use chrono::Utc;
use log::{info, warn};
use rand::Rng;
use std::io;
use std::path::{Path, PathBuf};

pub const VIDEOS_DIR: &str = "videos";
pub const IMAGES_DIR: &str = "images";
pub const THUMBNAILS_DIR: &str = "thumbnails";

/// Public prefix media urls are served under
pub const MEDIA_URL_PREFIX: &str = "/api/videos";

const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "gif", "webp", "heic", "bmp"];

/// The upload root
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        MediaStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the upload root and its sub-directories
    pub async fn prepare(&self) -> io::Result<()> {
        for dir in [VIDEOS_DIR, IMAGES_DIR, THUMBNAILS_DIR] {
            rocket::tokio::fs::create_dir_all(self.root.join(dir)).await?;
        }
        Ok(())
    }

    /// Path of a stored file, `None` for names that could escape the videos directory
    pub fn resolve(&self, filename: &str) -> Option<PathBuf> {
        if filename.is_empty()
            || filename.contains('/')
            || filename.contains('\\')
            || filename.contains("..")
            || filename.starts_with('.')
        {
            return None;
        }
        Some(self.root.join(VIDEOS_DIR).join(filename))
    }

    /// Copies an uploaded temp file into the store under a fresh random key
    pub async fn save(
        &self,
        temp_path: &Path,
        file_name: Option<&str>,
        content_type: Option<&str>,
        source: MediaSource,
    ) -> io::Result<Media> {
        let extension = extension_for(file_name, content_type);
        let media_type = media_type_for(&extension, content_type);
        let key = generate_key(&extension);

        let target = self.root.join(VIDEOS_DIR).join(&key);
        rocket::tokio::fs::copy(temp_path, &target).await?;
        info!("Stored upload {} as {}", file_name.unwrap_or("<unnamed>"), key);

        Ok(Media {
            url: format!("{}/{}", MEDIA_URL_PREFIX, key),
            key,
            media_type,
            source_type: source,
        })
    }

    pub async fn remove(&self, key: &str) -> io::Result<()> {
        match self.resolve(key) {
            Some(path) => rocket::tokio::fs::remove_file(path).await,
            None => Err(io::Error::new(io::ErrorKind::InvalidInput, format!("invalid media key {}", key))),
        }
    }

    /// Best effort: a file that cannot be removed is logged and skipped
    pub async fn remove_all(&self, keys: &[String]) -> usize {
        let mut removed = 0;
        for key in keys {
            match self.remove(key).await {
                Ok(()) => removed += 1,
                Err(e) => warn!("Could not remove media {}: {}", key, e),
            }
        }
        removed
    }
}

/// `<millis>-<16 hex>.<ext>`
pub fn generate_key(extension: &str) -> String {
    let random: u64 = rand::thread_rng().gen();
    format!("{}-{:016x}.{}", Utc::now().timestamp_millis(), random, extension)
}

fn clean_extension(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_ascii_lowercase();
    if lowered.is_empty() || lowered.len() > 8 || !lowered.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(lowered)
}

/// Usual extension of a MIME subtype that does not name one itself
fn subtype_extension(subtype: &str) -> &str {
    match subtype {
        "quicktime" => "mov",
        "x-msvideo" => "avi",
        "x-matroska" => "mkv",
        "x-ms-wmv" => "wmv",
        "3gpp" => "3gp",
        "3gpp2" => "3g2",
        other => other,
    }
}

/// Extension of the client file name, else the MIME subtype, else `bin`
pub fn extension_for(file_name: Option<&str>, content_type: Option<&str>) -> String {
    let from_name = file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .and_then(clean_extension);
    if let Some(ext) = from_name {
        return ext;
    }
    content_type
        .and_then(|mime| mime.split('/').nth(1))
        .map(|subtype| subtype.split(|c| c == ';' || c == '+').next().unwrap_or(subtype))
        .map(|subtype| subtype.trim().to_ascii_lowercase())
        .and_then(|subtype| clean_extension(subtype_extension(&subtype)))
        .unwrap_or_else(|| "bin".to_string())
}

pub fn media_type_for(extension: &str, content_type: Option<&str>) -> MediaType {
    let image_mime = content_type.map_or(false, |mime| mime.trim().to_ascii_lowercase().starts_with("image/"));
    if image_mime || IMAGE_EXTENSIONS.contains(&extension) {
        MediaType::Image
    } else {
        MediaType::Video
    }
}

/// Inclusive byte span of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

/// A `Range` header that cannot be served
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("range not satisfiable for {size} bytes")]
pub struct Unsatisfiable {
    pub size: u64,
}

/// Parses a single `bytes=` range against a file of `size` bytes.
///
/// `bytes=a-b`, `bytes=a-` and `bytes=-n` are accepted; `b` past the end is
/// clamped to the last byte. Multi-range, malformed and out-of-file ranges
/// are unsatisfiable.
pub fn parse_range(header: &str, size: u64) -> Result<ByteRange, Unsatisfiable> {
    let err = Unsatisfiable { size };
    let ranges = header.trim().strip_prefix("bytes=").ok_or(err.clone())?.trim();
    if ranges.contains(',') || size == 0 {
        return Err(err);
    }

    let (first, last) = ranges.split_once('-').ok_or(err.clone())?;
    let (first, last) = (first.trim(), last.trim());

    if first.is_empty() {
        let suffix: u64 = last.parse().map_err(|_| err.clone())?;
        if suffix == 0 {
            return Err(err);
        }
        return Ok(ByteRange { start: size.saturating_sub(suffix), end: size - 1 });
    }

    let start: u64 = first.parse().map_err(|_| err.clone())?;
    let end = if last.is_empty() {
        size - 1
    } else {
        let end: u64 = last.parse().map_err(|_| err.clone())?;
        end.min(size - 1)
    };

    if start >= size || start > end {
        return Err(err);
    }
    Ok(ByteRange { start, end })
}
