//! Filesystem media store
//!
//! Received photos land as JPEG files under the node's media directory.
//! On the outbound path, photos are downsampled before inline embedding
//! so an envelope stays small enough for the one-shot peer exchange.

use std::fs;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use relato_core::{Error, MediaStore, Result};

/// Longest edge of an embedded photo, in pixels.
const MAX_EMBED_DIMENSION: u32 = 800;
/// JPEG quality for embedded photos.
const EMBED_JPEG_QUALITY: u8 = 70;

fn media_err(e: impl std::fmt::Display) -> Error {
    Error::Media(e.to_string())
}

/// Media store rooted at a directory on disk.
pub struct FsMediaStore {
    dir: PathBuf,
}

impl FsMediaStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Shrink a photo to at most [`MAX_EMBED_DIMENSION`] on the longest
    /// edge and re-encode as JPEG. Photos already within bounds are still
    /// re-encoded, which keeps the embedded format uniform.
    fn downsample(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        let source = image::load_from_memory(bytes).map_err(media_err)?;
        let scaled = source.thumbnail(MAX_EMBED_DIMENSION, MAX_EMBED_DIMENSION);

        let mut out = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut out, EMBED_JPEG_QUALITY);
        scaled.write_with_encoder(encoder).map_err(media_err)?;
        Ok(out)
    }
}

impl MediaStore for FsMediaStore {
    fn write_bytes(&self, bytes: &[u8]) -> Result<String> {
        let millis = chrono::Utc::now().timestamp_millis();
        let mut path = self.dir.join(format!("received_photo_{millis}.jpg"));
        // Two receives in the same millisecond must not clobber each other.
        let mut bump = 0;
        while path.exists() {
            bump += 1;
            path = self.dir.join(format!("received_photo_{millis}_{bump}.jpg"));
        }

        fs::write(&path, bytes)?;
        let ref_str = path.to_string_lossy().into_owned();
        tracing::debug!("stored received photo at {}", ref_str);
        Ok(ref_str)
    }

    fn read_for_embedding(&self, media_ref: &str) -> Result<Vec<u8>> {
        let bytes = fs::read(media_ref)
            .map_err(|e| Error::Media(format!("cannot read {media_ref}: {e}")))?;
        self.downsample(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128u8])
        });
        let mut out = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FsMediaStore::open(dir.path()).unwrap();

        let media_ref = store.write_bytes(b"jpeg bytes").unwrap();
        assert!(media_ref.contains("received_photo_"));
        assert_eq!(fs::read(&media_ref).unwrap(), b"jpeg bytes");
    }

    #[test]
    fn test_distinct_refs_for_successive_writes() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FsMediaStore::open(dir.path()).unwrap();

        let a = store.write_bytes(b"one").unwrap();
        let b = store.write_bytes(b"two").unwrap();
        assert_ne!(a, b);
        assert_eq!(fs::read(&a).unwrap(), b"one");
        assert_eq!(fs::read(&b).unwrap(), b"two");
    }

    #[test]
    fn test_embedding_downsamples_large_photo() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FsMediaStore::open(dir.path()).unwrap();

        let path = dir.path().join("big.png");
        fs::write(&path, png_bytes(1600, 1200)).unwrap();

        let embedded = store
            .read_for_embedding(path.to_str().unwrap())
            .unwrap();
        let decoded = image::load_from_memory(&embedded).unwrap();
        assert!(decoded.width() <= MAX_EMBED_DIMENSION);
        assert!(decoded.height() <= MAX_EMBED_DIMENSION);
        // Aspect ratio preserved: longest edge hits the cap.
        assert_eq!(decoded.width(), MAX_EMBED_DIMENSION);
    }

    #[test]
    fn test_embedding_small_photo_keeps_dimensions() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FsMediaStore::open(dir.path()).unwrap();

        let path = dir.path().join("small.png");
        fs::write(&path, png_bytes(320, 240)).unwrap();

        let embedded = store
            .read_for_embedding(path.to_str().unwrap())
            .unwrap();
        let decoded = image::load_from_memory(&embedded).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (320, 240));
    }

    #[test]
    fn test_missing_file_is_media_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FsMediaStore::open(dir.path()).unwrap();

        assert!(matches!(
            store.read_for_embedding("/nonexistent/photo.jpg"),
            Err(Error::Media(_))
        ));
    }

    #[test]
    fn test_garbage_bytes_are_media_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FsMediaStore::open(dir.path()).unwrap();

        let path = dir.path().join("not-an-image.jpg");
        fs::write(&path, b"definitely not pixels").unwrap();

        assert!(matches!(
            store.read_for_embedding(path.to_str().unwrap()),
            Err(Error::Media(_))
        ));
    }
}
