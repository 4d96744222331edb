use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use image::DynamicImage;
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::error::{AppError, AppResult};

mod pdf;
mod rar;
mod zip;

pub use pdf::PdfComicBook;
pub use rar::RarComicBook;
pub use zip::ZipComicBook;

/// Uniform access to a comic archive: a stable entry list enumerated once at
/// open time, on-demand decoding of a named entry, and the content
/// fingerprint of the source file. Closing is idempotent via `Drop`.
pub trait ComicArchive: Send {
    fn list(&self) -> &[String];
    fn read_entry(&mut self, name: &str) -> AppResult<DynamicImage>;
    fn fingerprint(&self) -> &str;
}

/// Opens the archive variant matching the file extension. The fingerprint is
/// computed up front by streaming the whole file through SHA-256, since every
/// variant needs it.
pub fn open_archive(path: impl AsRef<Path>, config: &Config) -> AppResult<Box<dyn ComicArchive>> {
    let path = path.as_ref();
    let fingerprint = hash_file(path)?;
    log::debug!("fingerprint for {} is {fingerprint}", path.display());

    match extension_of(path).as_deref() {
        Some("cbz") | Some("zip") => ZipComicBook::open(path, fingerprint, &config.cache)
            .map(|book| Box::new(book) as Box<dyn ComicArchive>),
        Some("cbr") | Some("rar") => RarComicBook::open(path, fingerprint)
            .map(|book| Box::new(book) as Box<dyn ComicArchive>),
        Some("pdf") => PdfComicBook::open(path, fingerprint, &config.prepare)
            .map(|book| Box::new(book) as Box<dyn ComicArchive>),
        _ => Err(AppError::UnknownArchiveType(path.display().to_string())),
    }
}

pub fn hash_file(path: impl AsRef<Path>) -> AppResult<String> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| {
        AppError::io_with_context(source, format!("failed to open {}", path.display()))
    })?;

    let mut hasher = Sha256::new();
    std::io::copy(&mut BufReader::new(file), &mut hasher).map_err(|source| {
        AppError::io_with_context(source, format!("failed to hash {}", path.display()))
    })?;
    Ok(hex::encode(hasher.finalize()))
}

pub(crate) fn decode_image(entry: &str, data: &[u8]) -> AppResult<DynamicImage> {
    image::load_from_memory(data).map_err(|source| AppError::decode(entry, source))
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}
