use std::fs::File;
use std::io::Read;
use std::num::NonZeroUsize;
use std::path::Path;

use image::DynamicImage;
use lru::LruCache;
use zip::ZipArchive;
use zip::result::ZipError;

use crate::config::CacheConfig;
use crate::error::{AppError, AppResult};

use super::{ComicArchive, decode_image};

/// Random-access variant: every entry is independently addressable by name,
/// so repeated navigation only pays decode cost on cache misses.
pub struct ZipComicBook {
    fingerprint: String,
    entries: Vec<String>,
    archive: ZipArchive<File>,
    decoded: LruCache<String, DynamicImage>,
}

impl ZipComicBook {
    pub fn open(path: impl AsRef<Path>, fingerprint: String, cache: &CacheConfig) -> AppResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| {
            AppError::io_with_context(source, format!("failed to open {}", path.display()))
        })?;
        let mut archive = ZipArchive::new(file).map_err(|source| {
            AppError::archive_open(format!(
                "failed to read zip directory of {}: {source}",
                path.display()
            ))
        })?;

        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let entry = archive.by_index(index).map_err(|source| {
                AppError::archive_open(format!(
                    "failed to read zip entry {index} of {}: {source}",
                    path.display()
                ))
            })?;
            if !entry.is_dir() {
                entries.push(entry.name().to_string());
            }
        }

        let capacity = cache.decode_max_entries.max(1);
        Ok(Self {
            fingerprint,
            entries,
            archive,
            decoded: LruCache::new(
                NonZeroUsize::new(capacity).expect("decode cache capacity is non-zero"),
            ),
        })
    }
}

impl ComicArchive for ZipComicBook {
    fn list(&self) -> &[String] {
        &self.entries
    }

    fn read_entry(&mut self, name: &str) -> AppResult<DynamicImage> {
        if let Some(image) = self.decoded.get(name) {
            return Ok(image.clone());
        }

        let data = {
            let mut entry = match self.archive.by_name(name) {
                Ok(entry) => entry,
                Err(ZipError::FileNotFound) => {
                    return Err(AppError::EntryNotFound(name.to_string()));
                }
                Err(source) => return Err(AppError::decode(name, source)),
            };
            let mut data = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut data)
                .map_err(|source| AppError::decode(name, source))?;
            data
        };

        let image = decode_image(name, &data)?;
        self.decoded.put(name.to_string(), image.clone());
        Ok(image)
    }

    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}
