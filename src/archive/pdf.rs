use std::path::Path;
use std::sync::Arc;

use hayro::hayro_interpret::InterpreterSettings;
use hayro::hayro_syntax::Pdf;
use hayro::vello_cpu::color::palette::css::WHITE;
use hayro::{RenderSettings, render};
use image::{DynamicImage, RgbaImage};

use crate::config::PrepareConfig;
use crate::error::{AppError, AppResult};

use super::ComicArchive;

/// Paginated variant: entries are synthetic page names and reads rasterize
/// the requested page on demand over a white background.
pub struct PdfComicBook {
    fingerprint: String,
    entries: Vec<String>,
    pdf: Pdf,
    render_scale: f32,
}

impl PdfComicBook {
    pub fn open(
        path: impl AsRef<Path>,
        fingerprint: String,
        prepare: &PrepareConfig,
    ) -> AppResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| {
            AppError::io_with_context(source, format!("failed to read {}", path.display()))
        })?;
        if !bytes.starts_with(b"%PDF-") {
            return Err(AppError::archive_open(format!(
                "{} does not carry a PDF header",
                path.display()
            )));
        }

        // The parser attempts empty-password decryption on its own; when that
        // fails on a document with an encryption dictionary there is nothing
        // more we can do without user credentials.
        let has_encryption_dictionary = contains_encrypt_marker(&bytes);
        let pdf = match Pdf::new(Arc::new(bytes)) {
            Ok(pdf) => pdf,
            Err(_) if has_encryption_dictionary => return Err(AppError::EncryptedUnsupported),
            Err(_) => {
                return Err(AppError::archive_open(format!(
                    "failed to parse PDF {}",
                    path.display()
                )));
            }
        };

        let entries = (1..=pdf.pages().len())
            .map(|number| format!("Page {number:03}"))
            .collect();

        Ok(Self {
            fingerprint,
            entries,
            pdf,
            render_scale: prepare.pdf_render_scale,
        })
    }
}

impl ComicArchive for PdfComicBook {
    fn list(&self) -> &[String] {
        &self.entries
    }

    fn read_entry(&mut self, name: &str) -> AppResult<DynamicImage> {
        let number = page_number(name)
            .filter(|number| *number >= 1)
            .ok_or_else(|| AppError::EntryNotFound(name.to_string()))?;
        let page = self
            .pdf
            .pages()
            .get(number - 1)
            .ok_or_else(|| AppError::EntryNotFound(name.to_string()))?;

        let render_settings = RenderSettings {
            x_scale: self.render_scale,
            y_scale: self.render_scale,
            bg_color: WHITE,
            ..Default::default()
        };
        let pixmap = render(page, &InterpreterSettings::default(), &render_settings);

        let width = pixmap.width() as u32;
        let height = pixmap.height() as u32;
        if width == 0 || height == 0 {
            return Err(AppError::NoImageOnPage(name.to_string()));
        }

        let image = RgbaImage::from_raw(width, height, pixmap.data_as_u8_slice().to_vec())
            .ok_or_else(|| AppError::decode(name, "pixmap length does not match dimensions"))?;
        Ok(DynamicImage::ImageRgba8(image))
    }

    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

fn page_number(name: &str) -> Option<usize> {
    name.strip_prefix("Page ")?.trim().parse().ok()
}

fn contains_encrypt_marker(bytes: &[u8]) -> bool {
    bytes.windows(b"/Encrypt".len()).any(|w| w == b"/Encrypt")
}

#[cfg(test)]
mod tests {
    use std::fs;

    use crate::archive::ComicArchive;
    use crate::archive::testutil::build_pdf;
    use crate::config::PrepareConfig;
    use crate::error::AppError;

    use super::PdfComicBook;

    fn scale_one() -> PrepareConfig {
        PrepareConfig {
            pdf_render_scale: 1.0,
            ..PrepareConfig::default()
        }
    }

    #[test]
    fn list_synthesizes_one_entry_per_page() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join("album.pdf");
        fs::write(&path, build_pdf(2)).expect("pdf fixture should be written");

        let book =
            PdfComicBook::open(&path, "fp".to_string(), &scale_one()).expect("pdf should open");
        assert_eq!(book.list(), ["Page 001", "Page 002"]);
    }

    #[test]
    fn read_entry_rasterizes_the_requested_page() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join("album.pdf");
        fs::write(&path, build_pdf(1)).expect("pdf fixture should be written");

        let mut book =
            PdfComicBook::open(&path, "fp".to_string(), &scale_one()).expect("pdf should open");
        let image = book.read_entry("Page 001").expect("render should succeed");
        let rgba = image.to_rgba8();
        assert!(rgba.width() > 0 && rgba.height() > 0);
        // An empty content stream rasterizes to the white background.
        assert_eq!(rgba.get_pixel(1, 1).0, [255, 255, 255, 255]);
    }

    #[test]
    fn out_of_range_page_reports_entry_not_found() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join("album.pdf");
        fs::write(&path, build_pdf(1)).expect("pdf fixture should be written");

        let mut book =
            PdfComicBook::open(&path, "fp".to_string(), &scale_one()).expect("pdf should open");
        assert!(matches!(
            book.read_entry("Page 009"),
            Err(AppError::EntryNotFound(_))
        ));
        assert!(matches!(
            book.read_entry("cover.png"),
            Err(AppError::EntryNotFound(_))
        ));
    }

    #[test]
    fn unparseable_document_with_encryption_dictionary_is_unsupported() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join("locked.pdf");
        fs::write(&path, b"%PDF-1.4\n/Encrypt 1 0 R\ngarbage")
            .expect("pdf fixture should be written");

        let result = PdfComicBook::open(&path, "fp".to_string(), &scale_one());
        assert!(matches!(result, Err(AppError::EncryptedUnsupported)));
    }

    #[test]
    fn unparseable_plain_document_is_an_open_error() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join("broken.pdf");
        fs::write(&path, b"%PDF-1.4\ngarbage").expect("pdf fixture should be written");

        let result = PdfComicBook::open(&path, "fp".to_string(), &scale_one());
        assert!(matches!(result, Err(AppError::ArchiveOpen(_))));
    }

    #[test]
    fn non_pdf_bytes_are_rejected_by_the_header_check() {
        let dir = tempfile::tempdir().expect("temp dir should be created");
        let path = dir.path().join("fake.pdf");
        fs::write(&path, b"PK\x03\x04not a pdf").expect("pdf fixture should be written");

        let result = PdfComicBook::open(&path, "fp".to_string(), &scale_one());
        assert!(matches!(result, Err(AppError::ArchiveOpen(_))));
    }
}
