//! Structural album state: everything the persistence collaborator
//! round-trips, and nothing the raster cache owns.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Discrete 90-degree rotation state, distinct from the free-angle rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    None,
    Left,
    Right,
}

impl Rotation {
    /// Left toggle: a second press undoes the first, and a right-rotated
    /// image returns upright before it would flip further.
    pub fn toggled_left(self) -> Self {
        match self {
            Self::None => Self::Left,
            Self::Left | Self::Right => Self::None,
        }
    }

    pub fn toggled_right(self) -> Self {
        match self {
            Self::None => Self::Right,
            Self::Left | Self::Right => Self::None,
        }
    }
}

/// User-adjustable manual crop, independent of the automatic border crop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CropMargins {
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
}

impl CropMargins {
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CropEdge {
    Top,
    Bottom,
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub entry: String,
    pub visible: bool,
    pub rotation: Rotation,
    pub crop: CropMargins,
}

impl ImageRef {
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
            visible: true,
            rotation: Rotation::None,
            crop: CropMargins::default(),
        }
    }

    fn reset(&mut self) {
        self.visible = true;
        self.rotation = Rotation::None;
        self.crop = CropMargins::default();
    }
}

/// One logical page: a single image or a left/right spread of two.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub images: Vec<ImageRef>,
    pub angle_degrees: f32,
    pub border_override: bool,
}

impl Page {
    pub fn single(entry: impl Into<String>) -> Self {
        Self {
            images: vec![ImageRef::new(entry)],
            angle_degrees: 0.0,
            border_override: false,
        }
    }

    pub fn is_spread(&self) -> bool {
        self.images.len() == 2
    }

    pub fn is_visible(&self) -> bool {
        self.images.iter().any(|image| image.visible)
    }

    pub fn reset(&mut self) {
        for image in &mut self.images {
            image.reset();
        }
        self.angle_degrees = 0.0;
        self.border_override = false;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub fingerprint: String,
    pub pages: Vec<Page>,
    pub current: usize,
    pub grayscale: bool,
    pub remove_borders: bool,
}

impl Album {
    /// Default layout: one page per recognized entry, ordered by the first
    /// embedded run of digits with a lexicographic fallback.
    pub fn synthesize(fingerprint: impl Into<String>, entries: &[String]) -> AppResult<Self> {
        let mut names: Vec<&String> = entries
            .iter()
            .filter(|name| is_recognized_entry(name))
            .collect();
        if names.is_empty() {
            return Err(AppError::EmptyAlbum);
        }
        names.sort_by(|a, b| compare_entries(a.as_str(), b.as_str()));

        Ok(Self {
            fingerprint: fingerprint.into(),
            pages: names.into_iter().map(Page::single).collect(),
            current: 0,
            grayscale: false,
            remove_borders: false,
        })
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.pages.is_empty() {
            return Err(AppError::EmptyAlbum);
        }
        if self.current >= self.pages.len() {
            return Err(AppError::invalid_argument(format!(
                "current page {} is out of range for {} pages",
                self.current,
                self.pages.len()
            )));
        }
        if let Some(index) = self
            .pages
            .iter()
            .position(|page| page.images.is_empty() || page.images.len() > 2)
        {
            return Err(AppError::invalid_argument(format!(
                "page {index} must reference one or two images"
            )));
        }
        Ok(())
    }

    pub fn current_page(&self) -> &Page {
        &self.pages[self.current]
    }

    pub fn next_visible_after(&self, index: usize) -> Option<usize> {
        self.pages
            .iter()
            .enumerate()
            .skip(index + 1)
            .find(|(_, page)| page.is_visible())
            .map(|(found, _)| found)
    }

    pub fn previous_visible_before(&self, index: usize) -> Option<usize> {
        self.pages
            .iter()
            .enumerate()
            .take(index)
            .rev()
            .find(|(_, page)| page.is_visible())
            .map(|(found, _)| found)
    }

    pub fn first_visible(&self) -> Option<usize> {
        self.pages.iter().position(Page::is_visible)
    }

    pub fn last_visible(&self) -> Option<usize> {
        self.pages.iter().rposition(Page::is_visible)
    }

    /// Merges the page after `index` into `index`, forming a spread.
    pub fn merge_spread_at(&mut self, index: usize) -> AppResult<()> {
        if index + 1 >= self.pages.len() {
            return Err(AppError::invalid_argument(
                "no following page to merge into a spread",
            ));
        }
        if self.pages[index].is_spread() || self.pages[index + 1].is_spread() {
            return Err(AppError::invalid_argument(
                "only single pages can be merged into a spread",
            ));
        }

        let right = self.pages.remove(index + 1);
        self.pages[index].images.extend(right.images);
        if self.current > index {
            self.current -= 1;
        }
        Ok(())
    }

    /// Splits a spread at `index` back into two single pages.
    pub fn split_spread_at(&mut self, index: usize) -> AppResult<()> {
        if index >= self.pages.len() || !self.pages[index].is_spread() {
            return Err(AppError::invalid_argument("page is not a spread"));
        }

        let right_image = self.pages[index].images.pop().ok_or_else(|| {
            AppError::invalid_argument("spread page lost its right image")
        })?;
        let right = Page {
            images: vec![right_image],
            angle_degrees: self.pages[index].angle_degrees,
            border_override: self.pages[index].border_override,
        };
        self.pages.insert(index + 1, right);
        if self.current > index {
            self.current += 1;
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        for page in &mut self.pages {
            page.reset();
        }
        self.current = 0;
        self.grayscale = false;
        self.remove_borders = false;
    }
}

const RASTER_EXTENSIONS: [&str; 6] = [".jpg", ".jpeg", ".png", ".gif", ".webp", ".bmp"];

fn is_recognized_entry(name: &str) -> bool {
    if name.starts_with("__MACOSX") {
        return false;
    }
    if name.starts_with("Page ") {
        return true;
    }
    let lowered = name.to_ascii_lowercase();
    RASTER_EXTENSIONS
        .iter()
        .any(|extension| lowered.ends_with(extension))
}

fn numeric_token(name: &str) -> Option<u64> {
    let mut value: Option<u64> = None;
    for ch in name.chars() {
        if let Some(digit) = ch.to_digit(10) {
            value = Some(
                value
                    .unwrap_or(0)
                    .saturating_mul(10)
                    .saturating_add(u64::from(digit)),
            );
        } else if value.is_some() {
            break;
        }
    }
    value
}

fn compare_entries(a: &str, b: &str) -> Ordering {
    match (numeric_token(a), numeric_token(b)) {
        (Some(left), Some(right)) if left != right => left.cmp(&right),
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use crate::error::AppError;

    use super::{Album, CropMargins, Rotation, compare_entries, numeric_token};

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn synthesis_sorts_by_embedded_number_not_lexicographically() {
        let album = Album::synthesize(
            "fp",
            &names(&["page-2.jpg", "page-10.jpg", "page-1.jpg"]),
        )
        .expect("album should synthesize");

        let order: Vec<&str> = album
            .pages
            .iter()
            .map(|page| page.images[0].entry.as_str())
            .collect();
        assert_eq!(order, ["page-1.jpg", "page-2.jpg", "page-10.jpg"]);
    }

    #[test]
    fn synthesis_filters_resource_forks_and_unknown_extensions() {
        let album = Album::synthesize(
            "fp",
            &names(&[
                "__MACOSX/page-1.jpg",
                "notes.txt",
                "cover.webp",
                "Page 002",
            ]),
        )
        .expect("album should synthesize");

        let order: Vec<&str> = album
            .pages
            .iter()
            .map(|page| page.images[0].entry.as_str())
            .collect();
        assert_eq!(order, ["Page 002", "cover.webp"]);
    }

    #[test]
    fn synthesis_of_zero_recognized_entries_is_an_empty_album() {
        let result = Album::synthesize("fp", &names(&["readme.txt", "__MACOSX/a.png"]));
        assert!(matches!(result, Err(AppError::EmptyAlbum)));
    }

    #[test]
    fn digitless_names_fall_back_to_lexicographic_order() {
        let album = Album::synthesize("fp", &names(&["omega.png", "alpha.png"]))
            .expect("album should synthesize");
        assert_eq!(album.pages[0].images[0].entry, "alpha.png");
    }

    #[test]
    fn numeric_token_reads_the_first_run_only() {
        assert_eq!(numeric_token("ch03-page-12.png"), Some(3));
        assert_eq!(numeric_token("cover.png"), None);
        assert_eq!(
            numeric_token("99999999999999999999999999.png"),
            Some(u64::MAX)
        );
    }

    #[test]
    fn equal_tokens_tie_break_lexicographically() {
        assert!(compare_entries("7-b.png", "7-a.png").is_gt());
    }

    #[test]
    fn rotation_toggles_are_involutive() {
        assert_eq!(Rotation::None.toggled_left().toggled_left(), Rotation::None);
        assert_eq!(
            Rotation::None.toggled_right().toggled_right(),
            Rotation::None
        );
        assert_eq!(Rotation::None.toggled_left().toggled_right(), Rotation::None);
    }

    #[test]
    fn merge_and_split_round_trip_the_layout() {
        let mut album =
            Album::synthesize("fp", &names(&["p1.png", "p2.png", "p3.png"]))
                .expect("album should synthesize");

        album.merge_spread_at(0).expect("merge should succeed");
        assert_eq!(album.pages.len(), 2);
        assert!(album.pages[0].is_spread());
        assert_eq!(album.pages[0].images[1].entry, "p2.png");

        album.split_spread_at(0).expect("split should succeed");
        assert_eq!(album.pages.len(), 3);
        assert!(!album.pages[0].is_spread());
        assert_eq!(album.pages[1].images[0].entry, "p2.png");
    }

    #[test]
    fn merging_keeps_the_cursor_on_the_same_page() {
        let mut album =
            Album::synthesize("fp", &names(&["p1.png", "p2.png", "p3.png"]))
                .expect("album should synthesize");
        album.current = 2;

        album.merge_spread_at(0).expect("merge should succeed");
        assert_eq!(album.current, 1);
        assert_eq!(album.current_page().images[0].entry, "p3.png");
    }

    #[test]
    fn navigation_skips_invisible_pages() {
        let mut album =
            Album::synthesize("fp", &names(&["p1.png", "p2.png", "p3.png"]))
                .expect("album should synthesize");
        album.pages[1].images[0].visible = false;

        assert_eq!(album.next_visible_after(0), Some(2));
        assert_eq!(album.previous_visible_before(2), Some(0));
        assert_eq!(album.first_visible(), Some(0));
        assert_eq!(album.last_visible(), Some(2));
    }

    #[test]
    fn validate_rejects_out_of_range_cursor_and_empty_albums() {
        let mut album = Album::synthesize("fp", &names(&["p1.png"])).expect("album");
        album.current = 5;
        assert!(album.validate().is_err());

        album.current = 0;
        album.pages.clear();
        assert!(matches!(album.validate(), Err(AppError::EmptyAlbum)));
    }

    #[test]
    fn structural_state_round_trips_through_serde() {
        let mut album =
            Album::synthesize("fp", &names(&["p1.png", "p2.png"])).expect("album");
        album.grayscale = true;
        album.pages[0].images[0].rotation = Rotation::Left;
        album.pages[0].images[0].crop = CropMargins {
            top: 4,
            bottom: 0,
            left: 2,
            right: 0,
        };
        album.pages[1].angle_degrees = 1.5;
        album.pages[1].border_override = true;

        let encoded = serde_json::to_string(&album).expect("album should serialize");
        let decoded: Album = serde_json::from_str(&encoded).expect("album should deserialize");
        assert_eq!(decoded, album);
    }

    #[test]
    fn reset_restores_defaults_everywhere() {
        let mut album =
            Album::synthesize("fp", &names(&["p1.png", "p2.png"])).expect("album");
        album.current = 1;
        album.grayscale = true;
        album.remove_borders = true;
        album.pages[0].images[0].visible = false;
        album.pages[0].angle_degrees = 2.0;

        album.reset();

        assert_eq!(album.current, 0);
        assert!(!album.grayscale);
        assert!(!album.remove_borders);
        assert!(album.pages[0].images[0].visible);
        assert_eq!(album.pages[0].angle_degrees, 0.0);
    }
}
