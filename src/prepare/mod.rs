//! Lazy per-page preparation and its cache.
//!
//! Preparation is idempotent and guarded by a per-page lock, so the
//! synchronous prepare triggered by navigation and the asynchronous
//! read-ahead prepare can race without duplicating archive reads. An epoch
//! counter bumped on invalidation keeps a prepare that raced a structural
//! mutation from storing stale state.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};

use image::RgbaImage;

use crate::album::{CropMargins, Rotation};
use crate::archive::ComicArchive;
use crate::color::{self, Color, Region};
use crate::config::Config;
use crate::error::{AppError, AppResult};

pub(crate) mod transform;
pub(crate) mod worker;

pub(crate) type SharedArchive = Arc<Mutex<Box<dyn ComicArchive>>>;

/// Fraction of an image's width sampled for the edge background colors.
const BACKGROUND_STRIP_DIVISOR: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<[u8]>,
}

impl RgbaFrame {
    pub(crate) fn from_rgba_image(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            pixels: image.into_raw().into(),
        }
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    pub fn pixels_to_vec(&self) -> Vec<u8> {
        self.pixels.as_ref().to_vec()
    }
}

/// Renderable projection of one prepared page.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedPage {
    pub images: Vec<RgbaFrame>,
    /// Left and right letterbox fill colors, sampled from the outer strips
    /// of the first and last image.
    pub background_colors: [Color; 2],
    pub total_width: u32,
    pub max_height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Absent,
    Preparing,
    Ready,
}

const STATE_ABSENT: u8 = 0;
const STATE_PREPARING: u8 = 1;
const STATE_READY: u8 = 2;

/// Per-page cache cell. The mutex doubles as the exclusive-preparation lock;
/// the atomic state answers "is this page ready" without taking it.
#[derive(Debug)]
pub(crate) struct PageSlot {
    cache: Mutex<Option<PreparedPage>>,
    state: AtomicU8,
    epoch: AtomicU64,
}

impl PageSlot {
    pub(crate) fn new() -> Self {
        Self {
            cache: Mutex::new(None),
            state: AtomicU8::new(STATE_ABSENT),
            epoch: AtomicU64::new(0),
        }
    }

    pub(crate) fn state(&self) -> PageState {
        match self.state.load(Ordering::SeqCst) {
            STATE_PREPARING => PageState::Preparing,
            STATE_READY => PageState::Ready,
            _ => PageState::Absent,
        }
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn snapshot(&self) -> Option<PreparedPage> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Releases cached raster state. An in-flight prepare holding the lock
    /// observes the epoch bump and discards its result on completion.
    pub(crate) fn invalidate(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        match self.cache.try_lock() {
            Ok(mut cache) => {
                *cache = None;
                self.state.store(STATE_ABSENT, Ordering::SeqCst);
            }
            Err(TryLockError::Poisoned(poisoned)) => {
                let mut cache = poisoned.into_inner();
                *cache = None;
                self.state.store(STATE_ABSENT, Ordering::SeqCst);
            }
            Err(TryLockError::WouldBlock) => {}
        }
    }
}

/// Structural snapshot of one image reference, decoupled from the album so
/// the read-ahead worker never touches shared mutable state.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ImagePlan {
    pub(crate) entry: String,
    pub(crate) rotation: Rotation,
    pub(crate) crop: CropMargins,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PagePlan {
    /// Visible image references only.
    pub(crate) images: Vec<ImagePlan>,
    pub(crate) angle_degrees: f32,
    pub(crate) grayscale: bool,
    pub(crate) remove_borders: bool,
}

pub(crate) fn prepare_page(
    slot: &PageSlot,
    plan: &PagePlan,
    archive: &SharedArchive,
    config: &Config,
    viewport: Option<(u32, u32)>,
) -> AppResult<()> {
    prepare_with_epoch(slot, plan, archive, config, viewport, None)
}

/// Read-ahead entry point: `plan` was snapshotted at `plan_epoch`, so the
/// prepare is silently skipped when a structural mutation has landed since.
pub(crate) fn prepare_page_snapshot(
    slot: &PageSlot,
    plan: &PagePlan,
    archive: &SharedArchive,
    config: &Config,
    viewport: Option<(u32, u32)>,
    plan_epoch: u64,
) -> AppResult<()> {
    prepare_with_epoch(slot, plan, archive, config, viewport, Some(plan_epoch))
}

fn prepare_with_epoch(
    slot: &PageSlot,
    plan: &PagePlan,
    archive: &SharedArchive,
    config: &Config,
    viewport: Option<(u32, u32)>,
    expected_epoch: Option<u64>,
) -> AppResult<()> {
    let mut cache = slot.cache.lock().unwrap_or_else(PoisonError::into_inner);
    if cache.is_some() {
        return Ok(());
    }

    let epoch = slot.epoch.load(Ordering::SeqCst);
    if expected_epoch.is_some_and(|expected| expected != epoch) {
        return Ok(());
    }
    slot.state.store(STATE_PREPARING, Ordering::SeqCst);

    match build_prepared(plan, archive, config, viewport) {
        Ok(prepared) if slot.epoch.load(Ordering::SeqCst) == epoch => {
            *cache = Some(prepared);
            slot.state.store(STATE_READY, Ordering::SeqCst);
            Ok(())
        }
        Ok(_) => {
            // A structural mutation raced this prepare; the result no longer
            // describes the page.
            *cache = None;
            slot.state.store(STATE_ABSENT, Ordering::SeqCst);
            Ok(())
        }
        Err(err) => {
            *cache = None;
            slot.state.store(STATE_ABSENT, Ordering::SeqCst);
            Err(err)
        }
    }
}

fn build_prepared(
    plan: &PagePlan,
    archive: &SharedArchive,
    config: &Config,
    viewport: Option<(u32, u32)>,
) -> AppResult<PreparedPage> {
    if plan.images.is_empty() {
        return Err(AppError::invalid_argument("page has no visible images"));
    }
    let filter = config.prepare.filter_type()?;

    let mut images = Vec::with_capacity(plan.images.len());
    for image_plan in &plan.images {
        // Archive reads are serialized; the transform work runs unlocked so
        // other pages' reads interleave with it.
        let decoded = {
            let mut guard = archive.lock().unwrap_or_else(PoisonError::into_inner);
            guard.read_entry(&image_plan.entry)?
        };
        images.push(transform::apply(
            decoded, image_plan, plan, config, viewport, filter,
        )?);
    }

    let first = &images[0];
    let last = &images[images.len() - 1];
    let background_colors = [
        strip_color(first, left_strip(first)),
        strip_color(last, right_strip(last)),
    ];

    let mut total_width = 0u32;
    let mut max_height = 0u32;
    for image in &images {
        total_width = total_width.saturating_add(image.width());
        max_height = max_height.max(image.height());
    }

    Ok(PreparedPage {
        images: images.into_iter().map(RgbaFrame::from_rgba_image).collect(),
        background_colors,
        total_width,
        max_height,
    })
}

fn left_strip(image: &RgbaImage) -> Region {
    Region {
        x: 0,
        y: 0,
        width: (image.width() / BACKGROUND_STRIP_DIVISOR).max(1),
        height: image.height(),
    }
}

fn right_strip(image: &RgbaImage) -> Region {
    let width = (image.width() / BACKGROUND_STRIP_DIVISOR).max(1);
    Region {
        x: image.width().saturating_sub(width),
        y: 0,
        width,
        height: image.height(),
    }
}

fn strip_color(image: &RgbaImage, region: Region) -> Color {
    color::prominent_color(image, region)
        .unwrap_or_else(|| color::average_color(image, region))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use image::{DynamicImage, Rgba, RgbaImage};

    use crate::album::{CropMargins, Rotation};
    use crate::archive::ComicArchive;
    use crate::color::Color;
    use crate::config::Config;
    use crate::error::{AppError, AppResult};

    use super::{ImagePlan, PagePlan, PageSlot, PageState, SharedArchive, prepare_page};

    struct CountingArchive {
        entries: Vec<String>,
        reads: Arc<AtomicUsize>,
        fail_reads: usize,
    }

    impl CountingArchive {
        fn new(entries: &[&str]) -> (Self, Arc<AtomicUsize>) {
            let reads = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    entries: entries.iter().map(|e| e.to_string()).collect(),
                    reads: Arc::clone(&reads),
                    fail_reads: 0,
                },
                reads,
            )
        }

        fn failing_first(entries: &[&str]) -> (Self, Arc<AtomicUsize>) {
            let (mut archive, reads) = Self::new(entries);
            archive.fail_reads = 1;
            (archive, reads)
        }
    }

    impl ComicArchive for CountingArchive {
        fn list(&self) -> &[String] {
            &self.entries
        }

        fn read_entry(&mut self, name: &str) -> AppResult<DynamicImage> {
            if !self.entries.iter().any(|entry| entry == name) {
                return Err(AppError::EntryNotFound(name.to_string()));
            }
            let read = self.reads.fetch_add(1, Ordering::SeqCst);
            if read < self.fail_reads {
                return Err(AppError::decode(name, "simulated decode failure"));
            }
            Ok(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                40,
                60,
                Rgba([120, 80, 40, 255]),
            )))
        }

        fn fingerprint(&self) -> &str {
            "test-fingerprint"
        }
    }

    fn shared(archive: CountingArchive) -> SharedArchive {
        Arc::new(Mutex::new(Box::new(archive) as Box<dyn ComicArchive>))
    }

    fn plan_for(entries: &[&str]) -> PagePlan {
        PagePlan {
            images: entries
                .iter()
                .map(|entry| ImagePlan {
                    entry: entry.to_string(),
                    rotation: Rotation::None,
                    crop: CropMargins::default(),
                })
                .collect(),
            angle_degrees: 0.0,
            grayscale: false,
            remove_borders: false,
        }
    }

    #[test]
    fn prepare_populates_layout_dimensions_for_a_spread() {
        let (archive, _) = CountingArchive::new(&["left.png", "right.png"]);
        let archive = shared(archive);
        let slot = PageSlot::new();
        let plan = plan_for(&["left.png", "right.png"]);

        prepare_page(&slot, &plan, &archive, &Config::default(), None)
            .expect("prepare should succeed");

        assert_eq!(slot.state(), PageState::Ready);
        let prepared = slot.snapshot().expect("slot should hold prepared state");
        assert_eq!(prepared.images.len(), 2);
        assert_eq!(prepared.total_width, 80);
        assert_eq!(prepared.max_height, 60);
        assert_eq!(
            prepared.background_colors[0],
            Color {
                r: 120,
                g: 80,
                b: 40
            }
        );
    }

    #[test]
    fn a_second_prepare_is_a_no_op() {
        let (archive, reads) = CountingArchive::new(&["page.png"]);
        let archive = shared(archive);
        let slot = PageSlot::new();
        let plan = plan_for(&["page.png"]);
        let config = Config::default();

        prepare_page(&slot, &plan, &archive, &config, None).expect("prepare should succeed");
        prepare_page(&slot, &plan, &archive, &config, None).expect("prepare should succeed");

        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_prepares_share_one_archive_read() {
        let (archive, reads) = CountingArchive::new(&["page.png"]);
        let archive = shared(archive);
        let slot = PageSlot::new();
        let plan = plan_for(&["page.png"]);
        let config = Config::default();

        std::thread::scope(|scope| {
            for _ in 0..2 {
                scope.spawn(|| {
                    prepare_page(&slot, &plan, &archive, &config, None)
                        .expect("prepare should succeed");
                });
            }
        });

        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert_eq!(slot.state(), PageState::Ready);
    }

    #[test]
    fn failure_reverts_to_absent_and_a_retry_recovers() {
        let (archive, _) = CountingArchive::failing_first(&["page.png"]);
        let archive = shared(archive);
        let slot = PageSlot::new();
        let plan = plan_for(&["page.png"]);
        let config = Config::default();

        let result = prepare_page(&slot, &plan, &archive, &config, None);
        assert!(matches!(result, Err(AppError::Decode { .. })));
        assert_eq!(slot.state(), PageState::Absent);
        assert!(slot.snapshot().is_none());

        prepare_page(&slot, &plan, &archive, &config, None).expect("retry should succeed");
        assert_eq!(slot.state(), PageState::Ready);
    }

    #[test]
    fn invalidate_releases_ready_state() {
        let (archive, reads) = CountingArchive::new(&["page.png"]);
        let archive = shared(archive);
        let slot = PageSlot::new();
        let plan = plan_for(&["page.png"]);
        let config = Config::default();

        prepare_page(&slot, &plan, &archive, &config, None).expect("prepare should succeed");
        slot.invalidate();

        assert_eq!(slot.state(), PageState::Absent);
        assert!(slot.snapshot().is_none());

        prepare_page(&slot, &plan, &archive, &config, None).expect("prepare should succeed");
        assert_eq!(reads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn page_without_visible_images_is_rejected() {
        let (archive, _) = CountingArchive::new(&[]);
        let archive = shared(archive);
        let slot = PageSlot::new();
        let plan = plan_for(&[]);

        let result = prepare_page(&slot, &plan, &archive, &Config::default(), None);
        assert!(matches!(result, Err(AppError::InvalidArgument(_))));
        assert_eq!(slot.state(), PageState::Absent);
    }
}
