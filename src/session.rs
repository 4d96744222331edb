//! The reader session: one open album, its archive handle, and the
//! preparation machinery. All core operations hang off this object; there is
//! no process-wide state.

use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::album::{Album, CropEdge};
use crate::archive::{ComicArchive, open_archive};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::prepare::worker::{PrepareRequest, ReadAheadWorker};
use crate::prepare::{
    ImagePlan, PagePlan, PageSlot, PageState, PreparedPage, SharedArchive, prepare_page,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateDirection {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderScope {
    Global,
    Page,
}

pub struct ReaderSession {
    album: Album,
    slots: Vec<Arc<PageSlot>>,
    archive: SharedArchive,
    config: Arc<Config>,
    viewport: Option<(u32, u32)>,
    worker: ReadAheadWorker,
}

impl ReaderSession {
    /// Opens an archive and synthesizes the default page layout from its
    /// entry list.
    pub fn open(path: impl AsRef<Path>, config: Config) -> AppResult<Self> {
        let archive = open_archive(path, &config)?;
        let album = Album::synthesize(archive.fingerprint(), archive.list())?;
        Self::from_archive(archive, album, config)
    }

    /// Opens an archive and repopulates the album from a previously
    /// serialized structural layout instead of synthesizing defaults.
    pub fn open_with_layout(
        path: impl AsRef<Path>,
        album: Album,
        config: Config,
    ) -> AppResult<Self> {
        let archive = open_archive(path, &config)?;
        album.validate()?;
        if album.fingerprint != archive.fingerprint() {
            return Err(AppError::invalid_argument(
                "saved layout fingerprint does not match the archive",
            ));
        }
        Self::from_archive(archive, album, config)
    }

    pub(crate) fn from_archive(
        archive: Box<dyn ComicArchive>,
        album: Album,
        config: Config,
    ) -> AppResult<Self> {
        album.validate()?;
        config.validate()?;
        let slots = (0..album.pages.len())
            .map(|_| Arc::new(PageSlot::new()))
            .collect();

        Ok(Self {
            album,
            slots,
            archive: Arc::new(Mutex::new(archive)),
            config: Arc::new(config),
            viewport: None,
            worker: ReadAheadWorker::spawn(),
        })
    }

    pub fn album(&self) -> &Album {
        &self.album
    }

    pub fn fingerprint(&self) -> &str {
        &self.album.fingerprint
    }

    pub fn page_count(&self) -> usize {
        self.album.pages.len()
    }

    pub fn current_index(&self) -> usize {
        self.album.current
    }

    pub fn page_state(&self, index: usize) -> AppResult<PageState> {
        self.slot(index).map(|slot| slot.state())
    }

    /// Viewport used for the final downscale step. Cached pages are released
    /// so the next prepare targets the new size.
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        let viewport = Some((width.max(1), height.max(1)));
        if self.viewport != viewport {
            self.viewport = viewport;
            self.invalidate_all();
        }
    }

    /// Blocks until `index` is ready, then schedules read-ahead for the next
    /// visible page and releases pages that left the retention window.
    pub fn goto_page(&mut self, index: usize) -> AppResult<()> {
        if index >= self.album.pages.len() {
            return Err(AppError::invalid_argument(format!(
                "page index {index} is out of range for {} pages",
                self.album.pages.len()
            )));
        }
        self.album.current = index;
        self.prepare_index(index)?;
        self.schedule_read_ahead();
        self.evict_distant();
        Ok(())
    }

    /// Advances to the next visible page. False when already on the last one.
    pub fn next_page(&mut self) -> AppResult<bool> {
        match self.album.next_visible_after(self.album.current) {
            Some(index) => self.goto_page(index).map(|_| true),
            None => Ok(false),
        }
    }

    pub fn previous_page(&mut self) -> AppResult<bool> {
        match self.album.previous_visible_before(self.album.current) {
            Some(index) => self.goto_page(index).map(|_| true),
            None => Ok(false),
        }
    }

    pub fn first_page(&mut self) -> AppResult<bool> {
        match self.album.first_visible() {
            Some(index) => self.goto_page(index).map(|_| true),
            None => Ok(false),
        }
    }

    pub fn last_page(&mut self) -> AppResult<bool> {
        match self.album.last_visible() {
            Some(index) => self.goto_page(index).map(|_| true),
            None => Ok(false),
        }
    }

    /// Read-only projection for rendering; prepares synchronously when the
    /// page is not ready yet.
    pub fn renderable_state(&self, index: usize) -> AppResult<PreparedPage> {
        let slot = self.slot(index)?;
        if slot.state() != PageState::Ready {
            self.prepare_index(index)?;
        }
        self.slot(index)?
            .snapshot()
            .ok_or_else(|| AppError::invalid_argument("page state was released during read"))
    }

    pub fn toggle_rotation(&mut self, direction: RotateDirection) -> AppResult<()> {
        let current = self.album.current;
        for image in &mut self.album.pages[current].images {
            image.rotation = match direction {
                RotateDirection::Left => image.rotation.toggled_left(),
                RotateDirection::Right => image.rotation.toggled_right(),
            };
        }
        self.slots[current].invalidate();
        self.refresh()
    }

    pub fn adjust_crop_margin(&mut self, edge: CropEdge, delta: i32) -> AppResult<()> {
        let current = self.album.current;
        for image in &mut self.album.pages[current].images {
            let margin = match edge {
                CropEdge::Top => &mut image.crop.top,
                CropEdge::Bottom => &mut image.crop.bottom,
                CropEdge::Left => &mut image.crop.left,
                CropEdge::Right => &mut image.crop.right,
            };
            *margin = apply_delta(*margin, delta);
        }
        self.slots[current].invalidate();
        self.refresh()
    }

    pub fn adjust_rotation_angle(&mut self, delta_degrees: f32) -> AppResult<()> {
        let current = self.album.current;
        self.album.pages[current].angle_degrees += delta_degrees;
        self.slots[current].invalidate();
        self.refresh()
    }

    pub fn toggle_border_removal(&mut self, scope: BorderScope) -> AppResult<()> {
        match scope {
            BorderScope::Global => {
                self.album.remove_borders = !self.album.remove_borders;
                self.invalidate_all();
            }
            BorderScope::Page => {
                let current = self.album.current;
                self.album.pages[current].border_override =
                    !self.album.pages[current].border_override;
                self.slots[current].invalidate();
            }
        }
        self.refresh()
    }

    pub fn toggle_grayscale(&mut self) -> AppResult<()> {
        self.album.grayscale = !self.album.grayscale;
        self.invalidate_all();
        self.refresh()
    }

    /// Hides the current page and moves to a neighbor. Refuses to hide the
    /// only visible page.
    pub fn hide_current_page(&mut self) -> AppResult<()> {
        let current = self.album.current;
        for image in &mut self.album.pages[current].images {
            image.visible = false;
        }
        self.slots[current].invalidate();

        if self.next_page()? || self.previous_page()? {
            return Ok(());
        }

        for image in &mut self.album.pages[current].images {
            image.visible = true;
        }
        Err(AppError::invalid_argument(
            "cannot hide the only visible page",
        ))
    }

    /// Merges the current page with the following one into a spread.
    pub fn merge_spread(&mut self) -> AppResult<()> {
        let current = self.album.current;
        self.album.merge_spread_at(current)?;
        self.slots.remove(current + 1);
        self.slots[current].invalidate();
        self.refresh()
    }

    /// Splits the current spread back into two single pages.
    pub fn split_spread(&mut self) -> AppResult<()> {
        let current = self.album.current;
        self.album.split_spread_at(current)?;
        self.slots.insert(current + 1, Arc::new(PageSlot::new()));
        self.slots[current].invalidate();
        self.refresh()
    }

    pub fn reset_page(&mut self) -> AppResult<()> {
        let current = self.album.current;
        self.album.pages[current].reset();
        self.slots[current].invalidate();
        self.refresh()
    }

    pub fn reset_album(&mut self) -> AppResult<()> {
        self.album.reset();
        self.invalidate_all();
        self.refresh()
    }

    fn slot(&self, index: usize) -> AppResult<&Arc<PageSlot>> {
        self.slots.get(index).ok_or_else(|| {
            AppError::invalid_argument(format!(
                "page index {index} is out of range for {} pages",
                self.slots.len()
            ))
        })
    }

    fn refresh(&mut self) -> AppResult<()> {
        self.prepare_index(self.album.current)?;
        self.schedule_read_ahead();
        Ok(())
    }

    fn prepare_index(&self, index: usize) -> AppResult<()> {
        let plan = self.plan_for(index);
        prepare_page(
            &self.slots[index],
            &plan,
            &self.archive,
            &self.config,
            self.viewport,
        )
    }

    fn plan_for(&self, index: usize) -> PagePlan {
        let page = &self.album.pages[index];
        PagePlan {
            images: page
                .images
                .iter()
                .filter(|image| image.visible)
                .map(|image| ImagePlan {
                    entry: image.entry.clone(),
                    rotation: image.rotation,
                    crop: image.crop,
                })
                .collect(),
            angle_degrees: page.angle_degrees,
            grayscale: self.album.grayscale,
            remove_borders: self.album.remove_borders || page.border_override,
        }
    }

    fn schedule_read_ahead(&self) {
        let Some(next) = self.album.next_visible_after(self.album.current) else {
            return;
        };
        self.worker.schedule(PrepareRequest {
            page_index: next,
            plan: self.plan_for(next),
            plan_epoch: self.slots[next].epoch(),
            slot: Arc::clone(&self.slots[next]),
            archive: Arc::clone(&self.archive),
            config: Arc::clone(&self.config),
            viewport: self.viewport,
        });
    }

    fn invalidate_all(&self) {
        for slot in &self.slots {
            slot.invalidate();
        }
    }

    fn evict_distant(&self) {
        let current = self.album.current;
        let low = current.saturating_sub(self.config.prepare.retain_behind);
        let high = current.saturating_add(self.config.prepare.retain_ahead);
        for (index, slot) in self.slots.iter().enumerate() {
            if (index < low || index > high) && slot.state() != PageState::Absent {
                slot.invalidate();
            }
        }
    }
}

fn apply_delta(value: u32, delta: i32) -> u32 {
    if delta >= 0 {
        value.saturating_add(delta as u32)
    } else {
        value.saturating_sub(delta.unsigned_abs())
    }
}
