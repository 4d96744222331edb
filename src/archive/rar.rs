//! Sequential (RAR-style) archive access.
//!
//! The underlying decoder only supports forward iteration through a single
//! cursor, so reads in ascending entry order are cheap while any backward
//! read pays a full reopen-and-rescan ("reload"). That asymmetric cost is
//! part of this variant's contract; the page-ordering step keeps linear
//! reading monotone, and random jumps accept the O(position) rescan.
//!
//! The cursor logic is generic over a volume abstraction so the reload
//! contract stays testable without `.rar` fixtures, and the unrar handles
//! live on a dedicated thread that serializes every read.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender, channel};

use image::DynamicImage;
use unrar::Archive;

use crate::error::{AppError, AppResult};

use super::{ComicArchive, decode_image};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SequentialEntry {
    pub(crate) name: String,
    pub(crate) size: u64,
}

/// A reopenable source of forward-only entry streams.
pub(crate) trait SequentialVolume: Send {
    type Stream: SequentialStream;

    fn scan_entries(&self) -> AppResult<Vec<SequentialEntry>>;
    fn open_stream(&self) -> AppResult<Self::Stream>;
}

/// One pass over a volume: advance to the next file entry, optionally
/// consuming the current entry's bytes before moving on.
pub(crate) trait SequentialStream {
    fn next_entry(&mut self) -> AppResult<Option<SequentialEntry>>;
    fn read_current(&mut self) -> AppResult<Vec<u8>>;
}

pub(crate) struct SequentialCursor<V: SequentialVolume> {
    volume: V,
    entries: Vec<SequentialEntry>,
    stream: Option<V::Stream>,
    /// List index of the last successfully matched entry.
    matched: Option<usize>,
    /// Decoded image for `matched`, served without touching the stream.
    cached: Option<DynamicImage>,
    reloads: u64,
}

impl<V: SequentialVolume> SequentialCursor<V> {
    pub(crate) fn new(volume: V) -> AppResult<Self> {
        let entries = volume.scan_entries()?;
        let stream = volume.open_stream()?;
        Ok(Self {
            volume,
            entries,
            stream: Some(stream),
            matched: None,
            cached: None,
            reloads: 0,
        })
    }

    pub(crate) fn entry_names(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.name.clone()).collect()
    }

    pub(crate) fn reloads(&self) -> u64 {
        self.reloads
    }

    pub(crate) fn read(&mut self, name: &str) -> AppResult<DynamicImage> {
        let Some(target) = self.entries.iter().position(|entry| entry.name == name) else {
            return Err(AppError::EntryNotFound(name.to_string()));
        };

        if let Some(matched) = self.matched {
            if target == matched {
                if let Some(image) = &self.cached {
                    return Ok(image.clone());
                }
            }
            if target <= matched {
                // The cursor already moved past the target; start over.
                self.reload()?;
            }
        }
        if self.stream.is_none() {
            self.reload()?;
        }

        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| AppError::invalid_argument("sequential stream unavailable"))?;

        loop {
            match stream.next_entry()? {
                Some(entry) if entry.name == name && entry.size > 0 => {
                    let data = match stream.read_current() {
                        Ok(data) => data,
                        Err(err) => {
                            // Stream position is unknown after a failed read.
                            self.stream = None;
                            self.matched = None;
                            self.cached = None;
                            return Err(err);
                        }
                    };
                    self.matched = Some(target);
                    return match decode_image(name, &data) {
                        Ok(image) => {
                            self.cached = Some(image.clone());
                            Ok(image)
                        }
                        Err(err) => {
                            self.cached = None;
                            Err(err)
                        }
                    };
                }
                Some(_) => {}
                None => {
                    self.stream = None;
                    self.matched = None;
                    self.cached = None;
                    return Err(AppError::EntryNotFound(name.to_string()));
                }
            }
        }
    }

    fn reload(&mut self) -> AppResult<()> {
        self.stream = None;
        self.stream = Some(self.volume.open_stream()?);
        self.matched = None;
        self.cached = None;
        self.reloads += 1;
        log::debug!("sequential archive reloaded (total {})", self.reloads);
        Ok(())
    }
}

struct RarVolume {
    path: PathBuf,
}

impl SequentialVolume for RarVolume {
    type Stream = RarStream;

    fn scan_entries(&self) -> AppResult<Vec<SequentialEntry>> {
        let archive = Archive::new(&self.path).open_for_listing().map_err(|source| {
            AppError::archive_open(format!(
                "failed to open rar {}: {source}",
                self.path.display()
            ))
        })?;

        let mut entries = Vec::new();
        for header in archive {
            let header = header.map_err(|source| {
                AppError::archive_open(format!(
                    "failed to list rar {}: {source}",
                    self.path.display()
                ))
            })?;
            if header.is_file() {
                entries.push(SequentialEntry {
                    name: header.filename.to_string_lossy().into_owned(),
                    size: header.unpacked_size as u64,
                });
            }
        }
        Ok(entries)
    }

    fn open_stream(&self) -> AppResult<RarStream> {
        let archive = Archive::new(&self.path)
            .open_for_processing()
            .map_err(|source| {
                AppError::archive_open(format!(
                    "failed to open rar {}: {source}",
                    self.path.display()
                ))
            })?;
        Ok(RarStream {
            next: Some(archive),
            pending: None,
        })
    }
}

struct RarStream {
    next: Option<unrar::OpenArchive<unrar::Process, unrar::CursorBeforeHeader>>,
    pending: Option<unrar::OpenArchive<unrar::Process, unrar::CursorBeforeFile>>,
}

impl SequentialStream for RarStream {
    fn next_entry(&mut self) -> AppResult<Option<SequentialEntry>> {
        loop {
            if let Some(pending) = self.pending.take() {
                self.next = Some(pending.skip().map_err(stream_error)?);
            }
            let Some(archive) = self.next.take() else {
                return Ok(None);
            };
            match archive.read_header().map_err(stream_error)? {
                Some(before_file) => {
                    let header = before_file.entry();
                    let entry = SequentialEntry {
                        name: header.filename.to_string_lossy().into_owned(),
                        size: header.unpacked_size as u64,
                    };
                    let is_file = header.is_file();
                    self.pending = Some(before_file);
                    if is_file {
                        return Ok(Some(entry));
                    }
                }
                None => return Ok(None),
            }
        }
    }

    fn read_current(&mut self) -> AppResult<Vec<u8>> {
        let pending = self
            .pending
            .take()
            .ok_or_else(|| AppError::invalid_argument("no pending rar entry to read"))?;
        let (data, rest) = pending.read().map_err(stream_error)?;
        self.next = Some(rest);
        Ok(data)
    }
}

fn stream_error(source: unrar::error::UnrarError) -> AppError {
    AppError::archive_open(format!("rar stream error: {source}"))
}

enum RarRequest {
    Read(String),
    Shutdown,
}

/// Front handle for the sequential variant. The unrar cursor lives on its own
/// thread and requests are answered one at a time, which both serializes all
/// reads and keeps the handle `Send` for the shared-archive mutex.
pub struct RarComicBook {
    fingerprint: String,
    entries: Vec<String>,
    request_tx: Sender<RarRequest>,
    response_rx: Receiver<AppResult<DynamicImage>>,
}

impl RarComicBook {
    pub fn open(path: impl AsRef<Path>, fingerprint: String) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let (request_tx, request_rx) = channel::<RarRequest>();
        let (response_tx, response_rx) = channel::<AppResult<DynamicImage>>();
        let (bootstrap_tx, bootstrap_rx) = channel::<AppResult<Vec<String>>>();

        std::thread::Builder::new()
            .name("cvw-rar".to_string())
            .spawn(move || rar_reader_main(path, request_rx, response_tx, bootstrap_tx))
            .map_err(|source| {
                AppError::io_with_context(source, "failed to spawn rar reader thread")
            })?;

        let entries = bootstrap_rx
            .recv()
            .map_err(|_| AppError::archive_open("rar reader thread exited during open"))??;

        Ok(Self {
            fingerprint,
            entries,
            request_tx,
            response_rx,
        })
    }
}

fn rar_reader_main(
    path: PathBuf,
    request_rx: Receiver<RarRequest>,
    response_tx: Sender<AppResult<DynamicImage>>,
    bootstrap_tx: Sender<AppResult<Vec<String>>>,
) {
    let mut cursor = match SequentialCursor::new(RarVolume { path }) {
        Ok(cursor) => {
            if bootstrap_tx.send(Ok(cursor.entry_names())).is_err() {
                return;
            }
            cursor
        }
        Err(err) => {
            let _ = bootstrap_tx.send(Err(err));
            return;
        }
    };

    while let Ok(request) = request_rx.recv() {
        match request {
            RarRequest::Read(name) => {
                if response_tx.send(cursor.read(&name)).is_err() {
                    break;
                }
            }
            RarRequest::Shutdown => break,
        }
    }
}

impl ComicArchive for RarComicBook {
    fn list(&self) -> &[String] {
        &self.entries
    }

    fn read_entry(&mut self, name: &str) -> AppResult<DynamicImage> {
        self.request_tx
            .send(RarRequest::Read(name.to_string()))
            .map_err(|_| AppError::archive_open("rar reader thread is gone"))?;
        self.response_rx
            .recv()
            .map_err(|_| AppError::archive_open("rar reader thread is gone"))?
    }

    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl Drop for RarComicBook {
    fn drop(&mut self) {
        let _ = self.request_tx.send(RarRequest::Shutdown);
    }
}
