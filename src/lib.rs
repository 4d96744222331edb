//! Core of a page-at-a-time comic-book viewer: archive access over
//! zip/rar/pdf containers, automatic scan-border cropping, and a lazy
//! page-preparation pipeline with background read-ahead. The rendering front
//! end and on-disk preference storage live outside this crate and talk to it
//! through [`session::ReaderSession`].

pub mod album;
pub mod archive;
pub mod color;
pub mod config;
pub mod crop;
pub mod error;
pub mod prepare;
pub mod session;
