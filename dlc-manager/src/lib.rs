//! Core, transport-agnostic downloadable-content pack manager.
//!
//! [`manager::DlcManager`] negotiates a superpack's binary metadata with a
//! remote server (through the [`downloader::Downloader`] seam), reconciles
//! it against whatever is already cached locally, and then serves
//! [`manager::DlcManager::request_pack`] calls by downloading whichever
//! files are still missing, in priority order, with dependency packs
//! expanded automatically.
//!
//! This crate has no knowledge of HTTP; see `dlc-manager-http` for a
//! blocking-`reqwest`-based [`downloader::Downloader`].

pub mod downloader;
pub mod error;
pub mod format;
pub mod fs;
pub mod hints;
pub mod manager;
pub mod meta_index;
pub mod pack_request;
pub mod request_manager;
pub mod scanner;
pub mod signal;

pub use error::{CodecError, ManagerError, Result};
pub use hints::Hints;
pub use manager::DlcManager;
pub use pack_request::{PackRequestHandle, PackRequestSnapshot, RequestState};
