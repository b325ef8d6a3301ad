//! Local-folder course learning cache
//!
//! Lets a learner point the app at a folder of downloaded course videos and
//! pick up where they left off. The crate keeps three things consistent:
//!
//! - the folder grant ([`storage::HandleStore`])
//! - the scanned video index ([`library::MetadataCache`])
//! - watch progress, stored in the local database and mirrored into the
//!   folder itself ([`progress::ProgressStore`])
//!
//! [`player::PlayerSession`] owns the active video's resources and turns
//! playback events into progress saves; [`sync::SyncQueue`] delivers saved
//! progress to a remote endpoint when a device id is configured.
//! [`CourseWorkspace`] wires everything together.

pub mod config;
pub mod error;
pub mod file;
pub mod library;
pub mod player;
pub mod progress;
pub mod storage;
pub mod sync;
pub mod workspace;

pub use config::CacheConfig;
pub use error::{CourseCacheError, ErrorCategory, Result};
pub use file::{
    AccessMode, CapabilityDetector, DirectoryHandle, HandleOpener, LocalDirectory, LocalOpener,
    NativeDetector, PermissionState, PermissionStatus, PlatformSupport,
};
pub use library::{MetadataCache, ScanOutcome};
pub use player::{PlaybackSurface, PlayerEvent, PlayerSession, PlayerState, ResourceLedger};
pub use progress::ProgressStore;
pub use storage::{
    Database, HandleReadiness, HandleStore, ProgressRecord, SubtitleTrack, VideoEntry,
};
pub use sync::{DeviceId, DrainReport, HttpSyncTransport, SyncQueue, SyncTransport};
pub use workspace::{CourseView, CourseWorkspace};
