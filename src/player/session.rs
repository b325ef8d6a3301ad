// CourseCache - Local-folder course learning cache
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Player session
//!
//! Owns the media and subtitle resources of exactly one active video and
//! turns playback events into progress saves.
//!
//! # Lifecycle
//! - `load` flushes the outgoing video's progress, releases its resources
//!   and only then acquires the new ones
//! - `Ready` is entered after the resume position has been applied
//! - `ended` saves immediately and signals `AdvanceToNext`; choosing the
//!   next video is up to the caller
//! - `teardown` flushes once more and releases everything
//!
//! Time updates are debounced with the long playback interval, pauses with
//! the short pause interval.

use crate::config::CacheConfig;
use crate::error::{CourseCacheError, Result};
use crate::file::handle::DirectoryHandle;
use crate::library::subtitles::find_subtitles;
use crate::player::resources::{MediaResource, ResourceLedger, SubtitleResource};
use crate::player::scheduler::FlushScheduler;
use crate::player::state::PlayerState;
use crate::player::surface::PlaybackSurface;
use crate::progress::ProgressStore;
use crate::storage::models::{ProgressRecord, SubtitleTrack, VideoEntry};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// Notifications for the caller's UI and playlist logic
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    StateChanged { from: PlayerState, to: PlayerState },
    /// Resources attached and resume position applied
    Ready { lecture_key: String, resume_at: f64 },
    /// The video played to the end; the caller picks what comes next
    AdvanceToNext { finished: String },
    /// A media failure the learner should see, with a retry option
    Error { lecture_key: String, message: String },
}

struct ActiveVideo {
    entry: VideoEntry,
    media: MediaResource,
    subtitles: Vec<SubtitleResource>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Position {
    current: f64,
    duration: f64,
    /// Changed by playback since the video was loaded
    dirty: bool,
}

pub struct PlayerSession {
    course_id: String,
    handle: Arc<dyn DirectoryHandle>,
    surface: Arc<dyn PlaybackSurface>,
    store: ProgressStore,
    scheduler: FlushScheduler,
    ledger: ResourceLedger,
    playback_debounce: Duration,
    pause_debounce: Duration,
    state: PlayerState,
    active: Option<ActiveVideo>,
    /// Last video requested, kept for `retry` after a failure
    requested: Option<VideoEntry>,
    position: Position,
    events: broadcast::Sender<PlayerEvent>,
}

impl fmt::Debug for PlayerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayerSession")
            .field("course_id", &self.course_id)
            .field("state", &self.state)
            .field("active", &self.active.as_ref().map(|a| &a.entry.path))
            .finish_non_exhaustive()
    }
}

impl PlayerSession {
    pub fn new(
        course_id: impl Into<String>,
        handle: Arc<dyn DirectoryHandle>,
        surface: Arc<dyn PlaybackSurface>,
        store: ProgressStore,
        config: &CacheConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            course_id: course_id.into(),
            handle,
            surface,
            scheduler: FlushScheduler::new(store.clone()),
            store,
            ledger: ResourceLedger::new(),
            playback_debounce: config.playback_debounce(),
            pause_debounce: config.pause_debounce(),
            state: PlayerState::Idle,
            active: None,
            requested: None,
            position: Position::default(),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    pub fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    pub fn current(&self) -> Option<&VideoEntry> {
        self.active.as_ref().map(|active| &active.entry)
    }

    pub fn subtitle_tracks(&self) -> Vec<SubtitleTrack> {
        self.active
            .as_ref()
            .map(|active| active.subtitles.iter().map(|s| s.track().clone()).collect())
            .unwrap_or_default()
    }

    pub fn position(&self) -> f64 {
        self.position.current
    }

    /// Last progress saved for the active video
    pub async fn last_saved(&self) -> Option<ProgressRecord> {
        self.scheduler.last_persisted().await
    }

    /// Make `entry` the active video
    pub async fn load(&mut self, entry: VideoEntry) -> Result<()> {
        let switching = self
            .active
            .as_ref()
            .is_some_and(|active| active.entry.path != entry.path);

        self.flush_outgoing().await;
        self.release().await;

        self.scheduler.advance().await;
        self.requested = Some(entry.clone());
        self.position = Position {
            current: 0.0,
            duration: entry.duration_hint.unwrap_or(0.0),
            dirty: false,
        };
        self.set_state(PlayerState::Loading)?;

        let active = match self.acquire(&entry).await {
            Ok(active) => active,
            Err(e) => return Err(self.fail(&entry.path, e)),
        };

        if let Err(e) = self.surface.attach(&active.media, &active.subtitles).await {
            drop(active);
            return Err(self.fail(&entry.path, e));
        }
        self.active = Some(active);

        let saved = self.saved_progress(&entry).await;
        let resume_at = saved.as_ref().map_or(0.0, ProgressRecord::resume_position);
        if self.position.duration <= 0.0 {
            // Best guess until the surface reports the real duration
            self.position.duration = saved.map_or(0.0, |r| r.total_duration_seconds);
        }
        if resume_at > 0.0 {
            if let Err(e) = self.surface.seek(resume_at).await {
                self.release().await;
                return Err(self.fail(&entry.path, e));
            }
        }
        self.position.current = resume_at;

        self.set_state(PlayerState::Ready)?;
        self.emit(PlayerEvent::Ready {
            lecture_key: entry.lecture_key().to_string(),
            resume_at,
        });

        if switching {
            if self.surface.try_play().await {
                self.set_state(PlayerState::Playing)?;
            } else {
                tracing::debug!(path = %entry.path, "Autoplay refused by host");
            }
        }

        Ok(())
    }

    /// Playback started or resumed
    pub fn play(&mut self) -> Result<()> {
        if self.state == PlayerState::Playing {
            return Ok(());
        }
        self.set_state(PlayerState::Playing)
    }

    /// Periodic position report during playback
    pub async fn time_update(&mut self, current: f64, duration: f64) {
        if !self.state.holds_media() {
            return;
        }
        self.update_position(current, Some(duration));

        if let Some(record) = self.snapshot() {
            self.scheduler.schedule(record, self.playback_debounce, false).await;
        }
    }

    /// Playback paused at `current`
    pub async fn pause(&mut self, current: f64) -> Result<()> {
        if self.state == PlayerState::Paused {
            return Ok(());
        }
        self.set_state(PlayerState::Paused)?;
        self.update_position(current, None);

        if let Some(record) = self.snapshot() {
            self.scheduler.schedule(record, self.pause_debounce, true).await;
        }
        Ok(())
    }

    /// Playback reached the end of the media
    pub async fn ended(&mut self) -> Result<()> {
        self.set_state(PlayerState::Ended)?;

        let duration = self.position.duration;
        self.update_position(duration, None);
        if let Some(record) = self.snapshot() {
            if let Err(e) = self.scheduler.flush_now(Some(record)).await {
                tracing::warn!(course_id = %self.course_id, error = %e, "Failed to save finished video");
            }
        }

        if let Some(active) = &self.active {
            self.emit(PlayerEvent::AdvanceToNext {
                finished: active.entry.lecture_key().to_string(),
            });
        }
        Ok(())
    }

    /// The surface failed to decode or fetch the media
    pub async fn media_error(&mut self, message: &str) -> Result<()> {
        let path = self
            .requested
            .as_ref()
            .map(|entry| entry.path.clone())
            .unwrap_or_default();

        if !self.state.can_transition_to(PlayerState::Error) {
            return Err(CourseCacheError::InvalidTransition {
                from: self.state.to_string(),
                to: PlayerState::Error.to_string(),
            });
        }

        self.flush_outgoing().await;
        self.release().await;
        self.fail(&path, CourseCacheError::media(path.clone(), message));
        Ok(())
    }

    /// Load the failed video again
    pub async fn retry(&mut self) -> Result<()> {
        if self.state != PlayerState::Error {
            return Err(CourseCacheError::InvalidState(format!(
                "Nothing to retry while {}",
                self.state
            )));
        }
        let entry = self
            .requested
            .clone()
            .ok_or_else(|| CourseCacheError::InvalidState("No video to retry".to_string()))?;

        self.load(entry).await
    }

    /// Final flush and release of every resource; always ends in `Idle`
    pub async fn teardown(&mut self) {
        self.flush_outgoing().await;
        self.release().await;
        self.requested = None;
        self.position = Position::default();

        if self.state != PlayerState::Idle {
            let from = self.state;
            self.state = PlayerState::Idle;
            self.emit(PlayerEvent::StateChanged {
                from,
                to: PlayerState::Idle,
            });
        }
    }

    async fn acquire(&self, entry: &VideoEntry) -> Result<ActiveVideo> {
        let media = MediaResource::acquire(&self.handle, entry, &self.ledger).await?;

        // Subtitles are optional; a broken track never blocks the video
        let tracks = match find_subtitles(self.handle.as_ref(), entry).await {
            Ok(tracks) => tracks,
            Err(e) => {
                tracing::warn!(path = %entry.path, error = %e, "Subtitle discovery failed");
                Vec::new()
            }
        };

        let mut subtitles = Vec::with_capacity(tracks.len());
        for track in tracks {
            let source = track.source_path.clone();
            match SubtitleResource::acquire(self.handle.as_ref(), track, &self.ledger).await {
                Ok(subtitle) => subtitles.push(subtitle),
                Err(e) => tracing::warn!(path = %source, error = %e, "Skipping unreadable subtitle"),
            }
        }

        Ok(ActiveVideo {
            entry: entry.clone(),
            media,
            subtitles,
        })
    }

    async fn saved_progress(&self, entry: &VideoEntry) -> Option<ProgressRecord> {
        match self.store.get(&self.course_id, entry.lecture_key()).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(path = %entry.path, error = %e, "Could not read saved progress");
                None
            }
        }
    }

    fn update_position(&mut self, current: f64, duration: Option<f64>) {
        if current.is_finite() && current >= 0.0 {
            self.position.current = current;
        }
        if let Some(duration) = duration.filter(|d| d.is_finite() && *d > 0.0) {
            self.position.duration = duration;
        }
        self.position.dirty = true;
    }

    /// Progress record for the active video at the current position
    fn snapshot(&self) -> Option<ProgressRecord> {
        let active = self.active.as_ref()?;
        if !self.position.dirty || self.position.duration <= 0.0 {
            return None;
        }

        Some(ProgressRecord::from_position(
            self.course_id.clone(),
            active.entry.lecture_key(),
            self.position.current,
            self.position.duration,
        ))
    }

    /// Save the active video's position before it goes away
    async fn flush_outgoing(&mut self) {
        let record = self.snapshot();
        if record.is_none() && !self.scheduler.has_pending().await {
            return;
        }

        if let Err(e) = self.scheduler.flush_now(record).await {
            tracing::warn!(course_id = %self.course_id, error = %e, "Final progress flush failed");
        }
        self.position.dirty = false;
    }

    async fn release(&mut self) {
        if let Some(active) = self.active.take() {
            self.surface.detach().await;
            drop(active);
        }
    }

    fn set_state(&mut self, next: PlayerState) -> Result<()> {
        let from = self.state;
        self.state = from.transition(next)?;
        if from != next {
            tracing::debug!(course_id = %self.course_id, %from, to = %next, "Player state changed");
            self.emit(PlayerEvent::StateChanged { from, to: next });
        }
        Ok(())
    }

    /// Enter `Error` and tell the learner
    fn fail(&mut self, path: &str, error: CourseCacheError) -> CourseCacheError {
        tracing::warn!(path, error = %error, "Playback failed");

        if self.state.can_transition_to(PlayerState::Error) {
            let from = self.state;
            self.state = PlayerState::Error;
            self.emit(PlayerEvent::StateChanged {
                from,
                to: PlayerState::Error,
            });
        }
        self.emit(PlayerEvent::Error {
            lecture_key: path.to_string(),
            message: error.user_message(),
        });
        error
    }

    fn emit(&self, event: PlayerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::local::LocalDirectory;
    use crate::file::locks::CourseLocks;
    use crate::storage::Database;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct FakeSurface {
        autoplay_blocked: AtomicBool,
        log: StdMutex<Vec<String>>,
    }

    impl FakeSurface {
        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PlaybackSurface for FakeSurface {
        async fn attach(&self, media: &MediaResource, subtitles: &[SubtitleResource]) -> Result<()> {
            let bytes = media.read().await?;
            assert_eq!(bytes.len() as u64, media.size());
            self.log
                .lock()
                .unwrap()
                .push(format!("attach {} +{}", media.path(), subtitles.len()));
            Ok(())
        }

        async fn detach(&self) {
            self.log.lock().unwrap().push("detach".to_string());
        }

        async fn seek(&self, seconds: f64) -> Result<()> {
            self.log.lock().unwrap().push(format!("seek {}", seconds));
            Ok(())
        }

        async fn try_play(&self) -> bool {
            let allowed = !self.autoplay_blocked.load(Ordering::SeqCst);
            self.log.lock().unwrap().push(format!("play {}", allowed));
            allowed
        }
    }

    fn video(path: &str) -> VideoEntry {
        VideoEntry {
            path: path.to_string(),
            size: 1,
            last_modified_at: 0,
            duration_hint: None,
        }
    }

    struct Fixture {
        dir: TempDir,
        _db: Database,
        store: ProgressStore,
        surface: Arc<FakeSurface>,
        session: PlayerSession,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        for name in ["a.mp4", "b.mp4", "c.mp4"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::write(dir.path().join("b.en.vtt"), "WEBVTT\n").unwrap();

        let db = Database::new_in_memory().await.unwrap();
        let config = CacheConfig::default()
            .with_playback_debounce(Duration::from_millis(40))
            .with_pause_debounce(Duration::from_millis(10))
            .with_min_flush_spacing(Duration::ZERO);
        let store = ProgressStore::new(db.pool().clone(), &config, CourseLocks::new(), None);
        let surface = Arc::new(FakeSurface::default());
        let handle = Arc::new(LocalDirectory::new(dir.path()));
        let session = PlayerSession::new("c1", handle, surface.clone(), store.clone(), &config);

        Fixture {
            dir,
            _db: db,
            store,
            surface,
            session,
        }
    }

    #[tokio::test]
    async fn test_first_load_does_not_autoplay() {
        let mut f = fixture().await;
        f.session.load(video("a.mp4")).await.unwrap();

        assert_eq!(f.session.state(), PlayerState::Ready);
        assert_eq!(f.surface.log(), vec!["attach a.mp4 +0"]);
    }

    #[tokio::test]
    async fn test_switch_releases_before_acquiring_and_autoplays() {
        let mut f = fixture().await;
        f.session.load(video("a.mp4")).await.unwrap();
        f.session.load(video("b.mp4")).await.unwrap();

        assert_eq!(f.session.state(), PlayerState::Playing);
        assert_eq!(
            f.surface.log(),
            vec!["attach a.mp4 +0", "detach", "attach b.mp4 +1", "play true"]
        );
        assert_eq!(f.session.ledger().live_media(), 1);
        assert_eq!(f.session.ledger().peak_media(), 1);
        assert_eq!(f.session.subtitle_tracks()[0].language, "en");
    }

    #[tokio::test]
    async fn test_blocked_autoplay_is_not_an_error() {
        let mut f = fixture().await;
        f.surface.autoplay_blocked.store(true, Ordering::SeqCst);
        f.session.load(video("a.mp4")).await.unwrap();
        f.session.load(video("b.mp4")).await.unwrap();

        assert_eq!(f.session.state(), PlayerState::Ready);
    }

    #[tokio::test]
    async fn test_resume_position_applied_before_ready() {
        let mut f = fixture().await;
        f.store
            .save(ProgressRecord::at("c1", "a.mp4", 42.0, 100.0, 1))
            .await
            .unwrap();
        let mut events = f.session.subscribe();

        f.session.load(video("a.mp4")).await.unwrap();

        assert_eq!(f.surface.log(), vec!["attach a.mp4 +0", "seek 42"]);
        let mut ready = None;
        while let Ok(event) = events.try_recv() {
            if let PlayerEvent::Ready { resume_at, .. } = event {
                ready = Some(resume_at);
            }
        }
        assert_eq!(ready, Some(42.0));
    }

    #[tokio::test]
    async fn test_switch_flushes_outgoing_progress() {
        let mut f = fixture().await;
        f.session.load(video("a.mp4")).await.unwrap();
        f.session.play().unwrap();
        f.session.time_update(30.0, 100.0).await;

        // Debounce has not fired yet; switching must still save
        f.session.load(video("b.mp4")).await.unwrap();
        let saved = f.store.get("c1", "a.mp4").await.unwrap().unwrap();
        assert_eq!(saved.current_time_seconds, 30.0);
    }

    #[tokio::test]
    async fn test_pause_flushes_after_short_debounce() {
        let mut f = fixture().await;
        f.session.load(video("a.mp4")).await.unwrap();
        f.session.play().unwrap();
        f.session.time_update(10.0, 100.0).await;
        f.session.pause(12.0).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        let saved = f.store.get("c1", "a.mp4").await.unwrap().unwrap();
        assert_eq!(saved.current_time_seconds, 12.0);
        assert_eq!(f.session.last_saved().await, Some(saved));
    }

    #[tokio::test]
    async fn test_ended_saves_and_signals_next() {
        let mut f = fixture().await;
        let mut events = f.session.subscribe();
        f.session.load(video("a.mp4")).await.unwrap();
        f.session.play().unwrap();
        f.session.time_update(99.0, 100.0).await;
        f.session.ended().await.unwrap();

        let saved = f.store.get("c1", "a.mp4").await.unwrap().unwrap();
        assert!(saved.completed);

        let mut advanced = false;
        while let Ok(event) = events.try_recv() {
            if event == (PlayerEvent::AdvanceToNext { finished: "a.mp4".into() }) {
                advanced = true;
            }
        }
        assert!(advanced);
    }

    #[tokio::test]
    async fn test_missing_file_enters_error_and_retry_recovers() {
        let mut f = fixture().await;
        let mut events = f.session.subscribe();

        let err = f.session.load(video("gone.mp4")).await.unwrap_err();
        assert!(matches!(err, CourseCacheError::MediaError { .. }));
        assert_eq!(f.session.state(), PlayerState::Error);
        assert_eq!(f.session.ledger().live_media(), 0);

        let mut surfaced = false;
        while let Ok(event) = events.try_recv() {
            surfaced |= matches!(event, PlayerEvent::Error { .. });
        }
        assert!(surfaced);

        std::fs::write(f.dir.path().join("gone.mp4"), b"x").unwrap();
        f.session.retry().await.unwrap();
        assert_eq!(f.session.state(), PlayerState::Ready);
    }

    #[tokio::test]
    async fn test_media_error_releases_resources() {
        let mut f = fixture().await;
        f.session.load(video("a.mp4")).await.unwrap();
        f.session.play().unwrap();
        f.session.media_error("decode failed").await.unwrap();

        assert_eq!(f.session.state(), PlayerState::Error);
        assert_eq!(f.session.ledger().live_media(), 0);
    }

    #[tokio::test]
    async fn test_decode_failure_before_play_reaches_learner() {
        let mut f = fixture().await;
        f.session.load(video("a.mp4")).await.unwrap();
        let mut events = f.session.subscribe();

        f.session.media_error("decode failed: unsupported codec").await.unwrap();

        assert_eq!(f.session.state(), PlayerState::Error);
        assert_eq!(f.session.ledger().live_media(), 0);
        let mut surfaced = false;
        while let Ok(event) = events.try_recv() {
            surfaced |= matches!(event, PlayerEvent::Error { ref lecture_key, .. } if lecture_key == "a.mp4");
        }
        assert!(surfaced);

        f.session.retry().await.unwrap();
        assert_eq!(f.session.state(), PlayerState::Ready);
        assert_eq!(f.session.ledger().live_media(), 1);
    }

    #[tokio::test]
    async fn test_teardown_releases_everything() {
        let mut f = fixture().await;
        f.session.load(video("b.mp4")).await.unwrap();
        f.session.play().unwrap();
        f.session.time_update(50.0, 100.0).await;
        f.session.teardown().await;

        assert_eq!(f.session.state(), PlayerState::Idle);
        assert_eq!(f.session.ledger().live_media(), 0);
        assert_eq!(f.session.ledger().live_subtitles(), 0);
        assert_eq!(
            f.store.get("c1", "b.mp4").await.unwrap().unwrap().current_time_seconds,
            50.0
        );
    }
}
