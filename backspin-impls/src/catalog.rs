use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use backspin_core::{CatalogError, CatalogPlayer, EnqueuePosition, ResolvedTrack, TrackId};

/// What the local player last did, for observation by tests and demo UIs.
#[derive(Debug, Clone, Default)]
pub struct PlayerState {
    pub current: Option<ResolvedTrack>,
    pub position: Duration,
    pub playing: bool,
    /// Every seek performed, in order
    pub seeks: Vec<Duration>,
}

/// An in-process catalog and player.
///
/// Tracks are registered up front; resolution and playback operate purely
/// on local state. Backs tests and offline/demo modes the same way
/// [crate::NullTransport] does for the broadcast side.
#[derive(Default)]
pub struct LocalCatalog {
    tracks: DashMap<TrackId, ResolvedTrack>,
    queue: Mutex<Vec<ResolvedTrack>>,
    state: Mutex<PlayerState>,
}

impl LocalCatalog {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers a track so it can be resolved later.
    pub fn add_track(&self, track: ResolvedTrack) {
        self.tracks.insert(track.track_id.clone(), track);
    }

    pub fn player_state(&self) -> PlayerState {
        self.state.lock().clone()
    }
}

#[async_trait]
impl CatalogPlayer for LocalCatalog {
    async fn authorize(&self) -> Result<(), CatalogError> {
        Ok(())
    }

    async fn resolve(&self, track_id: &TrackId) -> Result<ResolvedTrack, CatalogError> {
        self.tracks
            .get(track_id)
            .map(|t| t.value().clone())
            .ok_or_else(|| CatalogError::NoMatch(track_id.clone()))
    }

    async fn search(&self, title: &str, artist: &str) -> Result<ResolvedTrack, CatalogError> {
        self.tracks
            .iter()
            .find(|t| t.title == title && t.artist_name == artist)
            .map(|t| t.value().clone())
            .ok_or_else(|| CatalogError::NoMatch(format!("{} by {}", title, artist)))
    }

    async fn enqueue(
        &self,
        track: ResolvedTrack,
        position: EnqueuePosition,
    ) -> Result<(), CatalogError> {
        let mut queue = self.queue.lock();

        match position {
            EnqueuePosition::Head => {
                queue.insert(0, track.clone());
                self.state.lock().current = Some(track);
            }
            EnqueuePosition::AfterCurrent => {
                let at = queue.len().min(1);
                queue.insert(at, track);
            }
            EnqueuePosition::Tail => queue.push(track),
        }

        Ok(())
    }

    async fn play(&self) -> Result<(), CatalogError> {
        self.state.lock().playing = true;
        Ok(())
    }

    async fn pause(&self) -> Result<(), CatalogError> {
        self.state.lock().playing = false;
        Ok(())
    }

    async fn seek(&self, offset: Duration) -> Result<(), CatalogError> {
        let mut state = self.state.lock();

        state.position = offset;
        state.seeks.push(offset);

        Ok(())
    }

    async fn skip_to_next(&self) -> Result<Option<ResolvedTrack>, CatalogError> {
        let next = {
            let mut queue = self.queue.lock();

            if !queue.is_empty() {
                queue.remove(0);
            }

            queue.first().cloned()
        };

        let mut state = self.state.lock();

        state.current = next.clone();
        state.position = Duration::ZERO;

        Ok(next)
    }
}
