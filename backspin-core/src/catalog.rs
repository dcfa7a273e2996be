use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::TrackId;

pub type BoxedCatalogPlayer = std::sync::Arc<dyn CatalogPlayer>;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("playback is not authorized")]
    NotAuthorized,
    #[error("no track matched {0}")]
    NoMatch(String),
    #[error("catalog lookup failed: {0}")]
    LookupFailed(String),
    #[error("player failed: {0}")]
    PlayerFailed(String),
}

/// A track the catalog resolved to something playable.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTrack {
    pub track_id: TrackId,
    pub title: String,
    pub artist_name: String,
    pub album_name: Option<String>,
    pub artwork_url: Option<String>,
    pub duration: Option<Duration>,
}

/// Where an enqueued track lands in the local play queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueuePosition {
    Head,
    Tail,
    AfterCurrent,
}

/// The music catalog and local audio player, as one capability.
///
/// `authorize` must succeed before any playback call is made.
#[async_trait]
pub trait CatalogPlayer: Send + Sync {
    async fn authorize(&self) -> Result<(), CatalogError>;

    /// Exact id lookup.
    async fn resolve(&self, track_id: &TrackId) -> Result<ResolvedTrack, CatalogError>;
    /// Fallback search; the first match wins.
    async fn search(&self, title: &str, artist: &str) -> Result<ResolvedTrack, CatalogError>;

    async fn enqueue(
        &self,
        track: ResolvedTrack,
        position: EnqueuePosition,
    ) -> Result<(), CatalogError>;
    async fn play(&self) -> Result<(), CatalogError>;
    async fn pause(&self) -> Result<(), CatalogError>;
    async fn seek(&self, offset: Duration) -> Result<(), CatalogError>;
    /// Advances to the next queued track, returning it if one started.
    async fn skip_to_next(&self) -> Result<Option<ResolvedTrack>, CatalogError>;
}
