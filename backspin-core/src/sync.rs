use std::time::Duration;

use chrono::{DateTime, Utc};
use log::info;
use parking_lot::Mutex;

use crate::{
    catalog::{BoxedCatalogPlayer, CatalogError, EnqueuePosition},
    errors::SessionError,
    model::{CurrentTrack, TrackId},
};

/// Keeps a listener's local audio position matched to the DJ's logical
/// position.
///
/// The DJ never pushes a continuous position stream. The position is
/// reconstructed from the single `started_at` timestamp on the broadcast
/// track, so a late joiner and a reconnecting listener perform exactly
/// the same seek computation as one who was present all along.
pub struct PlaybackSynchronizer {
    catalog: BoxedCatalogPlayer,
    /// Identity of the last track update that was applied. Compared
    /// against incoming updates so redundant publishes and reordered
    /// deliveries never restart playback.
    applied: Mutex<Option<(TrackId, DateTime<Utc>)>>,
}

/// What applying a track update did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The local player was enqueued, sought, and started.
    Applied,
    /// The update matched the already-playing track, nothing happened.
    AlreadyCurrent,
}

impl PlaybackSynchronizer {
    pub fn new(catalog: &BoxedCatalogPlayer) -> Self {
        Self {
            catalog: catalog.clone(),
            applied: Default::default(),
        }
    }

    /// Drives the local player to the DJ's position for the given track.
    ///
    /// Idempotent and order-insensitive: applying the same update twice,
    /// or an older update after a newer one with the same identity, is a
    /// no-op. On resolution failure the previous track keeps playing and
    /// the applied identity is left untouched, so a later redelivery of
    /// the same track may still succeed.
    pub async fn apply(&self, track: &CurrentTrack) -> Result<SyncOutcome, SessionError> {
        let identity = (track.track_id.clone(), track.started_at);

        if self.applied.lock().as_ref() == Some(&identity) {
            return Ok(SyncOutcome::AlreadyCurrent);
        }

        let resolved = self.resolve(track).await?;
        let elapsed = Self::elapsed_offset(track, Utc::now());

        self.catalog
            .enqueue(resolved, EnqueuePosition::Head)
            .await?;
        self.catalog.seek(elapsed).await?;
        self.catalog.play().await?;

        info!(
            "Synced to \"{}\" by {} at {:?}",
            track.title, track.artist_name, elapsed
        );

        *self.applied.lock() = Some(identity);

        Ok(SyncOutcome::Applied)
    }

    /// Forgets the applied identity, so the next update is always applied.
    /// Called when leaving a session.
    pub fn reset(&self) {
        *self.applied.lock() = None;
    }

    /// How far into the track the DJ is right now. Clamped at zero in case
    /// of clock skew between the DJ and this client.
    pub fn elapsed_offset(track: &CurrentTrack, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(track.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Exact id lookup first, falling back to a title+artist search where
    /// the first match wins.
    async fn resolve(
        &self,
        track: &CurrentTrack,
    ) -> Result<crate::catalog::ResolvedTrack, SessionError> {
        match self.catalog.resolve(&track.track_id).await {
            Ok(resolved) => Ok(resolved),
            Err(CatalogError::NoMatch(_)) | Err(CatalogError::LookupFailed(_)) => self
                .catalog
                .search(&track.title, &track.artist_name)
                .await
                .map_err(|_| {
                    SessionError::TrackResolutionFailed(format!(
                        "{} by {}",
                        track.title, track.artist_name
                    ))
                }),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod test {
    use std::{collections::HashMap, sync::Arc};

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::catalog::{CatalogPlayer, ResolvedTrack};

    /// Records every playback call so tests can count seeks and plays.
    #[derive(Default)]
    struct CountingCatalog {
        tracks: HashMap<TrackId, ResolvedTrack>,
        seeks: Mutex<Vec<Duration>>,
        plays: Mutex<usize>,
    }

    impl CountingCatalog {
        fn with_track(track_id: &str) -> Self {
            let mut tracks = HashMap::new();

            tracks.insert(
                track_id.to_string(),
                ResolvedTrack {
                    track_id: track_id.to_string(),
                    title: "Midnight Loop".to_string(),
                    artist_name: "Unit Test".to_string(),
                    album_name: None,
                    artwork_url: None,
                    duration: None,
                },
            );

            Self {
                tracks,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl CatalogPlayer for CountingCatalog {
        async fn authorize(&self) -> Result<(), CatalogError> {
            Ok(())
        }

        async fn resolve(&self, track_id: &TrackId) -> Result<ResolvedTrack, CatalogError> {
            self.tracks
                .get(track_id)
                .cloned()
                .ok_or_else(|| CatalogError::NoMatch(track_id.clone()))
        }

        async fn search(&self, title: &str, artist: &str) -> Result<ResolvedTrack, CatalogError> {
            self.tracks
                .values()
                .find(|t| t.title == title && t.artist_name == artist)
                .cloned()
                .ok_or_else(|| CatalogError::NoMatch(format!("{} {}", title, artist)))
        }

        async fn enqueue(
            &self,
            _track: ResolvedTrack,
            _position: EnqueuePosition,
        ) -> Result<(), CatalogError> {
            Ok(())
        }

        async fn play(&self) -> Result<(), CatalogError> {
            *self.plays.lock() += 1;
            Ok(())
        }

        async fn pause(&self) -> Result<(), CatalogError> {
            Ok(())
        }

        async fn seek(&self, offset: Duration) -> Result<(), CatalogError> {
            self.seeks.lock().push(offset);
            Ok(())
        }

        async fn skip_to_next(&self) -> Result<Option<ResolvedTrack>, CatalogError> {
            Ok(None)
        }
    }

    fn broadcast(track_id: &str, started_at: DateTime<Utc>) -> CurrentTrack {
        CurrentTrack {
            track_id: track_id.to_string(),
            title: "Midnight Loop".to_string(),
            artist_name: "Unit Test".to_string(),
            album_name: None,
            artwork_url: None,
            started_at,
        }
    }

    #[tokio::test]
    async fn test_repeated_update_seeks_once() {
        let catalog = Arc::new(CountingCatalog::with_track("t1"));
        let sync = PlaybackSynchronizer::new(&(catalog.clone() as BoxedCatalogPlayer));

        let track = broadcast("t1", Utc::now() - ChronoDuration::seconds(30));

        assert_eq!(sync.apply(&track).await.unwrap(), SyncOutcome::Applied);
        assert_eq!(
            sync.apply(&track).await.unwrap(),
            SyncOutcome::AlreadyCurrent,
            "a redundant publish must not restart playback"
        );

        assert_eq!(catalog.seeks.lock().len(), 1, "exactly one seek happened");
    }

    #[tokio::test]
    async fn test_fresh_started_at_reseeks() {
        let catalog = Arc::new(CountingCatalog::with_track("t1"));
        let sync = PlaybackSynchronizer::new(&(catalog.clone() as BoxedCatalogPlayer));

        let first = broadcast("t1", Utc::now() - ChronoDuration::seconds(120));
        let second = broadcast("t1", Utc::now() - ChronoDuration::seconds(5));

        sync.apply(&first).await.unwrap();

        assert_eq!(
            sync.apply(&second).await.unwrap(),
            SyncOutcome::Applied,
            "same track restarted by the DJ is a new playback"
        );
        assert_eq!(catalog.seeks.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_resolution_failure_keeps_previous_track() {
        let catalog = Arc::new(CountingCatalog::with_track("t1"));
        let sync = PlaybackSynchronizer::new(&(catalog.clone() as BoxedCatalogPlayer));

        let known = broadcast("t1", Utc::now() - ChronoDuration::seconds(10));
        sync.apply(&known).await.unwrap();

        let mut unknown = broadcast("missing", Utc::now());
        unknown.title = "Not In Catalog".to_string();

        let result = sync.apply(&unknown).await;

        assert!(
            matches!(result, Err(SessionError::TrackResolutionFailed(_))),
            "an unresolvable track is reported, not silently dropped"
        );
        assert_eq!(
            catalog.seeks.lock().len(),
            1,
            "the previous track keeps playing"
        );

        // The failed update did not clobber the applied identity
        assert_eq!(
            sync.apply(&known).await.unwrap(),
            SyncOutcome::AlreadyCurrent
        );
    }

    #[test]
    fn test_elapsed_offset_clamps_at_zero() {
        let now = Utc::now();
        let future = broadcast("t1", now + ChronoDuration::seconds(5));
        let past = broadcast("t1", now - ChronoDuration::seconds(42));

        assert_eq!(
            PlaybackSynchronizer::elapsed_offset(&future, now),
            Duration::ZERO,
            "clock skew never produces a negative seek"
        );
        assert_eq!(
            PlaybackSynchronizer::elapsed_offset(&past, now),
            Duration::from_secs(42)
        );
    }
}
