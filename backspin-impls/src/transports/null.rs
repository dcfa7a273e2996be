use async_trait::async_trait;
use log::debug;

use backspin_core::{CurrentTrack, SessionId, Transport, TransportError};

/// A transport that satisfies the contract with no side effects.
///
/// Used by tests and by explicitly offline/demo modes, so the coordinator
/// behaves identically whether or not a broadcast backend exists.
#[derive(Default)]
pub struct NullTransport;

impl NullTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for NullTransport {
    async fn connect(&self, session_id: &SessionId) -> Result<(), TransportError> {
        debug!("NullTransport connect to {}", session_id);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn start_stream(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn stop_stream(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send_now_playing(&self, track: &CurrentTrack) -> Result<(), TransportError> {
        debug!(
            "NullTransport now playing: {} by {}",
            track.title, track.artist_name
        );
        Ok(())
    }
}
