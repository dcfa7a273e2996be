use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;

use backspin_core::{CurrentTrack, SessionId, Transport, TransportError};

/// The transport bound to the real audio relay backend.
///
/// Speaks a small HTTP surface: connect and disconnect manage the relay's
/// knowledge of this client, the stream endpoints open and close the
/// broadcast, and now-playing metadata is posted as JSON.
pub struct RelayTransport {
    base_url: String,
    client: Client,
    /// The session the relay currently knows us under
    connected: Mutex<Option<SessionId>>,
}

#[derive(Debug, Serialize)]
struct NowPlayingBody<'a> {
    track_id: &'a str,
    title: &'a str,
    artist_name: &'a str,
    started_at: chrono::DateTime<chrono::Utc>,
}

impl RelayTransport {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
            connected: Mutex::new(None),
        }
    }

    fn session_url(&self, path: &str) -> Result<String, TransportError> {
        let session_id = self
            .connected
            .lock()
            .clone()
            .ok_or(TransportError::NotConnected)?;

        Ok(format!(
            "{}/sessions/{}/{}",
            self.base_url, session_id, path
        ))
    }

    fn check(response: Response) -> Result<(), TransportError> {
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                Err(TransportError::Rejected("unknown session".to_string()))
            }
            status => Err(TransportError::Rejected(status.to_string())),
        }
    }

    async fn post(&self, url: String) -> Result<(), TransportError> {
        let response = self
            .client
            .post(url)
            .send()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;

        Self::check(response)
    }
}

#[async_trait]
impl Transport for RelayTransport {
    async fn connect(&self, session_id: &SessionId) -> Result<(), TransportError> {
        let url = format!("{}/sessions/{}/connect", self.base_url, session_id);

        self.post(url).await?;
        *self.connected.lock() = Some(session_id.clone());

        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let url = self.session_url("disconnect")?;

        self.post(url).await?;
        *self.connected.lock() = None;

        Ok(())
    }

    async fn start_stream(&self) -> Result<(), TransportError> {
        let url = self.session_url("stream/start")?;
        self.post(url).await
    }

    async fn stop_stream(&self) -> Result<(), TransportError> {
        let url = self.session_url("stream/stop")?;
        self.post(url).await
    }

    async fn send_now_playing(&self, track: &CurrentTrack) -> Result<(), TransportError> {
        let url = self.session_url("now-playing")?;

        let body = NowPlayingBody {
            track_id: &track.track_id,
            title: &track.title,
            artist_name: &track.artist_name,
            started_at: track.started_at,
        };

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Unreachable(e.to_string()))?;

        Self::check(response)
    }
}
