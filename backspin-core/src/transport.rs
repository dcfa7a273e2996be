use async_trait::async_trait;
use thiserror::Error;

use crate::model::{CurrentTrack, SessionId};

pub type BoxedTransport = std::sync::Arc<dyn Transport>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected to a session")]
    NotConnected,
    #[error("failed to reach the broadcast backend: {0}")]
    Unreachable(String),
    #[error("the broadcast backend rejected the request: {0}")]
    Rejected(String),
}

/// The link to the broadcast backend.
///
/// All backend-specific streaming protocol detail lives behind this seam;
/// the coordinator only ever calls the interface and never branches on
/// which implementation is active. Implementations are selected at
/// construction time by whoever assembles the coordinator.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, session_id: &SessionId) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
    async fn start_stream(&self) -> Result<(), TransportError>;
    async fn stop_stream(&self) -> Result<(), TransportError>;
    async fn send_now_playing(&self, track: &CurrentTrack) -> Result<(), TransportError>;
}
