use std::time::Duration;

use camsync_frame::{FrameCodec, FrameConfig};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use crate::error::{CaptureError, Result};

/// A framed connection to an endpoint node.
pub type PeerStream = Framed<TcpStream, FrameCodec>;

/// Connect to an endpoint node at `address` (`host:port`).
pub async fn connect(address: &str, timeout: Duration) -> Result<PeerStream> {
    connect_with_config(address, timeout, FrameConfig::default()).await
}

/// Connect with an explicit frame configuration.
pub async fn connect_with_config(
    address: &str,
    timeout: Duration,
    frame_config: FrameConfig,
) -> Result<PeerStream> {
    let stream = match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(CaptureError::Connection {
                address: address.to_string(),
                reason: e.to_string(),
            })
        }
        Err(_) => {
            return Err(CaptureError::Connection {
                address: address.to_string(),
                reason: format!("timed out after {timeout:?}"),
            })
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(address, error = %e, "failed to set TCP_NODELAY");
    }
    tracing::debug!(address, "connected to endpoint");
    Ok(wrap(stream, frame_config))
}

/// Frame an already-connected stream.
pub fn wrap(stream: TcpStream, frame_config: FrameConfig) -> PeerStream {
    Framed::new(stream, FrameCodec::new(frame_config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_refused_is_connection_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let addr = listener.local_addr().expect("local addr").to_string();
        drop(listener);

        let err = connect(&addr, Duration::from_secs(2))
            .await
            .expect_err("nothing is listening");
        assert!(matches!(err, CaptureError::Connection { address, .. } if address == addr));
    }

    #[tokio::test]
    async fn connect_to_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let addr = listener.local_addr().expect("local addr").to_string();

        let (client, accepted) = tokio::join!(connect(&addr, Duration::from_secs(2)), listener.accept());
        assert!(client.is_ok());
        assert!(accepted.is_ok());
    }
}
