//! Frame tap: accepts client connections, answers the handshake and logs
//! every frame the client sends.

use crate::config::TapConfig;
use amqpwire_client::{Abort, AbortHandle, AsyncFramer, FramerError};
use amqpwire_protocol::PROTOCOL_LITERAL;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

pub struct Tap {
    config: TapConfig,
    abort: AbortHandle,
    shutdown: broadcast::Sender<()>,
}

impl Tap {
    pub fn new(config: TapConfig) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            config,
            abort: AbortHandle::new(),
            shutdown,
        }
    }

    /// Stops accepting and aborts open connections at their next timeout.
    pub fn shutdown(&self) {
        self.abort.abort();
        let _ = self.shutdown.send(());
    }

    /// Accepts connections until [`Tap::shutdown`] is called.
    pub async fn run(&self, listener: TcpListener) -> std::io::Result<()> {
        tracing::info!("Tap listening on {}", listener.local_addr()?);
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if let Err(e) = configure_stream(&stream, self.config.framer.nodelay) {
                                tracing::warn!("[{}] Failed to set TCP_NODELAY: {}", addr, e);
                            }
                            let config = self.config.clone();
                            let abort = self.abort.clone();

                            tokio::spawn(async move {
                                tracing::info!("Client connected: {}", addr);
                                match serve(stream, addr, &config, abort).await {
                                    Ok(frames) => tracing::info!(
                                        "Client disconnected: {} ({} frames)",
                                        addr,
                                        frames
                                    ),
                                    Err(e) => tracing::warn!("[{}] Connection error: {}", addr, e),
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Tap shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

fn configure_stream(stream: &TcpStream, nodelay: bool) -> std::io::Result<()> {
    stream.set_nodelay(nodelay)
}

/// Handles one client. Returns the number of frames logged.
///
/// The client's handshake is answered with the tap's own version. A client
/// announcing a different protocol or version gets that answer and is
/// disconnected.
pub async fn serve<S>(
    stream: S,
    addr: SocketAddr,
    config: &TapConfig,
    shutdown: AbortHandle,
) -> Result<u64, FramerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let deadline = config.framer.deadline();
    let abort = move || shutdown.aborted() || deadline.is_some_and(|d| d.aborted());
    let mut framer = AsyncFramer::from_config(stream, &config.framer).abort_with(abort);

    let header = framer.read_header().await?;
    tracing::info!("[{}] Client header {}", addr, header);
    framer.write_header(config.major, config.minor).await?;

    if header.literal != PROTOCOL_LITERAL || header.version() != (config.major, config.minor) {
        tracing::warn!(
            "[{}] Unsupported protocol header {}, expected {}-{}",
            addr,
            header,
            config.major,
            config.minor
        );
        return Ok(0);
    }

    let mut frames = 0;
    loop {
        match framer.read_frame().await {
            Ok(frame) => {
                frames += 1;
                tracing::info!("[{}] {}", addr, frame);
            }
            Err(FramerError::ConnectionClosed) => break,
            Err(e) => return Err(e),
        }
    }

    Ok(frames)
}
