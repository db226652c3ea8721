//! Owns the socket and the dispatcher for one client connection.
//!
//! The connection runs as a single task: it reads frames and feeds them to
//! the dispatcher, and accepts outbound requests over an mpsc channel so
//! that callers don't need direct access to the socket. This keeps the
//! dispatcher single-threaded per session without forcing callers onto the
//! task's own executor context.

use futures::{SinkExt, StreamExt};
use sopmq_protocol::dispatcher::DispatchOutcome;
use sopmq_protocol::{CorrelationDispatcher, ProtocolMessage, SopmqCodec};
use sopmq_types::{CorrelationId, SopmqError};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;

type Builder = Box<dyn FnOnce(CorrelationId) -> ProtocolMessage + Send>;

struct Request {
    build: Builder,
    expected_variant: &'static str,
    reply_to: oneshot::Sender<Result<ProtocolMessage, SopmqError>>,
}

/// A handle to a running connection task. Cloning is cheap; every clone
/// shares the same underlying socket and dispatcher.
#[derive(Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<Request>,
}

impl ClientHandle {
    /// Sends a request built from the correlation id the task assigns it,
    /// and awaits the reply of `expected_variant`.
    pub async fn request(
        &self,
        expected_variant: &'static str,
        build: impl FnOnce(CorrelationId) -> ProtocolMessage + Send + 'static,
    ) -> Result<ProtocolMessage, SopmqError> {
        let (reply_to, reply_rx) = oneshot::channel();
        self.commands
            .send(Request {
                build: Box::new(build),
                expected_variant,
                reply_to,
            })
            .map_err(|_| SopmqError::ConnectionClosed)?;

        reply_rx.await.map_err(|_| SopmqError::ConnectionClosed)?
    }
}

/// Connects to `addr` and spawns the connection task. Returns a handle
/// immediately; the auth handshake is driven separately (see
/// `crate::session::authenticate`).
pub async fn connect(addr: &str, max_message_size: u32) -> Result<ClientHandle, SopmqError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| SopmqError::Network(e.to_string()))?;
    let framed = Framed::new(stream, SopmqCodec::new(max_message_size));

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run_connection(framed, rx));
    Ok(ClientHandle { commands: tx })
}

async fn run_connection(
    mut framed: Framed<TcpStream, SopmqCodec>,
    mut commands: mpsc::UnboundedReceiver<Request>,
) {
    let mut dispatcher = CorrelationDispatcher::new();
    let mut next_id: CorrelationId = 1;

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                let Some(cmd) = cmd else { break };
                let id = next_id;
                next_id = next_id.wrapping_add(1).max(1);

                let msg = (cmd.build)(id);
                let rx = dispatcher.register(id, cmd.expected_variant);
                if let Err(e) = framed.send(msg).await {
                    let _ = cmd.reply_to.send(Err(SopmqError::Network(e.to_string())));
                    break;
                }
                tokio::spawn(async move {
                    match rx.await {
                        Ok(msg) => { let _ = cmd.reply_to.send(Ok(msg)); }
                        Err(_) => { let _ = cmd.reply_to.send(Err(SopmqError::ConnectionClosed)); }
                    }
                });
            }
            frame = framed.next() => {
                match frame {
                    Some(Ok(msg)) => {
                        if let DispatchOutcome::Unhandled(variant) = dispatcher.dispatch(msg) {
                            tracing::warn!(variant, "unhandled frame from server, closing connection");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "connection read error, closing");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    dispatcher.teardown();
}
