//! The node's accept loop: binds one listener, spawns one task per
//! incoming connection, and drives each through a `ServerSession` until it
//! closes.

use crate::session::{NodeContext, ServerSession, SessionOutcome};
use futures::{SinkExt, StreamExt};
use sopmq_protocol::SopmqCodec;
use sopmq_types::SopmqError;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

pub struct NodeServer {
    context: Arc<NodeContext>,
    max_message_size: u32,
}

impl NodeServer {
    pub fn new(context: Arc<NodeContext>, max_message_size: u32) -> NodeServer {
        NodeServer {
            context,
            max_message_size,
        }
    }

    /// Binds `addr` and serves connections until the process is killed or
    /// the listener errors out.
    pub async fn serve(&self, addr: &str) -> Result<(), SopmqError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SopmqError::Network(format!("binding {addr}: {e}")))?;
        tracing::info!(addr, "node listening");
        self.serve_listener(listener).await
    }

    /// Serves connections on an already-bound listener. Split out from
    /// `serve` so callers that need to learn the bound address first (an
    /// ephemeral port, for instance) can bind, inspect `local_addr`, and
    /// hand the listener over afterward.
    pub async fn serve_listener(&self, listener: TcpListener) -> Result<(), SopmqError> {
        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            };

            let context = self.context.clone();
            let max_message_size = self.max_message_size;
            tokio::spawn(async move {
                tracing::debug!(%peer_addr, "accepted connection");
                if let Err(e) = handle_connection(stream, context, max_message_size).await {
                    tracing::warn!(%peer_addr, error = %e, "connection ended with an error");
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    context: Arc<NodeContext>,
    max_message_size: u32,
) -> Result<(), SopmqError> {
    let mut framed = Framed::new(stream, SopmqCodec::new(max_message_size));
    let mut session = ServerSession::new(context);

    while let Some(frame) = framed.next().await {
        let msg = frame.map_err(|e| SopmqError::Network(e.to_string()))?;
        match session.handle(msg).await {
            SessionOutcome::Reply(reply) => {
                framed
                    .send(reply)
                    .await
                    .map_err(|e| SopmqError::Network(e.to_string()))?;
            }
            SessionOutcome::ReplyAndClose(reply) => {
                let _ = framed.send(reply).await;
                break;
            }
            SessionOutcome::Close => break,
        }
    }

    Ok(())
}
