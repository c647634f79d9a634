//! Newline-delimited JSON binding of the correlation transport.
//!
//! One transport serves the whole stream. Envelopes are pipelined: each line is
//! submitted as soon as it is read, and every resolved ticket is written as one
//! line by a single writer task, so replies to different lines may interleave.

use std::io;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::mcp::hooks::{Hooks, RequestContext, TransportKind};
use crate::mcp::rpc::{ErrorObject, Message};
use crate::mcp::server::Server;
use crate::registry::CapabilityRegistry;
use crate::transport::{CorrelationTransport, Envelope, Submission, TransportError};

pub struct StdioBinding {
    registry: Arc<CapabilityRegistry>,
    hooks: Arc<Hooks>,
    shutdown: CancellationToken,
}

impl StdioBinding {
    pub fn new(registry: Arc<CapabilityRegistry>, hooks: Arc<Hooks>) -> Self {
        Self {
            registry,
            hooks,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Serves the process's stdin and stdout until EOF or shutdown.
    pub async fn run(&self) -> io::Result<()> {
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    pub async fn serve<R, W>(&self, reader: R, writer: W) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let transport = CorrelationTransport::new();
        let server = Server::new(self.registry.clone(), self.hooks.clone());
        transport.connect(Arc::new(server)).map_err(io::Error::other)?;

        let (outbound, queue) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_lines(writer, queue));
        let mut in_flight = JoinSet::new();
        let mut lines = reader.lines();

        info!("stdio transport started");

        loop {
            let line = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("shutdown requested, closing stdio transport");
                    transport.close();
                    break;
                }
                line = lines.next_line() => line,
            };

            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("EOF on stdin");
                    break;
                }
                Err(err) => {
                    error!(error = %err, "failed to read from stdin");
                    transport.close();
                    break;
                }
            };

            while in_flight.try_join_next().is_some() {}

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let envelope = match Envelope::from_slice(line.as_bytes()) {
                Ok(envelope) => envelope,
                Err(err) => {
                    warn!(error = %err, "rejected stdio envelope");
                    send(&outbound, &Message::error_reply(None, err.to_error_object()));
                    continue;
                }
            };

            let context = RequestContext::new(TransportKind::Stdio);
            match transport.submit(envelope, context) {
                Ok(Submission::Accepted) => {}
                Ok(Submission::Pending(pending)) => {
                    let outbound = outbound.clone();
                    in_flight.spawn(async move {
                        send(&outbound, &pending.wait().await);
                    });
                }
                Err(err @ TransportError::DuplicateRequestId(_)) => {
                    warn!(error = %err, "rejected stdio envelope");
                    let reply = ErrorObject::invalid_request(err.to_string());
                    send(&outbound, &Message::error_reply(None, reply));
                }
                Err(err) => {
                    error!(error = %err, "stdio transport refused envelope");
                    let reply = ErrorObject::internal_error(err.to_string());
                    send(&outbound, &Message::error_reply(None, reply));
                }
            }
        }

        let drained = tokio::select! {
            _ = async {
                drain(&mut in_flight).await;
                transport.settle().await;
            } => true,
            _ = self.shutdown.cancelled() => false,
        };
        if !drained {
            transport.close();
            drain(&mut in_flight).await;
        }
        transport.close();

        drop(outbound);
        match writer_task.await {
            Ok(result) => result,
            Err(err) => Err(io::Error::other(err)),
        }
    }
}

async fn drain(in_flight: &mut JoinSet<()>) {
    while in_flight.join_next().await.is_some() {}
}

fn send<T: Serialize>(outbound: &mpsc::UnboundedSender<String>, payload: &T) {
    match serde_json::to_string(payload) {
        Ok(line) => {
            if outbound.send(line).is_err() {
                debug!("stdio writer is gone, dropping outbound line");
            }
        }
        Err(err) => error!(error = %err, "failed to serialize outbound line"),
    }
}

async fn write_lines<W>(mut writer: W, mut queue: mpsc::UnboundedReceiver<String>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = queue.recv().await {
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    writer.shutdown().await
}
