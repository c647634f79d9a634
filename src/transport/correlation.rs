//! Request/reply correlation for one transport instance.
//!
//! Every inbound envelope that carries at least one request gets a ticket: the set
//! of request ids still owing a reply, the replies collected so far and a oneshot
//! the binding waits on. Replies are routed to their ticket by id; the ticket
//! resolves once its pending set is empty and is dropped immediately afterwards.
//! Tearing the transport down resolves every open ticket with a synthetic error.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, OnceLock},
};

use parking_lot::Mutex;
use tokio::{sync::oneshot, task::JoinSet};
use tracing::{debug, trace};

use super::envelope::{Completion, Envelope, Outbound};
use super::{MessageHandler, TransportError};
use crate::mcp::hooks::RequestContext;
use crate::mcp::rpc::{ErrorObject, Message, RequestId};

type TicketId = u64;

#[derive(Debug)]
struct Ticket {
    pending: HashSet<RequestId>,
    replies: Vec<Message>,
    batch: bool,
    completion: oneshot::Sender<Completion>,
}

impl Ticket {
    fn resolve(self) {
        let mut replies = self.replies;
        let outbound = match (self.batch, replies.len()) {
            (false, 1) => Outbound::Single(replies.remove(0)),
            _ => Outbound::Batch(replies),
        };
        // The receiver is gone when the client disconnected first.
        let _ = self.completion.send(Completion::Replies(outbound));
    }

    fn abort(self, error: ErrorObject) {
        let _ = self
            .completion
            .send(Completion::Aborted(Message::error_reply(None, error)));
    }
}

#[derive(Debug, Default)]
struct CorrelationState {
    started: bool,
    closed: bool,
    next_ticket: TicketId,
    tickets: HashMap<TicketId, Ticket>,
    routes: HashMap<RequestId, TicketId>,
}

/// The id→ticket tables, shared with the tasks that deliver replies.
#[derive(Debug, Default)]
pub(crate) struct CorrelationTable {
    state: Mutex<CorrelationState>,
}

impl CorrelationTable {
    fn start(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.started {
            return Err(TransportError::AlreadyStarted);
        }
        state.started = true;
        Ok(())
    }

    fn open_ticket(
        &self,
        envelope: &Envelope,
    ) -> Result<Option<oneshot::Receiver<Completion>>, TransportError> {
        let mut state = self.state.lock();
        if !state.started {
            return Err(TransportError::NotStarted);
        }
        if state.closed {
            return Err(TransportError::Closed);
        }

        let mut pending = HashSet::new();
        for id in envelope.request_ids() {
            if state.routes.contains_key(id) || !pending.insert(id.clone()) {
                return Err(TransportError::DuplicateRequestId(id.clone()));
            }
        }
        if pending.is_empty() {
            return Ok(None);
        }

        let ticket_id = state.next_ticket;
        state.next_ticket += 1;
        for id in &pending {
            state.routes.insert(id.clone(), ticket_id);
        }

        let (completion, receiver) = oneshot::channel();
        let replies = Vec::with_capacity(pending.len());
        state.tickets.insert(
            ticket_id,
            Ticket {
                pending,
                replies,
                batch: envelope.is_batch(),
                completion,
            },
        );
        trace!(ticket_id, "correlation ticket opened");
        Ok(Some(receiver))
    }

    fn deliver(&self, reply: Message) -> bool {
        let Some(id) = (match &reply {
            Message::Reply(inner) => inner.id.clone(),
            _ => None,
        }) else {
            trace!("dropping message that is not an attributable reply");
            return false;
        };

        let mut state = self.state.lock();
        let Some(ticket_id) = state.routes.remove(&id) else {
            debug!(id = %id, "dropping reply for untracked request id");
            return false;
        };
        let Some(ticket) = state.tickets.get_mut(&ticket_id) else {
            return false;
        };

        ticket.pending.remove(&id);
        ticket.replies.push(reply);
        if !ticket.pending.is_empty() {
            return true;
        }

        let finished = state.tickets.remove(&ticket_id);
        drop(state);
        if let Some(ticket) = finished {
            trace!(ticket_id, replies = ticket.replies.len(), "correlation ticket resolved");
            ticket.resolve();
        }
        true
    }

    fn teardown(&self, error: ErrorObject) -> usize {
        let mut state = self.state.lock();
        state.closed = true;
        state.routes.clear();
        let open: Vec<Ticket> = state.tickets.drain().map(|(_, ticket)| ticket).collect();
        drop(state);

        let count = open.len();
        for ticket in open {
            ticket.abort(error.clone());
        }
        count
    }

    fn pending_ids(&self) -> usize {
        self.state.lock().routes.len()
    }
}

/// Outcome of [`CorrelationTransport::submit`].
#[derive(Debug)]
pub enum Submission {
    /// The envelope held no requests; nothing will be replied.
    Accepted,
    Pending(PendingReply),
}

/// Resolves to the outbound payload of one envelope.
#[derive(Debug)]
pub struct PendingReply {
    receiver: oneshot::Receiver<Completion>,
}

impl PendingReply {
    pub async fn wait(self) -> Completion {
        self.receiver.await.unwrap_or_else(|_| {
            Completion::Aborted(Message::error_reply(
                None,
                ErrorObject::server_shutting_down(),
            ))
        })
    }
}

/// Binds a [`MessageHandler`] to one physical channel.
///
/// Messages of a submitted envelope are dispatched concurrently on tasks owned by
/// the transport; dropping or closing the transport aborts them.
pub struct CorrelationTransport {
    table: Arc<CorrelationTable>,
    handler: OnceLock<Arc<dyn MessageHandler>>,
    tasks: Mutex<JoinSet<()>>,
}

impl CorrelationTransport {
    pub fn new() -> Self {
        Self {
            table: Arc::new(CorrelationTable::default()),
            handler: OnceLock::new(),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn start(&self) -> Result<(), TransportError> {
        self.table.start()
    }

    /// Installs the message handler and starts the transport.
    pub fn connect(&self, handler: Arc<dyn MessageHandler>) -> Result<(), TransportError> {
        self.handler
            .set(handler)
            .map_err(|_| TransportError::AlreadyStarted)?;
        self.start()
    }

    /// Registers the envelope's request ids, then dispatches every message.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(
        &self,
        envelope: Envelope,
        context: RequestContext,
    ) -> Result<Submission, TransportError> {
        let handler = self
            .handler
            .get()
            .cloned()
            .ok_or(TransportError::NotConnected)?;
        let receiver = self.table.open_ticket(&envelope)?;

        let mut tasks = self.tasks.lock();
        while tasks.try_join_next().is_some() {}
        for message in envelope.into_messages() {
            let handler = handler.clone();
            let table = self.table.clone();
            let context = context.clone();
            tasks.spawn(async move {
                if let Some(reply) = handler.on_message(message, context).await {
                    table.deliver(reply);
                }
            });
        }

        Ok(match receiver {
            Some(receiver) => Submission::Pending(PendingReply { receiver }),
            None => Submission::Accepted,
        })
    }

    /// Routes one reply to its ticket. Returns `false` when the id is not tracked.
    pub fn deliver(&self, reply: Message) -> bool {
        self.table.deliver(reply)
    }

    /// Resolves every open ticket with a shutting-down error and aborts handler tasks.
    pub fn close(&self) -> usize {
        self.teardown(ErrorObject::server_shutting_down())
    }

    /// Like [`close`](Self::close), for tickets that outlived their deadline.
    pub fn expire(&self) -> usize {
        self.teardown(ErrorObject::request_timed_out())
    }

    pub fn pending_ids(&self) -> usize {
        self.table.pending_ids()
    }

    /// Waits for every dispatched handler task, notifications included.
    ///
    /// Tasks are taken out of the transport while waiting; dropping the returned
    /// future aborts them.
    pub async fn settle(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        while tasks.join_next().await.is_some() {}
    }

    /// Releases running handler tasks so they outlive the transport.
    pub fn detach(&self) {
        self.tasks.lock().detach_all();
    }

    fn teardown(&self, error: ErrorObject) -> usize {
        let aborted = self.table.teardown(error);
        self.tasks.lock().abort_all();
        if aborted > 0 {
            debug!(aborted, "transport torn down with pending tickets");
        }
        aborted
    }
}

impl Default for CorrelationTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CorrelationTransport {
    fn drop(&mut self) {
        self.teardown(ErrorObject::server_shutting_down());
    }
}
