//! Request/reply dispatch
//!
//! Clients on the request endpoint send one frame and wait for one reply.
//! The dispatcher hands each request to the next worker in round-robin
//! order. A worker answers its requests in the order it received them, so
//! replies are routed back through a per-worker FIFO of waiting clients
//! instead of any routing envelope.
//!
//! Requests that arrive while no worker is connected wait in a backlog.
//! A request whose client has disconnected is never handed to a worker,
//! whether it was backlogged or just arrived. When a worker disconnects,
//! its unanswered requests are dropped; the waiting clients time out on
//! their side.

use std::collections::VecDeque;
use std::net::SocketAddr;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::frame::{write_frame, Frame, FrameReader};

/// Identifier assigned to each worker connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(pub u64);

/// Messages handled by the dispatcher task
#[derive(Debug)]
pub(crate) enum DispatchCommand {
    /// A client request awaiting a reply
    Request {
        frame: Frame,
        reply: oneshot::Sender<Frame>,
    },
    /// A worker connected
    WorkerJoined {
        id: WorkerId,
        requests: mpsc::UnboundedSender<Frame>,
    },
    /// A worker answered its oldest outstanding request
    WorkerReply { id: WorkerId, frame: Frame },
    /// A worker disconnected
    WorkerLeft { id: WorkerId },
}

struct PendingRequest {
    frame: Frame,
    reply: oneshot::Sender<Frame>,
}

struct WorkerSlot {
    id: WorkerId,
    requests: mpsc::UnboundedSender<Frame>,
    pending: VecDeque<oneshot::Sender<Frame>>,
}

#[derive(Default)]
struct DispatchState {
    workers: Vec<WorkerSlot>,
    next: usize,
    backlog: VecDeque<PendingRequest>,
}

impl DispatchState {
    fn handle(&mut self, cmd: DispatchCommand) {
        match cmd {
            DispatchCommand::Request { frame, reply } => {
                self.dispatch(PendingRequest { frame, reply });
            }
            DispatchCommand::WorkerJoined { id, requests } => {
                info!("Worker {} joined ({} backlogged requests)", id.0, self.backlog.len());
                self.workers.push(WorkerSlot {
                    id,
                    requests,
                    pending: VecDeque::new(),
                });
                for request in std::mem::take(&mut self.backlog) {
                    self.dispatch(request);
                }
            }
            DispatchCommand::WorkerReply { id, frame } => {
                let Some(slot) = self.workers.iter_mut().find(|w| w.id == id) else {
                    warn!("Reply from unknown worker {}", id.0);
                    return;
                };
                match slot.pending.pop_front() {
                    // The client may have given up; nothing to do then.
                    Some(reply) => {
                        let _ = reply.send(frame);
                    }
                    None => warn!("Unsolicited reply from worker {}", id.0),
                }
            }
            DispatchCommand::WorkerLeft { id } => {
                if let Some(pos) = self.workers.iter().position(|w| w.id == id) {
                    let slot = self.workers.remove(pos);
                    if !slot.pending.is_empty() {
                        warn!(
                            "Worker {} left with {} unanswered requests",
                            id.0,
                            slot.pending.len()
                        );
                    }
                }
            }
        }
    }

    fn dispatch(&mut self, request: PendingRequest) {
        if request.reply.is_closed() {
            debug!("Requester left; dropping its request");
            return;
        }

        while !self.workers.is_empty() {
            let idx = self.next % self.workers.len();
            self.next = idx + 1;

            let slot = &mut self.workers[idx];
            if slot.requests.send(request.frame.clone()).is_ok() {
                debug!("Request dispatched to worker {}", slot.id.0);
                slot.pending.push_back(request.reply);
                return;
            }

            warn!("Worker {} is gone; removing it", slot.id.0);
            self.workers.remove(idx);
        }

        debug!("No worker connected; request backlogged");
        self.backlog.retain(|pending| !pending.reply.is_closed());
        self.backlog.push_back(request);
    }
}

/// Run the dispatcher until every command sender is dropped
pub(crate) async fn run_dispatcher(mut commands: mpsc::UnboundedReceiver<DispatchCommand>) {
    let mut state = DispatchState::default();
    while let Some(cmd) = commands.recv().await {
        state.handle(cmd);
    }
    debug!("Dispatcher ended");
}

/// Serve one client on the request endpoint
pub(crate) async fn serve_requester(
    stream: TcpStream,
    peer: SocketAddr,
    dispatch: mpsc::UnboundedSender<DispatchCommand>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = FrameReader::new(reader);

    loop {
        let frame = match reader.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                warn!("Requester {} connection error: {}", peer, e);
                break;
            }
        };

        let (reply_tx, mut reply_rx) = oneshot::channel();
        let request = DispatchCommand::Request {
            frame,
            reply: reply_tx,
        };
        if dispatch.send(request).is_err() {
            break;
        }

        // Leaving closes reply_rx, which tells the dispatcher to drop the
        // request if no worker has taken it yet.
        let reply = tokio::select! {
            reply = &mut reply_rx => reply,
            true = reader.closed() => {
                info!("Requester {} left before its reply", peer);
                break;
            }
        };

        match reply {
            Ok(reply) => {
                if let Err(e) = write_frame(&mut writer, &reply).await {
                    warn!("Requester {} write failed: {}", peer, e);
                    break;
                }
            }
            Err(_) => warn!("Request from {} was dropped by its worker", peer),
        }
    }
    info!("Requester disconnected: {}", peer);
}

/// Serve one worker on the worker endpoint
pub(crate) async fn serve_worker(
    stream: TcpStream,
    peer: SocketAddr,
    id: WorkerId,
    dispatch: mpsc::UnboundedSender<DispatchCommand>,
) {
    let (requests_tx, mut requests) = mpsc::unbounded_channel();
    let joined = DispatchCommand::WorkerJoined {
        id,
        requests: requests_tx,
    };
    if dispatch.send(joined).is_err() {
        return;
    }

    let (reader, mut writer) = stream.into_split();
    let mut reader = FrameReader::new(reader);

    loop {
        tokio::select! {
            request = requests.recv() => {
                let Some(frame) = request else { break };
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    warn!("Worker {} ({}) write failed: {}", id.0, peer, e);
                    break;
                }
            }

            result = reader.next_frame() => {
                match result {
                    Ok(None) => break,
                    Ok(Some(frame)) => {
                        if dispatch.send(DispatchCommand::WorkerReply { id, frame }).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Worker {} ({}) connection error: {}", id.0, peer, e);
                        break;
                    }
                }
            }
        }
    }

    let _ = dispatch.send(DispatchCommand::WorkerLeft { id });
    info!("Worker {} disconnected: {}", id.0, peer);
}
