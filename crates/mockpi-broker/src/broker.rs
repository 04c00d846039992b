//! Broker accept loop and lifecycle

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;
use crate::dispatch::{run_dispatcher, serve_requester, serve_worker, WorkerId};
use crate::error::BrokerError;
use crate::fanout::{serve_publisher, serve_subscriber};

/// Commands accepted by a running broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerCommand {
    /// Close every endpoint and connection
    Shutdown,
}

/// Addresses the broker actually listens on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerAddrs {
    pub publish: SocketAddr,
    pub subscribe: SocketAddr,
    pub request: SocketAddr,
    pub worker: SocketAddr,
}

/// A bound, not yet running broker
pub struct Broker {
    publish: TcpListener,
    subscribe: TcpListener,
    request: TcpListener,
    worker: TcpListener,
    channel_capacity: usize,
}

async fn bind(endpoint: &'static str, addr: SocketAddr) -> Result<TcpListener, BrokerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| BrokerError::Bind {
            endpoint,
            addr,
            source,
        })
}

impl Broker {
    /// Bind all four endpoints
    pub async fn bind(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let broker = Self {
            publish: bind("publish", config.publish).await?,
            subscribe: bind("subscribe", config.subscribe).await?,
            request: bind("request", config.request).await?,
            worker: bind("worker", config.worker).await?,
            channel_capacity: config.channel_capacity.max(1),
        };
        Ok(broker)
    }

    /// Bound addresses, useful when the config asked for port 0
    pub fn local_addrs(&self) -> Result<BrokerAddrs, BrokerError> {
        Ok(BrokerAddrs {
            publish: self.publish.local_addr()?,
            subscribe: self.subscribe.local_addr()?,
            request: self.request.local_addr()?,
            worker: self.worker.local_addr()?,
        })
    }

    /// Accept connections until a shutdown command arrives or every
    /// command sender is dropped
    pub async fn run(self, mut commands: mpsc::Receiver<BrokerCommand>) -> Result<(), BrokerError> {
        let addrs = self.local_addrs()?;
        info!(
            "Broker listening: publish={} subscribe={} request={} worker={}",
            addrs.publish, addrs.subscribe, addrs.request, addrs.worker
        );

        let (frames_tx, _) = broadcast::channel(self.channel_capacity);
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();
        tasks.spawn(run_dispatcher(dispatch_rx));
        let mut next_worker = 0u64;

        loop {
            tokio::select! {
                accepted = self.publish.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!("Publisher connected: {}", peer);
                        tasks.spawn(serve_publisher(stream, peer, frames_tx.clone()));
                    }
                    Err(e) => warn!("Publish endpoint accept failed: {}", e),
                },

                accepted = self.subscribe.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!("Subscriber connected: {}", peer);
                        tasks.spawn(serve_subscriber(stream, peer, frames_tx.subscribe()));
                    }
                    Err(e) => warn!("Subscribe endpoint accept failed: {}", e),
                },

                accepted = self.request.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!("Requester connected: {}", peer);
                        tasks.spawn(serve_requester(stream, peer, dispatch_tx.clone()));
                    }
                    Err(e) => warn!("Request endpoint accept failed: {}", e),
                },

                accepted = self.worker.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let id = WorkerId(next_worker);
                        next_worker += 1;
                        info!("Worker {} connected: {}", id.0, peer);
                        tasks.spawn(serve_worker(stream, peer, id, dispatch_tx.clone()));
                    }
                    Err(e) => warn!("Worker endpoint accept failed: {}", e),
                },

                Some(joined) = tasks.join_next() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            warn!("Connection task panicked: {}", e);
                        }
                    }
                }

                cmd = commands.recv() => match cmd {
                    Some(BrokerCommand::Shutdown) => {
                        info!("Broker shutdown requested");
                        break;
                    }
                    None => {
                        debug!("Broker command channel closed");
                        break;
                    }
                },
            }
        }

        tasks.shutdown().await;
        info!("Broker stopped");
        Ok(())
    }

    /// Run the broker on a background task
    pub fn spawn(self) -> Result<BrokerHandle, BrokerError> {
        let addrs = self.local_addrs()?;
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let task = tokio::spawn(self.run(cmd_rx));
        Ok(BrokerHandle {
            addrs,
            cmd_tx,
            task,
        })
    }
}

/// Handle to a broker running on a background task
pub struct BrokerHandle {
    addrs: BrokerAddrs,
    cmd_tx: mpsc::Sender<BrokerCommand>,
    task: JoinHandle<Result<(), BrokerError>>,
}

impl BrokerHandle {
    pub fn addrs(&self) -> &BrokerAddrs {
        &self.addrs
    }

    /// Stop the broker and wait for every connection to close
    pub async fn shutdown(self) -> Result<(), BrokerError> {
        // A send error means the broker already stopped; join it anyway.
        let _ = self.cmd_tx.send(BrokerCommand::Shutdown).await;
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(BrokerError::Io(std::io::Error::other(e))),
        }
    }
}
