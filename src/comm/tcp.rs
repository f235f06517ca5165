//! TCP communicator for participants in separate processes
//!
//! Star topology: rank 0 listens on the coordinator address and every other
//! rank holds one connection to it. Each message is one line of JSON. The
//! sockets are driven by a private current-thread tokio runtime so callers
//! stay synchronous.

use log::{debug, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;

use super::{Communicator, Message};
use crate::error::{Error, Result};

const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// First line sent by a connecting participant
#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    rank: usize,
    size: usize,
}

struct Link {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Link {
    fn new(stream: TcpStream) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
        }
    }

    async fn write_line<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let mut line = serde_json::to_string(value)
            .map_err(|e| Error::dispatch(format!("cannot encode message: {}", e)))?;
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Next line, or `None` once the peer closed the connection
    async fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        Ok((n > 0).then_some(line))
    }
}

fn runtime() -> Result<Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

/// Rank 0 after binding, before the other ranks have connected
pub struct PendingCoordinator {
    runtime: Runtime,
    listener: TcpListener,
}

impl PendingCoordinator {
    /// Address actually bound, useful when listening on port 0
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Waits until ranks `1..size` have all connected
    pub fn accept(self, size: usize, timeout: Option<Duration>) -> Result<TcpCommunicator> {
        let Self { runtime, listener } = self;

        let links = runtime.block_on(async {
            let mut links: HashMap<usize, Mutex<Link>> = HashMap::new();
            while links.len() + 1 < size {
                let (stream, peer) = match timeout {
                    Some(t) => tokio::time::timeout(t, listener.accept()).await.map_err(|_| {
                        Error::dispatch(format!(
                            "only {} of {} participants connected within {:?}",
                            links.len() + 1,
                            size,
                            t
                        ))
                    })??,
                    None => listener.accept().await?,
                };

                let mut link = Link::new(stream);
                let line = link.read_line().await?.ok_or_else(|| {
                    Error::dispatch(format!("{} closed the connection before identifying", peer))
                })?;
                let hello: Hello = serde_json::from_str(&line)
                    .map_err(|e| Error::dispatch(format!("bad handshake from {}: {}", peer, e)))?;

                if hello.size != size || hello.rank == 0 || hello.rank >= size {
                    return Err(Error::dispatch(format!(
                        "{} claims rank {} of {}, expected a rank in 1..{}",
                        peer, hello.rank, hello.size, size
                    )));
                }
                if links.contains_key(&hello.rank) {
                    return Err(Error::dispatch(format!("rank {} connected twice", hello.rank)));
                }

                debug!("Participant {} connected from {}", hello.rank, peer);
                links.insert(hello.rank, Mutex::new(link));
            }
            Ok::<_, Error>(links)
        })?;

        info!("All {} participants connected", size);
        Ok(TcpCommunicator {
            rank: 0,
            size,
            runtime,
            links,
        })
    }
}

/// Communicator over TCP sockets
pub struct TcpCommunicator {
    rank: usize,
    size: usize,
    runtime: Runtime,
    links: HashMap<usize, Mutex<Link>>,
}

impl TcpCommunicator {
    /// Binds the coordinator address as rank 0
    pub fn listen(addr: &str) -> Result<PendingCoordinator> {
        let runtime = runtime()?;
        let listener = runtime
            .block_on(TcpListener::bind(addr))
            .map_err(|e| Error::dispatch(format!("cannot listen on {}: {}", addr, e)))?;
        info!("Coordinator listening on {}", addr);
        Ok(PendingCoordinator { runtime, listener })
    }

    /// Connects a non-zero rank to the coordinator, retrying until
    /// `timeout` has passed
    pub fn connect(addr: &str, rank: usize, size: usize, timeout: Duration) -> Result<Self> {
        if rank == 0 || rank >= size {
            return Err(Error::configuration(format!(
                "rank {} cannot connect to a coordinator of {} participants",
                rank, size
            )));
        }

        let runtime = runtime()?;
        let link = runtime.block_on(async {
            let deadline = Instant::now() + timeout;
            let stream = loop {
                match TcpStream::connect(addr).await {
                    Ok(stream) => break stream,
                    Err(e) if Instant::now() >= deadline => {
                        return Err(Error::dispatch(format!(
                            "coordinator {} unreachable after {:?}: {}",
                            addr, timeout, e
                        )));
                    }
                    Err(_) => tokio::time::sleep(RETRY_INTERVAL).await,
                }
            };

            let mut link = Link::new(stream);
            link.write_line(&Hello { rank, size }).await?;
            Ok::<_, Error>(link)
        })?;

        debug!("Rank {} connected to coordinator {}", rank, addr);
        let mut links = HashMap::new();
        links.insert(0, Mutex::new(link));
        Ok(Self {
            rank,
            size,
            runtime,
            links,
        })
    }

    fn link(&self, rank: usize) -> Result<&Mutex<Link>> {
        self.links.get(&rank).ok_or_else(|| {
            Error::dispatch(format!(
                "rank {} has no connection to rank {}",
                self.rank, rank
            ))
        })
    }
}

impl Communicator for TcpCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, to: usize, message: &Message) -> Result<()> {
        let mut link = self.link(to)?.lock();
        self.runtime
            .block_on(link.write_line(message))
            .map_err(|e| Error::dispatch(format!("participant {} is unreachable: {}", to, e)))
    }

    fn recv_from(&self, from: usize, timeout: Option<Duration>) -> Result<Message> {
        let mut link = self.link(from)?.lock();
        let line = self.runtime.block_on(async {
            match timeout {
                Some(t) => tokio::time::timeout(t, link.read_line()).await.map_err(|_| {
                    Error::dispatch(format!("participant {} did not answer within {:?}", from, t))
                })?,
                None => link.read_line().await,
            }
        });

        let line = line
            .map_err(|e| Error::dispatch(format!("participant {} is unreachable: {}", from, e)))?
            .ok_or_else(|| Error::dispatch(format!("participant {} disconnected", from)))?;
        serde_json::from_str(&line)
            .map_err(|e| Error::dispatch(format!("bad message from participant {}: {}", from, e)))
    }
}
