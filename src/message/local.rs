use std::cell::RefCell;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::debug;

use super::comm::Communicator;
use crate::error::{Error, Result};

const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(30);

/// A communicator for a single process. Collective operations return the
/// local contribution; point-to-point operations fail because there are no
/// peers.
///
#[derive(Clone, Copy, Debug, Default)]
pub struct SerialCommunicator;

impl Communicator for SerialCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn send(&self, rank: usize, _tag: u64, _message: Vec<u8>) -> Result<()> {
        Err(Error::Communication(format!("serial communicator has no peer {}", rank)))
    }

    fn recv(&self, _tag: u64) -> Result<Vec<u8>> {
        Err(Error::Communication("serial communicator has no peers".to_string()))
    }
}

/// A communicator connecting a group of threads in the same process through
/// crossbeam channels. Each member owns an inbox, and holds a sender into
/// every other member's inbox. Messages are tagged; a message arriving
/// before its tag is asked for is kept in a pending list until it is.
/// Receives time out, so a member which never participates in a collective
/// causes an error on its peers instead of a deadlock.
///
pub struct ChannelCommunicator {
    rank: usize,
    peers: Vec<Sender<(u64, Vec<u8>)>>,
    inbox: Receiver<(u64, Vec<u8>)>,
    pending: RefCell<Vec<(u64, Vec<u8>)>>,
    timeout: Duration,
}

impl ChannelCommunicator {
    /// Create a group of `size` connected communicators. The communicator at
    /// position `n` in the returned vector has rank `n`; each one is meant to
    /// be moved onto its own thread.
    ///
    pub fn group(size: usize) -> Vec<Self> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size)
            .map(|_| crossbeam_channel::unbounded())
            .unzip();

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| Self {
                rank,
                peers: senders.clone(),
                inbox,
                pending: RefCell::new(Vec::new()),
                timeout: DEFAULT_RECV_TIMEOUT,
            })
            .collect()
    }

    /// Set how long a receive may block before failing.
    ///
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Communicator for ChannelCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, rank: usize, tag: u64, message: Vec<u8>) -> Result<()> {
        debug!("rank {} sending {} bytes to {} (tag {})", self.rank, message.len(), rank, tag);
        self.peers
            .get(rank)
            .ok_or_else(|| Error::Communication(format!("no peer with rank {}", rank)))?
            .send((tag, message))
            .map_err(|_| Error::Communication(format!("peer {} has disconnected", rank)))
    }

    fn recv(&self, tag: u64) -> Result<Vec<u8>> {
        {
            let mut pending = self.pending.borrow_mut();

            if let Some(n) = pending.iter().position(|(t, _)| *t == tag) {
                return Ok(pending.remove(n).1);
            }
        }
        let deadline = Instant::now() + self.timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());

            match self.inbox.recv_timeout(remaining) {
                Ok((t, message)) if t == tag => return Ok(message),
                Ok((t, message)) => {
                    debug!("rank {} holding a message with tag {} while waiting for {}", self.rank, t, tag);
                    self.pending.borrow_mut().push((t, message))
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(Error::Communication(format!(
                        "rank {} timed out after {:?} waiting for tag {}",
                        self.rank, self.timeout, tag
                    )))
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Communication(format!("rank {} inbox is disconnected", self.rank)))
                }
            }
        }
    }
}
