use std::collections::{BTreeMap, BTreeSet};

use super::util;
use crate::error::{Error, Result};

/// Tag of the messages sent up the tree by `reduce`.
pub const REDUCE_TAG: u64 = 0;

/// Tag of the messages sent down the tree by `broadcast`.
pub const BROADCAST_TAG: u64 = 1;

/// Interface for a group of processes that can exchange messages. The
/// underlying transport can in principle be TCP, UDP, a higher level
/// abstraction like MPI, or channels between threads.
///
pub trait Communicator {
    /// Must be implemented to return the rank of this process within the
    /// communicator.
    fn rank(&self) -> usize;

    /// Must be implemented to return the number of peers processes in this
    /// communicator.
    fn size(&self) -> usize;

    /// Must be implemented to send a tagged message to a peer. This method
    /// must return immediately, in other words it is not allowed to block
    /// until a matching receive is posted.
    fn send(&self, rank: usize, tag: u64, message: Vec<u8>) -> Result<()>;

    /// Must be implemented to receive the next message with the given tag
    /// from any of the peers. Messages with other tags which arrive first
    /// must be held back for later receives of their tag. This method is
    /// allowed to block until a message is ready to be received, and should
    /// fail rather than block forever if a peer has gone away.
    fn recv(&self, tag: u64) -> Result<Vec<u8>>;

    /// Implements a binomial tree broadcast from the root node. The message
    /// buffer must be `Some` if this is the root node, and it must be `None`
    /// otherwise.
    ///
    fn broadcast(&self, value: Option<Vec<u8>>) -> Result<Vec<u8>> {
        let r = self.rank();
        let p = self.size();

        let value = match value {
            Some(value) => value,
            None => self.recv(BROADCAST_TAG)?,
        };
        for level in (0..util::ceil_log2(p)).rev() {
            let one = 1 << level;
            let two = 1 << (level + 1);

            if r % two == 0 && r + one < p {
                self.send(r + one, BROADCAST_TAG, value.clone())?
            }
        }
        Ok(value)
    }

    /// Implements a binomial tree reduce. All ranks return `None` except for
    /// the root. Messages from children may arrive in any order, so the
    /// operator must be commutative and associative.
    ///
    fn reduce<F>(&self, f: F, mut value: Vec<u8>) -> Result<Option<Vec<u8>>>
    where
        F: Fn(Vec<u8>, Vec<u8>) -> Vec<u8>,
    {
        let r = self.rank();
        let p = self.size();

        for level in 0..util::ceil_log2(p) {
            let one = 1 << level;
            let two = 1 << (level + 1);

            if r % two == 0 {
                if r + one < p {
                    value = f(value, self.recv(REDUCE_TAG)?)
                }
            } else {
                self.send(r - one, REDUCE_TAG, value)?;
                return Ok(None);
            }
        }
        Ok(Some(value))
    }

    /// Implements an all-reduce (symmetric fold) operation over a commutative
    /// binary operator.
    ///
    fn all_reduce<F>(&self, f: F, value: Vec<u8>) -> Result<Vec<u8>>
    where
        F: Fn(Vec<u8>, Vec<u8>) -> Vec<u8>,
    {
        let reduced = self.reduce(f, value)?;
        self.broadcast(reduced)
    }

    /// Every rank contributes one buffer, and every rank gets back the
    /// contributions of all ranks. The order of the returned buffers is
    /// unspecified; callers that need a canonical order must sort them.
    ///
    fn all_gather(&self, value: Vec<u8>) -> Result<Vec<Vec<u8>>> {
        let mut framed = Vec::with_capacity(value.len() + 8);
        util::write_frame(&mut framed, &value);

        let gathered = self.all_reduce(
            |mut a, b| {
                a.extend(b);
                a
            },
            framed,
        )?;
        util::read_frames(&gathered)
    }

    /// Sparse point-to-point exchange. Sends each outgoing buffer to the peer
    /// it is keyed by, then receives exactly one buffer from each rank in
    /// `sources`, and returns them keyed by sender. Every rank must know who
    /// sends to it, so the pattern has to be derivable from shared data.
    /// Successive exchanges under one tag must be separated by a collective
    /// operation.
    ///
    fn exchange(
        &self,
        tag: u64,
        outgoing: BTreeMap<usize, Vec<u8>>,
        sources: &BTreeSet<usize>,
    ) -> Result<BTreeMap<usize, Vec<u8>>> {
        for (rank, bytes) in outgoing {
            self.send(rank, tag, util::with_sender(self.rank(), &bytes))?
        }
        let mut received = BTreeMap::new();

        while received.len() < sources.len() {
            let (sender, bytes) = util::split_sender(&self.recv(tag)?)?;

            if !sources.contains(&sender) || received.contains_key(&sender) {
                return Err(Error::Communication(format!(
                    "rank {} got an unexpected message from {} under tag {}",
                    self.rank(),
                    sender,
                    tag
                )));
            }
            received.insert(sender, bytes);
        }
        Ok(received)
    }
}
