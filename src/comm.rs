//! Collective communication between the ranks of a distributed computation.
use crate::error::CommunicationError;
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::trace;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::time::Duration;

/// A group of ranks that take part in collective operations.
///
/// All collective operations must be called by every rank of the group, in the same order.
pub trait Communicator {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Personalized all-to-all exchange.
    ///
    /// `outgoing[r]` is sent to rank `r`. On success, entry `r` of the returned vector holds the
    /// messages rank `r` sent to this rank. Messages sent to the own rank are returned as is.
    fn exchange<M: Send + 'static>(&self, outgoing: Vec<Vec<M>>) -> Result<Vec<Vec<M>>, CommunicationError>;

    /// Returns `true` on every rank if and only if every rank passes `true`.
    fn all_agree(&self, value: bool) -> Result<bool, CommunicationError> {
        let outgoing = (0..self.size()).map(|_| vec![value]).collect();
        let incoming = self.exchange(outgoing)?;
        Ok(incoming.iter().flatten().all(|&agrees| agrees))
    }
}

impl<C: Communicator + ?Sized> Communicator for &C {
    fn rank(&self) -> usize {
        C::rank(self)
    }

    fn size(&self) -> usize {
        C::size(self)
    }

    fn exchange<M: Send + 'static>(&self, outgoing: Vec<Vec<M>>) -> Result<Vec<Vec<M>>, CommunicationError> {
        C::exchange(self, outgoing)
    }

    fn all_agree(&self, value: bool) -> Result<bool, CommunicationError> {
        C::all_agree(self, value)
    }
}

/// The communicator of a computation with a single rank.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct SelfCommunicator;

impl Communicator for SelfCommunicator {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn exchange<M: Send + 'static>(&self, outgoing: Vec<Vec<M>>) -> Result<Vec<Vec<M>>, CommunicationError> {
        if outgoing.len() != 1 {
            return Err(CommunicationError::BufferCount {
                expected: 1,
                actual: outgoing.len(),
            });
        }
        Ok(outgoing)
    }
}

struct Envelope {
    round: u64,
    source: usize,
    payload: Box<dyn Any + Send>,
}

/// A communicator connecting ranks that run on threads of the same process.
///
/// The communicators of a group are created together with [`ThreadCommunicator::create`]
/// and are then moved to one thread each. Every collective operation is tagged with a round
/// number, so messages of consecutive operations are never confused even if a fast rank
/// starts the next operation early.
pub struct ThreadCommunicator {
    rank: usize,
    size: usize,
    senders: Vec<Option<Sender<Envelope>>>,
    receiver: Receiver<Envelope>,
    early_messages: RefCell<Vec<Envelope>>,
    round: Cell<u64>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for ThreadCommunicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadCommunicator")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .field("round", &self.round.get())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ThreadCommunicator {
    /// Creates the communicators of a group of `size` ranks, ordered by rank.
    pub fn create(size: usize) -> Vec<Self> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();
        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, receiver)| Self {
                rank,
                size,
                senders: senders
                    .iter()
                    .enumerate()
                    .map(|(dest, sender)| (dest != rank).then(|| sender.clone()))
                    .collect(),
                receiver,
                early_messages: RefCell::new(Vec::new()),
                round: Cell::new(0),
                timeout: None,
            })
            .collect()
    }

    /// Fails collective operations that wait longer than `timeout` for a peer.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self
        }
    }

    fn receive(&self, round: u64, missing_peer: usize) -> Result<Envelope, CommunicationError> {
        match self.timeout {
            Some(timeout) => self.receiver.recv_timeout(timeout).map_err(|err| match err {
                RecvTimeoutError::Timeout => CommunicationError::Timeout {
                    peer: missing_peer,
                    round,
                    timeout,
                },
                RecvTimeoutError::Disconnected => CommunicationError::Disconnected {
                    peer: missing_peer,
                    round,
                },
            }),
            None => self
                .receiver
                .recv()
                .map_err(|_| CommunicationError::Disconnected {
                    peer: missing_peer,
                    round,
                }),
        }
    }
}

impl Communicator for ThreadCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn exchange<M: Send + 'static>(&self, outgoing: Vec<Vec<M>>) -> Result<Vec<Vec<M>>, CommunicationError> {
        if outgoing.len() != self.size {
            return Err(CommunicationError::BufferCount {
                expected: self.size,
                actual: outgoing.len(),
            });
        }

        let round = self.round.get();
        self.round.set(round + 1);

        let mut incoming: Vec<Option<Vec<M>>> = (0..self.size).map(|_| None).collect();
        for (dest, messages) in outgoing.into_iter().enumerate() {
            match &self.senders[dest] {
                None => incoming[dest] = Some(messages),
                Some(sender) => {
                    trace!(
                        "Rank {} sends {} messages to rank {} in round {}",
                        self.rank,
                        messages.len(),
                        dest,
                        round
                    );
                    let envelope = Envelope {
                        round,
                        source: self.rank,
                        payload: Box::new(messages),
                    };
                    sender
                        .send(envelope)
                        .map_err(|_| CommunicationError::Disconnected { peer: dest, round })?;
                }
            }
        }

        let deliver = |envelope: Envelope, incoming: &mut Vec<Option<Vec<M>>>| {
            let source = envelope.source;
            let messages = envelope
                .payload
                .downcast::<Vec<M>>()
                .map_err(|_| CommunicationError::PayloadType { peer: source, round })?;
            incoming[source] = Some(*messages);
            Ok::<_, CommunicationError>(())
        };

        let early: Vec<Envelope> = {
            let mut early_messages = self.early_messages.borrow_mut();
            let (current, later): (Vec<_>, Vec<_>) = early_messages
                .drain(..)
                .partition(|envelope| envelope.round == round);
            *early_messages = later;
            current
        };
        for envelope in early {
            deliver(envelope, &mut incoming)?;
        }

        while let Some(missing_peer) = incoming.iter().position(Option::is_none) {
            let envelope = self.receive(round, missing_peer)?;
            if envelope.round == round {
                deliver(envelope, &mut incoming)?;
            } else {
                self.early_messages.borrow_mut().push(envelope);
            }
        }

        Ok(incoming.into_iter().flatten().collect())
    }
}
