//! Connection records owned by the event loop.
//!
//! Slots are reused after a connection closes, but every reuse bumps the
//! slot's generation. A [`ConnectionId`] therefore names one connection for
//! its whole life, and a response addressed to a closed connection can never
//! match the connection that later takes its slot.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;

use mio::net::TcpStream;

use crate::dispatch::ResponseMessage;

/// Stable identity of one accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId {
    index: u32,
    generation: u32,
}

impl ConnectionId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index; also the poll token.
    #[must_use]
    pub const fn index(self) -> usize {
        self.index as usize
    }

    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.index, self.generation)
    }
}

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    /// Waiting for the hostlist verdict; bytes are buffered, not parsed.
    AwaitingAcl,
    Open,
    /// No more requests are read; close once queued bytes are flushed.
    Closing,
}

/// Per-connection buffers and bookkeeping.
#[derive(Debug)]
pub(crate) struct Connection {
    pub(crate) id: ConnectionId,
    pub(crate) stream: TcpStream,
    pub(crate) peer: SocketAddr,
    pub(crate) state: ConnectionState,
    pub(crate) read_buffer: Vec<u8>,
    pub(crate) write_buffer: Vec<u8>,
    /// Sequence given to the next parsed request.
    pub(crate) next_request: u64,
    /// Sequence whose response is written next.
    pub(crate) next_response: u64,
    /// Responses that arrived ahead of their turn.
    pub(crate) pending: BTreeMap<u64, ResponseMessage>,
    pub(crate) peer_closed: bool,
    /// A response asked for the connection to close once written.
    pub(crate) close_after_flush: bool,
}

impl Connection {
    /// Requests parsed but not yet answered.
    pub(crate) fn in_flight(&self) -> u64 {
        self.next_request.saturating_sub(self.next_response)
    }

    /// Allocates the sequence for a newly parsed request.
    pub(crate) const fn take_sequence(&mut self) -> u64 {
        let sequence = self.next_request;
        self.next_request += 1;
        sequence
    }

    /// Whether the connection can be dropped now.
    pub(crate) fn is_finished(&self) -> bool {
        if self.state == ConnectionState::AwaitingAcl {
            return self.peer_closed && self.read_buffer.is_empty();
        }
        if !self.write_buffer.is_empty() {
            return false;
        }
        self.close_after_flush
            || (self.in_flight() == 0
                && (self.state == ConnectionState::Closing || self.peer_closed))
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    connection: Option<Connection>,
}

/// Slab of connections addressed by [`ConnectionId`].
#[derive(Debug, Default)]
pub(crate) struct ConnectionTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl ConnectionTable {
    /// Index the next insert will use.
    pub(crate) fn vacant_id(&self) -> ConnectionId {
        if let Some(&index) = self.free.last()
            && let Some(slot) = self.slots.get(index as usize)
        {
            return ConnectionId::new(index, slot.generation);
        }
        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        ConnectionId::new(index, 0)
    }

    /// Stores a new connection, returning its identity.
    pub(crate) fn insert(
        &mut self,
        stream: TcpStream,
        peer: SocketAddr,
        state: ConnectionState,
    ) -> ConnectionId {
        let id = self.vacant_id();
        let connection = Connection {
            id,
            stream,
            peer,
            state,
            read_buffer: Vec::new(),
            write_buffer: Vec::new(),
            next_request: 0,
            next_response: 0,
            pending: BTreeMap::new(),
            peer_closed: false,
            close_after_flush: false,
        };
        if self.free.last().is_some_and(|&index| index as usize == id.index()) {
            self.free.pop();
        } else {
            self.slots.push(Slot::default());
        }
        if let Some(slot) = self.slots.get_mut(id.index()) {
            slot.connection = Some(connection);
        }
        id
    }

    /// Looks up a live connection, rejecting stale identities.
    pub(crate) fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.connection.as_mut())
    }

    /// Looks up whichever connection currently occupies `index`.
    pub(crate) fn id_at(&self, index: usize) -> Option<ConnectionId> {
        self.slots
            .get(index)
            .and_then(|slot| slot.connection.as_ref())
            .map(|connection| connection.id)
    }

    /// Removes a connection and retires its identity.
    pub(crate) fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let slot = self
            .slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation)?;
        let connection = slot.connection.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(connection)
    }

    /// Identities of every live connection.
    pub(crate) fn ids(&self) -> Vec<ConnectionId> {
        self.slots
            .iter()
            .filter_map(|slot| slot.connection.as_ref().map(|connection| connection.id))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.connection.is_some())
            .count()
    }
}
