//! Per-socket state: buffers, the request parser, and whatever response is
//! currently being drained out. Owned by the reactor's connection table and
//! shared with worker threads behind an `Arc<Mutex<_>>` while a request is
//! being handled off-thread.

use std::io::{self, ErrorKind};
use std::net::SocketAddr;

use mio::net::TcpStream;
use mio::{Interest, Registry, Token};

use crate::buffer::Buffer;
use crate::http::{ParseError, Progress, Request, RequestParser, Response};

const READ_BUFFER_CAPACITY: usize = 4096;
const WRITE_BUFFER_CAPACITY: usize = 512;

/// What the reactor should do with a connection once its current response
/// has fully drained.
pub enum ConnAction {
    /// Stay open and wait for the next request.
    Idle,
    /// The peer is gone or the protocol says to stop; deregister and drop.
    Close,
}

/// A single client connection: the socket, its read/write buffers, the
/// in-progress request parser, and whatever response is currently being
/// drained to the wire.
pub struct Connection {
    token: Token,
    stream: TcpStream,
    peer_addr: SocketAddr,
    read_buf: Buffer,
    write_buf: Buffer,
    current_response: Option<Response>,
    body_offset: usize,
    parser: RequestParser,
    /// Whether the connection should stay open once the current response
    /// finishes draining. Updated from each parsed request.
    keep_alive: bool,
    /// Set while a worker thread owns this connection's response-building
    /// step, so the reactor doesn't hand it out twice.
    pub busy: bool,
    /// Timer heap id tracking this connection's idle deadline.
    pub timer_id: u64,
    /// Epoch distinguishing this occupant of `token`'s slab slot from
    /// whatever connection was accepted into the same slot before or after
    /// it. A slab index is just a reused integer; cross-thread messages
    /// (`ReadySignal`) carry this alongside the `Token` so a signal meant
    /// for a connection that has since closed can't be mistaken for one
    /// about its slot's new occupant.
    generation: u64,
    /// When true, a single `read`/`write` is attempted per readiness event
    /// instead of looping to `would-block`. Correct only under a genuinely
    /// level-triggered notifier (the next event recovers any leftover
    /// readiness); under the default edge-triggered mode this would stall.
    level_triggered: bool,
}

impl Connection {
    /// Wraps a freshly accepted socket. `generation` must be unique across
    /// every connection that will ever occupy `token`'s slab slot.
    pub fn new(
        token: Token,
        stream: TcpStream,
        peer_addr: SocketAddr,
        timer_id: u64,
        generation: u64,
        level_triggered: bool,
    ) -> Self {
        Self {
            token,
            stream,
            peer_addr,
            read_buf: Buffer::with_capacity(READ_BUFFER_CAPACITY),
            write_buf: Buffer::with_capacity(WRITE_BUFFER_CAPACITY),
            current_response: None,
            body_offset: 0,
            parser: RequestParser::new(),
            keep_alive: true,
            busy: false,
            timer_id,
            generation,
            level_triggered,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// This connection's epoch, for matching against a `ReadySignal` carried
    /// across the worker-to-reactor channel before acting on it.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// The readiness interest this connection currently wants.
    pub fn interest(&self) -> Interest {
        if self.has_pending_write() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        }
    }

    fn has_pending_write(&self) -> bool {
        self.write_buf.readable_bytes() > 0
            || self
                .current_response
                .as_ref()
                .is_some_and(|r| self.body_offset < r.body_bytes().len())
    }

    pub fn register(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut self.stream, self.token, self.interest())
    }

    pub fn reregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.reregister(&mut self.stream, self.token, self.interest())
    }

    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.stream)
    }

    /// Drains the socket into the read buffer until it would block or the
    /// peer closes. One edge-triggered readiness notification can carry more
    /// than a single `read_fd` call can absorb, so this loops rather than
    /// trusting one scatter-read to empty the kernel queue.
    ///
    /// Returns `true` on a clean EOF.
    pub fn fill(&mut self) -> io::Result<bool> {
        loop {
            match self.read_buf.read_fd(&mut self.stream) {
                Ok(0) => return Ok(true),
                Ok(_) if self.level_triggered => return Ok(false),
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Attempts to parse one complete request out of the read buffer.
    pub fn try_parse(&mut self) -> Result<Option<Request>, ParseError> {
        match self.parser.parse(&mut self.read_buf)? {
            Progress::Complete(request) => Ok(Some(request)),
            Progress::NeedMoreData => Ok(None),
        }
    }

    /// Queues a response for writing and records whether the connection
    /// should stay alive once it's fully drained.
    pub fn queue_response(&mut self, response: Response) {
        self.keep_alive = response.keep_alive();
        self.write_buf.append(&response.head_bytes());
        self.current_response = Some(response);
        self.body_offset = 0;
    }

    /// Drains queued output to the socket until it would block or
    /// everything has been written. Returns `true` once fully flushed.
    pub fn drain_writes(&mut self) -> io::Result<bool> {
        loop {
            let body_len = self.current_response.as_ref().map_or(0, |r| r.body_bytes().len());
            if self.write_buf.readable_bytes() == 0 && self.body_offset >= body_len {
                return Ok(true);
            }

            let head_before = self.write_buf.readable_bytes();
            let remaining_body: &[u8] = self
                .current_response
                .as_ref()
                .map(|r| &r.body_bytes()[self.body_offset..])
                .unwrap_or(&[]);

            match self.write_buf.write_fd_with(&mut self.stream, remaining_body) {
                Ok(n) => {
                    if n > head_before {
                        self.body_offset += n - head_before;
                    }
                    if self.level_triggered {
                        let body_len = self.current_response.as_ref().map_or(0, |r| r.body_bytes().len());
                        return Ok(self.write_buf.readable_bytes() == 0 && self.body_offset >= body_len);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Called once a response has been fully flushed. Resets per-request
    /// state and reports whether the connection should accept another
    /// request or close.
    pub fn finish_response(&mut self) -> ConnAction {
        self.current_response = None;
        self.body_offset = 0;
        if self.keep_alive {
            ConnAction::Idle
        } else {
            ConnAction::Close
        }
    }
}
