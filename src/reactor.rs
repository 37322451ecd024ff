//! The event loop: one `mio::Poll`, one connection table, and two places
//! that do real work off this thread — blocking response construction goes
//! to the [`WorkerPool`], and idle deadlines live in the [`HeapTimer`] so
//! there's no dedicated timer thread either.
//!
//! Accepting, reading, and dispatching a finished request all happen
//! directly on the reactor thread (cheap, non-blocking). Only the part that
//! touches the filesystem — stat, open, mmap — is handed to a worker, which
//! reports back over a channel and wakes the poller.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, warn};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;

use crate::config::Config;
use crate::connection::{ConnAction, Connection};
use crate::error::ServerError;
use crate::http::{ParseError, ResponseBuilder};
use crate::pool::WorkerPool;
use crate::timer::HeapTimer;

const LISTEN_TOKEN: Token = Token(usize::MAX);
const WAKE_TOKEN: Token = Token(usize::MAX - 1);
const EVENT_CAPACITY: usize = 1024;

/// Sent from a worker thread (or a fired idle timer) back to the reactor.
///
/// Each variant carries the generation the sender observed when it captured
/// `Token`, so a signal that outlives the connection it was raised for (the
/// reactor closed the slot and a later `accept()` reused the same slab
/// index) can be told apart from one about that slot's current occupant.
enum ReadySignal {
    /// A worker finished building a response for this connection; it's safe
    /// to reregister for writability.
    ResponseReady(Token, u64),
    /// The connection's idle timer fired; close it.
    TimedOut(Token, u64),
}

/// The single-threaded reactor loop plus everything it owns: the listening
/// socket, the connection table, the worker pool, and the idle timer heap.
pub struct Reactor {
    listener: TcpListener,
    poll: Poll,
    connections: Slab<Arc<Mutex<Connection>>>,
    pool: WorkerPool,
    timers: HeapTimer,
    ready_tx: Sender<ReadySignal>,
    ready_rx: Receiver<ReadySignal>,
    waker: Arc<Waker>,
    docroot: PathBuf,
    index_path: &'static str,
    idle_timeout: Duration,
    level_triggered: bool,
    next_timer_id: u64,
    next_generation: u64,
}

impl Reactor {
    /// Binds the listening socket and wires up polling, the worker pool, and
    /// the idle timer heap. Does not start serving; call [`Reactor::run`].
    pub fn new(config: &Config) -> Result<Self, ServerError> {
        if !config.docroot.is_dir() {
            return Err(ServerError::InvalidDocRoot(config.docroot.clone()));
        }

        let addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
        let mut listener = TcpListener::bind(addr)?;

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTEN_TOKEN, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN)?);

        let (ready_tx, ready_rx) = mpsc::channel();

        Ok(Self {
            listener,
            poll,
            connections: Slab::new(),
            pool: WorkerPool::new(config.workers, config.queue_capacity),
            timers: HeapTimer::new(),
            ready_tx,
            ready_rx,
            waker,
            docroot: config.docroot.clone(),
            index_path: config.index_path(),
            idle_timeout: Duration::from_millis(config.idle_timeout_ms),
            level_triggered: config.level_triggered,
            next_timer_id: 0,
            next_generation: 0,
        })
    }

    /// The address actually bound, useful for tests that ask for port `0`
    /// and need to learn what the OS assigned.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the event loop. Returns only on a fatal polling error.
    pub fn run(&mut self) -> Result<(), ServerError> {
        let mut events = Events::with_capacity(EVENT_CAPACITY);
        info!("reactor listening on {}", self.listener.local_addr()?);

        loop {
            let timeout_ms = self.timers.next_tick_ms();
            self.drain_ready();
            let timeout = if timeout_ms < 0 {
                None
            } else {
                Some(Duration::from_millis(timeout_ms as u64))
            };

            match self.poll.poll(&mut events, timeout) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            for event in events.iter() {
                match event.token() {
                    LISTEN_TOKEN => {
                        if let Err(e) = self.accept() {
                            warn!("accept loop error: {e}");
                        }
                    }
                    WAKE_TOKEN => self.drain_ready(),
                    token => self.handle_event(token, event),
                }
            }
        }
    }

    fn next_timer_id(&mut self) -> u64 {
        let id = self.next_timer_id;
        self.next_timer_id += 1;
        id
    }

    /// Hands out a fresh epoch for a newly accepted connection. Never
    /// reused, unlike the slab index it's paired with.
    fn next_generation(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        generation
    }

    fn accept(&mut self) -> std::io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer_addr)) => {
                    let entry = self.connections.vacant_entry();
                    let token = Token(entry.key());
                    let timer_id = self.next_timer_id();
                    let generation = self.next_generation();

                    self.poll
                        .registry()
                        .register(&mut stream, token, Interest::READABLE)?;

                    let connection = Connection::new(
                        token,
                        stream,
                        peer_addr,
                        timer_id,
                        generation,
                        self.level_triggered,
                    );
                    entry.insert(Arc::new(Mutex::new(connection)));

                    let ready_tx = self.ready_tx.clone();
                    self.timers.add(
                        timer_id,
                        self.idle_timeout,
                        Box::new(move || {
                            let _ = ready_tx.send(ReadySignal::TimedOut(token, generation));
                        }),
                    );
                    debug!("accepted {peer_addr} as {token:?}");
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    fn handle_event(&mut self, token: Token, event: &mio::event::Event) {
        let Some(conn_arc) = self.connections.get(token.0).cloned() else {
            return;
        };

        let timer_id = conn_arc.lock().unwrap().timer_id;
        self.timers.adjust(timer_id, self.idle_timeout);

        if event.is_readable() {
            self.handle_readable(token, &conn_arc);
        }
        if event.is_writable() {
            self.handle_writable(token, &conn_arc);
        }
    }

    fn handle_readable(&mut self, token: Token, conn_arc: &Arc<Mutex<Connection>>) {
        let outcome = {
            let mut conn = conn_arc.lock().unwrap();
            if conn.busy {
                return;
            }
            let eof = match conn.fill() {
                Ok(eof) => eof,
                Err(e) => {
                    warn!("read error on {token:?}: {e}");
                    drop(conn);
                    self.close(token);
                    return;
                }
            };

            match conn.try_parse() {
                Ok(Some(request)) => ReadOutcome::Request(request),
                Ok(None) => {
                    if eof {
                        ReadOutcome::Close
                    } else {
                        ReadOutcome::Pending
                    }
                }
                Err(parse_error) => ReadOutcome::BadRequest(parse_error),
            }
        };

        match outcome {
            ReadOutcome::Pending => {}
            ReadOutcome::Close => self.close(token),
            ReadOutcome::BadRequest(_) => {
                let response = ResponseBuilder::error(&self.docroot, crate::http::Status::BadRequest, false);
                let mut conn = conn_arc.lock().unwrap();
                conn.queue_response(response);
                drop(conn);
                self.reregister(token, conn_arc);
            }
            ReadOutcome::Request(request) => {
                let path = if request.path == "/" {
                    self.index_path.to_string()
                } else {
                    request.path.clone()
                };
                let docroot = self.docroot.clone();
                let keep_alive = request.keep_alive;
                let conn_for_task = conn_arc.clone();
                let ready_tx = self.ready_tx.clone();
                let waker = self.waker.clone();
                let token_for_task = token;

                let mut conn = conn_arc.lock().unwrap();
                conn.busy = true;
                let generation = conn.generation();
                drop(conn);

                let dispatched = self.pool.add_task(move || {
                    let response = ResponseBuilder::build(&docroot, &path, keep_alive);
                    conn_for_task.lock().unwrap().queue_response(response);
                    let _ = ready_tx.send(ReadySignal::ResponseReady(token_for_task, generation));
                    let _ = waker.wake();
                });

                if dispatched.is_err() {
                    // queue is full under load; shed with a synthesized 400
                    // rather than stall the reactor thread building it inline.
                    conn_arc.lock().unwrap().busy = false;
                    let response = ResponseBuilder::error(&self.docroot, crate::http::Status::BadRequest, false);
                    let mut conn = conn_arc.lock().unwrap();
                    conn.queue_response(response);
                    drop(conn);
                    self.reregister(token, conn_arc);
                }
            }
        }
    }

    fn handle_writable(&mut self, token: Token, conn_arc: &Arc<Mutex<Connection>>) {
        let result = {
            let mut conn = conn_arc.lock().unwrap();
            conn.drain_writes()
        };

        match result {
            Ok(true) => {
                let action = conn_arc.lock().unwrap().finish_response();
                match action {
                    ConnAction::Close => self.close(token),
                    _ => self.reregister(token, conn_arc),
                }
            }
            Ok(false) => self.reregister(token, conn_arc),
            Err(e) => {
                warn!("write error on {token:?}: {e}");
                self.close(token);
            }
        }
    }

    fn reregister(&mut self, token: Token, conn_arc: &Arc<Mutex<Connection>>) {
        let mut conn = conn_arc.lock().unwrap();
        if let Err(e) = conn.reregister(self.poll.registry()) {
            warn!("reregister failed for {token:?}: {e}");
        }
    }

    fn close(&mut self, token: Token) {
        if let Some(conn_arc) = self.connections.try_remove(token.0) {
            let mut conn = conn_arc.lock().unwrap();
            self.timers.cancel(conn.timer_id);
            let _ = conn.deregister(self.poll.registry());
            debug!("closed {token:?}");
        }
    }

    /// Drains worker/timer signals that arrived while we weren't looking.
    ///
    /// Every signal carries the generation its sender observed; a slab slot
    /// freed by [`close`](Self::close) can be handed to a brand new
    /// connection before a stale signal about its previous occupant drains,
    /// so each branch re-checks the live connection's generation before
    /// acting on it rather than trusting the token alone.
    fn drain_ready(&mut self) {
        while let Ok(signal) = self.ready_rx.try_recv() {
            match signal {
                ReadySignal::ResponseReady(token, generation) => {
                    if let Some(conn_arc) = self.connections.get(token.0).cloned() {
                        let mut conn = conn_arc.lock().unwrap();
                        if conn.generation() == generation {
                            conn.busy = false;
                            drop(conn);
                            self.reregister(token, &conn_arc);
                        }
                    }
                }
                ReadySignal::TimedOut(token, generation) => {
                    if let Some(conn_arc) = self.connections.get(token.0).cloned() {
                        if conn_arc.lock().unwrap().generation() == generation {
                            debug!("idle timeout on {token:?}");
                            self.close(token);
                        }
                    }
                }
            }
        }
    }
}

enum ReadOutcome {
    Pending,
    Close,
    BadRequest(ParseError),
    Request(crate::http::Request),
}
