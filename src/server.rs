//! C3: the connection manager — accept loop, the live-clients registry, and
//! the reaper that tears down closed sessions off the hot path. Grounded on
//! shpool's `daemon/server.rs` (`Server::serve`'s `thread::spawn`-per-
//! connection accept loop) and `daemon/ttl_reaper.rs` (a dedicated thread
//! draining a channel of "this one needs cleanup" ids).

use std::collections::HashMap;
use std::io::Read;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::Context;
use crossbeam_channel::{select, unbounded, Receiver, Sender};

use crate::consts;
use crate::dispatch::{self, Outcome};
use crate::hub::HubContext;
use crate::protocol::Message;
use crate::session::Session;
use crate::vars::VarStore;

/// Every live session, plus a queue of ids whose sessions have already shut
/// their socket down and are waiting for the reaper to unwind them.
pub struct ClientRegistry {
    clients: Mutex<HashMap<u64, Arc<Session>>>,
    closed_tx: Sender<u64>,
    closed_rx: Receiver<u64>,
}

impl ClientRegistry {
    pub fn new() -> ClientRegistry {
        let (closed_tx, closed_rx) = unbounded();
        ClientRegistry { clients: Mutex::new(HashMap::new()), closed_tx, closed_rx }
    }

    fn insert(&self, session: Arc<Session>) {
        self.clients.lock().unwrap_or_else(|p| p.into_inner()).insert(session.id, session);
    }

    fn remove(&self, id: u64) -> Option<Arc<Session>> {
        self.clients.lock().unwrap_or_else(|p| p.into_inner()).remove(&id)
    }

    /// Queue a session for reaping. Safe to call more than once for the same
    /// id; the reaper's registry removal makes the second call a no-op.
    pub fn mark_closed(&self, id: u64) {
        let _ = self.closed_tx.send(id);
    }

    fn closed_receiver(&self) -> Receiver<u64> {
        self.closed_rx.clone()
    }

    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.clients.lock().unwrap_or_else(|p| p.into_inner()).values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.clients.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl Default for ClientRegistry {
    fn default() -> ClientRegistry {
        ClientRegistry::new()
    }
}

/// Unwind one closed session: drop its variable subscriptions and filters,
/// wait for any in-flight fan-out delivery still holding a reference to
/// finish, then let the registry's `Arc` (the last one) drop.
fn reap_one(registry: &ClientRegistry, vars: &VarStore, id: u64) {
    let Some(session) = registry.remove(id) else { return };
    for var_name in session.subscriptions() {
        vars.unsubscribe(&var_name, &session);
    }
    session.clear_filters();
    while session.in_flight_count() > 0 {
        thread::sleep(consts::JOIN_POLL_DURATION);
    }
    session.mark_closed();
}

fn run_reaper(registry: Arc<ClientRegistry>, vars: Arc<VarStore>, closed_rx: Receiver<u64>, stop_rx: Receiver<()>) {
    loop {
        select! {
            recv(closed_rx) -> id => {
                if let Ok(id) = id {
                    reap_one(&registry, &vars, id);
                }
            }
            recv(stop_rx) -> _ => {
                while let Ok(id) = closed_rx.try_recv() {
                    reap_one(&registry, &vars, id);
                }
                break;
            }
        }
    }
}

/// Run the accept loop until `shutdown` is observed set. Each connection is
/// served on its own thread (spec.md §5: one thread per client, no shared
/// per-connection state beyond what `Session` and `HubContext` expose).
pub fn serve(ctx: Arc<HubContext>, listener: TcpListener, shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
    listener.set_nonblocking(true).context("setting listener nonblocking")?;

    let next_id = AtomicU64::new(1);
    let (reaper_stop_tx, reaper_stop_rx) = unbounded();
    let reaper_registry = Arc::clone(&ctx.clients);
    let reaper_vars = Arc::clone(&ctx.vars);
    let closed_rx = ctx.clients.closed_receiver();
    let reaper = thread::Builder::new()
        .name("reaper".to_string())
        .spawn(move || run_reaper(reaper_registry, reaper_vars, closed_rx, reaper_stop_rx))
        .context("spawning reaper thread")?;

    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                if ctx.clients.len() >= consts::MAX_CLIENTS {
                    log::warn!(target: "Hub", "rejecting connection: at MAX_CLIENTS ({})", consts::MAX_CLIENTS);
                    drop(stream);
                    continue;
                }
                let id = next_id.fetch_add(1, Ordering::SeqCst);
                let session = match Session::new(id, stream) {
                    Ok(s) => s,
                    Err(e) => {
                        log::warn!(target: "Hub", "failed to set up new session: {:#}", e);
                        continue;
                    }
                };
                ctx.clients.insert(Arc::clone(&session));
                log::debug!(target: "Hub", "accepted connection {} from {}", id, session.peer_addr);

                let thread_ctx = Arc::clone(&ctx);
                let thread_session = Arc::clone(&session);
                thread::Builder::new()
                    .name(format!("client-{}", id))
                    .spawn(move || serve_client(thread_ctx, thread_session))
                    .ok();
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(consts::JOIN_POLL_DURATION);
            }
            Err(e) => {
                log::error!(target: "Hub", "accept failed: {:#}", e);
            }
        }
    }

    log::info!(target: "Hub", "shutting down: closing {} client(s)", ctx.clients.len());
    for session in ctx.clients.snapshot() {
        session.kick("Hub closing");
        ctx.clients.mark_closed(session.id);
    }
    let _ = reaper_stop_tx.send(());
    let _ = reaper.join();
    ctx.persist.shutdown();

    Ok(())
}

/// One connection's whole lifetime: read frames until the socket closes or
/// the session is kicked, dispatching each to `dispatch::dispatch`.
fn serve_client(ctx: Arc<HubContext>, session: Arc<Session>) {
    let mut reader = match session_reader(&session) {
        Ok(r) => r,
        Err(e) => {
            log::warn!(target: "Hub", "session {}: failed to clone read half: {:#}", session.id, e);
            session.mark_closed();
            ctx.clients.mark_closed(session.id);
            return;
        }
    };

    loop {
        if session.is_closed() {
            break;
        }
        match Message::read_from(&mut reader) {
            Ok(msg) => {
                if let Outcome::Shutdown = dispatch::dispatch(&ctx, &session, &msg) {
                    session.mark_closed();
                    ctx.clients.mark_closed(session.id);
                    // the whole hub is going down; the caller's shutdown
                    // flag is flipped by the signal handler / lib run loop.
                    break;
                }
            }
            Err(_) => {
                // clean EOF or I/O error: the peer is gone either way.
                break;
            }
        }
    }

    session.mark_closed();
    ctx.clients.mark_closed(session.id);
}

fn session_reader(session: &Arc<Session>) -> std::io::Result<impl Read> {
    session.clone_read_half()
}
