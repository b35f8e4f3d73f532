//! C2: per-connection client session state, grounded on shpool's
//! `daemon/server.rs` connection handling (one OS thread per client, a
//! serialized write half) and `original_source/src/hub/client.c`'s
//! kick/close semantics.

use std::net::{Shutdown, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::bail;
use nix::poll::{poll, PollFd, PollFlags};

use crate::notify::{self, Filter};
use crate::protocol::Message;

/// A session's lifecycle is linear and terminal: once `Closed`, a session
/// never returns to an earlier state (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unauthenticated,
    Connected,
    Closed,
}

/// One connected client. Reference-counted: the serving thread holds one
/// `Arc`, the clients registry holds another, and transient handlers (e.g.
/// "deliver this notification") take a short-lived clone while they run.
pub struct Session {
    pub id: u64,
    pub peer_addr: String,
    writer: Mutex<TcpStream>,
    state: Mutex<State>,
    name: Mutex<Option<String>>,
    filters: Mutex<Vec<Filter>>,
    subscriptions: Mutex<Vec<String>>,
    /// Count of in-flight operations (notify fan-out, var watch delivery)
    /// currently holding a reference to this session. The reaper waits for
    /// this to hit zero before reclaiming a closed session (spec.md §5).
    in_flight: AtomicU32,
    closed: AtomicBool,
}

impl Session {
    pub fn new(id: u64, stream: TcpStream) -> std::io::Result<Arc<Session>> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let writer = stream.try_clone()?;
        Ok(Arc::new(Session {
            id,
            peer_addr,
            writer: Mutex::new(writer),
            state: Mutex::new(State::Unauthenticated),
            name: Mutex::new(None),
            filters: Mutex::new(Vec::new()),
            subscriptions: Mutex::new(Vec::new()),
            in_flight: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        }))
    }

    pub fn state(&self) -> State {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_state(&self, state: State) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = state;
    }

    pub fn name(&self) -> Option<String> {
        self.name.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn set_name(&self, name: String) {
        *self.name.lock().unwrap_or_else(|p| p.into_inner()) = Some(name);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// A fresh handle to the same socket, for the serving thread's read
    /// loop. Reads and writes go through independent `TcpStream` clones
    /// that share one underlying file descriptor, so this never contends
    /// with `send`'s write-half lock.
    pub fn clone_read_half(&self) -> std::io::Result<TcpStream> {
        let writer = self.writer.lock().unwrap_or_else(|p| p.into_inner());
        writer.try_clone()
    }

    /// Serialize writes so two threads (the session's own reader loop
    /// replying to a request, and another session's fan-out of a
    /// notification/watch update) never interleave bytes on the wire.
    ///
    /// A non-blocking writability check runs first, matching
    /// `Hub_Net_sendMessage`'s behavior: a client whose receive buffer is
    /// full is treated as gone rather than letting a slow reader stall
    /// every other session's fan-out.
    pub fn send(&self, msg: &Message) -> anyhow::Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let mut writer = self.writer.lock().unwrap_or_else(|p| p.into_inner());
        if !is_writable(&writer) {
            drop(writer);
            self.mark_closed();
            bail!("session {} is not writable; marking closed", self.id);
        }
        if let Err(e) = msg.write_to(&mut *writer) {
            drop(writer);
            self.mark_closed();
            return Err(e);
        }
        Ok(())
    }

    pub fn add_filter(&self, filter: Filter) {
        self.filters.lock().unwrap_or_else(|p| p.into_inner()).push(filter);
    }

    pub fn clear_filters(&self) {
        self.filters.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }

    pub fn matches_any_filter(&self, text: &str) -> bool {
        let filters = self.filters.lock().unwrap_or_else(|p| p.into_inner());
        notify::any_matches(&filters, text)
    }

    pub fn subscribe(&self, var_name: String) {
        let mut subs = self.subscriptions.lock().unwrap_or_else(|p| p.into_inner());
        if !subs.contains(&var_name) {
            subs.push(var_name);
        }
    }

    pub fn unsubscribe(&self, var_name: &str) {
        self.subscriptions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .retain(|v| v != var_name);
    }

    /// Snapshot of subscriptions, used by the reaper to unwind the
    /// variable store's subscriber lists on teardown.
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Mark a reference as in-flight. Must be paired with `release`.
    pub fn acquire(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn in_flight_count(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Send `COMM.KICKING <reason>` and tear the connection down. Matches
    /// `Hub_Client_kick`: the reason is always delivered best-effort before
    /// the socket is shut down, even if the client is unresponsive.
    pub fn kick(&self, reason: &str) {
        let _ = self.send(&Message::unsolicited(vec!["COMM", "KICKING", reason]));
        self.mark_closed();
    }

    /// Send `COMM.CLOSING` for a graceful, non-error disconnect (server
    /// shutdown, or the client's own request).
    pub fn close_gracefully(&self) {
        let _ = self.send(&Message::unsolicited(vec!["COMM", "CLOSING"]));
        self.mark_closed();
    }

    pub fn mark_closed(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_state(State::Closed);
        let writer = self.writer.lock().unwrap_or_else(|p| p.into_inner());
        let _ = writer.shutdown(Shutdown::Both);
    }
}

/// Zero-timeout `poll()` for `POLLOUT`: true if a write would not block.
fn is_writable(stream: &TcpStream) -> bool {
    let mut fds = [PollFd::new(stream.as_raw_fd(), PollFlags::POLLOUT)];
    match poll(&mut fds, 0) {
        Ok(n) if n > 0 => fds[0].revents().map(|r| r.contains(PollFlags::POLLOUT)).unwrap_or(false),
        _ => false,
    }
}
