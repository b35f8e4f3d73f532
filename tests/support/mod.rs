#![allow(dead_code)]

use std::env;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::{process, time};

use anyhow::{anyhow, Context};
use tempfile::TempDir;

use seawolf_hub::protocol::Message;

pub fn hub_bin() -> PathBuf {
    cargo_dir().join("hub")
}

pub fn cargo_dir() -> PathBuf {
    env::var_os("CARGO_BIN_PATH")
        .map(PathBuf::from)
        .or_else(|| {
            env::current_exe().ok().map(|mut path| {
                path.pop();
                if path.ends_with("deps") {
                    path.pop();
                }
                path
            })
        })
        .unwrap_or_else(|| panic!("CARGO_BIN_PATH wasn't set. Cannot continue running test"))
}

/// A helper handle for a `hub` subprocess, backed by a hermetic tmp dir with
/// its own config/defs/db files. Kills the subprocess when it goes out of
/// scope.
pub struct Proc {
    proc: Child,
    tmp_dir: TempDir,
    pub addr: String,
    pub password: String,
}

impl Proc {
    /// Spawn a hub with the given variable definitions (in the `name =
    /// default, persistent, readonly` grammar) and an optional password.
    pub fn new(var_defs: &str, password: &str) -> anyhow::Result<Proc> {
        let tmp_dir = tempfile::Builder::new()
            .prefix("seawolf-hub-test")
            .rand_bytes(20)
            .tempdir()
            .context("creating tmp dir")?;

        let defs_path = tmp_dir.path().join("vars.defs");
        std::fs::write(&defs_path, var_defs).context("writing var defs")?;
        let db_path = tmp_dir.path().join("vars.db");

        let port = pick_port()?;
        let addr = format!("127.0.0.1:{}", port);

        let config_path = tmp_dir.path().join("hub.conf");
        std::fs::write(
            &config_path,
            format!(
                "bind_address = 127.0.0.1\nbind_port = {}\npassword = {}\nvar_defs = {}\nvar_db = {}\n",
                port,
                password,
                defs_path.display(),
                db_path.display(),
            ),
        )
        .context("writing hub config")?;

        let proc = Command::new(hub_bin())
            .arg("--config-file")
            .arg(&config_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("spawning hub process")?;

        let mut sleep_dur = time::Duration::from_millis(10);
        let mut connected = false;
        for _ in 0..12 {
            if TcpStream::connect(&addr).is_ok() {
                connected = true;
                break;
            }
            std::thread::sleep(sleep_dur);
            sleep_dur *= 2;
        }
        if !connected {
            return Err(anyhow!("timed out waiting for hub to start listening on {}", addr));
        }

        Ok(Proc { proc, tmp_dir, addr, password: password.to_string() })
    }

    pub fn db_path(&self) -> PathBuf {
        self.tmp_dir.path().join("vars.db")
    }

    /// Connect and authenticate a new client. Panics the test (via `?`) on
    /// any protocol-level failure, since auth succeeding is a precondition
    /// for the rest of most tests.
    pub fn client(&self) -> anyhow::Result<Client> {
        let mut client = Client::connect(&self.addr)?;
        client.authenticate(&self.password)?;
        Ok(client)
    }

    /// Connect without authenticating, for tests that exercise the
    /// unauthenticated state.
    pub fn raw_client(&self) -> anyhow::Result<Client> {
        Client::connect(&self.addr)
    }
}

impl Drop for Proc {
    fn drop(&mut self) {
        if let Err(e) = self.proc.kill() {
            eprintln!("err killing hub proc: {:?}", e);
        }
        let _ = self.proc.wait();
    }
}

fn pick_port() -> anyhow::Result<u16> {
    // bind to an ephemeral port, read it back, then drop the listener; the
    // hub subprocess grabs the now-free port moments later. Good enough
    // for test isolation, matching the "spin until connect succeeds" retry
    // loop used elsewhere in this harness.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").context("picking a free port")?;
    Ok(listener.local_addr()?.port())
}

/// A minimal hand-rolled protocol client for integration tests: frame
/// pack/unpack reuses `seawolf_hub::protocol::Message` directly, so the
/// wire format under test is exactly what the hub itself speaks.
pub struct Client {
    stream: TcpStream,
    next_request_id: u16,
}

impl Client {
    pub fn connect(addr: &str) -> anyhow::Result<Client> {
        let stream = TcpStream::connect(addr).with_context(|| format!("connecting to {}", addr))?;
        Ok(Client { stream, next_request_id: 1 })
    }

    pub fn authenticate(&mut self, password: &str) -> anyhow::Result<()> {
        let reply = self.request(vec!["COMM", "AUTH", password])?;
        if reply.components.get(1).map(|c| c.as_slice()) != Some(b"SUCCESS") {
            return Err(anyhow!("authentication failed: {:?}", reply));
        }
        Ok(())
    }

    /// Send a message and block for the reply with the matching request id.
    pub fn request(&mut self, components: Vec<&str>) -> anyhow::Result<Message> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        let msg = Message::new(request_id, components);
        msg.write_to(&mut self.stream)?;
        let reply = Message::read_from(&mut self.stream)?;
        Ok(reply)
    }

    /// Send a message with no response expected.
    pub fn send(&mut self, components: Vec<&str>) -> anyhow::Result<()> {
        let msg = Message::unsolicited(components);
        msg.write_to(&mut self.stream)?;
        Ok(())
    }

    /// Block for the next unsolicited message the hub sends (a broadcast
    /// NOTIFY.IN, a WATCH.VALUE update, or a COMM.KICKING/CLOSING).
    pub fn read_message(&mut self) -> anyhow::Result<Message> {
        Ok(Message::read_from(&mut self.stream)?)
    }

    pub fn try_clone(&self) -> anyhow::Result<Client> {
        Ok(Client { stream: self.stream.try_clone()?, next_request_id: self.next_request_id })
    }
}
