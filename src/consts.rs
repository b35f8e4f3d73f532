use std::time;

/// Accept backlog / max concurrent clients, per spec.md §6 ("MAX_CLIENTS,
/// implementation-defined, >= 128"). The original C hub derives this from
/// `FD_SETSIZE - 1`; we just pick a generous constant.
pub const MAX_CLIENTS: usize = 512;

/// How long the reaper waits for a session-serving thread to notice it has
/// been kicked and exit, when polling `JoinHandle::is_finished`.
pub const JOIN_POLL_DURATION: time::Duration = time::Duration::from_millis(50);

/// Default server config values, per spec.md §6.
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_BIND_PORT: u16 = 31427;
pub const DEFAULT_VAR_DEFS: &str = "seawolf_var.defs";
pub const DEFAULT_VAR_DB: &str = "seawolf_var.db";
pub const DEFAULT_LOG_LEVEL: &str = "NORMAL";

/// Maximum line length for config/defs/db files (spec.md §4.8).
pub const MAX_CONFIG_LINE_LEN: usize = 512;
