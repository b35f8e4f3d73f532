//! seawolf-hub: a small coordination server for a pool of cooperating
//! processes. `run` wires together config loading, the logger, the
//! variable store and its persistence writer, signal handling, and the
//! connection manager — the composition root that `main.rs` calls into,
//! keeping all process-wide state out of statics (spec.md §9).

pub mod config;
pub mod consts;
pub mod dispatch;
pub mod hub;
pub mod logger;
pub mod notify;
pub mod persist;
pub mod protocol;
pub mod server;
pub mod session;
pub mod signals;
pub mod vars;

use std::net::TcpListener;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;

use crate::config::ServerConfig;
use crate::hub::HubContext;
use crate::logger::Logger;
use crate::persist::PersistWriter;
use crate::server::ClientRegistry;
use crate::vars::VarStore;

/// Start the hub and block until it shuts down (signal, or an authenticated
/// client's `COMM.SHUTDOWN`).
pub fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    let (config, loaded_from) = ServerConfig::load(config_path).context("loading server configuration")?;

    Logger::new(config.log_file.as_deref(), config.log_replicate_stdout, config.log_level)
        .context("initializing logger")?
        .install()
        .context("installing logger")?;

    match &loaded_from {
        Some(path) => log::info!(target: "Hub", "loaded configuration from '{}'", path.display()),
        None => log::warn!(target: "Hub", "no configuration file found; running with defaults"),
    }

    let defs = config::load_var_defs(&config.var_defs)
        .with_context(|| format!("loading variable definitions from '{}'", config.var_defs.display()))?;
    let persisted = config::load_persistent_values(&config.var_db, &defs, |msg| {
        log::warn!(target: "Hub", "{}", msg);
    })
    .with_context(|| format!("loading persistent values from '{}'", config.var_db.display()))?;

    let vars = Arc::new(VarStore::new(&defs, &persisted));
    let persist = Arc::new(PersistWriter::spawn(config.var_db.clone(), Arc::clone(&vars)));
    let clients = Arc::new(ClientRegistry::new());

    let ctx = Arc::new(HubContext {
        vars,
        persist,
        clients,
        password: config.password.clone(),
    });

    let listener = TcpListener::bind((config.bind_address.as_str(), config.bind_port)).with_context(|| {
        format!("binding {}:{}", config.bind_address, config.bind_port)
    })?;
    log::info!(target: "Hub", "listening on {}:{}", config.bind_address, config.bind_port);

    let shutdown = Arc::new(AtomicBool::new(false));
    signals::install(Arc::clone(&shutdown)).context("installing signal handlers")?;

    server::serve(ctx, listener, shutdown)?;
    log::info!(target: "Hub", "shut down cleanly");
    Ok(())
}
