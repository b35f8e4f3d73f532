//! The pieces every connection handler needs a handle to: the variable
//! store, the persistence writer, the registry of other connected clients,
//! and the auth password. Bundled into one struct and handed to each
//! connection-serving thread as an `Arc`, the way shpool threads its
//! `Server` struct through `handle_conn`.

use std::sync::Arc;

use crate::persist::PersistWriter;
use crate::server::ClientRegistry;
use crate::vars::VarStore;

pub struct HubContext {
    pub vars: Arc<VarStore>,
    pub persist: Arc<PersistWriter>,
    pub clients: Arc<ClientRegistry>,
    pub password: String,
}
