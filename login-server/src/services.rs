use std::sync::{Arc, Mutex};

use crate::account::AccountStore;
use crate::bus::BusPublisher;
use crate::config::ServerConfig;
use crate::crypto::RsaCipher;
use crate::dispatch::Dispatcher;
use crate::events::ScriptHost;

/// The dependency bag threaded through construction in place of global
/// mutable state, so tests can build isolated instances side by side.
pub struct Services {
    pub config: ServerConfig,
    pub rsa: RsaCipher,
    pub account_store: Box<dyn AccountStore>,
    pub script_host: Arc<Mutex<ScriptHost>>,
    pub dispatcher: Arc<Dispatcher>,
    pub bus_publisher: Option<Arc<BusPublisher>>,
    pub logger: slog::Logger,
}
