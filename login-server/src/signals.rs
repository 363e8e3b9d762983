use std::sync::Arc;

use slog::info;

use crate::bus::BusSubscriber;
use crate::dispatch::Dispatcher;
use crate::net::{Acceptor, ConnectionRegistry};

/// Coordinates the shutdown sequence once SIGINT arrives, top-down: stop
/// accepting, close the server socket, join the dispatcher, join the bus
/// subscriber, close every live connection. Each step is safe to call even
/// if an earlier one already happened (e.g. during tests that skip the bus).
pub fn shutdown(
    acceptor: &Arc<Acceptor>,
    bus_subscriber: Option<&BusSubscriber>,
    dispatcher: &Arc<Dispatcher>,
    registry: &Arc<ConnectionRegistry>,
    logger: &slog::Logger,
) {
    info!(logger, "shutting down");

    acceptor.stop();

    dispatcher.shutdown();

    if let Some(subscriber) = bus_subscriber {
        subscriber.stop();
        subscriber.join();
    }

    registry.close_all();

    info!(logger, "shutdown complete");
}

/// Installs a Ctrl-C handler that runs `shutdown` once and then lets the
/// process exit normally.
pub fn install_ctrlc_handler(
    acceptor: Arc<Acceptor>,
    bus_subscriber: Option<Arc<BusSubscriber>>,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<ConnectionRegistry>,
    logger: slog::Logger,
) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        shutdown(&acceptor, bus_subscriber.as_deref(), &dispatcher, &registry, &logger);
        std::process::exit(0);
    })
}
