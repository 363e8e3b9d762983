use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use slog::{info, warn};

use crate::error::ServerError;
use crate::services::Services;

use super::connection::Connection;
use super::registry::ConnectionRegistry;

/// Binds the listening socket and repeatedly hands accepted sockets to
/// fresh `Connection`s. A bind failure is fatal; accept errors are logged
/// and the loop continues.
pub struct Acceptor {
    listener: TcpListener,
    registry: Arc<ConnectionRegistry>,
    services: Arc<Services>,
    running: Arc<AtomicBool>,
}

impl Acceptor {
    pub fn bind(host: &str, port: u16, registry: Arc<ConnectionRegistry>, services: Arc<Services>) -> Result<Self, ServerError> {
        let listener = TcpListener::bind((host, port))?;
        Ok(Acceptor { listener, registry, services, running: Arc::new(AtomicBool::new(true)) })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the accept loop on the calling thread; spawn this onto a
    /// dedicated thread from the caller.
    pub fn run(&self) {
        for incoming in self.listener.incoming() {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            match incoming {
                Ok(stream) => self.accept_one(stream),
                Err(e) => {
                    warn!(self.services.logger, "accept failed"; "error" => %e);
                }
            }
        }
        info!(self.services.logger, "acceptor stopped");
    }

    fn accept_one(&self, stream: TcpStream) {
        if !Self::has_real_peer(&stream) {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            return;
        }

        let id = self.registry.next_id();
        match Connection::accept(stream, id, self.registry.clone(), self.services.clone()) {
            Ok(connection) => {
                self.registry.insert(connection.clone());
                connection.spawn();
            }
            Err(e) => {
                warn!(self.services.logger, "failed to accept connection"; "error" => %e);
            }
        }
    }

    /// Mirrors the original's `remote_ip != 0` check: a peer reporting the
    /// unspecified address is refused without ever being read from.
    fn has_real_peer(stream: &TcpStream) -> bool {
        match stream.peer_addr() {
            Ok(addr) => !addr.ip().is_unspecified(),
            Err(_) => false,
        }
    }

    /// Flags the loop to stop, then connects a throwaway socket to the
    /// listener to unblock the next `accept()`.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Ok(addr) = self.listener.local_addr() {
            let _ = TcpStream::connect(addr);
        }
    }

    pub fn running_handle(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }
}

/// Spawns `acceptor`'s accept loop onto a dedicated thread.
pub fn spawn(acceptor: Arc<Acceptor>) -> thread::JoinHandle<()> {
    thread::spawn(move || acceptor.run())
}
