use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use slog::{debug, warn};

use crate::dispatch::Task;
use crate::events::{EventArgs, ScriptValue};
use crate::net::registry::ConnectionRegistry;
use crate::net::protocol::{self, HandshakeOutcome, Protocol};
use crate::services::Services;
use crate::wire::checksum;
use crate::wire::message::{InboundMessage, HEADER_LENGTH, MAX_MESSAGE_SIZE};
use crate::wire::opcode::PING_OPCODE;

const READ_DEADLINE: Duration = Duration::from_secs(30);
const WRITE_DEADLINE: Duration = Duration::from_secs(30);

/// One TCP session. Read pipeline runs on its own thread with OS-level
/// read/write deadlines standing in for the original event-loop timers;
/// `send` may be called from the dispatcher thread (scripted handlers
/// writing back to a client) as well as from the reader thread itself
/// (the handshake reply), so the write half is its own mutex.
pub struct Connection {
    id: u64,
    reader: Mutex<Option<TcpStream>>,
    writer: Mutex<TcpStream>,
    protocol: Mutex<Option<Protocol>>,
    first_packet_received: AtomicBool,
    closed: AtomicBool,
    registry: Arc<ConnectionRegistry>,
    services: Arc<Services>,
}

impl Connection {
    pub fn accept(
        stream: TcpStream,
        id: u64,
        registry: Arc<ConnectionRegistry>,
        services: Arc<Services>,
    ) -> io::Result<Arc<Self>> {
        stream.set_nodelay(true)?;
        let writer = stream.try_clone()?;
        Ok(Arc::new(Connection {
            id,
            reader: Mutex::new(Some(stream)),
            writer: Mutex::new(writer),
            protocol: Mutex::new(None),
            first_packet_received: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            registry,
            services,
        }))
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Starts the dedicated reader thread. The connection keeps itself
    /// alive via the `Arc` clone moved into the thread; the registry holds
    /// the other strong reference.
    pub fn spawn(self: &Arc<Self>) {
        let conn = self.clone();
        thread::spawn(move || conn.run());
    }

    fn run(self: Arc<Self>) {
        loop {
            if self.is_closed() {
                break;
            }
            match self.read_frame() {
                Ok(Some(msg)) => {
                    if let Err(e) = self.handle_frame(msg) {
                        debug!(self.services.logger, "closing connection after dispatch error"; "id" => self.id, "error" => %e);
                        self.close();
                        break;
                    }
                }
                Ok(None) => {
                    self.close();
                    break;
                }
                Err(e) => {
                    if e.kind() != ErrorKind::WouldBlock && e.kind() != ErrorKind::TimedOut {
                        warn!(self.services.logger, "read failed"; "id" => self.id, "error" => %e);
                    }
                    self.close();
                    break;
                }
            }
        }
    }

    fn read_frame(&self) -> io::Result<Option<InboundMessage>> {
        let mut guard = self.reader.lock().unwrap();
        let stream = match guard.as_mut() {
            Some(s) => s,
            None => return Err(io::Error::new(ErrorKind::NotConnected, "reader already taken")),
        };
        stream.set_read_timeout(Some(READ_DEADLINE))?;

        let mut msg = InboundMessage::new();
        stream.read_exact(msg.header_buffer_mut())?;
        let size = msg.decode_header_length() as usize;
        if size == 0 || size >= MAX_MESSAGE_SIZE - 16 {
            return Ok(None);
        }

        stream.read_exact(msg.body_buffer_mut(size))?;
        msg.set_length(size + HEADER_LENGTH);
        Ok(Some(msg))
    }

    fn handle_frame(self: &Arc<Self>, mut msg: InboundMessage) -> io::Result<()> {
        let transmitted_checksum = msg.get_u32();
        let tail_len = msg.length().saturating_sub(msg.position());
        let computed_checksum = checksum::adler32(msg.region(msg.position(), tail_len));
        if computed_checksum != transmitted_checksum {
            // Legacy clients may omit the checksum; tolerate by rewinding
            // and treating these four bytes as the start of the ciphertext.
            msg.skip(-4);
        }

        if !self.first_packet_received.swap(true, Ordering::SeqCst) {
            msg.skip(1); // protocol id
            self.handle_handshake(msg)
        } else {
            self.handle_authenticated_packet(msg)
        }
    }

    fn handle_handshake(self: &Arc<Self>, mut msg: InboundMessage) -> io::Result<()> {
        match protocol::parse_handshake(&mut msg, &self.services) {
            HandshakeOutcome::Success { key, account, characters, password } => {
                let now = flux::time::timestamp_secs();
                let mut reply = protocol::build_login_reply(&account, &characters, &password, &self.services, now);
                let bytes = protocol::finalize(&mut reply, &key);
                *self.protocol.lock().unwrap() = Some(Protocol::new(key, account, now));
                self.write_bytes(&bytes)
            }
            HandshakeOutcome::Rejected { key, reason } => {
                let mut reply = protocol::build_error_reply(&reason);
                let bytes = protocol::finalize(&mut reply, &key);
                let _ = self.write_bytes(&bytes);
                Err(io::Error::new(ErrorKind::InvalidData, reason))
            }
            HandshakeOutcome::CryptoFailure => {
                Err(io::Error::new(ErrorKind::InvalidData, "RSA handshake failed"))
            }
        }
    }

    fn handle_authenticated_packet(self: &Arc<Self>, mut msg: InboundMessage) -> io::Result<()> {
        let key = {
            let guard = self.protocol.lock().unwrap();
            match guard.as_ref() {
                Some(p) => p.key,
                None => return Err(io::Error::new(ErrorKind::InvalidData, "packet before handshake")),
            }
        };

        if !crate::crypto::xtea::decrypt(&key, &mut msg) {
            return Err(io::Error::new(ErrorKind::InvalidData, "xtea decrypt failed"));
        }

        let opcode = msg.get_u8();
        if opcode == PING_OPCODE {
            if let Some(p) = self.protocol.lock().unwrap().as_mut() {
                p.last_ping = flux::time::timestamp_secs();
            }
            return Ok(());
        }

        let payload = msg.remaining();
        let event_name = opcode.to_string();
        let args: EventArgs =
            vec![("client", ScriptValue::ConnectionId(self.id)), ("msg", ScriptValue::Bytes(payload))];
        let host = self.services.script_host.clone();
        self.services.dispatcher.add_task(Task::new(move || {
            host.lock().unwrap().emit_no_ret(&event_name, &args);
        }));
        Ok(())
    }

    /// Encrypts `msg` under the session key and writes it. Used by
    /// scripted handlers reaching back into a connection by id.
    pub fn send(&self, mut msg: crate::wire::OutboundMessage) -> io::Result<()> {
        let key = {
            let guard = self.protocol.lock().unwrap();
            guard.as_ref().map(|p| p.key)
        };
        let key = match key {
            Some(k) => k,
            None => return Err(io::Error::new(ErrorKind::NotConnected, "not authenticated")),
        };
        let bytes = protocol::finalize(&mut msg, &key);
        self.write_bytes(&bytes)
    }

    pub fn send_error(&self, reason: &str) -> io::Result<()> {
        self.send(protocol::build_error_reply(reason))
    }

    fn write_bytes(&self, bytes: &[u8]) -> io::Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        let mut writer = self.writer.lock().unwrap();
        writer.set_write_timeout(Some(WRITE_DEADLINE))?;
        writer.write_all(bytes)
    }

    /// Idempotent: the registry entry is dropped first, then both socket
    /// halves are shut down. Safe to call from any thread, any number of
    /// times.
    pub fn close(&self) {
        if self.closed.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            self.registry.remove(self.id);
            if let Some(stream) = self.reader.lock().unwrap().as_ref() {
                let _ = stream.shutdown(Shutdown::Both);
            }
            let _ = self.writer.lock().unwrap().shutdown(Shutdown::Both);
        }
    }
}
