use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::OsRng;
use rsa::RsaPrivateKey;

use login_server::account::{hash_password, Account, InMemoryAccountStore};
use login_server::config::ServerConfig;
use login_server::crypto::RsaCipher;
use login_server::dispatch::Dispatcher;
use login_server::events::script::{CallbackHandle, EventArgs, SandboxEnv, ScriptEngine, ScriptValue};
use login_server::events::{ModuleManifest, ScriptHost};
use login_server::net::{Acceptor, ConnectionRegistry};
use login_server::services::Services;
use login_server::wire::{adler32, OutboundMessage, Opcode};

/// Records every invocation handed to it instead of running real script
/// code, so tests can assert on what the event fabric dispatched.
struct RecordingEngine {
    next_handle: CallbackHandle,
    next_sandbox: i64,
    calls: Arc<Mutex<Vec<(CallbackHandle, Vec<(&'static str, String)>)>>>,
}

impl RecordingEngine {
    fn new(calls: Arc<Mutex<Vec<(CallbackHandle, Vec<(&'static str, String)>)>>>) -> Self {
        RecordingEngine { next_handle: 1, next_sandbox: 1, calls }
    }
}

fn describe(value: &ScriptValue) -> String {
    match value {
        ScriptValue::Int(i) => format!("int:{}", i),
        ScriptValue::Str(s) => format!("str:{}", s),
        ScriptValue::Bytes(b) => format!("bytes:{}", String::from_utf8_lossy(b)),
        ScriptValue::Bool(b) => format!("bool:{}", b),
        ScriptValue::ConnectionId(id) => format!("conn:{}", id),
    }
}

impl ScriptEngine for RecordingEngine {
    fn new_sandbox(&mut self) -> SandboxEnv {
        let env = SandboxEnv(self.next_sandbox);
        self.next_sandbox += 1;
        env
    }

    fn load_file(&mut self, _env: SandboxEnv, _path: &str) -> Result<(), String> {
        Ok(())
    }

    fn call_init(&mut self, _env: SandboxEnv) {}
    fn call_terminate(&mut self, _env: SandboxEnv) {}

    fn invoke_no_ret(&mut self, _env: SandboxEnv, handle: CallbackHandle, args: &EventArgs) {
        let recorded = args.iter().map(|(name, v)| (*name, describe(v))).collect();
        self.calls.lock().unwrap().push((handle, recorded));
    }

    fn invoke_collect(
        &mut self,
        _env: SandboxEnv,
        _handle: CallbackHandle,
        _args: &EventArgs,
        _n_results: usize,
    ) -> Vec<ScriptValue> {
        Vec::new()
    }

    fn invoke_table_ref(&mut self, _env: SandboxEnv, _handle: CallbackHandle, _table_ref: i64) -> Option<i64> {
        None
    }

    fn release(&mut self, _handle: CallbackHandle) {}
}

fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        mysql_host: String::new(),
        mysql_user: String::new(),
        mysql_pass: String::new(),
        mysql_database: String::new(),
        mysql_port: 0,
        mysql_sock: String::new(),
        encryption_salt: "salt".into(),
        version_min: 0x0100,
        version_str: "1.0".into(),
        motd_number: 1,
        motd_message: "hi".into(),
        redis_host: "127.0.0.1".into(),
        redis_port: 6379,
        redis_channel: "login".into(),
        key_path: "key.pem".into(),
        modules_path: "modules".into(),
        log_level: "critical".into(),
    }
}

fn start_server(
    calls: Arc<Mutex<Vec<(CallbackHandle, Vec<(&'static str, String)>)>>>,
) -> (Arc<Acceptor>, std::net::SocketAddr, rsa::RsaPublicKey) {
    let private = RsaPrivateKey::new(&mut OsRng, 1024).expect("keygen");
    let public = rsa::RsaPublicKey::from(&private);
    let rsa_cipher = RsaCipher::from_key(private);
    let config = test_config();

    let mut store = InMemoryAccountStore::new();
    store.add_account(
        Account {
            id: 1,
            email: "a@b".into(),
            password: hash_password(&config.encryption_salt, "pw"),
            premium_ends_at: 0,
            characters: Vec::new(),
        },
        Vec::new(),
    );

    let logger = flux::logging::init("critical");
    let dispatcher = Dispatcher::start(logger.clone());

    let mut engine = RecordingEngine::new(calls);
    let handle = {
        let h = engine.next_handle;
        engine.next_handle += 1;
        h
    };

    let mut host = ScriptHost::new(Box::new(engine));
    {
        let host_ref = &mut host;
        let registry = &mut host_ref.registry;
        let engine = host_ref.engine.as_mut();
        registry.load_module("test", &ModuleManifest::default(), engine).unwrap();
        registry.connect("test", "42", handle, None).unwrap();
    }

    let script_host = Arc::new(Mutex::new(host));
    let registry = ConnectionRegistry::new();

    let services = Arc::new(Services {
        config: config.clone(),
        rsa: rsa_cipher,
        account_store: Box::new(store),
        script_host,
        dispatcher,
        bus_publisher: None,
        logger,
    });

    let acceptor = Arc::new(Acceptor::bind(&config.host, config.port, registry, services).expect("bind"));
    let addr = acceptor.local_addr().expect("local addr");
    let runner = acceptor.clone();
    std::thread::spawn(move || runner.run());

    (acceptor, addr, public)
}

fn build_handshake_frame(public: &rsa::RsaPublicKey, key: [u32; 4], version: u16, email: &str, password: &str) -> Vec<u8> {
    let mut rsa_plain = OutboundMessage::new();
    for word in key.iter() {
        rsa_plain.add_u32(*word);
    }
    rsa_plain.add_u16(0);
    rsa_plain.add_string(email);
    rsa_plain.add_string(password);

    let mut block = vec![0u8; 128];
    let payload = rsa_plain.output_buffer();
    block[1..1 + payload.len()].copy_from_slice(payload);

    let c = rsa::BigUint::from_bytes_be(&block);
    let e = rsa::traits::PublicKeyParts::e(public);
    let n = rsa::traits::PublicKeyParts::n(public);
    let ciphertext = c.modpow(e, n).to_bytes_be();
    let mut rsa_block = vec![0u8; 128];
    let offset = 128 - ciphertext.len();
    rsa_block[offset..].copy_from_slice(&ciphertext);

    let mut body_after_checksum = Vec::new();
    body_after_checksum.push(0);
    body_after_checksum.extend_from_slice(&0xCAFEu16.to_le_bytes());
    body_after_checksum.extend_from_slice(&version.to_le_bytes());
    body_after_checksum.extend_from_slice(&[0u8; 16]);
    body_after_checksum.push(0); // sentinel byte before the ciphertext
    body_after_checksum.extend_from_slice(&rsa_block);

    let checksum = adler32(&body_after_checksum);
    let mut frame = Vec::new();
    frame.extend_from_slice(&((body_after_checksum.len() + 4) as u16).to_le_bytes());
    frame.extend_from_slice(&checksum.to_le_bytes());
    frame.extend_from_slice(&body_after_checksum);
    frame
}

fn send_authenticated(stream: &mut TcpStream, key: &[u32; 4], opcode: u8, payload: &[u8]) {
    let mut out = OutboundMessage::new();
    out.add_u8(opcode);
    out.add_bytes(payload);
    let bytes = login_server::net::protocol::finalize(&mut out, key);
    stream.write_all(&bytes).expect("write authenticated packet");
}

fn drain_handshake_reply(stream: &mut TcpStream) {
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).expect("read handshake reply header");
    let size = u16::from_le_bytes(header) as usize;
    let mut body = vec![0u8; size];
    stream.read_exact(&mut body).expect("read handshake reply body");
}

#[test]
fn ping_updates_last_ping_without_a_reply_or_event() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let (acceptor, addr, public) = start_server(calls.clone());

    let mut stream = TcpStream::connect(addr).expect("connect");
    let key = [100, 200, 300, 400];
    let frame = build_handshake_frame(&public, key, 0x0200, "a@b", "pw");
    stream.write_all(&frame).expect("write handshake");
    drain_handshake_reply(&mut stream);

    send_authenticated(&mut stream, &key, Opcode::Ping.as_u8(), &[]);

    // No reply should arrive: a short read must time out.
    stream.set_read_timeout(Some(Duration::from_millis(300))).unwrap();
    let mut buf = [0u8; 1];
    let result = stream.read(&mut buf);
    match result {
        Ok(0) => {}
        Ok(_) => panic!("unexpected data after ping"),
        Err(e) => assert!(e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut),
    }

    assert!(calls.lock().unwrap().is_empty());
    acceptor.stop();
}

#[test]
fn unrecognized_opcode_is_routed_to_the_event_fabric() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let (acceptor, addr, public) = start_server(calls.clone());

    let mut stream = TcpStream::connect(addr).expect("connect");
    let key = [7, 7, 7, 7];
    let frame = build_handshake_frame(&public, key, 0x0200, "a@b", "pw");
    stream.write_all(&frame).expect("write handshake");
    drain_handshake_reply(&mut stream);

    send_authenticated(&mut stream, &key, 42, b"hi");

    // Give the dispatcher a moment to run the task off the connection thread.
    let mut attempts = 0;
    loop {
        if !calls.lock().unwrap().is_empty() || attempts > 50 {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
        attempts += 1;
    }

    let recorded = calls.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    let (_, args) = &recorded[0];
    assert!(args.iter().any(|(name, value)| *name == "client" && value.starts_with("conn:")));
    assert!(args.iter().any(|(name, value)| *name == "msg" && value == "bytes:hi"));

    acceptor.stop();
}
