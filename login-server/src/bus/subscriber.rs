use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use slog::{info, warn};

use crate::dispatch::{Dispatcher, Task};
use crate::events::{EventArgs, ScriptHost, ScriptValue};

const READINESS_WAIT: Duration = Duration::from_secs(1);

/// Blocking reader on its own thread. Polls the bus connection with a
/// 1-second read timeout so it can periodically check whether it's been
/// asked to stop; each readable frame becomes a dispatcher task that emits
/// `onRedisMessage`.
pub struct BusSubscriber {
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BusSubscriber {
    pub fn start(
        host: &str,
        port: u16,
        channel: &str,
        dispatcher: Arc<Dispatcher>,
        script_host: Arc<Mutex<ScriptHost>>,
        logger: slog::Logger,
    ) -> redis::RedisResult<Self> {
        let client = redis::Client::open(format!("redis://{}:{}/", host, port))?;
        let conn = client.get_connection()?;
        conn.set_read_timeout(Some(READINESS_WAIT))?;

        let running = Arc::new(AtomicBool::new(true));
        let worker_running = running.clone();
        let channel = channel.to_string();

        let handle = thread::spawn(move || {
            let mut conn = conn;
            let mut pubsub = conn.as_pubsub();
            if let Err(e) = pubsub.subscribe(&channel) {
                warn!(logger, "bus subscribe failed"; "channel" => &channel, "error" => %e);
                return;
            }

            while worker_running.load(Ordering::SeqCst) {
                match pubsub.get_message() {
                    Ok(msg) => {
                        let channel_name = msg.get_channel_name().to_string();
                        let payload: Vec<u8> = match msg.get_payload() {
                            Ok(p) => p,
                            Err(e) => {
                                warn!(logger, "malformed bus frame"; "error" => %e);
                                continue;
                            }
                        };

                        let host = script_host.clone();
                        dispatcher.add_task(Task::new(move || {
                            let args: EventArgs = vec![
                                ("channel", ScriptValue::Str(channel_name)),
                                ("message", ScriptValue::Bytes(payload)),
                            ];
                            host.lock().unwrap().emit_no_ret("onRedisMessage", &args);
                        }));
                    }
                    Err(e) => {
                        if e.is_timeout() {
                            continue;
                        }
                        warn!(logger, "bus subscriber read failed, stopping"; "error" => %e);
                        worker_running.store(false, Ordering::SeqCst);
                    }
                }
            }
            info!(logger, "bus subscriber stopped");
        });

        Ok(BusSubscriber { running, handle: Mutex::new(Some(handle)) })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn join(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}
