use std::sync::Mutex;

use slog::warn;

/// `publish(channel, payload)` over a single connection. Thread-safety
/// across concurrent publishers is not required by the wire contract;
/// higher layers serialize publishers through the task dispatcher, but the
/// connection is still mutex-guarded defensively since `redis::Connection`
/// is `!Sync`.
pub struct BusPublisher {
    conn: Mutex<redis::Connection>,
    logger: slog::Logger,
}

impl BusPublisher {
    pub fn connect(host: &str, port: u16, logger: slog::Logger) -> redis::RedisResult<Self> {
        let client = redis::Client::open(format!("redis://{}:{}/", host, port))?;
        let conn = client.get_connection()?;
        Ok(BusPublisher { conn: Mutex::new(conn), logger })
    }

    /// Returns `false` (and logs) on any publish failure, per the bus
    /// error-handling policy: publish errors never propagate.
    pub fn publish(&self, channel: &str, payload: &[u8]) -> bool {
        let mut conn = self.conn.lock().unwrap();
        match redis::cmd("PUBLISH").arg(channel).arg(payload).query::<i64>(&mut *conn) {
            Ok(_) => true,
            Err(e) => {
                warn!(self.logger, "bus publish failed"; "channel" => channel, "error" => %e);
                false
            }
        }
    }
}
