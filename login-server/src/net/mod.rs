pub mod acceptor;
pub mod connection;
pub mod protocol;
pub mod registry;

pub use acceptor::Acceptor;
pub use connection::Connection;
pub use protocol::Protocol;
pub use registry::ConnectionRegistry;
