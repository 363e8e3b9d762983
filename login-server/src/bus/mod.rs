pub mod publisher;
pub mod subscriber;

pub use publisher::BusPublisher;
pub use subscriber::BusSubscriber;
