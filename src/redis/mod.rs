pub mod client;
pub mod store;

pub use client::create_client;
pub use store::RedisStore;
