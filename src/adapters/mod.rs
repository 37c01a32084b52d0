// Adapters layer: concrete implementations of the domain ports.

pub mod http;

pub use http::HttpRemoteClient;
