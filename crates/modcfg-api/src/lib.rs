// modcfg-api: transport adapter for module configuration resources (REST + cable channel)

pub mod cable;
pub mod error;
pub mod rest;
pub mod transport;

pub use cable::{ChannelEvent, ChannelHandle, ChannelIdentifier};
pub use error::Error;
pub use rest::{ApiClient, ApiRequest, HttpMethod};
pub use transport::{TlsMode, TransportConfig};
