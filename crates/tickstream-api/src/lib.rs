// tickstream-api: transport mechanics for the tickstream trading backend.
//
// REST client with bearer injection, the three streaming transports
// (WebSocket, SSE, polling), and wire-envelope decoding. Policy --
// which transport to use, when to reconnect, what to do with a decoded
// envelope -- lives in tickstream-core.

pub mod envelope;
pub mod error;
pub mod frames;
pub mod poll;
pub mod rest;
pub mod sse;
pub mod token;
pub mod transport;
pub mod ws;

pub use envelope::{Decoder, DecodeError, Envelope, EnvelopeKind};
pub use error::Error;
pub use frames::{Frame, FrameStream, Transport, TransportKind};
pub use rest::RestClient;
pub use token::{MemoryTokenStore, NoToken, StaticToken, TokenProvider};
pub use transport::TransportConfig;
