pub mod channel;
pub mod client;
mod client_handler;
pub mod config;
pub mod errors;
pub mod protocol;
pub mod session;
pub mod transport;
mod utils;

pub use channel::{ChannelHandle, HandleState};
pub use config::Config;
pub use session::{OutboundMessage, Session};
pub use transport::Transport;
