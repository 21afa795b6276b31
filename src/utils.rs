use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;

use crate::errors::ConfigError;
use crate::protocol::{EnginePacket, Packet};

/// Header carrying the token when `TokenPlacement::Header` is used
pub(crate) const TOKEN_HEADER: &str = "token";

// builds the websocket upgrade request, a fresh one is needed for every attempt
pub(crate) fn build_request(url: &str, header_token: Option<&str>) -> Result<Request, ConfigError> {
    let mut request = url
        .into_client_request()
        .map_err(|err| ConfigError::InvalidServerUrl {
            url: url.to_string(),
            reason: err.to_string(),
        })?;

    if let Some(token) = header_token {
        let value =
            HeaderValue::from_str(token).map_err(|err| ConfigError::InvalidToken(err.to_string()))?;
        request.headers_mut().insert(TOKEN_HEADER, value);
    }

    Ok(request)
}

pub(crate) fn encode_engine(packet: &EnginePacket) -> Message {
    let text = packet.encode();
    log::trace!("--> {}", &text);
    Message::Text(text.into())
}

pub(crate) fn encode_packet(packet: &Packet) -> Message {
    encode_engine(&EnginePacket::Message(packet.encode()))
}
