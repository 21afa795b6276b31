use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_pully::client::SocketClient;
use tokio_pully::config::Config;
use tokio_pully::session::{OutboundMessage, Session};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    #[derive(Debug, serde::Serialize, serde::Deserialize)]
    struct Message {
        hello: i32,
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            Targets::new()
                .with_default(LevelFilter::INFO)
                .with_target("tokio_pully", LevelFilter::TRACE),
        )
        .init();

    let config = Config::new()
        .with_server_url("http://localhost:3000")
        .with_app_id("demo")
        .with_token("demo-token")
        .with_auto_connect(false);

    let client = SocketClient::new(&config)?;
    client.on_connecting(|| {
        log::info!("connecting");
    });
    client.on_connected(|| {
        log::info!("connected");
    });
    client.on_disconnected(|| {
        log::info!("disconnected");
    });
    client.on_error(|err| {
        log::info!("error: {:?}", err);
    });

    let session = Session::with_transport(&config, Arc::new(client))?;
    if let Err(err) = session.connect().await {
        log::info!("first attempt failed: {}", err);
    }

    let room = session.subscribe("news")?;
    room.listen(|data| match serde_json::from_value::<Message>(data.clone()) {
        Ok(message) => log::info!("message: {:?}", message),
        Err(_) => log::info!("message: {}", data),
    })?;

    for i in 0.. {
        let sent = room.send_message(
            OutboundMessage::new(json!(Message { hello: i })).with_timeout(Duration::from_secs(1)),
        )?;
        match sent.await {
            Ok(ack) => log::info!("ack: {:?}", ack),
            Err(err) => log::info!("send failed: {}", err),
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    Ok(())
}
