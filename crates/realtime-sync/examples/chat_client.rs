//! Chat Client Example
//!
//! Connects to a realtime server, joins one chat channel, prints what
//! arrives and sends a message.
//!
//! Run with:
//! `SYNC_SOCKET_URL=http://localhost:3000 SYNC_TOKEN=... cargo run -p realtime-sync --example chat_client`

use std::{sync::Arc, time::Duration};

use realtime_sync::{
    ConnectionStatus, EventCategory, StaticTokenStore, SyncConfig, SyncService,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = SyncConfig::from_env()?;
    let channel = std::env::var("SYNC_CHANNEL").unwrap_or_else(|_| "general".to_string());
    let tokens = match std::env::var("SYNC_TOKEN") {
        Ok(token) => StaticTokenStore::new(token),
        Err(_) => StaticTokenStore::empty(),
    };

    let service = SyncService::with_http_fallback(config, Arc::new(tokens))?;

    let mut status = service.status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = *status.borrow_and_update();
            if current.is_degraded() {
                println!("[status] {current:?} (offline mode)");
            } else {
                println!("[status] {current:?}");
            }
            if current == ConnectionStatus::Closed {
                break;
            }
        }
    });

    if !service.initialize("chat-client-example").await {
        println!("Initial connect failed; messages will go over HTTP until it recovers");
    }

    let _room = service.subscribe_to_channel(channel.as_str(), |event| {
        if let Some(message) = event.as_chat() {
            println!(
                "[{}] {}: {}",
                event.channel_id,
                message.sender_id.as_deref().unwrap_or("?"),
                message.content
            );
        }
    });
    let _alerts = service.subscribe_to_category(EventCategory::Notification, |event| {
        println!("[notification] {:?}", event.payload);
    });

    match service.send_message(channel.as_str(), "hello from realtime-sync").await {
        Ok(receipt) => println!(
            "sent {} via {:?}",
            receipt.correlation_id, receipt.delivery
        ),
        Err(e) => eprintln!("send failed: {e}"),
    }

    tokio::time::sleep(Duration::from_secs(30)).await;
    service.disconnect().await;
    Ok(())
}
