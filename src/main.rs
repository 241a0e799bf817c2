use std::future::Future;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;

use ara_realtime_client::config::Settings;
use ara_realtime_client::telemetry::init_tracing;
use ara_realtime_client::{CloseReason, ConnectionEvent, RealtimeDataManager};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new().context("failed to load configuration")?;
    init_tracing(&settings.logging)?;
    settings.realtime.validate()?;
    tracing::info!(url = %settings.realtime.url, "Configuration loaded");

    let realtime = RealtimeDataManager::new(settings.realtime.clone())?;
    let mut events = realtime.connection().events();

    let channels: Vec<&str> = settings.realtime.channels.iter().map(String::as_str).collect();
    realtime.register_store("cli", &channels);

    let _subscriptions: Vec<_> = settings
        .realtime
        .channels
        .iter()
        .map(|channel| {
            realtime.subscribe(channel.clone(), |payload, message| {
                tracing::info!(
                    channel = message.channel.as_deref().unwrap_or_default(),
                    message_type = %message.message_type,
                    payload = %payload,
                    "Update received"
                );
            })
        })
        .collect();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let exit = if initial_connect(&realtime, &mut shutdown).await {
        tokio::select! {
            reason = watch_events(&mut events) => reason,
            _ = &mut shutdown => "signal",
        }
    } else {
        "signal"
    };

    tracing::info!(reason = exit, "Shutting down");
    realtime.disconnect();
    Ok(())
}

/// Wait for the first connect unless shutdown comes first; `false` if it did.
///
/// A failed first attempt keeps retrying in the background.
async fn initial_connect(realtime: &RealtimeDataManager, shutdown: impl Future<Output = ()>) -> bool {
    tokio::select! {
        result = realtime.connect() => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Initial connection failed; retrying in background");
            }
            true
        }
        _ = shutdown => false,
    }
}

/// Log lifecycle events until reconnecting has been given up
async fn watch_events(events: &mut tokio::sync::broadcast::Receiver<ConnectionEvent>) -> &'static str {
    loop {
        match events.recv().await {
            Ok(ConnectionEvent::Open) => tracing::info!("Connected"),
            Ok(ConnectionEvent::Reconnect { attempt, delay }) => {
                tracing::info!(attempt = attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
            }
            Ok(ConnectionEvent::Error(e)) => tracing::warn!(error = %e, "Connection error"),
            Ok(ConnectionEvent::Close(CloseReason::Exhausted { attempts })) => {
                tracing::error!(attempts = attempts, "Reconnect attempts exhausted");
                return "exhausted";
            }
            Ok(ConnectionEvent::Close(reason)) => tracing::info!(reason = ?reason, "Connection closed"),
            Ok(ConnectionEvent::Message(_)) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped = skipped, "Event receiver lagged");
            }
            Err(RecvError::Closed) => return "closed",
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received terminate signal"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use ara_realtime_client::config::RealtimeConfig;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_shutdown_interrupts_hanging_first_connect() {
        // Accepts TCP but never answers the WebSocket handshake
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut config = RealtimeConfig::new(format!("ws://{}/ws", addr));
        config.connect_timeout_ms = 60_000;
        let realtime = RealtimeDataManager::new(config).unwrap();

        let shutdown = tokio::time::sleep(Duration::from_millis(50));
        let connected = tokio::time::timeout(
            Duration::from_secs(5),
            initial_connect(&realtime, shutdown),
        )
        .await
        .expect("shutdown did not interrupt the handshake");

        assert!(!connected);
        realtime.disconnect();
        drop(listener);
    }
}
