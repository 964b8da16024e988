//! nsq-rdy consumer.
//!
//! Entry point for the library's flow-control core: parses CLI arguments,
//! dials every configured nsqd, and runs the reader actor until interrupted.

use std::collections::HashMap;

use clap::Parser;
use tokio::signal;

use nsq_rdy::backoff::ExponentialBackoffTimer;
use nsq_rdy::config::{Cli, Config};
use nsq_rdy::connection_rdy::ConnHandle;
use nsq_rdy::{connection, ReaderHandle, Shutdown};

#[tokio::main]
pub async fn main() -> nsq_rdy::Result<()> {
    tracing_subscriber::fmt::try_init()?;

    let config = Config::from_cli(Cli::parse());
    run(config).await
}

async fn run(config: Config) -> nsq_rdy::Result<()> {
    let (notify_shutdown, _) = tokio::sync::broadcast::channel(1);

    let (reader, mut messages) = ReaderHandle::spawn(
        config.max_in_flight,
        Box::new(ExponentialBackoffTimer::new(config.max_backoff_duration)),
    );

    // Kept alongside the reader so the message loop below can call
    // `fin`/`req` once it is done with each delivered message. This is the
    // application-facing half of the message-handling callback surface
    // spec §1 places out of the CORE's scope; the crate only needs to
    // demonstrate driving it here, not own its policy.
    let mut connections = HashMap::new();

    for addr in &config.nsqd_addresses {
        let conn = connection::connect(
            addr,
            &config.topic,
            &config.channel,
            &config.client_id,
            config.max_rdy_count,
            reader.stimulus_sender(),
            Shutdown::new(notify_shutdown.subscribe()),
        )
        .await?;

        connections.insert(conn.id().to_string(), conn.clone());
        reader.add_connection(conn);
    }

    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("shutting down");
        }
        _ = async {
            while let Some((id, msg)) = messages.recv().await {
                tracing::debug!(conn = %id, message_id = ?msg.id, "received message");
                // A real application would run its handler here and decide
                // between fin/req/touch; this binary always finishes, which
                // is enough to exercise the flow-control core end to end.
                if let Some(conn) = connections.get(&id) {
                    conn.fin(msg.id);
                }
            }
        } => {}
    }

    let _ = notify_shutdown.send(());
    Ok(())
}
