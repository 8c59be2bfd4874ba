//! Signaling and chat relay entry point.
//!
//! Binds the endpoint dispatcher, wires up the optional Redis
//! notification sink, and runs until Ctrl-C / SIGTERM.

mod config;
mod connection;
mod notify;
mod registry;
mod room;
mod server;
mod session;
mod signaling;
mod ws;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use config::Config;
use notify::{NoopNotificationSink, NotificationSink, RedisNotificationSink};
use registry::{Registry, REAP_GRACE_PERIOD, REAP_SWEEP_INTERVAL};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let config = Config::load()?;
    log::info!(
        "starting streamsignal (port={}, redis_host={}, aws_region={}, s3_bucket={})",
        config.port,
        config.redis_host,
        config.aws_region,
        config.s3_bucket
    );

    let notifier: Arc<dyn NotificationSink> = match RedisNotificationSink::new(&config.redis_host) {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            log::warn!("notification sink disabled: {e}");
            Arc::new(NoopNotificationSink)
        }
    };

    let registry = Registry::new();
    tokio::spawn(registry.clone().run_reaper(REAP_SWEEP_INTERVAL, REAP_GRACE_PERIOD));

    let shutdown = Arc::new(AtomicBool::new(false));
    ctrlc::set_handler({
        let shutdown = shutdown.clone();
        move || {
            shutdown.store(true, Ordering::Relaxed);
        }
    })
    .expect("failed to install signal handler");

    tokio::select! {
        result = server::serve(config.port, registry, notifier) => {
            result?;
        }
        () = wait_for_shutdown(shutdown) => {
            log::info!("shutdown signal received, exiting");
        }
    }

    Ok(())
}

async fn wait_for_shutdown(flag: Arc<AtomicBool>) {
    loop {
        if flag.load(Ordering::Relaxed) {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
}
