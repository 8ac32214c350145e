pub mod config;
pub mod observer;
pub mod server;
pub mod statistics;
pub mod storage;

use std::{sync::Arc, time::Duration};

use crate::{
    config::Config,
    observer::Observer,
    server::Exchanger,
    statistics::Statistics,
    storage::MemoryAccountStore,
};

use service::{Outbound, Service, ServiceOptions};

#[cfg(feature = "secure")]
use crate::storage::MemoryKeyStore;

#[rustfmt::skip]
static SOFTWARE: &str = concat!(
    "chat-server.",
    env!("CARGO_PKG_VERSION")
);

/// How long queued frames may drain after the terminate broadcast before
/// the outbound queues are closed for good.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Wire the service together and run until interrupted.
///
/// Opened as a function, instead of living in main, so that integration
/// tests can assemble the same server in-process; they call
/// [`server::start`] directly to keep control of shutdown.
pub async fn startup(config: Arc<Config>) -> anyhow::Result<()> {
    log::info!("{} starting", SOFTWARE);

    let statistics = Statistics::default();
    let service = Service::new(ServiceOptions {
        accounts: Arc::new(MemoryAccountStore::seed(&config.auth.static_accounts)),
        #[cfg(feature = "secure")]
        keys: Arc::new(MemoryKeyStore::default()),
        handler: Observer::new(),
    });

    let exchanger = Exchanger::new(config.server.max_queue_size);
    let accepter = server::start(&config, &statistics, &service, &exchanger).await?;

    tokio::signal::ctrl_c().await?;

    accepter.abort();
    shutdown(&service, &exchanger).await;
    log::info!("chat server stopped: {}", statistics.summary());

    Ok(())
}

/// Orderly shutdown: stop of the accept loop is the caller's business;
/// this broadcasts the terminate status to every live peer, gives the
/// queues a bounded moment to drain, then closes them so the connection
/// tasks exit.
pub async fn shutdown(service: &Service<Observer>, exchanger: &Exchanger) {
    for Outbound { target, bytes } in service.terminate_all() {
        exchanger.send(&target, bytes);
    }

    tokio::time::sleep(SHUTDOWN_GRACE).await;
    exchanger.clear();

    // Bounded wait for the connection tasks to observe their closed
    // queues and run the reset cleanup.
    tokio::time::sleep(Duration::from_millis(100)).await;
}
