mod exchanger;

pub use exchanger::Exchanger;

use crate::{
    config::Config,
    observer::Observer,
    statistics::{Statistics, Stats},
};

use std::{sync::Arc, time::Duration};

use codec::Decoder;
use service::{Outbound, Service};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
    time::timeout,
};

/// chat tcp server
///
/// Binds the listener and spawns the accept loop: one task per live
/// connection reads, dispatches and writes; fan-out towards other peers
/// goes through the exchanger queues. Returns the accept task handle so
/// that shutdown can stop new connections.
pub async fn start(
    config: &Arc<Config>,
    statistics: &Statistics,
    service: &Service<Observer>,
    exchanger: &Exchanger,
) -> anyhow::Result<JoinHandle<()>> {
    let listener = TcpListener::bind(config.server.listen).await?;
    let local_addr = listener.local_addr()?;
    let listen_addr = config.server.listen;

    let config = config.clone();
    let statistics = statistics.clone();
    let service = service.clone();
    let exchanger = exchanger.clone();

    let handle = tokio::spawn(async move {
        while let Ok((socket, address)) = listener.accept().await {
            log::info!("tcp socket accept: addr={address:?}, interface={local_addr:?}");

            // Disable the Nagle algorithm: responses and fan-out frames are
            // small and should not wait for coalescing.
            if let Err(e) = socket.set_nodelay(true) {
                log::error!("tcp socket set nodelay failed!: addr={address}, err={e}");
            }

            let connection = tokio::spawn(handle_connection(
                socket,
                address,
                config.clone(),
                statistics.clone(),
                service.clone(),
                exchanger.clone(),
            ));

            // The task boundary converts everything, a panic included, into
            // connection teardown: deregister the queue, then run the
            // idempotent reset logout and announce the departure.
            let service = service.clone();
            let exchanger = exchanger.clone();
            tokio::spawn(async move {
                if connection.await.is_err() {
                    log::error!("connection task panicked: addr={address:?}");
                }

                exchanger.remove(&address);
                for Outbound { target, bytes } in service.logout_on_socket_reset(address) {
                    exchanger.send(&target, bytes);
                }

                log::info!("tcp socket disconnect: addr={address:?}, interface={local_addr:?}");
            });
        }

        log::error!("tcp server close: interface={local_addr:?}");
    });

    log::info!("chat server listening: listen={listen_addr}");

    Ok(handle)
}

/// Receive loop of one connection.
///
/// Reads feed the frame decoder; every decoded request is dispatched and
/// its reply written straight back, while frames for other peers are
/// queued through the exchanger. The same task drains this connection's
/// own queue, so all writes on the socket are serialized by construction.
async fn handle_connection(
    mut socket: TcpStream,
    address: std::net::SocketAddr,
    config: Arc<Config>,
    statistics: Statistics,
    service: Service<Observer>,
    exchanger: Exchanger,
) {
    let idle = Duration::from_secs(config.server.idle_timeout);
    let router = service.get_router(address);
    let mut receiver = exchanger.get_receiver(address);
    let mut decoder = Decoder::default();
    let mut chunk = vec![0u8; 4096];

    'connection: loop {
        tokio::select! {
            result = timeout(idle, socket.read(&mut chunk)) => {
                let size = match result {
                    Ok(Ok(size)) if size > 0 => size,
                    // A read deadline counts as EOF for cleanup purposes,
                    // like any receive error.
                    _ => break,
                };

                statistics.add(&Stats::ReceivedBytes(size));

                for item in decoder.decode(&chunk[..size]) {
                    let frame = match item {
                        Ok(frame) => frame,
                        Err(error) => {
                            // A bad frame is logged and skipped; the
                            // stream continues.
                            log::warn!("frame parse error: addr={address:?}, err={error}");
                            statistics.add(&Stats::ErrorPkts(1));
                            continue;
                        }
                    };

                    statistics.add(&Stats::ReceivedPkts(1));

                    for Outbound { target, bytes } in router.route(&frame) {
                        if target == address {
                            if socket.write_all(&bytes).await.is_err() {
                                break 'connection;
                            }

                            statistics.add(&Stats::SendBytes(bytes.len()));
                            statistics.add(&Stats::SendPkts(1));
                        } else {
                            exchanger.send(&target, bytes);
                        }
                    }
                }

                // A peer that streams bytes without ever completing a frame
                // is trying to grow the residual without bound.
                if decoder.pending() > config.server.max_message_size * 3 {
                    log::warn!(
                        "frame residual too large: size={}, max={}, addr={address:?}",
                        decoder.pending(),
                        config.server.max_message_size * 3,
                    );

                    break;
                }
            }
            bytes = receiver.recv() => {
                // `None` means the exchanger deregistered this connection:
                // slow consumer teardown or server shutdown.
                let Some(bytes) = bytes else {
                    break;
                };

                if socket.write_all(&bytes).await.is_err() {
                    break;
                }

                statistics.add(&Stats::SendBytes(bytes.len()));
                statistics.add(&Stats::SendPkts(1));
            }
        }
    }
}
