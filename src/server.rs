//! Modbus-TCP transport and lifecycle of the simulator.
//!
//! The [`Dispatcher`] is shared between the connection tasks and the ticker
//! behind one mutex; each frame and each tick take the lock exactly once, so a
//! tick never interleaves with a setpoint update.
//!
//! ## Example
//!
//! ```no_run
//! use battsim_lib::{dispatcher::Dispatcher, server::Server};
//! use std::{sync::{Arc, Mutex}, time::Duration};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> std::io::Result<()> {
//!     let dispatcher = Arc::new(Mutex::new(Dispatcher::default()));
//!     let addr = "0.0.0.0:1502".parse().unwrap();
//!     let server = Server::bind(addr, dispatcher, Duration::from_secs(1)).await?;
//!     server.run(CancellationToken::new()).await
//! }
//! ```

use crate::dispatcher::Dispatcher;
use crate::frame::{MBAP_HEADER_LEN, MBAP_LENGTH_RANGE};
use log::{debug, error, info, trace, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// The simulator state as shared between tasks.
pub type SharedDispatcher = Arc<Mutex<Dispatcher>>;

/// Default period of the battery model.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// How long the rest of a frame may take once its header has arrived.
pub const FRAME_BODY_TIMEOUT: Duration = Duration::from_millis(500);

fn lock(dispatcher: &SharedDispatcher) -> MutexGuard<'_, Dispatcher> {
    // A panic while holding the lock leaves plain data behind, keep serving it.
    dispatcher.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Starts the task advancing the battery once per `period`.
///
/// The first tick fires one period after the start. The task ends when
/// `token` is cancelled.
pub fn spawn_ticker(
    dispatcher: SharedDispatcher,
    period: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    lock(&dispatcher).tick();
                }
                () = token.cancelled() => {
                    debug!("Ticker received cancellation signal, shutting down");
                    break;
                }
            }
        }
    })
}

/// Reads one complete MBAP frame into `buf`.
///
/// Returns `Ok(false)` when the peer closed the connection between frames. A
/// close inside a frame is an `UnexpectedEof` error, a body that does not
/// arrive within [`FRAME_BODY_TIMEOUT`] a `TimedOut` error.
async fn read_frame<R>(stream: &mut R, buf: &mut Vec<u8>) -> io::Result<bool>
where
    R: AsyncRead + Unpin,
{
    buf.clear();
    buf.resize(MBAP_HEADER_LEN, 0);
    let mut filled = 0;
    while filled < MBAP_HEADER_LEN {
        match stream.read(&mut buf[filled..]).await? {
            0 if filled == 0 => return Ok(false),
            0 => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("connection closed after {filled} header bytes"),
                ))
            }
            n => filled += n,
        }
    }
    let length = u16::from_be_bytes([buf[4], buf[5]]);
    if !MBAP_LENGTH_RANGE.contains(&length) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("MBAP length {length} is outside of {MBAP_LENGTH_RANGE:?}"),
        ));
    }
    buf.resize(MBAP_HEADER_LEN - 1 + usize::from(length), 0);
    timeout(FRAME_BODY_TIMEOUT, stream.read_exact(&mut buf[MBAP_HEADER_LEN..]))
        .await
        .map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("frame body not complete after {FRAME_BODY_TIMEOUT:?}"),
            )
        })??;
    Ok(true)
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Serves one connection, one frame at a time, until the peer hangs up or
/// `token` is cancelled.
async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    dispatcher: SharedDispatcher,
    token: CancellationToken,
) -> io::Result<()> {
    let mut buf = Vec::with_capacity(crate::frame::MAX_ADU_LEN);
    loop {
        let more = tokio::select! {
            read = read_frame(&mut stream, &mut buf) => read?,
            () = token.cancelled() => break,
        };
        if !more {
            break;
        }

        let (reply, trace_frames) = {
            let mut dispatcher = lock(&dispatcher);
            (dispatcher.process(&buf), dispatcher.debug_trace())
        };
        let reply = match reply {
            Ok(reply) => reply,
            Err(err) => {
                warn!("{peer}: dropping connection on undecodable frame: {err}");
                break;
            }
        };
        if trace_frames {
            info!("{peer}: [{}] -> [{}]", hex(&buf), hex(&reply));
        } else {
            trace!("{peer}: [{}] -> [{}]", hex(&buf), hex(&reply));
        }
        stream.write_all(&reply).await?;
    }
    Ok(())
}

/// A bound Modbus-TCP listener in front of the simulator.
pub struct Server {
    listener: TcpListener,
    dispatcher: SharedDispatcher,
    tick_interval: Duration,
}

impl Server {
    pub async fn bind(
        addr: SocketAddr,
        dispatcher: SharedDispatcher,
        tick_interval: Duration,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            dispatcher,
            tick_interval,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections and ticks the battery until `shutdown` is cancelled,
    /// then stops and joins the ticker and all connection tasks.
    pub async fn run(self, shutdown: CancellationToken) -> io::Result<()> {
        let ticker_token = shutdown.child_token();
        let ticker = spawn_ticker(
            Arc::clone(&self.dispatcher),
            self.tick_interval,
            ticker_token.clone(),
        );
        let mut connections = JoinSet::new();

        let result = loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => break Err(err),
                    };
                    info!("Accepted connection from {peer}");
                    let dispatcher = Arc::clone(&self.dispatcher);
                    let token = shutdown.child_token();
                    connections.spawn(async move {
                        if let Err(err) = handle_connection(stream, peer, dispatcher, token).await {
                            warn!("{peer}: connection error: {err}");
                        }
                        info!("Connection from {peer} closed");
                    });
                }
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(err) = joined {
                        error!("Connection task failed: {err}");
                    }
                }
                () = shutdown.cancelled() => break Ok(()),
            }
        };

        ticker_token.cancel();
        connections.shutdown().await;
        if let Err(err) = ticker.await {
            error!("Ticker task failed: {err}");
        }
        info!("Simulator stopped: {}", lock(&self.dispatcher).battery().snapshot());
        result
    }
}
