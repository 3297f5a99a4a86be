use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_postgres::{Config, NoTls};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::decoder::{decoder_for, PluginDecoder};
use super::types::ReplicationOperation;
use crate::{Error, Result};

/// Interval between standby status updates. A server heartbeat that
/// requests a reply expires the deadline early.
const STANDBY_TIMEOUT: Duration = Duration::from_secs(10);

/// Wait applied to each poll of the replication stream. An expired poll is
/// not an error; it gives the loop a chance to observe cancellation and
/// the standby deadline.
const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Seconds between the Unix epoch and the PostgreSQL epoch
/// (2000-01-01 00:00:00 UTC).
const PG_EPOCH_OFFSET_SECS: u64 = 946_684_800;

/// A long-lived logical replication connection that tails one slot and
/// pumps decoded operations into a channel.
///
/// The receiver owns the connection and the position counters. `run` may
/// not be called concurrently; `close` releases the connection after `run`
/// has returned.
pub struct LogicalReceiver {
    client: tokio_postgres::Client,
    connection_task: tokio::task::JoinHandle<()>,
    decoder: &'static dyn PluginDecoder,
    slot: String,
    plugin: String,
    options: String,
    received: u64,
    applied: Arc<AtomicU64>,
}

impl LogicalReceiver {
    /// Establishes the replication connection and binds it to `slot`.
    ///
    /// `plugin` must name a compiled-in decoder and `options` is forwarded
    /// verbatim to the server when replication starts. Fails with
    /// [`Error::UnknownPlugin`] or a transport error.
    pub async fn open(
        connection_string: &str,
        slot: &str,
        plugin: &str,
        options: &str,
    ) -> Result<Self> {
        let decoder =
            decoder_for(plugin).ok_or_else(|| Error::UnknownPlugin(plugin.to_string()))?;

        // Replication frames are only delivered on a connection opened
        // with replication=database.
        let replication_string = if connection_string.contains("replication=") {
            connection_string.to_string()
        } else if connection_string.starts_with("postgres://")
            || connection_string.starts_with("postgresql://")
        {
            if connection_string.contains('?') {
                format!("{connection_string}&replication=database")
            } else {
                format!("{connection_string}?replication=database")
            }
        } else {
            format!("{connection_string} replication=database")
        };
        let config = replication_string.parse::<Config>()?;

        let (client, connection) = config.connect(NoTls).await?;
        let connection_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!("Replication connection error: {}", e);
            }
        });

        info!(slot, plugin, "Opened replication connection");

        Ok(Self {
            client,
            connection_task,
            decoder,
            slot: slot.to_string(),
            plugin: plugin.to_string(),
            options: options.to_string(),
            received: 0,
            applied: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Returns a handle through which a downstream consumer reports the
    /// positions it has durably applied. Until the handle is advanced the
    /// server sees no applied progress and retains WAL accordingly.
    pub fn ack_handle(&self) -> AckHandle {
        AckHandle {
            applied: self.applied.clone(),
        }
    }

    /// Creates the slot this receiver is bound to, using its plugin. A
    /// slot that already exists is left alone.
    pub async fn create_slot(&self) -> Result<()> {
        let query = format!(
            "CREATE_REPLICATION_SLOT {} LOGICAL {}",
            self.slot, self.plugin
        );
        match self.client.simple_query(&query).await {
            Ok(_) => {
                info!(slot = %self.slot, "Created replication slot");
                Ok(())
            }
            Err(e) if e.to_string().contains("already exists") => {
                debug!(slot = %self.slot, "Replication slot already exists");
                Ok(())
            }
            Err(e) => Err(Error::Postgres(e)),
        }
    }

    /// Drops the slot this receiver is bound to. A missing slot is not an
    /// error.
    pub async fn drop_slot(&self) -> Result<()> {
        let query = format!("DROP_REPLICATION_SLOT {}", self.slot);
        match self.client.simple_query(&query).await {
            Ok(_) => {
                info!(slot = %self.slot, "Dropped replication slot");
                Ok(())
            }
            Err(e) if e.to_string().contains("does not exist") => Ok(()),
            Err(e) => Err(Error::Postgres(e)),
        }
    }

    /// Streams from the slot, delivering decoded operations to `out` in
    /// commit order until `cancel` fires or an unrecoverable error occurs.
    ///
    /// Streaming starts at the last received position, initially zero,
    /// which tells the server to resume from the slot's persisted
    /// position. A decode failure aborts the loop with that error; the
    /// broken message is not skipped and nothing is emitted for it.
    /// Cancellation surfaces as [`Error::Cancelled`], checked once per
    /// poll interval.
    pub async fn run(
        &mut self,
        cancel: CancellationToken,
        out: mpsc::Sender<ReplicationOperation>,
    ) -> Result<()> {
        let start = format_lsn(self.received);
        let query = if self.options.is_empty() {
            format!("START_REPLICATION SLOT {} LOGICAL {}", self.slot, start)
        } else {
            format!(
                "START_REPLICATION SLOT {} LOGICAL {} ({})",
                self.slot, start, self.options
            )
        };

        info!(slot = %self.slot, %start, "Starting replication");
        let duplex = self.client.copy_both_simple::<Bytes>(&query).await?;
        tokio::pin!(duplex);

        let mut standby_deadline = Instant::now() + STANDBY_TIMEOUT;

        loop {
            let frame = timeout(POLL_TIMEOUT, duplex.next()).await;

            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            match frame {
                // Poll timeout: no frame arrived within the wait.
                Err(_) => {}
                Ok(None) => {
                    return Err(Error::Replication {
                        message: "replication stream closed by server".to_string(),
                    });
                }
                Ok(Some(Err(e))) => return Err(Error::Postgres(e)),
                Ok(Some(Ok(buf))) => match Frame::parse(buf)? {
                    Frame::Keepalive { reply_requested } => {
                        if reply_requested {
                            standby_deadline = Instant::now();
                        }
                    }
                    Frame::XLogData { wal_start, data } => {
                        self.received = wal_start;
                        let mut op = ReplicationOperation {
                            position: format_lsn(wal_start),
                            ..Default::default()
                        };
                        self.decoder.decode(&data, &mut op)?;
                        if out.send(op).await.is_err() {
                            return Err(Error::Replication {
                                message: "operation channel closed".to_string(),
                            });
                        }
                    }
                },
            }

            if standby_deadline <= Instant::now() {
                let applied = self.applied.load(Ordering::Acquire);
                duplex.send(standby_status(self.received, applied)).await?;
                debug!(
                    received = %format_lsn(self.received),
                    applied = %format_lsn(applied),
                    "Sent standby status"
                );
                standby_deadline = Instant::now() + STANDBY_TIMEOUT;
            }
        }
    }

    /// Releases the connection.
    pub async fn close(self) -> Result<()> {
        info!("Closing replication connection");
        self.connection_task.abort();
        Ok(())
    }
}

/// Reports downstream progress back to a [`LogicalReceiver`]. Cloneable
/// and safe to use from the consumer task.
#[derive(Clone)]
pub struct AckHandle {
    applied: Arc<AtomicU64>,
}

impl AckHandle {
    /// Marks everything up to `lsn` as applied. The next standby status
    /// update reports it to the server. Positions only move forward.
    pub fn advance(&self, lsn: u64) {
        self.applied.fetch_max(lsn, Ordering::AcqRel);
    }
}

/// One CopyBoth frame from the server, reduced to what the receive loop
/// consumes.
enum Frame {
    /// `w`: a WAL data frame carrying one logical decoding message.
    XLogData { wal_start: u64, data: Bytes },
    /// `k`: a server heartbeat, possibly requesting an immediate status
    /// reply.
    Keepalive { reply_requested: bool },
}

impl Frame {
    fn parse(mut buf: Bytes) -> Result<Frame> {
        if buf.is_empty() {
            return Err(Error::InvalidMessage {
                message: "empty replication frame".to_string(),
            });
        }
        match buf.get_u8() {
            b'w' => {
                if buf.remaining() < 24 {
                    return Err(Error::InvalidMessage {
                        message: "truncated XLogData header".to_string(),
                    });
                }
                let wal_start = buf.get_u64();
                let _wal_end = buf.get_u64();
                let _timestamp = buf.get_i64();
                Ok(Frame::XLogData {
                    wal_start,
                    data: buf,
                })
            }
            b'k' => {
                if buf.remaining() < 17 {
                    return Err(Error::InvalidMessage {
                        message: "truncated keepalive frame".to_string(),
                    });
                }
                let _wal_end = buf.get_u64();
                let _timestamp = buf.get_i64();
                let reply_requested = buf.get_u8() != 0;
                Ok(Frame::Keepalive { reply_requested })
            }
            tag => Err(Error::InvalidMessage {
                message: format!("unknown replication frame tag: {}", tag as char),
            }),
        }
    }
}

/// Builds the standby status update frame. The receive position is
/// reported as written; the acknowledged position as flushed and applied.
fn standby_status(received: u64, applied: u64) -> Bytes {
    let mut buf = BytesMut::with_capacity(34);
    buf.put_u8(b'r');
    buf.put_u64(received);
    buf.put_u64(applied);
    buf.put_u64(applied);
    buf.put_i64(pg_epoch_micros());
    buf.put_u8(0);
    buf.freeze()
}

/// Microseconds since the PostgreSQL epoch, as carried by standby status
/// updates.
fn pg_epoch_micros() -> i64 {
    let pg_epoch = UNIX_EPOCH + Duration::from_secs(PG_EPOCH_OFFSET_SECS);
    SystemTime::now()
        .duration_since(pg_epoch)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

/// Formats a WAL position as its two 32-bit hex halves.
pub fn format_lsn(lsn: u64) -> String {
    format!("{:X}/{:X}", lsn >> 32, lsn & 0xFFFF_FFFF)
}

/// Parses the `X/Y` form produced by the server back into a position.
pub fn parse_lsn(lsn: &str) -> Result<u64> {
    let invalid = || Error::Replication {
        message: format!("invalid LSN: {lsn}"),
    };
    let (high, low) = lsn.split_once('/').ok_or_else(invalid)?;
    let high = u64::from_str_radix(high, 16).map_err(|_| invalid())?;
    let low = u64::from_str_radix(low, 16).map_err(|_| invalid())?;
    Ok((high << 32) | low)
}
