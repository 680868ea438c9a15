use crate::config::AzmConfig;
use crate::error::{AzmError, Result};
use crate::params::KEEPALIVE_PARAM;
use crate::protocol::{Format, Message, Request};
use crate::store::ParameterStore;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const TCP_READ_CHUNK: usize = 4096;
const UDP_DATAGRAM_MAX: usize = 2048;
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// The transport pair: one persistent TCP control stream plus one UDP
/// socket for high-rate meter broadcasts.
///
/// Opening a connection spawns three background tasks: the TCP line
/// reader, the UDP datagram reader, and the keepalive timer. All inbound
/// frames from either socket flow into the shared [`ParameterStore`].
pub struct Connection {
    writer: Arc<Mutex<OwnedWriteHalf>>,
    udp_port: u16,
    stop_tx: broadcast::Sender<()>,
    link_rx: watch::Receiver<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Connection {
    /// Open the TCP control stream, bind the local UDP meter socket, and
    /// start the background tasks. TCP establishment is bounded by the
    /// configured timeout; a UDP bind failure fails the whole connect.
    pub async fn open(host: &str, config: &AzmConfig, store: ParameterStore) -> Result<Self> {
        tracing::info!("Connecting to {}:{}", host, config.tcp_port);

        let stream = match timeout(
            config.connect_timeout,
            TcpStream::connect((host, config.tcp_port)),
        )
        .await
        {
            Ok(connected) => connected?,
            Err(_) => return Err(AzmError::Timeout),
        };
        let (reader, writer) = stream.into_split();

        let udp = UdpSocket::bind(("0.0.0.0", config.udp_port)).await?;
        let udp_port = udp.local_addr()?.port();
        tracing::info!("Listening for meter broadcasts on UDP port {}", udp_port);

        let writer = Arc::new(Mutex::new(writer));
        let (stop_tx, _) = broadcast::channel(1);
        let (link_tx, link_rx) = watch::channel(false);

        let tasks = vec![
            tokio::spawn(run_tcp_loop(
                reader,
                store.clone(),
                stop_tx.subscribe(),
                link_tx,
            )),
            tokio::spawn(run_udp_loop(udp, store, stop_tx.subscribe())),
            tokio::spawn(run_keepalive_loop(
                writer.clone(),
                config.keepalive_interval,
                stop_tx.subscribe(),
            )),
        ];

        Ok(Self {
            writer,
            udp_port,
            stop_tx,
            link_rx,
            tasks,
        })
    }

    /// Encode and write one request. The write mutex serializes concurrent
    /// callers so frames never interleave on the socket.
    pub async fn send(&self, request: &Request) -> Result<()> {
        write_request(&self.writer, request).await
    }

    /// Local port the UDP meter socket is bound to.
    pub fn udp_port(&self) -> u16 {
        self.udp_port
    }

    /// Watch that flips to `true` when the TCP reader exits on EOF or a
    /// read error. A clean shutdown does not flip it.
    pub fn link_closed(&self) -> watch::Receiver<bool> {
        self.link_rx.clone()
    }

    /// Signal all background tasks to stop, wait briefly for them to wind
    /// down, then close the TCP write side.
    pub async fn shutdown(self) {
        let _ = self.stop_tx.send(());
        let _ = timeout(SHUTDOWN_GRACE, join_all(self.tasks)).await;

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            tracing::debug!("TCP close: {}", e);
        }
        tracing::info!("Disconnected from device");
    }
}

async fn write_request(writer: &Arc<Mutex<OwnedWriteHalf>>, request: &Request) -> Result<()> {
    let mut writer = writer.lock().await;
    let line = request.encode()?;
    tracing::debug!("Sending: {}", line.trim_end());
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read chunks off the control stream, reassemble `\n`-delimited lines, and
/// dispatch each complete line. Partial lines stay buffered across reads.
async fn run_tcp_loop(
    mut reader: OwnedReadHalf,
    store: ParameterStore,
    mut stop_rx: broadcast::Receiver<()>,
    link_tx: watch::Sender<bool>,
) {
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; TCP_READ_CHUNK];

    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                tracing::debug!("TCP reader stopped");
                return;
            }
            read = reader.read(&mut chunk) => {
                match read {
                    Ok(0) => {
                        tracing::warn!("Device closed the control connection");
                        break;
                    }
                    Ok(n) => {
                        buffer.extend_from_slice(&chunk[..n]);
                        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                            let line: Vec<u8> = buffer.drain(..=pos).collect();
                            let line = line.trim_ascii();
                            if !line.is_empty() {
                                dispatch(line, &store, "tcp");
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!("TCP read error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    let _ = link_tx.send(true);
}

/// Each datagram is one complete message; no line buffering.
async fn run_udp_loop(
    socket: UdpSocket,
    store: ParameterStore,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let mut datagram = vec![0u8; UDP_DATAGRAM_MAX];

    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                tracing::debug!("UDP reader stopped");
                return;
            }
            received = socket.recv_from(&mut datagram) => {
                match received {
                    Ok((len, _)) => {
                        let raw = datagram[..len].trim_ascii();
                        if !raw.is_empty() {
                            dispatch(raw, &store, "udp");
                        }
                    }
                    Err(e) => {
                        tracing::error!("UDP receive error: {}", e);
                        return;
                    }
                }
            }
        }
    }
}

/// Periodic traffic so the device's idle timer never fires. Send failures
/// are logged and the loop keeps going; the TCP reader is the one that
/// notices a dead connection.
async fn run_keepalive_loop(
    writer: Arc<Mutex<OwnedWriteHalf>>,
    interval: Duration,
    mut stop_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                tracing::debug!("Keepalive stopped");
                return;
            }
            _ = sleep(interval) => {
                let request = Request::get(KEEPALIVE_PARAM, Format::Str);
                if let Err(e) = write_request(&writer, &request).await {
                    tracing::error!("Keepalive send failed: {}", e);
                }
            }
        }
    }
}

/// Decode one line or datagram and apply its parameter updates. Frames with
/// unrecognized methods and malformed payloads are logged and dropped; the
/// connection stays up.
fn dispatch(raw: &[u8], store: &ParameterStore, transport: &str) {
    match Message::decode(raw) {
        Ok(msg) => {
            if !msg.method.is_push() {
                tracing::debug!("Ignoring {:?} frame on {}", msg.method, transport);
                return;
            }
            for update in msg.updates() {
                store.apply(update);
            }
        }
        Err(e) => {
            tracing::warn!(
                "Invalid message on {}: {} ({})",
                transport,
                e,
                String::from_utf8_lossy(raw)
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ParamValue;

    #[test]
    fn test_dispatch_applies_update_frames() {
        let store = ParameterStore::new();
        dispatch(
            br#"{"jsonrpc":"2.0","method":"update","params":{"param":"ZoneGain_0","val":-12}}"#,
            &store,
            "tcp",
        );
        assert_eq!(store.get_value("ZoneGain_0"), Some(ParamValue::Int(-12)));
    }

    #[test]
    fn test_dispatch_ignores_non_push_methods() {
        let store = ParameterStore::new();
        dispatch(
            br#"{"jsonrpc":"2.0","method":"set","params":{"param":"ZoneGain_0","val":-12}}"#,
            &store,
            "tcp",
        );
        assert_eq!(store.get_value("ZoneGain_0"), None);
    }

    #[test]
    fn test_dispatch_survives_garbage() {
        let store = ParameterStore::new();
        dispatch(b"{ not json", &store, "udp");
        dispatch(
            br#"{"method":"update","params":{"param":"SourceMeter_1","val":-40.5}}"#,
            &store,
            "udp",
        );
        assert_eq!(
            store.get_value("SourceMeter_1"),
            Some(ParamValue::Float(-40.5))
        );
    }
}
