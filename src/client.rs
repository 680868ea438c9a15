use crate::config::AzmConfig;
use crate::connection::Connection;
use crate::error::{AzmError, Result};
use crate::protocol::{Format, ParamValue, Request};
use crate::store::{ListenerId, ParameterStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Client session for one AtlasIED Atmosphere AZM4/AZM8 device.
///
/// The client owns the transport pair, the keepalive task, and the
/// parameter store. Network operations fire a request and return once it
/// is written; the protocol carries no request IDs, so a `get` means
/// "trigger an async update". The answer arrives later as a `getResp`
/// matched to state purely by parameter name, readable via
/// [`get_value`](AzmClient::get_value) or a registered listener.
///
/// # Example
///
/// ```no_run
/// use atlasied_azm::{AzmClient, Format};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut client = AzmClient::new("192.168.1.50");
///     client.connect().await?;
///
///     client.subscribe("ZoneGain_0", Format::Pct).await?;
///     client.set("ZoneGain_0", 40, Format::Pct).await?;
///
///     tokio::time::sleep(std::time::Duration::from_secs(1)).await;
///     println!("ZoneGain_0 = {:?}", client.get_value("ZoneGain_0"));
///
///     client.disconnect().await;
///     Ok(())
/// }
/// ```
pub struct AzmClient {
    host: String,
    config: AzmConfig,
    store: ParameterStore,
    active: Arc<Mutex<Option<Connection>>>,
    connected: Arc<AtomicBool>,
    supervisor_stop: Option<broadcast::Sender<()>>,
    supervisor: Option<JoinHandle<()>>,
}

impl AzmClient {
    /// Create a client for the given host with default settings.
    pub fn new(host: impl Into<String>) -> Self {
        Self::with_config(host, AzmConfig::default())
    }

    /// Create a client with explicit settings.
    pub fn with_config(host: impl Into<String>, config: AzmConfig) -> Self {
        Self {
            host: host.into(),
            config,
            store: ParameterStore::new(),
            active: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            supervisor_stop: None,
            supervisor: None,
        }
    }

    /// Establish the TCP control stream and UDP meter socket, and start
    /// the background tasks.
    ///
    /// Any existing connection is torn down first. When reconnection is
    /// enabled (the default), a supervisor task watches for the device
    /// closing the link and re-establishes the session with exponential
    /// backoff, replaying recorded subscriptions.
    pub async fn connect(&mut self) -> Result<()> {
        self.disconnect().await;

        let conn = Connection::open(&self.host, &self.config, self.store.clone()).await?;
        *self.active.lock().await = Some(conn);
        self.connected.store(true, Ordering::SeqCst);

        if self.config.reconnect {
            // the receiver must exist before the spawn, or a stop sent
            // right after connect() returns is lost
            let (stop_tx, stop_rx) = broadcast::channel(1);
            self.supervisor_stop = Some(stop_tx);
            self.supervisor = Some(tokio::spawn(run_supervisor(
                self.host.clone(),
                self.config.clone(),
                self.store.clone(),
                self.active.clone(),
                self.connected.clone(),
                stop_rx,
            )));
        }

        Ok(())
    }

    /// Stop the supervisor and all connection tasks, then close both
    /// sockets. Idempotent; safe to call when connect never succeeded.
    pub async fn disconnect(&mut self) {
        self.connected.store(false, Ordering::SeqCst);

        if let Some(tx) = self.supervisor_stop.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.supervisor.take() {
            let _ = timeout(Duration::from_millis(500), handle).await;
        }

        let conn = self.active.lock().await.take();
        if let Some(conn) = conn {
            conn.shutdown().await;
        }
    }

    /// Whether the session currently holds a live connection. With
    /// reconnection disabled, a link the device dropped is only discovered
    /// by the next operation's write error.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Local port the UDP meter socket is bound to, if connected.
    pub async fn udp_port(&self) -> Option<u16> {
        self.active.lock().await.as_ref().map(|c| c.udp_port())
    }

    /// Request a parameter's current value. The device answers with a
    /// `getResp` push; this method does not wait for it.
    pub async fn get(&self, param: impl Into<String>, fmt: Format) -> Result<()> {
        self.send(Request::get(param, fmt)).await
    }

    /// Set a parameter to an absolute value.
    pub async fn set(
        &self,
        param: impl Into<String>,
        value: impl Into<ParamValue>,
        fmt: Format,
    ) -> Result<()> {
        self.send(Request::set(param, value, fmt)).await
    }

    /// Adjust a parameter relative to its current value.
    pub async fn bump(
        &self,
        param: impl Into<String>,
        amount: impl Into<ParamValue>,
        fmt: Format,
    ) -> Result<()> {
        self.send(Request::bump(param, amount, fmt)).await
    }

    /// Ask the device to push updates for a parameter. Recorded in the
    /// subscription registry on success, so a reconnect replays it.
    pub async fn subscribe(&self, param: impl Into<String>, fmt: Format) -> Result<()> {
        let param = param.into();
        self.send(Request::subscribe(param.as_str(), fmt)).await?;
        self.store.record_subscription(param, fmt);
        Ok(())
    }

    /// Subscribe to many parameters in one frame.
    pub async fn subscribe_many(&self, specs: &[(String, Format)]) -> Result<()> {
        self.send(Request::subscribe_many(specs)).await?;
        for (param, fmt) in specs {
            self.store.record_subscription(param.clone(), *fmt);
        }
        Ok(())
    }

    /// Cancel a subscription on the device and in the registry.
    pub async fn unsubscribe(&self, param: impl Into<String>, fmt: Format) -> Result<()> {
        let param = param.into();
        self.send(Request::unsubscribe(param.as_str(), fmt)).await?;
        self.store.remove_subscription(&param);
        Ok(())
    }

    /// Latest known value for a parameter, or `None` if the device has
    /// never reported one. Non-blocking read of cached state.
    pub fn get_value(&self, param: &str) -> Option<ParamValue> {
        self.store.get_value(param)
    }

    /// Register a change callback for one parameter. The callback takes no
    /// payload; re-read [`get_value`](AzmClient::get_value) for the value.
    pub fn subscribe_parameter(
        &self,
        param: impl Into<String>,
        listener: impl Fn() + Send + Sync + 'static,
    ) -> ListenerId {
        self.store.add_listener(param, listener)
    }

    /// Remove a registered callback. Unknown ids are a no-op.
    pub fn unsubscribe_parameter(&self, param: &str, id: ListenerId) {
        self.store.remove_listener(param, id)
    }

    /// Cheap cloneable handle to the parameter store, for listeners that
    /// need to re-read values from inside a `'static` closure.
    pub fn store(&self) -> ParameterStore {
        self.store.clone()
    }

    async fn send(&self, request: Request) -> Result<()> {
        let guard = self.active.lock().await;
        match guard.as_ref() {
            Some(conn) => conn.send(&request).await,
            None => Err(AzmError::NotConnected),
        }
    }
}

/// Watch the live connection and rebuild the session when the device drops
/// it. Exits on the stop signal or when the client disconnects.
async fn run_supervisor(
    host: String,
    config: AzmConfig,
    store: ParameterStore,
    active: Arc<Mutex<Option<Connection>>>,
    connected: Arc<AtomicBool>,
    mut stop_rx: broadcast::Receiver<()>,
) {
    loop {
        let mut link_rx = {
            let guard = active.lock().await;
            match guard.as_ref() {
                Some(conn) => conn.link_closed(),
                None => return,
            }
        };

        tokio::select! {
            _ = stop_rx.recv() => {
                connected.store(false, Ordering::SeqCst);
                finalize(&active).await;
                return;
            }
            // wait_for yields a lock guard; drop it inside the branch so
            // the select stays Send across the stop branch's await
            closed = async { link_rx.wait_for(|closed| *closed).await.map(|_| ()) } => {
                if closed.is_err() {
                    // connection was finalized elsewhere
                    return;
                }
            }
        }

        connected.store(false, Ordering::SeqCst);
        tracing::warn!("Lost connection to {}", host);
        finalize(&active).await;

        let mut backoff = Duration::ZERO;
        loop {
            if !backoff.is_zero() {
                tracing::info!("Reconnecting to {} in {:?}", host, backoff);
                tokio::select! {
                    _ = stop_rx.recv() => return,
                    _ = sleep(backoff) => {}
                }
            }

            let opened = tokio::select! {
                _ = stop_rx.recv() => return,
                opened = Connection::open(&host, &config, store.clone()) => opened,
            };

            match opened {
                Ok(conn) => {
                    replay_subscriptions(&conn, &store).await;
                    *active.lock().await = Some(conn);
                    connected.store(true, Ordering::SeqCst);
                    tracing::info!("Reconnected to {}", host);
                    break;
                }
                Err(e) => {
                    tracing::error!("Reconnect to {} failed: {}", host, e);
                    backoff = if backoff.is_zero() {
                        Duration::from_secs(1)
                    } else {
                        (backoff * 2).min(MAX_BACKOFF)
                    };
                }
            }
        }
    }
}

async fn finalize(active: &Arc<Mutex<Option<Connection>>>) {
    let conn = active.lock().await.take();
    if let Some(conn) = conn {
        conn.shutdown().await;
    }
}

/// Resend every recorded subscription as one bulk frame.
async fn replay_subscriptions(conn: &Connection, store: &ParameterStore) {
    let specs = store.subscriptions();
    if specs.is_empty() {
        return;
    }
    tracing::info!("Replaying {} subscription(s)", specs.len());
    if let Err(e) = conn.send(&Request::subscribe_many(&specs)).await {
        tracing::error!("Subscription replay failed: {}", e);
    }
}
