use std::time::Duration;

/// TCP control port the device listens on
pub const CONTROL_PORT: u16 = 5321;

/// Vendor convention for the UDP port meter broadcasts originate from
pub const METER_PORT: u16 = 3131;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(240);

/// Session tunables. `Default` matches the shipping devices; the builders
/// exist mainly for tests, which want short timers and loopback ports.
#[derive(Debug, Clone)]
pub struct AzmConfig {
    /// Remote TCP control port
    pub tcp_port: u16,
    /// Local UDP port to bind for meter pushes; 0 lets the OS pick
    pub udp_port: u16,
    /// Bound on TCP connection establishment
    pub connect_timeout: Duration,
    /// Idle interval between liveness probes; the device drops connections
    /// silent for longer than roughly five minutes
    pub keepalive_interval: Duration,
    /// Re-establish the session and replay subscriptions after the device
    /// closes the connection
    pub reconnect: bool,
}

impl Default for AzmConfig {
    fn default() -> Self {
        Self {
            tcp_port: CONTROL_PORT,
            udp_port: 0,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            reconnect: true,
        }
    }
}

impl AzmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the remote TCP control port.
    pub fn with_tcp_port(mut self, port: u16) -> Self {
        self.tcp_port = port;
        self
    }

    /// Bind the local UDP meter socket to a fixed port.
    pub fn with_udp_port(mut self, port: u16) -> Self {
        self.udp_port = port;
        self
    }

    /// Override the connection establishment timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the keepalive probe interval.
    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }

    /// Enable or disable automatic reconnection.
    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }
}
