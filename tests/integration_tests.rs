//! Integration tests for the device session.
//!
//! These tests run a fake Atmosphere device on loopback (a real TCP
//! listener plus a UDP sender) and drive the client end to end through
//! actual sockets.

use atlasied_azm::{zone_gain, zone_name, AzmClient, AzmConfig, Format, ParamValue};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

/// In-process stand-in for an AZM device.
struct FakeDevice {
    listener: TcpListener,
}

impl FakeDevice {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake device");
        Self { listener }
    }

    fn port(&self) -> u16 {
        self.listener.local_addr().expect("local addr").port()
    }

    fn config(&self) -> AzmConfig {
        AzmConfig::new()
            .with_tcp_port(self.port())
            .with_connect_timeout(Duration::from_secs(1))
    }

    async fn accept(&self) -> DeviceLink {
        let (stream, _) = timeout(Duration::from_secs(5), self.listener.accept())
            .await
            .expect("timed out waiting for client connection")
            .expect("accept");
        DeviceLink {
            stream,
            buffer: Vec::new(),
        }
    }
}

/// One accepted control connection, device side.
struct DeviceLink {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl DeviceLink {
    /// Next complete line sent by the client, without the newline.
    async fn read_line(&mut self) -> String {
        let line = timeout(Duration::from_secs(5), async {
            loop {
                if let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                    return String::from_utf8(line[..line.len() - 1].to_vec())
                        .expect("client sent valid UTF-8");
                }
                let mut chunk = [0u8; 1024];
                let n = self.stream.read(&mut chunk).await.expect("device read");
                assert!(n > 0, "client closed the connection");
                self.buffer.extend_from_slice(&chunk[..n]);
            }
        })
        .await;
        line.expect("timed out waiting for a client frame")
    }

    async fn read_json(&mut self) -> Value {
        serde_json::from_str(&self.read_line().await).expect("client sent valid JSON")
    }

    async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("device write");
        self.stream.flush().await.expect("device flush");
    }

    async fn send_line(&mut self, line: &str) {
        self.send_raw(format!("{line}\n").as_bytes()).await;
    }

    async fn push_update(&mut self, params: Value) {
        self.send_line(
            &json!({"jsonrpc": "2.0", "method": "update", "params": params}).to_string(),
        )
        .await;
    }
}

/// Poll the cached value until it matches, panicking after a deadline.
async fn wait_for_value(client: &AzmClient, param: &str, expected: ParamValue) {
    let result = timeout(Duration::from_secs(2), async {
        loop {
            if client.get_value(param) == Some(expected.clone()) {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(
        result.is_ok(),
        "timed out waiting for {param} = {expected:?}; last seen {:?}",
        client.get_value(param)
    );
}

async fn wait_until(description: &str, mut condition: impl FnMut() -> bool) {
    let result = timeout(Duration::from_secs(2), async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting until {description}");
}

/// Every operation produces the right frame shape on the wire, in order.
#[tokio::test]
async fn test_request_shapes_over_socket() {
    let device = FakeDevice::start().await;
    let mut client = AzmClient::with_config("127.0.0.1", device.config());
    client.connect().await.expect("connect");
    let mut link = device.accept().await;

    client.get(zone_name(0), Format::Str).await.expect("get");
    let v = link.read_json().await;
    assert_eq!(v["jsonrpc"], "2.0");
    assert_eq!(v["method"], "get");
    assert_eq!(v["params"]["param"], "ZoneName_0");
    assert_eq!(v["params"]["fmt"], "str");

    client.set(zone_gain(0), 40, Format::Pct).await.expect("set");
    let v = link.read_json().await;
    assert_eq!(v["method"], "set");
    assert_eq!(v["params"]["pct"], 40);

    client.bump(zone_gain(0), -2, Format::Val).await.expect("bump");
    let v = link.read_json().await;
    assert_eq!(v["method"], "bmp");
    assert_eq!(v["params"]["val"], -2);

    client
        .subscribe(zone_gain(0), Format::Pct)
        .await
        .expect("subscribe");
    let v = link.read_json().await;
    assert_eq!(v["method"], "sub");
    assert_eq!(v["params"]["fmt"], "pct");
    assert!(client.store().is_subscribed("ZoneGain_0"));

    client
        .unsubscribe(zone_gain(0), Format::Pct)
        .await
        .expect("unsubscribe");
    let v = link.read_json().await;
    assert_eq!(v["method"], "unsub");
    assert!(!client.store().is_subscribed("ZoneGain_0"));

    client.disconnect().await;
}

/// A `get` is answered by a `getResp` push, visible via the cached store.
#[tokio::test]
async fn test_get_resp_round_trip() {
    let device = FakeDevice::start().await;
    let mut client = AzmClient::with_config("127.0.0.1", device.config());
    client.connect().await.expect("connect");
    let mut link = device.accept().await;

    client.get(zone_name(2), Format::Str).await.expect("get");
    let v = link.read_json().await;
    assert_eq!(v["method"], "get");
    assert_eq!(v["params"]["param"], "ZoneName_2");

    link.send_line(
        &json!({
            "jsonrpc": "2.0",
            "method": "getResp",
            "params": {"param": "ZoneName_2", "str": "Lobby"}
        })
        .to_string(),
    )
    .await;

    wait_for_value(&client, "ZoneName_2", ParamValue::Text("Lobby".into())).await;
    client.disconnect().await;
}

/// Lines split across TCP writes reassemble into exactly one dispatch per
/// frame, in order; several lines in one write all dispatch. A later update
/// in a different format overwrites the stored value.
#[tokio::test]
async fn test_line_reassembly_across_chunks() {
    let device = FakeDevice::start().await;
    let mut client = AzmClient::with_config("127.0.0.1", device.config());
    client.connect().await.expect("connect");
    let mut link = device.accept().await;

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let store = client.store();
    client.subscribe_parameter("ZoneGain_0", move || {
        let _ = seen_tx.send(store.get_value("ZoneGain_0"));
    });

    let first = json!({"jsonrpc": "2.0", "method": "update", "params": {"param": "ZoneGain_0", "val": -10}})
        .to_string();
    let second = json!({"jsonrpc": "2.0", "method": "update", "params": {"param": "ZoneGain_0", "pct": 50}})
        .to_string();
    let wire = format!("{first}\n{second}\n");

    // break mid-object, inside the second frame
    let split = first.len() + 10;
    link.send_raw(wire[..split].as_bytes()).await;
    sleep(Duration::from_millis(30)).await;
    link.send_raw(wire[split..].as_bytes()).await;

    let seen = timeout(Duration::from_secs(2), seen_rx.recv())
        .await
        .expect("first dispatch")
        .expect("channel open");
    assert_eq!(seen, Some(ParamValue::Int(-10)));
    let seen = timeout(Duration::from_secs(2), seen_rx.recv())
        .await
        .expect("second dispatch")
        .expect("channel open");
    assert_eq!(seen, Some(ParamValue::Int(50)));
    assert_eq!(client.get_value("ZoneGain_0"), Some(ParamValue::Int(50)));

    // two complete frames in a single write
    let both = format!(
        "{}\n{}\n",
        json!({"method": "update", "params": {"param": "SourceGain_0", "val": 1}}),
        json!({"method": "update", "params": {"param": "SourceGain_1", "val": 2}})
    );
    link.send_raw(both.as_bytes()).await;
    wait_for_value(&client, "SourceGain_0", ParamValue::Int(1)).await;
    wait_for_value(&client, "SourceGain_1", ParamValue::Int(2)).await;

    client.disconnect().await;
}

/// Garbage on the control stream is discarded; the connection keeps
/// working in both directions.
#[tokio::test]
async fn test_malformed_line_resilience() {
    let device = FakeDevice::start().await;
    let mut client = AzmClient::with_config("127.0.0.1", device.config());
    client.connect().await.expect("connect");
    let mut link = device.accept().await;

    link.send_line("this is not json").await;
    link.push_update(json!({"param": "ZoneMute_0", "val": 1})).await;
    wait_for_value(&client, "ZoneMute_0", ParamValue::Int(1)).await;

    // outbound still works after inbound garbage
    client.get(zone_gain(0), Format::Val).await.expect("get");
    let v = link.read_json().await;
    assert_eq!(v["method"], "get");

    client.disconnect().await;
}

/// Meter datagrams on the UDP socket land in the same store.
#[tokio::test]
async fn test_udp_meter_push() {
    let device = FakeDevice::start().await;
    let mut client = AzmClient::with_config("127.0.0.1", device.config());
    client.connect().await.expect("connect");
    let _link = device.accept().await;

    let udp_port = client.udp_port().await.expect("udp port");
    let sender = UdpSocket::bind("127.0.0.1:0").await.expect("bind sender");
    let frame = json!({
        "jsonrpc": "2.0",
        "method": "update",
        "params": {"param": "ZoneMeter_0", "val": -32.5}
    })
    .to_string();
    sender
        .send_to(frame.as_bytes(), ("127.0.0.1", udp_port))
        .await
        .expect("send datagram");

    wait_for_value(&client, "ZoneMeter_0", ParamValue::Float(-32.5)).await;
    client.disconnect().await;
}

/// The keepalive task probes the liveness parameter on schedule.
#[tokio::test]
async fn test_keepalive_probe() {
    let device = FakeDevice::start().await;
    let config = device.config().with_keepalive_interval(Duration::from_millis(50));
    let mut client = AzmClient::with_config("127.0.0.1", config);
    client.connect().await.expect("connect");
    let mut link = device.accept().await;

    for _ in 0..2 {
        let v = link.read_json().await;
        assert_eq!(v["method"], "get");
        assert_eq!(v["params"]["param"], "KeepAlive");
        assert_eq!(v["params"]["fmt"], "str");
    }

    client.disconnect().await;
}

/// Listeners fan out per update; a removed listener stays silent.
#[tokio::test]
async fn test_listener_fan_out_over_wire() {
    let device = FakeDevice::start().await;
    let mut client = AzmClient::with_config("127.0.0.1", device.config());
    client.connect().await.expect("connect");
    let mut link = device.accept().await;

    let (first_tx, mut first_rx) = mpsc::unbounded_channel();
    let (second_tx, mut second_rx) = mpsc::unbounded_channel();
    client.subscribe_parameter("ZoneMute_0", move || {
        let _ = first_tx.send(());
    });
    let removable = client.subscribe_parameter("ZoneMute_0", move || {
        let _ = second_tx.send(());
    });

    link.push_update(json!({"param": "ZoneMute_0", "val": 1})).await;
    timeout(Duration::from_secs(2), first_rx.recv())
        .await
        .expect("first listener notified")
        .expect("channel open");
    timeout(Duration::from_secs(2), second_rx.recv())
        .await
        .expect("second listener notified")
        .expect("channel open");

    client.unsubscribe_parameter("ZoneMute_0", removable);
    link.push_update(json!({"param": "ZoneMute_0", "val": 0})).await;
    timeout(Duration::from_secs(2), first_rx.recv())
        .await
        .expect("kept listener notified again")
        .expect("channel open");
    // removal drops the closure and its sender, closing the channel; a
    // wrongful delivery would still be buffered ahead of the close
    let second = timeout(Duration::from_millis(200), second_rx.recv()).await;
    assert!(
        !matches!(second, Ok(Some(()))),
        "removed listener must not be notified"
    );

    client.disconnect().await;
}

/// Disconnect is idempotent and tears the link down from the device's view.
#[tokio::test]
async fn test_disconnect_idempotent() {
    let device = FakeDevice::start().await;
    let mut client = AzmClient::with_config("127.0.0.1", device.config());
    client.connect().await.expect("connect");
    let mut link = device.accept().await;

    client.disconnect().await;
    client.disconnect().await;
    assert!(!client.is_connected());
    assert_eq!(client.udp_port().await, None);

    // device observes EOF
    let mut chunk = [0u8; 64];
    let n = timeout(Duration::from_secs(2), link.stream.read(&mut chunk))
        .await
        .expect("timed out waiting for EOF")
        .expect("read");
    assert_eq!(n, 0);
}

/// A disconnect issued right after connect returns must stop the
/// supervisor promptly instead of waiting out the join grace.
#[tokio::test]
async fn test_disconnect_right_after_connect_is_prompt() {
    let device = FakeDevice::start().await;
    let mut client = AzmClient::with_config("127.0.0.1", device.config());
    client.connect().await.expect("connect");

    let started = Instant::now();
    client.disconnect().await;

    assert!(
        started.elapsed() < Duration::from_millis(400),
        "disconnect stalled for {:?}",
        started.elapsed()
    );
    assert!(!client.is_connected());
    assert_eq!(client.udp_port().await, None);
}

/// When the device drops the link, the client reconnects and replays its
/// recorded subscriptions in one bulk frame.
#[tokio::test]
async fn test_reconnect_replays_subscriptions() {
    let device = FakeDevice::start().await;
    let mut client = AzmClient::with_config("127.0.0.1", device.config());
    client.connect().await.expect("connect");
    let mut link = device.accept().await;

    client
        .subscribe(zone_gain(0), Format::Pct)
        .await
        .expect("subscribe");
    let v = link.read_json().await;
    assert_eq!(v["method"], "sub");

    // device closes the connection
    drop(link);

    let mut link = device.accept().await;
    let replay = link.read_json().await;
    assert_eq!(replay["method"], "sub");
    let specs = replay["params"].as_array().expect("replay is an array");
    assert_eq!(specs.len(), 1);
    assert_eq!(specs[0]["param"], "ZoneGain_0");
    assert_eq!(specs[0]["fmt"], "pct");

    wait_until("client reports connected", || client.is_connected()).await;

    // the fresh link is fully functional
    link.push_update(json!({"param": "ZoneGain_0", "pct": 55})).await;
    wait_for_value(&client, "ZoneGain_0", ParamValue::Int(55)).await;

    client.disconnect().await;
}

/// With reconnection disabled, a dropped link stays down.
#[tokio::test]
async fn test_reconnect_disabled_stays_down() {
    let device = FakeDevice::start().await;
    let config = device.config().with_reconnect(false);
    let mut client = AzmClient::with_config("127.0.0.1", config);
    client.connect().await.expect("connect");
    let link = device.accept().await;

    drop(link);
    sleep(Duration::from_millis(100)).await;

    assert!(
        timeout(Duration::from_millis(300), device.listener.accept())
            .await
            .is_err(),
        "client must not reconnect on its own"
    );

    client.disconnect().await;
}
