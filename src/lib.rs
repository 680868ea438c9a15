//! Rust client library for AtlasIED Atmosphere AZM4/AZM8 audio matrix processors
//!
//! This library speaks the Atmosphere JSON-RPC control protocol: newline-
//! delimited JSON over a persistent TCP connection, plus a UDP side channel
//! the device uses for high-rate audio meter broadcasts. It supports:
//!
//! - Zone and source gain, mute, routing, and group control
//! - Push subscriptions for parameter changes
//! - Audio meter levels delivered over UDP
//! - A cached parameter store with per-parameter change listeners
//! - Connection keepalive, and automatic reconnection with subscription replay
//!
//! # Quick Start
//!
//! ```no_run
//! use atlasied_azm::{zone_gain, zone_mute, AzmClient, Format};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = AzmClient::new("192.168.1.50");
//!     client.connect().await?;
//!
//!     // Ask the device to push changes for zone 0
//!     client.subscribe(zone_gain(0), Format::Pct).await?;
//!     client.subscribe(zone_mute(0), Format::Val).await?;
//!
//!     // React to changes; listeners re-read the cached value
//!     client.subscribe_parameter(zone_gain(0), || {
//!         println!("zone 0 gain changed");
//!     });
//!
//!     // Drive the device
//!     client.set(zone_gain(0), 40, Format::Pct).await?;
//!     client.set(zone_mute(0), 0, Format::Val).await?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!     println!("gain is now {:?}", client.get_value(&zone_gain(0)));
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! # Protocol Notes
//!
//! The device does not correlate requests with responses. A `get` is
//! answered by an eventual `getResp` frame matched to state purely by
//! parameter name, so reads are asynchronous: issue the `get`, then observe
//! the cached value via [`AzmClient::get_value`] or a registered listener.
//! This mirrors the wire protocol exactly; there are no request IDs to wait
//! on.
//!
//! Inbound updates arrive on either transport (subscribed control changes
//! on the TCP stream, meter levels typically as UDP datagrams) and land in
//! the same store with last-write-wins semantics.
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **Client**: session facade handling lifecycle, operations, and reconnection
//! - **Connection**: TCP/UDP transport pair with line framing and keepalive
//! - **Store**: latest-value cache plus listener and subscription registries
//! - **Protocol**: JSON-RPC message structures and the line codec
//! - **Params**: AZM parameter naming conventions and device layout

mod client;
mod config;
mod connection;
mod error;
mod params;
mod protocol;
mod store;

// Public exports
pub use client::AzmClient;
pub use config::{AzmConfig, CONTROL_PORT, METER_PORT};
pub use error::{AzmError, Result};
pub use params::{
    group_active, source_gain, source_meter, source_mute, source_name, zone_gain, zone_meter,
    zone_mute, zone_name, zone_source, ControlKind, DeviceLayout, KEEPALIVE_PARAM,
};
pub use protocol::{Format, ParamValue};
pub use store::{ListenerId, ParameterStore};
