//! Live monitor for an Atmosphere AZM4/AZM8 device.
//!
//! Connects, bulk-subscribes every parameter the device layout exposes, and
//! prints each change as the device pushes it. Meter updates arrive over
//! UDP, everything else over the TCP control stream.
//!
//! Usage: monitor <host> [azm4|azm8]

use atlasied_azm::{AzmClient, DeviceLayout};
use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut args = env::args().skip(1);
    let host = match args.next() {
        Some(host) => host,
        None => {
            eprintln!("usage: monitor <host> [azm4|azm8]");
            std::process::exit(2);
        }
    };
    let layout = match args.next().as_deref() {
        Some("azm4") => DeviceLayout::azm4(),
        _ => DeviceLayout::azm8(),
    };

    let mut client = AzmClient::new(&host);
    client.connect().await?;
    println!(
        "Connected to {} (meter socket on UDP port {})",
        host,
        client.udp_port().await.unwrap_or(0)
    );

    let specs = layout.subscription_specs();
    client.subscribe_many(&specs).await?;
    println!("Watching {} parameters; Ctrl-C to quit\n", specs.len());

    let store = client.store();
    for (param, _) in &specs {
        let store = store.clone();
        let name = param.clone();
        client.subscribe_parameter(param.clone(), move || {
            if let Some(value) = store.get_value(&name) {
                println!("{name} = {value}");
            }
        });
    }

    // Prime the cache so current names and levels print right away
    for (param, fmt) in &specs {
        client.get(param.as_str(), *fmt).await?;
    }

    tokio::signal::ctrl_c().await?;
    client.disconnect().await;
    Ok(())
}
