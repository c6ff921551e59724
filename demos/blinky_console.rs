//! Console demo: connect to a Blinky and toggle the LED on every button press
//!
//! Run with: cargo run --example blinky_console -- <address-or-name>

use blinky_ble::{Blinky, DeviceEvent, Result, SessionConfig, SessionState};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("blinky_ble=debug".parse().unwrap()),
        )
        .init();

    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Nordic_Blinky".to_string());

    let config = SessionConfig::default().with_scan_timeout(Duration::from_secs(15));
    let blinky = Blinky::new(config).await?;
    let mut events = blinky.subscribe_events();

    println!("Connecting to {}...", address);
    blinky.connect(address.as_str()).await?;

    if let Err(e) = blinky
        .wait_for_state(SessionState::Ready, Duration::from_secs(30))
        .await
    {
        println!("Device never became ready: {}", e);
        blinky.shutdown().await?;
        return Ok(());
    }

    println!("Ready. Press the button on the board, Ctrl+C to quit.\n");

    let mut led_on = blinky.snapshot().led_on.unwrap_or(false);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(DeviceEvent::ButtonValue(value)) => {
                    println!("Button: {}", value);
                    // Toggle on press, ignore release.
                    if value != 0 {
                        blinky.set_led(!led_on).await?;
                    }
                }
                Ok(DeviceEvent::LedState(on)) => {
                    led_on = on;
                    println!("LED {}", if on { "ON" } else { "OFF" });
                }
                Ok(DeviceEvent::Disconnected) => {
                    println!("Disconnected");
                    break;
                }
                Err(_) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    blinky.shutdown().await?;

    Ok(())
}
