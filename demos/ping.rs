//! Ping example
//!
//! Finds a device by name, binds its command service, sends `Ping;` and
//! prints whatever the device notifies back.
//!
//! Run with: cargo run --example ping
//!
//! To search for a different name pattern:
//!   cargo run --example ping -- --name ".*MyDevice.*"

use bluetooth_le_controller::{BleController, ControllerConfig, NativePlatform, Result};
use std::process::ExitCode;
use std::time::Duration;

const DEFAULT_NAME_PATTERN: &str = r"^.*45MW\.TRG.*";
const SERVICE_PATTERN: &str = r"^\{..3e4567-e89.-12d3-a456-426652340000\}";

async fn run(controller: &mut BleController<NativePlatform>, name: &str) -> Result<()> {
    println!("Looking for a device matching {}...", name);
    controller.connect_by_name(name).await?;
    if let Some(device) = controller.device() {
        use bluetooth_le_controller::ble::BleDevice;
        println!("Connected to {}", device.id());
    }

    controller.select_service(SERVICE_PATTERN).await?;
    controller
        .select_characteristics(|event| {
            println!(
                "<- {} ({} bytes): {}",
                event.characteristic_uuid,
                event.value.len(),
                String::from_utf8_lossy(&event.value)
            );
        })
        .await?;

    println!("-> Ping;");
    controller.write_str("Ping;").await?;

    // Give the device a moment to answer
    tokio::time::sleep(Duration::from_secs(2)).await;

    controller.disconnect().await
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("warn,bluetooth_le_controller=debug")
        .init();

    println!("BLE Ping");
    println!("========\n");

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let name = args
        .iter()
        .position(|arg| arg == "--name")
        .and_then(|i| args.get(i + 1))
        .cloned()
        .unwrap_or_else(|| DEFAULT_NAME_PATTERN.to_string());

    let platform = match NativePlatform::new().await {
        Ok(platform) => platform,
        Err(e) => {
            eprintln!("Bluetooth unavailable: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let config = ControllerConfig::default().with_discovery_timeout(Duration::from_secs(30));
    let mut controller = BleController::with_config(platform, config);

    match run(&mut controller, &name).await {
        Ok(()) => {
            println!("\nDone.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            let code = controller.last_error().unwrap_or_else(|| e.code());
            eprintln!("\nError {}: {}", code, e);
            let _ = controller.disconnect().await;
            ExitCode::from((code.value() & 0xff) as u8)
        }
    }
}
