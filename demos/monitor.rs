use std::env;
use vantage_infusion::{ControllerConfig, DeviceUpdate, InfusionController};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let host = env::args().nth(1).unwrap_or_else(|| "192.168.1.50".to_string());
    let use_cache = env::args().any(|arg| arg == "--cache");

    let config = ControllerConfig::new(host).use_cache(use_cache);
    let controller = InfusionController::connect(config).await?;
    controller.discover().await?;

    let mut devices = controller.devices().await?;
    devices.sort_by_key(|d| d.vid());
    println!("{} device(s):", devices.len());
    for device in &devices {
        println!("  {:>6}  {:<10} {}", device.vid(), device.kind().as_str(), device.name());
        device.refresh()?;
    }

    let mut updates = controller.subscribe_devices();
    loop {
        match updates.recv().await? {
            DeviceUpdate::Load { vid, brightness, power } => {
                let name = controller.device(vid).map(|d| d.name().to_string()).unwrap_or_default();
                println!("{vid} {name}: {} at {brightness}%", if power { "on" } else { "off" });
            }
            DeviceUpdate::Temperature { vid, celsius } => {
                let name = controller.device(vid).map(|d| d.name().to_string()).unwrap_or_default();
                println!("{vid} {name}: {celsius:.1} C");
            }
        }
    }
}
