use std::error::Error;
use std::time::Duration;

use clientportal_sdk::logging;
use clientportal_sdk::{GatewayClient, GatewayConfig};

fn main() -> Result<(), Box<dyn Error>> {
    logging::init(logging::DEFAULT_DIRECTIVE)?;

    let config = match std::env::args().nth(1) {
        Some(path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::default(),
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = GatewayClient::new(config)?;

        let status = client.authentication_status().await;
        match status.payload() {
            Some(payload) => println!("auth status: {payload}"),
            None => println!(
                "auth status unavailable: {:?} (http {})",
                status.error(),
                status.http_status()
            ),
        }

        let watchdog = client.keepalive_watchdog()?;
        println!("keepalive every {:?}", watchdog.interval());

        tokio::time::sleep(Duration::from_secs(180)).await;
        watchdog.shutdown().await;
        Ok::<(), Box<dyn Error>>(())
    })
}
