use std::error::Error;
use std::sync::Arc;

use clientportal_sdk::logging;
use clientportal_sdk::stream::proto::frame_topic;
use clientportal_sdk::stream::session::{LoopError, SessionListener};
use clientportal_sdk::{GatewayClient, GatewayConfig};

/// Prints every frame, tagged with its topic when it has one.
struct PrintListener;

impl SessionListener for PrintListener {
    fn on_connect(&self, confirmation: &str) {
        println!("connected: {confirmation}");
    }

    fn on_message(&self, payload: &str) {
        match frame_topic(payload) {
            Some(topic) => println!("[{topic}] {payload}"),
            None => println!("{payload}"),
        }
    }

    fn on_error(&self, error: &LoopError) {
        eprintln!("{error}");
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    logging::init(logging::DEFAULT_DIRECTIVE)?;

    let config = match std::env::args().nth(1) {
        Some(path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::default(),
    };
    let conid: u64 = std::env::args()
        .nth(2)
        .as_deref()
        .unwrap_or("265598")
        .parse()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = GatewayClient::new(config)?;
        let mut session = client.connect_stream(Arc::new(PrintListener)).await?;

        session
            .handle()
            .subscribe_market_data(conid, ["31", "84", "86"])?;

        let terminal = session.run().await?;
        println!("session ended: {terminal}");
        Ok::<(), Box<dyn Error>>(())
    })
}
