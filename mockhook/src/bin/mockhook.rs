#[macro_use]
extern crate log;

use mockhook::{config, dump::Sink, server::WebhookServer};
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    info!("Reading configuration");
    let configuration = config::configure()?;

    let sink = Sink::stdout();
    let server = WebhookServer::new(configuration, sink.clone()).start()?;
    sink.notice(&format!(
        "Starting mock webhook server on http://{}",
        server.local_addr()
    ))?;

    signal::ctrl_c().await?;
    info!("Shutdown signal received, finishing in-flight requests");
    server.stop().await;

    info!("mockhook shutdown complete.");
    Ok(())
}
