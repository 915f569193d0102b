use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

pub fn init(filter: Option<&str>) -> Result<(), anyhow::Error> {
    let filter_str = if let Some(filter) = filter {
        filter.to_string()
    } else if let Ok(filter) = std::env::var("RUST_LOG") {
        filter
    } else {
        // INFO for our code, without per-request HTTP access noise.
        "info,tower_http=warn".to_string()
    };
    let filter = tracing_subscriber::EnvFilter::try_new(filter_str)?;

    use std::io::IsTerminal as _;
    let ansi = std::io::stdout().is_terminal();

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(ansi)
                .with_writer(std::io::stdout),
        )
        .init();
    Ok(())
}
