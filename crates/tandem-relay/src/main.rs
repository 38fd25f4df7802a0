use tracing_subscriber::EnvFilter;

fn parse_flag<T: std::str::FromStr>(args: &[String], prefix: &str) -> Option<T> {
    args.iter()
        .find_map(|a| a.strip_prefix(prefix))
        .and_then(|v| v.parse().ok())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let port: u16 = parse_flag(&args, "--port=").unwrap_or(8081);
    let max_topics: usize = parse_flag(&args, "--max-topics=").unwrap_or(100);

    let (app, _state) = tandem_relay::build_app(max_topics);

    let addr = format!("0.0.0.0:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind to {addr}: {e}");
            std::process::exit(1);
        },
    };

    tracing::info!("tandem relay hub listening on {addr} (max topics: {max_topics})");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Relay hub error: {e}");
        std::process::exit(1);
    }
}
