use tracing_subscriber::EnvFilter;

/// Logs go to stderr so the printer sink can own stdout.
pub fn init_tracing() {
    let filter = EnvFilter::from_default_env().add_directive(
        "usage_export=info"
            .parse()
            .unwrap_or_else(|_| tracing_subscriber::filter::LevelFilter::INFO.into()),
    );

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
