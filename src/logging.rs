use std::io;

/// Log to stderr so streamed replies on stdout stay clean.
pub fn setup_logging(verbose_level: u8) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::from_default_env()
    } else {
        let filter_str = match verbose_level {
            0 => "warn,ai_tutor=info",
            1 => "info,ai_tutor=debug",
            _ => "debug,ai_tutor=trace",
        };
        tracing_subscriber::EnvFilter::new(filter_str)
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_writer(io::stderr)
        .init();
}
