pub fn setup_tracing() {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::{
        fmt,
        layer::SubscriberExt,
        util::SubscriberInitExt,
        EnvFilter,
    };

    tracing_subscriber::fmt()
        .event_format(fmt::format::Format::default().pretty())
        .with_env_filter(EnvFilter::from_default_env())
        .finish()
        .with(ErrorLayer::default())
        .init();
}
