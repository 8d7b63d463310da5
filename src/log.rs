//! Logging utilities

use tracing::{error, info};
use tracing_subscriber::{filter::LevelFilter, fmt, EnvFilter};

/// Install the global subscriber, filtered through `JACKTRIP_AGENT_LOG`
pub(crate) fn parse_log_level() {
    let mut filter = EnvFilter::try_from_env("JACKTRIP_AGENT_LOG")
        .unwrap_or_default()
        .add_directive(LevelFilter::INFO.into());

    for quiet in [
        "async_std=error",
        "async_io=error",
        "polling=error",
        "mio=error",
        "hyper=warn",
        "reqwest=warn",
        "tungstenite=warn",
        "tokio_tungstenite=warn",
    ] {
        if let Ok(directive) = quiet.parse() {
            filter = filter.add_directive(directive);
        }
    }

    fmt().with_env_filter(filter).init();
    info!("Initialised logger: jacktrip-agent {}", crate::BUILD_SHA);
}

/// Create an oops (a fatal crash) with an associated error message
pub(crate) fn oops<S: Into<String>>(msg: S, code: u16) -> ! {
    error!("{}", msg.into());
    std::process::exit(code.into());
}
