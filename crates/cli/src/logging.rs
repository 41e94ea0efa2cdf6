use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Crates whose level follows the `-v` flags.
const WORKSPACE_TARGETS: &[&str] = &["meshgen", "meshgen_core", "meshgen_remote", "meshgen_pipeline"];

/// Filter used when `RUST_LOG` is not set. Without `-v` only warnings and
/// per-item progress are shown.
pub fn default_filter(verbose: u8) -> String {
    let level = match verbose {
        0 => return "warn,meshgen_core::observer=info".to_string(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let mut filter = String::from("warn");
    for target in WORKSPACE_TARGETS {
        filter.push_str(&format!(",{target}={level}"));
    }
    filter
}

/// Install the global subscriber. Logs go to stderr; stdout is reserved for
/// the final JSON report.
pub fn init(verbose: u8, json: bool) {
    let json_layer = json.then(|| fmt::layer().json().with_writer(std::io::stderr));
    let text_layer = (!json).then(|| fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(verbose).into()))
        .with(json_layer)
        .with(text_layer)
        .init();
}
