use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_DIRECTIVE: &str = "info";

/// `--verbose` wins over `RUST_LOG`, which wins over the default.
fn directive(verbose: bool, env: Option<String>) -> String {
    match (verbose, env) {
        (true, _) => "debug".to_string(),
        (false, Some(env)) if !env.trim().is_empty() => env,
        _ => DEFAULT_DIRECTIVE.to_string(),
    }
}

/// Installs the global subscriber. Logs go to stderr so command output on
/// stdout stays machine-readable. Calling it twice is harmless.
pub fn init(verbose: bool) {
    let wanted = directive(verbose, std::env::var("RUST_LOG").ok());
    let filter = EnvFilter::try_new(&wanted).unwrap_or_else(|e| {
        eprintln!("ignoring log filter {:?}: {}", wanted, e);
        EnvFilter::new(DEFAULT_DIRECTIVE)
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
