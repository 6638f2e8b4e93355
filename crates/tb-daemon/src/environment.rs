use std::path::{Path, PathBuf};

use tb_core::config::{CliConfig, Config};
use tb_session::CommandSpec;
use tracing::{info, warn};

/// Load `.env` from the working directory, if there is one.
///
/// Runs before logging is initialised, so the outcome is returned for the
/// caller to log.
pub fn load_dotenv() -> Option<PathBuf> {
    dotenv::dotenv().ok()
}

/// Translate the `[cli]` section into what the PTY pool launches.
pub fn command_spec(cli: &CliConfig) -> CommandSpec {
    let mut spec = CommandSpec::new(cli.command.clone());
    spec.args = cli.args.clone();
    spec.cwd = cli.cwd.as_ref().map(PathBuf::from);
    spec.env = cli
        .env
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    spec.term = cli.term.clone();
    spec
}

/// Pick the directory of browser assets: the configured one, else the first
/// bundled `public/` that has an `index.html`.
pub fn find_static_dir(configured: Option<&str>) -> Option<PathBuf> {
    if let Some(dir) = configured {
        let dir = PathBuf::from(dir);
        if !dir.join("index.html").exists() {
            warn!(path = %dir.display(), "configured static_dir has no index.html");
        }
        return Some(dir);
    }

    let candidates = [
        PathBuf::from("public"),
        PathBuf::from("crates/tb-daemon/public"),
        Path::new(env!("CARGO_MANIFEST_DIR")).join("public"),
    ];
    let found = candidates
        .into_iter()
        .find(|dir| dir.join("index.html").exists());
    match &found {
        Some(dir) => info!(path = %dir.display(), "found bundled web client"),
        None => warn!("no web client found; only /ws and /health are served"),
    }
    found
}

/// Log the effective launch settings.
pub fn log_config(config: &Config) {
    info!(
        command = %config.cli.command,
        args = ?config.cli.args,
        cwd = config.cli.cwd.as_deref().unwrap_or("."),
        term = %config.cli.term,
        max_sessions = config.terminal.max_sessions,
        "CLI launch configuration"
    );
}
