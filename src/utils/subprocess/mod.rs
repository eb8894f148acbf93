/// Environment variables safe to pass through to child processes.
const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "LC_ALL",
    "TZ",
    "TERM",
    "RUST_LOG",
    "TMPDIR",
    "XDG_RUNTIME_DIR",
];

fn allowed_env_pairs() -> impl Iterator<Item = (&'static str, String)> {
    ALLOWED_ENV_VARS
        .iter()
        .filter_map(|&var| std::env::var(var).ok().map(|val| (var, val)))
}

/// Create a `tokio::process::Command` with a scrubbed environment.
///
/// Calls `env_clear()` then copies only the allowlisted environment
/// variables from the current process. This prevents accidental leakage
/// of API keys, tokens, and other secrets to child processes.
pub fn scrubbed_command(program: &str) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.env_clear();
    for (var, val) in allowed_env_pairs() {
        cmd.env(var, val);
    }
    cmd
}

/// Same scrubbing as `scrubbed_command`, for call sites that need a
/// synchronous `std::process::Command` (e.g. the restart controller, which
/// shells out to the platform service supervisor outside any async context).
pub fn scrubbed_std_command(program: &str) -> std::process::Command {
    let mut cmd = std::process::Command::new(program);
    cmd.env_clear();
    for (var, val) in allowed_env_pairs() {
        cmd.env(var, val);
    }
    cmd
}
