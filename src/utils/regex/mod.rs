use anyhow::{Context, Result};
use regex::Regex;
use std::sync::LazyLock;

/// Compile a regex pattern with proper error handling.
pub fn compile_regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).with_context(|| format!("Failed to compile regex pattern: {}", pattern))
}

/// Compiled regex patterns reused across chunking and sanitization.
pub struct RegexPatterns;

impl RegexPatterns {
    /// Matches runs of 3+ consecutive newlines, collapsed during chunking.
    pub fn newlines() -> &'static Regex {
        static RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"\n{3,}").expect("newlines regex"));
        &RE
    }

    /// Matches a paragraph break (blank line).
    pub fn double_newlines() -> &'static Regex {
        static RE: LazyLock<Regex> =
            LazyLock::new(|| Regex::new(r"\n\s*\n+").expect("double newlines regex"));
        &RE
    }
}

/// Build a regex that matches a literal mention of `name` (a display name or
/// bot id), escaping regex metacharacters in the name itself so attacker
/// input can never inject pattern syntax into the mention gate. Matches
/// `@name` or a bracketed `<@name>` form at a word boundary.
pub fn build_mention_regex(name: &str) -> Result<Regex> {
    let escaped = regex::escape(name);
    let pattern = format!(r"(?:<@{escaped}>|@{escaped}\b)");
    compile_regex(&pattern).with_context(|| format!("failed to compile mention regex for {name}"))
}
