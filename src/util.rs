use tracing_subscriber::{fmt, EnvFilter};

/// Load environment overrides and install the tracing subscriber.
///
/// Environment file lookup order:
/// - CREDGATE_ENV_FILE or DOTENV_PATH when set and pointing at a file
/// - `.env` discovered from the working directory upwards
///
/// The filter comes from RUST_LOG (default `info`). Calling this twice is
/// harmless; the second subscriber is simply not installed.
pub fn init_tracing() {
    let mut env_source: String = "none".into();
    for key in ["CREDGATE_ENV_FILE", "DOTENV_PATH"] {
        if let Ok(p) = std::env::var(key) {
            let p = p.trim();
            if !p.is_empty()
                && std::path::Path::new(p).is_file()
                && dotenvy::from_filename(p).is_ok()
            {
                env_source = format!("{p} ({key})");
                break;
            }
        }
    }

    if env_source == "none" {
        if let Ok(path) = dotenvy::dotenv() {
            env_source = path.display().to_string();
        }
    }

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let subscriber = fmt().with_env_filter(EnvFilter::new(filter)).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    tracing::debug!("Environment loaded from: {}", env_source);
}

/// Parse a non-negative integer environment variable, ignoring blanks and junk.
pub fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
}

/// Non-empty, trimmed environment variable.
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_helpers_ignore_blank_and_junk() {
        std::env::set_var("CREDGATE_TEST_U64_OK", " 42 ");
        std::env::set_var("CREDGATE_TEST_U64_BAD", "forty");
        std::env::set_var("CREDGATE_TEST_STR_BLANK", "   ");
        assert_eq!(env_u64("CREDGATE_TEST_U64_OK"), Some(42));
        assert_eq!(env_u64("CREDGATE_TEST_U64_BAD"), None);
        assert_eq!(env_u64("CREDGATE_TEST_U64_MISSING"), None);
        assert_eq!(env_string("CREDGATE_TEST_STR_BLANK"), None);
        assert_eq!(env_string("CREDGATE_TEST_U64_OK").as_deref(), Some("42"));
    }
}
