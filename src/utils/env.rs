use std::str::FromStr;

/// Read an environment variable, preferring the `TIERGATE_` prefixed name.
///
/// `TIERGATE_{key}` wins over a plain `{key}` so a host application can
/// scope tiergate settings without renaming its existing variables.
///
/// ```rust
/// use tiergate::utils::get_env_with_prefix;
///
/// // TIERGATE_RATE_LIMIT_PER_MINUTE, then RATE_LIMIT_PER_MINUTE
/// let per_minute = get_env_with_prefix("RATE_LIMIT_PER_MINUTE");
/// ```
pub fn get_env_with_prefix(key: &str) -> Option<String> {
    std::env::var(format!("TIERGATE_{}", key))
        .or_else(|_| std::env::var(key))
        .ok()
}

/// Like [`get_env_with_prefix`], parsed into `T`.
///
/// Returns `Some(Err(raw))` when the variable is set but does not parse, so
/// callers can report the offending value instead of silently using a default.
pub fn parse_env_with_prefix<T: FromStr>(key: &str) -> Option<Result<T, String>> {
    get_env_with_prefix(key).map(|raw| raw.trim().parse::<T>().map_err(|_| raw))
}

/// Interpret common truthy spellings.
pub fn env_flag(key: &str) -> Option<bool> {
    get_env_with_prefix(key).map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_env_with_prefix() {
        unsafe {
            std::env::set_var("TIERGATE_TG_ENV_TEST_VAR", "prefixed_value");
        }
        assert_eq!(
            get_env_with_prefix("TG_ENV_TEST_VAR"),
            Some("prefixed_value".to_string())
        );
        unsafe {
            std::env::remove_var("TIERGATE_TG_ENV_TEST_VAR");
        }

        unsafe {
            std::env::set_var("TG_ENV_FALLBACK_VAR", "unprefixed_value");
        }
        assert_eq!(
            get_env_with_prefix("TG_ENV_FALLBACK_VAR"),
            Some("unprefixed_value".to_string())
        );
        unsafe {
            std::env::remove_var("TG_ENV_FALLBACK_VAR");
        }

        assert_eq!(get_env_with_prefix("TG_ENV_NON_EXISTENT_VAR"), None);
    }

    #[test]
    fn test_parse_env_with_prefix() {
        unsafe {
            std::env::set_var("TIERGATE_TG_PARSE_OK", " 42 ");
            std::env::set_var("TIERGATE_TG_PARSE_BAD", "forty-two");
        }
        assert_eq!(parse_env_with_prefix::<u32>("TG_PARSE_OK"), Some(Ok(42)));
        assert_eq!(
            parse_env_with_prefix::<u32>("TG_PARSE_BAD"),
            Some(Err("forty-two".to_string()))
        );
        assert_eq!(parse_env_with_prefix::<u32>("TG_PARSE_MISSING"), None);
        unsafe {
            std::env::remove_var("TIERGATE_TG_PARSE_OK");
            std::env::remove_var("TIERGATE_TG_PARSE_BAD");
        }
    }

    #[test]
    fn test_env_flag() {
        unsafe {
            std::env::set_var("TIERGATE_TG_FLAG_ON", "TRUE");
            std::env::set_var("TIERGATE_TG_FLAG_OFF", "0");
        }
        assert_eq!(env_flag("TG_FLAG_ON"), Some(true));
        assert_eq!(env_flag("TG_FLAG_OFF"), Some(false));
        assert_eq!(env_flag("TG_FLAG_MISSING"), None);
        unsafe {
            std::env::remove_var("TIERGATE_TG_FLAG_ON");
            std::env::remove_var("TIERGATE_TG_FLAG_OFF");
        }
    }
}
