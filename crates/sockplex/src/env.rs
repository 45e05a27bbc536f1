//! Environment variable utilities
//!
//! `env_get<T>` parses an environment variable with a fallback default.
//!
//! ```ignore
//! use sockplex::env::{env_get, env_get_opt};
//!
//! let max: usize = env_get("SOCKPLEX_MAX_CONNECTIONS", 4096);
//! let program: Option<String> = env_get_opt("SOCKPLEX_COSERVER_PROGRAM");
//! ```

use std::str::FromStr;

/// Get environment variable parsed as type T, or return default.
///
/// Unset and unparsable values both yield the default.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// `Some(T)` if the variable is set, non-empty and parses.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__SOCKPLEX_TEST_UNSET__", 42);
        assert_eq!(val, 42);
    }

    #[test]
    fn test_env_get_with_set_var() {
        std::env::set_var("__SOCKPLEX_TEST_NUM__", "123");
        let val: usize = env_get("__SOCKPLEX_TEST_NUM__", 0);
        assert_eq!(val, 123);
        std::env::remove_var("__SOCKPLEX_TEST_NUM__");
    }

    #[test]
    fn test_env_get_invalid_parse() {
        std::env::set_var("__SOCKPLEX_TEST_INVALID__", "not_a_number");
        let val: u64 = env_get("__SOCKPLEX_TEST_INVALID__", 99);
        assert_eq!(val, 99);
        std::env::remove_var("__SOCKPLEX_TEST_INVALID__");
    }

    #[test]
    fn test_env_get_opt_empty_is_none() {
        std::env::set_var("__SOCKPLEX_TEST_EMPTY__", "");
        let val: Option<String> = env_get_opt("__SOCKPLEX_TEST_EMPTY__");
        assert!(val.is_none());
        std::env::remove_var("__SOCKPLEX_TEST_EMPTY__");
    }
}
