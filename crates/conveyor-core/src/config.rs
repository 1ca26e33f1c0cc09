//! Configuration source contract.
//!
//! The pipeline reads exactly one setting, [`REQUEST_TIMEOUT_KEY`]. Anything
//! that can answer string lookups can provide it: the typed
//! `conveyor-config` loader, environment variables ([`EnvSource`]) or a plain
//! `HashMap` in tests.

use crate::error::PipelineError;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

/// Key holding the per-invocation timeout.
pub const REQUEST_TIMEOUT_KEY: &str = "RequestTimeout";

/// Read-only key/value lookup.
pub trait ConfigSource: Send + Sync {
    /// Returns the raw value for `key`, if present.
    fn get(&self, key: &str) -> Option<String>;
}

/// Typed retrieval over any [`ConfigSource`].
pub trait ConfigSourceExt: ConfigSource {
    /// Parses the value for `key`, returning `Ok(None)` if it is absent.
    fn get_parsed<T>(&self, key: &str) -> Result<Option<T>, PipelineError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|raw| {
                raw.trim().parse::<T>().map_err(|e| {
                    PipelineError::configuration(format!("invalid value for `{key}`: {e}"))
                })
            })
            .transpose()
    }

    /// Parses the value for `key`, falling back to `default` when absent.
    fn get_or<T>(&self, key: &str, default: T) -> Result<T, PipelineError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.get_parsed(key)?.unwrap_or(default))
    }

    /// Reads a timeout-style duration.
    ///
    /// `Ok(None)` means "no timeout", either because the key is absent or
    /// because it is set to `infinite`. See [`parse_timeout`] for the
    /// accepted formats.
    fn get_timeout(&self, key: &str) -> Result<Option<Duration>, PipelineError> {
        match self.get(key) {
            Some(raw) => parse_timeout(&raw).map_err(|reason| {
                PipelineError::configuration(format!("invalid value for `{key}`: {reason}"))
            }),
            None => Ok(None),
        }
    }
}

impl<S: ConfigSource + ?Sized> ConfigSourceExt for S {}

/// Parses a timeout value.
///
/// Accepted forms:
///
/// | Input | Meaning |
/// |---|---|
/// | `infinite`, `none`, empty | no timeout |
/// | `1500` | 1500 milliseconds |
/// | `00:05:00`, `00:00:01.250` | `hh:mm:ss[.fraction]` |
/// | `-1`, `-00:00:01` | already expired |
///
/// # Example
///
/// ```
/// use conveyor_core::config::parse_timeout;
/// use std::time::Duration;
///
/// assert_eq!(parse_timeout("00:05:00").unwrap(), Some(Duration::from_secs(300)));
/// assert_eq!(parse_timeout("250").unwrap(), Some(Duration::from_millis(250)));
/// assert_eq!(parse_timeout("infinite").unwrap(), None);
/// assert_eq!(parse_timeout("-1").unwrap(), Some(Duration::ZERO));
/// ```
pub fn parse_timeout(raw: &str) -> Result<Option<Duration>, String> {
    let value = raw.trim();
    if value.is_empty()
        || value.eq_ignore_ascii_case("infinite")
        || value.eq_ignore_ascii_case("none")
    {
        return Ok(None);
    }

    if let Some(rest) = value.strip_prefix('-') {
        // Validate the magnitude, then treat any negative timeout as expired.
        parse_timeout(rest)?;
        return Ok(Some(Duration::ZERO));
    }

    if let Ok(millis) = value.parse::<u64>() {
        return Ok(Some(Duration::from_millis(millis)));
    }

    let parts: Vec<&str> = value.split(':').collect();
    let [hours, minutes, seconds] = parts.as_slice() else {
        return Err(format!("expected milliseconds or hh:mm:ss, got `{value}`"));
    };

    let hours: u64 = hours
        .parse()
        .map_err(|_| format!("invalid hours in `{value}`"))?;
    let minutes: u64 = minutes
        .parse()
        .map_err(|_| format!("invalid minutes in `{value}`"))?;
    let seconds: f64 = seconds
        .parse()
        .map_err(|_| format!("invalid seconds in `{value}`"))?;

    if minutes >= 60 || !(0.0..60.0).contains(&seconds) {
        return Err(format!("minutes and seconds must be below 60 in `{value}`"));
    }

    let whole = Duration::from_secs(hours * 3600 + minutes * 60);
    Ok(Some(whole + Duration::from_secs_f64(seconds)))
}

impl ConfigSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Reads keys from process environment variables.
///
/// With a prefix of `"APP"`, the key `RequestTimeout` is read from
/// `APP_RequestTimeout`, falling back to `APP_REQUEST_TIMEOUT`.
#[derive(Debug, Clone, Default)]
pub struct EnvSource {
    prefix: Option<String>,
}

impl EnvSource {
    /// Reads keys verbatim.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads keys with `PREFIX_` prepended.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    fn candidates(&self, key: &str) -> [String; 2] {
        let screaming = to_screaming_snake(key);
        match &self.prefix {
            Some(prefix) => [format!("{prefix}_{key}"), format!("{prefix}_{screaming}")],
            None => [key.to_string(), screaming],
        }
    }
}

impl ConfigSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        self.candidates(key)
            .iter()
            .find_map(|name| std::env::var(name).ok())
    }
}

fn to_screaming_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (i, ch) in key.chars().enumerate() {
        if ch.is_ascii_uppercase() && i > 0 {
            out.push('_');
        }
        out.push(ch.to_ascii_uppercase());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_parse_timeout_forms() {
        assert_eq!(parse_timeout("").unwrap(), None);
        assert_eq!(parse_timeout("Infinite").unwrap(), None);
        assert_eq!(parse_timeout("0").unwrap(), Some(Duration::ZERO));
        assert_eq!(parse_timeout("1500").unwrap(), Some(Duration::from_millis(1500)));
        assert_eq!(
            parse_timeout("01:02:03").unwrap(),
            Some(Duration::from_secs(3723))
        );
        assert_eq!(
            parse_timeout("00:00:01.5").unwrap(),
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_parse_timeout_negative_is_expired() {
        assert_eq!(parse_timeout("-1").unwrap(), Some(Duration::ZERO));
        assert_eq!(parse_timeout("-00:00:05").unwrap(), Some(Duration::ZERO));
        assert!(parse_timeout("-abc").is_err());
    }

    #[test]
    fn test_parse_timeout_rejects_garbage() {
        assert!(parse_timeout("five minutes").is_err());
        assert!(parse_timeout("00:75:00").is_err());
        assert!(parse_timeout("1:2").is_err());
    }

    #[test]
    fn test_get_timeout_from_map() {
        let cfg = source(&[(REQUEST_TIMEOUT_KEY, "00:05:00")]);
        assert_eq!(
            cfg.get_timeout(REQUEST_TIMEOUT_KEY).unwrap(),
            Some(Duration::from_secs(300))
        );

        let empty = source(&[]);
        assert_eq!(empty.get_timeout(REQUEST_TIMEOUT_KEY).unwrap(), None);
    }

    #[test]
    fn test_get_timeout_reports_key() {
        let cfg = source(&[(REQUEST_TIMEOUT_KEY, "soon")]);
        let err = cfg.get_timeout(REQUEST_TIMEOUT_KEY).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains(REQUEST_TIMEOUT_KEY));
    }

    #[test]
    fn test_get_or_default() {
        let cfg = source(&[("Retries", "3")]);
        assert_eq!(cfg.get_or("Retries", 1_u32).unwrap(), 3);
        assert_eq!(cfg.get_or("Missing", 1_u32).unwrap(), 1);
        assert!(source(&[("Retries", "x")]).get_or("Retries", 1_u32).is_err());
    }

    #[test]
    fn test_screaming_snake() {
        assert_eq!(to_screaming_snake("RequestTimeout"), "REQUEST_TIMEOUT");
        assert_eq!(to_screaming_snake("timeout"), "TIMEOUT");
    }

    #[test]
    fn test_env_source_candidates() {
        let env = EnvSource::with_prefix("APP");
        assert_eq!(
            env.candidates(REQUEST_TIMEOUT_KEY),
            ["APP_RequestTimeout".to_string(), "APP_REQUEST_TIMEOUT".to_string()]
        );
    }
}
