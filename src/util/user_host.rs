//! Parsing of `user@host` style specifications.
//!
//! The same syntax names containers (`[user@]container`) and databases
//! (`[user@]database`).

use std::sync::LazyLock;

use derive_more::{Display, Error};
use regex::Regex;

static USER_AT_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?P<user>[^@]+)@|@)?(?P<host>[^@]+)?$").expect("user@host regex is valid")
});

/// A `user@host` value that doesn't satisfy the requested format.
#[derive(Debug, Display, Error, PartialEq, Eq)]
pub enum UserHostError {
    #[display("Value '{_0}' not in 'user@host' format")]
    Malformed(#[error(ignore)] String),
    #[display("Value '{_0}' requires but doesn't contain a username")]
    MissingUser(#[error(ignore)] String),
    #[display("Value '{_0}' requires but doesn't contain a hostname")]
    MissingHost(#[error(ignore)] String),
}

/// A `[user@]host` value with a mandatory host part.
///
/// Used for `[user@]container` and `[user@]database` configuration values.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(try_from = "String")]
pub struct UserAtHost {
    pub user: Option<String>,
    pub host: String,
}

impl TryFrom<String> for UserAtHost {
    type Error = UserHostError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let (user, host) = split_user_at_host(&value, true, false)?;
        let host = host.ok_or(UserHostError::MissingHost(value))?;
        Ok(Self { user, host })
    }
}

/// Splits `value` into its optional user and host parts.
///
/// Accepted forms are `user@host`, `user@`, `@host` and `host`.
pub fn split_user_at_host(
    value: &str,
    user_is_optional: bool,
    host_is_optional: bool,
) -> Result<(Option<String>, Option<String>), UserHostError> {
    let captures = USER_AT_HOST
        .captures(value)
        .ok_or_else(|| UserHostError::Malformed(value.to_string()))?;

    let user = captures.name("user").map(|m| m.as_str().to_string());
    let host = captures.name("host").map(|m| m.as_str().to_string());

    if user.is_none() && !user_is_optional {
        return Err(UserHostError::MissingUser(value.to_string()));
    }
    if host.is_none() && !host_is_optional {
        return Err(UserHostError::MissingHost(value.to_string()));
    }
    Ok((user, host))
}
