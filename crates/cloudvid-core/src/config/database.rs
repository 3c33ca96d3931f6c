//! PostgreSQL settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where the job, history and quota tables live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL.
    pub url: String,
    /// Pool ceiling. The dispatcher needs one connection; the rest serve
    /// admission and operator commands.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// How long to wait for a pooled connection.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    /// The URL with its password replaced, for logs.
    pub fn redacted_url(&self) -> String {
        let Some((credentials, host)) = self.url.rsplit_once('@') else {
            return self.url.clone();
        };
        let (scheme, user_info) = match credentials.split_once("://") {
            Some((scheme, rest)) => (format!("{scheme}://"), rest),
            None => (String::new(), credentials),
        };
        match user_info.split_once(':') {
            Some((user, _)) => format!("{scheme}{user}:****@{host}"),
            None => self.url.clone(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_idle_timeout() -> u64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> DatabaseConfig {
        DatabaseConfig {
            url: url.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 300,
        }
    }

    #[test]
    fn test_redacted_url_hides_password() {
        assert_eq!(
            config("postgres://cloudvid:secret@db:5432/transfers").redacted_url(),
            "postgres://cloudvid:****@db:5432/transfers"
        );
    }

    #[test]
    fn test_redacted_url_without_password_is_unchanged() {
        for url in ["postgres://db:5432/transfers", "postgres://cloudvid@db/transfers"] {
            assert_eq!(config(url).redacted_url(), url);
        }
    }
}
