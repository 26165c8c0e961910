//! Command line configuration for the proxy daemon.

use clap::Parser;

/// Filtering reverse proxy and rate limiter.
#[derive(Debug, Parser)]
#[command(name = "sieve")]
pub struct Config {
    /// Target URL for the reverse proxy
    #[arg(long, default_value = "http://127.0.0.1:8888")]
    pub target: String,

    /// Proxy listen address
    #[arg(long, default_value = "127.0.0.1:4004")]
    pub listen: String,

    /// Management API listen address
    #[arg(long = "api", default_value = "127.0.0.1:4005")]
    pub api: String,

    /// JSON rule list
    #[arg(long = "rules", default_value = "rules.json")]
    pub rules: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse_from(["sieve"]);
        assert_eq!(config.listen, "127.0.0.1:4004");
        assert_eq!(config.api, "127.0.0.1:4005");
        assert_eq!(config.rules, "rules.json");
    }

    #[test]
    fn test_overrides() {
        let config = Config::parse_from([
            "sieve",
            "--target",
            "http://10.0.0.2:8080",
            "--rules",
            "/etc/sieve/rules.json",
        ]);
        assert_eq!(config.target, "http://10.0.0.2:8080");
        assert_eq!(config.rules, "/etc/sieve/rules.json");
    }
}
