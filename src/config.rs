//! Environment-driven configuration and upgrade timing envelopes.

use std::collections::HashSet;
use std::env;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::VuoError;

/// Daemon configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // VCF API
    pub base_url: String,
    pub username: String,
    pub password: SecretString,
    pub request_timeout: u64,

    // Daemon
    pub listen_port: u16,
    pub refresh_interval: u64,
    pub capacity_interval: u64,
    pub ignore_alerts_domains: HashSet<String>,

    pub timings: UpgradeTimings,
}

impl Config {
    pub fn load() -> Result<Self, VuoError> {
        let base_url = get_env_required("VCF_BASE_URL")?;
        let username = get_env_required("VCF_USERNAME")?;
        let password = SecretString::from(get_env_required("VCF_PASSWORD")?);

        let request_timeout = get_env_with_default("REQUEST_TIMEOUT_SECS", 60);
        let listen_port = get_env_with_default("LISTEN_PORT", 8080);
        let refresh_interval = get_env_with_default("REFRESH_INTERVAL_SECS", 300);
        let capacity_interval = get_env_with_default("CAPACITY_INTERVAL_SECS", 900);
        let ignore_alerts_domains = env::var("IGNORE_ALERTS_DOMAINS")
            .map(|v| parse_domain_list(&v))
            .unwrap_or_default();

        let config = Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            username,
            password,
            request_timeout,
            listen_port,
            refresh_interval,
            capacity_interval,
            ignore_alerts_domains,
            timings: UpgradeTimings::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), VuoError> {
        if !(self.base_url.starts_with("https://") || self.base_url.starts_with("http://")) {
            return Err(VuoError::Config(format!(
                "VCF_BASE_URL must start with http:// or https://, got {}",
                self.base_url
            )));
        }
        if self.username.is_empty() {
            return Err(VuoError::Config("VCF_USERNAME must not be empty".into()));
        }
        if self.request_timeout == 0 || self.refresh_interval == 0 || self.capacity_interval == 0
        {
            return Err(VuoError::Config(
                "REQUEST_TIMEOUT_SECS, REFRESH_INTERVAL_SECS and CAPACITY_INTERVAL_SECS must be greater than zero"
                    .into(),
            ));
        }
        Ok(())
    }
}

/// Poll intervals and wall-clock envelopes for each upgrade phase.
#[derive(Debug, Clone)]
pub struct UpgradeTimings {
    /// Sleep between remote status polls.
    pub poll_interval: Duration,
    /// Sleep between local acknowledgment checks.
    pub ack_poll_interval: Duration,
    pub bundle_download_timeout: Duration,
    pub precheck_timeout: Duration,
    pub manager_upgrade_timeout: Duration,
    /// Ceiling while the manager service is unreachable during its own upgrade.
    pub manager_unreachable_ceiling: Duration,
    pub network_upgrade_timeout: Duration,
    pub virtualization_upgrade_timeout: Duration,
    pub other_upgrade_timeout: Duration,
    /// Ceiling for the upgradables loop while nothing is available but work remains.
    pub upgrade_loop_ceiling: Duration,
    pub validation_timeout: Duration,
    /// Delay before a successful run returns to idle.
    pub reset_delay: Duration,
}

const MINUTE: u64 = 60;

impl Default for UpgradeTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            ack_poll_interval: Duration::from_secs(5),
            bundle_download_timeout: Duration::from_secs(120 * MINUTE),
            precheck_timeout: Duration::from_secs(40 * MINUTE),
            manager_upgrade_timeout: Duration::from_secs(60 * MINUTE),
            manager_unreachable_ceiling: Duration::from_secs(180 * MINUTE),
            network_upgrade_timeout: Duration::from_secs(240 * MINUTE),
            virtualization_upgrade_timeout: Duration::from_secs(120 * MINUTE),
            other_upgrade_timeout: Duration::from_secs(120 * MINUTE),
            upgrade_loop_ceiling: Duration::from_secs(720 * MINUTE),
            validation_timeout: Duration::from_secs(30 * MINUTE),
            reset_delay: Duration::from_secs(10),
        }
    }
}

fn parse_domain_list(value: &str) -> HashSet<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn get_env_required(key: &str) -> Result<String, VuoError> {
    env::var(key).map_err(|_| {
        VuoError::Config(format!(
            "Environment variable {key} is required but not set"
        ))
    })
}

fn get_env_with_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
impl Config {
    pub fn new_for_test(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            username: "admin@local".to_string(),
            password: SecretString::from("secret"),
            request_timeout: 5,
            listen_port: 8080,
            refresh_interval: 300,
            capacity_interval: 900,
            ignore_alerts_domains: HashSet::new(),
            timings: UpgradeTimings::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timings() {
        let t = UpgradeTimings::default();
        assert_eq!(t.poll_interval, Duration::from_secs(30));
        assert_eq!(t.ack_poll_interval, Duration::from_secs(5));
        assert_eq!(t.precheck_timeout, Duration::from_secs(2400));
        assert_eq!(t.manager_upgrade_timeout, Duration::from_secs(3600));
        assert!(t.manager_unreachable_ceiling > t.manager_upgrade_timeout);
        assert_eq!(t.reset_delay, Duration::from_secs(10));
    }

    #[test]
    fn test_parse_domain_list() {
        let set = parse_domain_list(" d-1, d-2 ,,d-3 ");
        assert_eq!(set.len(), 3);
        assert!(set.contains("d-1"));
        assert!(set.contains("d-3"));
        assert!(parse_domain_list("").is_empty());
    }

    #[test]
    fn test_validate_ok() {
        let config = Config::new_for_test("https://sddc.example.local/");
        assert_eq!(config.base_url, "https://sddc.example.local");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_scheme() {
        let config = Config::new_for_test("sddc.example.local");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("VCF_BASE_URL"));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = Config::new_for_test("https://sddc.example.local");
        config.refresh_interval = 0;
        assert!(config.validate().is_err());
    }
}
