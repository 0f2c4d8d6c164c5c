//! Startup health checks for the `check` subcommand.

use super::config::Config;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy(String),
}

#[derive(Debug, Clone)]
pub struct HealthCheck {
    name: &'static str,
    critical: bool,
    status: HealthStatus,
}

impl HealthCheck {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn critical(&self) -> bool {
        self.critical
    }

    pub fn status(&self) -> &HealthStatus {
        &self.status
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthStatus::Healthy)
    }
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    checks: Vec<HealthCheck>,
}

impl HealthReport {
    pub fn checks(&self) -> &[HealthCheck] {
        &self.checks
    }

    pub fn is_healthy(&self) -> bool {
        self.checks
            .iter()
            .filter(|check| check.critical())
            .all(HealthCheck::is_healthy)
    }
}

/// Validate the static configuration before startup.
pub fn health_check(config: &Config) -> HealthReport {
    let mut checks = Vec::new();

    checks.push(HealthCheck {
        name: "database",
        critical: true,
        status: if config.database.trim().is_empty() {
            HealthStatus::Unhealthy("database path is empty".to_string())
        } else {
            HealthStatus::Healthy
        },
    });

    checks.push(HealthCheck {
        name: "exchange_api",
        critical: true,
        status: if config.exchange.api_url.trim().is_empty() {
            HealthStatus::Unhealthy("api_url is empty".to_string())
        } else {
            HealthStatus::Healthy
        },
    });

    checks.push(HealthCheck {
        name: "exchange_ws",
        critical: true,
        status: if config.exchange.ws_url.trim().is_empty() {
            HealthStatus::Unhealthy("ws_url is empty".to_string())
        } else {
            HealthStatus::Healthy
        },
    });

    checks.push(HealthCheck {
        name: "credentials",
        critical: false,
        status: if config.exchange.has_credentials() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy(format!(
                "{} / {} not set; execution unavailable",
                config.exchange.api_key_env, config.exchange.secret_env
            ))
        },
    });

    checks.push(HealthCheck {
        name: "trading",
        critical: true,
        status: match config.trading.validate() {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Unhealthy(e.to_string()),
        },
    });

    HealthReport { checks }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_passes_critical_checks() {
        let report = health_check(&Config::default());
        assert!(report.is_healthy());

        let names: Vec<_> = report.checks().iter().map(HealthCheck::name).collect();
        assert!(names.contains(&"database"));
        assert!(names.contains(&"exchange_api"));
        assert!(names.contains(&"exchange_ws"));
        assert!(names.contains(&"trading"));
    }

    #[test]
    fn empty_database_path_fails() {
        let config = Config {
            database: String::new(),
            ..Default::default()
        };
        let report = health_check(&config);
        let db_check = report
            .checks()
            .iter()
            .find(|check| check.name() == "database")
            .unwrap();
        assert!(!db_check.is_healthy());
        assert!(!report.is_healthy());
    }

    #[test]
    fn empty_ws_url_fails() {
        let mut config = Config::default();
        config.exchange.ws_url = String::new();
        let report = health_check(&config);
        assert!(!report.is_healthy());
    }

    #[test]
    fn missing_credentials_is_noncritical() {
        let mut config = Config::default();
        config.exchange.api_key_env = "TRIREME_TEST_UNSET_KEY".to_string();
        config.exchange.secret_env = "TRIREME_TEST_UNSET_SECRET".to_string();
        let report = health_check(&config);

        let cred_check = report
            .checks()
            .iter()
            .find(|check| check.name() == "credentials")
            .unwrap();
        assert!(!cred_check.is_healthy());
        // Non-critical: the scan-only path still works
        assert!(report.is_healthy());
    }
}
