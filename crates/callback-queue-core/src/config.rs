use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Completion budget applied by `submit` when the caller gives none.
    /// Measured from submission, so it covers queue wait plus execution.
    pub default_task_timeout_secs: u64,

    /// How many times a submission retries against a fresh worker after
    /// racing a concurrent retirement
    pub submit_max_attempts: u32,

    /// Inactivity after which a worker becomes eligible for retirement.
    /// Zero retires workers on the first reaper pass that sees them quiet.
    pub idle_timeout_secs: u64,

    /// How often the reaper scans the registry
    pub reap_interval_secs: u64,

    /// How long the reaper waits for a retired worker to finish its backlog
    pub reap_drain_grace_secs: u64,

    /// Global budget for draining all workers on scheduler shutdown
    pub shutdown_grace_secs: u64,

    /// Extra wait after force-aborting a lane that overran its grace period
    pub shutdown_force_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            default_task_timeout_secs: 60,
            submit_max_attempts: 3,
            idle_timeout_secs: 30 * 60,
            reap_interval_secs: 5 * 60,
            reap_drain_grace_secs: 5,
            shutdown_grace_secs: 30,
            shutdown_force_grace_secs: 1,
        }
    }
}

impl SchedulerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: SchedulerConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.default_task_timeout_secs > 0,
            "default_task_timeout_secs must be positive"
        );
        anyhow::ensure!(
            self.submit_max_attempts > 0,
            "submit_max_attempts must be positive"
        );
        anyhow::ensure!(
            self.reap_interval_secs > 0,
            "reap_interval_secs must be positive"
        );
        Ok(())
    }

    pub fn default_task_timeout(&self) -> Duration {
        Duration::from_secs(self.default_task_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }

    pub fn reap_drain_grace(&self) -> Duration {
        Duration::from_secs(self.reap_drain_grace_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn shutdown_force_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_force_grace_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();

        assert_eq!(config.default_task_timeout_secs, 60);
        assert_eq!(config.submit_max_attempts, 3);
        assert_eq!(config.idle_timeout_secs, 1800);
        assert_eq!(config.reap_interval_secs, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let config = SchedulerConfig {
            submit_max_attempts: 0,
            ..SchedulerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = SchedulerConfig {
            default_task_timeout_secs: 0,
            ..SchedulerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_idle_timeout_is_allowed() {
        let config = SchedulerConfig {
            idle_timeout_secs: 0,
            ..SchedulerConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "default_task_timeout_secs: 30\n\
             submit_max_attempts: 5\n\
             idle_timeout_secs: 600\n\
             reap_interval_secs: 60\n\
             reap_drain_grace_secs: 5\n\
             shutdown_grace_secs: 10\n\
             shutdown_force_grace_secs: 1"
        )
        .unwrap();

        let config = SchedulerConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.default_task_timeout_secs, 30);
        assert_eq!(config.submit_max_attempts, 5);
        assert_eq!(config.idle_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = SchedulerConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: SchedulerConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.idle_timeout_secs, config.idle_timeout_secs);
        assert_eq!(parsed.submit_max_attempts, config.submit_max_attempts);
    }
}
