use std::path::Path;

use dynacheck::{CheckDefinition, EngineConfig};
use serde::Deserialize;

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};

/// Prefix of the environment variables overriding the configuration file
pub const ENV_PREFIX: &str = "DYNACHECK_";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub checks: Vec<CheckDefinition>,
}

impl Config {
    /// The YAML file at `path`, overridden by `DYNACHECK_` variables. Nested keys are separated
    /// by a double underscore, eg `DYNACHECK_ENGINE__TIMEOUT=10`.
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use figment::Jail;

    use super::*;

    #[test]
    fn yaml_with_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "dynacheck.yaml",
                r#"
engine:
  timeout: 10
  max_concurrency: 8
checks:
  - id: team1-mail
    name: Team 1 mail
    group: team1
    type: imap
    definition:
      Host: 10.0.1.25
      Username: scorer
      Password: hunter2
  - id: team1-web
    name: Team 1 web
    group: team1
    score_weight: 2
    type: http
    timeout: 2.5
    definition:
      Host: 10.0.1.80
      Port: "8080"
"#,
            )?;
            jail.set_env("DYNACHECK_ENGINE__GRACE", "1.5");

            let config: Config = Config::figment("dynacheck.yaml").extract()?;

            assert_eq!(config.engine.timeout, Duration::from_secs(10));
            assert_eq!(config.engine.grace, Duration::from_millis(1500));
            assert_eq!(config.engine.max_concurrency, 8);
            assert_eq!(config.checks.len(), 2);
            assert_eq!(config.checks[0].score_weight, 1.0);
            assert_eq!(config.checks[1].score_weight, 2.0);
            assert_eq!(config.checks[1].timeout, Some(Duration::from_millis(2500)));
            Ok(())
        });
    }

    #[test]
    fn missing_file_gives_defaults() {
        Jail::expect_with(|_jail| {
            let config: Config = Config::figment("absent.yaml").extract()?;

            assert_eq!(config.engine, EngineConfig::default());
            assert!(config.checks.is_empty());
            Ok(())
        });
    }
}
