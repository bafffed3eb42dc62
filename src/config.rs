use clap::Parser;
use std::path::PathBuf;
use thiserror::Error;

/// Fragments of the sample `.env` values that were never replaced
const PLACEHOLDERS: [&str; 4] = [
    "your-project",
    "your-anon-key",
    "your_supabase",
    "example.supabase",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} still holds a placeholder value")]
    Placeholder(&'static str),
    #[error("{0} is set but {1} is missing")]
    Incomplete(&'static str, &'static str),
    #[error("{0} must be an http(s) URL")]
    InvalidUrl(&'static str),
}

/// Server settings, read from flags with environment fallbacks
#[derive(Debug, Clone, Parser)]
#[command(name = "maintenance-server", version, about = "Seasonal maintenance tracker API")]
pub struct Config {
    /// Base URL of the hosted service
    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: Option<String>,

    /// Public (anon) API key of the hosted service
    #[arg(long, env = "SUPABASE_ANON_KEY", hide_env_values = true)]
    pub supabase_key: Option<String>,

    /// Directory of the local store, used when no hosted service is configured
    #[arg(long, env = "MAINTENANCE_DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Project copied by "create project"
    #[arg(long, env = "TEMPLATE_PROJECT_ID", default_value_t = 1)]
    pub template_project_id: i64,

    /// Directory of a built frontend to serve at `/`
    #[arg(long, env = "STATIC_DIR")]
    pub static_dir: Option<PathBuf>,
}

/// Where the data lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendChoice {
    Hosted { url: String, key: String },
    Local { data_dir: PathBuf },
}

impl Config {
    /// Load `.env`, then parse the command line
    ///
    /// The `VITE_` prefixed names used by the browser build are accepted when
    /// the plain names are absent.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        Config::parse().with_vite_fallbacks()
    }

    /// Settings for a local store rooted at `data_dir`
    pub fn local(data_dir: impl Into<PathBuf>) -> Self {
        Config {
            supabase_url: None,
            supabase_key: None,
            data_dir: data_dir.into(),
            host: "127.0.0.1".to_string(),
            port: 3000,
            template_project_id: 1,
            static_dir: None,
        }
    }

    /// Fill unset service settings from the `VITE_` prefixed variables
    pub fn with_vite_fallbacks(mut self) -> Self {
        if self.supabase_url.is_none() {
            self.supabase_url = std::env::var("VITE_SUPABASE_URL").ok();
        }
        if self.supabase_key.is_none() {
            self.supabase_key = std::env::var("VITE_SUPABASE_ANON_KEY").ok();
        }
        self
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check the hosted-service settings and decide which backend to use
    ///
    /// # Returns
    /// * `Result<BackendChoice, ConfigError>` - Hosted when both URL and key are set,
    ///   local when neither is
    ///
    /// # Errors
    /// * `ConfigError::Incomplete` when only one of the two is set
    /// * `ConfigError::Placeholder` when a sample value was left in place
    pub fn validate(&self) -> Result<BackendChoice, ConfigError> {
        let url = non_blank(self.supabase_url.as_deref());
        let key = non_blank(self.supabase_key.as_deref());

        match (url, key) {
            (None, None) => Ok(BackendChoice::Local {
                data_dir: self.data_dir.clone(),
            }),
            (Some(_), None) => Err(ConfigError::Incomplete(
                "SUPABASE_URL",
                "SUPABASE_ANON_KEY",
            )),
            (None, Some(_)) => Err(ConfigError::Incomplete(
                "SUPABASE_ANON_KEY",
                "SUPABASE_URL",
            )),
            (Some(url), Some(key)) => {
                if is_placeholder(url) {
                    return Err(ConfigError::Placeholder("SUPABASE_URL"));
                }
                if is_placeholder(key) {
                    return Err(ConfigError::Placeholder("SUPABASE_ANON_KEY"));
                }
                if !(url.starts_with("https://") || url.starts_with("http://")) {
                    return Err(ConfigError::InvalidUrl("SUPABASE_URL"));
                }
                Ok(BackendChoice::Hosted {
                    url: url.to_string(),
                    key: key.to_string(),
                })
            }
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

fn is_placeholder(value: &str) -> bool {
    let lower = value.to_lowercase();
    PLACEHOLDERS.iter().any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosted(url: &str, key: &str) -> Config {
        let mut config = Config::local("data");
        config.supabase_url = Some(url.to_string());
        config.supabase_key = Some(key.to_string());
        config
    }

    #[test]
    fn no_service_means_local_store() {
        assert_eq!(
            Config::local("/tmp/store").validate(),
            Ok(BackendChoice::Local {
                data_dir: PathBuf::from("/tmp/store")
            })
        );
    }

    #[test]
    fn placeholders_are_reported() {
        assert_eq!(
            hosted("https://your-project.supabase.co", "abc").validate(),
            Err(ConfigError::Placeholder("SUPABASE_URL"))
        );
        assert_eq!(
            hosted("https://real.supabase.co", "your-anon-key").validate(),
            Err(ConfigError::Placeholder("SUPABASE_ANON_KEY"))
        );
    }

    #[test]
    fn half_configured_service_is_rejected() {
        let mut config = Config::local("data");
        config.supabase_url = Some("https://real.supabase.co".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Incomplete("SUPABASE_URL", _))
        ));
        assert_eq!(
            hosted("real.supabase.co", "k").validate(),
            Err(ConfigError::InvalidUrl("SUPABASE_URL"))
        );
    }

    #[test]
    fn flags_parse() {
        let config = Config::try_parse_from([
            "maintenance-server",
            "--port",
            "8080",
            "--template-project-id",
            "7",
            "--data-dir",
            "/srv/maintenance",
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.template_project_id, 7);
        assert_eq!(config.data_dir, PathBuf::from("/srv/maintenance"));
    }
}
