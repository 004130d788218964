pub mod credentials;
pub mod dotenv;
pub mod profiles;

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use self::profiles::ProfileSet;

pub const DEFAULT_BIND: &str = "127.0.0.1:8000";
pub const DEFAULT_SERVICE_NAME: &str = "Image enhancement proxy";
pub const DEFAULT_BACKENDS_FILE: &str = "config/backends.toml";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;
const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 64 * 1024 * 1024;
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read backend settings '{path}': {message}")]
    ReadFile { path: String, message: String },
    #[error("failed to parse backend settings TOML '{path}': {message}")]
    ParseToml { path: String, message: String },
    #[error("backend profile '{profile}' is invalid: {message}")]
    InvalidProfile { profile: String, message: String },
    #[error("default backend profile '{0}' is not defined")]
    MissingDefaultProfile(String),
    #[error("'default_profile' is required when more than one profile is configured")]
    DefaultProfileRequired,
    #[error("no backend profiles are configured")]
    NoProfiles,
    #[error("environment variable {name} is invalid: {message}")]
    InvalidEnv { name: String, message: String },
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    pub bind: String,
    pub service_name: String,
    pub backends_file: Option<PathBuf>,
    pub temp_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub max_download_bytes: u64,
    pub download_timeout: Duration,
    pub dotenv_path: PathBuf,
    pub cors_allow_all: bool,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            backends_file: None,
            temp_dir: std::env::temp_dir().join("enhance-uploads"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            max_download_bytes: DEFAULT_MAX_DOWNLOAD_BYTES,
            download_timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            dotenv_path: PathBuf::from(".env"),
            cors_allow_all: true,
        }
    }
}

impl ServiceSettings {
    pub fn from_env() -> Result<Self, SettingsError> {
        let mut settings = Self::from_lookup(|name| std::env::var(name).ok())?;
        if settings.backends_file.is_none() && Path::new(DEFAULT_BACKENDS_FILE).is_file() {
            settings.backends_file = Some(PathBuf::from(DEFAULT_BACKENDS_FILE));
        }
        Ok(settings)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let read = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        Ok(Self {
            bind: read("ENHANCE_BIND").unwrap_or(defaults.bind),
            service_name: read("ENHANCE_SERVICE_NAME").unwrap_or(defaults.service_name),
            backends_file: read("ENHANCE_BACKENDS_FILE").map(PathBuf::from),
            temp_dir: read("ENHANCE_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_dir),
            max_upload_bytes: parse_env_number(
                "ENHANCE_MAX_UPLOAD_BYTES",
                read("ENHANCE_MAX_UPLOAD_BYTES"),
            )?
            .unwrap_or(defaults.max_upload_bytes),
            max_download_bytes: parse_env_number(
                "ENHANCE_MAX_DOWNLOAD_BYTES",
                read("ENHANCE_MAX_DOWNLOAD_BYTES"),
            )?
            .unwrap_or(defaults.max_download_bytes),
            download_timeout: parse_env_number::<u64>(
                "ENHANCE_DOWNLOAD_TIMEOUT_SECS",
                read("ENHANCE_DOWNLOAD_TIMEOUT_SECS"),
            )?
            .map(Duration::from_secs)
            .unwrap_or(defaults.download_timeout),
            dotenv_path: read("ENHANCE_DOTENV_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.dotenv_path),
            cors_allow_all: match read("ENHANCE_CORS_ALLOW_ALL") {
                Some(raw) => crate::enhance::params::parse_bool_flag(raw.as_str()).ok_or_else(
                    || SettingsError::InvalidEnv {
                        name: String::from("ENHANCE_CORS_ALLOW_ALL"),
                        message: format!("expected a boolean, got '{raw}'"),
                    },
                )?,
                None => defaults.cors_allow_all,
            },
        })
    }

    pub fn load_profiles(&self) -> Result<ProfileSet, SettingsError> {
        match self.backends_file.as_deref() {
            Some(path) => ProfileSet::load(path),
            None => Ok(ProfileSet::builtin()),
        }
    }
}

fn parse_env_number<T>(name: &str, raw: Option<String>) -> Result<Option<T>, SettingsError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value = raw.parse::<T>().map_err(|error| SettingsError::InvalidEnv {
        name: name.to_string(),
        message: error.to_string(),
    })?;
    if value <= T::default() {
        return Err(SettingsError::InvalidEnv {
            name: name.to_string(),
            message: String::from("must be greater than zero"),
        });
    }
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let settings = ServiceSettings::from_lookup(|_| None).expect("defaults should load");
        assert_eq!(settings, ServiceSettings::default());
        assert_eq!(settings.bind, "127.0.0.1:8000");
        assert!(settings.cors_allow_all);
    }

    #[test]
    fn environment_overrides_are_parsed() {
        let settings = ServiceSettings::from_lookup(lookup_from(&[
            ("ENHANCE_BIND", "0.0.0.0:9100"),
            ("ENHANCE_SERVICE_NAME", "Photo restorer"),
            ("ENHANCE_BACKENDS_FILE", "/etc/enhance/backends.toml"),
            ("ENHANCE_MAX_UPLOAD_BYTES", "1048576"),
            ("ENHANCE_DOWNLOAD_TIMEOUT_SECS", "5"),
            ("ENHANCE_CORS_ALLOW_ALL", "off"),
            ("ENHANCE_TEMP_DIR", "  "),
        ]))
        .expect("overrides should load");

        assert_eq!(settings.bind, "0.0.0.0:9100");
        assert_eq!(settings.service_name, "Photo restorer");
        assert_eq!(
            settings.backends_file,
            Some(PathBuf::from("/etc/enhance/backends.toml"))
        );
        assert_eq!(settings.max_upload_bytes, 1_048_576);
        assert_eq!(settings.download_timeout, Duration::from_secs(5));
        assert!(!settings.cors_allow_all);
        assert_eq!(settings.temp_dir, ServiceSettings::default().temp_dir);
    }

    #[test]
    fn invalid_numbers_are_reported_with_variable_name() {
        let err = ServiceSettings::from_lookup(lookup_from(&[(
            "ENHANCE_MAX_DOWNLOAD_BYTES",
            "lots",
        )]))
        .expect_err("non-numeric value must fail");
        assert!(err.to_string().contains("ENHANCE_MAX_DOWNLOAD_BYTES"));

        let err = ServiceSettings::from_lookup(lookup_from(&[(
            "ENHANCE_DOWNLOAD_TIMEOUT_SECS",
            "0",
        )]))
        .expect_err("zero must fail");
        assert!(err.to_string().contains("greater than zero"));
    }

    #[test]
    fn builtin_profiles_are_used_without_a_backends_file() {
        let settings = ServiceSettings::default();
        let set = settings.load_profiles().expect("builtin profiles");
        assert_eq!(set.default_profile, profiles::BUILTIN_PROFILE_NAME);
    }
}
