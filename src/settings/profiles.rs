use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use super::SettingsError;
use crate::enhance::params::{ParamKind, ParamSpec};

pub const BUILTIN_PROFILE_NAME: &str = "tile-upscaler";

const MAX_RETRY_ATTEMPTS: u32 = 10;
const MIN_POLL_INTERVAL_MS: u64 = 10;
const RESERVED_FIELD_NAMES: [&str; 2] = ["file", "profile"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendProtocol {
    GradioCall,
    GradioQueue,
    DirectHttp,
}

impl BackendProtocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GradioCall => "gradio_call",
            Self::GradioQueue => "gradio_queue",
            Self::DirectHttp => "direct_http",
        }
    }

    fn is_gradio(self) -> bool {
        matches!(self, Self::GradioCall | Self::GradioQueue)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackendProfile {
    #[serde(default)]
    pub name: String,
    pub protocol: BackendProtocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_name: Option<String>,
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub result_index: usize,
    #[serde(default = "default_result_fields")]
    pub result_fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_results_dir: Option<PathBuf>,
    #[serde(default = "default_image_field")]
    pub image_field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_key: Option<String>,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
}

impl BackendProfile {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Origin of the service the profile talks to, used to scope credential forwarding.
    pub fn service_origin(&self) -> Option<url::Origin> {
        let raw = match self.protocol {
            BackendProtocol::DirectHttp => self.endpoint.as_deref(),
            _ => self.base_url.as_deref(),
        }?;
        Url::parse(raw).ok().map(|url| url.origin())
    }

    fn validate(&self) -> Result<(), SettingsError> {
        let invalid = |message: String| SettingsError::InvalidProfile {
            profile: self.name.clone(),
            message,
        };

        if !is_valid_profile_name(self.name.as_str()) {
            return Err(invalid(String::from(
                "profile names may only contain lowercase letters, digits, '-' and '_'",
            )));
        }
        if self.protocol.is_gradio() {
            let base_url = self
                .base_url
                .as_deref()
                .ok_or_else(|| invalid(String::from("field 'base_url' is required")))?;
            parse_http_url(base_url).map_err(|m| invalid(format!("base_url {m}")))?;
            let api_name = self
                .api_name
                .as_deref()
                .ok_or_else(|| invalid(String::from("field 'api_name' is required")))?;
            if !api_name.starts_with('/') || api_name.len() < 2 {
                return Err(invalid(String::from(
                    "field 'api_name' must look like '/predict'",
                )));
            }
            if !self.api_prefix.is_empty()
                && (!self.api_prefix.starts_with('/') || self.api_prefix.ends_with('/'))
            {
                return Err(invalid(String::from(
                    "field 'api_prefix' must be empty or start with '/' without a trailing '/'",
                )));
            }
        } else {
            let endpoint = self
                .endpoint
                .as_deref()
                .ok_or_else(|| invalid(String::from("field 'endpoint' is required")))?;
            parse_http_url(endpoint).map_err(|m| invalid(format!("endpoint {m}")))?;
            if self.image_field.trim().is_empty() {
                return Err(invalid(String::from("field 'image_field' must not be empty")));
            }
        }
        if let Some(base) = self.relative_base_url.as_deref() {
            parse_http_url(base).map_err(|m| invalid(format!("relative_base_url {m}")))?;
        }
        if let Some(dir) = self.local_results_dir.as_deref() {
            if !dir.is_absolute() || dir.parent().is_none() {
                return Err(invalid(String::from(
                    "field 'local_results_dir' must be an absolute directory other than '/'",
                )));
            }
        }
        if self.token_env.trim().is_empty() {
            return Err(invalid(String::from("field 'token_env' must not be empty")));
        }
        if self.timeout_secs == 0 {
            return Err(invalid(String::from("field 'timeout_secs' must be at least 1")));
        }
        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            return Err(invalid(format!(
                "field 'poll_interval_ms' must be at least {MIN_POLL_INTERVAL_MS}"
            )));
        }
        if self.result_fields.iter().all(|f| f.trim().is_empty()) {
            return Err(invalid(String::from(
                "field 'result_fields' must name at least one field",
            )));
        }
        if self.retry.max_attempts == 0 || self.retry.max_attempts > MAX_RETRY_ATTEMPTS {
            return Err(invalid(format!(
                "field 'retry.max_attempts' must be between 1 and {MAX_RETRY_ATTEMPTS}"
            )));
        }

        let mut seen = BTreeSet::new();
        for param in &self.params {
            let name = param.name.trim();
            if name.is_empty() || RESERVED_FIELD_NAMES.contains(&name) {
                return Err(invalid(format!("parameter name '{name}' is not allowed")));
            }
            if !seen.insert(name.to_string()) {
                return Err(invalid(format!("duplicate parameter '{name}'")));
            }
            if let (Some(min), Some(max)) = (param.min, param.max) {
                if min > max {
                    return Err(invalid(format!("parameter '{name}' has min greater than max")));
                }
            }
            param
                .default_value()
                .map_err(|error| invalid(error.to_string()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileSet {
    pub default_profile: String,
    pub profiles: BTreeMap<String, BackendProfile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProfileFile {
    #[serde(default)]
    default_profile: Option<String>,
    #[serde(default)]
    profiles: BTreeMap<String, BackendProfile>,
}

impl ProfileSet {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = fs::read_to_string(path).map_err(|error| SettingsError::ReadFile {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;
        Self::from_toml_str(raw.as_str(), path.display().to_string().as_str())
    }

    pub fn from_toml_str(raw: &str, origin: &str) -> Result<Self, SettingsError> {
        let parsed =
            toml::from_str::<ProfileFile>(raw).map_err(|error| SettingsError::ParseToml {
                path: origin.to_string(),
                message: error.to_string(),
            })?;
        let mut profiles = parsed.profiles;
        for (name, profile) in profiles.iter_mut() {
            profile.name = name.clone();
        }
        let default_profile = match parsed.default_profile {
            Some(name) => name,
            None if profiles.len() == 1 => profiles.keys().next().cloned().unwrap_or_default(),
            None if profiles.is_empty() => return Err(SettingsError::NoProfiles),
            None => return Err(SettingsError::DefaultProfileRequired),
        };
        let set = Self {
            default_profile,
            profiles,
        };
        set.validate()?;
        Ok(set)
    }

    /// The Tile-Upscaler Space the service was first written against.
    pub fn builtin() -> Self {
        let base_url = "https://gokaygokay-tile-upscaler.hf.space";
        let profile = BackendProfile {
            name: BUILTIN_PROFILE_NAME.to_string(),
            protocol: BackendProtocol::GradioCall,
            base_url: Some(base_url.to_string()),
            endpoint: None,
            api_name: Some(String::from("/wrapper")),
            api_prefix: default_api_prefix(),
            token_env: default_token_env(),
            timeout_secs: default_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            result_index: 0,
            result_fields: default_result_fields(),
            relative_base_url: Some(format!("{base_url}/gradio_api/file=")),
            local_results_dir: None,
            image_field: default_image_field(),
            input_key: None,
            retry: RetrySettings::default(),
            params: vec![
                builtin_param("resolution", ParamKind::Int, json!(512), Some((256.0, 2048.0))),
                builtin_param("num_inference_steps", ParamKind::Int, json!(20), Some((1.0, 50.0))),
                builtin_param("strength", ParamKind::Float, json!(0.4), Some((0.0, 1.0))),
                builtin_param("hdr", ParamKind::Float, json!(0), Some((0.0, 1.0))),
                builtin_param("guidance_scale", ParamKind::Float, json!(3), Some((0.0, 20.0))),
            ],
        };
        Self {
            default_profile: BUILTIN_PROFILE_NAME.to_string(),
            profiles: BTreeMap::from([(BUILTIN_PROFILE_NAME.to_string(), profile)]),
        }
    }

    pub fn get(&self, name: &str) -> Option<&BackendProfile> {
        self.profiles.get(name)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.profiles.is_empty() {
            return Err(SettingsError::NoProfiles);
        }
        if !self.profiles.contains_key(self.default_profile.as_str()) {
            return Err(SettingsError::MissingDefaultProfile(
                self.default_profile.clone(),
            ));
        }
        for profile in self.profiles.values() {
            profile.validate()?;
        }
        Ok(())
    }
}

fn builtin_param(
    name: &str,
    kind: ParamKind,
    default: serde_json::Value,
    range: Option<(f64, f64)>,
) -> ParamSpec {
    ParamSpec {
        name: name.to_string(),
        kind,
        default,
        min: range.map(|(min, _)| min),
        max: range.map(|(_, max)| max),
        choices: None,
        description: None,
    }
}

fn is_valid_profile_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')
}

fn parse_http_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|error| format!("is not a valid URL: {error}"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(String::from("must use http or https"));
    }
    Ok(url)
}

fn default_api_prefix() -> String {
    String::from("/gradio_api")
}

fn default_token_env() -> String {
    String::from("HF_TOKEN")
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_result_fields() -> Vec<String> {
    vec![String::from("url"), String::from("path")]
}

fn default_image_field() -> String {
    String::from("image")
}

fn default_max_attempts() -> u32 {
    2
}

fn default_backoff_ms() -> u64 {
    250
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
        default_profile = "codeformer"

        [profiles.codeformer]
        protocol = "gradio_queue"
        base_url = "https://sczhou-codeformer.hf.space"
        api_name = "/inference"
        timeout_secs = 120
        result_index = 0

        [[profiles.codeformer.params]]
        name = "face_align"
        kind = "bool"
        default = true

        [[profiles.codeformer.params]]
        name = "codeformer_fidelity"
        kind = "float"
        default = 0.5
        min = 0.0
        max = 1.0

        [profiles.gfpgan]
        protocol = "direct_http"
        endpoint = "https://api.example.test/v1/restore"
        token_env = "RESTORE_API_TOKEN"
        input_key = "input"
        result_fields = ["output"]

        [profiles.gfpgan.retry]
        max_attempts = 3
    "#;

    #[test]
    fn parses_profiles_with_defaults_applied() {
        let set = ProfileSet::from_toml_str(SAMPLE, "inline").expect("sample should parse");
        assert_eq!(set.default_profile, "codeformer");
        assert_eq!(
            set.profiles.keys().cloned().collect::<Vec<_>>(),
            vec![String::from("codeformer"), String::from("gfpgan")]
        );

        let codeformer = set.get("codeformer").expect("codeformer profile");
        assert_eq!(codeformer.name, "codeformer");
        assert_eq!(codeformer.protocol, BackendProtocol::GradioQueue);
        assert_eq!(codeformer.api_prefix, "/gradio_api");
        assert_eq!(codeformer.token_env, "HF_TOKEN");
        assert_eq!(codeformer.timeout(), Duration::from_secs(120));
        assert_eq!(codeformer.params.len(), 2);
        assert_eq!(codeformer.retry, RetrySettings::default());

        let gfpgan = set.get("gfpgan").expect("gfpgan profile");
        assert_eq!(gfpgan.timeout_secs, 300);
        assert_eq!(gfpgan.result_fields, vec![String::from("output")]);
        assert_eq!(gfpgan.retry.max_attempts, 3);
        assert_eq!(gfpgan.retry.backoff_ms, 250);
        assert_eq!(
            gfpgan.service_origin(),
            Url::parse("https://api.example.test")
                .ok()
                .map(|u| u.origin())
        );
    }

    #[test]
    fn builtin_profile_is_valid_and_matches_source_defaults() {
        let set = ProfileSet::builtin();
        set.validate().expect("builtin profile should validate");
        let profile = set.get(BUILTIN_PROFILE_NAME).expect("builtin profile");
        assert_eq!(profile.api_name.as_deref(), Some("/wrapper"));
        let defaults = profile
            .params
            .iter()
            .map(|p| p.default.clone())
            .collect::<Vec<_>>();
        assert_eq!(
            defaults,
            vec![json!(512), json!(20), json!(0.4), json!(0), json!(3)]
        );
    }

    #[test]
    fn single_profile_becomes_default_implicitly() {
        let set = ProfileSet::from_toml_str(
            r#"
                [profiles.only]
                protocol = "direct_http"
                endpoint = "http://127.0.0.1:9000/enhance"
            "#,
            "inline",
        )
        .expect("single profile should parse");
        assert_eq!(set.default_profile, "only");
    }

    #[test]
    fn rejects_missing_default_and_unknown_fields() {
        let err = ProfileSet::from_toml_str(
            r#"
                default_profile = "absent"
                [profiles.only]
                protocol = "direct_http"
                endpoint = "http://127.0.0.1:9000/enhance"
            "#,
            "inline",
        )
        .expect_err("default must exist");
        assert!(matches!(err, SettingsError::MissingDefaultProfile(name) if name == "absent"));

        let err = ProfileSet::from_toml_str(
            r#"
                [profiles.only]
                protocol = "direct_http"
                endpoint = "http://127.0.0.1:9000/enhance"
                surprise = 1
            "#,
            "inline",
        )
        .expect_err("unknown fields must fail");
        assert!(matches!(err, SettingsError::ParseToml { .. }));
    }

    #[test]
    fn rejects_invalid_profile_shapes() {
        let cases = [
            (
                r#"
                    [profiles.a]
                    protocol = "gradio_call"
                    api_name = "/predict"
                "#,
                "field 'base_url' is required",
            ),
            (
                r#"
                    [profiles.a]
                    protocol = "gradio_call"
                    base_url = "ftp://example.test"
                    api_name = "/predict"
                "#,
                "must use http or https",
            ),
            (
                r#"
                    [profiles.a]
                    protocol = "gradio_queue"
                    base_url = "https://example.test"
                    api_name = "predict"
                "#,
                "api_name",
            ),
            (
                r#"
                    [profiles.a]
                    protocol = "direct_http"
                    endpoint = "https://example.test"
                    timeout_secs = 0
                "#,
                "timeout_secs",
            ),
            (
                r#"
                    [profiles.a]
                    protocol = "direct_http"
                    endpoint = "https://example.test"
                    [[profiles.a.params]]
                    name = "scale"
                    kind = "int"
                    default = 8
                    max = 4
                "#,
                "invalid default",
            ),
            (
                r#"
                    [profiles.a]
                    protocol = "direct_http"
                    endpoint = "https://example.test"
                    [[profiles.a.params]]
                    name = "file"
                    kind = "string"
                    default = "x"
                "#,
                "not allowed",
            ),
            (
                r#"
                    [profiles.a]
                    protocol = "direct_http"
                    endpoint = "https://example.test"
                    local_results_dir = "results"
                "#,
                "local_results_dir",
            ),
            (
                r#"
                    [profiles.a]
                    protocol = "direct_http"
                    endpoint = "https://example.test"
                    local_results_dir = "/"
                "#,
                "local_results_dir",
            ),
        ];

        for (raw, expected) in cases {
            let err = ProfileSet::from_toml_str(raw, "inline").expect_err("case should fail");
            assert!(
                err.to_string().contains(expected),
                "expected '{expected}' in '{err}'"
            );
        }
    }
}
