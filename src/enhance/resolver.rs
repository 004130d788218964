use std::path::{Component, Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use thiserror::Error;
use url::Url;

use super::raw_result::RawInferenceResult;
use crate::settings::profiles::BackendProfile;

const MAX_RESULT_DEPTH: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalImageReference {
    Url(Url),
    LocalPath(PathBuf),
    Inline { mime: String, bytes: Vec<u8> },
}

impl CanonicalImageReference {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Url(_) => "url",
            Self::LocalPath(_) => "local_path",
            Self::Inline { .. } => "inline",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Malformed backend result: {details}")]
    MalformedResult { details: String },
}

fn malformed(details: impl Into<String>) -> ResolveError {
    ResolveError::MalformedResult {
        details: details.into(),
    }
}

/// How one backend lays out its results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverPolicy {
    pub result_index: usize,
    pub result_fields: Vec<String>,
    pub relative_base_url: Option<String>,
    /// Only paths under this directory may be read from local disk. Without it a
    /// backend can never name a file on this host.
    pub local_results_dir: Option<PathBuf>,
}

impl Default for ResolverPolicy {
    fn default() -> Self {
        Self {
            result_index: 0,
            result_fields: vec![String::from("url"), String::from("path")],
            relative_base_url: None,
            local_results_dir: None,
        }
    }
}

impl ResolverPolicy {
    pub fn from_profile(profile: &BackendProfile) -> Self {
        Self {
            result_index: profile.result_index,
            result_fields: profile
                .result_fields
                .iter()
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect(),
            relative_base_url: profile.relative_base_url.clone(),
            local_results_dir: profile.local_results_dir.clone(),
        }
    }
}

/// Walks the raw result with a fixed rule order:
/// string, then sequence at `result_index`, then record by `result_fields`.
/// Anything else, or nesting beyond the depth limit, is malformed.
pub fn resolve_result(
    raw: &RawInferenceResult,
    policy: &ResolverPolicy,
) -> Result<CanonicalImageReference, ResolveError> {
    resolve_node(raw, policy, 0)
}

fn resolve_node(
    raw: &RawInferenceResult,
    policy: &ResolverPolicy,
    depth: usize,
) -> Result<CanonicalImageReference, ResolveError> {
    if depth > MAX_RESULT_DEPTH {
        return Err(malformed(format!(
            "result is nested deeper than {MAX_RESULT_DEPTH} levels"
        )));
    }
    match raw {
        RawInferenceResult::Reference(value) => classify_reference(value.as_str(), policy),
        RawInferenceResult::Sequence(items) if items.is_empty() => {
            Err(malformed("backend returned an empty sequence"))
        }
        RawInferenceResult::Sequence(items) => {
            let item = items.get(policy.result_index).ok_or_else(|| {
                malformed(format!(
                    "sequence has {} element(s) but index {} is required",
                    items.len(),
                    policy.result_index
                ))
            })?;
            resolve_node(item, policy, depth + 1)
        }
        RawInferenceResult::Record(fields) => {
            let found = policy.result_fields.iter().find_map(|name| {
                fields
                    .get(name.as_str())
                    .filter(|v| !matches!(v, RawInferenceResult::Scalar(_)))
            });
            match found {
                Some(value) => resolve_node(value, policy, depth + 1),
                None => Err(malformed(format!(
                    "record has none of the expected fields: {}",
                    policy.result_fields.join(", ")
                ))),
            }
        }
        RawInferenceResult::Scalar(kind) => Err(malformed(format!(
            "expected an image reference, got a {} value",
            kind.as_str()
        ))),
    }
}

fn classify_reference(
    value: &str,
    policy: &ResolverPolicy,
) -> Result<CanonicalImageReference, ResolveError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(malformed("backend returned an empty reference"));
    }
    if let Some(rest) = value.strip_prefix("data:") {
        return decode_data_uri(rest);
    }
    if value.starts_with("file://") {
        let path = Url::parse(value)
            .ok()
            .and_then(|url| url.to_file_path().ok())
            .ok_or_else(|| malformed("file reference is not a valid local path"))?;
        return local_reference(path, policy);
    }
    if value.starts_with('/') {
        return match policy.relative_base_url.as_deref() {
            Some(base) => {
                let joined = format!("{}{}", base.trim_end_matches('/'), value);
                Url::parse(joined.as_str())
                    .map(CanonicalImageReference::Url)
                    .map_err(|error| malformed(format!("relative reference did not form a URL: {error}")))
            }
            None => local_reference(PathBuf::from(value), policy),
        };
    }
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(CanonicalImageReference::Url(url)),
        Ok(url) => Err(malformed(format!(
            "unsupported reference scheme '{}'",
            url.scheme()
        ))),
        Err(_) => Err(malformed("reference is neither a URL, a path nor a data URI")),
    }
}

fn local_reference(
    path: PathBuf,
    policy: &ResolverPolicy,
) -> Result<CanonicalImageReference, ResolveError> {
    let Some(root) = policy.local_results_dir.as_deref() else {
        return Err(malformed(
            "backend returned a local path but this backend has no local results directory",
        ));
    };
    if !is_contained(path.as_path(), root) {
        return Err(malformed(format!(
            "local path is outside the results directory {}",
            root.display()
        )));
    }
    Ok(CanonicalImageReference::LocalPath(path))
}

/// Lexical check only; the fetcher re-checks after resolving symlinks.
fn is_contained(path: &Path, root: &Path) -> bool {
    path.is_absolute()
        && !path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::CurDir))
        && path.starts_with(root)
        && path != root
}

fn decode_data_uri(rest: &str) -> Result<CanonicalImageReference, ResolveError> {
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| malformed("data URI has no payload"))?;
    let mut parts = header.split(';');
    let mime = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
    if !mime.starts_with("image/") {
        return Err(malformed(format!("data URI is not an image (got '{mime}')")));
    }
    if !parts.any(|p| p.trim().eq_ignore_ascii_case("base64")) {
        return Err(malformed("data URI must be base64 encoded"));
    }
    let compact = payload
        .chars()
        .filter(|ch| !ch.is_ascii_whitespace())
        .collect::<String>();
    let bytes = BASE64_STANDARD
        .decode(compact.as_bytes())
        .map_err(|error| malformed(format!("data URI payload is not valid base64: {error}")))?;
    if bytes.is_empty() {
        return Err(malformed("data URI payload is empty"));
    }
    Ok(CanonicalImageReference::Inline { mime, bytes })
}
