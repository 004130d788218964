use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use reqwest::Client;
use tracing::{debug, error, info, warn};

use super::backends::{backend_for_profile, BackendError, InvocationRequest, SharedInferenceBackend};
use super::error::{EnhanceError, ErrorKind};
use super::fetcher::{EnhancedImage, FetchScope, ImageFetcher};
use super::params::EnhancementParameters;
use super::resolver::{resolve_result, ResolverPolicy};
use super::retry::RetryPolicy;
use super::temp_store::{TempArtifact, TempStore};
use super::validation::{validate_upload_name, ImageExtension};
use crate::settings::credentials::{Credential, CredentialStore};
use crate::settings::profiles::{BackendProfile, ProfileSet};
use crate::settings::SettingsError;

/// A configured profile together with the adapter that serves it.
#[derive(Clone)]
pub struct BackendBinding {
    pub profile: Arc<BackendProfile>,
    pub backend: SharedInferenceBackend,
    pub resolver: ResolverPolicy,
    pub retry: RetryPolicy,
}

impl BackendBinding {
    pub fn new(profile: BackendProfile, backend: SharedInferenceBackend) -> Self {
        Self {
            resolver: ResolverPolicy::from_profile(&profile),
            retry: RetryPolicy::from_settings(&profile.retry),
            profile: Arc::new(profile),
            backend,
        }
    }

    pub fn from_profile(profile: &BackendProfile, client: Client) -> Self {
        Self::new(profile.clone(), backend_for_profile(profile, client))
    }
}

#[derive(Clone)]
pub struct BackendRegistry {
    default_profile: String,
    bindings: BTreeMap<String, BackendBinding>,
}

impl BackendRegistry {
    /// One adapter per profile, all sharing `client`.
    pub fn from_profiles(set: &ProfileSet, client: &Client) -> Self {
        let bindings = set
            .profiles
            .iter()
            .map(|(name, profile)| (name.clone(), BackendBinding::from_profile(profile, client.clone())))
            .collect();
        Self {
            default_profile: set.default_profile.clone(),
            bindings,
        }
    }

    pub fn from_bindings(
        default_profile: &str,
        bindings: Vec<BackendBinding>,
    ) -> Result<Self, SettingsError> {
        if bindings.is_empty() {
            return Err(SettingsError::NoProfiles);
        }
        let bindings = bindings
            .into_iter()
            .map(|b| (b.profile.name.clone(), b))
            .collect::<BTreeMap<_, _>>();
        if !bindings.contains_key(default_profile) {
            return Err(SettingsError::MissingDefaultProfile(
                default_profile.to_string(),
            ));
        }
        Ok(Self {
            default_profile: default_profile.to_string(),
            bindings,
        })
    }

    pub fn default_profile(&self) -> &str {
        self.default_profile.as_str()
    }

    pub fn profile_names(&self) -> Vec<String> {
        self.bindings.keys().cloned().collect()
    }

    /// A missing or blank name selects the default profile.
    pub fn select(&self, name: Option<&str>) -> Result<&BackendBinding, EnhanceError> {
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(self.default_profile.as_str());
        self.bindings
            .get(name)
            .ok_or_else(|| EnhanceError::unknown_profile(name))
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnhanceRequest {
    pub file_name: Option<String>,
    pub bytes: Vec<u8>,
    pub profile: Option<String>,
    pub fields: HashMap<String, String>,
}

#[derive(Clone)]
pub struct EnhanceService {
    registry: Arc<BackendRegistry>,
    temp_store: TempStore,
    fetcher: ImageFetcher,
    credentials: CredentialStore,
}

impl EnhanceService {
    pub fn new(
        registry: BackendRegistry,
        temp_store: TempStore,
        fetcher: ImageFetcher,
        credentials: CredentialStore,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            temp_store,
            fetcher,
            credentials,
        }
    }

    pub fn registry(&self) -> &BackendRegistry {
        self.registry.as_ref()
    }

    pub fn temp_store(&self) -> &TempStore {
        &self.temp_store
    }

    pub async fn enhance(&self, request: EnhanceRequest) -> Result<EnhancedImage, EnhanceError> {
        let started = Instant::now();
        let profile = request
            .profile
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(self.registry.default_profile())
            .to_string();

        let outcome = self.run(request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(image) => info!(
                profile = %profile,
                bytes = image.bytes.len(),
                source = image.source_kind,
                elapsed_ms,
                "enhancement completed"
            ),
            Err(failure) => log_failure(profile.as_str(), failure, elapsed_ms),
        }
        outcome
    }

    async fn run(&self, request: EnhanceRequest) -> Result<EnhancedImage, EnhanceError> {
        let EnhanceRequest {
            file_name,
            bytes,
            profile,
            fields,
        } = request;

        let extension = validate_upload_name(file_name.as_deref())?;
        if bytes.is_empty() {
            return Err(EnhanceError::validation("Uploaded file is empty"));
        }
        let binding = self.registry.select(profile.as_deref())?;
        let params = EnhancementParameters::resolve(&binding.profile.params, &fields)?;
        let credential = self.credentials.resolve(binding.profile.token_env.as_str())?;

        let artifact = self.temp_store.acquire(bytes.as_slice(), &extension).await?;
        drop(bytes);
        let outcome = self
            .invoke_and_fetch(binding, &artifact, &extension, &params, &credential)
            .await;
        artifact.release().await;
        outcome
    }

    async fn invoke_and_fetch(
        &self,
        binding: &BackendBinding,
        artifact: &TempArtifact,
        extension: &ImageExtension,
        params: &EnhancementParameters,
        credential: &Credential,
    ) -> Result<EnhancedImage, EnhanceError> {
        let profile = binding.profile.as_ref();
        let invocation = InvocationRequest {
            artifact_path: artifact.path(),
            file_name: artifact.file_name(),
            mime: extension.mime(),
            params,
            credential,
        };
        debug!(
            profile = %profile.name,
            protocol = binding.backend.protocol().as_str(),
            artifact = %artifact.file_name(),
            bytes = artifact.size_bytes(),
            params = params.len(),
            "invoking backend"
        );

        let timeout = profile.timeout();
        let attempts = binding.retry.run(profile.name.as_str(), |_| {
            binding.backend.invoke(&invocation)
        });
        let raw = tokio::time::timeout(timeout, attempts)
            .await
            .map_err(|_| BackendError::Timeout(timeout))??;
        debug!(profile = %profile.name, shape = raw.shape(), "backend returned result");

        let reference = resolve_result(&raw, &binding.resolver)?;
        let origin = profile.service_origin();
        let image = self
            .fetcher
            .fetch(
                reference,
                FetchScope {
                    credential: Some(credential),
                    origin: origin.as_ref(),
                    local_root: profile.local_results_dir.as_deref(),
                },
            )
            .await?;
        Ok(image)
    }
}

fn log_failure(profile: &str, failure: &EnhanceError, elapsed_ms: u64) {
    let stage = failure.stage.as_str();
    let kind = failure.kind.as_str();
    match failure.kind {
        ErrorKind::Validation => {
            warn!(profile, stage, kind, detail = %failure.detail, elapsed_ms, "enhancement rejected")
        }
        ErrorKind::Internal => error!(
            profile,
            stage,
            kind,
            cause = failure.cause.as_deref().unwrap_or_default(),
            elapsed_ms,
            "enhancement failed"
        ),
        _ => error!(profile, stage, kind, detail = %failure.detail, elapsed_ms, "enhancement failed"),
    }
}
