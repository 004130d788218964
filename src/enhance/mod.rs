pub mod backends;
pub mod error;
pub mod fetcher;
pub mod orchestrator;
pub mod params;
pub mod raw_result;
pub mod resolver;
pub mod retry;
pub mod temp_store;
pub mod validation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EnhanceStage {
    Validate,
    Configure,
    Stage,
    Invoke,
    Resolve,
    Fetch,
}

impl EnhanceStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Configure => "configure",
            Self::Stage => "stage",
            Self::Invoke => "invoke",
            Self::Resolve => "resolve",
            Self::Fetch => "fetch",
        }
    }
}
