use std::path::PathBuf;

pub const ENV_LOG: &str = "CARDVAULT_LOG";
pub const ENV_WORKSPACE: &str = "CARDVAULT_WORKSPACE";
pub const ENV_SEED: &str = "CARDVAULT_SEED";

const DEFAULT_LOG_FILTER: &str = "info";

/// Startup settings. Everything else arrives over IPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarConfig {
    pub log_filter: String,
    /// Workspace opened before the first request, if any.
    pub workspace: Option<PathBuf>,
    pub seed_demo: bool,
}

impl SidecarConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let log_filter = non_empty(ENV_LOG)
            .or_else(|| non_empty("RUST_LOG"))
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        let workspace = non_empty(ENV_WORKSPACE).map(|v| PathBuf::from(v.trim()));
        let seed_demo = non_empty(ENV_SEED)
            .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
            .unwrap_or(true);

        Self {
            log_filter,
            workspace,
            seed_demo,
        }
    }
}
