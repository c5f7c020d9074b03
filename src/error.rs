/// `error.rs` - error taxonomy for pack loading
///
/// Every fault is fatal for the load that raised it. `LoaderError` is the
/// only type that leaves the public load operations; it carries the stage
/// the load was in so callers can tell a broken archive from a broken
/// script from a rejected tree.
use std::path::PathBuf;

use thiserror::Error;

// ── Stage tag ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStage {
    Reading,
    Executing,
    Building,
}

impl LoadStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reading => "reading",
            Self::Executing => "executing",
            Self::Building => "building",
        }
    }
}

impl std::fmt::Display for LoadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Top level ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("couldn't read entries: {0}")]
    Reading(#[from] ReadError),
    #[error("couldn't load entries: {0}")]
    Executing(#[from] LoadFault),
    #[error("couldn't build pack: {0}")]
    Building(#[from] BuildError),
}

impl LoaderError {
    pub fn stage(&self) -> LoadStage {
        match self {
            Self::Reading(_) => LoadStage::Reading,
            Self::Executing(_) => LoadStage::Executing,
            Self::Building(_) => LoadStage::Building,
        }
    }
}

// ── Reading ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("archive I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("{path}: invalid JSON: {source}")]
    InvalidOptions {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path}: expected a JSON object")]
    OptionsNotObject { path: String },
    #[error("{path}: entry is {size} bytes, limit is {limit}")]
    EntryTooLarge { path: String, size: u64, limit: u64 },
}

// ── Executing ─────────────────────────────────────────────────────────────────

/// A fault raised while feeding one entry through the loader.
#[derive(Debug, Error)]
pub enum LoadFault {
    #[error("{path}: {source}")]
    Script {
        path: String,
        #[source]
        source: ScriptError,
    },
    #[error("{path}: {fault}")]
    Structural { path: String, fault: StructuralFault },
    #[error("{0}")]
    Incomplete(StructuralFault),
}

impl LoadFault {
    pub fn structural(&self) -> Option<&StructuralFault> {
        match self {
            Self::Structural { fault, .. } | Self::Incomplete(fault) => Some(fault),
            Self::Script { .. } => None,
        }
    }

    pub fn script(&self) -> Option<&ScriptError> {
        match self {
            Self::Script { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Ordering, uniqueness and parent-existence violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralFault {
    #[error("pack options were already loaded, duplicate options.json?")]
    DuplicateOptions,
    #[error("pack options found after pack data")]
    OptionsAfterPack,
    #[error("pack data was already loaded, duplicate pack.lua?")]
    DuplicatePack,
    #[error("pack not loaded, missing pack.lua?")]
    PackNotLoaded,
    #[error("duplicate phase {0}")]
    DuplicatePhase(String),
    #[error("phase {0} not loaded, missing phases/{0}.lua?")]
    PhaseNotLoaded(String),
    #[error("duplicate stage {stage} in phase {phase}")]
    DuplicateStage { phase: String, stage: String },
    #[error("stage {stage} not loaded, missing phases/{phase}/{stage}.lua?")]
    StageNotLoaded { phase: String, stage: String },
    #[error("duplicate action {action} in stage {phase}/{stage}")]
    DuplicateAction {
        phase: String,
        stage: String,
        action: String,
    },
    #[error("no pack data found")]
    NoPackData,
}

// ── Scripts ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("compile error in {label}: {message}")]
    Compile { label: String, message: String },
    #[error("runtime error in {label}: {message}")]
    Runtime { label: String, message: String },
    #[error("{label}: script overran resource limits ({budget} instructions)")]
    ResourceLimit { label: String, budget: u32 },
    #[error("{label}: `{scope}` must be a table, got {found}")]
    ScopeNotTable {
        label: String,
        scope: String,
        found: &'static str,
    },
    #[error("interpreter setup failed: {0}")]
    Host(#[from] mlua::Error),
}

impl ScriptError {
    pub fn is_compile(&self) -> bool {
        matches!(self, Self::Compile { .. })
    }

    pub fn is_resource_limit(&self) -> bool {
        matches!(self, Self::ResourceLimit { .. })
    }
}

// ── Building ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
#[error("pack builder rejected the tree: {0}")]
pub struct BuildError(pub String);

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("couldn't read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid loader config: {0}")]
    Parse(#[from] serde_json::Error),
}
