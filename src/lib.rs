pub mod config;
pub mod error;
pub mod loader;
pub mod scripting;

pub use config::LoaderConfig;
pub use error::{LoadStage, LoaderError};
pub use loader::{load_pack, Pack, PackBuilder, PackLoader};
pub use scripting::{ScriptHost, ScriptTable, ScriptValue};
