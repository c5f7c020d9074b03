/// `scripting/` - sandboxed Lua execution
///
/// One privileged interpreter per `ScriptHost` compiles every chunk; each
/// script runs in its own `Sandbox` environment under an optional
/// instruction budget. Data crossing from one script to the next is
/// snapshotted on the host side and re-exposed as frozen views.
pub mod engine;
pub mod freeze;
pub mod metatables;
pub mod sandbox;
pub mod value;

pub use engine::{CancelToken, RESOURCE_LIMIT_MESSAGE};
pub use sandbox::{Sandbox, ScriptHost, STRIPPED_GLOBALS};
pub use value::{FrozenTable, ScriptTable, ScriptValue, TableKey};
