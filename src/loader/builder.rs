/// `loader/builder.rs` - hand-off from the raw tree to the finished pack
///
/// Turning script output into domain objects is not the loader's job; a
/// `PackBuilder` receives the completed tree once every entry loaded. The
/// default builder does no validation and just wraps the tree.
use mlua::Lua;

use super::{assembler::RawPack, entry::JsonObject, tree::PackNode};
use crate::error::BuildError;

pub trait PackBuilder {
    fn build(&self, raw: RawPack, runtime: Lua) -> Result<Pack, BuildError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPackBuilder;

impl PackBuilder for DefaultPackBuilder {
    fn build(&self, raw: RawPack, runtime: Lua) -> Result<Pack, BuildError> {
        Ok(Pack {
            options: raw.options,
            root: raw.root,
            _runtime: runtime,
        })
    }
}

/// A fully loaded pack. Holds on to the interpreter so any script
/// functions stored in the tree stay callable.
pub struct Pack {
    pub options: Option<JsonObject>,
    pub root: PackNode,
    _runtime: Lua,
}

impl std::fmt::Debug for Pack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pack")
            .field("options", &self.options)
            .field("phases", &self.phase_names().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Pack {
    pub fn phase_names(&self) -> impl Iterator<Item = &str> {
        self.root.phases.keys().map(String::as_str)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut tree = self.root.to_json();
        if let (Some(options), serde_json::Value::Object(map)) = (&self.options, &mut tree) {
            map.insert("options".into(), serde_json::Value::Object(options.clone()));
        }
        tree
    }
}
