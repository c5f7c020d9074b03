/// `scripting/sandbox.rs` - restricted script environments
///
/// `ScriptHost` owns the privileged interpreter: it compiles every chunk
/// and is never visible to scripts. Each `Sandbox` is a fresh environment
/// table assembled from an allow-list of base functions plus frozen views
/// of the string, table and math libraries. Filesystem, process, dynamic
/// code loading, garbage control, coroutines and output are simply never
/// copied in.
use mlua::{Function, Lua, LuaOptions, StdLib, Table, Value};

use super::{
    engine::CancelToken,
    freeze::Freezer,
    metatables::freeze_primitive_metatables,
    value::{FrozenTable, ScriptTable},
};
use crate::error::ScriptError;

/// Base functions copied into every sandbox as-is.
const BASE_ALLOWED: &[&str] = &[
    "assert",
    "error",
    "ipairs",
    "pairs",
    "select",
    "tonumber",
    "tostring",
    "type",
    "getmetatable",
    "setmetatable",
    "rawequal",
    "_VERSION",
];

/// Names no sandbox may resolve unless a caller binds them explicitly.
pub const STRIPPED_GLOBALS: &[&str] = &[
    "collectgarbage",
    "dofile",
    "loadfile",
    "load",
    "loadstring",
    "print",
    "require",
    "package",
    "io",
    "os",
    "debug",
    "coroutine",
    "utf8",
    "rawset",
    "warn",
];

/// Default instruction budget for one-off `ScriptHost::execute` calls.
pub const DEFAULT_ONE_OFF_BUDGET: u32 = 200;

/// Re-raises the resource fault after a protected call once the running
/// script's budget has tripped, so `pcall` cannot keep a runaway loop
/// alive. `tripped` reads the host's run token, not a per-sandbox one:
/// a function defined by one script may run under another script's budget.
const PROTECTED_CALL_GUARD: &str = r#"
local raw, tripped, message = ...
local pack, unpack = table.pack, table.unpack
return function(...)
    local results = pack(raw(...))
    if tripped() then
        error(message, 0)
    end
    return unpack(results, 1, results.n)
end
"#;

// ── ScriptHost ────────────────────────────────────────────────────────────────

/// One script runs at a time per host; `run_token` belongs to whichever
/// `Sandbox::execute` is currently running.
pub struct ScriptHost {
    lua: Lua,
    freezer: Freezer,
    base: Vec<(&'static str, Value)>,
    libraries: [(&'static str, Table); 3],
    pcall: Function,
    xpcall: Function,
    run_token: CancelToken,
}

impl ScriptHost {
    pub fn new() -> Result<Self, ScriptError> {
        Self::with_memory_limit(None)
    }

    pub fn with_memory_limit(limit: Option<usize>) -> Result<Self, ScriptError> {
        // SAFETY: the debug library is only reachable through the handle
        // captured below; it is removed from the interpreter's globals before
        // any untrusted chunk is compiled, and sandboxes never see it.
        let lua = unsafe {
            Lua::unsafe_new_with(
                StdLib::STRING | StdLib::TABLE | StdLib::MATH | StdLib::DEBUG,
                LuaOptions::new(),
            )
        };
        if let Some(bytes) = limit {
            lua.set_memory_limit(bytes)?;
        }

        let globals = lua.globals();
        let debug: Table = globals.get("debug")?;
        globals.raw_set("debug", Value::Nil)?;

        let freezer = Freezer::new(&lua, globals.get("next")?)?;

        let mut base = Vec::with_capacity(BASE_ALLOWED.len());
        for name in BASE_ALLOWED {
            base.push((*name, globals.get::<Value>(*name)?));
        }

        let string_lib = freezer.freeze_lua(&lua, &globals.get("string")?)?;
        let table_lib = freezer.freeze_lua(&lua, &globals.get("table")?)?;
        let math_lib = freezer.freeze_lua(&lua, &globals.get("math")?)?;

        freeze_primitive_metatables(&lua, &debug, &freezer, &string_lib)?;
        drop(debug);

        let run_token = CancelToken::new();
        let tripped = {
            let token = run_token.clone();
            lua.create_function(move |_, ()| Ok(token.is_tripped()))?
        };
        let guard_factory = lua
            .load(PROTECTED_CALL_GUARD)
            .set_name("=protected-call-guard")
            .into_function()?;
        let message = crate::scripting::engine::RESOURCE_LIMIT_MESSAGE;
        let pcall: Function =
            guard_factory.call((globals.get::<Function>("pcall")?, tripped.clone(), message))?;
        let xpcall: Function =
            guard_factory.call((globals.get::<Function>("xpcall")?, tripped, message))?;

        Ok(Self {
            pcall,
            xpcall,
            run_token,
            freezer,
            base,
            libraries: [
                ("string", string_lib),
                ("table", table_lib),
                ("math", math_lib),
            ],
            lua,
        })
    }

    /// Build a sandbox. Bindings are applied last and win over defaults.
    pub fn new_sandbox<I, S>(&self, bindings: I) -> Result<Sandbox, ScriptError>
    where
        I: IntoIterator<Item = (S, Value)>,
        S: AsRef<str>,
    {
        let env = self.lua.create_table()?;
        for (name, value) in &self.base {
            env.raw_set(*name, value.clone())?;
        }
        for (name, f) in self.freezer.readers() {
            env.raw_set(name, f)?;
        }
        for (name, lib) in &self.libraries {
            env.raw_set(*name, lib.clone())?;
        }

        env.raw_set("pcall", self.pcall.clone())?;
        env.raw_set("xpcall", self.xpcall.clone())?;
        env.raw_set("_G", env.clone())?;

        for (name, value) in bindings {
            env.raw_set(name.as_ref(), value)?;
        }

        Ok(Sandbox {
            env,
            lua: self.lua.clone(),
            token: self.run_token.clone(),
        })
    }

    /// Run a one-off script in an empty sandbox with a small budget.
    pub fn execute(&self, script: &str, label: &str) -> Result<mlua::MultiValue, ScriptError> {
        self.new_sandbox(std::iter::empty::<(&str, Value)>())?
            .execute(script, label, Some(DEFAULT_ONE_OFF_BUDGET))
    }

    /// A fresh mutable table, e.g. a scope a script is about to populate.
    pub fn create_table(&self) -> Result<Table, ScriptError> {
        Ok(self.lua.create_table()?)
    }

    /// Frozen view over a host snapshot, ready to be bound into a sandbox.
    pub fn freeze(&self, table: &ScriptTable) -> Result<Table, ScriptError> {
        Ok(self.freezer.freeze(&self.lua, table)?)
    }

    pub(crate) fn lua(&self) -> &Lua {
        &self.lua
    }
}

// ── Sandbox ───────────────────────────────────────────────────────────────────

/// One restricted environment. `lua` is the privileged handle used to
/// compile chunks and install the instruction hook; scripts only ever see
/// `env`.
pub struct Sandbox {
    pub(super) env: Table,
    pub(super) lua: Lua,
    pub(super) token: CancelToken,
}

impl Sandbox {
    /// The sandbox's global table as the script sees it.
    pub fn globals(&self) -> &Table {
        &self.env
    }

    pub fn get(&self, name: &str) -> Result<Value, ScriptError> {
        Ok(self.env.raw_get(name)?)
    }

    /// Read back a scope the script populated and snapshot it.
    pub fn take_scope(&self, scope: &str, label: &str) -> Result<FrozenTable, ScriptError> {
        match self.get(scope)? {
            Value::Table(table) => ScriptTable::from_lua(&table)
                .map(std::sync::Arc::new)
                .map_err(|e| ScriptError::Runtime {
                    label: label.to_string(),
                    message: e.to_string(),
                }),
            other => Err(ScriptError::ScopeNotTable {
                label: label.to_string(),
                scope: scope.to_string(),
                found: other.type_name(),
            }),
        }
    }
}
