/// `scripting/freeze.rs` - read-only views handed to sandboxed scripts
///
/// A frozen view is an empty proxy table whose protected metatable points
/// at a backing copy of the data. Every composite value inside the backing
/// copy is itself a frozen view, built eagerly when the view is created.
/// Writes go through `__newindex` and fail; `setmetatable` fails because
/// the metatable is protected; `rawset` is never exposed to sandboxes.
use mlua::{Function, Lua, MultiValue, Result as LuaResult, Table, Value};

use super::value::{key_into_lua, ScriptTable, ScriptValue};

pub const READ_ONLY_MESSAGE: &str = "table is read-only";

/// Marker stored in every frozen metatable, never visible to scripts.
const FROZEN_MARKER: &str = "__frozen";

/// Returns the backing table when `table` is a frozen view.
pub fn backing_of(table: &Table) -> Option<Table> {
    let meta = table.metatable()?;
    if !meta.raw_get::<bool>(FROZEN_MARKER).unwrap_or(false) {
        return None;
    }
    meta.raw_get::<Table>("__index").ok()
}

pub fn is_frozen(table: &Table) -> bool {
    backing_of(table).is_some()
}

/// Metamethods and read helpers shared by every view of one interpreter.
#[derive(Clone)]
pub struct Freezer {
    deny: Function,
    len: Function,
    pairs: Function,
    next: Function,
    rawget: Function,
    rawlen: Function,
}

impl Freezer {
    /// `raw_next` is the interpreter's own `next`, captured before any
    /// sandbox exists.
    pub fn new(lua: &Lua, raw_next: Function) -> LuaResult<Self> {
        let deny = lua.create_function(|_, _: MultiValue| -> LuaResult<()> {
            Err(mlua::Error::runtime(READ_ONLY_MESSAGE))
        })?;

        let len = lua.create_function(|_, (view, _): (Table, MultiValue)| {
            let target = backing_of(&view).unwrap_or(view);
            Ok(target.raw_len())
        })?;

        let next = lua.create_function(move |_, (table, key): (Table, Value)| {
            let target = backing_of(&table).unwrap_or(table);
            raw_next.call::<MultiValue>((target, key))
        })?;

        let pairs = {
            let next = next.clone();
            lua.create_function(move |_, view: Table| Ok((next.clone(), view, Value::Nil)))?
        };

        let rawget = lua.create_function(|_, (table, key): (Table, Value)| {
            let target = backing_of(&table).unwrap_or(table);
            target.raw_get::<Value>(key)
        })?;

        let rawlen = lua.create_function(|_, value: Value| match value {
            Value::Table(table) => Ok(backing_of(&table).unwrap_or(table).raw_len()),
            Value::String(s) => Ok(s.as_bytes().len()),
            other => Err(mlua::Error::runtime(format!(
                "table or string expected, got {}",
                other.type_name()
            ))),
        })?;

        Ok(Self {
            deny,
            len,
            pairs,
            next,
            rawget,
            rawlen,
        })
    }

    /// Frozen-aware replacements for the base library readers.
    pub fn readers(&self) -> [(&'static str, Function); 3] {
        [
            ("next", self.next.clone()),
            ("rawget", self.rawget.clone()),
            ("rawlen", self.rawlen.clone()),
        ]
    }

    /// Wrap an already-populated backing table. Callers must make sure
    /// every composite value inside `backing` is frozen already.
    pub fn seal(&self, lua: &Lua, backing: Table, protect: Option<Value>) -> LuaResult<Table> {
        let meta = lua.create_table()?;
        meta.raw_set("__index", backing)?;
        meta.raw_set("__newindex", self.deny.clone())?;
        meta.raw_set("__len", self.len.clone())?;
        meta.raw_set("__pairs", self.pairs.clone())?;
        meta.raw_set("__metatable", protect.unwrap_or_else(|| Value::Boolean(false)))?;
        meta.raw_set(FROZEN_MARKER, true)?;

        let view = lua.create_table()?;
        view.set_metatable(Some(meta));
        Ok(view)
    }

    /// Build a frozen view over a host snapshot, recursing eagerly.
    pub fn freeze(&self, lua: &Lua, table: &ScriptTable) -> LuaResult<Table> {
        let backing = lua.create_table()?;
        for (key, value) in table.iter() {
            let value = match value {
                ScriptValue::Boolean(b) => Value::Boolean(*b),
                ScriptValue::Integer(i) => Value::Integer(*i),
                ScriptValue::Number(n) => Value::Number(*n),
                ScriptValue::String(s) => Value::String(lua.create_string(s)?),
                ScriptValue::Table(t) => Value::Table(self.freeze(lua, t)?),
                ScriptValue::Function(f) => Value::Function(f.clone()),
            };
            backing.raw_set(key_into_lua(lua, key)?, value)?;
        }
        self.seal(lua, backing, None)
    }

    /// Snapshot a live Lua table and freeze the copy.
    pub fn freeze_lua(&self, lua: &Lua, table: &Table) -> LuaResult<Table> {
        self.freeze(lua, &ScriptTable::from_lua(table)?)
    }
}
