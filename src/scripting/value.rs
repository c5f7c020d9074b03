/// `scripting/value.rs` - host-side structured values
///
/// A script scope is snapshotted into a `ScriptTable` once its script has
/// finished. The snapshot is an eager deep copy, so nothing reachable from
/// it aliases the mutable Lua table the script wrote into.
use std::{collections::HashSet, ffi::c_void, fmt, sync::Arc};

use mlua::{Function, Lua, Result as LuaResult, Table, Value};

use super::freeze;

/// A snapshotted scope. Shared, never mutated after construction.
pub type FrozenTable = Arc<ScriptTable>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableKey {
    Integer(i64),
    String(String),
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "{i}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for TableKey {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<i64> for TableKey {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

#[derive(Debug, Clone)]
pub enum ScriptValue {
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(String),
    Table(FrozenTable),
    Function(Function),
}

impl ScriptValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "boolean",
            Self::Integer(_) | Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Table(_) => "table",
            Self::Function(_) => "function",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Number(n) if n.fract() == 0.0 => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&ScriptTable> {
        match self {
            Self::Table(t) => Some(t),
            _ => None,
        }
    }
}

impl PartialEq for ScriptValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Integer(a), Self::Number(b)) | (Self::Number(b), Self::Integer(a)) => {
                *a as f64 == *b
            }
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Table(a), Self::Table(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => a.to_pointer() == b.to_pointer(),
            _ => false,
        }
    }
}

// ── ScriptTable ───────────────────────────────────────────────────────────────

/// Sequence part first (1..#t), then the remaining keys in the order the
/// interpreter handed them out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptTable {
    entries: Vec<(TableKey, ScriptValue)>,
}

impl ScriptTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later duplicates of a key replace the earlier value in place.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (TableKey, ScriptValue)>,
    {
        let mut table = Self::new();
        for (key, value) in entries {
            match table.entries.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = value,
                None => table.entries.push((key, value)),
            }
        }
        table
    }

    pub fn get(&self, key: impl Into<TableKey>) -> Option<&ScriptValue> {
        let key = key.into();
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// Follow a chain of string keys through nested tables.
    pub fn get_path(&self, path: &[&str]) -> Option<&ScriptValue> {
        let (last, parents) = path.split_last()?;
        let mut table = self;
        for key in parents {
            table = table.get(*key)?.as_table()?;
        }
        table.get(*last)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TableKey, &ScriptValue)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    /// Border of the sequence part, matching Lua's `#` on a proper sequence.
    pub fn sequence_len(&self) -> usize {
        let mut n = 0;
        while self.get(n as i64 + 1).is_some() {
            n += 1;
        }
        n
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deep-copy a Lua table. Frozen views are read through to their
    /// backing data.
    pub fn from_lua(table: &Table) -> LuaResult<Self> {
        let mut visiting = HashSet::new();
        snapshot(table, &mut visiting, "")
    }

    pub fn to_json(&self) -> serde_json::Value {
        let n = self.sequence_len();
        if n > 0 && n == self.entries.len() {
            return serde_json::Value::Array(
                (1..=n as i64)
                    .filter_map(|i| self.get(i).map(value_to_json))
                    .collect(),
            );
        }
        let map = self
            .entries
            .iter()
            .map(|(k, v)| (k.to_string(), value_to_json(v)))
            .collect();
        serde_json::Value::Object(map)
    }
}

fn value_to_json(value: &ScriptValue) -> serde_json::Value {
    match value {
        ScriptValue::Boolean(b) => serde_json::Value::Bool(*b),
        ScriptValue::Integer(i) => serde_json::Value::from(*i),
        ScriptValue::Number(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ScriptValue::String(s) => serde_json::Value::String(s.clone()),
        ScriptValue::Table(t) => t.to_json(),
        ScriptValue::Function(_) => serde_json::Value::String("<function>".into()),
    }
}

// ── Lua -> host ───────────────────────────────────────────────────────────────

fn snapshot(table: &Table, visiting: &mut HashSet<*const c_void>, path: &str) -> LuaResult<ScriptTable> {
    let table = freeze::backing_of(table).unwrap_or_else(|| table.clone());
    let ptr = table.to_pointer();
    if !visiting.insert(ptr) {
        return Err(mlua::Error::runtime(format!(
            "cyclic table at `{}` cannot be frozen",
            display_path(path)
        )));
    }

    let mut entries = Vec::new();
    let border = table.raw_len() as i64;
    for i in 1..=border {
        let value: Value = table.raw_get(i)?;
        if value.is_nil() {
            continue;
        }
        let child = format!("{path}[{i}]");
        entries.push((TableKey::Integer(i), convert(value, visiting, &child)?));
    }

    for pair in table.clone().pairs::<Value, Value>() {
        let (key, value) = pair?;
        let key = match key {
            Value::Integer(i) if (1..=border).contains(&i) => continue,
            Value::Integer(i) => TableKey::Integer(i),
            Value::String(s) => TableKey::String(s.to_str()?.to_string()),
            other => {
                return Err(mlua::Error::runtime(format!(
                    "unsupported {} key in `{}`",
                    other.type_name(),
                    display_path(path)
                )))
            }
        };
        let child = match &key {
            TableKey::Integer(i) => format!("{path}[{i}]"),
            TableKey::String(s) if path.is_empty() => s.clone(),
            TableKey::String(s) => format!("{path}.{s}"),
        };
        entries.push((key, convert(value, visiting, &child)?));
    }

    visiting.remove(&ptr);
    Ok(ScriptTable { entries })
}

fn convert(value: Value, visiting: &mut HashSet<*const c_void>, path: &str) -> LuaResult<ScriptValue> {
    Ok(match value {
        Value::Boolean(b) => ScriptValue::Boolean(b),
        Value::Integer(i) => ScriptValue::Integer(i),
        Value::Number(n) => ScriptValue::Number(n),
        Value::String(s) => ScriptValue::String(s.to_str()?.to_string()),
        Value::Table(t) => ScriptValue::Table(Arc::new(snapshot(&t, visiting, path)?)),
        Value::Function(f) => ScriptValue::Function(f),
        other => {
            return Err(mlua::Error::runtime(format!(
                "cannot freeze {} value at `{}`",
                other.type_name(),
                display_path(path)
            )))
        }
    })
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "<root>"
    } else {
        path
    }
}

// ── host -> Lua ───────────────────────────────────────────────────────────────

pub(crate) fn key_into_lua(lua: &Lua, key: &TableKey) -> LuaResult<Value> {
    Ok(match key {
        TableKey::Integer(i) => Value::Integer(*i),
        TableKey::String(s) => Value::String(lua.create_string(s)?),
    })
}
