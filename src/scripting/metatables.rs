/// `scripting/metatables.rs` - one-time freeze of the primitive metatables
///
/// Booleans, numbers, strings, functions, nil and threads share a single
/// metatable per type across the whole interpreter, so every sandbox sees
/// the same ones. They are replaced once, before any sandbox runs, with
/// metatables whose `__metatable` field is a frozen view: scripts can still
/// read `getmetatable('')` but can no longer change how a primitive type
/// behaves for everyone else.
///
/// Global state: the freeze is recorded in the interpreter's app data and
/// is never undone for the lifetime of that interpreter.
use mlua::{Function, Lua, Result as LuaResult, Table, Value};

use super::freeze::Freezer;

/// App-data flag recording that the freeze already ran.
struct PrimitiveMetatablesFrozen;

/// Install frozen metatables for every primitive type.
///
/// `debug` is the privileged debug library; only `debug.getmetatable` and
/// `debug.setmetatable` can reach primitive metatables. `string_lib` is the
/// frozen view scripts index strings through. Returns `false` when the
/// interpreter was already frozen.
pub fn freeze_primitive_metatables(
    lua: &Lua,
    debug: &Table,
    freezer: &Freezer,
    string_lib: &Table,
) -> LuaResult<bool> {
    if lua.app_data_ref::<PrimitiveMetatablesFrozen>().is_some() {
        return Ok(false);
    }

    let getmetatable: Function = debug.get("getmetatable")?;
    let setmetatable: Function = debug.get("setmetatable")?;

    let sample_fn = lua.create_function(|_, ()| Ok(()))?;
    let sample_thread = lua.create_thread(sample_fn.clone())?;
    let others = [
        Value::Boolean(false),
        Value::Integer(0),
        Value::Nil,
        Value::Function(sample_fn),
        Value::Thread(sample_thread),
    ];

    for sample in others {
        let visible = match getmetatable.call::<Option<Table>>(sample.clone())? {
            Some(existing) => freezer.freeze_lua(lua, &existing)?,
            None => freezer.seal(lua, lua.create_table()?, None)?,
        };
        let meta = lua.create_table()?;
        meta.raw_set("__metatable", visible)?;
        setmetatable.call::<()>((sample, meta))?;
    }

    // Strings keep every metamethod the string library installed (string
    // arithmetic coercion lives there); only `__index` is swapped for the
    // frozen library. The visible metatable is a frozen copy of the live one.
    let live = lua.create_table()?;
    let sample = Value::String(lua.create_string("")?);
    if let Some(existing) = getmetatable.call::<Option<Table>>(sample.clone())? {
        for pair in existing.clone().pairs::<Value, Value>() {
            let (key, value) = pair?;
            live.raw_set(key, value)?;
        }
    }
    live.raw_set("__index", string_lib.clone())?;
    live.raw_set("__metatable", Value::Nil)?;
    let visible = freezer.freeze_lua(lua, &live)?;
    live.raw_set("__metatable", visible)?;
    setmetatable.call::<()>((sample, live))?;

    lua.set_app_data(PrimitiveMetatablesFrozen);
    log::debug!("primitive metatables frozen");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use mlua::{LuaOptions, StdLib};

    use super::*;

    #[test]
    fn second_freeze_is_a_no_op() {
        let lua = unsafe { Lua::unsafe_new_with(StdLib::STRING | StdLib::DEBUG, LuaOptions::new()) };
        let debug: Table = lua.globals().get("debug").unwrap();
        let freezer = Freezer::new(&lua, lua.globals().get("next").unwrap()).unwrap();
        let strings = freezer
            .freeze_lua(&lua, &lua.globals().get("string").unwrap())
            .unwrap();

        assert!(freeze_primitive_metatables(&lua, &debug, &freezer, &strings).unwrap());
        assert!(!freeze_primitive_metatables(&lua, &debug, &freezer, &strings).unwrap());
    }

    #[test]
    fn strings_keep_working_after_the_freeze() {
        let lua = unsafe { Lua::unsafe_new_with(StdLib::STRING | StdLib::DEBUG, LuaOptions::new()) };
        let debug: Table = lua.globals().get("debug").unwrap();
        let freezer = Freezer::new(&lua, lua.globals().get("next").unwrap()).unwrap();
        let strings = freezer
            .freeze_lua(&lua, &lua.globals().get("string").unwrap())
            .unwrap();
        freeze_primitive_metatables(&lua, &debug, &freezer, &strings).unwrap();

        let upper: String = lua.load("return ('abc'):upper()").eval().unwrap();
        assert_eq!(upper, "ABC");
        let err = lua
            .load("getmetatable('').__index.upper = nil")
            .exec()
            .unwrap_err();
        assert!(err.to_string().contains(crate::scripting::freeze::READ_ONLY_MESSAGE));
    }

    #[test]
    fn string_arithmetic_survives_the_freeze() {
        let lua = unsafe { Lua::unsafe_new_with(StdLib::STRING | StdLib::DEBUG, LuaOptions::new()) };
        let debug: Table = lua.globals().get("debug").unwrap();
        let freezer = Freezer::new(&lua, lua.globals().get("next").unwrap()).unwrap();
        let strings = freezer
            .freeze_lua(&lua, &lua.globals().get("string").unwrap())
            .unwrap();
        freeze_primitive_metatables(&lua, &debug, &freezer, &strings).unwrap();

        let ok: bool = lua
            .load("return '10' + 1 == 11 and '2' * 3 == 6 and -'4' == -4 and '7' // '2' == 3")
            .eval()
            .unwrap();
        assert!(ok);

        let visible_add: bool = lua
            .load("return getmetatable('').__add ~= nil")
            .eval()
            .unwrap();
        assert!(visible_add);
        let err = lua
            .load("getmetatable('').__add = nil")
            .exec()
            .unwrap_err();
        assert!(err.to_string().contains(crate::scripting::freeze::READ_ONLY_MESSAGE));
    }
}
