//! Table access through variable handles

use mlua_sys as ffi;

use super::LuaVar;
use crate::debug;
use crate::marshal::{FromLua, IntoLua, LightUserData, Nil};
use crate::stack::Stack;

/// Push `key`, rejecting nil and NaN. On rejection the key is left pushed.
fn push_key<K: IntoLua>(stack: &Stack<'_>, key: &K) -> bool {
    key.push_to(stack);
    let raw = stack.raw();
    unsafe {
        match ffi::lua_type(raw, -1) {
            ffi::LUA_TNIL | ffi::LUA_TNONE => {
                stack.report("Trying to use nil as a table key");
                false
            }
            ffi::LUA_TNUMBER if ffi::lua_isinteger(raw, -1) == 0 => {
                let number = ffi::lua_tonumber(raw, -1);
                if number.is_nan() {
                    stack.report("Trying to use NaN as a table key");
                    return false;
                }
                true
            }
            _ => true,
        }
    }
}

impl LuaVar {
    fn require_table(&self, action: &str) -> bool {
        if self.is_table() {
            return true;
        }
        self.report(format!(
            "Trying to {} on a variable that isn't a table.  Type is {}",
            action,
            self.type_name()
        ));
        false
    }

    /// Read `self[key]` as `T`
    ///
    /// A receiver that isn't a table, an invalid key or a value that doesn't
    /// convert to `T` is reported and answered with `T::default()`.
    pub fn get_table_value<K: IntoLua, T: FromLua>(&self, key: K) -> T {
        if !self.require_table("get a table value") {
            return T::default();
        }
        self.with_value(false, |stack| {
            if !push_key(stack, &key) {
                return T::default();
            }
            let raw = stack.raw();
            unsafe {
                ffi::lua_pushvalue(raw, -1);
                ffi::lua_gettable(raw, -3);
            }
            if !T::is_at(stack, -1) {
                stack.report(format!(
                    "Trying to get key {} but it's not of the appropriate type.  Type is {}",
                    debug::describe_at(raw, -2),
                    stack.type_name_at(-1)
                ));
                return T::default();
            }
            T::read_at(stack, -1)
        })
        .unwrap_or_default()
    }

    /// Assign `self[key] = value`
    pub fn set_table_value<K: IntoLua, V: IntoLua>(&self, key: K, value: V) {
        if !self.require_table("set a table value") {
            return;
        }
        self.with_value(false, |stack| {
            if !stack.reserve(2) || !push_key(stack, &key) {
                return;
            }
            value.push_to(stack);
            unsafe { ffi::lua_settable(stack.raw(), -3) };
        });
    }

    pub fn get_table_var<K: IntoLua>(&self, key: K) -> LuaVar {
        self.get_table_value(key)
    }

    pub fn get_table_integer<K: IntoLua>(&self, key: K) -> i64 {
        self.get_table_value(key)
    }

    pub fn get_table_number<K: IntoLua>(&self, key: K) -> f64 {
        self.get_table_value(key)
    }

    pub fn get_table_string<K: IntoLua>(&self, key: K) -> String {
        self.get_table_value(key)
    }

    pub fn get_table_bool<K: IntoLua>(&self, key: K) -> bool {
        self.get_table_value(key)
    }

    pub fn get_table_userdata<K: IntoLua>(&self, key: K) -> *mut std::ffi::c_void {
        self.get_table_value::<K, LightUserData>(key).0
    }

    pub fn set_table_var<K: IntoLua>(&self, key: K, value: &LuaVar) {
        self.set_table_value(key, value)
    }

    pub fn set_table_integer<K: IntoLua>(&self, key: K, value: i64) {
        self.set_table_value(key, value)
    }

    pub fn set_table_number<K: IntoLua>(&self, key: K, value: f64) {
        self.set_table_value(key, value)
    }

    pub fn set_table_string<K: IntoLua>(&self, key: K, value: &str) {
        self.set_table_value(key, value)
    }

    pub fn set_table_bool<K: IntoLua>(&self, key: K, value: bool) {
        self.set_table_value(key, value)
    }

    pub fn set_table_light_userdata<K: IntoLua>(&self, key: K, value: *mut std::ffi::c_void) {
        self.set_table_value(key, LightUserData(value))
    }

    /// Remove `self[key]`
    pub fn set_table_nil<K: IntoLua>(&self, key: K) {
        self.set_table_value(key, Nil)
    }

    /// Assign every `(name, value)` pair in order
    pub fn fill_table(&self, entries: &[(&str, &dyn IntoLua)]) {
        if !self.require_table("fill a table") {
            return;
        }
        self.with_value(false, |stack| {
            let raw = stack.raw();
            for (name, value) in entries {
                if !stack.reserve(2) {
                    return;
                }
                name.push_to(stack);
                value.push_to(stack);
                unsafe { ffi::lua_settable(raw, -3) };
            }
        });
    }

    /// Assign a fresh table to `self[key]` and return it
    pub fn set_new_table<K: IntoLua>(&self, key: K, narr: i32, nrec: i32) -> LuaVar {
        let mut table = LuaVar {
            context: self.context.clone(),
            slot: None,
        };
        if !self.require_table("set a new table") {
            return table;
        }
        table.create_table(narr, nrec);
        self.set_table_value(key, &table);
        table
    }

    /// `self[key]` if it is a table, or a fresh table stored there if the
    /// key is unset
    ///
    /// Any other occupant is left alone, reported, and nil is returned.
    pub fn get_or_create_table<K: IntoLua>(&self, key: K, narr: i32, nrec: i32) -> LuaVar {
        let nil = LuaVar {
            context: self.context.clone(),
            slot: None,
        };
        if !self.require_table("get or create a table") {
            return nil;
        }
        let existing: LuaVar = self.get_table_value(&key);
        if existing.is_table() {
            return existing;
        }
        if !existing.is_nil() {
            self.report(format!(
                "Found something at key but it wasn't a table.  Type is {}",
                existing.type_name()
            ));
            return nil;
        }
        self.set_new_table(key, narr, nrec)
    }

    /// Append `value` at `length() + 1`
    pub fn insert<V: IntoLua>(&self, value: V) {
        if !self.require_table("insert") {
            return;
        }
        self.with_value(false, |stack| {
            let raw = stack.raw();
            let end = unsafe { ffi::lua_rawlen(raw, -1) } as ffi::lua_Integer + 1;
            value.push_to(stack);
            unsafe { ffi::lua_seti(raw, -2, end) };
        });
    }

    /// Insert `value` at `position`, shifting later elements up
    pub fn insert_at<V: IntoLua>(&self, position: i64, value: V) {
        if !self.require_table("insert") {
            return;
        }
        self.with_value(false, |stack| {
            let raw = stack.raw();
            let end = unsafe { ffi::lua_rawlen(raw, -1) } as ffi::lua_Integer + 1;
            if position < 1 || position > end {
                stack.report(format!(
                    "Insert position {} out of bounds for a sequence of length {}",
                    position,
                    end - 1
                ));
                return;
            }
            unsafe {
                let mut index = end;
                while index > position {
                    ffi::lua_geti(raw, -1, index - 1);
                    ffi::lua_seti(raw, -2, index);
                    index -= 1;
                }
            }
            value.push_to(stack);
            unsafe { ffi::lua_seti(raw, -2, position) };
        });
    }

    /// Append a fresh table and return it
    pub fn insert_new_table_at_end(&self, narr: i32, nrec: i32) -> LuaVar {
        let mut table = LuaVar {
            context: self.context.clone(),
            slot: None,
        };
        if !self.require_table("insert a new table") {
            return table;
        }
        table.create_table(narr, nrec);
        self.insert(&table);
        table
    }

    /// Handle to `self[key]`, whatever its type
    pub fn get_var_at<K: IntoLua>(&self, key: K) -> LuaVar {
        self.get_table_value(key)
    }

    /// `self[key]` read as `T`
    pub fn get_at<T: FromLua, K: IntoLua>(&self, key: K) -> T {
        self.get_var_at(key).get_value()
    }

    /// Follow a dot-separated path of string keys, e.g. `"config.window.width"`
    ///
    /// Empty segments are skipped. An empty path, a non-table receiver, or a
    /// non-table intermediate value is reported and yields nil.
    pub fn lookup(&self, path: &str) -> LuaVar {
        let nil = LuaVar {
            context: self.context.clone(),
            slot: None,
        };
        if !self.is_table() {
            self.report(format!(
                "Attempting to call lookup() on a variable that isn't a table.  Path is {} and type is {}",
                path,
                self.type_name()
            ));
            return nil;
        }

        let segments: Vec<&str> = path.split('.').filter(|segment| !segment.is_empty()).collect();
        let Some((last, parents)) = segments.split_last() else {
            self.report("Attempting to call lookup() with an empty path");
            return nil;
        };

        let mut current = self.clone();
        for segment in parents {
            current = current.get_table_var(*segment);
            if !current.is_table() {
                self.report(format!(
                    "Attempting to call lookup() when one of the elements isn't a table.  Full path is {} and element is {}.  Type is {}",
                    path,
                    segment,
                    current.type_name()
                ));
                return nil;
            }
        }
        current.get_table_var(*last)
    }

    /// Raw length: the border of the sequence part
    pub fn length(&self) -> usize {
        self.with_value(false, |stack| unsafe { ffi::lua_rawlen(stack.raw(), -1) } as usize)
            .unwrap_or(0)
    }

    /// Number of key/value pairs, counted by iteration
    pub fn count_elements(&self) -> usize {
        if !self.require_table("count elements") {
            return 0;
        }
        self.iter().count()
    }

    /// Install `metatable`; the receiver must be a table or full userdata
    pub fn set_metatable(&self, metatable: &LuaVar) {
        let receiver = self.type_code();
        if receiver != ffi::LUA_TTABLE && receiver != ffi::LUA_TUSERDATA {
            self.report(format!(
                "Trying to set a metatable on a variable that isn't a table or userdata.  Type is {}",
                self.type_name()
            ));
            return;
        }
        if !metatable.is_table() {
            self.report(format!(
                "Trying to set a metatable that isn't a table.  Type is {}",
                metatable.type_name()
            ));
            return;
        }
        let same_state = match (&self.context, &metatable.context) {
            (Some(ours), Some(theirs)) => ours.ptr_eq(theirs),
            _ => false,
        };
        if !same_state {
            self.report("Trying to set a metatable that belongs to a different Lua state");
            return;
        }
        self.with_value(false, |stack| {
            metatable.push_value(stack);
            unsafe { ffi::lua_setmetatable(stack.raw(), -2) };
        });
    }

    /// The metatable, or nil
    pub fn get_metatable(&self) -> LuaVar {
        self.with_value(false, |stack| {
            let raw = stack.raw();
            if unsafe { ffi::lua_getmetatable(raw, -1) } == 0 {
                return LuaVar::with_context(stack.context());
            }
            LuaVar::from_stack(stack)
        })
        .unwrap_or_else(|| LuaVar {
            context: self.context.clone(),
            slot: None,
        })
    }
}
