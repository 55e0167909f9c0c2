//! Debugging helpers: the protected-call error handler, tracebacks and
//! operand stack dumps

use std::borrow::Cow;
use std::ffi::CStr;
use std::os::raw::c_int;
use std::ptr;
use std::slice;

use mlua_sys as ffi;

const EXCEPTION_HEADER: &[u8] = b"Lua Exception:\n";

/// Error handler installed for every protected call
///
/// Replaces the error value with `"Lua Exception:\n" .. tostring(err)`
/// followed by a stack traceback. Nothing here allocates on the Rust side,
/// so it is safe to run while the interpreter is unwinding.
pub(crate) unsafe extern "C-unwind" fn on_lua_exception(state: *mut ffi::lua_State) -> c_int {
    ffi::lua_pushlstring(
        state,
        EXCEPTION_HEADER.as_ptr() as *const _,
        EXCEPTION_HEADER.len(),
    );
    ffi::luaL_tolstring(state, 1, ptr::null_mut());
    ffi::lua_concat(state, 2);
    let message = ffi::lua_tolstring(state, -1, ptr::null_mut());
    ffi::luaL_traceback(state, state, message, 1);
    1
}

/// Copy the string at `index` without disturbing the value in place
pub(crate) unsafe fn string_at(state: *mut ffi::lua_State, index: c_int) -> Option<String> {
    let mut len = 0usize;
    let data = ffi::lua_tolstring(state, index, &mut len);
    if data.is_null() {
        return None;
    }
    let bytes = slice::from_raw_parts(data as *const u8, len);
    Some(String::from_utf8_lossy(bytes).into_owned())
}

/// Message for the error object left by a failed load or protected call
pub(crate) unsafe fn error_message(state: *mut ffi::lua_State, index: c_int) -> String {
    match ffi::lua_type(state, index) {
        ffi::LUA_TSTRING | ffi::LUA_TNUMBER => {
            let index = ffi::lua_absindex(state, index);
            ffi::lua_pushvalue(state, index);
            let message = string_at(state, -1);
            ffi::lua_pop(state, 1);
            message.unwrap_or_default()
        }
        _ => "Lua threw unknown exception.".to_string(),
    }
}

/// Runtime type name of the value at `index`
pub(crate) fn type_name_at(state: *mut ffi::lua_State, index: c_int) -> String {
    unsafe {
        let name = ffi::lua_typename(state, ffi::lua_type(state, index));
        if name.is_null() {
            return "unknown".to_string();
        }
        CStr::from_ptr(name).to_string_lossy().into_owned()
    }
}

/// Current call stack of `state` as text
pub(crate) fn traceback(state: *mut ffi::lua_State) -> String {
    unsafe {
        ffi::luaL_traceback(state, state, ptr::null(), 0);
        let text = string_at(state, -1).unwrap_or_default();
        ffi::lua_pop(state, 1);
        text
    }
}

fn describe_slot(state: *mut ffi::lua_State, index: c_int) -> Cow<'static, str> {
    unsafe {
        match ffi::lua_type(state, index) {
            ffi::LUA_TSTRING => {
                let text = string_at(state, index).unwrap_or_default();
                Cow::Owned(format!("`{}'", text))
            }
            ffi::LUA_TBOOLEAN => {
                if ffi::lua_toboolean(state, index) != 0 {
                    Cow::Borrowed("true")
                } else {
                    Cow::Borrowed("false")
                }
            }
            ffi::LUA_TNUMBER => {
                if ffi::lua_isinteger(state, index) != 0 {
                    Cow::Owned(ffi::lua_tointeger(state, index).to_string())
                } else {
                    Cow::Owned(ffi::lua_tonumber(state, index).to_string())
                }
            }
            _ => Cow::Owned(type_name_at(state, index)),
        }
    }
}

/// Describe the value at `index` for diagnostics
pub(crate) fn describe_at(state: *mut ffi::lua_State, index: c_int) -> String {
    describe_slot(state, index).into_owned()
}

/// Render every slot of the operand stack, bottom first, and log it at info
/// level with an optional prefix
pub(crate) fn dump_stack(state: *mut ffi::lua_State, prefix: Option<&str>) -> String {
    let top = unsafe { ffi::lua_gettop(state) };
    let mut buffer = String::from("[ ");
    for index in 1..=top {
        buffer.push_str(&describe_slot(state, index));
        buffer.push_str(", ");
    }
    buffer.push(']');

    match prefix {
        Some(prefix) => log::info!(target: "ferrous_lua", "{}: {}", prefix, buffer),
        None => log::info!(target: "ferrous_lua", "{}", buffer),
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LuaState;

    #[test]
    fn test_dump_stack_formats_slots() {
        let state = LuaState::new().unwrap();
        let raw = state.context().raw();
        unsafe {
            ffi::lua_settop(raw, 0);
            ffi::lua_pushlstring(raw, b"str".as_ptr() as *const _, 3);
            ffi::lua_pushboolean(raw, 1);
            ffi::lua_pushinteger(raw, 3);
            ffi::lua_pushnumber(raw, 1.5);
            ffi::lua_createtable(raw, 0, 0);
        }
        let dump = dump_stack(raw, Some("test"));
        assert_eq!(dump, "[ `str', true, 3, 1.5, table, ]");
        unsafe { ffi::lua_settop(raw, 0) };
        assert_eq!(dump_stack(raw, None), "[ ]");
    }

    #[test]
    fn test_error_message_of_non_string() {
        let state = LuaState::new().unwrap();
        let raw = state.context().raw();
        unsafe {
            ffi::lua_createtable(raw, 0, 0);
            assert_eq!(error_message(raw, -1), "Lua threw unknown exception.");
            ffi::lua_pushinteger(raw, 42);
            assert_eq!(error_message(raw, -1), "42");
            // The number itself must not have been converted in place
            assert_eq!(ffi::lua_type(raw, -1), ffi::LUA_TNUMBER);
            ffi::lua_settop(raw, 0);
        }
    }

    #[test]
    fn test_traceback_leaves_stack_alone() {
        let state = LuaState::new().unwrap();
        let raw = state.context().raw();
        let before = unsafe { ffi::lua_gettop(raw) };
        let text = traceback(raw);
        assert!(text.starts_with("stack traceback:"));
        assert_eq!(unsafe { ffi::lua_gettop(raw) }, before);
    }
}
