//! Operand stack access
//!
//! `Stack` is the only way the rest of the crate touches the interpreter's
//! operand stack. Its methods are crate-private, which keeps the marshalling
//! traits sealed in practice: outside code can name them but cannot drive a
//! stack to implement them.

use std::os::raw::c_int;

use mlua_sys as ffi;

use crate::context::LuaContext;
use crate::debug;

/// Borrowed view of one thread's operand stack
#[derive(Clone, Copy)]
pub struct Stack<'a> {
    context: &'a LuaContext,
    raw: *mut ffi::lua_State,
}

impl<'a> Stack<'a> {
    /// Stack of the context's active thread, or `None` once the state is closed
    pub(crate) fn new(context: &'a LuaContext) -> Option<Self> {
        let raw = context.raw();
        if raw.is_null() {
            return None;
        }
        Some(Stack { context, raw })
    }

    pub(crate) fn from_raw(context: &'a LuaContext, raw: *mut ffi::lua_State) -> Self {
        Stack { context, raw }
    }

    pub(crate) fn raw(&self) -> *mut ffi::lua_State {
        self.raw
    }

    pub(crate) fn context(&self) -> &'a LuaContext {
        self.context
    }

    pub(crate) fn report(&self, message: impl Into<String>) {
        self.context.report(message);
    }

    pub(crate) fn top(&self) -> c_int {
        unsafe { ffi::lua_gettop(self.raw) }
    }

    pub(crate) fn set_top(&self, top: c_int) {
        unsafe { ffi::lua_settop(self.raw, top) }
    }

    /// Make room for `extra` more slots, reporting when the stack can't grow
    pub(crate) fn reserve(&self, extra: c_int) -> bool {
        if unsafe { ffi::lua_checkstack(self.raw, extra) } == 0 {
            self.report(format!("Lua stack overflow: couldn't reserve {} slots", extra));
            return false;
        }
        true
    }

    /// Runtime type name of the value at `index`
    pub(crate) fn type_name_at(&self, index: c_int) -> String {
        debug::type_name_at(self.raw, index)
    }

    /// Snapshot the current top; the returned guard restores it on drop
    pub(crate) fn guard(&self) -> StackGuard {
        StackGuard::new(self.raw)
    }
}

/// Restores the operand stack height when dropped
pub(crate) struct StackGuard {
    raw: *mut ffi::lua_State,
    top: c_int,
}

impl StackGuard {
    pub(crate) fn new(raw: *mut ffi::lua_State) -> Self {
        let top = unsafe { ffi::lua_gettop(raw) };
        StackGuard { raw, top }
    }

    /// Keep `count` more values past the recorded height
    pub(crate) fn bump(&mut self, count: c_int) {
        self.top += count;
    }
}

impl Drop for StackGuard {
    fn drop(&mut self) {
        unsafe { ffi::lua_settop(self.raw, self.top) };
    }
}
