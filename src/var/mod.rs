//! Variable handles
//!
//! A `LuaVar` owns one slot in the interpreter registry, shared between
//! clones. Cloning copies the handle and bumps the shared count; `take`
//! moves it out and leaves nil behind. The slot is released when the last
//! clone goes away, or immediately on `clear`.
//!
//! Handles fail soft. Operating on the wrong kind of value reports a
//! diagnostic through the context and yields a default.

mod native;
mod table;

pub(crate) use native::NativeObject;

use std::cmp::Ordering;
use std::ffi::c_void;
use std::fmt;
use std::os::raw::c_int;
use std::rc::Rc;

use mlua_sys as ffi;

use crate::context::{self, LuaContext};
use crate::marshal::{FromLua, IntoLua, LightUserData};
use crate::stack::Stack;

/// One registry slot. Dropping it releases the slot.
struct RegistrySlot {
    context: LuaContext,
    reference: c_int,
}

impl Drop for RegistrySlot {
    fn drop(&mut self) {
        self.context.release_reference(self.reference);
    }
}

/// Handle to a value living inside the interpreter
#[derive(Clone)]
pub struct LuaVar {
    context: Option<LuaContext>,
    slot: Option<Rc<RegistrySlot>>,
}

impl LuaVar {
    /// A nil handle bound to the thread's default context
    pub fn new() -> Self {
        LuaVar {
            context: context::default_context(),
            slot: None,
        }
    }

    /// A nil handle bound to `context`
    pub fn with_context(context: &LuaContext) -> Self {
        LuaVar {
            context: Some(context.clone()),
            slot: None,
        }
    }

    /// Pop the top of the stack into a new handle
    pub(crate) fn from_stack(stack: &Stack<'_>) -> Self {
        let mut var = LuaVar::with_context(stack.context());
        var.reference_top(stack);
        var
    }

    /// Context this handle is bound to
    pub fn context(&self) -> Option<&LuaContext> {
        self.context.as_ref()
    }

    /// Rebind a nil handle to another context
    pub fn set_context(&mut self, context: &LuaContext) {
        if self.slot.is_some() {
            self.report("Can't change the context of a variable that holds a value");
            return;
        }
        self.context = Some(context.clone());
    }

    /// True if the handle refers to a non-nil value
    pub fn is_valid(&self) -> bool {
        self.slot.is_some()
    }

    /// True if the handle is nil
    pub fn is_nil(&self) -> bool {
        self.slot.is_none()
    }

    /// Drop this handle's share of the slot; the handle becomes nil
    pub fn clear(&mut self) {
        self.slot = None;
    }

    /// Move the value out, leaving nil bound to the same context
    pub fn take(&mut self) -> LuaVar {
        LuaVar {
            context: self.context.clone(),
            slot: self.slot.take(),
        }
    }

    /// Number of handles sharing this slot, zero for nil
    pub fn ref_count(&self) -> usize {
        self.slot.as_ref().map(Rc::strong_count).unwrap_or(0)
    }

    /// Registry reference, for diagnostics only
    pub fn registry_reference(&self) -> Option<i32> {
        self.slot.as_ref().map(|slot| slot.reference)
    }

    pub(crate) fn report(&self, message: impl Into<String>) {
        match &self.context {
            Some(context) => context.report(message),
            None => context::report_detached(message.into()),
        }
    }

    /// Pop the top of `stack` into this (nil) handle
    fn reference_top(&mut self, stack: &Stack<'_>) {
        debug_assert!(self.slot.is_none());
        let reference = unsafe { ffi::luaL_ref(stack.raw(), ffi::LUA_REGISTRYINDEX) };
        if reference == ffi::LUA_REFNIL || reference == ffi::LUA_NOREF {
            return;
        }
        let context = stack.context().clone();
        context.reference_acquired();
        self.slot = Some(Rc::new(RegistrySlot { context, reference }));
    }

    /// Push the referenced value, or nil
    pub(crate) fn push_value(&self, stack: &Stack<'_>) {
        let raw = stack.raw();
        match &self.slot {
            Some(slot) if slot.context.ptr_eq(stack.context()) => unsafe {
                ffi::lua_rawgeti(raw, ffi::LUA_REGISTRYINDEX, slot.reference as ffi::lua_Integer);
            },
            Some(_) => {
                stack.report("Trying to push a variable that belongs to a different Lua state");
                unsafe { ffi::lua_pushnil(raw) };
            }
            None => unsafe { ffi::lua_pushnil(raw) },
        }
    }

    /// Open this handle's stack, or report why it can't be used
    pub(crate) fn stack(&self) -> Option<Stack<'_>> {
        let Some(context) = self.context.as_ref() else {
            self.report("Variable has no Lua state");
            return None;
        };
        let stack = Stack::new(context);
        if stack.is_none() {
            context.report("Variable's Lua state has been closed");
        }
        stack
    }

    /// Run `action` with the value pushed; the stack is restored afterwards.
    /// Returns `None` when there is nothing to push.
    pub(crate) fn with_value<R>(
        &self,
        allow_nil: bool,
        action: impl FnOnce(&Stack<'_>) -> R,
    ) -> Option<R> {
        if self.slot.is_none() && (!allow_nil || self.context.is_none()) {
            return None;
        }
        let stack = self.stack()?;
        let _guard = stack.guard();
        self.push_value(&stack);
        Some(action(&stack))
    }

    /// Store `value`, releasing whatever the handle held before
    pub fn set_value<T: IntoLua>(&mut self, value: T) {
        let Some(context) = self.context.clone() else {
            self.report("Trying to set a value on a variable with no Lua state");
            return;
        };
        let Some(stack) = Stack::new(&context) else {
            context.report("Variable's Lua state has been closed");
            return;
        };
        value.push_to(&stack);
        self.clear();
        self.reference_top(&stack);
    }

    /// Read the value as `T`, reporting and defaulting when it doesn't convert
    pub fn get_value<T: FromLua>(&self) -> T {
        self.with_value(true, |stack| T::read_at(stack, -1))
            .unwrap_or_default()
    }

    pub fn set_integer(&mut self, value: i64) {
        self.set_value(value)
    }

    pub fn set_number(&mut self, value: f64) {
        self.set_value(value)
    }

    pub fn set_string(&mut self, value: &str) {
        self.set_value(value)
    }

    pub fn set_bool(&mut self, value: bool) {
        self.set_value(value)
    }

    pub fn set_light_userdata(&mut self, value: *mut c_void) {
        self.set_value(LightUserData(value))
    }

    /// Same as `clear`
    pub fn set_nil(&mut self) {
        self.clear()
    }

    pub fn get_integer(&self) -> i64 {
        self.get_value()
    }

    pub fn get_number(&self) -> f64 {
        self.get_value()
    }

    pub fn get_string(&self) -> String {
        self.get_value()
    }

    pub fn get_bool(&self) -> bool {
        self.get_value()
    }

    /// Address of light or full userdata
    pub fn get_userdata(&self) -> *mut c_void {
        self.get_value::<LightUserData>().0
    }

    /// Replace the handle with a fresh table
    pub fn create_table(&mut self, narr: i32, nrec: i32) {
        let Some(context) = self.context.clone() else {
            self.report("Trying to create a table with no Lua state");
            return;
        };
        let Some(stack) = Stack::new(&context) else {
            context.report("Variable's Lua state has been closed");
            return;
        };
        unsafe { ffi::lua_createtable(stack.raw(), narr.max(0), nrec.max(0)) };
        self.clear();
        self.reference_top(&stack);
    }

    fn type_code(&self) -> c_int {
        self.with_value(false, |stack| unsafe { ffi::lua_type(stack.raw(), -1) })
            .unwrap_or(ffi::LUA_TNIL)
    }

    /// Runtime type name of the value, "nil" for an empty handle
    pub fn type_name(&self) -> String {
        self.with_value(false, |stack| stack.type_name_at(-1))
            .unwrap_or_else(|| "nil".to_string())
    }

    fn check(&self, predicate: impl FnOnce(*mut ffi::lua_State) -> bool) -> bool {
        self.with_value(false, |stack| predicate(stack.raw()))
            .unwrap_or(false)
    }

    pub fn is_integer(&self) -> bool {
        self.check(|raw| unsafe { ffi::lua_isinteger(raw, -1) != 0 })
    }

    /// True for numbers and numeric strings
    pub fn is_number(&self) -> bool {
        self.check(|raw| unsafe { ffi::lua_isnumber(raw, -1) != 0 })
    }

    /// True for strings and numbers
    pub fn is_string(&self) -> bool {
        self.check(|raw| unsafe { ffi::lua_isstring(raw, -1) != 0 })
    }

    pub fn is_bool(&self) -> bool {
        self.type_code() == ffi::LUA_TBOOLEAN
    }

    pub fn is_table(&self) -> bool {
        self.type_code() == ffi::LUA_TTABLE
    }

    pub fn is_function(&self) -> bool {
        self.type_code() == ffi::LUA_TFUNCTION
    }

    pub fn is_cfunction(&self) -> bool {
        self.check(|raw| unsafe { ffi::lua_iscfunction(raw, -1) != 0 })
    }

    pub fn is_light_userdata(&self) -> bool {
        self.type_code() == ffi::LUA_TLIGHTUSERDATA
    }

    /// True for full userdata
    pub fn is_userdata(&self) -> bool {
        self.type_code() == ffi::LUA_TUSERDATA
    }

    /// Raw comparison through the interpreter: `self op other`.
    ///
    /// Ordering operators may invoke metamethods, and a metamethod error
    /// there is not protected.
    fn compare(&self, other: &LuaVar, op: c_int) -> bool {
        if self.context.is_none() {
            return op == ffi::LUA_OPEQ && self.is_nil() && other.is_nil();
        }
        self.with_value(true, |stack| {
            other.push_value(stack);
            unsafe { ffi::lua_compare(stack.raw(), -2, -1, op) == 1 }
        })
        .unwrap_or(false)
    }
}

impl Default for LuaVar {
    fn default() -> Self {
        LuaVar::new()
    }
}

impl PartialEq for LuaVar {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other, ffi::LUA_OPEQ)
    }
}

impl PartialOrd for LuaVar {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self == other {
            Some(Ordering::Equal)
        } else if self.lt(other) {
            Some(Ordering::Less)
        } else if other.lt(self) {
            Some(Ordering::Greater)
        } else {
            None
        }
    }

    fn lt(&self, other: &Self) -> bool {
        self.compare(other, ffi::LUA_OPLT)
    }

    fn le(&self, other: &Self) -> bool {
        self.compare(other, ffi::LUA_OPLE)
    }

    fn gt(&self, other: &Self) -> bool {
        !self.le(other)
    }

    fn ge(&self, other: &Self) -> bool {
        !self.lt(other)
    }
}

impl fmt::Debug for LuaVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LuaVar")
            .field("type", &self.type_name())
            .field("reference", &self.registry_reference())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LuaState;

    #[test]
    fn test_copy_shares_slot() {
        let state = LuaState::new().unwrap();
        let mut a = LuaVar::with_context(state.context());
        a.set_integer(5);
        assert_eq!(a.ref_count(), 1);

        let b = a.clone();
        assert_eq!(a.ref_count(), 2);
        assert_eq!(b.ref_count(), 2);
        assert_eq!(a.registry_reference(), b.registry_reference());

        drop(b);
        assert_eq!(a.ref_count(), 1);
        assert_eq!(a.get_integer(), 5);
    }

    #[test]
    fn test_take_leaves_nil() {
        let state = LuaState::new().unwrap();
        let mut a = LuaVar::with_context(state.context());
        a.set_string("moved");

        let b = a.take();
        assert!(a.is_nil());
        assert_eq!(a.ref_count(), 0);
        assert_eq!(b.ref_count(), 1);
        assert_eq!(b.get_string(), "moved");
        assert!(a.context().unwrap().ptr_eq(state.context()));
    }

    #[test]
    fn test_set_releases_previous_slot() {
        let state = LuaState::new().unwrap();
        let context = state.context();
        let mut var = LuaVar::with_context(context);

        var.set_integer(1);
        assert_eq!(context.live_references(), 1);
        var.set_string("two");
        assert_eq!(context.live_references(), 1);
        var.set_nil();
        assert_eq!(context.live_references(), 0);
    }

    #[test]
    fn test_setting_nil_value_leaves_nil_handle() {
        let state = LuaState::new().unwrap();
        let mut var = LuaVar::with_context(state.context());
        var.set_value(crate::Nil);
        assert!(var.is_nil());
        assert_eq!(state.context().live_references(), 0);
    }

    #[test]
    fn test_predicates_on_nil() {
        let state = LuaState::new().unwrap();
        let var = LuaVar::with_context(state.context());
        assert!(var.is_nil());
        assert!(!var.is_valid());
        assert!(!var.is_integer());
        assert!(!var.is_number());
        assert!(!var.is_string());
        assert!(!var.is_bool());
        assert!(!var.is_table());
        assert!(!var.is_function());
        assert!(!var.is_cfunction());
        assert!(!var.is_light_userdata());
        assert!(!var.is_userdata());
        assert_eq!(var.type_name(), "nil");
    }

    #[test]
    fn test_number_predicates() {
        let state = LuaState::new().unwrap();
        let mut var = LuaVar::with_context(state.context());
        var.set_number(2.5);
        assert!(var.is_number());
        assert!(!var.is_integer());
        assert!(var.is_string());
        assert_eq!(var.type_name(), "number");

        var.set_integer(3);
        assert!(var.is_integer());
        assert!(var.is_number());
    }

    #[test]
    fn test_comparisons() {
        let state = LuaState::new().unwrap();
        let mut one = LuaVar::with_context(state.context());
        let mut two = LuaVar::with_context(state.context());
        one.set_integer(1);
        two.set_integer(2);

        assert!(one < two);
        assert!(one <= two);
        assert!(two > one);
        assert!(two >= one);
        assert!(one != two);

        let mut also_one = LuaVar::with_context(state.context());
        also_one.set_number(1.0);
        assert!(one == also_one);
        assert!(LuaVar::with_context(state.context()) == LuaVar::with_context(state.context()));
    }

    #[test]
    fn test_unordered_values_have_no_ordering() {
        let state = LuaState::new().unwrap();
        let mut nan = LuaVar::with_context(state.context());
        let mut one = LuaVar::with_context(state.context());
        nan.set_number(f64::NAN);
        one.set_integer(1);

        assert_eq!(nan.partial_cmp(&one), None);
        assert_eq!(one.partial_cmp(&nan), None);
        assert!(nan != nan.clone());

        let mut two = LuaVar::with_context(state.context());
        two.set_integer(2);
        assert_eq!(two.partial_cmp(&one), Some(Ordering::Greater));
        assert_eq!(one.partial_cmp(&two), Some(Ordering::Less));
    }

    #[test]
    fn test_closed_state_makes_handles_inert() {
        let state = LuaState::new().unwrap();
        let mut var = LuaVar::with_context(state.context());
        var.set_integer(9);
        let context = state.context().clone();
        drop(state);

        assert!(context.is_closed());
        assert_eq!(var.get_integer(), 0);
        assert!(!var.is_integer());
        var.clear();
        assert_eq!(context.live_references(), 0);
    }
}
