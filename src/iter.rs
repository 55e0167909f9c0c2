//! Table iteration
//!
//! `TableIterator` walks a table with `lua_next`, keeping the table and the
//! current key on the operand stack between steps. Iterators therefore nest
//! like stack frames: code run inside a loop body may push and pop freely as
//! long as it leaves the stack as it found it, and two iterators over the
//! same thread must end in reverse order of creation.

use std::iter::FusedIterator;

use mlua_sys as ffi;

use crate::context::LuaContext;
use crate::stack::Stack;
use crate::var::LuaVar;

/// A key and its value
pub type KeyValuePair = (LuaVar, LuaVar);

/// Iterator over the key/value pairs of a table, in `lua_next` order
pub struct TableIterator {
    context: Option<LuaContext>,
    raw: *mut ffi::lua_State,
    current: Option<KeyValuePair>,
}

impl TableIterator {
    fn exhausted(context: Option<LuaContext>) -> Self {
        TableIterator {
            context,
            raw: std::ptr::null_mut(),
            current: None,
        }
    }

    fn begin(table: &LuaVar) -> Self {
        let context = table.context().cloned();
        if table.is_nil() {
            table.report("Trying to get an iterator for an invalid variable.");
            return Self::exhausted(context);
        }
        let Some(stack) = table.stack() else {
            return Self::exhausted(context);
        };
        if !stack.reserve(4) {
            return Self::exhausted(context);
        }

        let mut guard = stack.guard();
        table.push_value(&stack);
        if unsafe { ffi::lua_type(stack.raw(), -1) } != ffi::LUA_TTABLE {
            stack.report(format!(
                "Trying to iterate over a variable that isn't a table.  Type is {}",
                stack.type_name_at(-1)
            ));
            return Self::exhausted(context);
        }
        unsafe { ffi::lua_pushnil(stack.raw()) };
        // Table and key stay pushed until the iterator ends
        guard.bump(2);
        drop(guard);

        let mut iter = TableIterator {
            raw: stack.raw(),
            context,
            current: None,
        };
        iter.advance();
        iter
    }

    /// True while positioned on a pair
    pub fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    /// The pair the iterator is positioned on
    pub fn pair(&self) -> Option<&KeyValuePair> {
        self.current.as_ref()
    }

    /// Move to the next pair; past the last one the iterator ends and pops
    /// the table
    pub fn advance(&mut self) {
        let Some(context) = self.context.as_ref() else {
            return;
        };
        if self.raw.is_null() {
            return;
        }
        if context.is_closed() {
            self.raw = std::ptr::null_mut();
            self.current = None;
            return;
        }

        let raw = self.raw;
        if unsafe { ffi::lua_next(raw, -2) } == 0 {
            unsafe { ffi::lua_pop(raw, 1) };
            self.raw = std::ptr::null_mut();
            self.current = None;
            return;
        }

        // Keep the key in place for the next step and reference a copy
        let stack = Stack::from_raw(context, raw);
        unsafe { ffi::lua_pushvalue(raw, -2) };
        let key = LuaVar::from_stack(&stack);
        let value = LuaVar::from_stack(&stack);
        self.current = Some((key, value));
    }
}

impl Iterator for TableIterator {
    type Item = KeyValuePair;

    fn next(&mut self) -> Option<Self::Item> {
        let pair = self.current.take()?;
        self.advance();
        Some(pair)
    }
}

impl FusedIterator for TableIterator {}

impl Drop for TableIterator {
    fn drop(&mut self) {
        let open = self.context.as_ref().is_some_and(|ctx| !ctx.is_closed());
        if open && !self.raw.is_null() {
            unsafe { ffi::lua_pop(self.raw, 2) };
        }
    }
}

impl LuaVar {
    /// Iterate over the table's key/value pairs
    ///
    /// A nil or non-table receiver is reported and yields nothing.
    pub fn iter(&self) -> TableIterator {
        TableIterator::begin(self)
    }
}

impl IntoIterator for &LuaVar {
    type Item = KeyValuePair;
    type IntoIter = TableIterator;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
