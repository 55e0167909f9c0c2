//! Calling Lua functions from Rust

use std::fmt;
use std::marker::PhantomData;

use mlua_sys as ffi;

use crate::debug;
use crate::error::{LuaBindError, Result};
use crate::marshal::{IntoLuaArgs, ReturnValue};
use crate::var::LuaVar;

/// A Lua function called with a fixed result type `R`
///
/// Calls run protected. A runtime error is reported through the context
/// diagnostics with its traceback and the call yields `R`'s default;
/// `try_call` returns the error instead.
pub struct LuaFunction<R = ()> {
    function: LuaVar,
    _result: PhantomData<fn() -> R>,
}

impl<R: ReturnValue> LuaFunction<R> {
    pub fn new(function: LuaVar) -> Self {
        LuaFunction {
            function,
            _result: PhantomData,
        }
    }

    /// The wrapped handle
    pub fn var(&self) -> &LuaVar {
        &self.function
    }

    pub fn into_var(self) -> LuaVar {
        self.function
    }

    /// Call with no arguments
    pub fn call0(&self) -> R {
        self.call(())
    }

    /// Call with a tuple of arguments
    pub fn call<A: IntoLuaArgs>(&self, args: A) -> R {
        self.try_call(args).unwrap_or_else(|_| R::default_return())
    }

    /// Call with a tuple of arguments, returning the failure as well as
    /// reporting it
    pub fn try_call<A: IntoLuaArgs>(&self, args: A) -> Result<R> {
        if !self.function.is_function() {
            let type_name = self.function.type_name();
            self.function
                .report(format!("Attempting to call invalid Lua function.  Type is {}", type_name));
            return Err(LuaBindError::NotAFunction(type_name));
        }
        let stack = self.function.stack().ok_or(LuaBindError::StateClosed)?;
        let _guard = stack.guard();
        if !stack.reserve(A::COUNT + 2) {
            return Err(LuaBindError::Runtime("Lua stack overflow".to_string()));
        }

        let raw = stack.raw();
        unsafe { ffi::lua_pushcfunction(raw, debug::on_lua_exception) };
        let handler = stack.top();
        self.function.push_value(&stack);
        args.push_args(&stack);

        let status = unsafe { ffi::lua_pcall(raw, A::COUNT, R::RESULTS, handler) };
        if status != ffi::LUA_OK {
            let message = unsafe { debug::error_message(raw, -1) };
            stack.report(message.clone());
            return Err(LuaBindError::Runtime(message));
        }
        Ok(R::read_return(&stack, -1))
    }
}

impl<R> Clone for LuaFunction<R> {
    fn clone(&self) -> Self {
        LuaFunction {
            function: self.function.clone(),
            _result: PhantomData,
        }
    }
}

impl<R: ReturnValue> From<LuaVar> for LuaFunction<R> {
    fn from(function: LuaVar) -> Self {
        LuaFunction::new(function)
    }
}

impl<R> fmt::Debug for LuaFunction<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LuaFunction").field(&self.function).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LuaState;

    #[test]
    fn test_call_with_result() {
        let state = LuaState::new().unwrap();
        state
            .do_string("function add(a, b) return a + b end")
            .unwrap();
        let add: LuaFunction<i64> = state.get_global::<LuaVar>("add").into();
        assert_eq!(add.call((2, 3)), 5);
        assert_eq!(add.call((40i64, 2i64)), 42);
    }

    #[test]
    fn test_call_without_result() {
        let state = LuaState::new().unwrap();
        state
            .do_string("called = 0 function bump() called = called + 1 end")
            .unwrap();
        let bump = LuaFunction::<()>::new(state.get_global("bump"));
        bump.call0();
        bump.call0();
        assert_eq!(state.get_global::<i64>("called"), 2);
    }

    #[test]
    fn test_non_function_returns_default() {
        let state = LuaState::new().unwrap();
        let mut value = LuaVar::with_context(state.context());
        value.set_integer(5);
        let depth = state.stack_depth();

        let func = LuaFunction::<i64>::new(value);
        assert_eq!(func.call((1,)), 0);
        assert!(matches!(
            func.try_call(()),
            Err(LuaBindError::NotAFunction(ref t)) if t == "number"
        ));
        assert_eq!(state.stack_depth(), depth);
        assert_eq!(state.context().diagnostics().error_count(), 2);
    }

    #[test]
    fn test_runtime_error_carries_traceback() {
        let state = LuaState::new().unwrap();
        state
            .do_string("function boom() error('kaboom') end")
            .unwrap();
        let depth = state.stack_depth();
        let boom = LuaFunction::<String>::new(state.get_global("boom"));

        match boom.try_call(()) {
            Err(LuaBindError::Runtime(message)) => {
                assert!(message.starts_with("Lua Exception:\n"), "{}", message);
                assert!(message.contains("kaboom"));
                assert!(message.contains("stack traceback:"));
            }
            other => panic!("expected runtime error, got {:?}", other),
        }
        assert_eq!(boom.call0(), "");
        assert_eq!(state.stack_depth(), depth);
    }

    #[test]
    fn test_extra_results_truncated() {
        let state = LuaState::new().unwrap();
        state
            .do_string("function pair() return 1, 2 end")
            .unwrap();
        let pair = LuaFunction::<i64>::new(state.get_global("pair"));
        assert_eq!(pair.call0(), 1);
    }
}
