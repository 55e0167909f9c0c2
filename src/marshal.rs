//! Value marshalling between Rust and the Lua operand stack
//!
//! `IntoLua` pushes a value, `FromLua` checks and reads one. Conversions
//! never fail loudly: an unreadable value is reported through the context
//! diagnostics and read as the type's default.
//!
//! `ReturnValue`, `IntoLuaArgs` and `FromLuaArgs` lift the single-value
//! traits to function results and argument lists.

use std::ffi::c_void;
use std::os::raw::c_int;
use std::ptr;

use mlua_sys as ffi;

use crate::debug;
use crate::stack::Stack;
use crate::var::LuaVar;

/// A value that can be pushed onto the operand stack
pub trait IntoLua {
    #[doc(hidden)]
    fn push_to(&self, stack: &Stack<'_>);
}

/// A value that can be read back from the operand stack
pub trait FromLua: Default + Sized {
    #[doc(hidden)]
    fn is_at(stack: &Stack<'_>, index: c_int) -> bool;

    #[doc(hidden)]
    fn read_at(stack: &Stack<'_>, index: c_int) -> Self;

    /// Value used for an argument the caller left out
    #[doc(hidden)]
    fn missing(_stack: &Stack<'_>) -> Self {
        Self::default()
    }
}

impl<T: IntoLua + ?Sized> IntoLua for &T {
    fn push_to(&self, stack: &Stack<'_>) {
        (**self).push_to(stack)
    }
}

/// The Lua `nil` value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Nil;

/// An opaque native address stored in Lua as light userdata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightUserData(pub *mut c_void);

impl Default for LightUserData {
    fn default() -> Self {
        LightUserData(ptr::null_mut())
    }
}

/// A raw C function value
#[derive(Clone, Copy, Default)]
pub struct CFunction(pub Option<ffi::lua_CFunction>);

impl std::fmt::Debug for CFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(func) => write!(f, "CFunction({:p})", func as *const ()),
            None => f.write_str("CFunction(null)"),
        }
    }
}

impl IntoLua for bool {
    fn push_to(&self, stack: &Stack<'_>) {
        unsafe { ffi::lua_pushboolean(stack.raw(), *self as c_int) }
    }
}

impl FromLua for bool {
    fn is_at(stack: &Stack<'_>, index: c_int) -> bool {
        unsafe { ffi::lua_type(stack.raw(), index) == ffi::LUA_TBOOLEAN }
    }

    fn read_at(stack: &Stack<'_>, index: c_int) -> Self {
        unsafe { ffi::lua_toboolean(stack.raw(), index) != 0 }
    }
}

macro_rules! lua_integer {
    ($($ty:ty),* $(,)?) => {$(
        impl IntoLua for $ty {
            fn push_to(&self, stack: &Stack<'_>) {
                unsafe { ffi::lua_pushinteger(stack.raw(), *self as ffi::lua_Integer) }
            }
        }

        impl FromLua for $ty {
            fn is_at(stack: &Stack<'_>, index: c_int) -> bool {
                unsafe { ffi::lua_isinteger(stack.raw(), index) != 0 }
            }

            fn read_at(stack: &Stack<'_>, index: c_int) -> Self {
                let mut converted = 0;
                let value = unsafe { ffi::lua_tointegerx(stack.raw(), index, &mut converted) };
                if converted == 0 {
                    stack.report(format!(
                        "Failed to convert value to integer.  Type is {}",
                        stack.type_name_at(index)
                    ));
                    return Self::default();
                }
                value as $ty
            }
        }
    )*};
}

// u64 and usize travel as the bit pattern of the signed 64-bit integer
lua_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

macro_rules! lua_number {
    ($($ty:ty),* $(,)?) => {$(
        impl IntoLua for $ty {
            fn push_to(&self, stack: &Stack<'_>) {
                unsafe { ffi::lua_pushnumber(stack.raw(), *self as ffi::lua_Number) }
            }
        }

        impl FromLua for $ty {
            fn is_at(stack: &Stack<'_>, index: c_int) -> bool {
                unsafe { ffi::lua_isnumber(stack.raw(), index) != 0 }
            }

            fn read_at(stack: &Stack<'_>, index: c_int) -> Self {
                let mut converted = 0;
                let value = unsafe { ffi::lua_tonumberx(stack.raw(), index, &mut converted) };
                if converted == 0 {
                    stack.report(format!(
                        "Failed to convert value to number.  Type is {}",
                        stack.type_name_at(index)
                    ));
                    return Self::default();
                }
                value as $ty
            }
        }
    )*};
}

lua_number!(f32, f64);

impl IntoLua for str {
    fn push_to(&self, stack: &Stack<'_>) {
        unsafe { ffi::lua_pushlstring(stack.raw(), self.as_ptr() as *const _, self.len()) };
    }
}

impl IntoLua for String {
    fn push_to(&self, stack: &Stack<'_>) {
        self.as_str().push_to(stack)
    }
}

impl FromLua for String {
    fn is_at(stack: &Stack<'_>, index: c_int) -> bool {
        unsafe { ffi::lua_isstring(stack.raw(), index) != 0 }
    }

    fn read_at(stack: &Stack<'_>, index: c_int) -> Self {
        // Copy first so a number is not converted in place
        let raw = stack.raw();
        let text = unsafe {
            let index = ffi::lua_absindex(raw, index);
            ffi::lua_pushvalue(raw, index);
            let text = debug::string_at(raw, -1);
            ffi::lua_pop(raw, 1);
            text
        };
        match text {
            Some(text) => text,
            None => {
                stack.report(format!(
                    "Failed to convert value to string.  Type is {}",
                    stack.type_name_at(index)
                ));
                String::new()
            }
        }
    }
}

impl IntoLua for Nil {
    fn push_to(&self, stack: &Stack<'_>) {
        unsafe { ffi::lua_pushnil(stack.raw()) }
    }
}

impl FromLua for Nil {
    fn is_at(stack: &Stack<'_>, index: c_int) -> bool {
        unsafe { ffi::lua_type(stack.raw(), index) <= ffi::LUA_TNIL }
    }

    fn read_at(_stack: &Stack<'_>, _index: c_int) -> Self {
        Nil
    }
}

impl IntoLua for LightUserData {
    fn push_to(&self, stack: &Stack<'_>) {
        unsafe { ffi::lua_pushlightuserdata(stack.raw(), self.0) }
    }
}

impl FromLua for LightUserData {
    fn is_at(stack: &Stack<'_>, index: c_int) -> bool {
        matches!(
            unsafe { ffi::lua_type(stack.raw(), index) },
            ffi::LUA_TLIGHTUSERDATA | ffi::LUA_TUSERDATA
        )
    }

    fn read_at(stack: &Stack<'_>, index: c_int) -> Self {
        if !Self::is_at(stack, index) {
            stack.report(format!(
                "Failed to convert value to userdata.  Type is {}",
                stack.type_name_at(index)
            ));
            return Self::default();
        }
        LightUserData(unsafe { ffi::lua_touserdata(stack.raw(), index) })
    }
}

impl IntoLua for CFunction {
    fn push_to(&self, stack: &Stack<'_>) {
        match self.0 {
            Some(func) => unsafe { ffi::lua_pushcfunction(stack.raw(), func) },
            None => unsafe { ffi::lua_pushnil(stack.raw()) },
        }
    }
}

impl FromLua for CFunction {
    fn is_at(stack: &Stack<'_>, index: c_int) -> bool {
        unsafe { ffi::lua_iscfunction(stack.raw(), index) != 0 }
    }

    fn read_at(stack: &Stack<'_>, index: c_int) -> Self {
        let func = unsafe { ffi::lua_tocfunction(stack.raw(), index) };
        if func.is_none() {
            stack.report(format!(
                "Failed to convert value to C function.  Type is {}",
                stack.type_name_at(index)
            ));
        }
        CFunction(func)
    }
}

impl IntoLua for LuaVar {
    fn push_to(&self, stack: &Stack<'_>) {
        self.push_value(stack)
    }
}

impl FromLua for LuaVar {
    fn is_at(_stack: &Stack<'_>, _index: c_int) -> bool {
        true
    }

    fn read_at(stack: &Stack<'_>, index: c_int) -> Self {
        unsafe { ffi::lua_pushvalue(stack.raw(), index) };
        LuaVar::from_stack(stack)
    }

    fn missing(stack: &Stack<'_>) -> Self {
        LuaVar::with_context(stack.context())
    }
}

/// Result shape of a call: nothing, or exactly one value
pub trait ReturnValue: Sized {
    /// Number of results the call produces
    #[doc(hidden)]
    const RESULTS: c_int;

    #[doc(hidden)]
    fn default_return() -> Self;

    #[doc(hidden)]
    fn read_return(stack: &Stack<'_>, index: c_int) -> Self;

    /// Push the result and return how many values were pushed
    #[doc(hidden)]
    fn push_return(self, stack: &Stack<'_>) -> c_int;
}

impl ReturnValue for () {
    const RESULTS: c_int = 0;

    fn default_return() -> Self {}

    fn read_return(_stack: &Stack<'_>, _index: c_int) -> Self {}

    fn push_return(self, _stack: &Stack<'_>) -> c_int {
        0
    }
}

macro_rules! single_return {
    ($($ty:ty),* $(,)?) => {$(
        impl ReturnValue for $ty {
            const RESULTS: c_int = 1;

            fn default_return() -> Self {
                Default::default()
            }

            fn read_return(stack: &Stack<'_>, index: c_int) -> Self {
                <$ty as FromLua>::read_at(stack, index)
            }

            fn push_return(self, stack: &Stack<'_>) -> c_int {
                self.push_to(stack);
                1
            }
        }
    )*};
}

single_return!(
    bool, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, String, Nil,
    LightUserData, CFunction, LuaVar,
);

/// An argument list that can be pushed for a call
pub trait IntoLuaArgs {
    #[doc(hidden)]
    const COUNT: c_int;

    #[doc(hidden)]
    fn push_args(&self, stack: &Stack<'_>);
}

/// An argument list read from the frame of a native function
pub trait FromLuaArgs: Sized {
    /// Read positions `1..` where `supplied` values are present; missing
    /// trailing arguments take their defaults
    #[doc(hidden)]
    fn from_stack(stack: &Stack<'_>, supplied: c_int) -> Self;
}

macro_rules! lua_args_tuple {
    ($count:expr; $($name:ident $idx:tt),*) => {
        impl<$($name: IntoLua),*> IntoLuaArgs for ($($name,)*) {
            const COUNT: c_int = $count;

            #[allow(unused_variables)]
            fn push_args(&self, stack: &Stack<'_>) {
                $( self.$idx.push_to(stack); )*
            }
        }

        impl<$($name: FromLua),*> FromLuaArgs for ($($name,)*) {
            #[allow(unused_variables)]
            fn from_stack(stack: &Stack<'_>, supplied: c_int) -> Self {
                ($(
                    if $idx < supplied {
                        $name::read_at(stack, $idx + 1)
                    } else {
                        $name::missing(stack)
                    },
                )*)
            }
        }
    };
}

lua_args_tuple!(0;);
lua_args_tuple!(1; A 0);
lua_args_tuple!(2; A 0, B 1);
lua_args_tuple!(3; A 0, B 1, C 2);
lua_args_tuple!(4; A 0, B 1, C 2, D 3);
lua_args_tuple!(5; A 0, B 1, C 2, D 3, E 4);
lua_args_tuple!(6; A 0, B 1, C 2, D 3, E 4, F 5);
lua_args_tuple!(7; A 0, B 1, C 2, D 3, E 4, F 5, G 6);
lua_args_tuple!(8; A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);

/// Read every argument of a native call, then clear the frame
pub(crate) fn build_arguments<Args: FromLuaArgs>(stack: &Stack<'_>) -> Args {
    let supplied = stack.top();
    let args = Args::from_stack(stack, supplied);
    stack.set_top(0);
    args
}
