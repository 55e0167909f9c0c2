//! Exposing Rust functions to Lua
//!
//! Every bound function is one shared C trampoline closed over a userdata
//! block. The block holds a boxed `BindingCell`; its metatable's `__gc`
//! frees the cell when the interpreter collects the function.
//!
//! Three shapes are supported:
//! - free functions and closures (`bind_function`)
//! - methods on a shared instance fixed at bind time (`bind_method`)
//! - methods whose receiver is found at call time through the `__object`
//!   field of the first argument (`bind_dynamic_method`)

use std::any::{self, Any, TypeId};
use std::cell::RefCell;
use std::ffi::{c_void, CStr};
use std::mem;
use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::rc::Rc;

use mlua_sys as ffi;

use crate::context::WeakContext;
use crate::debug;
use crate::marshal::{build_arguments, FromLua, IntoLua, ReturnValue};
use crate::stack::Stack;
use crate::var::{LuaVar, NativeObject};

const BINDING_METATABLE: &CStr = c"ferrous_lua.binding";
const OBJECT_FIELD: &str = "__object";

/// A Rust callable usable as a Lua function with argument tuple `Args`
pub trait NativeFunction<Args>: 'static {
    #[doc(hidden)]
    fn invoke(&self, stack: &Stack<'_>) -> c_int;
}

/// A Rust callable usable as a method of `T` with argument tuple `Args`
pub trait NativeMethod<T, Args>: 'static {
    #[doc(hidden)]
    fn invoke(&self, instance: &mut T, stack: &Stack<'_>) -> c_int;
}

macro_rules! native_callables {
    ($($name:ident),*) => {
        impl<Func, Ret, $($name,)*> NativeFunction<($($name,)*)> for Func
        where
            Func: Fn($($name),*) -> Ret + 'static,
            Ret: ReturnValue,
            $($name: FromLua,)*
        {
            #[allow(non_snake_case)]
            fn invoke(&self, stack: &Stack<'_>) -> c_int {
                let ($($name,)*) = build_arguments::<($($name,)*)>(stack);
                (self)($($name),*).push_return(stack)
            }
        }

        impl<Func, T, Ret, $($name,)*> NativeMethod<T, ($($name,)*)> for Func
        where
            Func: Fn(&mut T, $($name),*) -> Ret + 'static,
            Ret: ReturnValue,
            $($name: FromLua,)*
        {
            #[allow(non_snake_case)]
            fn invoke(&self, instance: &mut T, stack: &Stack<'_>) -> c_int {
                let ($($name,)*) = build_arguments::<($($name,)*)>(stack);
                (self)(instance, $($name),*).push_return(stack)
            }
        }
    };
}

native_callables!();
native_callables!(A);
native_callables!(A, B);
native_callables!(A, B, C);
native_callables!(A, B, C, D);
native_callables!(A, B, C, D, E);
native_callables!(A, B, C, D, E, F);
native_callables!(A, B, C, D, E, F, G);
native_callables!(A, B, C, D, E, F, G, H);

type Invoker = Box<dyn Fn(&Stack<'_>) -> c_int>;
type ObjectInvoker = Box<dyn Fn(*mut c_void, &Stack<'_>) -> c_int>;

fn invoker(invoke: impl Fn(&Stack<'_>) -> c_int + 'static) -> Invoker {
    Box::new(invoke)
}

fn object_invoker(invoke: impl Fn(*mut c_void, &Stack<'_>) -> c_int + 'static) -> ObjectInvoker {
    Box::new(invoke)
}

enum Binding {
    Free(Invoker),
    Bound(Invoker),
    Dynamic {
        type_id: TypeId,
        type_name: &'static str,
        invoke: ObjectInvoker,
    },
}

struct BindingCell {
    context: WeakContext,
    name: String,
    binding: Binding,
}

impl BindingCell {
    fn dispatch(&self, stack: &Stack<'_>) -> c_int {
        match &self.binding {
            Binding::Free(invoke) | Binding::Bound(invoke) => invoke(stack),
            Binding::Dynamic {
                type_id,
                type_name,
                invoke,
            } => match self.receiver(stack, *type_id, type_name) {
                Some(object) => {
                    unsafe { ffi::lua_remove(stack.raw(), 1) };
                    invoke(object, stack)
                }
                None => 0,
            },
        }
    }

    /// Find the native receiver in `arg1.__object`, checking its type
    fn receiver(&self, stack: &Stack<'_>, type_id: TypeId, type_name: &str) -> Option<*mut c_void> {
        let raw = stack.raw();
        if unsafe { ffi::lua_type(raw, 1) } != ffi::LUA_TTABLE {
            stack.report(format!(
                "No table was passed into bound method '{}'.  Type is {}",
                self.name,
                stack.type_name_at(1)
            ));
            return None;
        }

        let _guard = stack.guard();
        OBJECT_FIELD.push_to(stack);
        unsafe { ffi::lua_rawget(raw, 1) };
        if unsafe { ffi::lua_type(raw, -1) } != ffi::LUA_TUSERDATA {
            stack.report(format!(
                "Couldn't find userdata {} on the table passed into '{}'.  Type is {}",
                OBJECT_FIELD,
                self.name,
                stack.type_name_at(-1)
            ));
            return None;
        }
        let Some(object) = NativeObject::at(stack, -1) else {
            stack.report(format!(
                "{} passed into '{}' isn't a wrapped native object",
                OBJECT_FIELD, self.name
            ));
            return None;
        };
        let pointer = object.pointer_for(type_id);
        if pointer.is_none() {
            stack.report(format!(
                "{} passed into '{}' wraps a {} but the method expects a {}",
                OBJECT_FIELD,
                self.name,
                object.type_name(),
                type_name
            ));
        }
        pointer
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Entry point of every bound function
unsafe extern "C-unwind" fn trampoline(state: *mut ffi::lua_State) -> c_int {
    let block = ffi::lua_touserdata(state, ffi::lua_upvalueindex(1)) as *const *mut BindingCell;
    if block.is_null() || (*block).is_null() {
        return 0;
    }
    let cell = &**block;
    let Some(context) = cell.context.upgrade() else {
        return 0;
    };
    if context.is_closed() {
        return 0;
    }

    let _active = context.enter(state);
    let stack = Stack::from_raw(&context, state);
    if context.config().trace_callbacks {
        log::trace!(
            target: "ferrous_lua",
            "calling native function '{}'\n{}",
            cell.name,
            debug::traceback(state)
        );
    }

    match panic::catch_unwind(AssertUnwindSafe(|| cell.dispatch(&stack))) {
        Ok(results) => results,
        Err(payload) => {
            stack.report(format!(
                "Native function '{}' panicked: {}",
                cell.name,
                panic_message(payload.as_ref())
            ));
            stack.set_top(0);
            0
        }
    }
}

/// `__gc` of the binding userdata
unsafe extern "C-unwind" fn release_binding(state: *mut ffi::lua_State) -> c_int {
    let block = ffi::lua_touserdata(state, 1) as *mut *mut BindingCell;
    if block.is_null() || (*block).is_null() {
        return 0;
    }
    let cell = mem::replace(&mut *block, ptr::null_mut());
    // Dropping captured handles must not unwind into the collector
    let _ = panic::catch_unwind(AssertUnwindSafe(|| drop(Box::from_raw(cell))));
    0
}

impl LuaVar {
    fn install_binding(&self, name: &str, binding: Binding) {
        if !self.is_table() {
            self.report(format!(
                "Trying to bind function '{}' on a variable that isn't a table.  Type is {}",
                name,
                self.type_name()
            ));
            return;
        }
        self.with_value(false, |stack| {
            if !stack.reserve(4) {
                return;
            }
            let raw = stack.raw();
            let cell = Box::new(BindingCell {
                context: stack.context().downgrade(),
                name: name.to_string(),
                binding,
            });

            name.push_to(stack);
            unsafe {
                let block = ffi::lua_newuserdata(raw, mem::size_of::<*mut BindingCell>())
                    as *mut *mut BindingCell;
                block.write(Box::into_raw(cell));
                if ffi::luaL_newmetatable(raw, BINDING_METATABLE.as_ptr()) != 0 {
                    ffi::lua_pushcfunction(raw, release_binding);
                    ffi::lua_setfield(raw, -2, c"__gc".as_ptr());
                }
                ffi::lua_setmetatable(raw, -2);
                ffi::lua_pushcclosure(raw, trampoline, 1);
                ffi::lua_settable(raw, -3);
            }
        });
    }

    /// Bind a free function or closure as `self[name]`
    ///
    /// Arguments missing from the Lua call take their defaults and extras
    /// are ignored. The result, if any, is returned to Lua.
    pub fn bind_function<Args, F>(&self, name: &str, func: F)
    where
        F: NativeFunction<Args>,
    {
        self.install_binding(
            name,
            Binding::Free(invoker(move |stack| func.invoke(stack))),
        );
    }

    /// Bind a method of a shared instance as `self[name]`
    ///
    /// The instance is borrowed mutably for the duration of each call. A
    /// re-entrant call on the same instance is reported and does nothing.
    pub fn bind_method<T, Args, M>(&self, name: &str, instance: Rc<RefCell<T>>, method: M)
    where
        T: 'static,
        M: NativeMethod<T, Args>,
    {
        let type_name = any::type_name::<T>();
        self.install_binding(
            name,
            Binding::Bound(invoker(move |stack| match instance.try_borrow_mut() {
                Ok(mut this) => method.invoke(&mut this, stack),
                Err(_) => {
                    stack.report(format!("Instance of {} is already in use", type_name));
                    0
                }
            })),
        );
    }

    /// Bind a method whose receiver comes from the call: the first argument
    /// must be a table whose `__object` field holds a pointer wrapped as `T`
    /// with `wrap_native_pointer`. The table itself is not passed on.
    pub fn bind_dynamic_method<T, Args, M>(&self, name: &str, method: M)
    where
        T: 'static,
        M: NativeMethod<T, Args>,
    {
        self.install_binding(
            name,
            Binding::Dynamic {
                type_id: TypeId::of::<T>(),
                type_name: any::type_name::<T>(),
                invoke: object_invoker(move |object, stack| {
                    let this = unsafe { &mut *(object as *mut T) };
                    method.invoke(this, stack)
                }),
            },
        );
    }
}
