//! ferrous-lua library
//!
//! A binding layer between Rust and an embedded Lua 5.4 interpreter:
//! reference-counted value handles, table access and iteration, typed
//! marshalling, protected calls into Lua and Rust functions exposed to Lua.
//!
//! ```no_run
//! use ferrous_lua::{LuaFunction, LuaState, LuaVar};
//!
//! let state = LuaState::new()?;
//! state.globals().bind_function("square", |x: i64| x * x);
//! state.do_string("function twice(f, v) return f(f(v)) end")?;
//!
//! let twice: LuaFunction<i64> = state.get_global::<LuaVar>("twice").into();
//! assert_eq!(twice.call((state.get_global::<LuaVar>("square"), 3)), 81);
//! # Ok::<(), ferrous_lua::LuaBindError>(())
//! ```

pub mod config;
pub mod error;

mod bind;
mod context;
mod debug;
mod function;
mod iter;
mod marshal;
mod stack;
mod state;
mod var;

// Re-export commonly used types
pub use bind::{NativeFunction, NativeMethod};
pub use config::BindConfig;
pub use context::{default_context, set_default_context, Diagnostics, LuaContext};
pub use error::{LuaBindError, Result};
pub use function::LuaFunction;
pub use iter::{KeyValuePair, TableIterator};
pub use marshal::{
    CFunction, FromLua, FromLuaArgs, IntoLua, IntoLuaArgs, LightUserData, Nil, ReturnValue,
};
#[doc(hidden)]
pub use stack::Stack;
pub use state::LuaState;
pub use var::LuaVar;
