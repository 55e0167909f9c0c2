//! Interpreter ownership
//!
//! `LuaState` creates and closes one Lua 5.4 interpreter and runs source on
//! it. Everything else in the crate reaches the interpreter through the
//! shared `LuaContext`, so handles may outlive the state; they just stop
//! doing anything once it is gone.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::fs;
use std::path::Path;

use mlua_sys as ffi;
use sha1::{Digest, Sha1};

use crate::config::BindConfig;
use crate::context::{set_default_context, LuaContext};
use crate::debug;
use crate::error::{LuaBindError, Result};
use crate::marshal::{FromLua, IntoLua};
use crate::stack::Stack;
use crate::var::LuaVar;

const DEFAULT_CHUNK_NAME: &CStr = c"=[string]";

/// An embedded Lua interpreter
pub struct LuaState {
    context: LuaContext,
    chunk_cache: RefCell<HashMap<String, LuaVar>>,
}

impl LuaState {
    /// Create an interpreter with the default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(BindConfig::default())
    }

    /// Create an interpreter configured by `config`
    pub fn with_config(config: BindConfig) -> Result<Self> {
        let raw = unsafe { ffi::luaL_newstate() };
        if raw.is_null() {
            log::error!(target: "ferrous_lua", "Couldn't create Lua state");
            return Err(LuaBindError::StateCreation);
        }
        if config.open_standard_libs {
            unsafe { ffi::luaL_openlibs(raw) };
        }

        let install = config.install_as_default;
        let context = LuaContext::new(raw, config);
        if install {
            set_default_context(Some(&context));
        }
        log::debug!(target: "ferrous_lua", "Lua state created");

        Ok(LuaState {
            context,
            chunk_cache: RefCell::new(HashMap::new()),
        })
    }

    /// Create an interpreter configured from a config file
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = BindConfig::from_file(path.as_ref())?;
        Self::with_config(config)
    }

    /// Shared context used by handles bound to this interpreter
    pub fn context(&self) -> &LuaContext {
        &self.context
    }

    /// Make this interpreter the thread's default context
    pub fn make_default(&self) {
        set_default_context(Some(&self.context));
    }

    fn stack(&self) -> Result<Stack<'_>> {
        Stack::new(&self.context).ok_or(LuaBindError::StateClosed)
    }

    fn load_chunk(stack: &Stack<'_>, source: &[u8], chunk_name: &CStr) -> Result<()> {
        let raw = stack.raw();
        let status = unsafe {
            ffi::luaL_loadbufferx(
                raw,
                source.as_ptr() as *const _,
                source.len(),
                chunk_name.as_ptr(),
                std::ptr::null(),
            )
        };
        if status != ffi::LUA_OK {
            let message = unsafe { debug::error_message(raw, -1) };
            stack.report(format!("Script Syntax Error:\n{}", message));
            return Err(LuaBindError::Syntax(message));
        }
        Ok(())
    }

    fn run_chunk(&self, source: &[u8], chunk_name: &CStr) -> Result<()> {
        let stack = self.stack()?;
        let _guard = stack.guard();
        if !stack.reserve(2) {
            return Err(LuaBindError::Runtime("Lua stack overflow".to_string()));
        }
        let raw = stack.raw();

        unsafe { ffi::lua_pushcfunction(raw, debug::on_lua_exception) };
        let handler = stack.top();
        Self::load_chunk(&stack, source, chunk_name)?;

        let status = unsafe { ffi::lua_pcall(raw, 0, 0, handler) };
        if status != ffi::LUA_OK {
            let message = unsafe { debug::error_message(raw, -1) };
            stack.report(message.clone());
            return Err(LuaBindError::Runtime(message));
        }
        Ok(())
    }

    /// Compile and run `source`
    pub fn do_string(&self, source: &str) -> Result<()> {
        let chunk_name = chunk_name_for(source);
        self.run_chunk(source.as_bytes(), &chunk_name)
    }

    /// Read, compile and run the script at `path`
    pub fn do_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let source = fs::read(path).map_err(|source| {
            self.context
                .report(format!("Couldn't read script {}: {}", path.display(), source));
            LuaBindError::Io {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let chunk_name = CString::new(format!("@{}", path.display()))
            .unwrap_or_else(|_| DEFAULT_CHUNK_NAME.to_owned());
        self.run_chunk(&source, &chunk_name)
    }

    /// Compile `source` without running it
    ///
    /// Returns the chunk as a function handle, or nil after reporting a
    /// syntax error.
    pub fn load_string(&self, source: &str) -> LuaVar {
        let Ok(stack) = self.stack() else {
            return LuaVar::with_context(&self.context);
        };
        let _guard = stack.guard();
        let chunk_name = chunk_name_for(source);
        if Self::load_chunk(&stack, source.as_bytes(), &chunk_name).is_err() {
            return LuaVar::with_context(&self.context);
        }
        LuaVar::from_stack(&stack)
    }

    /// Cache key of `source`: its SHA1 digest in hex
    pub fn script_id(source: &str) -> String {
        let mut hasher = Sha1::new();
        hasher.update(source.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Compile `source` once and reuse the chunk on later calls
    pub fn load_cached(&self, source: &str) -> LuaVar {
        let id = Self::script_id(source);
        if let Some(chunk) = self.chunk_cache.borrow().get(&id) {
            return chunk.clone();
        }

        let chunk = self.load_string(source);
        if chunk.is_function() {
            let limit = self.context.config().chunk_cache_limit;
            let mut cache = self.chunk_cache.borrow_mut();
            if cache.len() >= limit {
                log::debug!(target: "ferrous_lua", "Chunk cache full, flushing {} entries", cache.len());
                cache.clear();
            }
            if limit > 0 {
                cache.insert(id, chunk.clone());
            }
        }
        chunk
    }

    /// A chunk previously compiled by `load_cached`, by script id
    pub fn cached_chunk(&self, id: &str) -> Option<LuaVar> {
        self.chunk_cache.borrow().get(id).cloned()
    }

    /// Number of chunks in the cache
    pub fn cached_chunk_count(&self) -> usize {
        self.chunk_cache.borrow().len()
    }

    /// Drop every cached chunk
    pub fn flush_chunk_cache(&self) {
        self.chunk_cache.borrow_mut().clear();
    }

    /// The global table
    pub fn globals(&self) -> LuaVar {
        let Ok(stack) = self.stack() else {
            return LuaVar::with_context(&self.context);
        };
        unsafe { ffi::lua_pushglobaltable(stack.raw()) };
        LuaVar::from_stack(&stack)
    }

    /// Read a global as `T`
    pub fn get_global<T: FromLua>(&self, name: &str) -> T {
        self.globals().get_at(name)
    }

    /// Assign a global
    pub fn set_global<T: IntoLua>(&self, name: &str, value: T) {
        self.globals().set_table_value(name, value)
    }

    /// Empty the operand stack
    pub fn clear_stack(&self) {
        if let Ok(stack) = self.stack() {
            stack.set_top(0);
        }
    }

    /// Run a full garbage collection cycle
    pub fn collect_garbage(&self) {
        if let Ok(stack) = self.stack() {
            unsafe { ffi::lua_gc(stack.raw(), ffi::LUA_GCCOLLECT) };
        }
    }

    /// Memory in use by the interpreter, in kilobytes
    pub fn memory_used_kb(&self) -> usize {
        self.stack()
            .map(|stack| unsafe { ffi::lua_gc(stack.raw(), ffi::LUA_GCCOUNT) } as usize)
            .unwrap_or(0)
    }

    /// Current height of the operand stack
    pub fn stack_depth(&self) -> i32 {
        self.stack().map(|stack| stack.top()).unwrap_or(0)
    }

    /// Raw length of the registry table
    pub fn registry_len(&self) -> usize {
        self.stack()
            .map(|stack| unsafe { ffi::lua_rawlen(stack.raw(), ffi::LUA_REGISTRYINDEX) } as usize)
            .unwrap_or(0)
    }

    /// Log and return a one-line rendering of the operand stack
    pub fn dump_stack(&self, prefix: Option<&str>) -> String {
        self.stack()
            .map(|stack| debug::dump_stack(stack.raw(), prefix))
            .unwrap_or_default()
    }

    /// Current Lua traceback
    pub fn traceback(&self) -> String {
        self.stack()
            .map(|stack| debug::traceback(stack.raw()))
            .unwrap_or_default()
    }
}

impl Drop for LuaState {
    fn drop(&mut self) {
        self.chunk_cache.get_mut().clear();
        let raw = self.context.close();
        if !raw.is_null() {
            unsafe { ffi::lua_close(raw) };
            log::debug!(target: "ferrous_lua", "Lua state closed");
        }
    }
}

/// Chunk name for inline source: the source itself, as Lua's own loaders use
fn chunk_name_for(source: &str) -> CString {
    CString::new(source).unwrap_or_else(|_| DEFAULT_CHUNK_NAME.to_owned())
}
