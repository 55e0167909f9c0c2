//! Interpreter context shared by every handle
//!
//! A `LuaContext` is the native side's view of one interpreter: the raw
//! `lua_State` pointers, the diagnostics sink and the binding configuration.
//! It is reference-counted and single-threaded. Handles keep it alive, but
//! they never keep the interpreter itself alive: once the owning `LuaState`
//! closes, the context reports itself closed and every handle goes inert.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::ptr;
use std::rc::{Rc, Weak};

use mlua_sys as ffi;

use crate::config::BindConfig;

const LOG_TARGET: &str = "ferrous_lua";

/// Programmer-error diagnostics channel
///
/// Every fail-soft path in the binding layer ends here: the message is logged
/// at error level, counted, and kept as the last error. With
/// `strict_checks` enabled, builds with debug assertions panic instead.
#[derive(Debug, Default)]
pub struct Diagnostics {
    strict: bool,
    errors: Cell<usize>,
    last: RefCell<Option<String>>,
}

impl Diagnostics {
    fn new(strict: bool) -> Self {
        Diagnostics {
            strict,
            ..Default::default()
        }
    }

    /// Report a diagnostic
    pub fn report(&self, message: impl Into<String>) {
        let message = message.into();
        log::error!(target: LOG_TARGET, "{}", message);
        self.errors.set(self.errors.get() + 1);
        if self.strict && cfg!(debug_assertions) {
            panic!("{}", message);
        }
        *self.last.borrow_mut() = Some(message);
    }

    /// Number of diagnostics reported so far
    pub fn error_count(&self) -> usize {
        self.errors.get()
    }

    /// The most recent diagnostic, if any
    pub fn last_error(&self) -> Option<String> {
        self.last.borrow().clone()
    }

    /// Forget all reported diagnostics
    pub fn clear(&self) {
        self.errors.set(0);
        self.last.borrow_mut().take();
    }
}

/// Report a diagnostic for a handle that has no context at all
pub(crate) fn report_detached(message: impl AsRef<str>) {
    log::error!(target: LOG_TARGET, "{}", message.as_ref());
}

pub(crate) struct ContextCore {
    main: Cell<*mut ffi::lua_State>,
    active: Cell<*mut ffi::lua_State>,
    diagnostics: Diagnostics,
    config: BindConfig,
    live_refs: Cell<usize>,
}

/// Shared handle to one interpreter context
#[derive(Clone)]
pub struct LuaContext(Rc<ContextCore>);

/// Non-owning form of `LuaContext`, stored inside Lua-owned blocks
#[derive(Clone)]
pub(crate) struct WeakContext(Weak<ContextCore>);

impl WeakContext {
    pub(crate) fn upgrade(&self) -> Option<LuaContext> {
        self.0.upgrade().map(LuaContext)
    }
}

thread_local! {
    static DEFAULT_CONTEXT: RefCell<Weak<ContextCore>> = RefCell::new(Weak::new());
}

/// Install (or remove) the thread's default context
///
/// `LuaVar::new()` binds new handles to this context. It is held weakly, so
/// installing it does not extend the interpreter's lifetime.
pub fn set_default_context(context: Option<&LuaContext>) {
    let weak = context.map(|ctx| Rc::downgrade(&ctx.0)).unwrap_or_default();
    DEFAULT_CONTEXT.with(|slot| *slot.borrow_mut() = weak);
}

/// The thread's default context, if one is installed and still open
pub fn default_context() -> Option<LuaContext> {
    DEFAULT_CONTEXT
        .with(|slot| slot.borrow().upgrade())
        .map(LuaContext)
        .filter(|ctx| !ctx.is_closed())
}

impl LuaContext {
    pub(crate) fn new(raw: *mut ffi::lua_State, config: BindConfig) -> Self {
        LuaContext(Rc::new(ContextCore {
            main: Cell::new(raw),
            active: Cell::new(raw),
            diagnostics: Diagnostics::new(config.strict_checks),
            config,
            live_refs: Cell::new(0),
        }))
    }

    /// The thread whose stack handle operations currently use
    pub(crate) fn raw(&self) -> *mut ffi::lua_State {
        self.0.active.get()
    }

    /// True once the owning state has been closed
    pub fn is_closed(&self) -> bool {
        self.0.main.get().is_null()
    }

    /// Detach from the interpreter, returning the main state for closing
    pub(crate) fn close(&self) -> *mut ffi::lua_State {
        let raw = self.0.main.replace(ptr::null_mut());
        self.0.active.set(ptr::null_mut());
        // The thread-local may already be gone when a state drops at thread exit
        let _ = DEFAULT_CONTEXT.try_with(|slot| {
            let mut slot = slot.borrow_mut();
            if ptr::eq(slot.as_ptr(), Rc::as_ptr(&self.0)) {
                *slot = Weak::new();
            }
        });
        raw
    }

    /// Route handle operations to `thread` until the guard drops
    pub(crate) fn enter(&self, thread: *mut ffi::lua_State) -> ActiveThread<'_> {
        let previous = self.0.active.replace(thread);
        ActiveThread {
            core: &self.0,
            previous,
        }
    }

    pub(crate) fn downgrade(&self) -> WeakContext {
        WeakContext(Rc::downgrade(&self.0))
    }

    /// True if both handles refer to the same interpreter context
    pub fn ptr_eq(&self, other: &LuaContext) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Diagnostics sink for this context
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.0.diagnostics
    }

    /// Configuration the state was created with
    pub fn config(&self) -> &BindConfig {
        &self.0.config
    }

    pub(crate) fn report(&self, message: impl Into<String>) {
        self.0.diagnostics.report(message);
    }

    /// Number of registry slots currently owned by handles
    pub fn live_references(&self) -> usize {
        self.0.live_refs.get()
    }

    pub(crate) fn reference_acquired(&self) {
        self.0.live_refs.set(self.0.live_refs.get() + 1);
    }

    /// Release a registry slot. A closed interpreter has already freed it.
    pub(crate) fn release_reference(&self, reference: i32) {
        self.0.live_refs.set(self.0.live_refs.get().saturating_sub(1));
        let raw = self.raw();
        if !raw.is_null() {
            unsafe { ffi::luaL_unref(raw, ffi::LUA_REGISTRYINDEX, reference) };
        }
    }
}

impl fmt::Debug for LuaContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LuaContext")
            .field("closed", &self.is_closed())
            .field("live_references", &self.live_references())
            .field("errors", &self.diagnostics().error_count())
            .finish()
    }
}

/// Restores the previously active thread on drop
pub(crate) struct ActiveThread<'a> {
    core: &'a ContextCore,
    previous: *mut ffi::lua_State,
}

impl Drop for ActiveThread<'_> {
    fn drop(&mut self) {
        if !self.core.main.get().is_null() {
            self.core.active.set(self.previous);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostics_counting() {
        let diagnostics = Diagnostics::new(false);
        assert_eq!(diagnostics.error_count(), 0);
        assert_eq!(diagnostics.last_error(), None);

        diagnostics.report("first");
        diagnostics.report(String::from("second"));
        assert_eq!(diagnostics.error_count(), 2);
        assert_eq!(diagnostics.last_error().as_deref(), Some("second"));

        diagnostics.clear();
        assert_eq!(diagnostics.error_count(), 0);
        assert_eq!(diagnostics.last_error(), None);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "receiver is not a table")]
    fn test_strict_diagnostics_panic() {
        let diagnostics = Diagnostics::new(true);
        diagnostics.report("receiver is not a table");
    }

    #[test]
    fn test_default_context_is_weak() {
        let context = LuaContext::new(ptr::null_mut(), BindConfig::default());
        set_default_context(Some(&context));
        // A context with a null main state counts as closed
        assert!(default_context().is_none());

        set_default_context(None);
        assert!(default_context().is_none());
    }

    #[test]
    fn test_enter_restores_previous_thread() {
        let mut fake_main = 0u8;
        let mut fake_thread = 0u8;
        let main = &mut fake_main as *mut u8 as *mut ffi::lua_State;
        let thread = &mut fake_thread as *mut u8 as *mut ffi::lua_State;

        let context = LuaContext::new(main, BindConfig::default());
        {
            let _active = context.enter(thread);
            assert_eq!(context.raw(), thread);
        }
        assert_eq!(context.raw(), main);

        // Detach without ever touching the fake pointers
        assert_eq!(context.close(), main);
        assert!(context.is_closed());
    }
}
