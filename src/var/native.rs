//! Native objects wrapped in full userdata

use std::any::{type_name, TypeId};
use std::ffi::c_void;
use std::mem;

use mlua_sys as ffi;

use super::LuaVar;
use crate::stack::Stack;

const NATIVE_OBJECT_MAGIC: u64 = 0x6665_7272_6f75_736f;

/// Layout of the userdata block created by `wrap_native_pointer`
#[repr(C)]
pub(crate) struct NativeObject {
    magic: u64,
    type_id: TypeId,
    type_name: &'static str,
    ptr: *mut c_void,
}

impl NativeObject {
    /// Interpret a userdata block, rejecting anything we didn't create
    ///
    /// # Safety
    /// `block` must be null or point to a userdata block of `len` bytes.
    pub(crate) unsafe fn from_userdata<'a>(block: *mut c_void, len: usize) -> Option<&'a Self> {
        if block.is_null() || len != mem::size_of::<NativeObject>() {
            return None;
        }
        let object = &*(block as *const NativeObject);
        (object.magic == NATIVE_OBJECT_MAGIC).then_some(object)
    }

    /// The wrapped pointer, if it was wrapped as `type_id`
    pub(crate) fn pointer_for(&self, type_id: TypeId) -> Option<*mut c_void> {
        (self.type_id == type_id).then_some(self.ptr)
    }

    pub(crate) fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Read the object in the full userdata at `index`, if it is one
    pub(crate) fn at<'a>(stack: &Stack<'_>, index: i32) -> Option<&'a Self> {
        let raw = stack.raw();
        unsafe {
            if ffi::lua_type(raw, index) != ffi::LUA_TUSERDATA {
                return None;
            }
            let len = ffi::lua_rawlen(raw, index) as usize;
            Self::from_userdata(ffi::lua_touserdata(raw, index), len)
        }
    }
}

impl LuaVar {
    /// Replace the handle with a userdata block recording `ptr` and its type
    ///
    /// The interpreter never owns or frees the pointee. Tables carrying the
    /// block under `__object` can be passed to dynamically dispatched
    /// methods, which check the recorded type before calling in.
    ///
    /// # Safety
    /// `ptr` must stay valid for as long as scripts can reach the block.
    pub unsafe fn wrap_native_pointer<T: 'static>(&mut self, ptr: *mut T) {
        if ptr.is_null() {
            self.report("Trying to wrap a null native pointer");
            return;
        }
        let Some(context) = self.context.clone() else {
            self.report("Trying to wrap a native pointer with no Lua state");
            return;
        };
        let Some(stack) = Stack::new(&context) else {
            context.report("Variable's Lua state has been closed");
            return;
        };

        let block =
            ffi::lua_newuserdata(stack.raw(), mem::size_of::<NativeObject>()) as *mut NativeObject;
        block.write(NativeObject {
            magic: NATIVE_OBJECT_MAGIC,
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            ptr: ptr as *mut c_void,
        });
        self.clear();
        self.reference_top(&stack);
    }

    /// The pointer stored by `wrap_native_pointer`, if it was wrapped as `T`
    pub fn native_pointer<T: 'static>(&self) -> Option<*mut T> {
        self.with_value(false, |stack| {
            NativeObject::at(stack, -1).and_then(|object| object.pointer_for(TypeId::of::<T>()))
        })
        .flatten()
        .map(|ptr| ptr as *mut T)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LuaState;

    #[test]
    fn test_wrap_and_recover_pointer() {
        let state = LuaState::new().unwrap();
        let mut value = 5i32;
        let mut var = LuaVar::with_context(state.context());
        unsafe { var.wrap_native_pointer(&mut value as *mut i32) };

        assert!(var.is_userdata());
        assert_eq!(var.native_pointer::<i32>(), Some(&mut value as *mut i32));
        assert_eq!(var.native_pointer::<u8>(), None);
    }

    #[test]
    fn test_foreign_userdata_is_rejected() {
        let state = LuaState::new().unwrap();
        let mut var = LuaVar::with_context(state.context());
        unsafe {
            let stack = Stack::new(state.context()).unwrap();
            ffi::lua_newuserdata(stack.raw(), mem::size_of::<NativeObject>());
            // Zeroed block: right size, no magic
            let block = ffi::lua_touserdata(stack.raw(), -1) as *mut u8;
            block.write_bytes(0, mem::size_of::<NativeObject>());
            var.clear();
            var.reference_top(&stack);
        }
        assert!(var.is_userdata());
        assert_eq!(var.native_pointer::<i32>(), None);
    }

    #[test]
    fn test_wrap_null_reports() {
        let state = LuaState::new().unwrap();
        let mut var = LuaVar::with_context(state.context());
        unsafe { var.wrap_native_pointer(std::ptr::null_mut::<i32>()) };
        assert!(var.is_nil());
        assert_eq!(state.context().diagnostics().error_count(), 1);
    }
}
