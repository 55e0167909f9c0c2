//! Integration tests for variable handles
//!
//! Covers registry ownership, value round trips, table access and iteration
//! through the public API against a real interpreter.

use ferrous_lua::{LightUserData, LuaState, LuaVar, Nil};

fn table(state: &LuaState) -> LuaVar {
    let mut table = LuaVar::with_context(state.context());
    table.create_table(0, 0);
    table
}

/// Clearing a handle frees its registry slot for reuse
#[test]
fn test_clear_releases_registry_slot() {
    let state = LuaState::new().unwrap();
    let context = state.context();

    // Warm up so the registry free list is in its steady state
    let mut warm = LuaVar::with_context(context);
    warm.set_integer(0);
    warm.clear();

    let baseline = state.registry_len();
    for i in 0..100 {
        let mut var = LuaVar::with_context(context);
        var.set_integer(i);
        assert_eq!(context.live_references(), 1);
        var.clear();
        assert_eq!(context.live_references(), 0);
    }
    assert_eq!(state.registry_len(), baseline);
}

/// Copies share one slot; the slot lives until the last copy goes
#[test]
fn test_copy_and_move_laws() {
    let state = LuaState::new().unwrap();
    let context = state.context();

    let mut original = LuaVar::with_context(context);
    original.set_string("shared");
    let copy = original.clone();
    assert_eq!(copy.ref_count(), 2);
    assert_eq!(context.live_references(), 1);

    original.clear();
    assert_eq!(copy.ref_count(), 1);
    assert_eq!(copy.get_string(), "shared");

    let mut source = copy;
    let moved = source.take();
    assert!(source.is_nil());
    assert_eq!(moved.ref_count(), 1);
    assert_eq!(context.live_references(), 1);

    drop(moved);
    assert_eq!(context.live_references(), 0);
}

/// Values of every supported kind come back as they went in
#[test]
fn test_value_round_trips() {
    let state = LuaState::new().unwrap();
    let mut var = LuaVar::with_context(state.context());

    for value in [0i64, 1, -1, i64::MIN, i64::MAX] {
        var.set_integer(value);
        assert_eq!(var.get_integer(), value);
    }

    var.set_value(u64::MAX);
    assert_eq!(var.get_value::<u64>(), u64::MAX);

    var.set_number(-0.25);
    assert_eq!(var.get_number(), -0.25);

    var.set_value(1.5f32);
    assert_eq!(var.get_value::<f32>(), 1.5);

    var.set_string("");
    assert!(var.is_string());
    assert_eq!(var.get_string(), "");

    var.set_string("ünïcödé");
    assert_eq!(var.get_string(), "ünïcödé");

    var.set_bool(false);
    assert!(var.is_bool());
    assert!(!var.get_bool());

    let mut target = 0u8;
    let address = &mut target as *mut u8 as *mut std::ffi::c_void;
    var.set_light_userdata(address);
    assert!(var.is_light_userdata());
    assert_eq!(var.get_userdata(), address);
    assert_eq!(var.get_value::<LightUserData>(), LightUserData(address));

    var.set_value(Nil);
    assert!(var.is_nil());

    assert_eq!(state.context().diagnostics().error_count(), 0);
}

/// A failed conversion yields the default and a diagnostic
#[test]
fn test_failed_conversion_defaults() {
    let state = LuaState::new().unwrap();
    let mut var = LuaVar::with_context(state.context());
    var.set_string("not a number");

    assert_eq!(var.get_integer(), 0);
    let last = state.context().diagnostics().last_error().unwrap();
    assert!(last.starts_with("Failed to convert value to integer"), "{}", last);
    assert!(last.contains("string"));
}

/// Set, read back and remove a field
#[test]
fn test_table_set_get_nil() {
    let state = LuaState::new().unwrap();
    let t = table(&state);

    t.set_table_integer("k", 5);
    assert_eq!(t.get_table_integer("k"), 5);

    t.set_table_nil("k");
    assert!(t.get_table_var("k").is_nil());
}

/// Iteration visits every pair once and leaves the stack as it found it
#[test]
fn test_iteration_counts() {
    let state = LuaState::new().unwrap();
    let t = table(&state);
    t.set_table_integer("a", 1);
    t.set_table_integer("b", 2);
    t.set_table_integer("c", 3);
    let depth = state.stack_depth();

    let mut keys: Vec<String> = t.iter().map(|(key, _)| key.get_string()).collect();
    keys.sort();
    assert_eq!(keys, ["a", "b", "c"]);
    assert_eq!(t.count_elements(), 3);

    for (_key, value) in &t {
        if value.get_integer() > 0 {
            break;
        }
    }
    assert_eq!(state.stack_depth(), depth);

    // The early exit must not disturb later operations
    t.set_table_integer("d", 4);
    assert_eq!(t.count_elements(), 4);
    assert_eq!(state.stack_depth(), depth);
}

/// Path lookup through nested tables
#[test]
fn test_lookup_paths() {
    let state = LuaState::new().unwrap();
    state
        .do_string("settings = { window = { width = 640, title = 'main' } }")
        .unwrap();
    let globals = state.globals();
    let diagnostics = state.context().diagnostics();

    assert_eq!(globals.lookup("settings.window.width").get_integer(), 640);
    assert_eq!(globals.lookup("settings.window.title").get_string(), "main");
    assert_eq!(diagnostics.error_count(), 0);

    assert!(globals.lookup("settings.missing.width").is_nil());
    assert_eq!(diagnostics.error_count(), 1);

    assert!(globals.lookup("").is_nil());
    assert_eq!(diagnostics.error_count(), 2);
}

/// Handles outliving their state go inert instead of touching freed memory
#[test]
fn test_handles_outlive_state() {
    let state = LuaState::new().unwrap();
    let t = table(&state);
    t.set_table_integer("x", 1);
    let context = state.context().clone();
    drop(state);

    assert!(context.is_closed());
    assert_eq!(t.get_table_integer("x"), 0);
    assert_eq!(t.count_elements(), 0);
    assert!(t.lookup("x").is_nil());
    drop(t);
    assert_eq!(context.live_references(), 0);
}

/// Two interpreters keep their handles apart
#[test]
fn test_independent_states() {
    let first = LuaState::new().unwrap();
    let second = LuaState::new().unwrap();

    first.set_global("name", "first");
    second.set_global("name", "second");
    assert_eq!(first.get_global::<String>("name"), "first");
    assert_eq!(second.get_global::<String>("name"), "second");

    let from_first = first.get_global::<LuaVar>("name");
    second.globals().set_table_var("copied", &from_first);
    assert!(second.get_global::<LuaVar>("copied").is_nil());
    assert_eq!(second.context().diagnostics().error_count(), 1);
}
