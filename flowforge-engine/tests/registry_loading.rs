//! Registry loading, version gating, and WASM-backed block execution.
//!
//! Plugin archives are written as WebAssembly text; the runtime compiles
//! text and binary modules alike, so these fixtures exercise the same path
//! production archives take.

mod common;

use common::test_instance;
use flowforge_core::args::CtorArg;
use flowforge_core::block::Block;
use flowforge_core::state::RunnableState;
use flowforge_engine::registry::{BlockRegistry, RegistryConfig};
use std::path::Path;

/// A plugin providing `text.echo`: the result is the input, unchanged.
const ECHO_PLUGIN: &str = r#"
(module
  (memory (export "memory") 1)
  (data (i32.const 8) "{\22engine_version\22:\221.0\22,\22block_types\22:[\22text.echo\22]}")
  (global $next (mut i32) (i32.const 4096))
  (func (export "ffb_alloc") (param $size i32) (result i32)
    (local $ptr i32)
    global.get $next
    local.set $ptr
    global.get $next
    local.get $size
    i32.add
    global.set $next
    local.get $ptr)
  (func (export "ffb_manifest") (result i64)
    i64.const 34359738420)
  (func (export "ffb_process") (param $ptr i32) (param $len i32) (result i64)
    local.get $ptr
    i64.extend_i32_u
    i64.const 32
    i64.shl
    local.get $len
    i64.extend_i32_u
    i64.or))
"#;

/// A plugin whose block always reports a failure through `ffb_fail`.
const FAILING_PLUGIN: &str = r#"
(module
  (import "flowforge" "ffb_fail" (func $fail (param i32 i32)))
  (memory (export "memory") 1)
  (data (i32.const 8) "{\22engine_version\22:\221.0\22,\22block_types\22:[\22text.fail\22]}")
  (data (i32.const 256) "plugin exploded")
  (global $next (mut i32) (i32.const 4096))
  (func (export "ffb_alloc") (param $size i32) (result i32)
    (local $ptr i32)
    global.get $next
    local.set $ptr
    global.get $next
    local.get $size
    i32.add
    global.set $next
    local.get $ptr)
  (func (export "ffb_manifest") (result i64)
    i64.const 34359738420)
  (func (export "ffb_process") (param i32) (param i32) (result i64)
    i32.const 256
    i32.const 15
    call $fail
    i64.const 0))
"#;

/// A plugin targeting an engine version the host does not accept.
const WRONG_VERSION_PLUGIN: &str = r#"
(module
  (memory (export "memory") 1)
  (data (i32.const 8) "{\22engine_version\22:\229.9\22,\22block_types\22:[\22text.late\22]}")
  (global $next (mut i32) (i32.const 4096))
  (func (export "ffb_alloc") (param $size i32) (result i32)
    (local $ptr i32)
    global.get $next
    local.set $ptr
    global.get $next
    local.get $size
    i32.add
    global.set $next
    local.get $ptr)
  (func (export "ffb_manifest") (result i64)
    i64.const 34359738420)
  (func (export "ffb_process") (param $ptr i32) (param $len i32) (result i64)
    local.get $ptr
    i64.extend_i32_u
    i64.const 32
    i64.shl
    local.get $len
    i64.extend_i32_u
    i64.or))
"#;

/// An implementation archive importing a sibling dependency archive.
const DEP_USING_PLUGIN: &str = r#"
(module
  (import "dep_util" "touch" (func $touch))
  (memory (export "memory") 1)
  (data (i32.const 8) "{\22engine_version\22:\221.0\22,\22block_types\22:[\22text.dep\22]}")
  (global $next (mut i32) (i32.const 4096))
  (func (export "ffb_alloc") (param $size i32) (result i32)
    (local $ptr i32)
    global.get $next
    local.set $ptr
    global.get $next
    local.get $size
    i32.add
    global.set $next
    local.get $ptr)
  (func (export "ffb_manifest") (result i64)
    i64.const 34359738419)
  (func (export "ffb_process") (param $ptr i32) (param $len i32) (result i64)
    call $touch
    local.get $ptr
    i64.extend_i32_u
    i64.const 32
    i64.shl
    local.get $len
    i64.extend_i32_u
    i64.or))
"#;

/// A dependency archive: no manifest, just an export for siblings.
const DEP_UTIL: &str = r#"
(module
  (func (export "touch")))
"#;

fn write_plugin(modules_dir: &Path, plugin: &str, archive: &str, wat: &str) {
    let dir = modules_dir.join(plugin);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(archive), wat).unwrap();
}

fn registry() -> BlockRegistry {
    BlockRegistry::new(RegistryConfig::new(["1.0"])).unwrap()
}

#[test]
fn load_discovers_declared_services() {
    let modules = tempfile::tempdir().unwrap();
    write_plugin(modules.path(), "echo-plugin", "echo-impl.wasm", ECHO_PLUGIN);

    let registry = registry();
    registry.load(modules.path(), false).unwrap();

    assert_eq!(registry.service_count(), 1);
    assert!(registry.block_type_ids().contains(&"text.echo".to_string()));
}

#[test]
fn created_block_runs_text_through_the_plugin() {
    let modules = tempfile::tempdir().unwrap();
    write_plugin(modules.path(), "echo-plugin", "echo-impl.wasm", ECHO_PLUGIN);

    let registry = registry();
    registry.load(modules.path(), false).unwrap();

    let mut block = registry
        .create_block("text.echo", &[CtorArg::str("e1"), CtorArg::str("payload")])
        .unwrap();
    assert_eq!(block.internal_block_id(), "e1");
    assert_eq!(block.state(), RunnableState::Ready);

    block.run().unwrap();
    assert_eq!(block.state(), RunnableState::Done);
    assert_eq!(block.result_text(), "payload");
}

#[test]
fn plugin_failure_surfaces_as_block_execution_error() {
    let modules = tempfile::tempdir().unwrap();
    write_plugin(modules.path(), "fail-plugin", "fail-impl.wasm", FAILING_PLUGIN);

    let registry = registry();
    registry.load(modules.path(), false).unwrap();

    let mut block = registry
        .create_block("text.fail", &[CtorArg::str("f1")])
        .unwrap();
    block.set_input_text("anything");

    let err = block.run().unwrap_err();
    assert_eq!(err.code(), "E301");
    assert!(format!("{err}").contains("plugin exploded"));
}

#[test]
fn incompatible_engine_version_fails_the_load() {
    let modules = tempfile::tempdir().unwrap();
    write_plugin(
        modules.path(),
        "late-plugin",
        "late-impl.wasm",
        WRONG_VERSION_PLUGIN,
    );

    let registry = registry();
    let err = registry.load(modules.path(), false).unwrap_err();
    assert_eq!(err.code(), "E002");
    assert_eq!(registry.service_count(), 0);
}

#[test]
fn dependency_archives_link_into_the_plugin_loader() {
    let modules = tempfile::tempdir().unwrap();
    write_plugin(modules.path(), "dep-plugin", "dep-impl.wasm", DEP_USING_PLUGIN);
    write_plugin(modules.path(), "dep-plugin", "dep_util.wasm", DEP_UTIL);

    let registry = registry();
    registry.load(modules.path(), false).unwrap();

    let mut block = registry
        .create_block("text.dep", &[CtorArg::str("d1"), CtorArg::str("in")])
        .unwrap();
    block.run().unwrap();
    assert_eq!(block.result_text(), "in");
}

#[test]
fn duplicate_host_archives_are_removed_on_request() {
    let modules = tempfile::tempdir().unwrap();
    write_plugin(modules.path(), "echo-plugin", "echo-impl.wasm", ECHO_PLUGIN);
    write_plugin(modules.path(), "echo-plugin", "shared-util.wasm", DEP_UTIL);

    let config = RegistryConfig::new(["1.0"]).with_host_archives(["shared-util.wasm"]);
    let registry = BlockRegistry::new(config).unwrap();
    registry.load(modules.path(), true).unwrap();

    assert!(!modules
        .path()
        .join("echo-plugin")
        .join("shared-util.wasm")
        .exists());
    assert_eq!(registry.service_count(), 1);
}

#[test]
fn failed_subdirectory_leaves_previous_state_intact() {
    let modules_v1 = tempfile::tempdir().unwrap();
    write_plugin(modules_v1.path(), "echo-plugin", "echo-impl.wasm", ECHO_PLUGIN);

    let registry = registry();
    registry.load(modules_v1.path(), false).unwrap();
    assert_eq!(registry.service_count(), 1);

    // The second tree has a subdirectory whose archive is not a module.
    let modules_v2 = tempfile::tempdir().unwrap();
    write_plugin(modules_v2.path(), "broken-plugin", "broken.wasm", "not wasm at all (");

    let err = registry.load(modules_v2.path(), false).unwrap_err();
    assert_eq!(err.code(), "E203");

    // Old services are still in place and usable.
    assert_eq!(registry.service_count(), 1);
    let mut block = registry
        .create_block("text.echo", &[CtorArg::str("e1"), CtorArg::str("still here")])
        .unwrap();
    block.run().unwrap();
    assert_eq!(block.result_text(), "still here");
}

#[test]
fn reload_swaps_the_whole_service_set() {
    let modules_v1 = tempfile::tempdir().unwrap();
    write_plugin(modules_v1.path(), "echo-plugin", "echo-impl.wasm", ECHO_PLUGIN);

    let registry = registry();
    registry.load(modules_v1.path(), false).unwrap();

    // A block created before the reload keeps its compiled module alive.
    let mut survivor = registry
        .create_block("text.echo", &[CtorArg::str("e1"), CtorArg::str("kept")])
        .unwrap();

    let modules_v2 = tempfile::tempdir().unwrap();
    write_plugin(modules_v2.path(), "fail-plugin", "fail-impl.wasm", FAILING_PLUGIN);
    registry.load(modules_v2.path(), false).unwrap();

    // Only the new services are visible.
    let err = registry.create_block("text.echo", &[CtorArg::str("x")]).unwrap_err();
    assert_eq!(err.code(), "E201");
    assert!(registry.block_type_ids().contains(&"text.fail".to_string()));

    // The pre-reload block still executes.
    survivor.run().unwrap();
    assert_eq!(survivor.result_text(), "kept");
}

#[test]
fn close_empties_the_registry() {
    let modules = tempfile::tempdir().unwrap();
    write_plugin(modules.path(), "echo-plugin", "echo-impl.wasm", ECHO_PLUGIN);

    let registry = registry();
    registry.load(modules.path(), false).unwrap();
    registry.close();

    let err = registry.create_block("text.echo", &[CtorArg::str("x")]).unwrap_err();
    assert_eq!(err.code(), "E201");
}

#[test]
fn constructor_arity_mismatch_is_an_instantiation_error() {
    let modules = tempfile::tempdir().unwrap();
    write_plugin(modules.path(), "echo-plugin", "echo-impl.wasm", ECHO_PLUGIN);

    let registry = registry();
    registry.load(modules.path(), false).unwrap();

    let err = registry.create_block("text.echo", &[]).unwrap_err();
    assert_eq!(err.code(), "E202");

    let err = registry
        .create_block("text.echo", &[CtorArg::Int(5)])
        .unwrap_err();
    assert_eq!(err.code(), "E202");
}

#[test]
fn registry_blocks_drive_a_full_instance() {
    let modules = tempfile::tempdir().unwrap();
    write_plugin(modules.path(), "echo-plugin", "echo-impl.wasm", ECHO_PLUGIN);

    let registry = registry();
    registry.load(modules.path(), false).unwrap();

    let first = registry
        .create_block("text.echo", &[CtorArg::str("first")])
        .unwrap();
    let second = registry
        .create_block("text.echo", &[CtorArg::str("second")])
        .unwrap();

    let blocks: Vec<Box<dyn Block>> = vec![first, second];
    let lines = vec![flowforge_core::line::Line::new(0, 1)];
    let mut instance = test_instance(
        1,
        vec![("first", "wired"), ("second", "routed")],
        blocks,
        lines,
    );

    instance.run().unwrap(); // plan [first]
    instance.run().unwrap(); // first echoes its parameter
    assert_eq!(instance.blocks()[0].result_text(), "wired");

    instance.run().unwrap(); // second consumes the activation and echoes
    assert_eq!(instance.blocks()[1].result_text(), "routed");
    assert_eq!(instance.state(), RunnableState::Done);
}
