//! Integration tests for the build-then-launch cycle.

mod common;

use common::{project, FakeBuildSystem, FakeDebugger};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use testhost_launcher::{
    ArmedProject, BuildLaunchState, BuildThenLaunchCoordinator, DebugOperation, DebuggerMode,
    LaunchCommand, LauncherError,
};

fn armed() -> Vec<ArmedProject> {
    vec![ArmedProject::new(project(1), Some(project(10)))]
}

fn setup() -> (Arc<FakeBuildSystem>, Arc<FakeDebugger>, BuildThenLaunchCoordinator) {
    let build = FakeBuildSystem::new(vec![project(1), project(2)]);
    let debugger = FakeDebugger::new();
    let cycle = BuildThenLaunchCoordinator::new(build.clone(), debugger.clone());
    (build, debugger, cycle)
}

#[test]
fn test_busy_build_system_declines() {
    let (build, _debugger, cycle) = setup();
    build.busy.store(true, Ordering::SeqCst);

    assert!(!cycle.build(&armed(), LaunchCommand::LaunchDebugTarget).unwrap());
    assert_eq!(cycle.state(), BuildLaunchState::Idle);
    assert_eq!(build.build_count(), 0);
    assert_eq!(build.listeners(), 0);
}

#[test]
fn test_unarmed_startup_projects_decline() {
    let (build, _debugger, cycle) = setup();
    let armed = vec![ArmedProject::new(project(1), None)];

    assert!(!cycle.build(&armed, LaunchCommand::LaunchDebugTarget).unwrap());
    assert_eq!(cycle.state(), BuildLaunchState::Idle);
    assert_eq!(build.build_count(), 0);
}

#[test]
fn test_build_substitutes_launch_targets() {
    let (build, _debugger, cycle) = setup();

    assert!(cycle.build(&armed(), LaunchCommand::LaunchDebugTarget).unwrap());
    assert_eq!(cycle.state(), BuildLaunchState::Building);
    assert_eq!(
        build.builds.lock().unwrap().as_slice(),
        &[vec![project(10), project(2)]]
    );
    assert_eq!(build.output_shown.load(Ordering::SeqCst), 1);
}

#[test]
fn test_failed_build_enters_error_without_launch() {
    let (build, debugger, cycle) = setup();
    cycle.build(&armed(), LaunchCommand::LaunchDebugTarget).unwrap();

    build.finish(false);

    assert_eq!(cycle.state(), BuildLaunchState::Error);
    assert_eq!(debugger.launch_count(), 0);
    assert_eq!(build.listeners(), 0);
}

#[test]
fn test_successful_build_launches_once_and_stops_once() {
    let (build, debugger, cycle) = setup();
    let stops = Arc::new(AtomicUsize::new(0));
    let counter = stops.clone();
    let _sub = cycle.debugging_stop().subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    cycle.build(&armed(), LaunchCommand::LaunchDebugTarget).unwrap();
    build.finish(true);
    // A second finish notification must not launch again.
    build.finish(true);

    assert_eq!(cycle.state(), BuildLaunchState::Debugging);
    assert_eq!(
        debugger.launches.lock().unwrap().as_slice(),
        &[(vec![project(1), project(2)], DebugOperation::LaunchDebug)]
    );

    debugger.start();
    debugger.stop();
    debugger.stop();

    assert_eq!(cycle.state(), BuildLaunchState::Idle);
    assert_eq!(stops.load(Ordering::SeqCst), 1);
    assert_eq!(debugger.launch_count(), 1);
}

#[test]
fn test_start_without_debugging_maps_to_launch() {
    let (build, debugger, cycle) = setup();
    cycle
        .build(&armed(), LaunchCommand::StartWithoutDebugging)
        .unwrap();
    build.finish(true);

    assert_eq!(
        debugger.launches.lock().unwrap()[0].1,
        DebugOperation::Launch
    );
}

#[test]
fn test_debug_stop_while_building() {
    let (build, debugger, cycle) = setup();
    let stops = Arc::new(AtomicUsize::new(0));
    let counter = stops.clone();
    let _sub = cycle.debugging_stop().subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    cycle.build(&armed(), LaunchCommand::LaunchDebugTarget).unwrap();
    debugger.stop();

    assert_eq!(cycle.state(), BuildLaunchState::Idle);
    assert_eq!(stops.load(Ordering::SeqCst), 1);

    // The finish notification arriving afterwards is stale.
    build.finish(true);
    assert_eq!(debugger.launch_count(), 0);
}

#[test]
fn test_one_cycle_per_instance() {
    let (build, debugger, cycle) = setup();
    cycle.build(&armed(), LaunchCommand::LaunchDebugTarget).unwrap();
    build.finish(true);
    debugger.stop();

    let err = cycle
        .build(&armed(), LaunchCommand::LaunchDebugTarget)
        .unwrap_err();
    assert!(matches!(err, LauncherError::CycleActive));
}

#[test]
fn test_start_build_error_resets_to_idle() {
    let (build, _debugger, cycle) = setup();
    build.fail_start.store(true, Ordering::SeqCst);

    let err = cycle
        .build(&armed(), LaunchCommand::LaunchDebugTarget)
        .unwrap_err();
    assert!(matches!(err, LauncherError::Build { .. }));
    assert_eq!(cycle.state(), BuildLaunchState::Idle);
    assert_eq!(build.listeners(), 0);
}

#[test]
fn test_debug_launch_error_enters_error() {
    let (build, debugger, cycle) = setup();
    debugger.fail_launch.store(true, Ordering::SeqCst);

    cycle.build(&armed(), LaunchCommand::LaunchDebugTarget).unwrap();
    build.finish(true);

    assert_eq!(cycle.state(), BuildLaunchState::Error);
}

#[test]
fn test_cancel_makes_finish_stale() {
    let (build, debugger, cycle) = setup();
    cycle.build(&armed(), LaunchCommand::LaunchDebugTarget).unwrap();

    cycle.cancel();
    assert!(cycle.is_cancelled());
    build.finish(true);

    assert_eq!(debugger.launch_count(), 0);
    assert_eq!(build.listeners(), 0);
    assert_eq!(cycle.state(), BuildLaunchState::Idle);
}

#[test]
fn test_dispose_is_reentrant_and_rejects_builds() {
    let (build, debugger, cycle) = setup();
    cycle.build(&armed(), LaunchCommand::LaunchDebugTarget).unwrap();

    cycle.dispose();
    cycle.dispose();
    build.finish(true);

    assert_eq!(debugger.launch_count(), 0);
    assert_eq!(build.listeners(), 0);
    assert!(matches!(
        cycle.build(&armed(), LaunchCommand::LaunchDebugTarget),
        Err(LauncherError::Disposed(_))
    ));
}

#[test]
fn test_continue_text_only_in_break_mode() {
    let (build, debugger, cycle) = setup();
    cycle.build(&armed(), LaunchCommand::LaunchDebugTarget).unwrap();
    assert_eq!(cycle.command_text(), None);

    build.finish(true);
    debugger.start();
    assert_eq!(cycle.command_text(), None);

    debugger.set_mode(DebuggerMode::Break);
    assert_eq!(cycle.command_text(), Some("Continue"));

    debugger.stop();
    assert_eq!(cycle.command_text(), None);
}
