#![cfg(unix)]

mod common;

use interface_proxy::{CallerId, LaunchSpec, Proxy, Supervisor};
use nix::{
    sys::signal::{kill, Signal},
    unistd::Pid,
};
use std::{
    path::Path,
    thread,
    time::{Duration, Instant},
};

const DEMO: &str = env!("CARGO_BIN_EXE_interface-proxy-demo");

#[test]
fn supervised_demo_server() {
    let name = common::unique_pipe_name("iface-supervised");
    let first = CallerId::unique();
    let second = CallerId::unique();

    let supervisor =
        Supervisor::acquire(first, LaunchSpec::executable(DEMO).arg("--pipe").arg(&name)).unwrap();
    let pid = supervisor.pid().unwrap();

    let t = Proxy::pipe("TargetClass", &name).unwrap();
    assert_eq!(t.call::<_, i64>("get_double", (21,)).unwrap(), 42);

    let again = Supervisor::acquire(second, LaunchSpec::executable(DEMO)).unwrap();
    assert_eq!(again.pid(), Some(pid));
    assert_eq!(again.holders(), 2);

    supervisor.release(first);
    assert!(supervisor.is_running());
    assert_eq!(t.call::<_, i64>("get_double", (5,)).unwrap(), 10);

    again.release(second);
    assert!(!supervisor.is_running());
}

#[test]
fn calls_reach_a_relaunched_server() {
    // A private copy of the binary gets its own supervisor.
    let dir = tempfile::Builder::new()
        .prefix("iface-relaunch")
        .tempdir_in(Path::new(DEMO).parent().unwrap())
        .unwrap();
    let demo = dir.path().join("demo");
    std::fs::copy(DEMO, &demo).unwrap();

    let name = common::unique_pipe_name("iface-relaunch");
    let caller = CallerId::unique();
    let supervisor =
        Supervisor::acquire(caller, LaunchSpec::executable(&demo).arg("--pipe").arg(&name)).unwrap();
    let t = Proxy::pipe("TargetClass", &name).unwrap();
    assert_eq!(t.call::<_, i64>("get_double", (21,)).unwrap(), 42);

    let pid = supervisor.pid().unwrap();
    kill(Pid::from_raw(i32::try_from(pid).unwrap()), Signal::SIGKILL).unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while supervisor.is_running() {
        assert!(Instant::now() < deadline, "server {pid} survived SIGKILL");
        thread::sleep(Duration::from_millis(10));
    }

    // The killed server left its socket file behind; the client waits for
    // the relaunched one to bind over it.
    let relauncher = CallerId::unique();
    let again = Supervisor::acquire(relauncher, LaunchSpec::executable(&demo)).unwrap();
    assert_ne!(again.pid(), Some(pid));
    assert_eq!(t.call::<_, i64>("get_double", (4,)).unwrap(), 8);

    supervisor.release(caller);
    again.release(relauncher);
    assert!(!supervisor.is_running());
}
