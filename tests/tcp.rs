mod common;

use interface_proxy::{Member, Proxy, ProxyError, RemoteRef, TaggedValue};
use std::thread;

#[test]
fn sample_library_over_tcp() {
    let addr = common::spawn_tcp_server();
    let t = Proxy::tcp("TargetClass", "127.0.0.1", addr.port()).unwrap();
    let p = Proxy::tcp("Param", "127.0.0.1", addr.port()).unwrap();

    t.call::<_, ()>("do_something", ("wonder",)).unwrap();
    assert_eq!(t.call::<_, i64>("get_double", (21,)).unwrap(), 42);

    let obj1: RemoteRef = t.call("create_complicated_object", ()).unwrap();
    let obj2: RemoteRef = t.call("create_complicated_object", ()).unwrap();
    assert_ne!(obj1, obj2);

    let param1: i64 = p.attr("PARAM1").unwrap();
    t.call::<_, ()>("set_co", (obj1.clone(), 42)).unwrap();
    t.call::<_, ()>("set_co", (obj2.clone(), param1)).unwrap();
    assert_eq!(t.call::<_, i64>("get_co", (obj1,)).unwrap(), 42);
    assert_eq!(t.call::<_, i64>("get_co", (obj2,)).unwrap(), 4);
}

#[test]
fn server_exceptions_reach_the_client() {
    let addr = common::spawn_tcp_server();
    let t = Proxy::tcp("TargetClass", "127.0.0.1", addr.port()).unwrap();

    let err = t.call::<_, f64>("divide", (1.0, 0.0)).unwrap_err();
    let remote = err.remote().expect("a server-side failure");
    assert!(remote.message().contains("division by zero"));
    assert!(!remote.trace().is_empty());

    let err = t.get_attribute("no_such_function").unwrap_err();
    assert!(err.remote().unwrap().message().contains("no_such_function"));

    let err = t
        .invoke("get_co", vec![TaggedValue::Remote(RemoteRef::new("12345"))], Default::default())
        .unwrap_err();
    assert!(err.remote().unwrap().message().contains("12345"));

    // Still serving.
    assert_eq!(t.call::<_, f64>("divide", (3.0, 2.0)).unwrap(), 1.5);
}

#[test]
fn overflowing_division_returns_infinity() {
    let addr = common::spawn_tcp_server();
    let t = Proxy::tcp("TargetClass", "127.0.0.1", addr.port()).unwrap();

    assert_eq!(t.call::<_, f64>("divide", (1e308, 1e-10)).unwrap(), f64::INFINITY);
    assert_eq!(t.call::<_, f64>("divide", (f64::NEG_INFINITY, 2.0)).unwrap(), f64::NEG_INFINITY);
    assert!(t.call::<_, f64>("divide", (f64::NAN, 2.0)).unwrap().is_nan());
}

#[test]
fn members_are_probed_before_use() {
    let addr = common::spawn_tcp_server();
    let t = Proxy::tcp("TargetClass", "127.0.0.1", addr.port()).unwrap();
    let p = Proxy::tcp("Param", "127.0.0.1", addr.port()).unwrap();

    assert!(matches!(p.member("PARAM1").unwrap(), Member::Value(TaggedValue::Int(4))));
    assert!(t.member("get_double").unwrap().is_callable());
    assert_eq!(t.get_attribute("get_double").unwrap(), TaggedValue::Callable);
    assert!(matches!(p.call::<_, i64>("PARAM1", ()), Err(ProxyError::NotCallable(_))));

    let unknown = Proxy::tcp("Nobody", "127.0.0.1", addr.port()).unwrap();
    assert!(matches!(unknown.get_attribute("x"), Err(ProxyError::Remote(_))));
}

#[test]
fn concurrent_clients() {
    let addr = common::spawn_tcp_server();
    let handles: Vec<_> = (0..8i64)
        .map(|n| {
            thread::spawn(move || {
                let t = Proxy::tcp("TargetClass", "127.0.0.1", addr.port()).unwrap();
                (0..10i64)
                    .map(|i| t.call::<_, i64>("get_double", (n * 100 + i,)).unwrap())
                    .sum::<i64>()
            })
        })
        .collect();
    for (n, handle) in handles.into_iter().enumerate() {
        let n = n as i64;
        assert_eq!(handle.join().unwrap(), (0..10).map(|i| (n * 100 + i) * 2).sum::<i64>());
    }
}

#[test]
fn connection_refused_is_a_transport_error() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let t = Proxy::tcp("TargetClass", "127.0.0.1", port).unwrap();
    assert!(matches!(t.get_attribute("x"), Err(ProxyError::Transport(_))));
}
