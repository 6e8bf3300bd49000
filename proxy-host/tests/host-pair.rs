// Copyright (C) 2021  Braiins Systems s.r.o.
//
// This file is part of Braiins Open-Source Initiative (BOSI).
//
// BOSI is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// Please, keep in mind that we may also license BOSI or any part thereof
// under a proprietary license. For more information on the terms and conditions
// of such proprietary license or if you have any other questions, please
// contact us at opensource@braiins.com.

//! End-to-end tests: two hosts connected by an in-memory bidirectional
//! stream, exercising activation, invocation, reference passing,
//! cancellation and teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rp_proxy_host::{
    Arg, CallArg, CancellationToken, Error, ExceptionKind, ProxyParam, ServiceLocator,
    ServiceObject,
};

mod utils;
use utils::*;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

fn locators() -> (Arc<dyn ServiceLocator>, Arc<dyn ServiceLocator>, Arc<AtomicBool>) {
    let foo_disposed = Arc::new(AtomicBool::new(false));
    let left: Arc<dyn ServiceLocator> = Arc::new(test_locator(foo_disposed.clone()));
    let right: Arc<dyn ServiceLocator> = Arc::new(test_locator(foo_disposed.clone()));
    (left, right, foo_disposed)
}

async fn with_timeout<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(TEST_TIMEOUT, future)
        .await
        .expect("BUG: test timed out")
}

/// Polls until `predicate` holds or the deadline passes
async fn eventually<F: Fn() -> bool>(predicate: F, what: &str) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("BUG: condition not reached in time: {}", what);
}

#[tokio::test]
async fn create_and_invoke() {
    let (left, right, _) = locators();
    let (l, r) = host_pair(left, right);

    let proxy = with_timeout(l.create::<Foo>(vec![])).await.expect("BUG: create failed");
    // The object lives at the peer
    assert!(proxy.local_instance().is_none());
    assert_eq!(r.proxy_counts().0, 1);

    let ret = with_timeout(proxy.invoke(&add_desc(), vec![CallArg::value(5), CallArg::value(3)]))
        .await
        .expect("BUG: invoke failed");
    assert_eq!(expect_i32(&ret), 8);

    l.dispose().await;
    r.dispose().await;
}

#[tokio::test]
async fn invoke_with_wait_task() {
    let (left, right, _) = locators();
    let (l, r) = host_pair(left, right);

    let proxy = with_timeout(l.create::<Foo>(vec![])).await.expect("BUG: create failed");
    // The declared return type is a future; the receiver awaits it and
    // replies with the settled value
    let ret = with_timeout(proxy.invoke(
        &add_async_desc(),
        vec![CallArg::value(5), CallArg::value(3)],
    ))
    .await
    .expect("BUG: invoke failed");
    assert_eq!(expect_i32(&ret), 8);

    l.dispose().await;
    r.dispose().await;
}

#[tokio::test]
async fn load_preregistered_instance() {
    let foo_disposed = Arc::new(AtomicBool::new(false));
    let left: Arc<dyn ServiceLocator> = Arc::new(test_locator(foo_disposed.clone()));

    let mut right = test_locator(foo_disposed);
    right.register_instance(Arc::new(ValueService { value: 10 }));
    let right: Arc<dyn ServiceLocator> = Arc::new(right);

    let (l, r) = host_pair(left, right);

    let proxy = with_timeout(l.load::<ValueObj>()).await.expect("BUG: load failed");
    let ret = with_timeout(proxy.invoke(&get_value_desc(), vec![]))
        .await
        .expect("BUG: invoke failed");
    assert_eq!(expect_i32(&ret), 10);

    l.dispose().await;
    r.dispose().await;
}

#[tokio::test]
async fn callback_through_passed_proxy() {
    let (left, right, _) = locators();
    let (l, r) = host_pair(left, right);

    let foo = with_timeout(l.create::<Foo>(vec![])).await.expect("BUG: create failed");

    // A locally owned Value(5), passed by reference: the peer receives a
    // remote proxy and calls get_value back on us
    let value: Arc<dyn ServiceObject> = Arc::new(ValueService { value: 5 });
    let handle = l.create_proxy_of(value, true).expect("BUG: create_proxy_of failed");

    let ret = with_timeout(foo.invoke(&read_value_desc(), vec![CallArg::Proxy(handle)]))
        .await
        .expect("BUG: invoke failed");
    assert_eq!(expect_i32(&ret), 5);

    l.dispose().await;
    r.dispose().await;
}

#[tokio::test]
async fn proxy_identity_round_trip() {
    let (left, right, _) = locators();
    let (l, r) = host_pair(left, right);

    let foo = with_timeout(l.create::<Foo>(vec![])).await.expect("BUG: create failed");

    let value: Arc<dyn ServiceObject> = Arc::new(ValueService { value: 1 });
    let handle = l
        .create_proxy_of(value.clone(), false)
        .expect("BUG: create_proxy_of failed");

    // The peer hands our reference straight back; it must resolve to the
    // very same instance
    let ret = with_timeout(foo.invoke(&loopback_desc(), vec![CallArg::Proxy(handle)]))
        .await
        .expect("BUG: invoke failed");
    match ret {
        Arg::Proxy(ProxyParam::Local(instance)) => assert!(Arc::ptr_eq(&instance, &value)),
        other => panic!("BUG: expected the original instance back, got: {:?}", other),
    }

    l.dispose().await;
    r.dispose().await;
}

#[tokio::test]
async fn structured_values_pass_by_value() {
    let (left, right, _) = locators();
    let (l, r) = host_pair(left, right);

    let foo = with_timeout(l.create::<Foo>(vec![])).await.expect("BUG: create failed");
    let arg = CallArg::other(&vec![1i32, 2, 3]).expect("BUG: structured encoding failed");
    let ret = with_timeout(foo.invoke(&sum_list_desc(), vec![arg]))
        .await
        .expect("BUG: invoke failed");
    assert_eq!(expect_i32(&ret), 6);

    l.dispose().await;
    r.dispose().await;
}

#[tokio::test]
async fn dispose_deactivates_peer_object() {
    let (left, right, foo_disposed) = locators();
    let (l, r) = host_pair(left, right);

    let proxy = with_timeout(l.create::<Foo>(vec![])).await.expect("BUG: create failed");
    assert_eq!(r.proxy_counts().0, 1);

    proxy.dispose().await.expect("BUG: dispose failed");
    // Double dispose is fine
    proxy.dispose().await.expect("BUG: dispose is not idempotent");

    let r_check = r.clone();
    eventually(
        move || r_check.proxy_counts().0 == 0,
        "peer released the local proxy",
    )
    .await;
    assert!(foo_disposed.load(Ordering::SeqCst));

    // The proxy is terminal
    match proxy.invoke(&add_desc(), vec![CallArg::value(1), CallArg::value(1)]).await {
        Err(Error::ProxyDisposed(_)) => {}
        other => panic!("BUG: expected ProxyDisposed, got: {:?}", other.map(|_| ())),
    }

    l.dispose().await;
    r.dispose().await;
}

#[tokio::test]
async fn activation_failure_is_unwrapped() {
    let (left, right, _) = locators();
    let (l, r) = host_pair(left, right);

    match with_timeout(l.activate(
        "test.Missing",
        rp_proxy_host::ActivationMode::Create,
        vec![],
    ))
    .await
    {
        Err(Error::Remote(remote)) => {
            assert_eq!(remote.kind, ExceptionKind::Activation);
            assert!(remote.message.contains("test.Missing"));
        }
        other => panic!("BUG: expected a remote activation error, got: {:?}", other.map(|_| ())),
    }
    // Nothing leaked on either side
    assert_eq!(l.proxy_counts(), (0, 0));
    assert_eq!(r.proxy_counts(), (0, 0));

    l.dispose().await;
    r.dispose().await;
}

#[tokio::test]
async fn method_resolution_failure() {
    let (left, right, _) = locators();
    let (l, r) = host_pair(left, right);

    let proxy = with_timeout(l.create::<Foo>(vec![])).await.expect("BUG: create failed");
    let bogus = rp_proxy_host::MethodDesc::new("test.IFoo", "Add").with_params(vec!["String"]);
    match with_timeout(proxy.invoke(&bogus, vec![CallArg::value("x")])).await {
        Err(Error::Remote(remote)) => {
            assert_eq!(remote.kind, ExceptionKind::MethodResolution)
        }
        other => panic!("BUG: expected a resolution error, got: {:?}", other.map(|_| ())),
    }

    l.dispose().await;
    r.dispose().await;
}

#[tokio::test]
async fn invocation_error_preserves_type_name() {
    let (left, right, _) = locators();
    let (l, r) = host_pair(left, right);

    let proxy = with_timeout(l.create::<Foo>(vec![])).await.expect("BUG: create failed");
    match with_timeout(proxy.invoke(&fail_desc(), vec![])).await {
        Err(Error::Remote(remote)) => {
            assert_eq!(remote.kind, ExceptionKind::Invocation);
            assert_eq!(remote.type_name, "test.Boom");
            assert_eq!(remote.message, "kaboom");
        }
        other => panic!("BUG: expected an invocation error, got: {:?}", other.map(|_| ())),
    }

    l.dispose().await;
    r.dispose().await;
}

#[tokio::test]
async fn cancellation_propagates_to_method() {
    let (left, right, _) = locators();
    let (l, r) = host_pair(left, right);

    let proxy = with_timeout(l.create::<Foo>(vec![])).await.expect("BUG: create failed");

    let token = CancellationToken::new();
    let wait_cancel = wait_cancel_desc();
    let call = proxy.invoke(&wait_cancel, vec![CallArg::token(token.clone())]);
    let canceller = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    };

    let (result, ()) = with_timeout(futures::future::join(call, canceller)).await;
    match result {
        Err(Error::Remote(remote)) => {
            assert_eq!(remote.kind, ExceptionKind::Cancelled);
            assert!(remote.is_cancelled());
        }
        other => panic!("BUG: expected a cancelled call, got: {:?}", other.map(|_| ())),
    }

    l.dispose().await;
    r.dispose().await;
}

#[tokio::test]
async fn cancellation_request_races_call_dispatch() {
    let (left, right, _) = locators();
    let (l, r) = host_pair(left, right);

    let proxy = with_timeout(l.create::<Foo>(vec![])).await.expect("BUG: create failed");

    // Cancelling before the call means the CancellationRequest frame is
    // queued immediately behind the MethodCall frame. The receiver must
    // have the call's scope in place before it reads the next frame, or
    // the request would be dropped as late and the method would wait
    // forever.
    let token = CancellationToken::new();
    token.cancel();

    match with_timeout(proxy.invoke(&wait_cancel_desc(), vec![CallArg::token(token)])).await {
        Err(Error::Remote(remote)) => {
            assert_eq!(remote.kind, ExceptionKind::Cancelled);
        }
        other => panic!("BUG: expected a cancelled call, got: {:?}", other.map(|_| ())),
    }

    l.dispose().await;
    r.dispose().await;
}

#[tokio::test]
async fn host_dispose_fails_pending_calls() {
    let (left, right, _) = locators();
    let (l, r) = host_pair(left, right);

    let proxy = with_timeout(l.create::<Foo>(vec![])).await.expect("BUG: create failed");

    // A call that never completes on its own
    let wait_cancel = wait_cancel_desc();
    let never = proxy.invoke(&wait_cancel, vec![CallArg::no_token()]);
    let teardown = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        l.dispose().await;
    };

    let (result, ()) = with_timeout(futures::future::join(never, teardown)).await;
    match result {
        Err(Error::HostDisposed) => {}
        other => panic!("BUG: expected HostDisposed, got: {:?}", other.map(|_| ())),
    }

    assert!(l.is_disposed());
    assert_eq!(l.pending_calls(), 0);

    // Any API after teardown fails the same way
    match l.create::<Foo>(vec![]).await {
        Err(Error::HostDisposed) => {}
        other => panic!("BUG: expected HostDisposed, got: {:?}", other.map(|_| ())),
    }

    r.dispose().await;
}

#[tokio::test]
async fn peer_teardown_fails_callers_and_disposes_services() {
    let (left, right, foo_disposed) = locators();
    let (l, r) = host_pair(left, right);

    let proxy = with_timeout(l.create::<Foo>(vec![])).await.expect("BUG: create failed");

    let wait_cancel = wait_cancel_desc();
    let never = proxy.invoke(&wait_cancel, vec![CallArg::no_token()]);
    let teardown = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        // The peer goes away; our side sees end-of-stream and tears down
        r.dispose().await;
    };

    let (result, ()) = with_timeout(futures::future::join(never, teardown)).await;
    match result {
        Err(Error::HostDisposed) => {}
        other => panic!("BUG: expected HostDisposed, got: {:?}", other.map(|_| ())),
    }

    // The peer-side Foo was owned by its proxy and is disposed with it
    assert!(foo_disposed.load(Ordering::SeqCst));

    let l_check = l.clone();
    eventually(move || l_check.is_disposed(), "left host observed the hangup").await;
}

#[tokio::test]
async fn cast_checks_assignability() {
    let foo_disposed = Arc::new(AtomicBool::new(false));
    let left: Arc<dyn ServiceLocator> = Arc::new(test_locator(foo_disposed.clone()));
    let mut right = test_locator(foo_disposed);
    right.register_instance(Arc::new(ValueService { value: 1 }));
    let right: Arc<dyn ServiceLocator> = Arc::new(right);

    let (l, r) = host_pair(left, right);

    let proxy = with_timeout(l.load::<ValueObj>()).await.expect("BUG: load failed");

    // Widening to a declared interface of the object type; no frame is sent
    let as_interface = proxy.cast::<IValue>().expect("BUG: interface cast failed");
    let ret = with_timeout(as_interface.invoke(&get_value_desc(), vec![]))
        .await
        .expect("BUG: invoke through cast alias failed");
    assert_eq!(expect_i32(&ret), 1);

    // An unrelated type must not pass
    match proxy.cast::<Foo>() {
        Err(Error::InvalidCast { .. }) => {}
        other => panic!("BUG: expected InvalidCast, got: {:?}", other.map(|_| ())),
    }

    l.dispose().await;
    r.dispose().await;
}

#[tokio::test]
async fn dispose_is_concurrent_safe() {
    let (left, right, _) = locators();
    let (l, r) = host_pair(left, right);

    let _ = with_timeout(l.create::<Foo>(vec![])).await.expect("BUG: create failed");

    // Both sides, twice, concurrently
    let l2 = l.clone();
    let r2 = r.clone();
    with_timeout(futures::future::join4(
        l.dispose(),
        l2.dispose(),
        r.dispose(),
        r2.dispose(),
    ))
    .await;

    assert!(l.is_disposed());
    assert!(r.is_disposed());
}

#[tokio::test]
async fn set_and_state_on_peer() {
    let (left, right, _) = locators();
    let (l, r) = host_pair(left, right);

    let proxy = with_timeout(l.create::<Foo>(vec![])).await.expect("BUG: create failed");
    let ret = with_timeout(proxy.invoke(&set_desc(), vec![CallArg::value(41)]))
        .await
        .expect("BUG: invoke failed");
    // Void methods marshal as Null
    assert!(ret.is_null());

    let ret = with_timeout(proxy.invoke(&add_desc(), vec![CallArg::value(41), CallArg::value(1)]))
        .await
        .expect("BUG: invoke failed");
    assert_eq!(expect_i32(&ret), 42);

    l.dispose().await;
    r.dispose().await;
}
