//! End-to-end lifecycle coverage over real sockets: bind conflicts, prompt
//! startup, signal-driven teardown, and the auxiliary health/reflection
//! services as a client observes them.

use berth::{Error, InterceptorFn, ManualTrigger, ServerLifecycle, State};
use core::time::Duration;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tonic::Status;
use tonic::transport::Channel;
use tonic_health::pb::HealthCheckRequest;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_reflection::pb::v1::ServerReflectionRequest;
use tonic_reflection::pb::v1::server_reflection_client::ServerReflectionClient;
use tonic_reflection::pb::v1::server_reflection_request::MessageRequest;
use tonic_reflection::pb::v1::server_reflection_response::MessageResponse;

/// Builds, binds to a free port, and serves a lifecycle driven by a manual
/// trigger instead of process signals.
async fn start(
    configure: impl FnOnce(&mut ServerLifecycle),
) -> (ServerLifecycle, SocketAddr, ManualTrigger) {
    let trigger = ManualTrigger::new();
    let mut lifecycle = ServerLifecycle::new();
    lifecycle.set_signal_source(trigger.clone());
    configure(&mut lifecycle);
    lifecycle.build();
    lifecycle
        .listen_and_serve("127.0.0.1", 0)
        .await
        .expect("bind a free port");
    let addr = lifecycle.local_addr().expect("bound address");
    (lifecycle, addr, trigger)
}

async fn client_channel(addr: SocketAddr) -> Channel {
    Channel::from_shared(format!("http://{addr}"))
        .expect("valid endpoint uri")
        .connect()
        .await
        .expect("connect to the server")
}

fn list_services_request() -> ServerReflectionRequest {
    ServerReflectionRequest {
        host: String::new(),
        message_request: Some(MessageRequest::ListServices(String::new())),
    }
}

#[tokio::test]
async fn bind_conflict_returns_bind_error_and_stays_built() {
    let taken = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("reserve a port");
    let port = taken.local_addr().expect("reserved address").port();

    let mut lifecycle = ServerLifecycle::new();
    lifecycle.build();
    let err = lifecycle
        .listen_and_serve("127.0.0.1", port)
        .await
        .expect_err("port is taken");

    assert!(matches!(err, Error::Bind { .. }));
    assert_eq!(lifecycle.state(), State::Built);
    assert!(lifecycle.local_addr().is_none());
}

#[tokio::test]
async fn bind_failure_keeps_the_engine_for_a_retry() {
    let taken = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("reserve a port");
    let port = taken.local_addr().expect("reserved address").port();

    let trigger = ManualTrigger::new();
    let mut lifecycle = ServerLifecycle::new();
    lifecycle.set_signal_source(trigger.clone());
    lifecycle.build();

    lifecycle
        .listen_and_serve("127.0.0.1", port)
        .await
        .expect_err("port is taken");
    lifecycle
        .listen_and_serve("127.0.0.1", 0)
        .await
        .expect("retry on a free port");

    assert_eq!(lifecycle.state(), State::Serving);

    trigger.trigger();
    lifecycle.await_termination().await.expect("clean shutdown");
}

#[tokio::test]
async fn serving_starts_promptly_on_a_free_port() {
    let (mut lifecycle, addr, trigger) =
        tokio::time::timeout(Duration::from_millis(100), start(|_| {}))
            .await
            .expect("startup must not block");

    assert_eq!(lifecycle.state(), State::Serving);
    assert_ne!(addr.port(), 0);

    trigger.trigger();
    lifecycle.await_termination().await.expect("clean shutdown");
    assert_eq!(lifecycle.state(), State::Closed);
}

#[tokio::test]
async fn termination_runs_the_hook_once_and_releases_the_port() {
    let calls = Arc::new(AtomicUsize::new(0));
    let (mut lifecycle, addr, trigger) = {
        let calls = Arc::clone(&calls);
        start(move |lifecycle| {
            lifecycle.add_shutdown_hook(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        })
        .await
    };

    let probe = TcpStream::connect(addr)
        .await
        .expect("port accepts while serving");
    drop(probe);

    trigger.trigger();
    lifecycle.await_termination().await.expect("clean shutdown");

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(lifecycle.state(), State::Closed);
    assert!(
        TcpStream::connect(addr).await.is_err(),
        "port must refuse connections after cleanup"
    );
}

#[tokio::test]
async fn cleanup_completes_without_a_hook() {
    let (mut lifecycle, addr, trigger) = start(|_| {}).await;

    trigger.trigger();
    lifecycle.await_termination().await.expect("clean shutdown");

    assert_eq!(lifecycle.state(), State::Closed);
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn health_serves_and_reflection_is_absent_when_disabled() {
    let (mut lifecycle, addr, trigger) = start(|lifecycle| {
        lifecycle.enable_health_check(true);
        lifecycle.enable_reflection(false);
    })
    .await;

    let mut health = HealthClient::new(client_channel(addr).await);
    let response = health
        .check(HealthCheckRequest {
            service: String::new(),
        })
        .await
        .expect("health check succeeds");
    assert_eq!(response.into_inner().status(), ServingStatus::Serving);

    let mut reflection = ServerReflectionClient::new(client_channel(addr).await);
    let result = reflection
        .server_reflection_info(tokio_stream::iter(vec![list_services_request()]))
        .await;
    let status = result.expect_err("reflection is not registered");
    assert_eq!(status.code(), tonic::Code::Unimplemented);

    drop(health);
    drop(reflection);
    trigger.trigger();
    lifecycle.await_termination().await.expect("clean shutdown");
}

#[tokio::test]
async fn reflection_lists_services_when_enabled() {
    let (mut lifecycle, addr, trigger) = start(|lifecycle| {
        lifecycle.enable_health_check(true);
        lifecycle.enable_reflection(true);
    })
    .await;

    let mut reflection = ServerReflectionClient::new(client_channel(addr).await);
    let response = reflection
        .server_reflection_info(tokio_stream::iter(vec![list_services_request()]))
        .await
        .expect("reflection is registered");
    let reply = response
        .into_inner()
        .message()
        .await
        .expect("stream yields a reply")
        .expect("reply is present");
    assert!(matches!(
        reply.message_response,
        Some(MessageResponse::ListServicesResponse(_))
    ));

    drop(reflection);
    trigger.trigger();
    lifecycle.await_termination().await.expect("clean shutdown");
}

#[tokio::test]
async fn services_registered_on_the_engine_are_served() {
    // The health service doubles as a stand-in user service here: it is
    // registered through the engine handle, not via the lifecycle flag.
    let (reporter, service) = tonic_health::server::health_reporter();
    reporter
        .set_service_status("worker", tonic_health::ServingStatus::Serving)
        .await;

    let trigger = ManualTrigger::new();
    let mut lifecycle = ServerLifecycle::new();
    lifecycle.set_signal_source(trigger.clone());
    lifecycle.build().add_service(service);
    lifecycle
        .listen_and_serve("127.0.0.1", 0)
        .await
        .expect("bind a free port");
    let addr = lifecycle.local_addr().expect("bound address");

    let mut health = HealthClient::new(client_channel(addr).await);
    let response = health
        .check(HealthCheckRequest {
            service: String::from("worker"),
        })
        .await
        .expect("registered service responds");
    assert_eq!(response.into_inner().status(), ServingStatus::Serving);

    drop(health);
    trigger.trigger();
    lifecycle.await_termination().await.expect("clean shutdown");
}

#[tokio::test]
async fn a_rejecting_interceptor_is_visible_to_clients() {
    let deny: InterceptorFn = Arc::new(|_| Err(Status::permission_denied("no callers allowed")));
    let (mut lifecycle, addr, trigger) = start(move |lifecycle| {
        lifecycle.enable_health_check(true);
        lifecycle.set_unary_interceptors(vec![deny]);
    })
    .await;

    let mut health = HealthClient::new(client_channel(addr).await);
    let status = health
        .check(HealthCheckRequest {
            service: String::new(),
        })
        .await
        .expect_err("interceptor rejects the call");
    assert_eq!(status.code(), tonic::Code::PermissionDenied);

    drop(health);
    trigger.trigger();
    lifecycle.await_termination().await.expect("clean shutdown");
}

#[tokio::test]
async fn keepalive_directive_does_not_disturb_serving() {
    let (mut lifecycle, addr, trigger) = start(|lifecycle| {
        lifecycle.enable_health_check(true);
        lifecycle.set_keepalive_max_connection_age(Duration::from_secs(300));
    })
    .await;

    let mut health = HealthClient::new(client_channel(addr).await);
    health
        .check(HealthCheckRequest {
            service: String::new(),
        })
        .await
        .expect("health check succeeds");

    drop(health);
    trigger.trigger();
    lifecycle.await_termination().await.expect("clean shutdown");
}
