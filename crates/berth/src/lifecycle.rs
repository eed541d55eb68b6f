//! Server lifecycle orchestration: configure, build, bind, serve, drain.
//!
//! [`ServerLifecycle`] owns the full lifespan of a hosted gRPC server. It
//! accumulates configuration until [`build`](ServerLifecycle::build) freezes
//! it into an [`Engine`], binds a TCP listener and spawns the serve loop in
//! [`listen_and_serve`](ServerLifecycle::listen_and_serve), then blocks in
//! [`await_termination`](ServerLifecycle::await_termination) until the
//! injected signal source fires, at which point it drains in-flight calls,
//! closes the listener, and runs the registered shutdown hook.

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::options::{EngineOption, InterceptorChain, InterceptorFn};
use crate::signal::{OsSignals, SignalSource};
use core::time::Duration;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::service::RoutesBuilder;
use tonic::transport::Server;
use tonic_health::ServingStatus;
use tonic_health::server::HealthReporter;
use tower::ServiceBuilder;
use tracing::{error, info, warn};

/// Where the lifecycle currently stands.
///
/// Single-shot: no transition returns to an earlier state. One lifecycle
/// hosts one server for one process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Unbuilt,
    Built,
    Serving,
    Draining,
    Closed,
}

/// A zero-argument callback run once after teardown completes.
pub type ShutdownHook = Box<dyn FnOnce() + Send + 'static>;

/// Configuration accumulated before `build`.
///
/// Flags and chains are plain mutable fields with overwrite semantics:
/// setting one again replaces the previous value. Only `options` and the
/// descriptor sets accumulate.
#[derive(Default)]
struct Settings {
    options: Vec<EngineOption>,
    unary_interceptors: Option<InterceptorChain>,
    stream_interceptors: Option<InterceptorChain>,
    health_check_enabled: bool,
    reflection_enabled: bool,
    descriptor_sets: Vec<&'static [u8]>,
}

/// Live handles for a serving lifecycle.
struct ServingHandle {
    local_addr: SocketAddr,
    drain: CancellationToken,
    health: Option<HealthReporter>,
    task: JoinHandle<()>,
    fault_rx: oneshot::Receiver<tonic::transport::Error>,
}

/// Lifecycle wrapper around a tonic gRPC server.
///
/// Orchestration is single-threaded: one owner configures, builds, serves,
/// and awaits termination, in that order. The services hosted by the engine
/// are concurrent as usual.
pub struct ServerLifecycle {
    settings: Settings,
    drain_timeout: Option<Duration>,
    engine: Option<Engine>,
    serving: Option<ServingHandle>,
    signals: Box<dyn SignalSource>,
    shutdown_hook: Option<ShutdownHook>,
    state: State,
}

impl Default for ServerLifecycle {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            drain_timeout: None,
            engine: None,
            serving: None,
            signals: Box::new(OsSignals),
            shutdown_hook: None,
            state: State::Unbuilt,
        }
    }
}

impl ServerLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a generic engine-configuration directive.
    ///
    /// Directives are not validated here; a malformed one surfaces when
    /// serving starts.
    pub fn add_option(&mut self, option: EngineOption) {
        self.settings.options.push(option);
    }

    /// Serves the standard gRPC reflection service alongside registered
    /// services. Last call wins.
    pub fn enable_reflection(&mut self, enabled: bool) {
        self.settings.reflection_enabled = enabled;
    }

    /// Serves the standard gRPC health-check service alongside registered
    /// services. Last call wins.
    pub fn enable_health_check(&mut self, enabled: bool) {
        self.settings.health_check_enabled = enabled;
    }

    /// Adds an encoded file descriptor set for the reflection service to
    /// expose. Reflection cannot discover descriptors from registered
    /// services on its own; register here whatever the generated code
    /// exports (typically a `FILE_DESCRIPTOR_SET` constant).
    pub fn register_file_descriptor_set(&mut self, descriptor_set: &'static [u8]) {
        self.settings.descriptor_sets.push(descriptor_set);
    }

    /// Asks clients on connections older than `age` to reconnect, via a
    /// graceful HTTP/2 GOAWAY, to help load balancers rebalance. Zero means
    /// unlimited connection age.
    pub fn set_keepalive_max_connection_age(&mut self, age: Duration) {
        self.settings
            .options
            .push(EngineOption::KeepaliveMaxConnectionAge(age));
    }

    /// Installs the unary interceptor chain; chaining order is list order,
    /// first element outermost. Calling this again replaces the whole chain.
    ///
    /// The transport applies interceptors to every accepted request; it has
    /// no way to tell unary from streaming calls, so this chain and the
    /// stream chain both run on each request, this one first.
    pub fn set_unary_interceptors(&mut self, interceptors: Vec<InterceptorFn>) {
        self.settings.unary_interceptors = Some(InterceptorChain::new(interceptors));
    }

    /// Installs the stream interceptor chain; chaining order is list order,
    /// first element outermost. Calling this again replaces the whole chain.
    ///
    /// See [`set_unary_interceptors`](Self::set_unary_interceptors) for how
    /// the two chains are applied by the transport.
    pub fn set_stream_interceptors(&mut self, interceptors: Vec<InterceptorFn>) {
        self.settings.stream_interceptors = Some(InterceptorChain::new(interceptors));
    }

    /// Caps the graceful-drain wait during cleanup. `None` (the default)
    /// waits indefinitely for in-flight calls to finish; with a limit set,
    /// the serve task is aborted once the limit expires.
    pub fn set_drain_timeout(&mut self, timeout: Option<Duration>) {
        self.drain_timeout = timeout;
    }

    /// Replaces the termination signal source. Defaults to
    /// [`OsSignals`] (SIGINT + SIGTERM); inject a
    /// [`ManualTrigger`](crate::ManualTrigger) in tests.
    pub fn set_signal_source<S>(&mut self, source: S)
    where
        S: SignalSource + 'static,
    {
        self.signals = Box::new(source);
    }

    /// Registers a callback to run once after teardown completes. Only one
    /// hook is supported; a second registration replaces the first.
    pub fn add_shutdown_hook<F>(&mut self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shutdown_hook = Some(Box::new(hook));
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The bound address while serving. Useful when port 0 was requested.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.serving.as_ref().map(|serving| serving.local_addr)
    }

    /// The engine handle, if `build` has run and serving has not started.
    pub fn engine_mut(&mut self) -> Option<&mut Engine> {
        self.engine.as_mut()
    }

    /// Freezes the accumulated configuration into an [`Engine`] and returns
    /// it so services can be registered.
    ///
    /// Must be called exactly once before
    /// [`listen_and_serve`](Self::listen_and_serve). Configuration calls made
    /// after this point land in a fresh settings set and do not affect the
    /// built engine. Calling `build` twice replaces the engine with one built
    /// from that (empty) set and drops anything registered on the first;
    /// caller error, not guarded against.
    pub fn build(&mut self) -> &mut Engine {
        let settings = std::mem::take(&mut self.settings);
        let engine = Engine {
            options: settings.options,
            unary_interceptors: settings.unary_interceptors,
            stream_interceptors: settings.stream_interceptors,
            health_check_enabled: settings.health_check_enabled,
            reflection_enabled: settings.reflection_enabled,
            descriptor_sets: settings.descriptor_sets,
            routes: RoutesBuilder::default(),
        };
        self.state = State::Built;
        self.engine.insert(engine)
    }

    /// Binds `address:port`, registers the auxiliary services, and starts
    /// serving on a background task.
    ///
    /// Returns as soon as the listener is accepting; serving continues
    /// concurrently. On a bind failure the engine is retained and the
    /// lifecycle stays `Built`, so the caller can retry with another port.
    /// A serve-loop failure after this returns is reported through
    /// [`await_termination`](Self::await_termination).
    pub async fn listen_and_serve(&mut self, address: &str, port: u16) -> Result<()> {
        let Some(mut engine) = self.engine.take() else {
            return Err(Error::NotBuilt);
        };

        let addr = format!("{address}:{port}");
        let listener = match TcpListener::bind((address, port)).await {
            Ok(listener) => listener,
            Err(source) => {
                self.engine = Some(engine);
                return Err(Error::Bind { addr, source });
            }
        };
        // The OS picks the real port when 0 was requested.
        let local_addr = match listener.local_addr() {
            Ok(local_addr) => local_addr,
            Err(source) => {
                self.engine = Some(engine);
                return Err(Error::Bind { addr, source });
            }
        };

        let reflection = if engine.reflection_enabled {
            let mut builder = tonic_reflection::server::Builder::configure();
            for descriptor_set in engine.descriptor_sets.iter().copied() {
                builder = builder.register_encoded_file_descriptor_set(descriptor_set);
            }
            match builder.build_v1() {
                Ok(service) => Some(service),
                Err(source) => {
                    self.engine = Some(engine);
                    return Err(Error::Reflection(source));
                }
            }
        } else {
            None
        };

        let Engine {
            options,
            unary_interceptors,
            stream_interceptors,
            health_check_enabled,
            mut routes,
            ..
        } = engine;

        let health = if health_check_enabled {
            let (reporter, service) = tonic_health::server::health_reporter();
            reporter.set_service_status("", ServingStatus::Serving).await;
            routes.add_service(service);
            Some(reporter)
        } else {
            None
        };

        if let Some(service) = reflection {
            routes.add_service(service);
        }

        let mut transport = Server::builder();
        for option in options {
            transport = option.apply(transport);
        }

        // Unary chain outermost, then the stream chain, then the routes. An
        // absent chain defaults to an empty (no-op) chain so both layers share
        // one response-body type; `option_layer` can't, because tonic's
        // interceptor layer rewraps the body only on the present branch.
        let interceptors = ServiceBuilder::new()
            .layer(tonic::service::InterceptorLayer::new(
                unary_interceptors.unwrap_or_default(),
            ))
            .layer(tonic::service::InterceptorLayer::new(
                stream_interceptors.unwrap_or_default(),
            ));

        let drain = CancellationToken::new();
        let shutdown = drain.clone();
        let (fault_tx, fault_rx) = oneshot::channel();
        let incoming = TcpListenerStream::new(listener);

        let serve = transport
            .layer(interceptors)
            .add_routes(routes.routes())
            .serve_with_incoming_shutdown(incoming, async move { shutdown.cancelled().await });

        let task = tokio::spawn(async move {
            if let Err(err) = serve.await {
                error!("serve loop failed: {err}");
                let _ = fault_tx.send(err);
            }
        });

        info!("Server started on port {}", local_addr.port());

        self.serving = Some(ServingHandle {
            local_addr,
            drain,
            health,
            task,
            fault_rx,
        });
        self.state = State::Serving;
        Ok(())
    }

    /// Blocks until the signal source reports termination, then tears the
    /// server down: drain in-flight calls, close the listener, and run the
    /// shutdown hook exactly once. Returns after the hook (if any) finishes.
    ///
    /// If the serve loop faults first, returns [`Error::Serve`] instead;
    /// propagating that out of `main` is the intended way to turn a detached
    /// serve failure into a nonzero process exit.
    pub async fn await_termination(&mut self) -> Result<()> {
        let Some(mut serving) = self.serving.take() else {
            return Err(Error::NotServing);
        };

        let outcome = tokio::select! {
            cause = self.signals.recv() => Ok(cause),
            fault = &mut serving.fault_rx => Err(fault),
        };

        match outcome {
            Ok(cause) => {
                info!("Received {cause} signal");
                self.state = State::Draining;
                self.cleanup(serving).await;
                self.state = State::Closed;
                if let Some(hook) = self.shutdown_hook.take() {
                    hook();
                }
                Ok(())
            }
            Err(Ok(err)) => Err(Error::Serve(err)),
            Err(Err(_)) => Err(Error::ServeStopped),
        }
    }

    /// Sequential, best-effort teardown. The listener lives inside the serve
    /// task's incoming stream, so it closes (releasing the port) when the
    /// task ends; drain is therefore initiated before the socket goes away.
    async fn cleanup(&self, serving: ServingHandle) {
        let ServingHandle {
            drain,
            health,
            mut task,
            ..
        } = serving;

        info!("Stopping the server");
        if let Some(health) = health {
            health
                .set_service_status("", ServingStatus::NotServing)
                .await;
        }
        // Stop accepting new calls; in-flight calls finish before the serve
        // task returns.
        drain.cancel();

        match self.drain_timeout {
            None => {
                if let Err(err) = (&mut task).await {
                    error!("serve task failed during drain: {err}");
                }
            }
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!("serve task failed during drain: {err}"),
                Err(_) => {
                    warn!("drain did not finish within {limit:?}, aborting the serve task");
                    task.abort();
                }
            },
        }

        info!("Closing the listener");
        info!("End of program");
    }
}
