//! The built engine: frozen configuration plus the service registry.

use crate::options::{EngineOption, InterceptorChain};
use std::convert::Infallible;
use tonic::body::Body;
use tonic::codegen::http::{Request as HttpRequest, Response as HttpResponse};
use tonic::server::NamedService;
use tonic::service::RoutesBuilder;
use tower::Service;

/// The frozen server core produced by
/// [`ServerLifecycle::build`](crate::ServerLifecycle::build).
///
/// Holds the configuration directives captured at build time together with
/// the set of registered gRPC services. Callers register their services here
/// between `build` and `listen_and_serve`; the lifecycle consumes the engine
/// when serving starts.
pub struct Engine {
    pub(crate) options: Vec<EngineOption>,
    pub(crate) unary_interceptors: Option<InterceptorChain>,
    pub(crate) stream_interceptors: Option<InterceptorChain>,
    pub(crate) health_check_enabled: bool,
    pub(crate) reflection_enabled: bool,
    pub(crate) descriptor_sets: Vec<&'static [u8]>,
    pub(crate) routes: RoutesBuilder,
}

impl Engine {
    /// Registers a gRPC service with the engine.
    ///
    /// Accepts the generated tonic service wrappers
    /// (`MyServiceServer::new(handler)`).
    pub fn add_service<S>(&mut self, svc: S) -> &mut Self
    where
        S: Service<HttpRequest<Body>, Response = HttpResponse<Body>, Error = Infallible>
            + NamedService
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        self.routes.add_service(svc);
        self
    }
}
