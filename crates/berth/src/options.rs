//! Accumulated engine configuration: transport directives and interceptor
//! chains.
//!
//! Directives collect in call order on the lifecycle and are replayed onto
//! the transport builder in the same order when serving starts. Interceptor
//! lists collapse into a single [`InterceptorChain`] per kind; the chain as a
//! whole is replaced if it is set again.

use core::fmt;
use core::time::Duration;
use std::sync::Arc;
use tonic::service::Interceptor;
use tonic::transport::Server;
use tonic::{Request, Status};

/// A deferred transport tweak, applied to the [`Server`] builder when the
/// engine is assembled.
pub type ConfigureFn = Box<dyn FnOnce(Server) -> Server + Send + 'static>;

/// A single interceptor step: inspect or rewrite the request, or abort the
/// call with a [`Status`].
pub type InterceptorFn =
    Arc<dyn Fn(Request<()>) -> Result<Request<()>, Status> + Send + Sync + 'static>;

/// One engine-configuration directive.
///
/// No validation happens on append; a directive that misconfigures the
/// transport surfaces when serving starts.
pub enum EngineOption {
    /// An arbitrary transport setting, e.g.
    /// `EngineOption::custom(|s| s.http2_adaptive_window(Some(true)))`.
    ///
    /// Custom directives run before the interceptor layers are installed, so
    /// they can only adjust builder settings, not wrap the service stack.
    Custom(ConfigureFn),

    /// Ask clients on connections older than this age to reconnect, via a
    /// graceful HTTP/2 GOAWAY rather than an abrupt close, so load balancers
    /// can rebalance long-lived connections. A zero duration means unlimited
    /// connection age. There is no forced-close grace timer after the
    /// notification.
    KeepaliveMaxConnectionAge(Duration),
}

impl EngineOption {
    /// Wraps a transport closure as a directive.
    pub fn custom<F>(f: F) -> Self
    where
        F: FnOnce(Server) -> Server + Send + 'static,
    {
        Self::Custom(Box::new(f))
    }

    /// Replays this directive onto the transport builder.
    pub(crate) fn apply(self, server: Server) -> Server {
        match self {
            Self::Custom(f) => f(server),
            Self::KeepaliveMaxConnectionAge(age) if age.is_zero() => server,
            Self::KeepaliveMaxConnectionAge(age) => server.max_connection_age(age),
        }
    }
}

impl fmt::Debug for EngineOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(_) => f.write_str("Custom(..)"),
            Self::KeepaliveMaxConnectionAge(age) => f
                .debug_tuple("KeepaliveMaxConnectionAge")
                .field(age)
                .finish(),
        }
    }
}

/// An ordered interceptor list collapsed into a single [`Interceptor`].
///
/// The first element is outermost: it sees each request first, and a
/// rejection short-circuits the rest of the chain.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    steps: Vec<InterceptorFn>,
}

impl InterceptorChain {
    pub fn new(steps: Vec<InterceptorFn>) -> Self {
        Self { steps }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Interceptor for InterceptorChain {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        for step in &self.steps {
            request = step(request)?;
        }
        Ok(request)
    }
}
