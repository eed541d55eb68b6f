//! Error types for the server lifecycle.
//!
//! This module defines the central `Error` enum covering every failure the
//! lifecycle can surface to a caller.
//!
//! ## Error Cases
//! - `Bind`: the TCP listener could not be created. Recoverable; the
//!   lifecycle stays in its built state so the caller can retry.
//! - `Reflection`: the reflection service could not be assembled from the
//!   registered descriptor sets.
//! - `Serve` / `ServeStopped`: the background serve loop died after startup.
//!   Unrecoverable; propagating it out of `main` is the intended fatal path.
//! - `NotBuilt` / `NotServing`: lifecycle operations called out of order.

use std::io;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the server lifecycle.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Listener creation failed: address in use, permission denied, or an
    /// unresolvable address. Returned to the caller, who decides whether to
    /// retry, pick another port, or abort.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// The reflection service could not be built from the registered file
    /// descriptor sets.
    #[error("failed to build reflection service: {0}")]
    Reflection(#[from] tonic_reflection::server::Error),

    /// The background serve loop failed for a reason other than an
    /// intentional shutdown. No caller can observe this on the detached
    /// task, so it is reported through `await_termination` and should
    /// terminate the process.
    #[error("serve loop failed: {0}")]
    Serve(#[source] tonic::transport::Error),

    /// The background serve loop exited before a termination signal without
    /// reporting an error.
    #[error("serve loop stopped unexpectedly")]
    ServeStopped,

    /// `listen_and_serve` was called before `build`.
    #[error("engine has not been built")]
    NotBuilt,

    /// `await_termination` was called while the server is not serving.
    #[error("server is not serving")]
    NotServing,
}
