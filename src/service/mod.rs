//! The capability contract background workflows implement to be dispatched.
//!
//! The execution subsystem never looks inside a workflow: it only needs a
//! way to run it ([`BackgroundService::execute`]) and a human-readable name
//! for logs, spans, and metric tags ([`BackgroundService::name`]).

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Opaque error produced by a background workflow.
///
/// Execution errors never propagate back to the dispatch caller; they are
/// consumed by the orchestrator and reported through logs and metrics.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A named, stateless unit of business work that can run in the background.
///
/// Implementations are supplied per dispatch and shared behind an `Arc`;
/// they close over nothing mutable of their own. The `ctx` token is the
/// pool's root context (or a fresh token on the detached path) — workflows
/// that do long-running I/O should watch it and bail out early on shutdown.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use offload::service::{BackgroundService, BoxError};
/// use tokio_util::sync::CancellationToken;
///
/// struct PasswordResetEmail;
///
/// #[async_trait]
/// impl BackgroundService for PasswordResetEmail {
///     type Input = String;
///
///     async fn execute(
///         &self,
///         _ctx: CancellationToken,
///         locale: &str,
///         address: String,
///     ) -> Result<(), BoxError> {
///         // render the template for `locale` and send it to `address`
///         let _ = (locale, address);
///         Ok(())
///     }
///
///     fn name(&self) -> &str {
///         "password-reset-email"
///     }
/// }
/// ```
#[async_trait]
pub trait BackgroundService: Send + Sync + 'static {
    /// Payload a single run closes over.
    type Input: Send + 'static;

    /// Runs the workflow to completion.
    async fn execute(
        &self,
        ctx: CancellationToken,
        locale: &str,
        input: Self::Input,
    ) -> Result<(), BoxError>;

    /// Stable name used in spans, log events, and metric tags.
    fn name(&self) -> &str;
}
