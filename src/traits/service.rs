//! Lifecycle hooks for service instances.

use async_trait::async_trait;
use downcast_rs::{impl_downcast, DowncastSync};
use std::sync::Arc;

use crate::error::BoxError;

/// Trait implemented by every instance the container manages.
///
/// Both hooks default to no-ops, so plain value types only need an empty
/// `impl Service for T {}`. When present, `initialize` runs right after the
/// factory returns and shares the same deadline; `shutdown` runs after the
/// registered shutdown handler during teardown.
///
/// # Examples
///
/// ```
/// use ferrous_lifecycle::{Service, BoxError};
/// use async_trait::async_trait;
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// struct Mailer {
///     connected: AtomicBool,
/// }
///
/// #[async_trait]
/// impl Service for Mailer {
///     async fn initialize(&self) -> Result<(), BoxError> {
///         self.connected.store(true, Ordering::SeqCst);
///         Ok(())
///     }
///
///     async fn shutdown(&self) -> Result<(), BoxError> {
///         self.connected.store(false, Ordering::SeqCst);
///         Ok(())
///     }
/// }
///
/// struct Clock;
/// impl Service for Clock {}
/// ```
#[async_trait]
pub trait Service: DowncastSync {
    /// Completes setup after construction.
    async fn initialize(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Releases resources held by the instance.
    async fn shutdown(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl_downcast!(sync Service);

/// Type-erased, shared service instance.
pub type ServiceInstance = Arc<dyn Service>;
