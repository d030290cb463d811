//! Service modules for grouped registration.
//!
//! A module bundles the registrations of one subsystem so the application's
//! registry can be assembled from independent pieces.

use crate::container::ServiceContainer;
use crate::error::LifecycleResult;

/// A group of services registered together.
///
/// # Example
///
/// ```rust
/// use ferrous_lifecycle::{
///     BoxError, LifecycleResult, Service, ServiceContainer, ServiceContext, ServiceModule,
///     ServiceOptions,
/// };
///
/// struct Mailer;
/// impl Service for Mailer {}
///
/// struct Notifications;
/// impl Service for Notifications {}
///
/// struct MessagingModule;
///
/// impl ServiceModule for MessagingModule {
///     fn register_services(self, container: &ServiceContainer) -> LifecycleResult<()> {
///         container.register_service(
///             "mailer",
///             |_ctx: ServiceContext| async { Ok::<_, BoxError>(Mailer) },
///             ServiceOptions::new().optional(),
///         )?;
///         container.register_service(
///             "notifications",
///             |_ctx: ServiceContext| async { Ok::<_, BoxError>(Notifications) },
///             ServiceOptions::new().depends_on(["mailer"]),
///         )?;
///         Ok(())
///     }
/// }
///
/// # fn main() -> LifecycleResult<()> {
/// let container = ServiceContainer::new();
/// container.add_module(MessagingModule)?;
/// assert!(container.is_registered("notifications"));
/// # Ok(())
/// # }
/// ```
pub trait ServiceModule {
    /// Register this module's services with the container.
    fn register_services(self, container: &ServiceContainer) -> LifecycleResult<()>;
}

/// Closures taking the container are modules.
impl<F> ServiceModule for F
where
    F: FnOnce(&ServiceContainer) -> LifecycleResult<()>,
{
    fn register_services(self, container: &ServiceContainer) -> LifecycleResult<()> {
        self(container)
    }
}
