//! Type-erased factory and hook wrappers.
//!
//! Registration is generic over the concrete service type; the container
//! stores everything behind these erased signatures so definitions of
//! different types live in one map.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

use crate::context::ServiceContext;
use crate::error::BoxError;
use crate::health::HealthInfo;
use crate::traits::{Service, ServiceInstance};

pub(crate) type ErasedFactory =
    Arc<dyn Fn(ServiceContext) -> BoxFuture<'static, Result<ServiceInstance, BoxError>> + Send + Sync>;

pub(crate) type ErasedHealthCheck =
    Arc<dyn Fn(ServiceInstance) -> BoxFuture<'static, Result<HealthInfo, BoxError>> + Send + Sync>;

pub(crate) type ErasedShutdownHandler =
    Arc<dyn Fn(ServiceInstance) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

pub(crate) fn erase_factory<T, F, Fut>(factory: F) -> ErasedFactory
where
    T: Service,
    F: Fn(ServiceContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, BoxError>> + Send + 'static,
{
    Arc::new(move |ctx| {
        let fut = factory(ctx);
        Box::pin(async move {
            let instance = fut.await?;
            Ok(Arc::new(instance) as ServiceInstance)
        })
    })
}

pub(crate) fn erase_health_check<T, F, Fut>(check: F) -> ErasedHealthCheck
where
    T: Service,
    F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HealthInfo, BoxError>> + Send + 'static,
{
    let check = Arc::new(check);
    Arc::new(move |instance| {
        let check = check.clone();
        Box::pin(async move {
            let typed = downcast::<T>(instance)?;
            check(typed).await
        })
    })
}

pub(crate) fn erase_shutdown_handler<T, F, Fut>(handler: F) -> ErasedShutdownHandler
where
    T: Service,
    F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    let handler = Arc::new(handler);
    Arc::new(move |instance| {
        let handler = handler.clone();
        Box::pin(async move {
            let typed = downcast::<T>(instance)?;
            handler(typed).await
        })
    })
}

fn downcast<T: Service>(instance: ServiceInstance) -> Result<Arc<T>, BoxError> {
    instance
        .downcast_arc::<T>()
        .map_err(|_| format!("instance is not a {}", std::any::type_name::<T>()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(u32);
    impl Service for Counter {}

    #[tokio::test]
    async fn erased_factory_wraps_instance() {
        let factory = erase_factory(|_ctx: ServiceContext| async { Ok::<_, BoxError>(Counter(7)) });
        let instance = factory(ServiceContext::detached("counter")).await.unwrap();
        let counter = instance.downcast_arc::<Counter>().ok().unwrap();
        assert_eq!(counter.0, 7);
    }

    #[tokio::test]
    async fn erased_health_check_sees_concrete_type() {
        let check = erase_health_check(|c: Arc<Counter>| async move {
            Ok(if c.0 > 5 {
                HealthInfo::healthy()
            } else {
                HealthInfo::unhealthy("too low")
            })
        });
        let info = check(Arc::new(Counter(9))).await.unwrap();
        assert!(info.healthy);
    }

    #[tokio::test]
    async fn erased_hook_rejects_foreign_type() {
        struct Other;
        impl Service for Other {}

        let handler = erase_shutdown_handler(|_c: Arc<Counter>| async { Ok(()) });
        assert!(handler(Arc::new(Other)).await.is_err());
    }
}
