//! Component registry and activation

use super::component::{Component, ComponentContext, ValidationResult};
use super::table::reachable_steps;
use super::ComponentId;
use crate::error::{ComponentError, FlowError};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

pub type ComponentFactory = fn() -> Box<dyn Component>;

struct CachedInstance {
    instance: Box<dyn Component>,
    cached_at: Instant,
}

/// Name-to-factory map plus the instance cache used between a prompt and
/// its reply.
///
/// The cache lives in this process only. Components persist everything they
/// need through `update_component_data`, so a reply handled by another
/// process (or after eviction) sees a fresh instance and still behaves
/// correctly; the cache only preserves in-memory diagnostics.
pub struct ComponentRegistry {
    factories: HashMap<ComponentId, ComponentFactory>,
    cache: Mutex<HashMap<(String, ComponentId), CachedInstance>>,
    cache_ttl: Duration,
}

impl ComponentRegistry {
    pub fn new(cache_ttl: Duration) -> Self {
        Self {
            factories: HashMap::new(),
            cache: Mutex::new(HashMap::new()),
            cache_ttl,
        }
    }

    /// Registry with every built-in component
    pub fn with_defaults(cache_ttl: Duration) -> Self {
        let mut registry = Self::new(cache_ttl);
        crate::components::register_all(&mut registry);
        registry
    }

    pub fn register(&mut self, id: ComponentId, factory: ComponentFactory) {
        if self.factories.insert(id, factory).is_some() {
            tracing::warn!(component = %id, "Component registered twice, keeping the last factory");
        }
    }

    pub fn contains(&self, id: ComponentId) -> bool {
        self.factories.contains_key(&id)
    }

    /// Fresh instance of a registered component
    pub fn create(&self, id: ComponentId) -> Result<Box<dyn Component>, FlowError> {
        self.factories
            .get(&id)
            .map(|factory| factory())
            .ok_or_else(|| ComponentError::unknown_component(id).into())
    }

    /// Check every component the flow table can reach is registered under
    /// the id it reports. Run once at startup.
    pub fn verify_table(&self) -> Result<(), FlowError> {
        for step in reachable_steps() {
            let instance = self.create(step.component).map_err(|e| {
                tracing::error!(%step, "Flow table references an unregistered component");
                e
            })?;
            if instance.id() != step.component {
                return Err(ComponentError::invalid_state(
                    step.component,
                    format!("factory builds {} instead", instance.id()),
                )
                .into());
            }
        }
        Ok(())
    }

    /// Run the component at the current step against `ctx`.
    ///
    /// While the channel is awaiting input, the instance that sent the
    /// prompt is reused if this process still holds it.
    pub async fn activate(
        &self,
        ctx: &ComponentContext,
        id: ComponentId,
    ) -> Result<ValidationResult, FlowError> {
        let key = (ctx.state().identity().state_key(), id);
        let awaiting = ctx.state().is_awaiting_input().await?;

        let cached = if awaiting {
            self.take_cached(&key)
        } else {
            self.evict(&key);
            None
        };
        let reused = cached.is_some();
        let mut instance = match cached {
            Some(instance) => instance,
            None => self.create(id)?,
        };

        tracing::debug!(
            channel = %ctx.state().identity(),
            component = %id,
            kind = ?instance.kind(),
            reused,
            "Activating component"
        );

        let result = instance.validate(ctx, None).await?;

        // A rejected API call can hand the wait over to another component
        let waits_here = ctx
            .state()
            .component_data()
            .await?
            .is_some_and(|cd| cd.awaiting_input && cd.component == id);
        if waits_here {
            self.store_cached(key, instance);
        } else {
            let tracker = instance.tracker();
            tracing::debug!(
                component = %id,
                attempts = tracker.attempts,
                last_error = ?tracker.last_error,
                "Component finished"
            );
        }
        Ok(result)
    }

    fn take_cached(&self, key: &(String, ComponentId)) -> Option<Box<dyn Component>> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        let ttl = self.cache_ttl;
        cache.retain(|_, entry| entry.cached_at.elapsed() < ttl);
        cache.remove(key).map(|entry| entry.instance)
    }

    fn store_cached(&self, key: (String, ComponentId), instance: Box<dyn Component>) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key,
                CachedInstance {
                    instance,
                    cached_at: Instant::now(),
                },
            );
    }

    fn evict(&self, key: &(String, ComponentId)) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    #[cfg(test)]
    pub fn cached_instances(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ComponentErrorKind;
    use crate::flow::{FlowPath, Message, Step};
    use crate::ports::ApiError;
    use crate::testing::Harness;
    use serde_json::{json, Map};

    fn registry() -> ComponentRegistry {
        ComponentRegistry::with_defaults(Duration::from_secs(60))
    }

    #[test]
    fn test_default_registry_covers_flow_table() {
        registry().verify_table().unwrap();
    }

    #[test]
    fn test_empty_registry_fails_verification() {
        let err = ComponentRegistry::new(Duration::from_secs(60))
            .verify_table()
            .unwrap_err();
        assert!(matches!(
            err,
            FlowError::Component(ComponentError { kind: ComponentErrorKind::UnknownComponent, .. })
        ));
    }

    #[tokio::test]
    async fn test_rejected_api_call_is_not_cached() {
        let harness = Harness::new();
        let registry = registry();
        harness
            .logged_in_at(
                Step::new(FlowPath::OfferSecured, ComponentId::ValidateHandleApiCall),
                false,
            )
            .await;
        let mut data = Map::new();
        data.insert("handle".to_string(), json!("nobody"));
        harness.state().update_component_data(data).await.unwrap();
        harness
            .api
            .queue_handle(Err(ApiError::business("Handle not found")));

        let ctx = harness.context(false);
        let result = registry
            .activate(&ctx, ComponentId::ValidateHandleApiCall)
            .await
            .unwrap();

        assert!(!result.is_success());
        assert_eq!(registry.cached_instances(), 0);
        assert_eq!(
            harness.state().get_component().await.unwrap(),
            Some(ComponentId::HandleInput)
        );
        assert!(harness.state().is_awaiting_input().await.unwrap());
    }

    #[tokio::test]
    async fn test_instance_cached_while_awaiting_and_dropped_after() {
        let harness = Harness::new();
        let registry = registry();
        let ctx = harness.context(false);
        ctx.state().initialize_channel(false).await.unwrap();
        let step = Step::new(FlowPath::OfferSecured, ComponentId::AmountInput);
        ctx.state()
            .update_flow_state(step, Map::new(), None, false)
            .await
            .unwrap();

        registry.activate(&ctx, ComponentId::AmountInput).await.unwrap();
        assert_eq!(registry.cached_instances(), 1);

        ctx.state()
            .set_incoming_message(Some(Message::text("25")))
            .await
            .unwrap();
        let result = registry.activate(&ctx, ComponentId::AmountInput).await.unwrap();

        assert!(result.is_success());
        assert_eq!(registry.cached_instances(), 0);
    }

    #[tokio::test]
    async fn test_expired_cache_entries_are_dropped() {
        let harness = Harness::new();
        let registry = ComponentRegistry::with_defaults(Duration::from_millis(1));
        let ctx = harness.context(false);
        ctx.state().initialize_channel(false).await.unwrap();
        ctx.state()
            .update_flow_state(
                Step::new(FlowPath::OfferSecured, ComponentId::AmountInput),
                Map::new(),
                None,
                false,
            )
            .await
            .unwrap();

        registry.activate(&ctx, ComponentId::AmountInput).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(registry
            .take_cached(&(ctx.state().identity().state_key(), ComponentId::AmountInput))
            .is_none());
    }
}
