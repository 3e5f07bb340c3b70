//! User-defined aggregate registry and runtime interface.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use quarry_common::Result;
use quarry_planner::Value;

/// Runtime contract of one user-defined aggregate instance.
///
/// State is carried as a [`Value`]; one instance serves one group of one
/// aggregate call, so implementations may also keep private state.
pub trait UserAggregate: Send {
    /// Initial state before any row contributed.
    fn init(&mut self) -> Result<Value>;
    /// Fold one non-null argument into `state`.
    fn add(&mut self, state: Value, value: &Value) -> Result<Value>;
    /// Combine two partial states.
    fn merge(&mut self, left: Value, right: Value) -> Result<Value>;
    /// Final value for `state`.
    fn result(&mut self, state: Value) -> Result<Value>;
}

/// Constructor invoked once per group for every call to a registered name.
pub type UdafFactory = Arc<dyn Fn() -> Box<dyn UserAggregate> + Send + Sync>;

/// One registry entry.
#[derive(Clone)]
pub struct UdafEntry {
    /// Builds a fresh aggregate instance.
    pub factory: UdafFactory,
    /// Report null instead of `result(init())` when no row contributed.
    pub null_when_empty: bool,
}

/// Name-keyed registry of user-defined aggregates. Names are case-insensitive.
#[derive(Default)]
pub struct UdafRegistry {
    inner: RwLock<HashMap<String, UdafEntry>>,
}

impl std::fmt::Debug for UdafRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdafRegistry")
            .field("aggregates", &self.names())
            .finish()
    }
}

impl UdafRegistry {
    // Entries are plain data, so a poisoned lock still holds a usable map.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, UdafEntry>> {
        self.inner.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, UdafEntry>> {
        self.inner.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Register or replace an aggregate.
    ///
    /// Returns `true` when an existing aggregate with the same name was replaced.
    pub fn register<F>(&self, name: &str, null_when_empty: bool, factory: F) -> bool
    where
        F: Fn() -> Box<dyn UserAggregate> + Send + Sync + 'static,
    {
        self.write()
            .insert(
                name.to_ascii_lowercase(),
                UdafEntry {
                    factory: Arc::new(factory),
                    null_when_empty,
                },
            )
            .is_some()
    }

    /// Deregister an aggregate by name.
    ///
    /// Returns `true` when an existing aggregate was removed.
    pub fn deregister(&self, name: &str) -> bool {
        self.write().remove(&name.to_ascii_lowercase()).is_some()
    }

    /// Lookup by name.
    pub fn get(&self, name: &str) -> Option<UdafEntry> {
        self.read().get(&name.to_ascii_lowercase()).cloned()
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names = self.read().keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }
}

fn global_registry() -> &'static Arc<UdafRegistry> {
    static REGISTRY: OnceLock<Arc<UdafRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| Arc::new(UdafRegistry::default()))
}

/// Process-wide registry used by [`crate::TaskContext::new`].
pub fn global_udaf_registry() -> Arc<UdafRegistry> {
    Arc::clone(global_registry())
}

/// Register an aggregate in the global registry.
///
/// Returns `true` when an existing aggregate with the same name was replaced.
pub fn register_global_udaf<F>(name: &str, null_when_empty: bool, factory: F) -> bool
where
    F: Fn() -> Box<dyn UserAggregate> + Send + Sync + 'static,
{
    global_registry().register(name, null_when_empty, factory)
}

/// Deregister an aggregate from the global registry.
pub fn deregister_global_udaf(name: &str) -> bool {
    global_registry().deregister(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Product;

    impl UserAggregate for Product {
        fn init(&mut self) -> Result<Value> {
            Ok(Value::Int64(1))
        }

        fn add(&mut self, state: Value, value: &Value) -> Result<Value> {
            Ok(Value::Int64(state.as_i64().unwrap_or(1) * value.as_i64().unwrap_or(1)))
        }

        fn merge(&mut self, left: Value, right: Value) -> Result<Value> {
            self.add(left, &right)
        }

        fn result(&mut self, state: Value) -> Result<Value> {
            Ok(state)
        }
    }

    #[test]
    fn names_are_case_insensitive() {
        let registry = UdafRegistry::default();
        assert!(!registry.register("Product", false, || Box::new(Product)));
        assert!(registry.register("PRODUCT", true, || Box::new(Product)));
        let entry = registry.get("product").unwrap();
        assert!(entry.null_when_empty);
        assert_eq!(registry.names(), vec!["product".to_string()]);
        assert!(registry.deregister("pRoDuCt"));
        assert!(registry.get("product").is_none());
    }
}
