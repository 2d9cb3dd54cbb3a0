//! Repository handles bound into an execution context.
//!
//! Repositories are looked up by type, so a command asks for exactly the
//! interface it needs, e.g. `ctx.repository::<dyn SessionRepository>()`.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Default, Clone)]
pub struct Repositories {
    handles: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl fmt::Debug for Repositories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repositories")
            .field("bound", &self.handles.len())
            .finish()
    }
}

impl Repositories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `repository`, replacing any previous binding of the same type
    pub fn insert<R>(&mut self, repository: Arc<R>)
    where
        R: ?Sized + Send + Sync + 'static,
    {
        self.handles.insert(TypeId::of::<R>(), Arc::new(repository));
    }

    pub fn get<R>(&self) -> Option<Arc<R>>
    where
        R: ?Sized + Send + Sync + 'static,
    {
        self.handles
            .get(&TypeId::of::<R>())
            .and_then(|handle| handle.downcast_ref::<Arc<R>>())
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait SessionRepository: Send + Sync {
        fn name(&self) -> &'static str;
    }

    struct InMemorySessions;

    impl SessionRepository for InMemorySessions {
        fn name(&self) -> &'static str {
            "in-memory"
        }
    }

    #[test]
    fn test_lookup_by_trait_object() {
        let mut repositories = Repositories::new();
        repositories.insert::<dyn SessionRepository>(Arc::new(InMemorySessions));

        let sessions = repositories.get::<dyn SessionRepository>().unwrap();
        assert_eq!(sessions.name(), "in-memory");
        assert!(repositories.get::<InMemorySessions>().is_none());
    }

    #[test]
    fn test_insert_replaces_same_type() {
        let mut repositories = Repositories::new();
        repositories.insert(Arc::new(1_u32));
        repositories.insert(Arc::new(2_u32));

        assert_eq!(repositories.len(), 1);
        assert_eq!(*repositories.get::<u32>().unwrap(), 2);
    }
}
