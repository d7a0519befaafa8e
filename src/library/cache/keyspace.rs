use super::{CacheBackend, CacheError, Ttl};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Display;
use std::marker::PhantomData;
use tracing::trace;

/// Entity persisted in a [`Keyspace`]
pub trait KeyspaceEntity: Serialize + DeserializeOwned {
    /// Name of the keyspace, used as a key prefix
    const KEYSPACE: &'static str;

    /// Type of the unique identifier
    type Id: Display;

    /// Unique identifier of this instance
    fn id(&self) -> &Self::Id;
}

/// Repository storing entities as JSON values under `<keyspace>:<id>` keys
///
/// Entries are written without expiry and thus behave like plain key-value storage.
pub struct Keyspace<B, E> {
    backend: B,
    entity: PhantomData<fn() -> E>,
}

impl<B: Clone, E> Clone for Keyspace<B, E> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            entity: PhantomData,
        }
    }
}

impl<B, E> Keyspace<B, E>
where
    B: CacheBackend + Send + Sync,
    E: KeyspaceEntity,
{
    /// Creates a repository on top of a backend
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            entity: PhantomData,
        }
    }

    fn key(id: &E::Id) -> String {
        format!("{}:{}", E::KEYSPACE, id)
    }

    /// Stores an entity, replacing any previous version with the same id
    pub async fn save(&self, entity: &E) -> Result<(), CacheError> {
        let key = Self::key(entity.id());
        let value = serde_json::to_vec(entity)?;
        trace!(%key, "Saving entity");
        self.backend.set(&key, &value, Ttl::Never).await
    }

    /// Looks up an entity by its id
    pub async fn find_by_id(&self, id: &E::Id) -> Result<Option<E>, CacheError> {
        match self.backend.get(&Self::key(id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether an entity with the given id exists
    pub async fn exists_by_id(&self, id: &E::Id) -> Result<bool, CacheError> {
        Ok(self.backend.get(&Self::key(id)).await?.is_some())
    }

    /// Removes an entity, returning whether it existed
    pub async fn delete_by_id(&self, id: &E::Id) -> Result<bool, CacheError> {
        self.backend.del(&Self::key(id)).await
    }
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::library::cache::MemoryCacheBackend;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Widget {
        id: u32,
        name: String,
    }

    impl KeyspaceEntity for Widget {
        const KEYSPACE: &'static str = "widgets";
        type Id = u32;

        fn id(&self) -> &u32 {
            &self.id
        }
    }

    #[tokio::test]
    async fn store_and_remove_entities() {
        let backend = Arc::new(MemoryCacheBackend::new());
        let widgets = Keyspace::<_, Widget>::new(backend.clone());
        let widget = Widget {
            id: 1,
            name: "gear".into(),
        };

        assert!(!widgets.exists_by_id(&1).await.unwrap());

        widgets.save(&widget).await.unwrap();
        assert!(widgets.exists_by_id(&1).await.unwrap());
        assert_eq!(widgets.find_by_id(&1).await.unwrap(), Some(widget));
        assert!(backend.get("widgets:1").await.unwrap().is_some());

        assert!(widgets.delete_by_id(&1).await.unwrap());
        assert!(!widgets.delete_by_id(&1).await.unwrap());
        assert_eq!(widgets.find_by_id(&1).await.unwrap(), None);
    }
}
