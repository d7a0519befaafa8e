use super::super::context::SharedCacheBackend;
use crate::domain::{Product, ProductIdentifier, PRODUCT_CACHE};
use crate::library::cache::{Cache, CacheError, Cached, Keyspace, Ttl};
use crate::library::BoxedError;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tracing::{info, instrument};

type ProductLoader =
    Box<dyn Fn(ProductIdentifier) -> BoxFuture<'static, Result<Product, BoxedError>> + Send + Sync>;

type CachedProducts = Cached<
    SharedCacheBackend,
    fn(&ProductIdentifier) -> String,
    ProductLoader,
    ProductIdentifier,
    Product,
>;

const SAMPLE_PRODUCT_NAME: &str = "sample";

fn cache_key(id: &ProductIdentifier) -> String {
    id.clone()
}

/// Product catalog with cached lookups
///
/// Lookups are served from the `products` cache and only hit the catalog on a miss. Products
/// unknown to the catalog resolve to a sample product. Saving a product writes it through to
/// the cache so that subsequent lookups observe the change without loading it again.
pub struct ProductService {
    catalog: Keyspace<SharedCacheBackend, Product>,
    products: CachedProducts,
}

impl ProductService {
    /// Creates a new service storing both catalog and cache in the given backend
    pub fn new(backend: SharedCacheBackend, ttl: Ttl) -> Self {
        let catalog = Keyspace::new(backend.clone());
        let cache = Arc::new(Cache::new(PRODUCT_CACHE, backend, ttl));

        let loader_catalog = catalog.clone();
        let loader: ProductLoader = Box::new(move |id| {
            let catalog = loader_catalog.clone();
            async move { load_product(catalog, id).await }.boxed()
        });

        Self {
            catalog,
            products: cache.cached(cache_key as fn(&ProductIdentifier) -> String, loader, ttl),
        }
    }

    /// Looks up a product, going through the cache
    pub async fn get_product(&self, id: impl Into<ProductIdentifier>) -> Result<Product, CacheError> {
        self.products.call(id.into()).await
    }

    /// Stores a product in the catalog and updates the cached lookup
    #[instrument(skip(self))]
    pub async fn save(&self, product: Product) -> Result<Product, CacheError> {
        info!("Saving product");
        self.catalog.save(&product).await?;
        self.products.put(&product.id, &product).await?;
        Ok(product)
    }

    /// Removes a product from the catalog and the cache
    pub async fn remove(&self, id: &ProductIdentifier) -> Result<(), CacheError> {
        self.catalog.delete_by_id(id).await?;
        self.products.evict(id).await
    }

    /// Drops the cached lookup, the next one reloads the product from the catalog
    pub async fn evict(&self, id: &ProductIdentifier) -> Result<(), CacheError> {
        self.products.evict(id).await
    }
}

async fn load_product(
    catalog: Keyspace<SharedCacheBackend, Product>,
    id: ProductIdentifier,
) -> Result<Product, BoxedError> {
    info!(%id, "Loading product");

    let product = catalog
        .find_by_id(&id)
        .await?
        .unwrap_or_else(|| Product::new(id, SAMPLE_PRODUCT_NAME));

    Ok(product)
}

#[cfg(test)]
mod does {
    use super::*;
    use crate::library::cache::{CacheBackend, MemoryCacheBackend};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tokio::time::advance;

    fn backend() -> SharedCacheBackend {
        Arc::new(MemoryCacheBackend::new())
    }

    #[tokio::test]
    async fn resolve_unknown_products_to_samples() {
        let service = ProductService::new(backend(), Ttl::Never);

        let product = service.get_product("p1").await.unwrap();

        assert_eq!(product, Product::new("p1", "sample"));
    }

    #[tokio::test]
    async fn serve_repeated_lookups_from_cache() {
        let backend = backend();
        let service = ProductService::new(backend.clone(), Ttl::Never);
        let catalog = Keyspace::<_, Product>::new(backend.clone());

        service.get_product("p1").await.unwrap();
        catalog.save(&Product::new("p1", "chair")).await.unwrap();

        assert_eq!(service.get_product("p1").await.unwrap().name, "sample");
        assert!(backend.get("products::p1").await.unwrap().is_some());

        service.evict(&"p1".to_string()).await.unwrap();
        assert_eq!(service.get_product("p1").await.unwrap().name, "chair");
    }

    #[tokio::test]
    async fn write_saved_products_through() {
        let service = ProductService::new(backend(), Ttl::Never);
        service.get_product("p1").await.unwrap();

        let saved = service
            .save(Product::new("p1", "table").with_price(1000))
            .await
            .unwrap();

        assert_eq!(service.get_product("p1").await.unwrap(), saved);
    }

    #[tokio::test]
    async fn reload_expired_lookups() {
        tokio::time::pause();
        let backend = backend();
        let service = ProductService::new(backend.clone(), Ttl::After(Duration::from_secs(2)));
        let catalog = Keyspace::<_, Product>::new(backend);

        service.get_product("p1").await.unwrap();
        catalog.save(&Product::new("p1", "lamp")).await.unwrap();
        advance(Duration::from_secs(3)).await;

        assert_eq!(service.get_product("p1").await.unwrap().name, "lamp");
    }

    #[tokio::test]
    async fn forget_removed_products() {
        let service = ProductService::new(backend(), Ttl::Never);
        let id = "p1".to_string();
        service.save(Product::new("p1", "desk")).await.unwrap();

        service.remove(&id).await.unwrap();

        assert_eq!(service.get_product("p1").await.unwrap().name, "sample");
    }
}
