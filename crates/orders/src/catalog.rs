//! Product catalog collaborator.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::{Money, ProductId};

use crate::error::{OrderError, Result};

/// Read-only price lookup.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Returns the unit price, or None for an unknown product.
    async fn get_price(&self, product_id: &ProductId) -> Result<Option<Money>>;
}

#[async_trait]
impl<C: ProductCatalog + ?Sized> ProductCatalog for Arc<C> {
    async fn get_price(&self, product_id: &ProductId) -> Result<Option<Money>> {
        (**self).get_price(product_id).await
    }
}

#[derive(Debug, Default)]
struct CatalogState {
    prices: HashMap<ProductId, Money>,
    fail_on_lookup: bool,
}

/// In-memory catalog.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProductCatalog {
    state: Arc<RwLock<CatalogState>>,
}

impl InMemoryProductCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog seeded with `(product, price)` pairs.
    pub fn with_products<I, P>(products: I) -> Self
    where
        I: IntoIterator<Item = (P, Money)>,
        P: Into<ProductId>,
    {
        let prices = products
            .into_iter()
            .map(|(id, price)| (id.into(), price))
            .collect();
        Self {
            state: Arc::new(RwLock::new(CatalogState {
                prices,
                fail_on_lookup: false,
            })),
        }
    }

    /// Sets or replaces a product's price.
    pub fn set_price(&self, product_id: impl Into<ProductId>, price: Money) {
        self.write().prices.insert(product_id.into(), price);
    }

    /// Configures lookups to fail with [`OrderError::Unavailable`].
    pub fn set_fail_on_lookup(&self, fail: bool) {
        self.write().fail_on_lookup = fail;
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, CatalogState> {
        self.state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl ProductCatalog for InMemoryProductCatalog {
    async fn get_price(&self, product_id: &ProductId) -> Result<Option<Money>> {
        let state = self
            .state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.fail_on_lookup {
            return Err(OrderError::Unavailable("catalog offline".to_string()));
        }
        Ok(state.prices.get(product_id).copied())
    }
}
