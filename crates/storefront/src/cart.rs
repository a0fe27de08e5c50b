//! Shopping cart and its persistence.
//!
//! A cart is a list of line entries serialized as JSON under a single key of
//! the key/value store. Every read-modify-write on a key goes through a
//! per-key async mutex, so concurrent requests against the same cart apply
//! one after another instead of overwriting each other.

use crate::catalog::{available_stock, effective_price};
use crate::error::{Error, Result};
use dashmap::DashMap;
use external_services::{KvStore, Product, ProductVariation};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Store key of the default cart.
pub const CART_KEY: &str = "peptide_cart";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub product: Product,
    #[serde(default)]
    pub variation: Option<ProductVariation>,
    pub quantity: u32,
    /// Unit price captured when the item was added.
    pub price: Decimal,
}

impl CartItem {
    fn variation_id(&self) -> Option<&str> {
        self.variation.as_ref().map(|v| v.id.as_str())
    }

    fn is_same(&self, product_id: &str, variation_id: Option<&str>) -> bool {
        self.product.id == product_id && self.variation_id() == variation_id
    }

    pub fn line_total(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cart {
    pub items: Vec<CartItem>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `quantity` units of a selection, merging into an existing entry
    /// for the same product and variation.
    pub fn add(
        &mut self,
        product: &Product,
        variation: Option<&ProductVariation>,
        quantity: u32,
    ) -> Result<()> {
        if quantity == 0 {
            return Err(Error::Validation("Quantity must be at least 1".to_string()));
        }
        let available = available_stock(product, variation);
        let variation_id = variation.map(|v| v.id.as_str());
        let existing = self.quantity_of(&product.id, variation_id);

        if i64::from(existing) + i64::from(quantity) > available {
            return Err(Error::InsufficientStock { available });
        }

        match self
            .items
            .iter_mut()
            .find(|item| item.is_same(&product.id, variation_id))
        {
            Some(item) => item.quantity += quantity,
            None => self.items.push(CartItem {
                product: product.clone(),
                variation: variation.cloned(),
                quantity,
                price: effective_price(product, variation),
            }),
        }
        Ok(())
    }

    /// Set the quantity of the entry at `index`. Zero or less removes it.
    pub fn update_quantity(&mut self, index: usize, quantity: i64) -> Result<()> {
        if index >= self.items.len() {
            return Err(Error::NotFound(format!("cart item {}", index)));
        }
        if quantity <= 0 {
            self.items.remove(index);
            return Ok(());
        }

        let item = &mut self.items[index];
        let available = available_stock(&item.product, item.variation.as_ref());
        if quantity > available {
            return Err(Error::InsufficientStock { available });
        }
        item.quantity = u32::try_from(quantity)
            .map_err(|_| Error::Validation("Quantity is too large".to_string()))?;
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<CartItem> {
        if index >= self.items.len() {
            return Err(Error::NotFound(format!("cart item {}", index)));
        }
        Ok(self.items.remove(index))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn total_price(&self) -> Decimal {
        self.items.iter().map(CartItem::line_total).sum()
    }

    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    /// Quantity already in the cart for a product/variation pair.
    pub fn quantity_of(&self, product_id: &str, variation_id: Option<&str>) -> u32 {
        self.items
            .iter()
            .filter(|item| item.is_same(product_id, variation_id))
            .map(|item| item.quantity)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Carts persisted in a key/value store.
#[derive(Clone)]
pub struct CartStore {
    store: Arc<dyn KvStore>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl CartStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Store key for a cart id. The empty id maps to the default cart.
    pub fn key(cart_id: &str) -> String {
        if cart_id.is_empty() {
            CART_KEY.to_string()
        } else {
            format!("{}:{}", CART_KEY, cart_id)
        }
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn read(&self, key: &str) -> Result<Cart> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(Cart::new());
        };
        match serde_json::from_str::<Cart>(&raw) {
            Ok(cart) => Ok(cart),
            Err(e) => {
                warn!("Discarding unreadable cart at '{}': {}", key, e);
                metrics::counter!("storefront_cart_corrupt_total").increment(1);
                Ok(Cart::new())
            }
        }
    }

    pub async fn load(&self, cart_id: &str) -> Result<Cart> {
        self.read(&Self::key(cart_id)).await
    }

    /// Drop the lock for `key` unless another task still holds a handle to it.
    fn release(&self, key: &str) {
        self.locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Apply `f` to the stored cart and persist the result.
    ///
    /// Nothing is written when `f` fails.
    pub async fn mutate<T, F>(&self, cart_id: &str, f: F) -> Result<(Cart, T)>
    where
        F: FnOnce(&mut Cart) -> Result<T>,
    {
        let key = Self::key(cart_id);
        let lock = self.lock_for(&key);
        let result = {
            let _guard = lock.lock().await;
            self.apply(&key, f).await
        };
        drop(lock);
        self.release(&key);
        result
    }

    async fn apply<T, F>(&self, key: &str, f: F) -> Result<(Cart, T)>
    where
        F: FnOnce(&mut Cart) -> Result<T>,
    {
        let mut cart = self.read(key).await?;
        let output = f(&mut cart)?;
        let raw = serde_json::to_string(&cart)?;
        self.store.set(key, &raw).await?;
        debug!("Saved cart '{}' with {} entries", key, cart.items.len());
        Ok((cart, output))
    }

    pub async fn clear(&self, cart_id: &str) -> Result<()> {
        let key = Self::key(cart_id);
        let lock = self.lock_for(&key);
        let result = {
            let _guard = lock.lock().await;
            self.store.delete(&key).await
        };
        drop(lock);
        self.release(&key);
        result?;
        Ok(())
    }
}
