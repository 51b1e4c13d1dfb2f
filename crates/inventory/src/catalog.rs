//! Encrypting facade over an [`InventoryStore`].

use std::sync::Arc;

use common::GoodId;
use security::EncryptionGateway;
use serde::Serialize;

use crate::model::{Good, GoodUpdate, NewGood};
use crate::store::InventoryStore;
use crate::{InventoryError, Result};

/// A good as presented to callers, with its description opened.
///
/// `good.description` is always cleared; the plaintext lives in
/// `description`. When the stored value cannot be opened the read still
/// succeeds with `description: None, unreadable: true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GoodView {
    pub good: Good,
    pub description: Option<String>,
    pub unreadable: bool,
}

/// Seals descriptions on write and opens them on read.
pub struct Catalog<S: ?Sized> {
    store: Arc<S>,
    gateway: EncryptionGateway,
}

impl<S: ?Sized> Clone for Catalog<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            gateway: self.gateway.clone(),
        }
    }
}

impl<S> Catalog<S>
where
    S: InventoryStore + ?Sized,
{
    pub fn new(store: Arc<S>, gateway: EncryptionGateway) -> Self {
        Self { store, gateway }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn gateway(&self) -> &EncryptionGateway {
        &self.gateway
    }

    #[tracing::instrument(skip(self, good), fields(name = %good.name))]
    pub async fn add_good(&self, mut good: NewGood) -> Result<GoodView> {
        good.description = self.gateway.seal(good.description.as_deref())?;
        let stored = self.store.add_good(good).await?;
        tracing::info!(good_id = %stored.id, "good added");
        Ok(self.view(stored))
    }

    #[tracing::instrument(skip(self, update))]
    pub async fn update_good(&self, id: GoodId, mut update: GoodUpdate) -> Result<GoodView> {
        update.description = self.gateway.seal(update.description.as_deref())?;
        let stored = self.store.update_good(id, update).await?;
        Ok(self.view(stored))
    }

    pub async fn get_good(&self, id: GoodId) -> Result<GoodView> {
        self.store
            .get_good(id)
            .await?
            .map(|good| self.view(good))
            .ok_or(InventoryError::GoodNotFound(id))
    }

    pub async fn list_goods(&self) -> Result<Vec<GoodView>> {
        let goods = self.store.list_goods().await?;
        Ok(goods.into_iter().map(|good| self.view(good)).collect())
    }

    /// Administrative stock removal. Returns the new stock count.
    #[tracing::instrument(skip(self))]
    pub async fn deduct_stock(&self, id: GoodId, quantity: u32) -> Result<i64> {
        let remaining = self.store.deduct_stock(id, quantity).await?;
        tracing::info!(remaining, "stock deducted");
        Ok(remaining)
    }

    fn view(&self, mut good: Good) -> GoodView {
        let sealed = good.description.take();
        match self.gateway.open(sealed.as_deref()) {
            Ok(description) => GoodView {
                good,
                description,
                unreadable: false,
            },
            Err(err) => {
                tracing::warn!(good_id = %good.id, error = %err, "good description unreadable");
                GoodView {
                    good,
                    description: None,
                    unreadable: true,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use common::Money;

    use super::*;
    use crate::memory::InMemoryInventoryStore;

    fn gateway(byte: u8) -> EncryptionGateway {
        EncryptionGateway::from_key_material("catalog", &STANDARD.encode([byte; 32])).unwrap()
    }

    fn widget(description: Option<&str>) -> NewGood {
        NewGood {
            name: "Widget".to_string(),
            category: "tools".to_string(),
            price: Money::from_dollars(5),
            description: description.map(str::to_string),
            stock_count: 10,
        }
    }

    #[tokio::test]
    async fn test_description_is_sealed_at_rest() {
        let store = Arc::new(InMemoryInventoryStore::new());
        let catalog = Catalog::new(Arc::clone(&store), gateway(1));

        let view = catalog.add_good(widget(Some("hand forged"))).await.unwrap();
        assert_eq!(view.description.as_deref(), Some("hand forged"));
        assert!(view.good.description.is_none());

        let raw = store.get_good(view.good.id).await.unwrap().unwrap();
        let stored = raw.description.unwrap();
        assert_ne!(stored, "hand forged");

        let read = catalog.get_good(view.good.id).await.unwrap();
        assert_eq!(read.description.as_deref(), Some("hand forged"));
        assert!(!read.unreadable);
    }

    #[tokio::test]
    async fn test_unreadable_description_does_not_fail_read() {
        let store = Arc::new(InMemoryInventoryStore::new());
        let writer = Catalog::new(Arc::clone(&store), gateway(1));
        let reader = Catalog::new(Arc::clone(&store), gateway(2));

        let view = writer.add_good(widget(Some("secret"))).await.unwrap();
        let read = reader.get_good(view.good.id).await.unwrap();

        assert!(read.unreadable);
        assert_eq!(read.description, None);
        assert_eq!(read.good.name, "Widget");
    }

    #[tokio::test]
    async fn test_passthrough_stores_plaintext() {
        let store = Arc::new(InMemoryInventoryStore::new());
        let catalog = Catalog::new(
            Arc::clone(&store),
            EncryptionGateway::passthrough("test without key"),
        );

        let view = catalog.add_good(widget(Some("plain"))).await.unwrap();
        let raw = store.get_good(view.good.id).await.unwrap().unwrap();
        assert_eq!(raw.description.as_deref(), Some("plain"));
    }

    #[tokio::test]
    async fn test_update_seals_new_description() {
        let store = Arc::new(InMemoryInventoryStore::new());
        let catalog = Catalog::new(Arc::clone(&store), gateway(3));
        let view = catalog.add_good(widget(None)).await.unwrap();

        let update = GoodUpdate {
            description: Some("now described".to_string()),
            ..Default::default()
        };
        let updated = catalog.update_good(view.good.id, update).await.unwrap();
        assert_eq!(updated.description.as_deref(), Some("now described"));

        let raw = store.get_good(view.good.id).await.unwrap().unwrap();
        assert_ne!(raw.description.as_deref(), Some("now described"));
    }

    #[tokio::test]
    async fn test_missing_good() {
        let catalog = Catalog::new(Arc::new(InMemoryInventoryStore::new()), gateway(1));
        assert!(matches!(
            catalog.get_good(GoodId::new(7)).await,
            Err(InventoryError::GoodNotFound(_))
        ));
    }
}
