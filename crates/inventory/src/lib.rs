//! Local inventory: goods and stock, committed sales, product reviews and the
//! journal of in-flight sale attempts.

pub mod catalog;
pub mod error;
pub mod memory;
pub mod model;
pub mod postgres;
pub mod reviews;
pub mod store;

pub use catalog::{Catalog, GoodView};
pub use error::{InventoryError, Result};
pub use memory::InMemoryInventoryStore;
pub use model::{
    AttemptState, CommittedSale, Good, GoodUpdate, NewAttempt, NewGood, NewReview, NewSale,
    Review, ReviewStatus, Sale, SaleAttempt,
};
pub use postgres::PostgresInventoryStore;
pub use reviews::{ReviewBoard, ReviewView};
pub use store::{InventoryBackend, InventoryStore, ReviewStore, SaleJournal};
