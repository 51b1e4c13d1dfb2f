use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw database identifier.
            pub fn new(id: i64) -> Self {
                Self(id)
            }

            /// Returns the raw identifier.
            pub fn as_i64(&self) -> i64 {
                self.0
            }

            /// Returns true if the identifier could refer to a stored row.
            pub fn is_valid(&self) -> bool {
                self.0 > 0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

numeric_id!(
    /// Identifier of a good in the local inventory.
    GoodId
);

numeric_id!(
    /// Identifier of a committed sale.
    SaleId
);

numeric_id!(
    /// Identifier of a customer account owned by the ledger service.
    AccountId
);

numeric_id!(
    /// Identifier of a product review.
    ReviewId
);

/// Idempotency key for one sale attempt.
///
/// Sent to the ledger with every balance change so a retried request is
/// recognized instead of applied twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptId(Uuid);

impl AttemptId {
    /// Creates a new random attempt ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an attempt ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Idempotency key for the debit issued by this attempt.
    pub fn debit_key(&self) -> String {
        self.0.to_string()
    }

    /// Idempotency key for the compensating credit of this attempt.
    pub fn reversal_key(&self) -> String {
        format!("{}-reversal", self.0)
    }
}

impl Default for AttemptId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AttemptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for AttemptId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<AttemptId> for Uuid {
    fn from(id: AttemptId) -> Self {
        id.0
    }
}
