//! Declarative per-resource configuration.
//!
//! Every synced table is described once by implementing [`Resource`]: where it
//! lives, which column is its identity, how the store orders it, and which
//! write policy the dispatcher follows for it. Pages, stores and subscribers
//! are generic over this trait.

use std::cmp::Ordering;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Server-side ordering used for the initial fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOrder {
    pub column: &'static str,
    pub ascending: bool,
}

impl SortOrder {
    pub const fn asc(column: &'static str) -> Self {
        Self {
            column,
            ascending: true,
        }
    }

    pub const fn desc(column: &'static str) -> Self {
        Self {
            column,
            ascending: false,
        }
    }
}

/// How the dispatcher reflects its own writes in the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePolicy {
    /// Apply locally right away, roll back on failure, let the echo reconcile.
    Optimistic,
    /// Leave the store alone; the change feed echo is the only update path.
    EchoOnly,
}

/// A table synced into a [`ResourceStore`](crate::store::ResourceStore).
pub trait Resource: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Table name in the data service
    const TABLE: &'static str;
    /// Identity column
    const ID_COLUMN: &'static str;
    /// Ordering requested from the server when seeding
    const ORDER: SortOrder;
    /// Write policy followed by the dispatcher
    const POLICY: WritePolicy;

    /// Identity value of this row.
    fn id(&self) -> &str;

    /// Store ordering. Must agree with [`Resource::ORDER`].
    fn order(a: &Self, b: &Self) -> Ordering;

    /// Store ordering with identity as the final tie-break, so ordering is a
    /// pure function of the contents.
    fn compare(a: &Self, b: &Self) -> Ordering {
        Self::order(a, b).then_with(|| a.id().cmp(b.id()))
    }
}
