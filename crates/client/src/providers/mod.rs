//! Interfaces of the external collaborators.
//!
//! The core flows never talk to a concrete service; they are generic over
//! these traits so the real REST adapters (`firebase`, `algolia`, `storage`)
//! and the in-memory fakes (`testing`) are interchangeable.
//!
//! # Push channels
//!
//! Provider callbacks are modelled as [`futures::stream::BoxStream`]s: the
//! stream is the subscription, and dropping it unsubscribes.

mod documents;
mod identity;
mod search;
mod storage;

pub use documents::{DocumentStore, StoreError};
pub use identity::{EmailPrompt, IdentityError, IdentityProvider};
pub use search::{SearchError, SearchHit, SearchIndex};
pub use storage::{LocalStorage, StorageError, read_json, write_json};
