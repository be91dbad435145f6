//! Thread-safe, fixed-capacity containers with first-in-first-out eviction.
//!
//! All four containers share the same eviction rule: when a new entry
//! would exceed capacity, the oldest entry goes. Re-inserting an existing
//! entry moves it to the newest position without evicting anything.
//!
//! Each container guards its state with one re-entrant lock held for the
//! whole of every operation, so callbacks such as a default factory may
//! call back into the container they were invoked from.

mod counted_set;
mod default_map;
mod expiring_map;
mod lock;
mod order;
mod unique_set;

pub use counted_set::CountedFifoSet;
pub use default_map::DefaultFifoMap;
pub use expiring_map::ExpiringFifoMap;
pub use unique_set::UniqueFifoSet;
