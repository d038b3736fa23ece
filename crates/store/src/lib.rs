pub mod error;
pub mod memory;
pub mod postgres;
pub mod records;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use records::{
    Adjusted, BookingIntent, Canteen, Contract, ContractTerms, CounterDelta, Feedback,
    FeedbackTarget, Hostel, HostelCounters, PaymentReference, RatingSummary, Room, Subscription,
    adjust_count,
};
pub use store::{Store, StoreExt, StoreTx, constraints};
