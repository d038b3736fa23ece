//! Contract Lifecycle Manager.
//!
//! ```text
//! initiate_booking ──► provider order ──► confirm_booking
//!                                             │
//!                                             ▼
//!                                     PendingSignatures ──approve──► Active
//!                                             │                        │
//!                                       reject│cancel          reject/cancel
//!                                             ▼                        ▼
//!                                   Rejected / Terminated          Terminated
//! ```

mod service;
pub mod terms;

pub use service::{BookingOrder, ConfirmBooking, ContractService, DEFAULT_CLAIM_TTL_SECS};
