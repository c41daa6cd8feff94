//! Reservation ledger and enforcement decision engine.
//!
//! The core of the GPU time-sharing system: per-GPU hourly booking
//! calendars with credit accounting, and the pure function that turns a
//! calendar plus an occupancy snapshot into the kill-list a remote
//! agent must apply. Persistence goes through the minimal [`KvStore`]
//! contract; HTTP and telemetry live in the `slotd` and `slot-agent`
//! crates.

pub mod enforcement;
pub mod error;
pub mod hours;
pub mod keyed_lock;
pub mod reservation;
pub mod store;

pub use enforcement::compute_kill_list;
pub use enforcement::KillPolicy;
pub use error::LedgerError;
pub use error::LedgerResult;
pub use reservation::ReservationLedger;
pub use store::BookEvent;
pub use store::BookingEntry;
pub use store::KvStore;
pub use store::MemoryStore;
pub use store::ServerRecord;
pub use store::UserRecord;
