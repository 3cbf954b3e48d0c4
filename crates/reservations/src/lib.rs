//! Inventory reservation engine.
//!
//! Checkout places time-boxed holds on stock with
//! [`ReservationManager::reserve`]. A hold is either committed on payment
//! confirmation (the only operation that writes the stock ledger), cancelled
//! by checkout or an operator, or expired by the [`ReservationSweeper`].

pub mod error;
pub mod manager;
pub mod memory;
pub mod postgres;
pub mod reservation;
pub mod store;
pub mod sweeper;

pub use common::{OwnerRef, ReservationId, SubjectRef};
pub use error::{ReservationError, Result};
pub use manager::ReservationManager;
pub use memory::InMemoryReservationStore;
pub use postgres::PostgresReservationStore;
pub use reservation::{ReleaseReason, Reservation, ReservationStatus, StockLevel};
pub use store::ReservationStore;
pub use sweeper::ReservationSweeper;
