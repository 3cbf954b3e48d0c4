pub mod clock;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use types::{JobId, OwnerRef, ReservationId, SubjectRef};
