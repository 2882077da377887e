pub mod availability;
pub mod booking;
pub mod calendar;
pub mod events;
pub mod payment;
pub mod retry;
pub mod slots;
