pub mod admin;
pub mod availability;
pub mod bookings;
pub mod calendar;
pub mod health;
pub mod payments;
pub mod webhook;
