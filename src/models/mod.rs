pub mod availability;
pub mod booking;
pub mod catalog;
pub mod client;
pub mod payment;
pub mod slot;

pub use availability::WeeklyAvailability;
pub use booking::{Booking, BookingStatus, Customer};
pub use catalog::{Location, Service, StaffMember};
pub use client::Client;
pub use payment::{
    AttemptOutcome, BookingRequest, PaymentAttempt, PaymentPlan, PendingPayment,
    PendingPaymentStatus, ReconciliationItem,
};
pub use slot::{AvailabilitySlot, StaffSelection};
