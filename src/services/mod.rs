pub mod availability;
pub mod booking;
pub mod calendar;
pub mod lifecycle;
pub mod pricing;
pub mod reservation;
