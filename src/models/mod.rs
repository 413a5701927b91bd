pub mod availability;
pub mod booking;
pub mod pricing;
pub mod provider;

pub use availability::{
    AvailabilityOverride, BlockedRange, GeneralAvailabilityRule, OverrideKind, Recurrence,
    TimeSlot, Window,
};
pub use booking::{
    Booking, BookingEvent, BookingOwner, BookingRequest, BookingStatus, ClaimOutcome, StatusChange,
    TransitionRequest,
};
pub use pricing::{PriceBreakdown, PriceUnit, PricingBasis};
pub use provider::{Provider, Service};
