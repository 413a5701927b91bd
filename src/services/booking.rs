use std::sync::Arc;

use chrono::{DateTime, NaiveDate, SubsecRound, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::errors::{BookingError, ConflictReason};
use crate::models::{
    Booking, BookingEvent, BookingOwner, BookingRequest, BookingStatus, PriceBreakdown,
    PricingBasis, Provider, TransitionRequest, Window,
};
use crate::repo::{AvailabilityRepo, BookingRepo, ProviderRepo};
use crate::services::availability::{AvailabilityResolver, FreeWindows};
use crate::services::lifecycle::BookingLifecycle;
use crate::services::pricing::compute_price;
use crate::services::reservation::ReservationGuard;

#[derive(Debug, Clone, Serialize)]
pub struct Quote {
    pub pricing: PricingBasis,
    pub breakdown: PriceBreakdown,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedBooking {
    pub booking_id: String,
    pub estimated_price: Decimal,
    pub breakdown: PriceBreakdown,
}

/// Entry point for the booking core: request validation, pricing, creation,
/// status transitions and availability reads.
pub struct BookingEngine {
    providers: Arc<dyn ProviderRepo>,
    bookings: Arc<dyn BookingRepo>,
    resolver: AvailabilityResolver,
    lifecycle: BookingLifecycle,
    events: broadcast::Sender<BookingEvent>,
}

impl BookingEngine {
    pub fn new(
        providers: Arc<dyn ProviderRepo>,
        availability: Arc<dyn AvailabilityRepo>,
        bookings: Arc<dyn BookingRepo>,
    ) -> Self {
        let resolver = AvailabilityResolver::new(availability, bookings.clone());
        let guard = Arc::new(ReservationGuard::new(resolver.clone(), bookings.clone()));
        let lifecycle = BookingLifecycle::new(bookings.clone(), guard);
        let (events, _) = broadcast::channel(256);

        Self {
            providers,
            bookings,
            resolver,
            lifecycle,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BookingEvent> {
        self.events.subscribe()
    }

    pub fn provider(&self, provider_id: &str) -> Result<Provider, BookingError> {
        self.providers
            .provider(provider_id)?
            .ok_or_else(|| BookingError::NotFound(format!("provider {provider_id}")))
    }

    /// Price a request without touching any state.
    pub fn quote(&self, req: &BookingRequest) -> Result<Quote, BookingError> {
        let window = request_window(req)?;
        let provider = self.provider(&req.provider_id)?;
        if !provider.is_active {
            return Err(BookingError::validation(format!(
                "provider {} is not active",
                provider.id
            )));
        }

        let pricing = self
            .providers
            .pricing_basis(&req.provider_id, &req.service_id)?
            .ok_or_else(|| {
                BookingError::validation(format!(
                    "provider {} does not offer service {}",
                    req.provider_id, req.service_id
                ))
            })?;
        let breakdown = compute_price(&pricing, window.duration(), req.quantity)?;

        Ok(Quote { pricing, breakdown })
    }

    /// Validate, price and record a booking in `pending`. The window is not
    /// held until the booking is confirmed.
    pub fn create_booking(&self, req: &BookingRequest) -> Result<CreatedBooking, BookingError> {
        if req.customer_id.trim().is_empty() {
            return Err(BookingError::validation("customer_id is required"));
        }
        let window = request_window(req)?;
        let Quote { pricing, breakdown } = self.quote(req)?;

        if !self.resolver.is_available(&req.provider_id, &window)? {
            return Err(BookingError::Conflict {
                window,
                reason: ConflictReason::Unavailable,
            });
        }
        if let Some(held) = self
            .bookings
            .reserved_overlapping(&req.provider_id, &window, None)?
            .first()
        {
            return Err(BookingError::Conflict {
                window,
                reason: ConflictReason::Reserved(held.window()),
            });
        }

        let now = Utc::now().trunc_subsecs(0);
        let booking = Booking {
            id: uuid::Uuid::new_v4().to_string(),
            customer_id: req.customer_id.clone(),
            provider_id: req.provider_id.clone(),
            service_id: req.service_id.clone(),
            start_datetime: window.start,
            end_datetime: window.end,
            status: BookingStatus::Pending,
            estimated_price: breakdown.selling_price,
            final_price: None,
            pricing,
            quantity: req.quantity,
            notes: req.notes.clone(),
            requested_at: now,
            confirmed_at: None,
            started_at: None,
            completed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            updated_at: now,
        };
        self.bookings.insert(&booking)?;

        tracing::info!(
            booking_id = %booking.id,
            provider_id = %booking.provider_id,
            estimated_price = %booking.estimated_price,
            "booking created"
        );
        self.publish(&booking);

        Ok(CreatedBooking {
            booking_id: booking.id,
            estimated_price: breakdown.selling_price,
            breakdown,
        })
    }

    pub fn transition(
        &self,
        booking_id: &str,
        req: &TransitionRequest,
    ) -> Result<Booking, BookingError> {
        let booking = self.lifecycle.transition(booking_id, req, Utc::now())?;
        self.publish(&booking);
        Ok(booking)
    }

    pub fn booking(&self, booking_id: &str) -> Result<Booking, BookingError> {
        self.bookings
            .get(booking_id)?
            .ok_or_else(|| BookingError::NotFound(format!("booking {booking_id}")))
    }

    pub fn list(
        &self,
        owner: BookingOwner<'_>,
        status: Option<BookingStatus>,
        limit: i64,
    ) -> Result<Vec<Booking>, BookingError> {
        Ok(self.bookings.list(owner, status, limit)?)
    }

    pub fn free_windows(
        &self,
        provider_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<FreeWindows, BookingError> {
        self.provider(provider_id)?;
        self.resolver.free_windows(provider_id, from, to)
    }

    fn publish(&self, booking: &Booking) {
        // No subscribers is fine
        let _ = self.events.send(BookingEvent::from(booking));
    }
}

fn request_window(req: &BookingRequest) -> Result<Window, BookingError> {
    if req.provider_id.trim().is_empty() || req.service_id.trim().is_empty() {
        return Err(BookingError::validation("provider_id and service_id are required"));
    }
    let start: DateTime<Utc> = req.start_datetime.trunc_subsecs(0);
    let end: DateTime<Utc> = req.end_datetime.trunc_subsecs(0);
    Window::new(start, end)
        .ok_or_else(|| BookingError::validation("start_datetime must be before end_datetime"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    use chrono::NaiveDateTime;

    use crate::db::{self, queries};
    use crate::models::{BlockedRange, GeneralAvailabilityRule, PriceUnit, Service, TimeSlot};
    use crate::repo::SqliteStore;
    use crate::services::pricing::PriceError;

    fn at(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap().and_utc()
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn setup() -> (Arc<SqliteStore>, BookingEngine) {
        let conn = db::init_db(":memory:").unwrap();
        queries::insert_provider(
            &conn,
            &Provider {
                id: "p1".to_string(),
                name: "Ana".to_string(),
                service_radius: None,
                is_active: true,
            },
        )
        .unwrap();
        queries::insert_provider(
            &conn,
            &Provider {
                id: "retired".to_string(),
                name: "Bo".to_string(),
                service_radius: None,
                is_active: false,
            },
        )
        .unwrap();
        queries::insert_service(
            &conn,
            &Service {
                id: "s1".to_string(),
                name: "Plumbing".to_string(),
                cost_price: dec("70"),
                price_unit: PriceUnit::PerHour,
                commission_percentage: dec("15"),
                vat_rate: dec("21"),
            },
        )
        .unwrap();
        queries::offer_service(&conn, "p1", "s1", None).unwrap();
        queries::offer_service(&conn, "retired", "s1", None).unwrap();
        for day in 1..=5 {
            for slot in [TimeSlot::Morning, TimeSlot::Afternoon] {
                queries::insert_rule(
                    &conn,
                    &GeneralAvailabilityRule {
                        provider_id: "p1".to_string(),
                        day_of_week: day,
                        slot,
                        is_active: true,
                    },
                )
                .unwrap();
            }
        }

        let store = Arc::new(SqliteStore::new(conn));
        let engine = BookingEngine::new(store.clone(), store.clone(), store.clone());
        (store, engine)
    }

    fn request(start: &str, end: &str) -> BookingRequest {
        BookingRequest {
            customer_id: "c1".to_string(),
            provider_id: "p1".to_string(),
            service_id: "s1".to_string(),
            start_datetime: at(start),
            end_datetime: at(end),
            quantity: None,
            notes: None,
        }
    }

    fn to(status: &str) -> TransitionRequest {
        TransitionRequest {
            to_status: status.to_string(),
            ..Default::default()
        }
    }

    fn cancel(reason: &str) -> TransitionRequest {
        TransitionRequest {
            to_status: "cancelled".to_string(),
            cancellation_reason: Some(reason.to_string()),
            ..Default::default()
        }
    }

    // 2025-06-16 is a Monday

    #[test]
    fn test_create_booking_prices_and_stays_pending() {
        let (_store, engine) = setup();
        let created = engine
            .create_booking(&request("2025-06-16 09:00", "2025-06-16 10:00"))
            .unwrap();

        assert_eq!(created.estimated_price, dec("97.41"));
        assert_eq!(created.breakdown.vat_amount, dec("16.91"));

        let booking = engine.booking(&created.booking_id).unwrap();
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.estimated_price, dec("97.41"));
        assert_eq!(booking.pricing.cost_price, dec("70"));
    }

    #[test]
    fn test_captured_basis_survives_rate_change() {
        let (store, engine) = setup();
        let created = engine
            .create_booking(&request("2025-06-16 09:00", "2025-06-16 10:00"))
            .unwrap();

        queries::offer_service(&*store.lock().unwrap(), "p1", "s1", Some(dec("100"))).unwrap();

        let booking = engine.booking(&created.booking_id).unwrap();
        assert_eq!(booking.pricing.cost_price, dec("70"));
        assert_eq!(booking.estimated_price, dec("97.41"));

        let fresh = engine.quote(&request("2025-06-16 09:00", "2025-06-16 10:00")).unwrap();
        assert_eq!(fresh.pricing.cost_price, dec("100"));
    }

    #[test]
    fn test_create_booking_validation() {
        let (_store, engine) = setup();

        let inverted = engine.create_booking(&request("2025-06-16 10:00", "2025-06-16 09:00"));
        assert!(matches!(inverted, Err(BookingError::Validation(_))));

        let mut inactive = request("2025-06-16 09:00", "2025-06-16 10:00");
        inactive.provider_id = "retired".to_string();
        assert!(matches!(engine.create_booking(&inactive), Err(BookingError::Validation(_))));

        let mut unknown = request("2025-06-16 09:00", "2025-06-16 10:00");
        unknown.provider_id = "ghost".to_string();
        assert!(matches!(engine.create_booking(&unknown), Err(BookingError::NotFound(_))));

        let mut no_service = request("2025-06-16 09:00", "2025-06-16 10:00");
        no_service.service_id = "s9".to_string();
        assert!(matches!(engine.create_booking(&no_service), Err(BookingError::Validation(_))));

        let mut no_customer = request("2025-06-16 09:00", "2025-06-16 10:00");
        no_customer.customer_id = " ".to_string();
        assert!(matches!(engine.create_booking(&no_customer), Err(BookingError::Validation(_))));
    }

    #[test]
    fn test_create_booking_outside_hours_conflicts() {
        let (store, engine) = setup();
        let sunday = engine.create_booking(&request("2025-06-15 09:00", "2025-06-15 10:00"));
        assert!(matches!(
            sunday,
            Err(BookingError::Conflict { reason: ConflictReason::Unavailable, .. })
        ));

        queries::insert_blocked_range(
            &*store.lock().unwrap(),
            &BlockedRange {
                provider_id: "p1".to_string(),
                start_date: at("2025-06-16 00:00").date_naive(),
                end_date: at("2025-06-16 00:00").date_naive(),
                recurrence: None,
            },
        )
        .unwrap();
        let blocked = engine.create_booking(&request("2025-06-16 09:00", "2025-06-16 10:00"));
        assert!(matches!(blocked, Err(BookingError::Conflict { .. })));
    }

    #[test]
    fn test_full_lifecycle_sets_timestamps() {
        let (_store, engine) = setup();
        let id = engine
            .create_booking(&request("2025-06-16 09:00", "2025-06-16 11:00"))
            .unwrap()
            .booking_id;

        let confirmed = engine.transition(&id, &to("confirmed")).unwrap();
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
        assert!(confirmed.confirmed_at.is_some());

        let started = engine.transition(&id, &to("in_progress")).unwrap();
        assert!(started.started_at.is_some());

        let completed = engine.transition(&id, &to("completed")).unwrap();
        assert_eq!(completed.status, BookingStatus::Completed);
        assert!(completed.completed_at.is_some());
        assert_eq!(completed.final_price, Some(completed.estimated_price));

        let err = engine.transition(&id, &cancel("too late")).unwrap_err();
        assert!(matches!(
            err,
            BookingError::InvalidTransition {
                from: BookingStatus::Completed,
                to: BookingStatus::Cancelled
            }
        ));
    }

    #[test]
    fn test_confirm_conflict_leaves_booking_pending() {
        let (_store, engine) = setup();
        let first = engine
            .create_booking(&request("2025-06-16 09:00", "2025-06-16 11:00"))
            .unwrap()
            .booking_id;
        let second = engine
            .create_booking(&request("2025-06-16 10:00", "2025-06-16 12:00"))
            .unwrap()
            .booking_id;

        engine.transition(&first, &to("confirmed")).unwrap();
        let err = engine.transition(&second, &to("confirmed")).unwrap_err();
        assert!(matches!(err, BookingError::Conflict { .. }));
        assert_eq!(engine.booking(&second).unwrap().status, BookingStatus::Pending);

        // a new pending booking on the held window is refused up front
        let third = engine.create_booking(&request("2025-06-16 10:30", "2025-06-16 11:30"));
        assert!(matches!(
            third,
            Err(BookingError::Conflict { reason: ConflictReason::Reserved(_), .. })
        ));
    }

    #[test]
    fn test_cancel_requires_reason_and_frees_window() {
        let (_store, engine) = setup();
        let first = engine
            .create_booking(&request("2025-06-16 09:00", "2025-06-16 10:00"))
            .unwrap()
            .booking_id;
        let second = engine
            .create_booking(&request("2025-06-16 09:00", "2025-06-16 10:00"))
            .unwrap()
            .booking_id;
        engine.transition(&first, &to("confirmed")).unwrap();

        let err = engine.transition(&first, &cancel("   ")).unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
        assert_eq!(engine.booking(&first).unwrap().status, BookingStatus::Confirmed);

        let cancelled = engine.transition(&first, &cancel("provider sick")).unwrap();
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some("provider sick"));
        assert!(cancelled.cancelled_at.is_some());

        let confirmed = engine.transition(&second, &to("confirmed")).unwrap();
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
    }

    #[test]
    fn test_reschedule_moves_window_and_reconfirms() {
        let (_store, engine) = setup();
        let id = engine
            .create_booking(&request("2025-06-16 09:00", "2025-06-16 10:00"))
            .unwrap()
            .booking_id;
        engine.transition(&id, &to("confirmed")).unwrap();

        let moved = engine
            .transition(
                &id,
                &TransitionRequest {
                    to_status: "rescheduled".to_string(),
                    start_datetime: Some(at("2025-06-17 14:00")),
                    end_datetime: Some(at("2025-06-17 15:00")),
                    notes: Some("customer asked for Tuesday".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(moved.status, BookingStatus::Rescheduled);
        assert_eq!(moved.start_datetime, at("2025-06-17 14:00"));

        // the old Monday slot is free again
        let other = engine
            .create_booking(&request("2025-06-16 09:00", "2025-06-16 10:00"))
            .unwrap()
            .booking_id;
        engine.transition(&other, &to("confirmed")).unwrap();

        let reconfirmed = engine.transition(&id, &to("confirmed")).unwrap();
        assert_eq!(reconfirmed.status, BookingStatus::Confirmed);
        assert_eq!(reconfirmed.notes.as_deref(), Some("customer asked for Tuesday"));
    }

    #[test]
    fn test_reschedule_reprices_for_new_duration() {
        let (_store, engine) = setup();
        let id = engine
            .create_booking(&request("2025-06-16 09:00", "2025-06-16 10:00"))
            .unwrap()
            .booking_id;
        engine.transition(&id, &to("confirmed")).unwrap();

        let moved = engine
            .transition(
                &id,
                &TransitionRequest {
                    to_status: "rescheduled".to_string(),
                    start_datetime: Some(at("2025-06-17 08:00")),
                    end_datetime: Some(at("2025-06-17 16:00")),
                    ..Default::default()
                },
            )
            .unwrap();
        let quoted = engine
            .quote(&request("2025-06-17 08:00", "2025-06-17 16:00"))
            .unwrap();
        assert_eq!(moved.estimated_price, dec("779.24"));
        assert_eq!(moved.estimated_price, quoted.breakdown.selling_price);

        for status in ["confirmed", "in_progress", "completed"] {
            engine.transition(&id, &to(status)).unwrap();
        }
        let done = engine.booking(&id).unwrap();
        assert_eq!(done.final_price, Some(dec("779.24")));
    }

    #[test]
    fn test_confirm_keeps_request_notes() {
        let (_store, engine) = setup();
        let id = engine
            .create_booking(&request("2025-06-16 09:00", "2025-06-16 10:00"))
            .unwrap()
            .booking_id;

        let confirmed = engine
            .transition(
                &id,
                &TransitionRequest {
                    to_status: "confirmed".to_string(),
                    notes: Some("call on arrival".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(confirmed.notes.as_deref(), Some("call on arrival"));
    }

    #[test]
    fn test_quote_overflow_is_a_price_error() {
        let (store, engine) = setup();
        queries::insert_service(
            &*store.lock().unwrap(),
            &Service {
                id: "haul".to_string(),
                name: "Haulage".to_string(),
                cost_price: dec("70"),
                price_unit: PriceUnit::PerKm,
                commission_percentage: dec("15"),
                vat_rate: dec("21"),
            },
        )
        .unwrap();
        queries::offer_service(&*store.lock().unwrap(), "p1", "haul", None).unwrap();

        let mut req = request("2025-06-16 09:00", "2025-06-16 10:00");
        req.service_id = "haul".to_string();
        req.quantity = Some(Decimal::MAX);
        assert!(matches!(
            engine.quote(&req),
            Err(BookingError::Price(PriceError::Overflow(_)))
        ));
    }

    #[test]
    fn test_unknown_status_and_booking() {
        let (_store, engine) = setup();
        let id = engine
            .create_booking(&request("2025-06-16 09:00", "2025-06-16 10:00"))
            .unwrap()
            .booking_id;

        assert!(matches!(
            engine.transition(&id, &to("archived")),
            Err(BookingError::Validation(_))
        ));
        assert!(matches!(
            engine.transition("missing", &to("confirmed")),
            Err(BookingError::NotFound(_))
        ));
        assert!(matches!(
            engine.transition(&id, &to("completed")),
            Err(BookingError::InvalidTransition {
                from: BookingStatus::Pending,
                to: BookingStatus::Completed
            })
        ));
    }

    #[test]
    fn test_events_published() {
        let (_store, engine) = setup();
        let mut rx = engine.subscribe();

        let id = engine
            .create_booking(&request("2025-06-16 09:00", "2025-06-16 10:00"))
            .unwrap()
            .booking_id;
        engine.transition(&id, &to("confirmed")).unwrap();

        let created = rx.try_recv().unwrap();
        assert_eq!(created.booking_id, id);
        assert_eq!(created.status, BookingStatus::Pending);
        let confirmed = rx.try_recv().unwrap();
        assert_eq!(confirmed.status, BookingStatus::Confirmed);
    }

    #[test]
    fn test_no_double_booking_under_parallel_confirms() {
        let (_store, engine) = setup();
        let engine = Arc::new(engine);

        // Twelve overlapping hour-long requests staggered by 20 minutes
        let ids: Vec<String> = (0..12)
            .map(|i| {
                let start = at("2025-06-16 08:00") + chrono::Duration::minutes(20 * i);
                let mut req = request("2025-06-16 08:00", "2025-06-16 09:00");
                req.start_datetime = start;
                req.end_datetime = start + chrono::Duration::hours(1);
                engine.create_booking(&req).unwrap().booking_id
            })
            .collect();

        let handles: Vec<_> = ids
            .into_iter()
            .map(|id| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    let _ = engine.transition(&id, &to("confirmed"));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let held: Vec<Booking> = engine
            .list(BookingOwner::Provider("p1"), Some(BookingStatus::Confirmed), 100)
            .unwrap();
        assert!(!held.is_empty());
        for (i, a) in held.iter().enumerate() {
            for b in held.iter().skip(i + 1) {
                let (wa, wb) = (a.window(), b.window());
                assert!(!wa.overlaps(&wb), "{wa} overlaps {wb}");
            }
        }
    }
}
