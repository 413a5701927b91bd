use chrono::Duration;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::models::{PriceBreakdown, PriceUnit, PricingBasis};

const SECONDS_PER_HOUR: i64 = 3_600;
const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PriceError {
    #[error("invalid price unit: {0}")]
    InvalidUnit(String),

    #[error("negative input: {0}")]
    NegativeInput(&'static str),

    #[error("{0} is too large to price")]
    Overflow(&'static str),
}

/// Round a monetary figure to cents, halves away from zero.
pub fn money(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded
}

/// Billable quantity for `unit` over `duration`. `quantity` is only consulted
/// for distance and item units, where it defaults to one.
pub fn quantity_for(
    unit: PriceUnit,
    duration: Duration,
    quantity: Option<Decimal>,
) -> Result<Decimal, PriceError> {
    let seconds = duration.num_seconds();
    if seconds < 0 {
        return Err(PriceError::NegativeInput("duration"));
    }
    let seconds = Decimal::from(seconds);
    if quantity.is_some_and(|q| q < Decimal::ZERO) {
        return Err(PriceError::NegativeInput("quantity"));
    }

    let qty = match unit {
        PriceUnit::PerHour => money(seconds / Decimal::from(SECONDS_PER_HOUR)),
        PriceUnit::PerDay => (seconds / Decimal::from(SECONDS_PER_DAY)).ceil(),
        PriceUnit::PerWeek => (seconds / Decimal::from(SECONDS_PER_DAY * 7)).ceil(),
        PriceUnit::PerMonth => (seconds / Decimal::from(SECONDS_PER_DAY * 30)).ceil(),
        PriceUnit::PerKm | PriceUnit::PerItem => quantity.unwrap_or(Decimal::ONE),
        PriceUnit::PerService => Decimal::ONE,
    };

    Ok(qty)
}

/// Turn a pricing basis and a booked duration into the customer-facing price.
///
/// Commission is charged on the provider's cost and VAT on the commissioned
/// net price. Each amount is rounded to cents before it feeds the next step,
/// so the breakdown always adds up exactly.
pub fn compute_price(
    basis: &PricingBasis,
    duration: Duration,
    quantity: Option<Decimal>,
) -> Result<PriceBreakdown, PriceError> {
    check_non_negative(basis.cost_price, "cost_price")?;
    check_non_negative(basis.commission_percentage, "commission_percentage")?;
    check_non_negative(basis.vat_rate, "vat_rate")?;

    let quantity = quantity_for(basis.price_unit, duration, quantity)?;

    let cost_total = money(
        basis
            .cost_price
            .checked_mul(quantity)
            .ok_or(PriceError::Overflow("cost_total"))?,
    );
    let commission_amount =
        percentage_of(cost_total, basis.commission_percentage, "commission_amount")?;
    let net_price = cost_total
        .checked_add(commission_amount)
        .ok_or(PriceError::Overflow("net_price"))?;
    let vat_amount = percentage_of(net_price, basis.vat_rate, "vat_amount")?;
    let selling_price = net_price
        .checked_add(vat_amount)
        .ok_or(PriceError::Overflow("selling_price"))?;
    let margin_percentage = if cost_total.is_zero() {
        Decimal::ZERO
    } else {
        money(
            (commission_amount / cost_total)
                .checked_mul(Decimal::ONE_HUNDRED)
                .ok_or(PriceError::Overflow("margin_percentage"))?,
        )
    };

    Ok(PriceBreakdown {
        quantity,
        cost_total,
        commission_amount,
        net_price,
        vat_amount,
        selling_price,
        margin_percentage,
    })
}

/// `rate` percent of `amount`, in cents.
fn percentage_of(
    amount: Decimal,
    rate: Decimal,
    field: &'static str,
) -> Result<Decimal, PriceError> {
    amount
        .checked_mul(rate)
        .and_then(|v| v.checked_div(Decimal::ONE_HUNDRED))
        .map(money)
        .ok_or(PriceError::Overflow(field))
}

fn check_non_negative(value: Decimal, field: &'static str) -> Result<(), PriceError> {
    if value < Decimal::ZERO {
        return Err(PriceError::NegativeInput(field));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn basis(cost: &str, unit: PriceUnit, commission: &str, vat: &str) -> PricingBasis {
        PricingBasis {
            cost_price: dec(cost),
            price_unit: unit,
            commission_percentage: dec(commission),
            vat_rate: dec(vat),
        }
    }

    #[test]
    fn test_hourly_price_with_commission_and_vat() {
        let b = basis("70", PriceUnit::PerHour, "15", "21");
        let price = compute_price(&b, Duration::hours(1), None).unwrap();

        assert_eq!(price.quantity, dec("1"));
        assert_eq!(price.cost_total, dec("70"));
        assert_eq!(price.commission_amount, dec("10.50"));
        assert_eq!(price.net_price, dec("80.50"));
        assert_eq!(price.vat_amount, dec("16.91"));
        assert_eq!(price.selling_price, dec("97.41"));
        assert_eq!(price.margin_percentage, dec("15"));
    }

    #[test]
    fn test_fractional_hours() {
        let b = basis("40", PriceUnit::PerHour, "0", "0");
        assert_eq!(
            quantity_for(PriceUnit::PerHour, Duration::minutes(90), None).unwrap(),
            dec("1.50")
        );
        assert_eq!(
            quantity_for(PriceUnit::PerHour, Duration::minutes(20), None).unwrap(),
            dec("0.33")
        );
        let price = compute_price(&b, Duration::minutes(90), None).unwrap();
        assert_eq!(price.selling_price, dec("60"));
    }

    #[test]
    fn test_day_week_month_round_up() {
        assert_eq!(quantity_for(PriceUnit::PerDay, Duration::hours(25), None).unwrap(), dec("2"));
        assert_eq!(quantity_for(PriceUnit::PerDay, Duration::hours(24), None).unwrap(), dec("1"));
        assert_eq!(quantity_for(PriceUnit::PerWeek, Duration::days(8), None).unwrap(), dec("2"));
        assert_eq!(quantity_for(PriceUnit::PerWeek, Duration::days(7), None).unwrap(), dec("1"));
        assert_eq!(quantity_for(PriceUnit::PerMonth, Duration::days(31), None).unwrap(), dec("2"));
        assert_eq!(quantity_for(PriceUnit::PerMonth, Duration::hours(2), None).unwrap(), dec("1"));
    }

    #[test]
    fn test_counted_units_use_caller_quantity() {
        assert_eq!(quantity_for(PriceUnit::PerKm, Duration::hours(3), None).unwrap(), dec("1"));
        assert_eq!(
            quantity_for(PriceUnit::PerKm, Duration::hours(3), Some(dec("12.5"))).unwrap(),
            dec("12.5")
        );
        assert_eq!(
            quantity_for(PriceUnit::PerItem, Duration::zero(), Some(dec("4"))).unwrap(),
            dec("4")
        );
    }

    #[test]
    fn test_per_service_ignores_duration() {
        let b = basis("120", PriceUnit::PerService, "10", "0");
        let short = compute_price(&b, Duration::minutes(15), None).unwrap();
        let long = compute_price(&b, Duration::days(3), Some(dec("9"))).unwrap();
        assert_eq!(short, long);
        assert_eq!(short.selling_price, dec("132"));
    }

    #[test]
    fn test_zero_cost_has_zero_margin() {
        let b = basis("0", PriceUnit::PerHour, "15", "21");
        let price = compute_price(&b, Duration::hours(2), None).unwrap();
        assert_eq!(price.selling_price, Decimal::ZERO);
        assert_eq!(price.margin_percentage, Decimal::ZERO);
    }

    #[test]
    fn test_negative_inputs_rejected() {
        let b = basis("-1", PriceUnit::PerHour, "15", "21");
        assert_eq!(
            compute_price(&b, Duration::hours(1), None).unwrap_err(),
            PriceError::NegativeInput("cost_price")
        );

        let b = basis("10", PriceUnit::PerHour, "-5", "21");
        assert_eq!(
            compute_price(&b, Duration::hours(1), None).unwrap_err(),
            PriceError::NegativeInput("commission_percentage")
        );

        let b = basis("10", PriceUnit::PerHour, "5", "-21");
        assert_eq!(
            compute_price(&b, Duration::hours(1), None).unwrap_err(),
            PriceError::NegativeInput("vat_rate")
        );

        let b = basis("10", PriceUnit::PerHour, "5", "21");
        assert_eq!(
            compute_price(&b, Duration::hours(-1), None).unwrap_err(),
            PriceError::NegativeInput("duration")
        );

        let b = basis("10", PriceUnit::PerKm, "5", "21");
        assert_eq!(
            compute_price(&b, Duration::hours(1), Some(dec("-3"))).unwrap_err(),
            PriceError::NegativeInput("quantity")
        );
    }

    #[test]
    fn test_huge_quantity_overflows_instead_of_panicking() {
        let b = basis("70", PriceUnit::PerKm, "15", "21");
        assert_eq!(
            compute_price(&b, Duration::hours(1), Some(Decimal::MAX)).unwrap_err(),
            PriceError::Overflow("cost_total")
        );

        // cost fits, but commission on top of it does not
        let b = basis("1", PriceUnit::PerItem, "200", "0");
        let qty = Decimal::MAX / Decimal::from(2);
        assert!(matches!(
            compute_price(&b, Duration::zero(), Some(qty)),
            Err(PriceError::Overflow(_))
        ));
    }

    #[test]
    fn test_price_monotonic_in_quantity() {
        let b = basis("33.33", PriceUnit::PerItem, "12.5", "21");
        let mut previous: Option<PriceBreakdown> = None;

        for n in 0..50 {
            let qty = Decimal::new(n * 25, 1);
            let price = compute_price(&b, Duration::zero(), Some(qty)).unwrap();

            assert!(price.selling_price >= price.net_price);
            assert!(price.net_price >= price.cost_total);
            if let Some(prev) = &previous {
                assert!(price.selling_price >= prev.selling_price);
            }
            previous = Some(price);
        }
    }
}
