use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::services::pricing::PriceError;

/// Billing granularity of a service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PriceUnit {
    PerHour,
    PerDay,
    PerWeek,
    PerMonth,
    PerKm,
    PerItem,
    PerService,
}

impl PriceUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceUnit::PerHour => "per_hour",
            PriceUnit::PerDay => "per_day",
            PriceUnit::PerWeek => "per_week",
            PriceUnit::PerMonth => "per_month",
            PriceUnit::PerKm => "per_km",
            PriceUnit::PerItem => "per_item",
            PriceUnit::PerService => "per_service",
        }
    }

    pub fn parse(s: &str) -> Result<Self, PriceError> {
        match s {
            "per_hour" => Ok(PriceUnit::PerHour),
            "per_day" => Ok(PriceUnit::PerDay),
            "per_week" => Ok(PriceUnit::PerWeek),
            "per_month" => Ok(PriceUnit::PerMonth),
            "per_km" => Ok(PriceUnit::PerKm),
            "per_item" => Ok(PriceUnit::PerItem),
            "per_service" => Ok(PriceUnit::PerService),
            other => Err(PriceError::InvalidUnit(other.to_string())),
        }
    }
}

/// Rates captured when a booking is quoted. Later changes to the provider's
/// prices never touch a basis that has already been stored on a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingBasis {
    pub cost_price: Decimal,
    pub price_unit: PriceUnit,
    pub commission_percentage: Decimal,
    pub vat_rate: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub quantity: Decimal,
    pub cost_total: Decimal,
    pub commission_amount: Decimal,
    pub net_price: Decimal,
    pub vat_amount: Decimal,
    pub selling_price: Decimal,
    pub margin_percentage: Decimal,
}
