use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::PriceUnit;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub name: String,
    pub service_radius: Option<Decimal>,
    pub is_active: bool,
}

/// A priced offering from the catalogue, the default tier for every provider
/// that offers it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub cost_price: Decimal,
    pub price_unit: PriceUnit,
    pub commission_percentage: Decimal,
    pub vat_rate: Decimal,
}
