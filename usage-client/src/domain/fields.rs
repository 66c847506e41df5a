//! Field names the provider is known to emit.
//!
//! The field set of a record is open; these exist so callers do not have to
//! spell the provider's mixed-case names by hand.

pub const CONSUMPTION: &str = "consumption";
pub const PRODUCTION: &str = "production";
pub const CONSUMPTION_PEAK: &str = "consumptionPeak";
pub const CONSUMPTION_OFF_PEAK: &str = "consumptionOffPeak";
pub const PRODUCTION_PEAK: &str = "productionPeak";
pub const PRODUCTION_OFF_PEAK: &str = "productionOffPeak";
pub const SJV_ESTIMATED_CONSUMPTION: &str = "sjvEstimatedConsumption";
pub const SJV_ESTIMATED_CONSUMPTION_PEAK: &str = "sjvEstimatedConsumptionPeak";
pub const SJV_ESTIMATED_CONSUMPTION_OFF_PEAK: &str = "sjvEstimatedConsumptionOffPeak";
pub const OOB_ESTIMATED_CONSUMPTION: &str = "OOB_Estimated_Consumption";
pub const OOB_CONSUMPTION_DIFFERENCE: &str = "OOB_Consumption_Difference";
pub const OOB_CONSUMPTION_DIFFERENCE_PERCENTAGE: &str = "OOB_Consumption_Difference_Percentage";

pub const KNOWN: [&str; 12] = [
    CONSUMPTION,
    PRODUCTION,
    CONSUMPTION_PEAK,
    CONSUMPTION_OFF_PEAK,
    PRODUCTION_PEAK,
    PRODUCTION_OFF_PEAK,
    SJV_ESTIMATED_CONSUMPTION,
    SJV_ESTIMATED_CONSUMPTION_PEAK,
    SJV_ESTIMATED_CONSUMPTION_OFF_PEAK,
    OOB_ESTIMATED_CONSUMPTION,
    OOB_CONSUMPTION_DIFFERENCE,
    OOB_CONSUMPTION_DIFFERENCE_PERCENTAGE,
];

/// Whether `name` is one of the provider fields listed above.
pub fn is_known(name: &str) -> bool {
    KNOWN.contains(&name)
}
