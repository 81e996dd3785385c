//! Reserved order ranges.
//!
//! Orders are plain integers declared at registration. To keep unrelated
//! plugins from colliding, each subsystem owns a range:
//!
//! | Range     | Subsystem                                   |
//! |-----------|---------------------------------------------|
//! | 0-199     | identity: users, tenants, credentials       |
//! | 200-399   | quotas, roles, networking                   |
//! | 400-699   | service-specific inputs (images, data sets) |
//! | 700-899   | workloads built on top of service inputs    |
//! | 900-999   | verification contexts                       |
//!
//! Ties inside a range are broken by plugin name.

use std::ops::RangeInclusive;

/// Identity plugins.
pub const IDENTITY: RangeInclusive<i32> = 0..=199;
/// Quotas, roles and networking.
pub const PLATFORM: RangeInclusive<i32> = 200..=399;
/// Service-specific inputs.
pub const SERVICE_INPUTS: RangeInclusive<i32> = 400..=699;
/// Workloads built on service inputs.
pub const WORKLOADS: RangeInclusive<i32> = 700..=899;
/// Verification contexts.
pub const VERIFICATION: RangeInclusive<i32> = 900..=999;

const RANGES: [(&str, RangeInclusive<i32>); 5] = [
    ("identity", IDENTITY),
    ("platform", PLATFORM),
    ("service_inputs", SERVICE_INPUTS),
    ("workloads", WORKLOADS),
    ("verification", VERIFICATION),
];

/// Returns the name of the reserved range an order falls into.
#[must_use]
pub fn reserved_range(order: i32) -> Option<&'static str> {
    RANGES
        .iter()
        .find(|(_, range)| range.contains(&order))
        .map(|(name, _)| *name)
}
