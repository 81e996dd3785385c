//! Owner/tenant iteration helpers.

use super::User;
use std::collections::HashSet;

/// Yields one representative `(user, tenant_id)` pair per distinct tenant.
///
/// The first user of each tenant, in list order, represents it.
#[must_use]
pub fn iterate_per_tenant(users: &[User]) -> Vec<(&User, &str)> {
    let mut seen = HashSet::new();
    let mut pairs = Vec::new();
    for user in users {
        if seen.insert(user.tenant_id.as_str()) {
            pairs.push((user, user.tenant_id.as_str()));
        }
    }
    pairs
}
