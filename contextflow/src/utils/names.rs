//! Resource names that encode the run that created them.
//!
//! Names look like `ctx_<first 8 chars of owner id>_<8 random chars>`, so a
//! leaf collaborator can list every resource of a run by name alone.

use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use std::sync::LazyLock;

/// Prefix of every generated name.
pub const NAME_PREFIX: &str = "ctx";

const OWNER_CHARS: usize = 8;
const RANDOM_CHARS: usize = 8;

static NAME_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^{NAME_PREFIX}_([A-Za-z0-9-]{{1,{OWNER_CHARS}}})_[A-Za-z0-9]{{{RANDOM_CHARS}}}$"
    ))
    .ok()
});

fn owner_fragment(owner_id: &str) -> String {
    owner_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .take(OWNER_CHARS)
        .collect()
}

/// Generates a fresh resource name for a run.
#[must_use]
pub fn generate_random_name(owner_id: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RANDOM_CHARS)
        .map(char::from)
        .collect();
    format!("{NAME_PREFIX}_{}_{suffix}", owner_fragment(owner_id))
}

/// Returns true if `name` was generated for `owner_id`.
#[must_use]
pub fn name_matches_owner(name: &str, owner_id: &str) -> bool {
    let Some(pattern) = NAME_PATTERN.as_ref() else {
        return false;
    };
    pattern
        .captures(name)
        .and_then(|captures| captures.get(1))
        .is_some_and(|fragment| fragment.as_str() == owner_fragment(owner_id))
}
