//! Naming helpers shared by plugins and resource collaborators.

mod names;

pub use names::{generate_random_name, name_matches_owner, NAME_PREFIX};
