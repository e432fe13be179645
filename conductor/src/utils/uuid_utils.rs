//! UUID generation helpers.

use uuid::Uuid;

/// Generates a new random UUID string.
#[must_use]
pub fn generate_uuid() -> String {
    Uuid::new_v4().to_string()
}
