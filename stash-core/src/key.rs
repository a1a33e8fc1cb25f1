//! Cache key validation.
//!
//! Keys are opaque strings chosen by the caller, with a small reserved
//! character set kept free for future hierarchical/namespace syntax. The
//! rules are checked in order and the first violation wins. Being a `&str`
//! parameter, the "must be a string" rule of the contract is enforced by the
//! signature; the runtime checks cover emptiness and reserved characters.

use crate::error::InvalidArgument;

/// Characters that must not appear in a cache key.
///
/// Reserved for future hierarchical/namespace syntax.
pub const RESERVED_CHARACTERS: [char; 8] = ['{', '}', '(', ')', '/', '\\', '@', ':'];

/// Validate a cache key.
///
/// # Errors
///
/// - [`InvalidArgument::EmptyKey`] if the key is empty
/// - [`InvalidArgument::ReservedCharacter`] if the key contains any of
///   [`RESERVED_CHARACTERS`]
///
/// Callers must validate before any backend interaction for single-key
/// operations, and must validate a whole batch up front before processing
/// any of it for bulk operations.
pub fn validate_key(key: &str) -> Result<(), InvalidArgument> {
    if key.is_empty() {
        return Err(InvalidArgument::EmptyKey);
    }

    if let Some(found) = key.chars().find(|c| RESERVED_CHARACTERS.contains(c)) {
        return Err(InvalidArgument::ReservedCharacter {
            key: key.to_string(),
            found,
        });
    }

    Ok(())
}
