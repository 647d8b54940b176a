//! Identity hasher: the payload encoded into an attendee's scannable code.
//!
//! The payload is a 32-bit rolling hash (`h = 31 * h + unit`, wrapping) over
//! the UTF-16 units of `name + surname + id`, rendered as a signed decimal.
//! It is stable across runs and platforms. Collisions are possible and are
//! an accepted risk; `store` keeps the first attendee registered for a
//! payload and logs the clash.

use crate::model::Attendee;

/// Hash an arbitrary string with the 31-multiplier rolling hash.
#[must_use]
pub fn rolling_hash(input: &str) -> i32 {
    input
        .encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

/// Stable opaque payload for an attendee.
#[must_use]
pub fn hash(attendee: &Attendee) -> String {
    hash_parts(&attendee.name, &attendee.surname, attendee.id)
}

/// Same as [`hash`] but from the identity triple directly.
#[must_use]
pub fn hash_parts(name: &str, surname: &str, id: i64) -> String {
    rolling_hash(&format!("{name}{surname}{id}")).to_string()
}

#[cfg(test)]
#[path = "identity_test.rs"]
mod tests;
