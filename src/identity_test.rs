use super::*;

fn attendee(id: i64, name: &str, surname: &str) -> Attendee {
    Attendee { id, name: name.into(), surname: surname.into(), deleted: false }
}

#[test]
fn rolling_hash_known_values() {
    assert_eq!(rolling_hash(""), 0);
    assert_eq!(rolling_hash("a"), 97);
    assert_eq!(rolling_hash("ab"), 97 * 31 + 98);
}

#[test]
fn rolling_hash_wraps_instead_of_overflowing() {
    let long = "z".repeat(64);
    // Must not panic in debug builds.
    let _ = rolling_hash(&long);
}

#[test]
fn hash_is_deterministic() {
    let john = attendee(1, "John", "Doe");
    assert_eq!(hash(&john), hash(&john));
    assert_eq!(hash(&john), hash_parts("John", "Doe", 1));
}

#[test]
fn hash_differs_by_each_identity_part() {
    let base = hash(&attendee(1, "John", "Doe"));
    assert_ne!(base, hash(&attendee(2, "John", "Doe")));
    assert_ne!(base, hash(&attendee(1, "Jane", "Doe")));
    assert_ne!(base, hash(&attendee(1, "John", "Roe")));
}

#[test]
fn hash_ignores_deleted_flag() {
    let mut john = attendee(1, "John", "Doe");
    let before = hash(&john);
    john.deleted = true;
    assert_eq!(before, hash(&john));
}

#[test]
fn hash_handles_non_ascii_names() {
    let a = hash(&attendee(7, "Zoë", "Müller"));
    let b = hash(&attendee(7, "Zoe", "Muller"));
    assert_ne!(a, b);
}
