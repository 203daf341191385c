//! Channel name resolution.
//!
//! Unlocked channels are named after their creator.  Locked-name channels
//! share a fixed base and take the smallest free positive number within
//! their target category, so deleting "room-2" frees slot 2 for the next
//! creation.

use std::collections::BTreeSet;

const NAME_SUFFIX: &str = "・VC";

/// `"{member-name}・VC"`, the default for unlocked channels and for blank
/// locked-name templates.
pub fn default_name(member_name: &str) -> String {
    format!("{}{}", member_name, NAME_SUFFIX)
}

/// Base name for a locked-name channel.
pub fn locked_base(template: Option<&str>, member_name: &str) -> String {
    match template {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => default_name(member_name),
    }
}

/// Smallest positive number not in `used`.
pub fn allocate_number(used: &BTreeSet<u32>) -> u32 {
    let mut number = 1;
    while used.contains(&number) {
        number += 1;
    }
    number
}

pub fn numbered(base: &str, number: u32) -> String {
    format!("{}-{}", base, number)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_are_allocated_in_order() {
        let mut used = BTreeSet::new();
        for expected in 1..=3 {
            let n = allocate_number(&used);
            assert_eq!(n, expected);
            used.insert(n);
        }
    }

    #[test]
    fn deleted_slot_is_reused_before_the_counter_grows() {
        let mut used: BTreeSet<u32> = [1, 2, 3].into_iter().collect();
        used.remove(&2);
        assert_eq!(allocate_number(&used), 2);

        used.insert(2);
        assert_eq!(allocate_number(&used), 4);
    }

    #[test]
    fn blank_template_falls_back_to_the_member_name() {
        assert_eq!(locked_base(Some("room"), "alice"), "room");
        assert_eq!(locked_base(Some(""), "alice"), "alice・VC");
        assert_eq!(locked_base(None, "alice"), "alice・VC");
        assert_eq!(numbered(&locked_base(Some("room"), "alice"), 2), "room-2");
    }
}
