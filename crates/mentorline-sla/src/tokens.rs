use std::collections::HashSet;

use mentorline_types::{AddressField, PartyProfile};

/// Delivery addresses for a profile, in stored order.
///
/// The list field wins over the legacy single-address field, even when the
/// list is empty. A bare string stored in the list field counts as one
/// address. Blank entries are dropped and duplicates keep their first
/// position.
pub fn resolve_delivery_addresses(profile: &PartyProfile) -> Vec<String> {
    let raw: Vec<&str> = match &profile.fcm_tokens {
        Some(AddressField::Many(addresses)) => addresses.iter().map(String::as_str).collect(),
        Some(AddressField::One(address)) if !address.trim().is_empty() => vec![address.as_str()],
        Some(AddressField::One(_)) | None => profile.fcm_token.as_deref().into_iter().collect(),
    };

    let mut seen = HashSet::new();
    raw.into_iter()
        .map(str::trim)
        .filter(|address| !address.is_empty())
        .filter(|address| seen.insert(*address))
        .map(str::to_string)
        .collect()
}

/// Flattens several address lists, keeping the first occurrence of each.
pub fn merge_delivery_addresses<I>(lists: I) -> Vec<String>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut seen = HashSet::new();
    let mut merged = Vec::new();
    for address in lists.into_iter().flatten() {
        if seen.insert(address.clone()) {
            merged.push(address);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::{merge_delivery_addresses, resolve_delivery_addresses};
    use mentorline_types::{AddressField, PartyProfile};

    #[test]
    fn legacy_single_address_yields_one_element() {
        let profile = PartyProfile::new("t-1").with_legacy_address("tok-legacy");
        assert_eq!(resolve_delivery_addresses(&profile), vec!["tok-legacy"]);
    }

    #[test]
    fn list_field_takes_precedence_over_legacy_field() {
        let profile = PartyProfile::new("t-1")
            .with_legacy_address("tok-legacy")
            .with_addresses(["tok-a", "tok-b"]);
        assert_eq!(resolve_delivery_addresses(&profile), vec!["tok-a", "tok-b"]);

        let empty_list = PartyProfile::new("t-1")
            .with_legacy_address("tok-legacy")
            .with_addresses(Vec::<String>::new());
        assert!(resolve_delivery_addresses(&empty_list).is_empty());
    }

    #[test]
    fn profile_without_addresses_yields_empty_list() {
        assert!(resolve_delivery_addresses(&PartyProfile::new("t-1")).is_empty());
    }

    #[test]
    fn string_shaped_list_field_counts_as_one_address() {
        let mut profile = PartyProfile::new("t-1").with_legacy_address("tok-legacy");
        profile.fcm_tokens = Some(AddressField::One("tok-string".to_string()));
        assert_eq!(resolve_delivery_addresses(&profile), vec!["tok-string"]);

        profile.fcm_tokens = Some(AddressField::One("  ".to_string()));
        assert_eq!(resolve_delivery_addresses(&profile), vec!["tok-legacy"]);
    }

    #[test]
    fn blank_and_duplicate_addresses_are_removed() {
        let profile = PartyProfile::new("t-1").with_addresses(["tok-a", " ", "tok-b", "tok-a"]);
        assert_eq!(resolve_delivery_addresses(&profile), vec!["tok-a", "tok-b"]);
    }

    #[test]
    fn merge_keeps_first_occurrence() {
        let merged = merge_delivery_addresses(vec![
            vec!["a".to_string(), "b".to_string()],
            vec!["b".to_string(), "c".to_string()],
        ]);
        assert_eq!(merged, vec!["a", "b", "c"]);
    }
}
