#![no_main]

use std::collections::HashSet;

use libfuzzer_sys::fuzz_target;
use mentorline_sla::{merge_delivery_addresses, resolve_delivery_addresses};
use mentorline_types::PartyProfile;

fuzz_target!(|data: &[u8]| {
    let Ok(profile) = serde_json::from_slice::<PartyProfile>(data) else {
        return;
    };
    let addresses = resolve_delivery_addresses(&profile);

    let mut seen = HashSet::new();
    for address in &addresses {
        assert!(!address.is_empty());
        assert_eq!(address, address.trim());
        assert!(seen.insert(address.as_str()));
    }

    let merged = merge_delivery_addresses([addresses.clone(), addresses.clone()]);
    assert_eq!(merged, addresses);
});
