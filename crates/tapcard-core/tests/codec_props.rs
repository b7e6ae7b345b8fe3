// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use proptest::prelude::*;
use tapcard_core::codec::{DecodeError, ProvisioningTarget, UrlCodec};
use tapcard_core::ndef;

proptest! {
    #[test]
    fn card_links_round_trip(owner in "\\PC{1,40}", slot in any::<u32>()) {
        let codec = UrlCodec::default();
        let target = ProvisioningTarget::new(owner, slot).unwrap();
        let url = codec.encode(&target);
        prop_assert_eq!(codec.decode(url.as_str()), Ok(target));
    }

    #[test]
    fn card_links_round_trip_through_ndef(owner in "[A-Za-z0-9_.~-]{1,24}", slot in any::<u32>()) {
        let codec = UrlCodec::default();
        let target = ProvisioningTarget::new(owner, slot).unwrap();
        let message = ndef::encode_uri(codec.encode(&target).as_str()).unwrap();
        let uri = ndef::decode_uri(message.as_bytes()).unwrap();
        prop_assert_eq!(codec.decode(&uri), Ok(target));
    }

    #[test]
    fn decode_never_panics(raw in "\\PC{0,80}") {
        // The goal is simply to ensure this does not panic.
        let _ = UrlCodec::default().decode(&raw);
    }

    #[test]
    fn strings_outside_the_template_are_malformed(suffix in "[a-z0-9/]{0,20}") {
        let codec = UrlCodec::default();
        let raw = format!("https://elsewhere.example/p/{suffix}");
        prop_assert!(matches!(codec.decode(&raw), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn ndef_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = ndef::decode_uri(&bytes);
    }
}
