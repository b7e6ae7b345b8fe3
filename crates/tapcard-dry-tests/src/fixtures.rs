// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Common targets, settings and engines.

use tapcard_core::codec::{ProvisioningTarget, UrlCodec};
use tapcard_core::config::EngineSettings;
use tapcard_core::ndef::{self, NdefMessage};
use tapcard_core::TagEngine;

use crate::tag::FakeTagPort;

/// Owner id used by [`target`].
pub const OWNER_ID: &str = "abc123";
/// Slot index used by [`target`].
pub const SLOT_INDEX: u32 = 2;

/// The `abc123` / slot 2 target.
#[allow(clippy::expect_used)]
pub fn target() -> ProvisioningTarget {
    ProvisioningTarget::new(OWNER_ID, SLOT_INDEX).expect("fixture owner id is not empty")
}

/// Default settings with every pause set to zero.
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        tech_switch_delay_ms: 0,
        retry_backoff_ms: 0,
        ..EngineSettings::default()
    }
}

/// Engine over `port` with [`fast_settings`].
#[allow(clippy::expect_used)]
pub fn build_engine(port: FakeTagPort) -> TagEngine<FakeTagPort> {
    TagEngine::new(port, &fast_settings()).expect("default url base is valid")
}

/// NDEF message carrying the card link for `target` under the default base.
#[allow(clippy::expect_used)]
pub fn card_link_message(target: &ProvisioningTarget) -> NdefMessage {
    let url = UrlCodec::default().encode(target);
    ndef::encode_uri(url.as_str()).expect("card link fits one record")
}

/// NDEF message carrying an arbitrary URI.
#[allow(clippy::expect_used)]
pub fn uri_message(uri: &str) -> NdefMessage {
    ndef::encode_uri(uri).expect("uri fits one record")
}
