//
// Copyright 2020 Signal Messenger, LLC.
// SPDX-License-Identifier: AGPL-3.0-only
//

use crate::state::{PreKeyId, SignedPreKeyId};
use crate::{IdentityKey, PublicKey};

/// What a device publishes so that peers can open sessions with it while it is offline.
///
/// `signed_pre_key` is optional here so that a bundle without one reaches the session builder
/// and is refused there.
#[derive(Clone, Debug)]
pub struct PreKeyBundle {
    pub registration_id: u32,
    pub device_id: u32,
    pub pre_key: Option<(PreKeyId, PublicKey)>,
    pub signed_pre_key_id: SignedPreKeyId,
    pub signed_pre_key: Option<PublicKey>,
    /// Made by `identity_key` over the serialized signed prekey.
    pub signed_pre_key_signature: Vec<u8>,
    pub identity_key: IdentityKey,
}
