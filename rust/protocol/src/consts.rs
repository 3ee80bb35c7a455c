//
// Copyright 2020-2022 Signal Messenger, LLC.
// SPDX-License-Identifier: AGPL-3.0-only
//

#![warn(missing_docs)]

//! Protocol constants.

/// Caps on how far chains may be skipped and how much old state is retained.
pub mod limits {
    /// Largest counter gap a [crate::SignalMessage] may skip on its receiving chain.
    pub const MAX_FORWARD_JUMPS: usize = 5000;
    /// Largest iteration gap a [crate::SenderKeyMessage] may skip within one sender key state.
    pub const MAX_SENDER_KEY_FORWARD_JUMPS: usize = 2000;
    /// Skipped message keys cached per receiving chain and per sender key state.
    pub const MAX_MESSAGE_KEYS: usize = 2000;
    /// Receiving chains one session state holds.
    pub const MAX_RECEIVING_CHAINS: usize = 5;
    /// Archived states one [crate::SessionRecord] holds.
    pub const MAX_ARCHIVED_STATES: usize = 40;
    /// States one [crate::SenderKeyRecord] holds.
    pub const MAX_SENDER_KEY_STATES: usize = 5;
}

/// The largest 24-bit id. As a one-time prekey id it means "none".
pub const MEDIUM_MAX_VALUE: u32 = 0xFF_FFFF;
