//
// Copyright 2020-2021 Signal Messenger, LLC.
// SPDX-License-Identifier: AGPL-3.0-only
//

//! Protobuf schemas for the wire messages and the persisted records.
//!
//! These are maintained by hand with `prost` derives rather than generated at build time, so
//! field tags here are the source of truth for both formats.

pub mod storage;
pub mod wire;
