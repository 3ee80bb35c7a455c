//
// Copyright 2020-2022 Signal Messenger, LLC.
// SPDX-License-Identifier: AGPL-3.0-only
//

mod support;

use assert_matches::assert_matches;
use axolotl_protocol::consts::limits::{MAX_FORWARD_JUMPS, MAX_MESSAGE_KEYS};
use axolotl_protocol::*;
use proptest::prelude::*;
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use support::*;

/// Two devices, each with its own stores.
struct Conversation {
    alice: InMemSignalProtocolStore,
    bob: InMemSignalProtocolStore,
    alice_address: ProtocolAddress,
    bob_address: ProtocolAddress,
}

impl Conversation {
    fn new() -> Self {
        init_logger();
        Self {
            alice: new_store(),
            bob: new_store(),
            alice_address: address("+14151111111"),
            bob_address: address("+14151111112"),
        }
    }

    /// Both sides already hold matching sessions, as if a handshake had completed.
    fn established() -> Result<Self, SignalProtocolError> {
        let mut conversation = Self::new();
        let (alice_record, bob_record) = paired_records()?;
        conversation.install(alice_record, bob_record)?;
        Ok(conversation)
    }

    fn install(&mut self, alice_record: SessionRecord, bob_record: SessionRecord) -> TestResult {
        self.alice.store_session(&self.bob_address, &alice_record)?;
        self.bob.store_session(&self.alice_address, &bob_record)
    }

    /// Bob publishes a bundle and Alice starts a session from it.
    fn alice_starts(
        &mut self,
        pre_key_id: Option<PreKeyId>,
        signed_pre_key_id: SignedPreKeyId,
    ) -> Result<PreKeyBundle, SignalProtocolError> {
        let bundle = publish_bundle(&mut self.bob, pre_key_id, signed_pre_key_id, &mut OsRng)?;
        self.alice_accepts(&bundle)?;
        Ok(bundle)
    }

    fn alice_accepts(&mut self, bundle: &PreKeyBundle) -> TestResult {
        builder_for(&mut self.alice, &self.bob_address).process_pre_key_bundle(bundle, &mut OsRng)
    }

    fn alice_sends(&mut self, text: &str) -> Result<CiphertextMessage, SignalProtocolError> {
        encrypt(&mut self.alice, &self.bob_address, text)
    }

    fn bob_sends(&mut self, text: &str) -> Result<CiphertextMessage, SignalProtocolError> {
        encrypt(&mut self.bob, &self.alice_address, text)
    }

    fn bob_reads(&mut self, message: &CiphertextMessage) -> Result<String, SignalProtocolError> {
        decrypt(&mut self.bob, &self.alice_address, message).map(utf8)
    }

    fn alice_reads(&mut self, message: &CiphertextMessage) -> Result<String, SignalProtocolError> {
        decrypt(&mut self.alice, &self.bob_address, message).map(utf8)
    }

    fn bob_record(&self) -> SessionRecord {
        self.bob
            .load_session(&self.alice_address)
            .expect("in-memory store")
            .expect("bob has a session")
    }

    fn alice_record(&self) -> SessionRecord {
        self.alice
            .load_session(&self.bob_address)
            .expect("in-memory store")
            .expect("alice has a session")
    }
}

fn utf8(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).expect("utf-8")
}

fn pre_key_message(message: &CiphertextMessage) -> &PreKeySignalMessage {
    match message {
        CiphertextMessage::PreKeySignalMessage(m) => m,
        other => panic!("expected a prekey message, got {:?}", other.message_type()),
    }
}

fn signal_message(message: &CiphertextMessage) -> &SignalMessage {
    match message {
        CiphertextMessage::SignalMessage(m) => m,
        other => panic!("expected a ratchet message, got {:?}", other.message_type()),
    }
}

#[test]
fn prekey_handshake_then_ratchet() -> TestResult {
    let mut c = Conversation::new();
    c.alice_starts(Some(5), 22)?;
    assert_eq!(
        cipher_for(&mut c.alice, &c.bob_address).session_version()?,
        u32::from(CIPHERTEXT_MESSAGE_CURRENT_VERSION)
    );

    let hello = c.alice_sends("hello")?;
    assert_eq!(hello.message_type(), CiphertextMessageType::PreKey);
    let reparsed = CiphertextMessage::deserialize(CiphertextMessageType::PreKey, hello.serialize())?;
    let announced = pre_key_message(&reparsed);
    assert_eq!(announced.pre_key_id(), Some(5));
    assert_eq!(announced.signed_pre_key_id(), 22);
    assert_eq!(announced.registration_id(), c.alice.get_local_registration_id()?);

    assert!(c.bob.contains_pre_key(5)?);
    assert_eq!(c.bob_reads(&reparsed)?, "hello");
    assert!(!c.bob.contains_pre_key(5)?);
    assert!(c.bob.contains_signed_pre_key(22)?);
    assert_eq!(
        cipher_for(&mut c.bob, &c.alice_address).remote_registration_id()?,
        c.alice.get_local_registration_id()?
    );
    assert_eq!(
        c.bob.get_identity(&c.alice_address)?,
        Some(*c.alice.get_identity_key_pair()?.identity_key())
    );

    let reply = c.bob_sends("hi yourself")?;
    assert_eq!(reply.message_type(), CiphertextMessageType::Whisper);
    assert_eq!(c.alice_reads(&reply)?, "hi yourself");

    // The reply acknowledged the handshake.
    let later = c.alice_sends("later")?;
    assert_eq!(later.message_type(), CiphertextMessageType::Whisper);
    assert_eq!(c.bob_reads(&later)?, "later");
    Ok(())
}

#[test]
fn bundle_without_one_time_pre_key() -> TestResult {
    let mut c = Conversation::new();
    let bundle = c.alice_starts(None, 7)?;
    assert_eq!(bundle.pre_key, None);

    let message = c.alice_sends("no one-time key")?;
    assert_eq!(pre_key_message(&message).pre_key_id(), None);
    assert_eq!(c.bob_reads(&message)?, "no one-time key");
    Ok(())
}

#[test]
fn every_signature_bit_matters() -> TestResult {
    let mut c = Conversation::new();
    let good = random_bundle(&mut c.bob, &mut OsRng)?;

    for bit in 0..good.signed_pre_key_signature.len() * 8 {
        let mut bad = good.clone();
        bad.signed_pre_key_signature[bit / 8] ^= 1 << (bit % 8);
        assert_matches!(c.alice_accepts(&bad), Err(SignalProtocolError::InvalidSignature));
    }
    assert!(!c.alice.contains_session(&c.bob_address)?);

    c.alice_accepts(&good)
}

#[test]
fn bundle_without_signed_pre_key() -> TestResult {
    let mut c = Conversation::new();
    let mut bundle = random_bundle(&mut c.bob, &mut OsRng)?;
    bundle.signed_pre_key = None;

    assert_matches!(c.alice_accepts(&bundle), Err(SignalProtocolError::NoSignedPreKey));
    assert!(!c.alice.contains_session(&c.bob_address)?);
    Ok(())
}

#[test]
fn changed_identity_is_refused() -> TestResult {
    let mut c = Conversation::new();
    c.alice_starts(Some(1), 1)?;

    // Bob reinstalls with a new identity.
    let mut reinstalled = new_store();
    let new_bundle = random_bundle(&mut reinstalled, &mut OsRng)?;
    assert_matches!(
        c.alice_accepts(&new_bundle),
        Err(SignalProtocolError::UntrustedIdentity(peer)) if peer == c.bob_address
    );

    // Once the new identity is accepted, the old session can no longer send.
    c.alice.identities.reset();
    c.alice.save_identity(&c.bob_address, &new_bundle.identity_key)?;
    assert_matches!(
        c.alice_sends("still you?"),
        Err(SignalProtocolError::UntrustedIdentity(_))
    );
    Ok(())
}

#[test]
fn later_prekey_messages_reuse_the_session() -> TestResult {
    let mut c = Conversation::new();
    c.alice_starts(Some(3), 4)?;

    let first = c.alice_sends("first")?;
    let second = c.alice_sends("second")?;
    assert_eq!(second.message_type(), CiphertextMessageType::PreKey);

    assert_eq!(c.bob_reads(&first)?, "first");
    // The one-time prekey is gone by now, but the base key is known.
    assert_eq!(c.bob_reads(&second)?, "second");
    assert_eq!(c.bob_record().archived_states().len(), 0);
    Ok(())
}

#[test]
fn processing_twice_installs_once() -> TestResult {
    let mut c = Conversation::new();
    c.alice_starts(Some(31337), 1)?;
    let sent = c.alice_sends("once")?;
    let message = pre_key_message(&sent);

    let mut record = SessionRecord::new_fresh();
    let mut builder = builder_for(&mut c.bob, &c.alice_address);
    assert_eq!(builder.process(&mut record, message)?, Some(31337));
    assert!(!record.is_fresh());
    assert_eq!(builder.process(&mut record, message)?, None);
    assert_eq!(record.archived_states().len(), 0);

    // Only a successful decrypt consumes the prekey.
    assert!(c.bob.contains_pre_key(31337)?);
    Ok(())
}

#[test]
fn consumed_pre_key_cannot_start_another_session() -> TestResult {
    let mut c = Conversation::new();
    let bundle = c.alice_starts(Some(5), 6)?;
    let first = c.alice_sends("first")?;
    assert_eq!(c.bob_reads(&first)?, "first");

    // A fresh base key, but the same one-time prekey.
    c.alice_accepts(&bundle)?;
    let second = c.alice_sends("second")?;
    assert_eq!(pre_key_message(&second).pre_key_id(), Some(5));

    let before = c.bob_record().serialize();
    assert_matches!(c.bob_reads(&second), Err(SignalProtocolError::InvalidPreKeyId));
    assert_eq!(c.bob_record().serialize(), before);
    Ok(())
}

#[test]
fn removed_signed_pre_key() -> TestResult {
    let mut c = Conversation::new();
    c.alice_starts(Some(1), 2)?;
    let message = c.alice_sends("rotated away")?;

    c.bob.remove_signed_pre_key(2)?;
    assert_matches!(
        c.bob_reads(&message),
        Err(SignalProtocolError::InvalidSignedPreKeyId)
    );
    assert!(c.bob.contains_pre_key(1)?);
    Ok(())
}

#[test]
fn pre_key_message_keys_decrypt_again() -> TestResult {
    let mut c = Conversation::new();
    c.alice_starts(Some(8), 9)?;
    let sent = c.alice_sends("worth keeping")?;
    let message = pre_key_message(&sent);

    let mut bob_cipher = cipher_for(&mut c.bob, &c.alice_address);
    let (plaintext, keys) = bob_cipher.decrypt_pre_key_message_and_get_keys(message, &mut OsRng)?;
    assert_eq!(plaintext, b"worth keeping");
    assert_eq!(keys.counter(), message.message().counter());

    assert_matches!(
        bob_cipher.decrypt_pre_key_message(message, &mut OsRng),
        Err(SignalProtocolError::DuplicatedMessage(1, 0))
    );
    assert_eq!(bob_cipher.decrypt_with_keys(message.message(), &keys)?, b"worth keeping");

    assert!(!c.bob.contains_pre_key(8)?);
    Ok(())
}

#[test]
fn tampered_pre_key_message_leaves_no_trace() -> TestResult {
    let mut c = Conversation::new();
    c.alice_starts(Some(12), 13)?;
    let sent = c.alice_sends("untouched")?;
    let original = pre_key_message(&sent);

    let mut inner = original.message().serialized().to_vec();
    let at = inner.len() - 12;
    inner[at] ^= 0x01;
    let tampered = CiphertextMessage::PreKeySignalMessage(PreKeySignalMessage::new(
        original.message_version(),
        original.registration_id(),
        original.pre_key_id(),
        original.signed_pre_key_id(),
        *original.base_key(),
        *original.identity_key(),
        SignalMessage::try_from(&inner[..])?,
    )?);

    assert_matches!(c.bob_reads(&tampered), Err(SignalProtocolError::BadMac));
    assert!(c.bob.contains_pre_key(12)?);
    assert!(c.bob.load_session(&c.alice_address)?.is_none());

    assert_eq!(c.bob_reads(&sent)?, "untouched");
    assert!(!c.bob.contains_pre_key(12)?);
    assert_matches!(
        c.bob_reads(&sent),
        Err(SignalProtocolError::DuplicatedMessage(1, 0))
    );
    Ok(())
}

#[test]
fn no_session_to_use() -> TestResult {
    let mut c = Conversation::established()?;
    let mut carol = new_store();

    assert_matches!(
        encrypt(&mut carol, &c.bob_address, "hello?"),
        Err(SignalProtocolError::SessionNotFound(peer)) if peer == c.bob_address
    );

    let for_bob = c.alice_sends("not for carol")?;
    assert_matches!(
        decrypt(&mut carol, &c.alice_address, &for_bob),
        Err(SignalProtocolError::SessionNotFound(_))
    );

    carol.store_session(&c.bob_address, &SessionRecord::new_fresh())?;
    assert_matches!(
        encrypt(&mut carol, &c.bob_address, "hello?"),
        Err(SignalProtocolError::SessionNotFound(_))
    );
    Ok(())
}

#[test]
fn long_conversation() -> TestResult {
    let mut c = Conversation::established()?;

    let opener = c.alice_sends("It's rabbit season")?;
    assert_eq!(opener.message_type(), CiphertextMessageType::Whisper);
    assert_eq!(c.bob_reads(&opener)?, "It's rabbit season");
    let answer = c.bob_sends("It's duck season")?;
    assert_eq!(c.alice_reads(&answer)?, "It's duck season");

    for i in 0..10 {
        let text = format!("A->B {i}");
        let message = c.alice_sends(&text)?;
        assert_eq!(c.bob_reads(&message)?, text);
    }
    for i in 0..10 {
        let text = format!("B->A {i}");
        let message = c.bob_sends(&text)?;
        assert_eq!(c.alice_reads(&message)?, text);
    }

    let held_back = (0..10)
        .map(|i| {
            let text = format!("A->B delayed {i}");
            c.alice_sends(&text).map(|message| (text, message))
        })
        .collect::<Result<Vec<_>, _>>()?;

    for i in 0..10 {
        let text = format!("A->B after the delayed ones {i}");
        let message = c.alice_sends(&text)?;
        assert_eq!(c.bob_reads(&message)?, text);
    }
    for i in 0..10 {
        let text = format!("B->A after the delayed ones {i}");
        let message = c.bob_sends(&text)?;
        assert_eq!(c.alice_reads(&message)?, text);
    }

    for (text, message) in &held_back {
        assert_eq!(&c.bob_reads(message)?, text);
    }
    Ok(())
}

#[test]
fn out_of_order_delivery() -> TestResult {
    let mut c = Conversation::established()?;
    let sent = (1..=5)
        .map(|i| c.alice_sends(&format!("m{i}")))
        .collect::<Result<Vec<_>, _>>()?;

    for index in [2, 0, 4, 1, 3] {
        assert_eq!(c.bob_reads(&sent[index])?, format!("m{}", index + 1));
    }
    Ok(())
}

#[test]
fn replay_is_a_duplicate() -> TestResult {
    let mut c = Conversation::established()?;
    let message = c.alice_sends("only once")?;
    c.bob_reads(&message)?;
    assert_matches!(
        c.bob_reads(&message),
        Err(SignalProtocolError::DuplicatedMessage(1, 0))
    );
    Ok(())
}

#[test]
fn forward_jump_limit() -> TestResult {
    let mut c = Conversation::established()?;
    let sent = (0..=MAX_FORWARD_JUMPS + 1)
        .map(|i| c.alice_sends(&format!("message {i}")))
        .collect::<Result<Vec<_>, _>>()?;

    assert_matches!(
        c.bob_reads(&sent[MAX_FORWARD_JUMPS + 1]),
        Err(SignalProtocolError::TooManyMessages(jump)) if jump as usize == MAX_FORWARD_JUMPS + 1
    );
    // Exactly the limit is fine, and the refusal above changed nothing.
    assert_eq!(
        c.bob_reads(&sent[MAX_FORWARD_JUMPS])?,
        format!("message {MAX_FORWARD_JUMPS}")
    );
    Ok(())
}

#[test]
fn skipped_key_cache_forgets_the_oldest() -> TestResult {
    let mut c = Conversation::established()?;
    let total = MAX_MESSAGE_KEYS + 300;
    let sent = (0..total)
        .map(|i| c.alice_sends(&format!("message {i}")))
        .collect::<Result<Vec<_>, _>>()?;

    assert_eq!(c.bob_reads(&sent[1000])?, "message 1000");
    assert_eq!(c.bob_reads(&sent[total - 1])?, format!("message {}", total - 1));

    assert_matches!(
        c.bob_reads(&sent[5]),
        Err(SignalProtocolError::DuplicatedMessage(chain, 5)) if chain as usize == total
    );
    assert_eq!(c.bob_reads(&sent[500])?, "message 500");
    Ok(())
}

#[test]
fn flipped_mac_bit() -> TestResult {
    let mut c = Conversation::established()?;
    let message = c.alice_sends("authentic")?;

    let mut bytes = message.serialize().to_vec();
    *bytes.last_mut().expect("non-empty") ^= 0x01;
    let tampered = CiphertextMessage::deserialize(CiphertextMessageType::Whisper, &bytes)?;

    assert_matches!(c.bob_reads(&tampered), Err(SignalProtocolError::BadMac));
    assert_eq!(c.bob_reads(&message)?, "authentic");
    Ok(())
}

#[test]
fn saved_keys_decrypt_again() -> TestResult {
    let mut c = Conversation::established()?;
    let sent = c.alice_sends("keep the keys")?;
    let other = c.alice_sends("different")?;

    let mut bob_cipher = cipher_for(&mut c.bob, &c.alice_address);
    let (plaintext, keys) = bob_cipher.decrypt_and_get_keys(signal_message(&sent), &mut OsRng)?;
    assert_eq!(plaintext, b"keep the keys");
    assert_eq!(keys.counter(), signal_message(&sent).counter());

    assert_matches!(
        bob_cipher.decrypt_signal_message(signal_message(&sent), &mut OsRng),
        Err(SignalProtocolError::DuplicatedMessage(..))
    );
    assert_eq!(
        bob_cipher.decrypt_with_keys(signal_message(&sent), &keys)?,
        b"keep the keys"
    );
    assert_matches!(
        bob_cipher.decrypt_with_keys(signal_message(&other), &keys),
        Err(SignalProtocolError::BadMac)
    );
    Ok(())
}

#[test]
fn archived_session_comes_back() -> TestResult {
    let mut c = Conversation::new();
    c.alice_starts(Some(1), 1)?;
    let hello = c.alice_sends("hello")?;
    c.bob_reads(&hello)?;
    let reply = c.bob_sends("reply")?;
    c.alice_reads(&reply)?;

    // Alice starts over while Bob keeps using the first session.
    c.alice_starts(Some(2), 2)?;
    assert_eq!(c.alice_record().archived_states().len(), 1);

    let late = c.bob_sends("from the old session")?;
    assert_eq!(c.alice_reads(&late)?, "from the old session");
    assert_eq!(c.alice_record().archived_states().len(), 1);

    let next = c.alice_sends("back on the old session")?;
    assert_eq!(next.message_type(), CiphertextMessageType::Whisper);
    assert_eq!(c.bob_reads(&next)?, "back on the old session");
    Ok(())
}

#[test]
fn stored_records_keep_working_after_reload() -> TestResult {
    let (alice_record, bob_record) = paired_records()?;
    let alice_record = SessionRecord::deserialize(&alice_record.serialize())?;
    let bob_record = SessionRecord::deserialize(&bob_record.serialize())?;
    assert_eq!(alice_record.session_version(), Some(3));

    let mut c = Conversation::new();
    c.install(alice_record, bob_record)?;

    let opener = c.alice_sends("This is Alice's message")?;
    assert_eq!(c.bob_reads(&opener)?, "This is Alice's message");
    let answer = c.bob_sends("This is Bob's reply")?;
    assert_eq!(c.alice_reads(&answer)?, "This is Bob's reply");

    let mut from_alice = (0..50)
        .map(|i| {
            let text = format!("смерть за смерть {i}");
            c.alice_sends(&text).map(|message| (text, message))
        })
        .collect::<Result<Vec<_>, _>>()?;
    from_alice.shuffle(&mut OsRng);
    for (text, message) in &from_alice[..25] {
        assert_eq!(&c.bob_reads(message)?, text);
    }

    let mut from_bob = (0..50)
        .map(|i| {
            let text = format!("Relax in the safety of your own delusions. {i}");
            c.bob_sends(&text).map(|message| (text, message))
        })
        .collect::<Result<Vec<_>, _>>()?;
    from_bob.shuffle(&mut OsRng);
    for (text, message) in &from_bob[..25] {
        assert_eq!(&c.alice_reads(message)?, text);
    }

    for (text, message) in &from_alice[25..] {
        assert_eq!(&c.bob_reads(message)?, text);
    }
    for (text, message) in &from_bob[25..] {
        assert_eq!(&c.alice_reads(message)?, text);
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn any_plaintext_survives(plaintext in proptest::collection::vec(any::<u8>(), 0..1024)) {
        let mut c = Conversation::established().expect("sessions");
        let message = cipher_for(&mut c.alice, &c.bob_address)
            .encrypt(&plaintext)
            .expect("encrypt");
        let decrypted = decrypt(&mut c.bob, &c.alice_address, &message).expect("decrypt");
        prop_assert_eq!(decrypted, plaintext);
    }
}
