//! The persisted record: identity, opaque payload, concurrency token,
//! expiration and lock fields.
//!
//! A [`Record`] is a plain value. None of its methods perform I/O; changes
//! become durable only through [`Engine::create`](crate::Engine::create) or
//! [`Engine::upsert`](crate::Engine::upsert).
//!
//! Lock and expiration fields are ordinary attributes. They are persisted and
//! versioned by the concurrency token exactly like the payload, so a lock is
//! acquired by a conditional write and released either by another conditional
//! write or by simply running out of time.
//!
//! Every time-dependent method has an `_at(now_ms)` twin that takes the clock
//! reading explicitly; the plain form reads [`now_utc_ms`].

use crate::{
    clock::{NEVER, after_seconds, now_utc_ms},
    error::{StorageError, StorageResult},
};

/// A record in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    id: String,
    concurrency_token: String,
    data: String,
    expires_at_utc_ms: i64,
    last_modified_utc_ms: i64,
    lock_owner_id: String,
    lock_owner_type: String,
    lock_expires_at_utc_ms: i64,
}

/// All logical fields of a [`Record`], for adapters that rebuild records
/// from their physical encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordParts {
    /// Caller-assigned id.
    pub id: String,
    /// Backend-assigned version marker; empty before the first write.
    pub concurrency_token: String,
    /// Opaque payload.
    pub data: String,
    /// Absolute expiration, or [`NEVER`].
    pub expires_at_utc_ms: i64,
    /// Time of the last write.
    pub last_modified_utc_ms: i64,
    /// Current lock owner id; empty when unlocked.
    pub lock_owner_id: String,
    /// Current lock owner type; empty when unlocked or untyped.
    pub lock_owner_type: String,
    /// Absolute lock expiration; the lock is held while this is in the future.
    pub lock_expires_at_utc_ms: i64,
}

impl Record {
    /// Creates an unattached record with an empty payload that never expires.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_data(id, String::new())
    }

    /// Creates an unattached record carrying `data`.
    #[must_use]
    pub fn with_data(id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            concurrency_token: String::new(),
            data: data.into(),
            expires_at_utc_ms: NEVER,
            last_modified_utc_ms: 0,
            lock_owner_id: String::new(),
            lock_owner_type: String::new(),
            lock_expires_at_utc_ms: 0,
        }
    }

    /// Rebuilds a record from its logical fields.
    #[must_use]
    pub fn from_parts(parts: RecordParts) -> Self {
        Self {
            id: parts.id,
            concurrency_token: parts.concurrency_token,
            data: parts.data,
            expires_at_utc_ms: parts.expires_at_utc_ms,
            last_modified_utc_ms: parts.last_modified_utc_ms,
            lock_owner_id: parts.lock_owner_id,
            lock_owner_type: parts.lock_owner_type,
            lock_expires_at_utc_ms: parts.lock_expires_at_utc_ms,
        }
    }

    /// Splits the record into its logical fields.
    #[must_use]
    pub fn into_parts(self) -> RecordParts {
        RecordParts {
            id: self.id,
            concurrency_token: self.concurrency_token,
            data: self.data,
            expires_at_utc_ms: self.expires_at_utc_ms,
            last_modified_utc_ms: self.last_modified_utc_ms,
            lock_owner_id: self.lock_owner_id,
            lock_owner_type: self.lock_owner_type,
            lock_expires_at_utc_ms: self.lock_expires_at_utc_ms,
        }
    }

    /// Returns the record id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the concurrency token (empty before the first write).
    #[must_use]
    pub fn concurrency_token(&self) -> &str {
        &self.concurrency_token
    }

    /// Returns the opaque payload.
    #[must_use]
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Replaces the in-memory concurrency token.
    pub fn set_concurrency_token(&mut self, token: impl Into<String>) {
        self.concurrency_token = token.into();
    }

    /// Replaces the in-memory payload.
    pub fn set_data(&mut self, data: impl Into<String>) {
        self.data = data.into();
    }

    /// Returns the absolute expiration, or [`NEVER`].
    #[must_use]
    pub fn expires_at_utc_ms(&self) -> i64 {
        self.expires_at_utc_ms
    }

    /// Returns the time of the last write.
    #[must_use]
    pub fn last_modified_utc_ms(&self) -> i64 {
        self.last_modified_utc_ms
    }

    /// Returns the current lock owner id (may be stale if the lock expired).
    #[must_use]
    pub fn lock_owner_id(&self) -> &str {
        &self.lock_owner_id
    }

    /// Returns the current lock owner type.
    #[must_use]
    pub fn lock_owner_type(&self) -> &str {
        &self.lock_owner_type
    }

    /// Returns the absolute lock expiration.
    #[must_use]
    pub fn lock_expires_at_utc_ms(&self) -> i64 {
        self.lock_expires_at_utc_ms
    }

    /// Makes the record expire `seconds` from now.
    pub fn expires_in_seconds(&mut self, seconds: u64) {
        self.expires_in_seconds_at(seconds, now_utc_ms());
    }

    /// Makes the record expire `seconds` after `now_ms`.
    pub fn expires_in_seconds_at(&mut self, seconds: u64, now_ms: i64) {
        self.expires_at_utc_ms = after_seconds(now_ms, seconds);
    }

    /// Sets an absolute expiration; [`NEVER`] disables it.
    pub fn set_expires_at_utc_ms(&mut self, expires_at_utc_ms: i64) {
        self.expires_at_utc_ms = expires_at_utc_ms;
    }

    /// Clears any expiration.
    pub fn never_expires(&mut self) {
        self.expires_at_utc_ms = NEVER;
    }

    /// Returns `true` once the expiration has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_utc_ms())
    }

    /// Returns `true` if the record is expired at `now_ms`.
    #[must_use]
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.expires_at_utc_ms != NEVER && self.expires_at_utc_ms <= now_ms
    }

    /// Stamps the last-modified time. Called by the engine before every write.
    pub(crate) fn touch(&mut self) {
        self.touch_at(now_utc_ms());
    }

    pub(crate) fn touch_at(&mut self, now_ms: i64) {
        self.last_modified_utc_ms = now_ms;
    }

    /// Assigns the lock to the caller for `duration_seconds`.
    ///
    /// Prior ownership is not checked; the engine does that before calling.
    pub fn lock(&mut self, owner_id: &str, owner_type: &str, duration_seconds: u64) {
        self.lock_at(owner_id, owner_type, duration_seconds, now_utc_ms());
    }

    /// [`lock`](Self::lock) against an explicit clock reading.
    pub fn lock_at(&mut self, owner_id: &str, owner_type: &str, duration_seconds: u64, now_ms: i64) {
        self.lock_owner_id = owner_id.to_owned();
        self.lock_owner_type = owner_type.to_owned();
        self.lock_expires_at_utc_ms = after_seconds(now_ms, duration_seconds);
    }

    /// Returns `true` if the caller may release the lock: it has expired, or
    /// the caller is the current owner.
    #[must_use]
    pub fn can_unlock(&self, owner_id: &str, owner_type: &str) -> bool {
        self.can_unlock_at(owner_id, owner_type, now_utc_ms())
    }

    /// [`can_unlock`](Self::can_unlock) against an explicit clock reading.
    #[must_use]
    pub fn can_unlock_at(&self, owner_id: &str, owner_type: &str, now_ms: i64) -> bool {
        !self.is_locked_at(now_ms) || self.is_owned_by(owner_id, owner_type)
    }

    /// Releases the lock.
    ///
    /// A no-op when the lock already expired.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::LockedByAnotherOwner`] if the lock is still held
    /// by someone else.
    pub fn unlock(&mut self, owner_id: &str, owner_type: &str) -> StorageResult<()> {
        self.unlock_at(owner_id, owner_type, now_utc_ms())
    }

    /// [`unlock`](Self::unlock) against an explicit clock reading.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::LockedByAnotherOwner`] if the lock is still held
    /// by someone else at `now_ms`.
    pub fn unlock_at(&mut self, owner_id: &str, owner_type: &str, now_ms: i64) -> StorageResult<()> {
        if !self.is_locked_at(now_ms) {
            return Ok(());
        }

        if !self.can_unlock_at(owner_id, owner_type, now_ms) {
            return Err(StorageError::LockedByAnotherOwner {
                id: self.id.clone(),
                owner_id: self.lock_owner_id.clone(),
                owner_type: self.lock_owner_type.clone(),
            });
        }

        self.lock_owner_id.clear();
        self.lock_owner_type.clear();
        self.lock_expires_at_utc_ms = 0;
        Ok(())
    }

    /// Returns `true` while the lock expiration is in the future.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.is_locked_at(now_utc_ms())
    }

    /// [`is_locked`](Self::is_locked) against an explicit clock reading.
    #[must_use]
    pub fn is_locked_at(&self, now_ms: i64) -> bool {
        self.lock_expires_at_utc_ms > now_ms
    }

    /// Returns `true` if the caller currently holds the lock.
    #[must_use]
    pub fn is_locked_by(&self, owner_id: &str, owner_type: &str) -> bool {
        self.is_locked_by_at(owner_id, owner_type, now_utc_ms())
    }

    /// [`is_locked_by`](Self::is_locked_by) against an explicit clock reading.
    #[must_use]
    pub fn is_locked_by_at(&self, owner_id: &str, owner_type: &str, now_ms: i64) -> bool {
        self.is_locked_at(now_ms) && self.is_owned_by(owner_id, owner_type)
    }

    /// Returns `true` if someone other than the caller currently holds the lock.
    #[must_use]
    pub fn is_locked_by_others(&self, owner_id: &str, owner_type: &str) -> bool {
        self.is_locked_by_others_at(owner_id, owner_type, now_utc_ms())
    }

    /// [`is_locked_by_others`](Self::is_locked_by_others) against an explicit
    /// clock reading.
    #[must_use]
    pub fn is_locked_by_others_at(&self, owner_id: &str, owner_type: &str, now_ms: i64) -> bool {
        self.is_locked_at(now_ms) && !self.is_owned_by(owner_id, owner_type)
    }

    fn is_owned_by(&self, owner_id: &str, owner_type: &str) -> bool {
        self.lock_owner_id == owner_id && self.lock_owner_type == owner_type
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use rstest::rstest;

    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    #[test]
    fn new_record_is_unlocked_and_never_expires() {
        let record = Record::new("p-1");
        assert_eq!(record.id(), "p-1");
        assert_eq!(record.concurrency_token(), "");
        assert_eq!(record.data(), "");
        assert_eq!(record.expires_at_utc_ms(), NEVER);
        assert!(!record.is_expired_at(NOW));
        assert!(!record.is_locked_at(NOW));
    }

    #[test]
    fn setters_only_touch_memory() {
        let mut record = Record::with_data("p-1", "{}");
        record.set_data(r#"{"n":1}"#);
        record.set_concurrency_token("etag-1");
        assert_eq!(record.data(), r#"{"n":1}"#);
        assert_eq!(record.concurrency_token(), "etag-1");
    }

    #[rstest]
    #[case::never(NEVER, false)]
    #[case::past(NOW - 1, true)]
    #[case::exactly_now(NOW, true)]
    #[case::future(NOW + 1, false)]
    fn expiration_boundary(#[case] expires_at: i64, #[case] expired: bool) {
        let mut record = Record::new("r");
        record.set_expires_at_utc_ms(expires_at);
        assert_eq!(record.is_expired_at(NOW), expired);
    }

    #[test]
    fn expires_in_seconds_is_relative_to_now() {
        let mut record = Record::new("r");
        record.expires_in_seconds_at(30, NOW);
        assert_eq!(record.expires_at_utc_ms(), NOW + 30_000);
        record.never_expires();
        assert_eq!(record.expires_at_utc_ms(), NEVER);
    }

    #[test]
    fn touch_stamps_last_modified() {
        let mut record = Record::new("r");
        record.touch_at(NOW);
        assert_eq!(record.last_modified_utc_ms(), NOW);
    }

    #[test]
    fn lock_sets_owner_and_deadline() {
        let mut record = Record::new("r");
        record.lock_at("nodeA", "partition", 100, NOW);
        assert_eq!(record.lock_owner_id(), "nodeA");
        assert_eq!(record.lock_owner_type(), "partition");
        assert_eq!(record.lock_expires_at_utc_ms(), NOW + 100_000);
        assert!(record.is_locked_at(NOW));
        assert!(record.is_locked_by_at("nodeA", "partition", NOW));
        assert!(!record.is_locked_by_others_at("nodeA", "partition", NOW));
        assert!(record.is_locked_by_others_at("nodeB", "partition", NOW));
    }

    #[test]
    fn owner_type_is_part_of_identity() {
        let mut record = Record::new("r");
        record.lock_at("nodeA", "partition", 10, NOW);
        assert!(record.is_locked_by_others_at("nodeA", "", NOW));
        assert!(record.is_locked_by_others_at("nodeA", "node", NOW));
    }

    #[test]
    fn lock_is_released_when_deadline_passes() {
        let mut record = Record::new("r");
        record.lock_at("nodeA", "partition", 1, NOW);
        assert!(record.is_locked_at(NOW + 999));
        assert!(!record.is_locked_at(NOW + 1_000));
        assert!(!record.is_locked_by_others_at("nodeB", "partition", NOW + 1_000));
    }

    #[test]
    fn can_unlock_owner_or_expired() {
        let mut record = Record::new("r");
        record.lock_at("nodeA", "partition", 5, NOW);
        assert!(record.can_unlock_at("nodeA", "partition", NOW));
        assert!(!record.can_unlock_at("nodeB", "partition", NOW));
        assert!(record.can_unlock_at("nodeB", "partition", NOW + 5_000));
    }

    #[test]
    fn unlock_by_owner_clears_fields() {
        let mut record = Record::new("r");
        record.lock_at("nodeA", "partition", 5, NOW);
        record.unlock_at("nodeA", "partition", NOW).unwrap();
        assert!(!record.is_locked_at(NOW));
        assert_eq!(record.lock_owner_id(), "");
        assert_eq!(record.lock_owner_type(), "");
    }

    #[test]
    fn unlock_by_other_owner_fails_and_keeps_lock() {
        let mut record = Record::new("r");
        record.lock_at("nodeA", "partition", 5, NOW);
        let err = record.unlock_at("nodeB", "partition", NOW).unwrap_err();
        assert!(matches!(
            err,
            StorageError::LockedByAnotherOwner { ref owner_id, .. } if owner_id == "nodeA"
        ));
        assert!(record.is_locked_by_at("nodeA", "partition", NOW));
    }

    #[test]
    fn unlock_of_expired_lock_is_noop() {
        let mut record = Record::new("r");
        record.lock_at("nodeA", "partition", 1, NOW);
        record.unlock_at("nodeB", "partition", NOW + 2_000).unwrap();
        // Expired lock fields are left as they were.
        assert_eq!(record.lock_owner_id(), "nodeA");
    }

    #[test]
    fn parts_roundtrip() {
        let mut record = Record::with_data("r", "payload");
        record.set_concurrency_token("t1");
        record.lock_at("o", "t", 3, NOW);
        record.expires_in_seconds_at(9, NOW);
        record.touch_at(NOW);
        let rebuilt = Record::from_parts(record.clone().into_parts());
        assert_eq!(rebuilt, record);
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn exactly_one_of_locked_by_and_by_others(
                owner in "[a-c]",
                caller in "[a-c]",
                duration in 0u64..10,
                offset in 0i64..20_000,
            ) {
                let mut record = Record::new("r");
                record.lock_at(&owner, "t", duration, NOW);
                let now = NOW + offset;
                let mine = record.is_locked_by_at(&caller, "t", now);
                let theirs = record.is_locked_by_others_at(&caller, "t", now);
                prop_assert!(!(mine && theirs));
                prop_assert_eq!(mine || theirs, record.is_locked_at(now));
            }

            #[test]
            fn can_unlock_agrees_with_unlock(
                owner in "[a-c]",
                caller in "[a-c]",
                duration in 0u64..10,
                offset in 0i64..20_000,
            ) {
                let mut record = Record::new("r");
                record.lock_at(&owner, "t", duration, NOW);
                let now = NOW + offset;
                let allowed = record.can_unlock_at(&caller, "t", now);
                prop_assert_eq!(record.unlock_at(&caller, "t", now).is_ok(), allowed);
            }
        }
    }
}
