use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::store::{BucketStore, StoreError};

const SCHEDULE_KEY_PREFIX: &str = "schedule-";

/// One pending reminder. Identity is the composite id; `processed`
/// flips once the notification has fired and never flips back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub id: String,
    pub participant_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub schedule_time: OffsetDateTime,
    pub trigger_label: String,
    pub processed: bool,
}

pub fn entry_id(participant_id: i64, schedule_time: OffsetDateTime) -> String {
    format!("{participant_id}-{}", schedule_time.unix_timestamp())
}

/// Durable store of reminder entries, one key per id in the
/// notifications bucket. `put` is an upsert.
#[derive(Debug, Clone)]
pub struct ScheduleStore<S> {
    store: S,
    bucket: String,
}

impl<S: BucketStore> ScheduleStore<S> {
    pub fn new(store: S, bucket: String) -> Self {
        Self { store, bucket }
    }

    fn key(id: &str) -> String {
        format!("{SCHEDULE_KEY_PREFIX}{id}")
    }

    pub fn put(&self, entry: &ScheduleEntry) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(entry).map_err(|_| StoreError::InvalidKey)?;
        self.store.put(&self.bucket, &Self::key(&entry.id), &bytes)
    }

    pub fn get(&self, id: &str) -> Result<Option<ScheduleEntry>, StoreError> {
        let Some(bytes) = self.store.get(&self.bucket, &Self::key(id))? else {
            return Ok(None);
        };
        Ok(serde_json::from_slice(&bytes).ok())
    }

    pub fn get_all(&self) -> Result<Vec<ScheduleEntry>, StoreError> {
        let mut entries = Vec::new();
        for key in self.store.keys(&self.bucket)? {
            if !key.starts_with(SCHEDULE_KEY_PREFIX) {
                continue;
            }
            if let Some(bytes) = self.store.get(&self.bucket, &key)?
                && let Ok(entry) = serde_json::from_slice::<ScheduleEntry>(&bytes)
            {
                entries.push(entry);
            }
        }
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }

    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.store.delete(&self.bucket, &Self::key(id))
    }

    /// Removes every entry owned by one of the given participants and
    /// returns the removed entries.
    pub fn delete_where(&self, participant_ids: &[i64]) -> Result<Vec<ScheduleEntry>, StoreError> {
        let mut removed = Vec::new();
        for entry in self.get_all()? {
            if participant_ids.contains(&entry.participant_id) {
                self.delete(&entry.id)?;
                removed.push(entry);
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
#[allow(non_snake_case)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::testutil::datetime;

    fn entry(participant_id: i64, at: &str) -> ScheduleEntry {
        let schedule_time = datetime(at);
        ScheduleEntry {
            id: entry_id(participant_id, schedule_time),
            participant_id,
            schedule_time,
            trigger_label: "07:30".to_string(),
            processed: false,
        }
    }

    fn store() -> ScheduleStore<MemoryStore> {
        ScheduleStore::new(MemoryStore::default(), "walking-bus-notifications-v1".to_string())
    }

    #[test]
    fn entry_id__should_derive_from_participant_and_trigger_time() {
        let at = datetime("2024-05-01T06:30:00Z");
        assert_eq!(entry_id(7, at), format!("7-{}", at.unix_timestamp()));
    }

    #[test]
    fn put__should_upsert_by_id() {
        // Given
        let schedules = store();
        let mut first = entry(7, "2024-05-01T06:30:00Z");
        schedules.put(&first).expect("put");

        // When the same id is written again with new fields
        first.trigger_label = "07:45".to_string();
        schedules.put(&first).expect("re-put");

        // Then
        let all = schedules.get_all().expect("get all");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].trigger_label, "07:45");
    }

    #[test]
    fn delete_where__should_remove_exactly_the_named_participants() {
        // Given entries for participants A and B
        let schedules = store();
        let a_first = entry(1, "2024-05-01T06:30:00Z");
        let a_second = entry(1, "2024-05-02T06:30:00Z");
        let b = entry(2, "2024-05-01T06:30:00Z");
        schedules.put(&a_first).expect("put");
        schedules.put(&a_second).expect("put");
        schedules.put(&b).expect("put");

        // When cleanup runs for A only
        let removed = schedules.delete_where(&[1]).expect("delete where");

        // Then
        assert_eq!(removed.len(), 2);
        let remaining = schedules.get_all().expect("get all");
        assert_eq!(remaining, vec![b]);
    }

    #[test]
    fn get_all__should_ignore_non_schedule_keys_in_the_bucket() {
        // Given a subscription record sharing the bucket
        let backing = MemoryStore::default();
        backing
            .put("walking-bus-notifications-v1", "subscription", b"{}")
            .expect("put");
        let schedules =
            ScheduleStore::new(backing, "walking-bus-notifications-v1".to_string());
        schedules.put(&entry(7, "2024-05-01T06:30:00Z")).expect("put");

        // Then
        assert_eq!(schedules.get_all().expect("get all").len(), 1);
    }
}
