use crate::core::fingerprint::Fingerprint;
use crate::core::item::{ItemId, ItemIdError};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Malformed ledger line {line}: {message}")]
    MalformedLedger { line: usize, message: String },

    #[error("Invalid item path: {0}")]
    ItemId(#[from] ItemIdError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashRecord {
    pub id: ItemId,
    pub fingerprint: Fingerprint,
}

/// A hash record tagged with the order it was first written in.
#[derive(Debug, Clone, Copy)]
struct Entry {
    position: u64,
    record: HashRecord,
}

/// Processed-item ledger plus the per-scope reverse index derived from it.
///
/// `records` is the source of truth. Entries keep the order they were first
/// written in; the ledger is serialized in that order and `reverse` is rebuilt
/// by replaying it, so a reload picks the same first-seen items as the live
/// index did.
#[derive(Debug, Default)]
pub struct DuplicateIndex {
    records: HashMap<String, Entry>,
    reverse: HashMap<u64, HashMap<Fingerprint, ItemId>>,
    next_position: u64,
}

impl DuplicateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn scope_count(&self) -> usize {
        self.reverse.len()
    }

    pub fn contains_path(&self, path: &str) -> bool {
        self.records.contains_key(path)
    }

    pub fn record(&self, path: &str) -> Option<&HashRecord> {
        self.records.get(path).map(|entry| &entry.record)
    }

    pub fn lookup(&self, scope_id: u64, fingerprint: &Fingerprint) -> Option<ItemId> {
        self.reverse
            .get(&scope_id)
            .and_then(|by_fp| by_fp.get(fingerprint))
            .copied()
    }

    /// The only duplicate check that mutates the reverse index.
    ///
    /// Returns the first-seen item when `fingerprint` was already recorded in
    /// `scope_id` by a different item. Unseen fingerprints are inserted and
    /// re-recording the same item is a no-op; both return `None`.
    pub fn record_if_absent(
        &mut self,
        scope_id: u64,
        fingerprint: Fingerprint,
        id: ItemId,
    ) -> Option<ItemId> {
        let by_fp = self.reverse.entry(scope_id).or_default();
        match by_fp.get(&fingerprint) {
            Some(existing) if *existing != id => Some(*existing),
            Some(_) => None,
            None => {
                by_fp.insert(fingerprint, id);
                None
            }
        }
    }

    /// Run the duplicate check for a processed item and store its hash record.
    ///
    /// The record is written whether or not the item turned out to be a
    /// duplicate. Reprocessing a path with unchanged content is a no-op; with
    /// changed content the old record is dropped and the path is recorded
    /// again as the newest entry.
    pub fn observe(
        &mut self,
        path: &str,
        id: ItemId,
        fingerprint: Fingerprint,
    ) -> Option<ItemId> {
        let record = HashRecord { id, fingerprint };
        if let Some(previous) = self.records.get(path) {
            if previous.record == record {
                return self.record_if_absent(id.scope_id, fingerprint, id);
            }
            self.records.remove(path);
            self.rebuild_reverse();
        }

        let duplicate_of = self.record_if_absent(id.scope_id, fingerprint, id);
        self.insert_record(path, record);
        duplicate_of
    }

    fn insert_record(&mut self, path: &str, record: HashRecord) {
        match self.records.get_mut(path) {
            Some(entry) => entry.record = record,
            None => {
                let position = self.next_position;
                self.next_position += 1;
                self.records
                    .insert(path.to_string(), Entry { position, record });
            }
        }
    }

    /// Drop every record belonging to `id` and rebuild the reverse index.
    pub fn remove(&mut self, id: ItemId) -> usize {
        self.remove_where(|record| record.id == id)
    }

    /// Drop every record carried by `sequence_id` in any scope.
    pub fn remove_sequence(&mut self, sequence_id: u64) -> usize {
        self.remove_where(|record| record.id.sequence_id == sequence_id)
    }

    fn remove_where<F>(&mut self, predicate: F) -> usize
    where
        F: Fn(&HashRecord) -> bool,
    {
        let before = self.records.len();
        self.records.retain(|_, entry| !predicate(&entry.record));
        let removed = before - self.records.len();
        if removed > 0 {
            self.rebuild_reverse();
        }
        removed
    }

    /// Replace the whole index with the contents of a ledger.
    ///
    /// Lines are replayed in file order. The index is left untouched if any
    /// line fails to parse.
    pub fn load_from_ledger(&mut self, ledger: &str) -> Result<usize, IndexError> {
        let mut parsed = Vec::new();

        for (number, raw) in ledger.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }

            let (path, encoded) =
                line.split_once('=')
                    .ok_or_else(|| IndexError::MalformedLedger {
                        line: number + 1,
                        message: "missing '=' separator".to_string(),
                    })?;
            let id = ItemId::from_path(path)?;
            let fingerprint =
                Fingerprint::from_base64(encoded).map_err(|e| IndexError::MalformedLedger {
                    line: number + 1,
                    message: e.to_string(),
                })?;

            parsed.push((path, HashRecord { id, fingerprint }));
        }

        self.records.clear();
        self.next_position = 0;
        for (path, record) in parsed {
            self.insert_record(path, record);
        }
        self.rebuild_reverse();
        Ok(self.records.len())
    }

    pub fn serialize_ledger(&self) -> String {
        let mut ledger = String::new();
        for (path, record) in self.ordered_records() {
            ledger.push_str(path);
            ledger.push('=');
            ledger.push_str(&record.fingerprint.to_base64());
            ledger.push('\n');
        }
        ledger
    }

    fn ordered_records(&self) -> Vec<(&String, &HashRecord)> {
        let mut ordered: Vec<_> = self.records.iter().collect();
        ordered.sort_by_key(|(_, entry)| entry.position);
        ordered
            .into_iter()
            .map(|(path, entry)| (path, &entry.record))
            .collect()
    }

    fn rebuild_reverse(&mut self) {
        let mut reverse: HashMap<u64, HashMap<Fingerprint, ItemId>> = HashMap::new();
        for (path, record) in self.ordered_records() {
            let by_fp = reverse.entry(record.id.scope_id).or_default();
            match by_fp.get(&record.fingerprint) {
                Some(existing) if *existing != record.id => {
                    log::debug!("Replayed duplicate: {} matches {}", path, existing);
                }
                Some(_) => {}
                None => {
                    by_fp.insert(record.fingerprint, record.id);
                }
            }
        }
        self.reverse = reverse;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fingerprint::FINGERPRINT_LEN;

    fn fp(byte: u8) -> Fingerprint {
        Fingerprint::from_bytes([byte; FINGERPRINT_LEN])
    }

    #[test]
    fn test_record_if_absent_is_idempotent() {
        let mut index = DuplicateIndex::new();
        let id = ItemId::new(1, 10);
        assert_eq!(index.record_if_absent(1, fp(1), id), None);
        assert_eq!(index.record_if_absent(1, fp(1), id), None);
        assert_eq!(index.lookup(1, &fp(1)), Some(id));
    }

    #[test]
    fn test_same_fingerprint_in_other_scope_is_not_a_duplicate() {
        let mut index = DuplicateIndex::new();
        assert_eq!(index.record_if_absent(1, fp(4), ItemId::new(1, 10)), None);
        assert_eq!(index.record_if_absent(2, fp(4), ItemId::new(2, 11)), None);
        assert_eq!(index.scope_count(), 2);
    }

    #[test]
    fn test_first_seen_wins() {
        let mut index = DuplicateIndex::new();
        let first = ItemId::new(3, 1);
        assert_eq!(index.observe("g/3/1-0.png", first, fp(9)), None);
        assert_eq!(index.observe("g/3/2-0.png", ItemId::new(3, 2), fp(9)), Some(first));
        assert_eq!(index.observe("g/3/3-0.png", ItemId::new(3, 3), fp(9)), Some(first));
        assert_eq!(index.len(), 3);
        assert_eq!(index.lookup(3, &fp(9)), Some(first));
    }

    #[test]
    fn test_ledger_round_trip_preserves_lookups() {
        let mut index = DuplicateIndex::new();
        index.observe("g/1/100-0.png", ItemId::new(1, 100), fp(1));
        index.observe("g/1/101-0.png", ItemId::new(1, 101), fp(1));
        index.observe("g/1/102-0.png", ItemId::new(1, 102), fp(2));
        index.observe("g/2/200-0.jpg", ItemId::new(2, 200), fp(1));

        let ledger = index.serialize_ledger();
        let mut reloaded = DuplicateIndex::new();
        assert_eq!(reloaded.load_from_ledger(&ledger).unwrap(), 4);

        for (scope, print) in [(1, fp(1)), (1, fp(2)), (2, fp(1)), (2, fp(2))] {
            assert_eq!(reloaded.lookup(scope, &print), index.lookup(scope, &print));
        }
        assert_eq!(reloaded.serialize_ledger(), ledger);
    }

    #[test]
    fn test_first_seen_follows_arrival_order_across_reload() {
        let mut index = DuplicateIndex::new();
        let first = ItemId::new(10, 100);
        let later = ItemId::new(10, 99);
        assert_eq!(index.observe("1/10/100-0.png", first, fp(7)), None);
        assert_eq!(index.observe("1/10/99-0.png", later, fp(7)), Some(first));

        let ledger = index.serialize_ledger();
        assert!(ledger.starts_with("1/10/100-0.png="));

        let mut reloaded = DuplicateIndex::new();
        reloaded.load_from_ledger(&ledger).unwrap();
        assert_eq!(reloaded.lookup(10, &fp(7)), Some(first));
        assert_eq!(reloaded.serialize_ledger(), ledger);
    }

    #[test]
    fn test_unrelated_removal_keeps_first_seen() {
        let mut index = DuplicateIndex::new();
        index.observe("1/10/100-0.png", ItemId::new(10, 100), fp(7));
        index.observe("1/10/99-0.png", ItemId::new(10, 99), fp(7));
        index.observe("1/10/50-0.png", ItemId::new(10, 50), fp(8));

        assert_eq!(index.remove(ItemId::new(10, 50)), 1);
        assert_eq!(index.lookup(10, &fp(7)), Some(ItemId::new(10, 100)));
    }

    #[test]
    fn test_changed_content_replaces_reverse_entry() {
        let mut index = DuplicateIndex::new();
        let id = ItemId::new(1, 5);
        index.observe("g/1/5-0.png", id, fp(1));
        assert_eq!(index.observe("g/1/5-0.png", id, fp(2)), None);

        assert_eq!(index.len(), 1);
        assert_eq!(index.lookup(1, &fp(1)), None);
        assert_eq!(index.lookup(1, &fp(2)), Some(id));
        assert_eq!(index.record("g/1/5-0.png").map(|r| r.fingerprint), Some(fp(2)));

        let mut reloaded = DuplicateIndex::new();
        reloaded.load_from_ledger(&index.serialize_ledger()).unwrap();
        assert_eq!(reloaded.lookup(1, &fp(1)), None);
        assert_eq!(reloaded.lookup(1, &fp(2)), Some(id));
    }

    #[test]
    fn test_ledger_skips_blank_lines() {
        let line = format!("g/1/5-0.png={}\n\n", fp(3).to_base64());
        let mut index = DuplicateIndex::new();
        assert_eq!(index.load_from_ledger(&line).unwrap(), 1);
        assert!(index.contains_path("g/1/5-0.png"));
    }

    #[test]
    fn test_malformed_ledger_is_fatal_and_leaves_index_intact() {
        let mut index = DuplicateIndex::new();
        index.observe("g/1/5-0.png", ItemId::new(1, 5), fp(3));

        let ledger = format!("g/1/6-0.png={}\nno separator here\n", fp(3).to_base64());
        let err = index.load_from_ledger(&ledger).unwrap_err();
        assert!(matches!(err, IndexError::MalformedLedger { line: 2, .. }));
        assert!(index.contains_path("g/1/5-0.png"));
        assert!(!index.contains_path("g/1/6-0.png"));
    }

    #[test]
    fn test_ledger_with_bad_path_is_rejected() {
        let ledger = format!("g/general/6-0.png={}\n", fp(3).to_base64());
        let mut index = DuplicateIndex::new();
        assert!(matches!(
            index.load_from_ledger(&ledger),
            Err(IndexError::ItemId(_))
        ));
    }

    #[test]
    fn test_remove_promotes_next_item_to_first_seen() {
        let mut index = DuplicateIndex::new();
        index.observe("g/1/1-0.png", ItemId::new(1, 1), fp(5));
        index.observe("g/1/1-1.png", ItemId::new(1, 1), fp(6));
        index.observe("g/1/2-0.png", ItemId::new(1, 2), fp(5));

        assert_eq!(index.remove(ItemId::new(1, 1)), 2);
        assert_eq!(index.len(), 1);
        assert_eq!(index.lookup(1, &fp(5)), Some(ItemId::new(1, 2)));
        assert_eq!(index.lookup(1, &fp(6)), None);
    }

    #[test]
    fn test_remove_sequence_spans_scopes() {
        let mut index = DuplicateIndex::new();
        index.observe("g/1/7-0.png", ItemId::new(1, 7), fp(1));
        index.observe("g/2/7-0.png", ItemId::new(2, 7), fp(1));
        index.observe("g/2/8-0.png", ItemId::new(2, 8), fp(2));

        assert_eq!(index.remove_sequence(7), 2);
        assert_eq!(index.remove_sequence(7), 0);
        assert_eq!(index.len(), 1);
        assert_eq!(index.lookup(1, &fp(1)), None);
    }
}
