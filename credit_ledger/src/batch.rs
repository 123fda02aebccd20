//! Reports for operations that touch several records one after the other.
//!
//! The records are written independently: there is no transaction across them.
//! The first failure stops the batch. The records before it stay written and
//! the records after it are not attempted.

use std::fmt::Debug;

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum RecordOutcome<E> {
    Applied,
    Failed(E),
    /// Not attempted because an earlier record failed.
    Skipped,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct BatchReport<K, E> {
    outcomes: Vec<(K, RecordOutcome<E>)>,
}

impl<K: Clone + Debug, E: Debug> BatchReport<K, E> {
    /// Runs the write for every key, stopping at the first failure.
    pub fn run<F>(keys: &[K], mut write: F) -> BatchReport<K, E>
    where
        F: FnMut(&K) -> Result<(), E>,
    {
        let mut outcomes: Vec<(K, RecordOutcome<E>)> = Vec::with_capacity(keys.len());
        let mut failed = false;
        for k in keys.iter() {
            if failed {
                outcomes.push((k.clone(), RecordOutcome::Skipped));
                continue;
            }
            match write(k) {
                Ok(()) => outcomes.push((k.clone(), RecordOutcome::Applied)),
                Err(e) => {
                    log::warn!("batch: record {:?} failed: {:?}", k, e);
                    failed = true;
                    outcomes.push((k.clone(), RecordOutcome::Failed(e)));
                }
            }
        }
        BatchReport { outcomes }
    }

    pub fn outcomes(&self) -> &[(K, RecordOutcome<E>)] {
        &self.outcomes
    }

    /// True if every record was written.
    pub fn is_complete(&self) -> bool {
        self.outcomes
            .iter()
            .all(|(_, o)| matches!(o, RecordOutcome::Applied))
    }

    pub fn first_failure(&self) -> Option<(&K, &E)> {
        self.outcomes.iter().find_map(|(k, o)| match o {
            RecordOutcome::Failed(e) => Some((k, e)),
            _ => None,
        })
    }

    pub fn applied(&self) -> Vec<&K> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, RecordOutcome::Applied))
            .map(|(k, _)| k)
            .collect()
    }

    pub fn skipped(&self) -> Vec<&K> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, RecordOutcome::Skipped))
            .map(|(k, _)| k)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}
