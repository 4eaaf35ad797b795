use crate::transfer::control::StopSignal;
use crate::transfer::error::{CorrelationError, CorrelationResult};
use crate::transfer::types::{
    FileTransfer, NewTransfer, TransferDirection, TransferId, TransferInitiator, TransferStatus,
};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

/// Every transfer this node has seen, keyed by local id.
///
/// Entry locks are held only for the duration of a closure, never across an
/// await.
#[derive(Debug)]
pub struct TransferRegistry {
    transfers: DashMap<TransferId, FileTransfer>,
    stop_signals: DashMap<TransferId, StopSignal>,
    next_id: AtomicU32,
    last_response_code: AtomicI64,
}

impl Default for TransferRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferRegistry {
    pub fn new() -> Self {
        Self {
            transfers: DashMap::new(),
            stop_signals: DashMap::new(),
            next_id: AtomicU32::new(1),
            last_response_code: AtomicI64::new(0),
        }
    }

    pub fn create(&self, new: NewTransfer) -> FileTransfer {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let transfer = FileTransfer::new(id, new);
        self.transfers.insert(id, transfer.clone());
        transfer
    }

    pub fn get(&self, id: TransferId) -> CorrelationResult<FileTransfer> {
        self.transfers
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(CorrelationError::UnknownTransfer(id))
    }

    /// Run `f` against the stored transfer
    pub fn update<F, R>(&self, id: TransferId, f: F) -> CorrelationResult<R>
    where
        F: FnOnce(&mut FileTransfer) -> R,
    {
        let mut entry = self
            .transfers
            .get_mut(&id)
            .ok_or(CorrelationError::UnknownTransfer(id))?;
        Ok(f(entry.value_mut()))
    }

    /// All transfers ordered by id
    pub fn snapshot(&self) -> Vec<FileTransfer> {
        let mut all: Vec<FileTransfer> = self.transfers.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|t| t.id);
        all
    }

    /// Inbound offers from peers still waiting for accept/reject
    pub fn pending_inbound(&self) -> Vec<FileTransfer> {
        self.snapshot()
            .into_iter()
            .filter(|t| {
                t.direction == TransferDirection::Inbound
                    && t.status == TransferStatus::Pending
                    && t.response_code != 0
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    /// The single transfer holding `response_code`
    pub fn find_by_response_code(&self, response_code: i64) -> CorrelationResult<FileTransfer> {
        if response_code == 0 {
            return Err(CorrelationError::NoMatch { response_code });
        }

        let mut matches: Vec<FileTransfer> = self
            .transfers
            .iter()
            .filter(|e| e.value().response_code == response_code)
            .map(|e| e.value().clone())
            .collect();

        match matches.len() {
            0 => Err(CorrelationError::NoMatch { response_code }),
            1 => Ok(matches.remove(0)),
            count => Err(CorrelationError::Ambiguous {
                response_code,
                count,
            }),
        }
    }

    /// Inbound transfer this node requested with `get_file`, still waiting
    /// for the holder's offer
    pub fn find_requested(&self, id: TransferId) -> CorrelationResult<FileTransfer> {
        let transfer = self.get(id)?;
        if transfer.direction == TransferDirection::Inbound
            && transfer.initiator == TransferInitiator::LocalServer
        {
            Ok(transfer)
        } else {
            Err(CorrelationError::UnknownTransfer(id))
        }
    }

    /// Issue a correlation code unique among all known transfers.
    ///
    /// Codes follow the wall clock in nanoseconds but never repeat or go
    /// backwards, even when the clock does.
    pub fn generate_response_code(&self) -> i64 {
        loop {
            let now = Utc::now().timestamp_nanos_opt().unwrap_or(0);
            let last = self.last_response_code.load(Ordering::SeqCst);
            let candidate = now.max(last + 1).max(1);

            if self
                .last_response_code
                .compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                continue;
            }

            let taken = self
                .transfers
                .iter()
                .any(|e| e.value().response_code == candidate);
            if !taken {
                return candidate;
            }
            tracing::debug!("Response code {} already in use, drawing another", candidate);
        }
    }

    /// Fresh stop signal for the transfer's next byte stream
    pub fn arm_stop(&self, id: TransferId) -> StopSignal {
        let signal = StopSignal::new();
        self.stop_signals.insert(id, signal.clone());
        signal
    }

    /// Stop the transfer's byte stream, if one is running
    pub fn stop(&self, id: TransferId) -> bool {
        match self.stop_signals.get(&id) {
            Some(signal) => {
                signal.trigger();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::path::PathBuf;
    use std::sync::Arc;

    fn new_transfer(direction: TransferDirection) -> NewTransfer {
        NewTransfer {
            direction,
            initiator: TransferInitiator::LocalServer,
            remote: "127.0.0.1:9002".parse().unwrap(),
            file_name: "data.bin".into(),
            file_size: 1000,
            local_folder: PathBuf::from("/tmp"),
            remote_folder: "/srv".into(),
            retry_limit: 2,
        }
    }

    #[test]
    fn test_ids_are_sequential() {
        let registry = TransferRegistry::new();
        let a = registry.create(new_transfer(TransferDirection::Outbound));
        let b = registry.create(new_transfer(TransferDirection::Outbound));
        assert_eq!(b.id, a.id + 1);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.snapshot()[0].id, a.id);
    }

    #[test]
    fn test_update_and_unknown_id() {
        let registry = TransferRegistry::new();
        let t = registry.create(new_transfer(TransferDirection::Inbound));
        registry.update(t.id, |t| t.record_progress(10)).unwrap();
        assert_eq!(registry.get(t.id).unwrap().bytes_transferred, 10);

        assert_eq!(
            registry.update(999, |_| ()).unwrap_err(),
            CorrelationError::UnknownTransfer(999)
        );
    }

    #[test]
    fn test_response_code_lookup() {
        let registry = TransferRegistry::new();
        let a = registry.create(new_transfer(TransferDirection::Outbound));
        let b = registry.create(new_transfer(TransferDirection::Outbound));
        let code_a = registry.generate_response_code();
        let code_b = registry.generate_response_code();
        assert_ne!(code_a, code_b);

        registry.update(a.id, |t| t.response_code = code_a).unwrap();
        registry.update(b.id, |t| t.response_code = code_b).unwrap();

        assert_eq!(registry.find_by_response_code(code_b).unwrap().id, b.id);
        assert!(matches!(
            registry.find_by_response_code(code_b + 12345),
            Err(CorrelationError::NoMatch { .. })
        ));
        assert!(matches!(
            registry.find_by_response_code(0),
            Err(CorrelationError::NoMatch { .. })
        ));
    }

    #[test]
    fn test_ambiguous_match_is_reported() {
        let registry = TransferRegistry::new();
        let a = registry.create(new_transfer(TransferDirection::Outbound));
        let b = registry.create(new_transfer(TransferDirection::Inbound));
        registry.update(a.id, |t| t.response_code = 42).unwrap();
        registry.update(b.id, |t| t.response_code = 42).unwrap();

        assert_eq!(
            registry.find_by_response_code(42).unwrap_err(),
            CorrelationError::Ambiguous {
                response_code: 42,
                count: 2
            }
        );
    }

    #[test]
    fn test_generated_codes_skip_codes_in_use() {
        let registry = TransferRegistry::new();
        let t = registry.create(new_transfer(TransferDirection::Inbound));
        let upcoming = registry.generate_response_code() + 1;
        registry.update(t.id, |t| t.response_code = upcoming).unwrap();

        for _ in 0..100 {
            assert_ne!(registry.generate_response_code(), upcoming);
        }
    }

    #[test]
    fn test_codes_unique_across_threads() {
        let registry = Arc::new(TransferRegistry::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    (0..500)
                        .map(|_| registry.generate_response_code())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for code in handle.join().unwrap() {
                assert!(seen.insert(code));
            }
        }
    }

    #[test]
    fn test_stop_signal_per_transfer() {
        let registry = TransferRegistry::new();
        let t = registry.create(new_transfer(TransferDirection::Outbound));
        assert!(!registry.stop(t.id));

        let signal = registry.arm_stop(t.id);
        assert!(registry.stop(t.id));
        assert!(signal.is_triggered());

        // A new attempt gets a clean signal
        assert!(!registry.arm_stop(t.id).is_triggered());
    }
}
