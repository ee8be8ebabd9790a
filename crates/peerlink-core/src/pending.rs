//! Registry of outbound requests awaiting a response.
//!
//! Identifiers are drawn from the fixed space `[0, capacity)`; `register`
//! always takes the lowest free slot, and a slot is reused only once its
//! previous entry has been removed. Exhaustion is a normal outcome that the
//! caller handles (sweep and retry, or give up).

use crate::callback::{CallbackMethod, Payload};
use crate::protocol::RequestId;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

/// What happens with the response to a registered request.
#[derive(Debug)]
pub enum PendingKind {
    /// A caller is suspended on the receiving half.
    Waiting(oneshot::Sender<Payload>),
    /// Invoke the bound callback with the payload.
    Callback(CallbackMethod),
}

impl PendingKind {
    /// A waiting entry and the receiver its caller suspends on.
    pub fn waiting() -> (Self, oneshot::Receiver<Payload>) {
        let (tx, rx) = oneshot::channel();
        (PendingKind::Waiting(tx), rx)
    }
}

#[derive(Debug)]
enum Slot {
    /// `None` once the payload was handed over.
    Waiting(Option<oneshot::Sender<Payload>>),
    Callback(CallbackMethod),
}

#[derive(Debug)]
struct PendingEntry {
    created_at: Instant,
    slot: Slot,
}

/// Read-only view of a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingInfo {
    pub id: RequestId,
    pub created_at: Instant,
    pub is_callback: bool,
    /// For waiting entries: whether the payload was already delivered.
    pub fulfilled: bool,
}

/// Outcome of handing a response payload to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// A waiting caller received the payload; the entry stays until it deregisters.
    Fulfilled,
    /// The callback ran and its entry was removed.
    Invoked,
    /// No live entry for the identifier.
    NotFound,
    /// The waiting entry already received a payload.
    Duplicate,
}

/// Bounded table of in-flight requests.
#[derive(Debug)]
pub struct PendingRegistry {
    capacity: usize,
    slots: Mutex<Vec<Option<PendingEntry>>>,
}

impl PendingRegistry {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(RequestId::MAX as usize);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            capacity,
            slots: Mutex::new(slots),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // Nothing runs user code while the lock is held, so a poisoned table is still consistent.
    fn slots(&self) -> MutexGuard<'_, Vec<Option<PendingEntry>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `kind` under the lowest free identifier.
    ///
    /// On exhaustion the kind is handed back untouched so the caller can retry.
    pub fn register(&self, kind: PendingKind) -> Result<RequestId, PendingKind> {
        let mut slots = self.slots();
        let Some(index) = slots.iter().position(Option::is_none) else {
            return Err(kind);
        };

        let slot = match kind {
            PendingKind::Waiting(tx) => Slot::Waiting(Some(tx)),
            PendingKind::Callback(cb) => Slot::Callback(cb),
        };
        slots[index] = Some(PendingEntry {
            created_at: Instant::now(),
            slot,
        });
        Ok(index as RequestId)
    }

    /// Drop the entry for `id`; no-op when absent.
    pub fn remove(&self, id: RequestId) -> bool {
        let Some(index) = self.index(id) else {
            return false;
        };
        self.slots()[index].take().is_some()
    }

    pub fn lookup(&self, id: RequestId) -> Option<PendingInfo> {
        let index = self.index(id)?;
        let slots = self.slots();
        slots[index].as_ref().map(|entry| info(id, entry))
    }

    /// Route a response payload to the entry registered under `id`.
    ///
    /// Waiting entries are fulfilled in place. Callback entries are removed
    /// first and invoked after the table is unlocked.
    pub fn deliver(&self, id: RequestId, payload: Payload) -> Delivery {
        let Some(index) = self.index(id) else {
            return Delivery::NotFound;
        };

        let callback = {
            let mut slots = self.slots();
            match slots[index].as_mut() {
                None => return Delivery::NotFound,
                Some(PendingEntry {
                    slot: Slot::Waiting(sender),
                    ..
                }) => {
                    let Some(tx) = sender.take() else {
                        return Delivery::Duplicate;
                    };
                    // A dropped receiver means the caller already gave up.
                    if tx.send(payload).is_err() {
                        debug!("Waiter for request {} is gone", id);
                    }
                    return Delivery::Fulfilled;
                }
                Some(PendingEntry {
                    slot: Slot::Callback(_),
                    ..
                }) => {}
            }
            match slots[index].take() {
                Some(PendingEntry {
                    slot: Slot::Callback(cb),
                    ..
                }) => cb,
                _ => return Delivery::NotFound,
            }
        };

        callback.invoke(payload);
        Delivery::Invoked
    }

    /// Remove every entry older than `timeout` at `now`. Returns how many went.
    pub fn sweep_expired(&self, now: Instant, timeout: Duration) -> usize {
        let mut slots = self.slots();
        let mut removed = 0;
        for (index, slot) in slots.iter_mut().enumerate() {
            let expired = slot
                .as_ref()
                .is_some_and(|entry| now.saturating_duration_since(entry.created_at) > timeout);
            if expired {
                *slot = None;
                removed += 1;
                debug!("Expired pending request {}", index);
            }
        }
        removed
    }

    /// Drop every entry. Waiting callers observe a closed channel.
    pub fn clear(&self) -> usize {
        let mut slots = self.slots();
        slots.iter_mut().filter_map(Option::take).count()
    }

    pub fn len(&self) -> usize {
        self.slots().iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    fn index(&self, id: RequestId) -> Option<usize> {
        usize::try_from(id).ok().filter(|index| *index < self.capacity)
    }
}

fn info(id: RequestId, entry: &PendingEntry) -> PendingInfo {
    let (is_callback, fulfilled) = match &entry.slot {
        Slot::Waiting(sender) => (false, sender.is_none()),
        Slot::Callback(_) => (true, false),
    };
    PendingInfo {
        id,
        created_at: entry.created_at,
        is_callback,
        fulfilled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn waiting() -> PendingKind {
        PendingKind::waiting().0
    }

    #[test]
    fn test_register_takes_lowest_free_slot() {
        let registry = PendingRegistry::new(4);
        assert_eq!(registry.register(waiting()).unwrap(), 0);
        assert_eq!(registry.register(waiting()).unwrap(), 1);
        assert_eq!(registry.register(waiting()).unwrap(), 2);

        assert!(registry.remove(1));
        assert_eq!(registry.register(waiting()).unwrap(), 1);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_exhaustion_and_recovery() {
        let registry = PendingRegistry::new(3);
        for _ in 0..3 {
            registry.register(waiting()).unwrap();
        }
        assert!(registry.is_full());
        assert!(registry.register(waiting()).is_err());
        assert_eq!(registry.len(), 3);

        registry.remove(2);
        assert_eq!(registry.register(waiting()).unwrap(), 2);
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let registry = PendingRegistry::new(2);
        assert!(!registry.remove(0));
        assert!(!registry.remove(-1));
        assert!(!registry.remove(99));
    }

    #[test]
    fn test_concurrent_register_never_duplicates() {
        let registry = Arc::new(PendingRegistry::new(100));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    (0..10)
                        .map(|_| registry.register(waiting()).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(ids.insert(id), "id {} assigned twice", id);
            }
        }
        assert_eq!(ids.len(), 100);
        assert!(registry.register(waiting()).is_err());
    }

    #[tokio::test]
    async fn test_deliver_fulfils_waiting_and_keeps_entry() {
        let registry = PendingRegistry::new(2);
        let (kind, rx) = PendingKind::waiting();
        let id = registry.register(kind).unwrap();

        assert_eq!(registry.deliver(id, Payload::Result(json!(5))), Delivery::Fulfilled);
        assert_eq!(rx.await.unwrap(), Payload::Result(json!(5)));

        let info = registry.lookup(id).unwrap();
        assert!(info.fulfilled);
        assert!(!info.is_callback);

        assert_eq!(registry.deliver(id, Payload::Result(json!(6))), Delivery::Duplicate);
        registry.remove(id);
        assert_eq!(registry.deliver(id, Payload::Result(json!(7))), Delivery::NotFound);
    }

    #[test]
    fn test_deliver_invokes_callback_and_removes() {
        let registry = PendingRegistry::new(2);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb = CallbackMethod::bind(
            move |payload: Payload| sink.lock().unwrap().push(payload),
            vec![],
        )
        .unwrap();

        let id = registry.register(PendingKind::Callback(cb)).unwrap();
        assert!(registry.lookup(id).unwrap().is_callback);

        assert_eq!(registry.deliver(id, Payload::Result(json!("ok"))), Delivery::Invoked);
        assert!(registry.lookup(id).is_none());
        assert_eq!(registry.deliver(id, Payload::Result(json!("again"))), Delivery::NotFound);
        assert_eq!(*seen.lock().unwrap(), vec![Payload::Result(json!("ok"))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let registry = PendingRegistry::new(4);
        let old = registry.register(waiting()).unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        let young = registry.register(waiting()).unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        let removed = registry.sweep_expired(Instant::now(), Duration::from_secs(10));

        assert_eq!(removed, 1);
        assert!(registry.lookup(old).is_none());
        assert!(registry.lookup(young).is_some());
    }

    #[tokio::test]
    async fn test_clear_wakes_waiters() {
        let registry = PendingRegistry::new(2);
        let (kind, rx) = PendingKind::waiting();
        registry.register(kind).unwrap();

        assert_eq!(registry.clear(), 1);
        assert!(rx.await.is_err());
        assert!(registry.is_empty());
    }
}
