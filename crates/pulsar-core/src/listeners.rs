//! Listener registries for VM notifications.
//!
//! Registries are plain owned collections handed to the VM at construction
//! time. Subscribing returns a [`ListenerId`] that unsubscribes the callback
//! again.
//!
//! Callbacks run without the registry lock held, so a callback may
//! subscribe or unsubscribe on the registry that is calling it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::graph::NodeId;
use crate::perf::PerfStats;

/// Handle identifying a subscribed callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// A set of callbacks invoked with a shared event value.
pub struct Listeners<T> {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(ListenerId, Callback<T>)>>,
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            callbacks: Mutex::new(Vec::new()),
        }
    }
}

impl<T> Listeners<T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback and returns its handle.
    pub fn subscribe<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.callbacks.lock().push((id, Arc::new(callback)));
        id
    }

    /// Removes a callback. Returns false if the handle was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut callbacks = self.callbacks.lock();
        let before = callbacks.len();
        callbacks.retain(|(cid, _)| *cid != id);
        callbacks.len() != before
    }

    /// Invokes every callback in subscription order.
    ///
    /// The set of callbacks is the one subscribed when the call starts.
    pub fn call(&self, value: &T) {
        let snapshot: Vec<Callback<T>> = self
            .callbacks
            .lock()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in snapshot {
            callback(value);
        }
    }

    /// Returns the number of subscribed callbacks.
    pub fn len(&self) -> usize {
        self.callbacks.lock().len()
    }

    /// Returns true if nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.callbacks.lock().is_empty()
    }
}

/// A notification emitted by a node, delivered once per frame.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeNotification {
    /// Emitting node.
    pub node: NodeId,
    /// Opaque payload.
    pub payload: Vec<u8>,
}

/// The two registries a [`PipelineVm`](crate::PipelineVm) publishes to.
#[derive(Default)]
pub struct VmListeners {
    /// Performance snapshot of the previous frame.
    pub perf: Listeners<PerfStats>,
    /// Node notifications, in submission order.
    pub notifications: Listeners<NodeNotification>,
}

impl VmListeners {
    /// Creates empty registries.
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_subscribe_call_unsubscribe() {
        let listeners: Listeners<u32> = Listeners::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let id = listeners.subscribe(move |v| {
            h.fetch_add(*v as usize, Ordering::SeqCst);
        });

        listeners.call(&3);
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        assert!(listeners.unsubscribe(id));
        assert!(!listeners.unsubscribe(id));
        listeners.call(&3);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_call_order_is_subscription_order() {
        let listeners: Listeners<()> = Listeners::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let log = Arc::clone(&log);
            listeners.subscribe(move |()| log.lock().push(i));
        }
        listeners.call(&());
        assert_eq!(*log.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_callback_can_unsubscribe_itself() {
        let listeners: Arc<Listeners<u32>> = Arc::new(Listeners::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let own_id: Arc<Mutex<Option<ListenerId>>> = Arc::new(Mutex::new(None));

        let registry = Arc::clone(&listeners);
        let h = Arc::clone(&hits);
        let slot = Arc::clone(&own_id);
        let id = listeners.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *slot.lock() {
                registry.unsubscribe(id);
            }
        });
        *own_id.lock() = Some(id);

        let (tx, rx) = mpsc::channel();
        let worker = Arc::clone(&listeners);
        thread::spawn(move || {
            worker.call(&1);
            worker.call(&1);
            let _ = tx.send(());
        });
        rx.recv_timeout(Duration::from_secs(2))
            .expect("call() must not block when a callback unsubscribes");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(listeners.is_empty());
    }

    #[test]
    fn test_callback_can_subscribe_during_call() {
        let listeners: Arc<Listeners<u32>> = Arc::new(Listeners::new());
        let registry = Arc::clone(&listeners);
        listeners.subscribe(move |_| {
            registry.subscribe(|_| {});
        });

        let (tx, rx) = mpsc::channel();
        let worker = Arc::clone(&listeners);
        thread::spawn(move || {
            worker.call(&1);
            let _ = tx.send(());
        });
        rx.recv_timeout(Duration::from_secs(2))
            .expect("call() must not block when a callback subscribes");
        assert_eq!(listeners.len(), 2);
    }
}
