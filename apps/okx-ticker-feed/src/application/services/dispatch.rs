//! Ticker Dispatch
//!
//! Holds a single consumer callback. The service loop hands each parsed
//! frame's records to `dispatch`, which invokes the callback once per
//! record, in order, on the service loop itself. A slow callback therefore
//! delays all transport servicing.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::domain::ticker::TickerRecord;

/// Consumer callback for ticker records.
pub type TickerCallback = Arc<dyn Fn(&TickerRecord) + Send + Sync>;

/// Single-slot routing of ticker records to a consumer.
#[derive(Default)]
pub struct TickerDispatcher {
    callback: RwLock<Option<TickerCallback>>,
}

impl TickerDispatcher {
    /// Create a dispatcher with no consumer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the consumer, replacing any previous one.
    pub fn set_callback<F>(&self, callback: F)
    where
        F: Fn(&TickerRecord) + Send + Sync + 'static,
    {
        *self.callback.write() = Some(Arc::new(callback));
    }

    /// Remove the consumer. Records are discarded until a new one is set.
    pub fn clear_callback(&self) {
        *self.callback.write() = None;
    }

    /// Check if a consumer is registered.
    #[must_use]
    pub fn has_callback(&self) -> bool {
        self.callback.read().is_some()
    }

    /// Deliver one frame's records. Returns how many reached a consumer.
    pub fn dispatch(&self, records: Vec<TickerRecord>) -> usize {
        // Cloned out so the consumer may re-register from inside the callback.
        let Some(callback) = self.callback.read().clone() else {
            tracing::trace!(count = records.len(), "No ticker consumer, discarding");
            return 0;
        };

        for record in &records {
            callback(record);
        }
        records.len()
    }
}

impl std::fmt::Debug for TickerDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickerDispatcher")
            .field("has_callback", &self.has_callback())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    fn ticker(inst_id: &str) -> TickerRecord {
        TickerRecord {
            inst_id: inst_id.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn dispatch_without_callback_discards() {
        let dispatcher = TickerDispatcher::new();
        assert!(!dispatcher.has_callback());
        assert_eq!(dispatcher.dispatch(vec![ticker("BTC-USDT")]), 0);
    }

    #[test]
    fn dispatch_preserves_order() {
        let dispatcher = TickerDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        dispatcher.set_callback(move |t| sink.lock().push(t.inst_id.clone()));

        let delivered = dispatcher.dispatch(vec![
            ticker("BTC-USDT"),
            ticker("ETH-USDT"),
            ticker("SOL-USDT"),
        ]);

        assert_eq!(delivered, 3);
        assert_eq!(*seen.lock(), vec!["BTC-USDT", "ETH-USDT", "SOL-USDT"]);
    }

    #[test]
    fn reregistering_replaces_previous_callback() {
        let dispatcher = TickerDispatcher::new();
        let first = Arc::new(Mutex::new(0usize));
        let second = Arc::new(Mutex::new(0usize));

        let counter = Arc::clone(&first);
        dispatcher.set_callback(move |_| *counter.lock() += 1);
        dispatcher.dispatch(vec![ticker("BTC-USDT")]);

        let counter = Arc::clone(&second);
        dispatcher.set_callback(move |_| *counter.lock() += 1);
        dispatcher.dispatch(vec![ticker("BTC-USDT"), ticker("ETH-USDT")]);

        assert_eq!(*first.lock(), 1);
        assert_eq!(*second.lock(), 2);
    }

    #[test]
    fn clear_callback_stops_delivery() {
        let dispatcher = TickerDispatcher::new();
        dispatcher.set_callback(|_| {});
        dispatcher.clear_callback();
        assert_eq!(dispatcher.dispatch(vec![ticker("BTC-USDT")]), 0);
    }

    #[test]
    fn callback_may_reregister_itself() {
        let dispatcher = Arc::new(TickerDispatcher::new());
        let inner = Arc::clone(&dispatcher);
        dispatcher.set_callback(move |_| inner.clear_callback());

        assert_eq!(dispatcher.dispatch(vec![ticker("BTC-USDT")]), 1);
        assert!(!dispatcher.has_callback());
    }
}
