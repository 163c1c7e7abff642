// SPDX-License-Identifier: MPL-2.0

//! Session observers
//!
//! Observers implement [`CameraCallback`]. Every method has a default that
//! does nothing, so an observer only overrides what it cares about.
//!
//! An observer that returns `Err` or panics is removed from the session on
//! the spot and never hears another event. The remaining observers still
//! receive the event that triggered the removal.

use std::error::Error;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::warn;

use crate::backends::camera::types::ControlFlag;
use crate::errors::SessionError;

/// Outcome of one observer call
pub type CallbackResult = Result<(), Box<dyn Error + Send + Sync>>;

/// Observer of session lifecycle events
///
/// Called on the session actor thread, never while the session lock is held.
pub trait CameraCallback: Send + Sync {
    fn on_open(&self) -> CallbackResult {
        Ok(())
    }

    fn on_close(&self) -> CallbackResult {
        Ok(())
    }

    fn on_start_preview(&self) -> CallbackResult {
        Ok(())
    }

    fn on_stop_preview(&self) -> CallbackResult {
        Ok(())
    }

    fn on_start_recording(&self) -> CallbackResult {
        Ok(())
    }

    fn on_stop_recording(&self) -> CallbackResult {
        Ok(())
    }

    fn on_error(&self, _error: &SessionError) -> CallbackResult {
        Ok(())
    }

    /// Result of a queued get/set/reset value command
    fn on_value(&self, _flag: ControlFlag, _value: i32) -> CallbackResult {
        Ok(())
    }
}

/// Event fanned out to observers
#[derive(Debug, Clone, PartialEq)]
pub enum CameraEvent {
    Open,
    Close,
    StartPreview,
    StopPreview,
    StartRecording,
    StopRecording,
    Error(SessionError),
    Value { flag: ControlFlag, value: i32 },
}

impl CameraEvent {
    fn deliver(&self, callback: &dyn CameraCallback) -> CallbackResult {
        match self {
            CameraEvent::Open => callback.on_open(),
            CameraEvent::Close => callback.on_close(),
            CameraEvent::StartPreview => callback.on_start_preview(),
            CameraEvent::StopPreview => callback.on_stop_preview(),
            CameraEvent::StartRecording => callback.on_start_recording(),
            CameraEvent::StopRecording => callback.on_stop_recording(),
            CameraEvent::Error(error) => callback.on_error(error),
            CameraEvent::Value { flag, value } => callback.on_value(*flag, *value),
        }
    }
}

/// Registered observers of one session
#[derive(Default)]
pub(crate) struct CallbackSet {
    entries: Mutex<Vec<Arc<dyn CameraCallback>>>,
}

impl CallbackSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the observer was already registered
    pub fn add(&self, callback: Arc<dyn CameraCallback>) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.iter().any(|entry| Arc::ptr_eq(entry, &callback)) {
            return false;
        }
        entries.push(callback);
        true
    }

    pub fn remove(&self, callback: &Arc<dyn CameraCallback>) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|entry| !Arc::ptr_eq(entry, callback));
        entries.len() != before
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver an event to a snapshot of the observers
    pub fn dispatch(&self, event: &CameraEvent) {
        let snapshot = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for callback in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| event.deliver(callback.as_ref())));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(_) => "observer panicked".to_string(),
            };
            warn!(?event, error = %failure, "Removing failing observer");
            self.remove(&callback);
        }
    }
}

/// Observer forwarding every event into a tokio channel
///
/// Removed from the session automatically once the receiver is dropped.
pub struct ChannelCallback {
    sender: mpsc::UnboundedSender<CameraEvent>,
}

impl ChannelCallback {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<CameraEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self { sender }), receiver)
    }

    fn send(&self, event: CameraEvent) -> CallbackResult {
        self.sender
            .send(event)
            .map_err(|_| "event receiver dropped".into())
    }
}

impl CameraCallback for ChannelCallback {
    fn on_open(&self) -> CallbackResult {
        self.send(CameraEvent::Open)
    }

    fn on_close(&self) -> CallbackResult {
        self.send(CameraEvent::Close)
    }

    fn on_start_preview(&self) -> CallbackResult {
        self.send(CameraEvent::StartPreview)
    }

    fn on_stop_preview(&self) -> CallbackResult {
        self.send(CameraEvent::StopPreview)
    }

    fn on_start_recording(&self) -> CallbackResult {
        self.send(CameraEvent::StartRecording)
    }

    fn on_stop_recording(&self) -> CallbackResult {
        self.send(CameraEvent::StopRecording)
    }

    fn on_error(&self, error: &SessionError) -> CallbackResult {
        self.send(CameraEvent::Error(error.clone()))
    }

    fn on_value(&self, flag: ControlFlag, value: i32) -> CallbackResult {
        self.send(CameraEvent::Value { flag, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        opens: AtomicUsize,
    }

    impl CameraCallback for Counter {
        fn on_open(&self) -> CallbackResult {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    impl CameraCallback for Failing {
        fn on_open(&self) -> CallbackResult {
            Err("nope".into())
        }
    }

    struct Panicking;

    impl CameraCallback for Panicking {
        fn on_close(&self) -> CallbackResult {
            panic!("observer bug");
        }
    }

    #[test]
    fn test_duplicates_are_ignored() {
        let set = CallbackSet::new();
        let counter: Arc<dyn CameraCallback> = Arc::new(Counter::default());
        assert!(set.add(counter.clone()));
        assert!(!set.add(counter.clone()));
        assert_eq!(set.len(), 1);
        assert!(set.remove(&counter));
        assert!(!set.remove(&counter));
    }

    #[test]
    fn test_failing_observer_is_removed_and_others_still_notified() {
        let set = CallbackSet::new();
        let counter = Arc::new(Counter::default());
        set.add(Arc::new(Failing));
        set.add(counter.clone());

        set.dispatch(&CameraEvent::Open);
        assert_eq!(set.len(), 1);
        assert_eq!(counter.opens.load(Ordering::SeqCst), 1);

        set.dispatch(&CameraEvent::Open);
        assert_eq!(counter.opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_observer_is_removed() {
        let set = CallbackSet::new();
        set.add(Arc::new(Panicking));
        set.add(Arc::new(Counter::default()));
        set.dispatch(&CameraEvent::Close);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_channel_callback_forwards_and_detaches() {
        let set = CallbackSet::new();
        let (callback, mut events) = ChannelCallback::new();
        set.add(callback);

        set.dispatch(&CameraEvent::Value { flag: ControlFlag::Gain, value: 3 });
        assert_eq!(
            events.try_recv().unwrap(),
            CameraEvent::Value { flag: ControlFlag::Gain, value: 3 }
        );

        drop(events);
        set.dispatch(&CameraEvent::StopPreview);
        assert_eq!(set.len(), 0);
    }
}
