//! One-shot readiness signal between two workers.
//!
//! The first `notify_*` call decides the state; later calls are ignored.
//! Waiters that arrive after the signal fired return immediately.

use tokio::sync::watch;

/// Delivered state of a [`Readiness`] signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyState<T> {
    Ready(T),
    Unavailable,
}

impl<T: Default> ReadyState<T> {
    /// The payload, or an empty one when the producer never delivered.
    pub fn into_payload(self) -> T {
        match self {
            ReadyState::Ready(payload) => payload,
            ReadyState::Unavailable => T::default(),
        }
    }
}

#[derive(Debug)]
pub struct Readiness<T> {
    tx: watch::Sender<Option<ReadyState<T>>>,
}

impl<T: Clone> Readiness<T> {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Fire with a payload. Returns `false` if the signal had already fired.
    pub fn notify_ready(&self, payload: T) -> bool {
        self.fire(ReadyState::Ready(payload))
    }

    /// Fire with no payload. Returns `false` if the signal had already fired.
    pub fn notify_unavailable(&self) -> bool {
        self.fire(ReadyState::Unavailable)
    }

    pub fn is_fired(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Wait until the signal fires.
    pub async fn wait(&self) -> ReadyState<T> {
        let mut rx = self.tx.subscribe();
        let state = match rx.wait_for(Option::is_some).await {
            Ok(state) => (*state).clone().unwrap_or(ReadyState::Unavailable),
            // The sender lives in `self`, so this is unreachable in practice.
            Err(_) => ReadyState::Unavailable,
        };
        state
    }

    fn fire(&self, state: ReadyState<T>) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(state);
            true
        })
    }
}

impl<T: Clone> Default for Readiness<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_first_fire_wins() {
        let signal = Readiness::new();
        assert!(signal.notify_ready(vec!["a.png".to_string()]));
        assert!(!signal.notify_unavailable());
        assert!(!signal.notify_ready(vec!["b.png".to_string()]));

        assert_eq!(signal.wait().await, ReadyState::Ready(vec!["a.png".to_string()]));
    }

    #[tokio::test]
    async fn test_late_waiter_sees_delivered_state() {
        let signal: Readiness<Vec<String>> = Readiness::new();
        signal.notify_unavailable();

        let state = timeout(Duration::from_millis(100), signal.wait())
            .await
            .expect("no blocking after fire");
        assert_eq!(state.into_payload(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn test_waiter_released_by_later_fire() {
        let signal = Arc::new(Readiness::new());
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.wait().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!signal.is_fired());
        signal.notify_ready(3usize);

        let state = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(state, ReadyState::Ready(3));
    }

    #[tokio::test]
    async fn test_concurrent_fires_deliver_once() {
        let signal = Arc::new(Readiness::new());
        let mut handles = Vec::new();
        for i in 0..8u32 {
            let signal = signal.clone();
            handles.push(tokio::spawn(async move { signal.notify_ready(i) }));
        }

        let mut fired = 0;
        for handle in handles {
            if handle.await.unwrap() {
                fired += 1;
            }
        }
        assert_eq!(fired, 1);
    }
}
