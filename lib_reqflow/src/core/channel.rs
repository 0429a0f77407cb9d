//! # Bounded Channel
//!
//! A fixed-capacity FIFO connecting exactly one producer loop with exactly one
//! consumer loop. It is a thin layer over `tokio::sync::mpsc` that adds
//! capacity validation and makes both blocking operations cancellable through a
//! shared `CancellationToken`.
//!
//! Neither half is `Clone`, which keeps the channel single-producer and
//! single-consumer. FIFO order is what lets the terminal sentinel, sent last by
//! the generator, arrive last at the dispatcher.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::error::{ConfigError, PipelineError};
use crate::core::generator::PayloadSink;
use crate::core::payload::Payload;

/// Smallest accepted channel capacity.
pub const MIN_CAPACITY: usize = 1;
/// Largest accepted channel capacity.
pub const MAX_CAPACITY: usize = 10_000;

/// Creates a bounded channel holding at most `capacity` items.
///
/// # Errors
/// Returns a `ConfigError` when `capacity` lies outside `[1, 10000]`.
pub fn bounded<T>(capacity: usize) -> Result<(ChannelSender<T>, ChannelReceiver<T>), ConfigError> {
    if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&capacity) {
        return Err(ConfigError::single(format!(
            "capacity: {capacity} is outside [{MIN_CAPACITY}, {MAX_CAPACITY}]"
        )));
    }
    let (tx, rx) = mpsc::channel(capacity);
    Ok((
        ChannelSender { inner: tx },
        ChannelReceiver {
            inner: rx,
            capacity,
        },
    ))
}

/// # Channel Sender
///
/// The producer half.
#[derive(Debug)]
pub struct ChannelSender<T> {
    inner: mpsc::Sender<T>,
}

impl<T> ChannelSender<T> {
    /// Enqueues `item`, suspending while the channel is full.
    ///
    /// # Errors
    /// `Cancelled` if `cancel` fires first, `ChannelClosed` if the receiver is gone.
    pub async fn put(&self, item: T, cancel: &CancellationToken) -> Result<(), PipelineError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            res = self.inner.send(item) => res.map_err(|_| PipelineError::ChannelClosed),
        }
    }

    /// Number of items currently buffered.
    pub fn len(&self) -> usize {
        self.inner.max_capacity() - self.inner.capacity()
    }

    /// Returns `true` when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of buffered items.
    pub fn capacity(&self) -> usize {
        self.inner.max_capacity()
    }

    /// Returns `true` once the receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl<B: Send> PayloadSink<B> for ChannelSender<Payload<B>> {
    async fn send(&self, payload: Payload<B>, cancel: &CancellationToken) -> Result<(), PipelineError> {
        self.put(payload, cancel).await
    }
}

/// # Channel Receiver
///
/// The consumer half.
#[derive(Debug)]
pub struct ChannelReceiver<T> {
    inner: mpsc::Receiver<T>,
    capacity: usize,
}

impl<T> ChannelReceiver<T> {
    /// Dequeues the oldest item, suspending while the channel is empty.
    ///
    /// # Errors
    /// `Cancelled` if `cancel` fires first, `ChannelClosed` if the sender is
    /// gone and nothing is left to read.
    pub async fn take(&mut self, cancel: &CancellationToken) -> Result<T, PipelineError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            item = self.inner.recv() => item.ok_or(PipelineError::ChannelClosed),
        }
    }

    /// Number of items currently buffered.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Maximum number of buffered items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    #[test]
    fn test_capacity_bounds_are_enforced() {
        assert!(bounded::<u32>(0).is_err());
        assert!(bounded::<u32>(10_001).is_err());
        assert!(bounded::<u32>(1).is_ok());
        assert!(bounded::<u32>(10_000).is_ok());

        let err = bounded::<u32>(0).unwrap_err();
        assert!(err.mentions("capacity"));
    }

    #[tokio::test]
    async fn test_items_come_out_in_fifo_order() {
        let cancel = CancellationToken::new();
        let (tx, mut rx) = bounded(8).unwrap();
        for i in 0..8 {
            tx.put(i, &cancel).await.unwrap();
        }
        assert_eq!(tx.len(), 8);

        for expected in 0..8 {
            assert_eq!(rx.take(&cancel).await.unwrap(), expected);
        }
        assert!(rx.is_empty());
    }

    #[tokio::test]
    async fn test_put_blocks_until_a_take_frees_a_slot() {
        let cancel = CancellationToken::new();
        let (tx, mut rx) = bounded(1).unwrap();
        tx.put(1, &cancel).await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), tx.put(2, &cancel)).await;
        assert!(blocked.is_err(), "put on a full channel must suspend");

        let producer = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tx.put(2, &cancel).await.unwrap();
                tx
            }
        });
        assert_eq!(rx.take(&cancel).await.unwrap(), 1);
        let tx = producer.await.unwrap();
        assert_eq!(tx.len(), 1);
        assert_eq!(rx.take(&cancel).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_wakes_a_blocked_take() {
        let cancel = CancellationToken::new();
        let (_tx, mut rx) = bounded::<u32>(4).unwrap();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let res = tokio::time::timeout(Duration::from_secs(5), rx.take(&cancel)).await;

        assert!(matches!(res, Ok(Err(PipelineError::Cancelled))));
    }

    #[tokio::test]
    async fn test_cancellation_wakes_a_blocked_put() {
        let cancel = CancellationToken::new();
        let (tx, _rx) = bounded(1).unwrap();
        tx.put(0u32, &cancel).await.unwrap();
        cancel.cancel();

        let res = tokio::time::timeout(Duration::from_secs(5), tx.put(1, &cancel)).await;

        assert!(matches!(res, Ok(Err(PipelineError::Cancelled))));
    }

    #[tokio::test]
    async fn test_dropped_halves_close_the_channel() {
        let cancel = CancellationToken::new();
        let (tx, mut rx) = bounded::<u32>(2).unwrap();
        tx.put(5, &cancel).await.unwrap();
        drop(tx);

        assert_eq!(rx.take(&cancel).await.unwrap(), 5);
        assert!(matches!(rx.take(&cancel).await, Err(PipelineError::ChannelClosed)));

        let (tx, rx) = bounded::<u32>(2).unwrap();
        drop(rx);
        assert!(tx.is_closed());
        assert!(matches!(tx.put(1, &cancel).await, Err(PipelineError::ChannelClosed)));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_occupancy_never_exceeds_capacity(capacity in 1usize..64, extra in 1usize..8) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let cancel = CancellationToken::new();
                let (tx, mut rx) = bounded(capacity).unwrap();
                let mut accepted = 0usize;
                for i in 0..capacity + extra {
                    let put = tokio::time::timeout(Duration::from_millis(2), tx.put(i, &cancel)).await;
                    if put.is_ok() {
                        accepted += 1;
                    }
                    assert!(tx.len() <= capacity);
                }
                assert_eq!(accepted, capacity);
                assert_eq!(rx.len(), capacity);
                for expected in 0..capacity {
                    assert_eq!(rx.take(&cancel).await.unwrap(), expected);
                }
            });
        }
    }
}
