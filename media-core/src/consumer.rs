//! Consumer queue: per-subscriber bounded queue with drop-oldest-GOP
//! overflow policy and merged-write batching (spec §4.3).
//!
//! Single-producer (the Source, via `ConsumerQueue::push`) / single-consumer
//! (the subscriber's sender coroutine, via `ConsumerQueue::dequeue` /
//! `wait`). Per spec §5 "Cooperative yield hazards", `push` never yields —
//! it is a synchronous, lock-protected operation; only the sender task
//! awaits on output.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::jitter::{JitterCorrector, JitterMode};
use crate::packet::MediaPacket;
use crate::source::Source;

/// Opaque per-consumer identifier, used by the Source's consumer list and
/// to deregister the consumer on drop.
pub type ConsumerId = u64;

fn next_consumer_id() -> ConsumerId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

struct QueueState {
    packets: VecDeque<MediaPacket>,
    /// Set when the producer had to drop whole GOPs to stay under the
    /// duration cap; cleared the next time the consumer reads it.
    overflow: bool,
}

/// The shared buffer half of a consumer: owned strongly by the subscriber
/// side, referenced weakly by the Source for dispatch iteration (spec §9:
/// "Source holds non-owning back-references to consumers").
pub struct ConsumerQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    queue_duration_cap_ms: Mutex<i64>,
    paused: AtomicBool,
}

impl ConsumerQueue {
    fn new(queue_duration_cap_ms: i64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState {
                packets: VecDeque::new(),
                overflow: false,
            }),
            notify: Notify::new(),
            queue_duration_cap_ms: Mutex::new(queue_duration_cap_ms),
            paused: AtomicBool::new(false),
        })
    }

    pub fn set_queue_duration_cap(&self, cap_ms: i64) {
        *self.queue_duration_cap_ms.lock() = cap_ms;
    }

    /// Non-blocking, never yields. Called only by the Source.
    pub fn push(&self, packet: MediaPacket) {
        let cap = *self.queue_duration_cap_ms.lock();
        let mut state = self.state.lock();
        state.packets.push_back(packet);
        Self::enforce_cap(&mut state, cap);
        drop(state);
        self.notify.notify_waiters();
    }

    fn enforce_cap(state: &mut QueueState, cap_ms: i64) {
        if cap_ms <= 0 {
            return;
        }
        loop {
            let duration = match (state.packets.front(), state.packets.back()) {
                (Some(first), Some(last)) => last.dts - first.dts,
                _ => 0,
            };
            if duration <= cap_ms {
                break;
            }
            // Drop one whole GOP from the head: the leading packet plus
            // everything up to (not including) the next video keyframe.
            if state.packets.pop_front().is_none() {
                break;
            }
            while let Some(front) = state.packets.front() {
                if front.is_video() && front.is_keyframe {
                    break;
                }
                state.packets.pop_front();
            }
            state.overflow = true;
        }
    }

    /// Pop the next packet, if any, without blocking.
    pub fn try_dequeue(&self) -> Option<MediaPacket> {
        self.state.lock().packets.pop_front()
    }

    pub fn len(&self) -> usize {
        self.state.lock().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `true` if the producer has dropped packets to enforce the duration
    /// cap since this was last called; clears the flag.
    pub fn take_overflow(&self) -> bool {
        let mut state = self.state.lock();
        std::mem::replace(&mut state.overflow, false)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
        if !paused {
            self.notify.notify_waiters();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    fn span_and_len(&self) -> (i64, usize) {
        let state = self.state.lock();
        let span = match (state.packets.front(), state.packets.back()) {
            (Some(first), Some(last)) => last.dts - first.dts,
            _ => 0,
        };
        (span, state.packets.len())
    }

    /// Block until the queue holds at least `min_packets` AND spans at
    /// least `min_duration`, or a wakeup otherwise arrives (new data,
    /// unpause, shutdown). Reduces per-packet syscall overhead for slow
    /// clients (spec §4.3 "Merged-write wait").
    pub async fn wait(&self, min_packets: usize, min_duration_ms: i64) {
        loop {
            let (span, len) = self.span_and_len();
            if len >= min_packets && span >= min_duration_ms {
                return;
            }
            if len > 0 && min_packets == 0 && min_duration_ms == 0 {
                return;
            }
            let notified = self.notify.notified();
            // Re-check after registering for notification to avoid a
            // lost-wakeup race against a concurrent push.
            let (span, len) = self.span_and_len();
            if len >= min_packets && span >= min_duration_ms {
                return;
            }
            notified.await;
        }
    }

    /// Variant of `wait` bounded by a timeout so the sender coroutine never
    /// blocks forever on a stalled publisher.
    pub async fn wait_timeout(&self, min_packets: usize, min_duration_ms: i64, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.wait(min_packets, min_duration_ms)).await;
    }
}

/// A subscriber handle: the external play-side object returned by
/// `Source::create_consumer`.
pub struct Consumer {
    id: ConsumerId,
    source: Arc<Source>,
    queue: Arc<ConsumerQueue>,
    jitter: Mutex<JitterCorrector>,
    source_id_snapshot: Mutex<u64>,
}

impl Consumer {
    pub(crate) fn new(source: Arc<Source>, queue_duration_cap_ms: i64, jitter_mode: JitterMode, source_id: u64) -> (Arc<Self>, Arc<ConsumerQueue>) {
        let queue = ConsumerQueue::new(queue_duration_cap_ms);
        let consumer = Arc::new(Self {
            id: next_consumer_id(),
            source,
            queue: queue.clone(),
            jitter: Mutex::new(JitterCorrector::new(jitter_mode)),
            source_id_snapshot: Mutex::new(source_id),
        });
        (consumer, queue)
    }

    pub fn id(&self) -> ConsumerId {
        self.id
    }

    pub fn set_jitter_mode(&self, mode: JitterMode) {
        self.jitter.lock().set_mode(mode);
    }

    pub fn pause(&self) {
        self.queue.set_paused(true);
    }

    pub fn resume(&self) {
        self.queue.set_paused(false);
    }

    pub fn is_paused(&self) -> bool {
        self.queue.is_paused()
    }

    pub fn overflowed(&self) -> bool {
        self.queue.take_overflow()
    }

    /// Returns `Some(())` exactly once the first time the Source's
    /// generation diverges from the snapshot taken at consumer creation
    /// (spec §8 scenario 1: "a long-lived consumer observes a
    /// source-change notification exactly once").
    pub fn take_source_change(&self) -> bool {
        let current = self.source.source_id();
        let mut snapshot = self.source_id_snapshot.lock();
        if current != *snapshot {
            *snapshot = current;
            true
        } else {
            false
        }
    }

    /// Dequeue the next packet without blocking, applying this consumer's
    /// jitter correction. Returns `None` on an empty queue (spec §8
    /// boundary behavior) — never blocks.
    pub fn dequeue(&self) -> Option<MediaPacket> {
        if self.is_paused() {
            return None;
        }
        let mut packet = self.queue.try_dequeue()?;
        self.jitter.lock().correct(&mut packet);
        Some(packet)
    }

    pub async fn wait(&self, min_packets: usize, min_duration_ms: i64) {
        self.queue.wait(min_packets, min_duration_ms).await;
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.source.remove_consumer(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::CodecId;
    use bytes::Bytes;

    fn video(dts: i64, keyframe: bool) -> MediaPacket {
        MediaPacket::video(dts, 0, CodecId::Avc, keyframe, false, Bytes::new())
    }

    #[test]
    fn overflow_drops_whole_gops_not_partial() {
        let queue = ConsumerQueue::new(10);
        queue.push(video(0, true));
        queue.push(video(5, false));
        queue.push(video(12, true));
        queue.push(video(14, false));
        // span is now 14ms > cap(10): must drop the first whole GOP (dts 0,5)
        // and leave the second GOP (12,14) intact, not a partial GOP.
        assert!(queue.take_overflow());
        let remaining: Vec<i64> = std::iter::from_fn(|| queue.try_dequeue()).map(|p| p.dts).collect();
        assert_eq!(remaining, vec![12, 14]);
    }

    #[test]
    fn empty_dequeue_returns_none_without_blocking() {
        let queue = ConsumerQueue::new(1000);
        assert!(queue.try_dequeue().is_none());
    }

    #[tokio::test]
    async fn wait_returns_once_threshold_met() {
        let queue = ConsumerQueue::new(1_000_000);
        let q2 = queue.clone();
        let handle = tokio::spawn(async move {
            q2.wait(2, 5).await;
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(video(0, true));
        queue.push(video(10, false));
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("wait should resolve")
            .unwrap();
    }
}
