//! Source: the per-stream fan-out hub (spec §3, §4.2).

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::consumer::{Consumer, ConsumerId, ConsumerQueue};
use crate::error::{CoreError, Result};
use crate::gop::GopCache;
use crate::hooks::{HookPayload, HookWorker};
use crate::identity::StreamIdentity;
use crate::jitter::JitterMode;
use crate::metadata::MetadataCache;
use crate::mixqueue::MixQueue;
use crate::packager::PackagerHandle;
use crate::packet::{MediaPacket, PacketType};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Policy applied when admitting a new consumer (spec §4.2 "three-flag
/// policy").
#[derive(Debug, Clone, Copy)]
pub struct WarmStartPolicy {
    pub dump_metadata: bool,
    pub dump_sequence_headers: bool,
    pub dump_gop_cache: bool,
}

impl Default for WarmStartPolicy {
    fn default() -> Self {
        Self {
            dump_metadata: true,
            dump_sequence_headers: true,
            dump_gop_cache: true,
        }
    }
}

struct Inner {
    identity: StreamIdentity,
    publisher_present: AtomicBool,
    source_id: AtomicU64,
    last_activity_ms: AtomicI64,
    metadata: Mutex<MetadataCache>,
    gop: Mutex<GopCache>,
    mix_correct: AtomicBool,
    mix_queue: Mutex<MixQueue>,
    consumers: DashMap<ConsumerId, Weak<ConsumerQueue>>,
    packagers: Mutex<Vec<PackagerHandle>>,
    queue_duration_cap_ms: AtomicI64,
    warm_start: Mutex<WarmStartPolicy>,
    hooks: Option<Arc<HookWorker>>,
}

/// Per-stream fan-out hub. Cheap to clone (it is always handed out wrapped
/// in `Arc`); holds no consumer strong references (spec §9).
#[derive(Clone)]
pub struct Source {
    inner: Arc<Inner>,
}

impl Source {
    pub fn new(identity: StreamIdentity, hooks: Option<Arc<HookWorker>>) -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(Inner {
                identity,
                publisher_present: AtomicBool::new(false),
                source_id: AtomicU64::new(0),
                last_activity_ms: AtomicI64::new(now_ms()),
                metadata: Mutex::new(MetadataCache::new()),
                gop: Mutex::new(GopCache::new()),
                mix_correct: AtomicBool::new(false),
                mix_queue: Mutex::new(MixQueue::new()),
                consumers: DashMap::new(),
                packagers: Mutex::new(Vec::new()),
                queue_duration_cap_ms: AtomicI64::new(30_000),
                warm_start: Mutex::new(WarmStartPolicy::default()),
                hooks,
            }),
        })
    }

    pub fn identity(&self) -> &StreamIdentity {
        &self.inner.identity
    }

    pub fn source_id(&self) -> u64 {
        self.inner.source_id.load(Ordering::Acquire)
    }

    pub fn is_published(&self) -> bool {
        self.inner.publisher_present.load(Ordering::Acquire)
    }

    pub fn last_activity_ms(&self) -> i64 {
        self.inner.last_activity_ms.load(Ordering::Relaxed)
    }

    fn touch(&self) {
        self.inner.last_activity_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn set_mix_correct(&self, enabled: bool) {
        self.inner.mix_correct.store(enabled, Ordering::Relaxed);
    }

    pub fn set_queue_duration_cap_ms(&self, cap_ms: i64) {
        self.inner.queue_duration_cap_ms.store(cap_ms, Ordering::Relaxed);
    }

    pub fn set_warm_start_policy(&self, policy: WarmStartPolicy) {
        *self.inner.warm_start.lock() = policy;
    }

    pub fn add_packager(&self, packager: PackagerHandle) {
        self.inner.packagers.lock().push(packager);
    }

    pub fn packagers(&self) -> Vec<PackagerHandle> {
        self.inner.packagers.lock().clone()
    }

    pub fn has_active_packagers(&self) -> bool {
        !self.inner.packagers.lock().is_empty()
    }

    pub fn consumer_count(&self) -> usize {
        self.prune_dead_consumers();
        self.inner.consumers.len()
    }

    fn prune_dead_consumers(&self) {
        self.inner.consumers.retain(|_, weak| weak.strong_count() > 0);
    }

    /// Transition to published. Fails if already published (spec §4.2,
    /// §8 invariant: at most one publisher per stream at any instant).
    pub async fn on_publish(self: &Arc<Self>) -> Result<()> {
        if self.inner.publisher_present.swap(true, Ordering::AcqRel) {
            self.inner.publisher_present.store(true, Ordering::Release);
            return Err(CoreError::AlreadyPublished(self.identity().to_string()));
        }
        self.inner.source_id.fetch_add(1, Ordering::AcqRel);
        self.inner.metadata.lock().clear();
        self.inner.gop.lock().clear();
        self.touch();

        let metadata_snapshot = self.inner.metadata.lock().clone();
        for packager in self.packagers() {
            packager.on_publish(self.identity(), &metadata_snapshot).await;
        }
        if let Some(hooks) = &self.inner.hooks {
            hooks.enqueue(HookPayload::on_publish(self.identity()));
        }
        Ok(())
    }

    /// Flush packagers and clear publisher-present. Consumers are not
    /// evicted; they observe EOF semantics until the next publish.
    pub async fn on_unpublish(self: &Arc<Self>) {
        if !self.inner.publisher_present.swap(false, Ordering::AcqRel) {
            return;
        }
        for packager in self.packagers() {
            packager.on_unpublish(self.identity()).await;
        }
        self.inner.mix_queue.lock().drain();
        if let Some(hooks) = &self.inner.hooks {
            hooks.enqueue(HookPayload::on_unpublish(self.identity()));
        }
    }

    /// Apply the packet-ingress ordering of spec §4.2:
    /// 1. script tag -> update metadata, dispatch
    /// 2. sequence header -> replace metadata slot, dispatch
    /// 3. keyframe -> clear GOP cache before appending; else append
    /// 4. push to every consumer queue and every packager
    pub async fn on_packet(self: &Arc<Self>, packet: MediaPacket) -> Result<()> {
        if !self.is_published() {
            return Err(CoreError::NotPublished(self.identity().to_string()));
        }
        self.touch();

        if self.inner.mix_correct.load(Ordering::Relaxed) {
            let mut mq = self.inner.mix_queue.lock();
            if let Some(ready) = mq.push(packet) {
                drop(mq);
                self.dispatch(ready).await;
            }
        } else {
            self.dispatch(packet).await;
        }
        Ok(())
    }

    async fn dispatch(self: &Arc<Self>, packet: MediaPacket) {
        match packet.kind {
            PacketType::Script => {
                self.inner.metadata.lock().update_script(packet.clone());
            }
            PacketType::Video if packet.is_sequence_header => {
                self.inner.metadata.lock().update_video_sh(packet.clone());
            }
            PacketType::Audio if packet.is_sequence_header => {
                self.inner.metadata.lock().update_audio_sh(packet.clone());
            }
            _ => {}
        }
        self.inner.gop.lock().cache(&packet);

        self.prune_dead_consumers();
        for entry in self.inner.consumers.iter() {
            if let Some(queue) = entry.value().upgrade() {
                queue.push(packet.clone());
            }
        }

        for packager in self.packagers() {
            packager.on_packet(self.identity(), &packet).await;
        }
    }

    /// Admit a new consumer, warm-starting its queue from the current
    /// metadata and GOP cache so a player doesn't need to wait for the
    /// next keyframe (spec §4.2, §8 scenario 5).
    pub fn create_consumer(self: &Arc<Self>) -> Arc<Consumer> {
        self.create_consumer_with(JitterMode::Off)
    }

    pub fn create_consumer_with(self: &Arc<Self>, jitter_mode: JitterMode) -> Arc<Consumer> {
        let cap = self.inner.queue_duration_cap_ms.load(Ordering::Relaxed);
        let (consumer, queue) = Consumer::new(self.clone(), cap, jitter_mode, self.source_id());

        let policy = *self.inner.warm_start.lock();
        let metadata = self.inner.metadata.lock();
        for packet in metadata.warm_start(policy.dump_metadata, policy.dump_sequence_headers) {
            queue.push(packet);
        }
        drop(metadata);
        if policy.dump_gop_cache {
            for packet in self.inner.gop.lock().packets() {
                queue.push(packet.clone());
            }
        }

        self.inner
            .consumers
            .insert(consumer.id(), Arc::downgrade(&queue));
        consumer
    }

    /// Called from `Consumer::drop` — the explicit destructor-side removal
    /// that resolves the Source/Consumer cycle (spec §9).
    pub(crate) fn remove_consumer(&self, id: ConsumerId) {
        self.inner.consumers.remove(&id);
    }

    /// Eligible for eviction per spec §4.1: no publisher, no consumers, no
    /// active packagers, idle beyond `idle_timeout_ms`.
    pub fn evictable(&self, idle_timeout_ms: i64) -> bool {
        !self.is_published()
            && self.consumer_count() == 0
            && !self.has_active_packagers()
            && now_ms().saturating_sub(self.last_activity_ms()) > idle_timeout_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::CodecId;
    use bytes::Bytes;

    fn identity() -> StreamIdentity {
        StreamIdentity::default_vhost("live", "a")
    }

    #[tokio::test]
    async fn republish_bumps_source_id_strictly() {
        let source = Source::new(identity(), None);
        source.on_publish().await.unwrap();
        let first = source.source_id();
        source.on_unpublish().await;
        source.on_publish().await.unwrap();
        let second = source.source_id();
        assert!(second > first);
    }

    #[tokio::test]
    async fn double_publish_fails() {
        let source = Source::new(identity(), None);
        source.on_publish().await.unwrap();
        assert!(source.on_publish().await.is_err());
    }

    #[tokio::test]
    async fn packet_before_publish_is_rejected() {
        let source = Source::new(identity(), None);
        let packet = MediaPacket::video(0, 0, CodecId::Avc, true, false, Bytes::new());
        assert!(source.on_packet(packet).await.is_err());
    }

    #[tokio::test]
    async fn consumer_warm_start_dumps_gop_then_is_live() {
        let source = Source::new(identity(), None);
        source.on_publish().await.unwrap();
        source
            .on_packet(MediaPacket::video(0, 0, CodecId::Avc, true, true, Bytes::from_static(b"sh")))
            .await
            .unwrap();
        source
            .on_packet(MediaPacket::video(10, 0, CodecId::Avc, false, false, Bytes::from_static(b"p")))
            .await
            .unwrap();

        let consumer = source.create_consumer();
        let first = consumer.dequeue().unwrap();
        assert!(first.is_sequence_header);
        let second = consumer.dequeue().unwrap();
        assert!(second.is_keyframe);
    }

    #[tokio::test]
    async fn consumer_drop_removes_itself_from_source() {
        let source = Source::new(identity(), None);
        source.on_publish().await.unwrap();
        let consumer = source.create_consumer();
        assert_eq!(source.consumer_count(), 1);
        drop(consumer);
        assert_eq!(source.consumer_count(), 0);
    }
}
