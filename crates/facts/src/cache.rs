//! 事实模型缓存 - 同一标识至多一个并发提取

use crate::extract::{BuildConfig, ExtractionError, FactExtractor, Result};
use crate::identity::SourceIdentity;
use crate::model::FactModel;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

type Outcome = Result<Arc<FactModel>>;

/// 缓存统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub extractions: u64,
}

enum Slot {
    /// 提取进行中，等待者订阅结果
    InFlight {
        flight: u64,
        rx: watch::Receiver<Option<Outcome>>,
    },
    /// 已完成 (成功或失败)，失败同样缓存并重放
    Ready { outcome: Outcome, last_used: u64 },
}

/// 缓存键: 宽松模式下语法错误不会失败，结果与严格模式不同
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    identity: SourceIdentity,
    lenient: bool,
}

impl CacheKey {
    fn new(identity: &SourceIdentity, config: &BuildConfig) -> Self {
        Self {
            identity: identity.clone(),
            lenient: config.lenient,
        }
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, Slot>,
    tick: u64,
    next_flight: u64,
}

enum Action {
    Done(Outcome),
    Wait(watch::Receiver<Option<Outcome>>),
    Lead(watch::Sender<Option<Outcome>>, u64),
}

/// 事实模型缓存
///
/// 按 [`SourceIdentity`] 和宽松模式记忆提取结果，LRU 淘汰 (进行中的条目不会被淘汰)。
/// 内部锁从不跨 `.await` 持有。
pub struct FactModelCache {
    extractor: Arc<dyn FactExtractor>,
    capacity: usize,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
    extractions: AtomicU64,
}

impl FactModelCache {
    pub fn new(extractor: Arc<dyn FactExtractor>, capacity: usize) -> Self {
        Self {
            extractor,
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            extractions: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // 锁内没有会 panic 的用户代码，中毒时直接继续使用
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 获取事实模型；同一标识的并发调用共享一次提取
    pub async fn get(&self, identity: &SourceIdentity, config: &BuildConfig) -> Outcome {
        let key = CacheKey::new(identity, config);
        loop {
            let action = {
                let mut state = self.lock();
                state.tick += 1;
                let tick = state.tick;
                match state.entries.get_mut(&key) {
                    Some(Slot::Ready { outcome, last_used }) => {
                        *last_used = tick;
                        Action::Done(outcome.clone())
                    }
                    Some(Slot::InFlight { rx, .. }) => Action::Wait(rx.clone()),
                    None => {
                        let flight = state.next_flight;
                        state.next_flight += 1;
                        let (tx, rx) = watch::channel(None);
                        state.entries.insert(key.clone(), Slot::InFlight { flight, rx });
                        Action::Lead(tx, flight)
                    }
                }
            };

            match action {
                Action::Done(outcome) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Cache hit for {}", identity);
                    return outcome;
                }
                Action::Wait(mut rx) => {
                    tracing::debug!("Waiting for in-flight extraction of {}", identity);
                    let shared = match rx.wait_for(Option::is_some).await {
                        Ok(value) => value.clone(),
                        // leader 放弃了提取，重新竞争
                        Err(_) => None,
                    };
                    if let Some(outcome) = shared {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        return outcome;
                    }
                }
                Action::Lead(tx, flight) => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    let guard = FlightGuard {
                        cache: self,
                        key: &key,
                        flight,
                        armed: true,
                    };
                    let outcome = self.run_extraction(identity, config).await;
                    self.complete(&key, flight, outcome.clone());
                    guard.disarm();
                    let _ = tx.send(Some(outcome.clone()));
                    return outcome;
                }
            }
        }
    }

    async fn run_extraction(&self, identity: &SourceIdentity, config: &BuildConfig) -> Outcome {
        self.extractions.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("Cache miss for {}, extracting", identity);

        let extractor = Arc::clone(&self.extractor);
        let path = identity.path().to_path_buf();
        let config = config.clone();
        let task_path = path.clone();

        match tokio::task::spawn_blocking(move || extractor.extract(&task_path, &config)).await {
            Ok(result) => result.map(Arc::new),
            Err(e) => Err(ExtractionError::new(path, format!("extraction task failed: {e}"))),
        }
    }

    fn complete(&self, key: &CacheKey, flight: u64, outcome: Outcome) {
        let mut state = self.lock();
        let current = matches!(
            state.entries.get(key),
            Some(Slot::InFlight { flight: f, .. }) if *f == flight
        );
        if !current {
            return;
        }
        if let Err(e) = &outcome {
            tracing::warn!("{}", e);
        }
        state.tick += 1;
        let last_used = state.tick;
        state
            .entries
            .insert(key.clone(), Slot::Ready { outcome, last_used });
        Self::evict(&mut state, self.capacity);
    }

    /// 淘汰最久未使用的已完成条目
    fn evict(state: &mut CacheState, capacity: usize) {
        while state.entries.len() > capacity {
            let victim = state
                .entries
                .iter()
                .filter_map(|(id, slot)| match slot {
                    Slot::Ready { last_used, .. } => Some((*last_used, id)),
                    Slot::InFlight { .. } => None,
                })
                .min_by_key(|(last_used, _)| *last_used)
                .map(|(_, id)| id.clone());

            match victim {
                Some(key) => {
                    tracing::debug!("Evicting {}", key.identity);
                    state.entries.remove(&key);
                }
                // 全部在进行中，暂时超出容量
                None => break,
            }
        }
    }

    /// 移除该标识已完成的条目 (包括缓存的失败，两种模式都移除)；进行中的条目不受影响
    pub fn invalidate(&self, identity: &SourceIdentity) -> bool {
        let mut state = self.lock();
        let before = state.entries.len();
        state
            .entries
            .retain(|key, slot| key.identity != *identity || matches!(slot, Slot::InFlight { .. }));
        state.entries.len() < before
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            extractions: self.extractions.load(Ordering::Relaxed),
        }
    }
}

/// leader 的 future 被丢弃时移除进行中的条目，让等待者接管
struct FlightGuard<'c> {
    cache: &'c FactModelCache,
    key: &'c CacheKey,
    flight: u64,
    armed: bool,
}

impl FlightGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.cache.lock();
        let current = matches!(
            state.entries.get(self.key),
            Some(Slot::InFlight { flight, .. }) if *flight == self.flight
        );
        if current {
            tracing::debug!("Extraction of {} abandoned", self.key.identity);
            state.entries.remove(self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// 计数并可配置失败/延迟的提取器
    struct CountingExtractor {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl CountingExtractor {
        fn new(delay: Duration, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                fail,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl FactExtractor for CountingExtractor {
        fn extract(&self, path: &Path, _config: &BuildConfig) -> Result<FactModel> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if self.fail {
                return Err(ExtractionError::new(path, "unparsable"));
            }
            let mut b = FactModel::builder();
            b.add_entity(crate::EntityKind::Unit, &path.to_string_lossy());
            Ok(b.build().unwrap())
        }
    }

    fn identity(name: &str, digest: &str) -> SourceIdentity {
        SourceIdentity::new(format!("/sketches/{name}"), digest)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_gets_share_one_extraction() {
        let extractor = CountingExtractor::new(Duration::from_millis(100), false);
        let cache = Arc::new(FactModelCache::new(extractor.clone(), 8));
        let id = identity("blink", "aaaa");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                cache.get(&id, &BuildConfig::default()).await
            }));
        }

        let mut models = Vec::new();
        for handle in handles {
            models.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(extractor.calls(), 1);
        assert!(models.iter().all(|m| Arc::ptr_eq(m, &models[0])));
        assert_eq!(cache.stats().extractions, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_distinct_identities_extract_independently() {
        let extractor = CountingExtractor::new(Duration::from_millis(20), false);
        let cache = FactModelCache::new(extractor.clone(), 8);
        let config = BuildConfig::default();

        let a = identity("a", "1");
        let b = identity("b", "1");
        let (ra, rb) = tokio::join!(cache.get(&a, &config), cache.get(&b, &config));
        assert!(ra.is_ok() && rb.is_ok());
        assert_eq!(extractor.calls(), 2);
    }

    #[tokio::test]
    async fn test_failure_is_replayed_until_invalidated() {
        let extractor = CountingExtractor::new(Duration::ZERO, true);
        let cache = FactModelCache::new(extractor.clone(), 8);
        let config = BuildConfig::default();
        let id = identity("broken", "1");

        let first = cache.get(&id, &config).await.unwrap_err();
        let second = cache.get(&id, &config).await.unwrap_err();
        assert_eq!(first, second);
        assert_eq!(extractor.calls(), 1);

        assert!(cache.invalidate(&id));
        assert!(cache.get(&id, &config).await.is_err());
        assert_eq!(extractor.calls(), 2);
    }

    #[tokio::test]
    async fn test_changed_identity_retries() {
        let extractor = CountingExtractor::new(Duration::ZERO, true);
        let cache = FactModelCache::new(extractor.clone(), 8);
        let config = BuildConfig::default();

        let _ = cache.get(&identity("sketch", "v1"), &config).await;
        let _ = cache.get(&identity("sketch", "v2"), &config).await;
        assert_eq!(extractor.calls(), 2);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let extractor = CountingExtractor::new(Duration::ZERO, false);
        let cache = FactModelCache::new(extractor.clone(), 2);
        let config = BuildConfig::default();
        let (a, b, c) = (identity("a", "1"), identity("b", "1"), identity("c", "1"));

        cache.get(&a, &config).await.unwrap();
        cache.get(&b, &config).await.unwrap();
        // 访问 a，使 b 成为最久未使用
        cache.get(&a, &config).await.unwrap();
        cache.get(&c, &config).await.unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(extractor.calls(), 3);

        cache.get(&a, &config).await.unwrap();
        assert_eq!(extractor.calls(), 3);
        cache.get(&b, &config).await.unwrap();
        assert_eq!(extractor.calls(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_abandoned_leader_is_taken_over() {
        let extractor = CountingExtractor::new(Duration::from_millis(200), false);
        let cache = Arc::new(FactModelCache::new(extractor.clone(), 8));
        let id = identity("slow", "1");
        let config = BuildConfig::default();

        // leader 超时放弃
        let leader = tokio::time::timeout(Duration::from_millis(20), cache.get(&id, &config)).await;
        assert!(leader.is_err());
        assert!(cache.is_empty());

        let model = cache.get(&id, &config).await;
        assert!(model.is_ok());
        assert_eq!(extractor.calls(), 2);
    }

    /// 路径含 "slow" 时延迟，严格模式下对 "broken" 失败
    struct SelectiveExtractor {
        calls: AtomicUsize,
    }

    impl FactExtractor for SelectiveExtractor {
        fn extract(&self, path: &Path, config: &BuildConfig) -> Result<FactModel> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let name = path.to_string_lossy();
            if name.contains("slow") {
                std::thread::sleep(Duration::from_millis(200));
            }
            if name.contains("broken") && !config.lenient {
                return Err(ExtractionError::new(path, "syntax error at line 1, column 1"));
            }
            let mut b = FactModel::builder();
            b.add_entity(crate::EntityKind::Unit, &name);
            Ok(b.build().unwrap())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_in_flight_entry_survives_eviction() {
        let extractor = Arc::new(SelectiveExtractor {
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(FactModelCache::new(extractor.clone(), 1));
        let config = BuildConfig::default();
        let slow = identity("slow", "1");
        let fast = identity("fast", "1");

        let mut waiters = Vec::new();
        for _ in 0..2 {
            let cache = Arc::clone(&cache);
            let slow = slow.clone();
            waiters.push(tokio::spawn(async move {
                cache.get(&slow, &BuildConfig::default()).await
            }));
        }
        tokio::time::sleep(Duration::from_millis(30)).await;

        // 容量为 1: 完成的条目被淘汰，进行中的条目保留
        cache.get(&fast, &config).await.unwrap();
        {
            let state = cache.lock();
            assert_eq!(state.entries.len(), 1);
            let key = CacheKey::new(&slow, &config);
            assert!(matches!(state.entries.get(&key), Some(Slot::InFlight { .. })));
        }

        let mut models = Vec::new();
        for waiter in waiters {
            models.push(waiter.await.unwrap().unwrap());
        }
        assert!(Arc::ptr_eq(&models[0], &models[1]));
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_lenient_get_does_not_replay_strict_failure() {
        let extractor = Arc::new(SelectiveExtractor {
            calls: AtomicUsize::new(0),
        });
        let cache = FactModelCache::new(extractor.clone(), 8);
        let id = identity("broken", "1");
        let strict = BuildConfig::default();
        let lenient = BuildConfig::default().with_lenient(true);

        assert!(cache.get(&id, &strict).await.is_err());
        assert!(cache.get(&id, &lenient).await.is_ok());
        assert!(cache.get(&id, &strict).await.is_err());
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 2);

        // 两种模式的条目一起失效
        assert!(cache.invalidate(&id));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_invalidate_unknown_identity() {
        let extractor = CountingExtractor::new(Duration::ZERO, false);
        let cache = FactModelCache::new(extractor, 0);
        assert_eq!(cache.capacity(), 1);
        assert!(!cache.invalidate(&identity("missing", "0")));
    }
}
