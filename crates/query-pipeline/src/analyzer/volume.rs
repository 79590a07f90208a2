//! 쿼리량 이상 분석기
//!
//! 사용자(없으면 `__anonymous__`)별로 최근 `window` 동안의 쿼리 시각을 보관하고,
//! 개수가 `max(absolute_floor, baseline_multiplier × baseline)`을 넘으면 판정합니다.
//!
//! 기준선은 키의 첫 이벤트에 맞춘 고정(tumbling) 윈도우가 끝날 때마다 EWMA로
//! 갱신됩니다. 첫 윈도우가 끝나기 전에는 판정하지 않습니다. 건너뛴 빈 윈도우는
//! 기준선을 `(1 - alpha)^n`만큼 감쇠시키며, `reset_after_empty_windows`에 도달하면
//! 기준선을 버리고 다시 학습합니다.
//!
//! 메타데이터에 시각이 없으면 분석기 생성 시점 기준의 단조 시계를 씁니다.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use querywatch_core::config::{ANALYZER_VOLUME_ANOMALY, VolumeConfig};
use querywatch_core::error::AnalyzerError;
use querywatch_core::metrics as m;
use querywatch_core::pipeline::Analyzer;
use querywatch_core::types::{Finding, Query, Severity};

use crate::error::QueryPipelineError;

/// 사용자 정보가 없는 쿼리의 그룹 키
pub const ANONYMOUS_KEY: &str = "__anonymous__";

#[derive(Debug, Clone)]
struct Settings {
    window: Duration,
    multiplier: f64,
    floor: usize,
    alpha: f64,
    reset_after: u32,
    max_keys: usize,
}

/// 키 하나의 윈도우 상태
#[derive(Debug)]
struct KeyWindow {
    /// 시간순으로 정렬된 보관 이벤트
    events: VecDeque<Duration>,
    newest: Duration,
    /// 현재 tumbling 윈도우 시작 시각
    window_start: Duration,
    /// 현재 tumbling 윈도우에 들어온 이벤트 수
    window_count: usize,
    baseline: Option<f64>,
    /// 연속 빈 윈도우 수
    empty_windows: u32,
    /// 키 맵에서 제거됨. 이 창에 기록하면 관측이 사라집니다.
    evicted: bool,
}

enum Observation {
    /// 보관 범위보다 오래된 이벤트
    Late,
    Counted { count: usize, baseline: Option<f64> },
}

impl KeyWindow {
    fn new(first: Duration) -> Self {
        Self {
            events: VecDeque::new(),
            newest: first,
            window_start: first,
            window_count: 0,
            baseline: None,
            empty_windows: 0,
            evicted: false,
        }
    }

    fn observe(&mut self, t: Duration, settings: &Settings) -> Observation {
        let newest = self.newest.max(t);
        let horizon = newest.saturating_sub(settings.window);
        if t < horizon {
            return Observation::Late;
        }

        self.roll(t, settings);
        if t >= self.window_start {
            self.window_count += 1;
        }

        self.newest = newest;
        while self.events.front().is_some_and(|e| *e < horizon) {
            self.events.pop_front();
        }
        let at = self.events.partition_point(|e| *e <= t);
        self.events.insert(at, t);

        Observation::Counted {
            count: self.events.len(),
            baseline: self.baseline,
        }
    }

    /// `t`까지 끝난 tumbling 윈도우를 기준선에 반영합니다.
    fn roll(&mut self, t: Duration, settings: &Settings) {
        if t < self.window_start + settings.window {
            return;
        }
        let elapsed = (t - self.window_start).as_nanos() / settings.window.as_nanos();
        let elapsed = u32::try_from(elapsed).unwrap_or(u32::MAX);

        let completed = std::mem::take(&mut self.window_count);
        if completed == 0 {
            self.decay(1, settings);
        } else {
            let count = completed as f64;
            self.baseline = Some(match self.baseline {
                None => count,
                Some(b) => settings.alpha * count + (1.0 - settings.alpha) * b,
            });
            self.empty_windows = 0;
        }
        if elapsed > 1 {
            self.decay(elapsed - 1, settings);
        }

        self.window_start += settings.window.saturating_mul(elapsed);
    }

    fn decay(&mut self, empty: u32, settings: &Settings) {
        self.empty_windows = self.empty_windows.saturating_add(empty);
        let factor = (1.0 - settings.alpha).powi(i32::try_from(empty).unwrap_or(i32::MAX));
        self.baseline = self.baseline.map(|b| b * factor);
        if settings.reset_after > 0 && self.empty_windows >= settings.reset_after {
            self.baseline = None;
            self.empty_windows = 0;
        }
    }
}

struct KeySlot {
    /// 가장 최근 이벤트 시각 (마이크로초), 키 제거 순서 결정용
    last_seen: AtomicU64,
    window: Mutex<KeyWindow>,
}

/// 쿼리량 이상 분석기
pub struct VolumeAnomalyAnalyzer {
    settings: Settings,
    keys: RwLock<HashMap<String, Arc<KeySlot>>>,
    origin_wall: Duration,
    origin: Instant,
}

impl VolumeAnomalyAnalyzer {
    /// 설정으로 분석기를 생성합니다.
    pub fn new(config: &VolumeConfig) -> Result<Self, QueryPipelineError> {
        if config.window_secs == 0 {
            return Err(QueryPipelineError::config(
                "volume.window_secs",
                "must be greater than 0",
            ));
        }
        if !config.baseline_multiplier.is_finite() || config.baseline_multiplier <= 0.0 {
            return Err(QueryPipelineError::config(
                "volume.baseline_multiplier",
                "must be a positive finite number",
            ));
        }
        if config.absolute_floor == 0 {
            return Err(QueryPipelineError::config(
                "volume.absolute_floor",
                "must be greater than 0",
            ));
        }
        if !(config.ewma_alpha > 0.0 && config.ewma_alpha <= 1.0) {
            return Err(QueryPipelineError::config(
                "volume.ewma_alpha",
                "must be in (0, 1]",
            ));
        }
        if config.max_tracked_keys == 0 {
            return Err(QueryPipelineError::config(
                "volume.max_tracked_keys",
                "must be greater than 0",
            ));
        }

        Ok(Self {
            settings: Settings {
                window: Duration::from_secs(config.window_secs),
                multiplier: config.baseline_multiplier,
                floor: config.absolute_floor,
                alpha: config.ewma_alpha,
                reset_after: config.reset_after_empty_windows,
                max_keys: config.max_tracked_keys,
            },
            keys: RwLock::new(HashMap::new()),
            origin_wall: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default(),
            origin: Instant::now(),
        })
    }

    /// 추적 중인 키 수
    pub fn tracked_keys(&self) -> usize {
        self.keys.read().map(|keys| keys.len()).unwrap_or(0)
    }

    /// 키의 현재 기준선 (학습 전이면 `None`)
    pub fn baseline(&self, key: &str) -> Option<f64> {
        let slot = self.keys.read().ok()?.get(key).cloned()?;
        let window = slot.window.lock().ok()?;
        window.baseline
    }

    /// 단조 증가하는 대체 시계
    fn fallback_now(&self) -> Duration {
        self.origin_wall + self.origin.elapsed()
    }

    fn event_time(&self, query: &Query) -> Duration {
        match query.metadata().timestamp {
            Some(ts) => ts.duration_since(UNIX_EPOCH).unwrap_or_default(),
            None => self.fallback_now(),
        }
    }

    fn state_error(reason: &str) -> AnalyzerError {
        AnalyzerError::State {
            analyzer: ANALYZER_VOLUME_ANOMALY.to_owned(),
            reason: reason.to_owned(),
        }
    }

    fn slot(&self, key: &str, t: Duration) -> Result<Arc<KeySlot>, AnalyzerError> {
        if let Some(slot) = self
            .keys
            .read()
            .map_err(|_| Self::state_error("key map lock poisoned"))?
            .get(key)
        {
            return Ok(Arc::clone(slot));
        }

        let mut keys = self
            .keys
            .write()
            .map_err(|_| Self::state_error("key map lock poisoned"))?;
        if let Some(slot) = keys.get(key) {
            return Ok(Arc::clone(slot));
        }

        self.enforce_key_limit(&mut keys);
        let slot = Arc::new(KeySlot {
            last_seen: AtomicU64::new(micros(t)),
            window: Mutex::new(KeyWindow::new(t)),
        });
        keys.insert(key.to_owned(), Arc::clone(&slot));
        metrics::gauge!(m::VOLUME_TRACKED_KEYS).set(keys.len() as f64);
        Ok(slot)
    }

    /// 키 수가 상한에 도달하면 가장 오래 조용했던 키를 제거합니다.
    fn enforce_key_limit(&self, keys: &mut HashMap<String, Arc<KeySlot>>) {
        while keys.len() >= self.settings.max_keys {
            let Some(idle) = keys
                .iter()
                .min_by_key(|(_, slot)| slot.last_seen.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone())
            else {
                return;
            };
            tracing::debug!(key = %idle, max = self.settings.max_keys, "evicting idle volume key");
            if let Some(slot) = keys.remove(&idle) {
                slot.window
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .evicted = true;
            }
        }
    }

    /// 키의 창에 이벤트를 기록합니다.
    ///
    /// 슬롯을 찾은 뒤 창을 잠그기 전에 제거된 경우 새 슬롯으로 다시 시도합니다.
    fn observe(&self, key: &str, t: Duration) -> Result<Observation, AnalyzerError> {
        loop {
            let slot = self.slot(key, t)?;
            let mut window = slot
                .window
                .lock()
                .map_err(|_| Self::state_error("key window lock poisoned"))?;
            if window.evicted {
                continue;
            }
            slot.last_seen.fetch_max(micros(t), Ordering::Relaxed);
            return Ok(window.observe(t, &self.settings));
        }
    }

    fn severity(ratio: f64) -> Severity {
        if ratio <= 2.0 {
            Severity::Medium
        } else if ratio <= 4.0 {
            Severity::High
        } else {
            Severity::Critical
        }
    }
}

fn micros(t: Duration) -> u64 {
    u64::try_from(t.as_micros()).unwrap_or(u64::MAX)
}

impl Analyzer for VolumeAnomalyAnalyzer {
    fn name(&self) -> &str {
        ANALYZER_VOLUME_ANOMALY
    }

    fn analyze(&self, query: &Query) -> Result<Option<Finding>, AnalyzerError> {
        let key = query
            .metadata()
            .user_id
            .as_deref()
            .unwrap_or(ANONYMOUS_KEY);
        let t = self.event_time(query);

        let (count, baseline) = match self.observe(key, t)? {
            Observation::Late => {
                tracing::debug!(key, "late event outside volume window dropped");
                metrics::counter!(m::VOLUME_LATE_EVENTS_DROPPED_TOTAL).increment(1);
                return Ok(None);
            }
            Observation::Counted { count, baseline } => (count, baseline),
        };

        // 첫 윈도우가 끝나기 전에는 판정하지 않음
        let Some(baseline) = baseline else {
            return Ok(None);
        };

        let threshold = (self.settings.floor as f64).max(self.settings.multiplier * baseline);
        if (count as f64) <= threshold {
            return Ok(None);
        }

        let severity = Self::severity(count as f64 / threshold);
        Ok(Some(
            Finding::new(
                ANALYZER_VOLUME_ANOMALY,
                severity,
                format!(
                    "{count} queries from '{key}' within {}s exceeds threshold {threshold:.1}",
                    self.settings.window.as_secs()
                ),
            )
            .with_pattern("volume_spike")
            .with_detail("key", key)
            .with_detail("count", count.to_string())
            .with_detail("threshold", format!("{threshold:.1}"))
            .with_detail("baseline", format!("{baseline:.1}")),
        ))
    }
}

#[cfg(test)]
mod tests {
    use querywatch_core::types::QueryMetadata;

    use super::*;

    fn config(window_secs: u64, floor: usize, multiplier: f64) -> VolumeConfig {
        VolumeConfig {
            window_secs,
            baseline_multiplier: multiplier,
            absolute_floor: floor,
            ewma_alpha: 0.3,
            reset_after_empty_windows: 0,
            max_tracked_keys: 100,
        }
    }

    fn at(user: Option<&str>, secs: u64) -> Query {
        Query::new(
            "SELECT 1",
            QueryMetadata {
                user_id: user.map(str::to_owned),
                timestamp: Some(UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs)),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn retained(analyzer: &VolumeAnomalyAnalyzer, key: &str) -> usize {
        let keys = analyzer.keys.read().unwrap();
        keys[key].window.lock().unwrap().events.len()
    }

    #[test]
    fn cold_start_never_fires() {
        let analyzer = VolumeAnomalyAnalyzer::new(&config(60, 1, 1.0)).unwrap();
        for i in 0..50 {
            let result = analyzer.analyze(&at(Some("alice"), i % 10)).unwrap();
            assert!(result.is_none());
        }
        assert_eq!(analyzer.baseline("alice"), None);
    }

    #[test]
    fn fires_when_count_crosses_threshold() {
        let analyzer = VolumeAnomalyAnalyzer::new(&config(60, 3, 2.0)).unwrap();
        for t in 0..5 {
            assert!(analyzer.analyze(&at(Some("alice"), t)).unwrap().is_none());
        }

        // t=65: 첫 윈도우(5건) 완료 -> 기준선 5, 임계값 max(3, 10) = 10
        let mut fired = None;
        for i in 0..11 {
            let finding = analyzer.analyze(&at(Some("alice"), 65 + i)).unwrap();
            if i < 10 {
                assert!(finding.is_none(), "fired early at event {i}");
            } else {
                fired = finding;
            }
        }
        assert_eq!(analyzer.baseline("alice"), Some(5.0));

        let finding = fired.unwrap();
        assert_eq!(finding.analyzer_name, "volume_anomaly");
        assert_eq!(finding.matched_pattern.as_deref(), Some("volume_spike"));
        assert_eq!(finding.severity, Severity::Medium);
        assert!(finding.details.contains(&("count".to_owned(), "11".to_owned())));
    }

    #[test]
    fn severity_scales_with_ratio() {
        assert_eq!(VolumeAnomalyAnalyzer::severity(1.5), Severity::Medium);
        assert_eq!(VolumeAnomalyAnalyzer::severity(2.0), Severity::Medium);
        assert_eq!(VolumeAnomalyAnalyzer::severity(3.0), Severity::High);
        assert_eq!(VolumeAnomalyAnalyzer::severity(4.5), Severity::Critical);
    }

    #[test]
    fn keys_are_isolated() {
        let analyzer = VolumeAnomalyAnalyzer::new(&config(60, 2, 1.0)).unwrap();
        analyzer.analyze(&at(Some("alice"), 0)).unwrap();
        analyzer.analyze(&at(Some("bob"), 0)).unwrap();
        analyzer.analyze(&at(None, 0)).unwrap();
        assert_eq!(analyzer.tracked_keys(), 3);
        assert_eq!(retained(&analyzer, "alice"), 1);
        assert_eq!(retained(&analyzer, ANONYMOUS_KEY), 1);
    }

    #[test]
    fn out_of_order_events_stay_sorted_and_late_ones_drop() {
        let analyzer = VolumeAnomalyAnalyzer::new(&config(60, 100, 1.0)).unwrap();
        for t in [100, 80, 90, 85] {
            analyzer.analyze(&at(Some("alice"), t)).unwrap();
        }
        {
            let keys = analyzer.keys.read().unwrap();
            let window = keys["alice"].window.lock().unwrap();
            let events: Vec<_> = window.events.iter().collect();
            assert!(events.windows(2).all(|w| w[0] <= w[1]));
            assert_eq!(events.len(), 4);
        }

        // newest=100, window=60 -> 40보다 오래된 이벤트는 버려짐
        assert!(analyzer.analyze(&at(Some("alice"), 30)).unwrap().is_none());
        assert_eq!(retained(&analyzer, "alice"), 4);

        // 새 이벤트가 오래된 이벤트를 밀어냄
        analyzer.analyze(&at(Some("alice"), 155)).unwrap();
        assert_eq!(retained(&analyzer, "alice"), 2);
    }

    #[test]
    fn empty_windows_decay_baseline() {
        let mut cfg = config(10, 1, 1.0);
        cfg.ewma_alpha = 0.5;
        let analyzer = VolumeAnomalyAnalyzer::new(&cfg).unwrap();
        for t in 0..4 {
            analyzer.analyze(&at(Some("alice"), t)).unwrap();
        }
        // [0,10) 4건 완료, [10,20) [20,30) 빈 윈도우 -> 4 * 0.5^2
        analyzer.analyze(&at(Some("alice"), 35)).unwrap();
        let baseline = analyzer.baseline("alice").unwrap();
        assert!((baseline - 1.0).abs() < 1e-9);
    }

    #[test]
    fn ewma_updates_on_each_completed_window() {
        let mut cfg = config(10, 100, 1.0);
        cfg.ewma_alpha = 0.5;
        let analyzer = VolumeAnomalyAnalyzer::new(&cfg).unwrap();
        for t in 0..4 {
            analyzer.analyze(&at(Some("alice"), t)).unwrap();
        }
        for t in 10..12 {
            analyzer.analyze(&at(Some("alice"), t)).unwrap();
        }
        assert_eq!(analyzer.baseline("alice"), Some(4.0));
        analyzer.analyze(&at(Some("alice"), 20)).unwrap();
        // 0.5 * 2 + 0.5 * 4
        assert_eq!(analyzer.baseline("alice"), Some(3.0));
    }

    #[test]
    fn stale_baseline_resets_after_empty_windows() {
        let mut cfg = config(10, 1, 1.0);
        cfg.reset_after_empty_windows = 2;
        let analyzer = VolumeAnomalyAnalyzer::new(&cfg).unwrap();
        for t in 0..4 {
            analyzer.analyze(&at(Some("alice"), t)).unwrap();
        }
        analyzer.analyze(&at(Some("alice"), 35)).unwrap();
        assert_eq!(analyzer.baseline("alice"), None);
    }

    #[test]
    fn key_limit_evicts_least_recent() {
        let mut cfg = config(60, 1, 1.0);
        cfg.max_tracked_keys = 2;
        let analyzer = VolumeAnomalyAnalyzer::new(&cfg).unwrap();
        analyzer.analyze(&at(Some("a"), 0)).unwrap();
        analyzer.analyze(&at(Some("b"), 5)).unwrap();
        analyzer.analyze(&at(Some("c"), 10)).unwrap();

        assert_eq!(analyzer.tracked_keys(), 2);
        let keys = analyzer.keys.read().unwrap();
        assert!(!keys.contains_key("a"));
        assert!(keys.contains_key("c"));
    }

    #[test]
    fn evicted_slot_is_marked_and_key_keeps_counting() {
        let mut cfg = config(60, 1, 1.0);
        cfg.max_tracked_keys = 1;
        let analyzer = VolumeAnomalyAnalyzer::new(&cfg).unwrap();

        // 다른 호출이 슬롯을 잡아 둔 사이에 키가 제거되는 경우
        let held = analyzer.slot("a", Duration::from_secs(0)).unwrap();
        analyzer.analyze(&at(Some("b"), 1)).unwrap();
        assert!(held.window.lock().unwrap().evicted);

        analyzer.analyze(&at(Some("a"), 2)).unwrap();
        assert_eq!(retained(&analyzer, "a"), 1);
        let keys = analyzer.keys.read().unwrap();
        assert!(!keys["a"].window.lock().unwrap().evicted);
    }

    #[test]
    fn concurrent_eviction_leaves_only_live_windows() {
        let mut cfg = config(3600, 1_000_000, 1.0);
        cfg.max_tracked_keys = 2;
        let analyzer = Arc::new(VolumeAnomalyAnalyzer::new(&cfg).unwrap());

        let handles: Vec<_> = ["a", "b", "c", "d"]
            .into_iter()
            .map(|user| {
                let analyzer = Arc::clone(&analyzer);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        analyzer.analyze(&at(Some(user), i)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // 맵에 남은 창은 모두 살아 있는 창
        let keys = analyzer.keys.read().unwrap();
        assert!(keys.len() <= 2);
        assert!(
            keys.values()
                .all(|slot| !slot.window.lock().unwrap().evicted)
        );
    }

    #[test]
    fn fallback_clock_is_monotonic() {
        let analyzer = VolumeAnomalyAnalyzer::new(&config(60, 100, 1.0)).unwrap();
        let first = analyzer.fallback_now();
        let query = Query::from_sql("SELECT 1").unwrap();
        for _ in 0..5 {
            analyzer.analyze(&query).unwrap();
        }
        assert!(analyzer.fallback_now() >= first);
        assert_eq!(retained(&analyzer, ANONYMOUS_KEY), 5);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        assert!(VolumeAnomalyAnalyzer::new(&config(0, 1, 1.0)).is_err());
        assert!(VolumeAnomalyAnalyzer::new(&config(60, 0, 1.0)).is_err());
        assert!(VolumeAnomalyAnalyzer::new(&config(60, 1, f64::NAN)).is_err());
        let mut cfg = config(60, 1, 1.0);
        cfg.ewma_alpha = 0.0;
        assert!(VolumeAnomalyAnalyzer::new(&cfg).is_err());
    }
}
