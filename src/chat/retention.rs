//! 消息保留与定时清理
//!
//! 聊天只在每天的若干开放时段（整点粒度）内可用。进入关闭状态时立即清空所有消息，
//! 之后在整个关闭期间按固定间隔持续清理；进入开放状态时停止清理。
//! 调度任务每次醒来都重新计算当前状态和下一个切换点，然后只睡到那个切换点。

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Local, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::store::MessageStore;

const HOURS_PER_DAY: u32 = 24;

#[derive(Debug, Error, PartialEq)]
pub enum WindowParseError {
    #[error("malformed window `{0}`, expected `start-end`")]
    Malformed(String),
    #[error("hour {0} out of range")]
    HourOutOfRange(u32),
    #[error("window {0}-{1} is empty")]
    Empty(u32, u32),
    #[error("window {0}-{1} overlaps another window")]
    Overlap(u32, u32),
}

/// 每日开放时段，`[start, end)`，start > end 表示跨零点
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenWindows {
    intervals: Vec<(u32, u32)>,
}

impl OpenWindows {
    pub fn new(intervals: Vec<(u32, u32)>) -> Result<Self, WindowParseError> {
        let mut claimed = [false; HOURS_PER_DAY as usize];
        for &(start, end) in &intervals {
            if start >= HOURS_PER_DAY {
                return Err(WindowParseError::HourOutOfRange(start));
            }
            if end > HOURS_PER_DAY {
                return Err(WindowParseError::HourOutOfRange(end));
            }
            if start == end {
                return Err(WindowParseError::Empty(start, end));
            }
            for hour in 0..HOURS_PER_DAY {
                if contains(start, end, hour) {
                    if claimed[hour as usize] {
                        return Err(WindowParseError::Overlap(start, end));
                    }
                    claimed[hour as usize] = true;
                }
            }
        }
        Ok(Self { intervals })
    }

    pub fn intervals(&self) -> &[(u32, u32)] {
        &self.intervals
    }

    pub fn is_open_at_hour(&self, hour: u32) -> bool {
        self.intervals
            .iter()
            .any(|&(start, end)| contains(start, end, hour))
    }

    pub fn is_open_at<Tz: chrono::TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        self.is_open_at_hour(now.hour())
    }

    /// `now` 之后第一个开放状态发生翻转的整点；状态永不变化时返回 None
    pub fn next_transition(&self, now: DateTime<FixedOffset>) -> Option<Transition> {
        let open_now = self.is_open_at(&now);
        let top_of_hour = now
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))?;

        (1..=2 * HOURS_PER_DAY as i64)
            .map(|step| top_of_hour + chrono::Duration::hours(step))
            .find(|candidate| self.is_open_at(candidate) != open_now)
            .map(|at| Transition {
                at,
                kind: if open_now {
                    TransitionKind::Close
                } else {
                    TransitionKind::Open
                },
            })
    }

    pub fn state_at(&self, now: DateTime<FixedOffset>) -> ChatState {
        let next = self.next_transition(now);
        ChatState {
            is_open: self.is_open_at(&now),
            next_transition_at: next.map(|t| t.at.timestamp_millis()),
            next_transition_type: next.map(|t| t.kind),
        }
    }
}

fn contains(start: u32, end: u32, hour: u32) -> bool {
    if start < end {
        hour >= start && hour < end
    } else {
        hour >= start || hour < end
    }
}

impl FromStr for OpenWindows {
    type Err = WindowParseError;

    /// 形如 `6-9,11-15,17-23`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut intervals = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (start, end) = part
                .split_once('-')
                .ok_or_else(|| WindowParseError::Malformed(part.to_string()))?;
            let start = start
                .trim()
                .parse::<u32>()
                .map_err(|_| WindowParseError::Malformed(part.to_string()))?;
            let end = end
                .trim()
                .parse::<u32>()
                .map_err(|_| WindowParseError::Malformed(part.to_string()))?;
            intervals.push((start, end));
        }
        OpenWindows::new(intervals)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    Open,
    Close,
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionKind::Open => f.write_str("open"),
            TransitionKind::Close => f.write_str("close"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub at: DateTime<FixedOffset>,
    pub kind: TransitionKind,
}

/// 对外公开的聊天状态，时间戳为毫秒
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatState {
    pub is_open: bool,
    pub next_transition_at: Option<i64>,
    pub next_transition_type: Option<TransitionKind>,
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;
}

/// 本地时区的系统时钟
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Local::now().fixed_offset()
    }
}

/// 只读句柄，供请求路径查询当前状态
#[derive(Clone)]
pub struct RetentionHandle {
    state: watch::Receiver<ChatState>,
}

impl RetentionHandle {
    pub fn chat_state(&self) -> ChatState {
        self.state.borrow().clone()
    }
}

pub struct RetentionScheduler {
    windows: OpenWindows,
    messages: Arc<dyn MessageStore>,
    clock: Arc<dyn Clock>,
    purge_interval: Duration,
    state: watch::Sender<ChatState>,
}

impl RetentionScheduler {
    pub fn new(
        windows: OpenWindows,
        messages: Arc<dyn MessageStore>,
        clock: Arc<dyn Clock>,
        purge_interval: Duration,
    ) -> (Self, RetentionHandle) {
        let (state, receiver) = watch::channel(windows.state_at(clock.now()));
        let scheduler = Self {
            windows,
            messages,
            clock,
            purge_interval,
            state,
        };
        (scheduler, RetentionHandle { state: receiver })
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// 永不返回；在任意时刻启动都能得到正确的初始状态
    pub async fn run(self) {
        let mut was_open: Option<bool> = None;
        // 关闭期间唯一的清理定时器
        let mut purge_timer: Option<Interval> = None;

        loop {
            let now = self.clock.now();
            let state = self.windows.state_at(now);
            let next = self.windows.next_transition(now);
            self.state.send_replace(state.clone());

            if was_open != Some(state.is_open) {
                if state.is_open {
                    if purge_timer.take().is_some() {
                        tracing::info!("Cleanup interval stopped (chat open)");
                    }
                } else {
                    self.purge().await;
                    purge_timer = Some(self.arm_purge_timer());
                    tracing::info!(
                        "Cleanup interval started (chat closed), every {:?}",
                        self.purge_interval
                    );
                }
                was_open = Some(state.is_open);
            }

            let deadline = match next {
                Some(transition) => {
                    tracing::info!(
                        "Next chat {} scheduled for {}",
                        transition.kind,
                        transition.at
                    );
                    let wait = (transition.at - now).to_std().unwrap_or(Duration::ZERO);
                    Some(Instant::now() + wait)
                }
                None => {
                    tracing::warn!("Open windows never change state, scheduler idles");
                    None
                }
            };

            loop {
                tokio::select! {
                    // 切换点与清理同时到期时，先处理切换，开放时刻不做清理
                    biased;
                    _ = sleep_until(deadline) => break,
                    _ = tick(&mut purge_timer) => self.purge().await,
                }
            }
        }
    }

    fn arm_purge_timer(&self) -> Interval {
        let mut timer =
            tokio::time::interval_at(Instant::now() + self.purge_interval, self.purge_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    }

    // 清理失败只记录日志，调度继续
    async fn purge(&self) {
        match self.messages.delete_all().await {
            Ok(count) => tracing::info!("Deleted {} messages", count),
            Err(e) => tracing::error!("Error deleting messages: {}", e),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatResult;
    use crate::store::{ChatMessage, NewMessage};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn windows() -> OpenWindows {
        "6-9,11-15,17-23".parse().unwrap()
    }

    fn at(hour: u32, minute: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2025, 3, 14, hour, minute, 0)
            .unwrap()
    }

    /// 以 tokio 暂停时间为基准的时钟
    struct TokioClock {
        base: DateTime<FixedOffset>,
        started: Instant,
    }

    impl TokioClock {
        fn starting_at(base: DateTime<FixedOffset>) -> Arc<Self> {
            Arc::new(Self {
                base,
                started: Instant::now(),
            })
        }
    }

    impl Clock for TokioClock {
        fn now(&self) -> DateTime<FixedOffset> {
            self.base + chrono::Duration::from_std(self.started.elapsed()).unwrap()
        }
    }

    #[derive(Default)]
    struct CountingStore {
        purges: AtomicUsize,
        failing: AtomicBool,
    }

    #[async_trait]
    impl MessageStore for CountingStore {
        async fn create(&self, _message: NewMessage) -> ChatResult<ChatMessage> {
            unreachable!("scheduler never creates messages")
        }

        async fn delete_all(&self) -> ChatResult<u64> {
            self.purges.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(crate::error::ChatError::StoreUnavailable("down".into()));
            }
            Ok(0)
        }

        async fn find_by_sender_in(&self, _user_ids: &[String]) -> ChatResult<Vec<ChatMessage>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn open_hours_follow_the_table() {
        let w = windows();
        assert!(w.is_open_at_hour(7));
        assert!(!w.is_open_at_hour(10));
        assert!(!w.is_open_at_hour(16));
        assert!(w.is_open_at_hour(20));
        assert!(!w.is_open_at_hour(23));
        assert!(!w.is_open_at_hour(0));
        assert!(w.is_open_at_hour(6));
        assert!(!w.is_open_at_hour(9));
    }

    #[test]
    fn parse_rejects_bad_tables() {
        assert_eq!(
            "6-9,8-10".parse::<OpenWindows>(),
            Err(WindowParseError::Overlap(8, 10))
        );
        assert_eq!("5-5".parse::<OpenWindows>(), Err(WindowParseError::Empty(5, 5)));
        assert_eq!(
            "6-25".parse::<OpenWindows>(),
            Err(WindowParseError::HourOutOfRange(25))
        );
        assert!(matches!(
            "six-nine".parse::<OpenWindows>(),
            Err(WindowParseError::Malformed(_))
        ));
        assert_eq!("".parse::<OpenWindows>(), Ok(OpenWindows::default()));
    }

    #[test]
    fn wrapping_window_spans_midnight() {
        let w: OpenWindows = "22-2".parse().unwrap();
        assert!(w.is_open_at_hour(23));
        assert!(w.is_open_at_hour(0));
        assert!(w.is_open_at_hour(1));
        assert!(!w.is_open_at_hour(2));
        assert!(!w.is_open_at_hour(21));

        let next = w.next_transition(at(23, 30)).unwrap();
        assert_eq!(next.kind, TransitionKind::Close);
        assert_eq!(next.at, at(2, 0) + chrono::Duration::days(1));
    }

    #[test]
    fn next_transition_inside_and_between_windows() {
        let w = windows();

        let next = w.next_transition(at(7, 15)).unwrap();
        assert_eq!((next.at, next.kind), (at(9, 0), TransitionKind::Close));

        let next = w.next_transition(at(10, 0)).unwrap();
        assert_eq!((next.at, next.kind), (at(11, 0), TransitionKind::Open));

        // 正好在边界上时取下一个边界
        let next = w.next_transition(at(11, 0)).unwrap();
        assert_eq!((next.at, next.kind), (at(15, 0), TransitionKind::Close));

        // 最后一个时段之后，跨到第二天
        let next = w.next_transition(at(23, 40)).unwrap();
        assert_eq!(next.kind, TransitionKind::Open);
        assert_eq!(next.at, at(6, 0) + chrono::Duration::days(1));
    }

    #[test]
    fn constant_tables_have_no_transition() {
        assert!(OpenWindows::default().next_transition(at(12, 0)).is_none());
        let always: OpenWindows = "0-24".parse().unwrap();
        assert!(always.is_open_at_hour(23));
        assert!(always.next_transition(at(12, 0)).is_none());
    }

    #[test]
    fn chat_state_reports_next_boundary_in_millis() {
        let state = windows().state_at(at(16, 30));
        assert!(!state.is_open);
        assert_eq!(state.next_transition_at, Some(at(17, 0).timestamp_millis()));
        assert_eq!(state.next_transition_type, Some(TransitionKind::Open));
    }

    #[tokio::test(start_paused = true)]
    async fn cold_start_while_closed_purges_then_disarms_at_open() {
        let store = Arc::new(CountingStore::default());
        let clock = TokioClock::starting_at(at(10, 0));
        let (scheduler, handle) = RetentionScheduler::new(
            windows(),
            store.clone(),
            clock,
            Duration::from_secs(60),
        );
        assert!(!handle.chat_state().is_open);
        let task = scheduler.spawn();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.purges.load(Ordering::SeqCst), 1, "immediate purge");

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(store.purges.load(Ordering::SeqCst), 2);

        // 10:59:20，共 1 + 59 次
        tokio::time::sleep(Duration::from_secs(59 * 60 - 40)).await;
        assert_eq!(store.purges.load(Ordering::SeqCst), 60);

        // 跨过 11:00，开放时刻不清理，之后也不再清理
        tokio::time::sleep(Duration::from_secs(30 * 60)).await;
        assert_eq!(store.purges.load(Ordering::SeqCst), 60);
        let state = handle.chat_state();
        assert!(state.is_open);
        assert_eq!(state.next_transition_type, Some(TransitionKind::Close));
        assert_eq!(state.next_transition_at, Some(at(15, 0).timestamp_millis()));

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn closing_boundary_purges_immediately() {
        let store = Arc::new(CountingStore::default());
        let clock = TokioClock::starting_at(at(8, 30));
        let (scheduler, handle) = RetentionScheduler::new(
            windows(),
            store.clone(),
            clock,
            Duration::from_secs(60),
        );
        let task = scheduler.spawn();

        tokio::time::sleep(Duration::from_secs(29 * 60)).await;
        assert_eq!(store.purges.load(Ordering::SeqCst), 0, "open: no purge");
        assert!(handle.chat_state().is_open);

        // 9:00 关闭
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(store.purges.load(Ordering::SeqCst), 1);
        assert!(!handle.chat_state().is_open);

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn purge_failures_do_not_stop_the_loop() {
        let store = Arc::new(CountingStore::default());
        store.failing.store(true, Ordering::SeqCst);
        let clock = TokioClock::starting_at(at(0, 0));
        let (scheduler, _handle) = RetentionScheduler::new(
            windows(),
            store.clone(),
            clock,
            Duration::from_secs(60),
        );
        let task = scheduler.spawn();

        tokio::time::sleep(Duration::from_secs(5 * 60 + 1)).await;
        assert_eq!(store.purges.load(Ordering::SeqCst), 6);
        assert!(!task.is_finished());

        task.abort();
    }
}
