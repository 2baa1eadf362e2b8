//! 调度节拍

use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};

/// 驱动批调度循环的定时器，由调用方持有
pub struct BatchTicker {
    interval: Interval,
    period: Duration,
}

impl BatchTicker {
    /// 周期为 0 时按 1ms 处理
    pub fn new(period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval, period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }
}
