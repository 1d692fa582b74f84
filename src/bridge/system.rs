//! bevy_ecs 集成
//!
//! `Bridge` 持有非 `Send` 的传输层，因此作为 non-send 资源放入 `World`，
//! 由 `bridge_tick_system` 在主线程上每帧推进一次。

use bevy_ecs::prelude::*;

use super::Bridge;

/// 帧时间
#[derive(Resource, Clone, Copy, Debug)]
pub struct FrameTime {
    pub delta_seconds: f32,
    pub elapsed_seconds: f64,
}

impl_default_and_new!(FrameTime {
    delta_seconds: 1.0 / 60.0,
    elapsed_seconds: 0.0,
});

impl FrameTime {
    pub fn advance(&mut self, delta_seconds: f32) {
        self.delta_seconds = delta_seconds;
        self.elapsed_seconds += delta_seconds as f64;
    }
}

/// 累计的桥接统计
#[derive(Resource, Clone, Copy, Debug, Default)]
pub struct BridgeStats {
    pub ticks: u64,
    pub dispatched: u64,
    pub failed: u64,
    pub flushed: u64,
    pub transport_errors: u64,
}

/// 每帧推进桥接
pub fn bridge_tick_system(
    mut bridge: NonSendMut<Bridge>,
    time: Res<FrameTime>,
    stats: Option<ResMut<BridgeStats>>,
) {
    let report = bridge.tick(time.delta_seconds);
    if let Some(e) = &report.transport_error {
        tracing::warn!(target: "bridge", "Transport error during tick: {}", e);
    }
    if let Some(mut stats) = stats {
        stats.ticks += 1;
        stats.dispatched += report.dispatched as u64;
        stats.failed += report.failed as u64;
        stats.flushed += report.flushed as u64;
        stats.transport_errors += u64::from(report.transport_error.is_some());
    }
}
