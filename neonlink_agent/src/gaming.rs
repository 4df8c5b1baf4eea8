//! Gaming detection derived from GPU load. There is no frame counter behind
//! this: a busy GPU is taken as "a game is running" and frame rates are
//! estimated from how saturated it is.

use crate::config::GamingConfig;
use crate::types::{GamingInfo, GpuInfo};

fn round1(v: f32) -> f32 {
    (v * 10.0).round() / 10.0
}

/// `None` when detection is disabled; otherwise a block with `active` set
/// when GPU load is at or above the configured threshold.
pub fn estimate(gpu: &GpuInfo, process: Option<String>, cfg: &GamingConfig) -> Option<GamingInfo> {
    if !cfg.enabled {
        return None;
    }
    let threshold = cfg.gpu_load_threshold.clamp(0.0, 99.0);
    if gpu.usage.is_nan() || gpu.usage < threshold {
        return Some(GamingInfo {
            active: false,
            fps: 0.0,
            fps_1_low: 0.0,
            frame_time: 0.0,
            process: None,
        });
    }
    // 0 at the threshold, 1 at full saturation
    let load = ((gpu.usage - threshold) / (100.0 - threshold)).clamp(0.0, 1.0);
    let fps = (cfg.target_fps.max(1.0) * (1.0 - 0.35 * load)).max(1.0);
    Some(GamingInfo {
        active: true,
        fps: round1(fps),
        fps_1_low: round1(fps * 0.75),
        frame_time: round1(1000.0 / fps),
        process,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gpu_at(usage: f32) -> GpuInfo {
        GpuInfo {
            usage,
            ..GpuInfo::absent()
        }
    }

    #[test]
    fn below_threshold_is_inactive() {
        let g = estimate(&gpu_at(40.0), Some("game".into()), &GamingConfig::default()).unwrap();
        assert!(!g.active);
        assert_eq!(g.fps, 0.0);
        assert!(g.process.is_none());
    }

    #[test]
    fn saturation_lowers_estimate() {
        let cfg = GamingConfig::default();
        let at = estimate(&gpu_at(80.0), None, &cfg).unwrap();
        let full = estimate(&gpu_at(100.0), Some("game.exe".into()), &cfg).unwrap();
        assert!(at.active && full.active);
        assert_eq!(at.fps, 60.0);
        assert!(full.fps < at.fps);
        assert!(full.fps_1_low < full.fps);
        assert_eq!(full.process.as_deref(), Some("game.exe"));
        assert!((at.frame_time - 16.7).abs() < 0.01);
    }

    #[test]
    fn disabled_yields_none() {
        let cfg = GamingConfig {
            enabled: false,
            ..GamingConfig::default()
        };
        assert!(estimate(&gpu_at(99.0), None, &cfg).is_none());
    }
}
