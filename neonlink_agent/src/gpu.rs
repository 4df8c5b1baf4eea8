// gpu.rs
use gfxinfo::active_gpu;

use crate::sensors::{bytes_to_gb, SensorError};
use crate::types::{GpuInfo, GpuVendor};

/// Read the active GPU. Temperature and clocks are filled in by the caller
/// from other sources when available.
pub fn probe_gpu() -> Result<GpuInfo, SensorError> {
    let gpu = active_gpu().map_err(|e| SensorError::Unavailable(format!("gpu: {e}")))?;
    let info = gpu.info();

    Ok(GpuInfo {
        name: gpu.model().to_string(),
        vendor: GpuVendor::from_model(gpu.model()),
        usage: info.load_pct() as f32, // 0..100
        temperature: 0.0,
        vram_used: bytes_to_gb(info.used_vram()),
        vram_total: bytes_to_gb(info.total_vram()),
        clock: 0,
        memory_clock: None,
        power: None,
        fan_speed: None,
    })
}
