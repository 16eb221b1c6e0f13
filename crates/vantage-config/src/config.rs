//! Configuration structs with sensible defaults and RON persistence.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level streaming scheduler configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    /// Frame and fetch time budgets.
    pub budget: BudgetConfig,
    /// Distance thresholds and hysteresis buffers.
    pub distance: DistanceConfig,
    /// Frustum culling cadence and buffer.
    pub frustum: FrustumConfig,
    /// Load queue capacities and ordering.
    pub queue: QueueConfig,
    /// Worker concurrency ceilings.
    pub workers: WorkerConfig,
    /// Camera movement gating.
    pub camera: CameraGateConfig,
    /// Debug/development settings.
    pub debug: DebugConfig,
}

/// Frame and fetch time budgets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BudgetConfig {
    /// Per-frame budget in milliseconds (16 ms targets ~60 fps).
    pub frame_budget_ms: f64,
    /// Fraction of the frame budget available to scheduler tasks; the
    /// remainder is reserved for rendering and camera control.
    pub frame_budget_ceiling: f64,
    /// Budget of the independent fetch-drain loop, in milliseconds.
    pub fetch_budget_ms: f64,
    /// Per-task mesh creation budget before a cooperative yield, in milliseconds.
    pub mesh_creation_budget_ms: f64,
}

/// Distance thresholds and hysteresis buffers, all as fractions of the
/// calibrated max distance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DistanceConfig {
    /// Depth-3 eligibility threshold fraction.
    pub depth3_threshold_fraction: f32,
    /// Depth-4 eligibility threshold fraction.
    pub depth4_threshold_fraction: f32,
    /// Load-side hysteresis buffer fraction.
    pub buffer_fraction: f32,
    /// Multiplier applied to the load buffer on the unload side.
    pub unload_buffer_scale: f32,
    /// Minimum interval between distance worker requests, in milliseconds.
    pub calculation_frequency_ms: u64,
}

/// Frustum culling cadence and buffer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FrustumConfig {
    /// Minimum interval between frustum culls, in milliseconds.
    pub update_frequency_ms: u64,
    /// AABB inflation factor for the buffered containment test.
    pub buffer_multiplier: f32,
    /// Priority scale applied to reloads of nodes re-entering the frustum.
    pub reload_priority_scale: f32,
}

/// Load queue capacities and ordering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    /// Soft cap per depth queue; exceeding it triggers a sort-and-trim.
    pub soft_cap: usize,
    /// Entries retained after a trim, best priority first.
    pub trim_to: usize,
    /// Maximum dequeued entries per depth per fetch-pump iteration.
    pub max_batch_per_depth: usize,
    /// Priority gap, as a fraction of max distance, under which importance
    /// breaks ties instead of raw priority.
    pub tie_break_gap_fraction: f32,
}

/// Worker concurrency ceilings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Concurrent requests allowed per depth loader.
    pub loader_concurrency: usize,
    /// Concurrent requests allowed for the disposal worker.
    pub disposal_concurrency: usize,
}

/// Camera movement gating: LOD updates are only scheduled when the camera
/// has moved past these thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraGateConfig {
    /// Translation delta (world units) that counts as movement.
    pub position_epsilon: f32,
    /// Forward-vector dot product below which rotation counts as movement.
    pub rotation_dot_threshold: f32,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "warn").
    pub log_level: String,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            frame_budget_ms: 16.0,
            frame_budget_ceiling: 0.70,
            fetch_budget_ms: 8.0,
            mesh_creation_budget_ms: 8.0,
        }
    }
}

impl Default for DistanceConfig {
    fn default() -> Self {
        Self {
            depth3_threshold_fraction: 0.90,
            depth4_threshold_fraction: 0.50,
            buffer_fraction: 0.03,
            unload_buffer_scale: 1.2,
            calculation_frequency_ms: 50,
        }
    }
}

impl Default for FrustumConfig {
    fn default() -> Self {
        Self {
            update_frequency_ms: 60,
            buffer_multiplier: 1.5,
            reload_priority_scale: 0.5,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            soft_cap: 50,
            trim_to: 30,
            max_batch_per_depth: 2,
            tie_break_gap_fraction: 0.10,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            loader_concurrency: 3,
            disposal_concurrency: 5,
        }
    }
}

impl Default for CameraGateConfig {
    fn default() -> Self {
        Self {
            position_epsilon: 0.25,
            rotation_dot_threshold: 0.9995,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

// --- Load / Save ---

impl StreamConfig {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join("streaming.ron");

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(ConfigError::ReadError)?;
            let config: StreamConfig =
                ron::from_str(&contents).map_err(ConfigError::ParseError)?;
            tracing::info!("Loaded streaming config from {}", config_path.display());
            Ok(config)
        } else {
            let config = StreamConfig::default();
            config.save(config_dir)?;
            tracing::info!(
                "Created default streaming config at {}",
                config_path.display()
            );
            Ok(config)
        }
    }

    /// Save config to the given directory as `streaming.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(ConfigError::WriteError)?;

        let config_path = config_dir.join("streaming.ron");
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(3)
            .separate_tuple_members(true)
            .enumerate_arrays(false);

        let serialized =
            ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::SerializeError)?;

        std::fs::write(&config_path, serialized).map_err(ConfigError::WriteError)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = StreamConfig::default();
        let ron_str =
            ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::new().depth_limit(3))
                .unwrap();
        assert!(!ron_str.is_empty());
        assert!(ron_str.contains("frame_budget_ms: 16.0"));
        assert!(ron_str.contains("soft_cap: 50"));
    }

    #[test]
    fn test_config_roundtrip() {
        let config = StreamConfig::default();
        let ron_str = ron::to_string(&config).unwrap();
        let deserialized: StreamConfig = ron::from_str(&ron_str).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_missing_section_uses_default() {
        // Config missing the `frustum` section entirely
        let ron_str = "(budget: (), distance: (), queue: ())";
        let config: StreamConfig = ron::from_str(ron_str).unwrap();
        assert_eq!(config.frustum, FrustumConfig::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StreamConfig::default();
        config.budget.frame_budget_ms = 33.0;
        config.save(dir.path()).unwrap();
        let loaded = StreamConfig::load_or_create(dir.path()).unwrap();
        assert_eq!(loaded.budget.frame_budget_ms, 33.0);
    }
}
