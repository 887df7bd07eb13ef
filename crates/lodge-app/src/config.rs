// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use lodge_math::MotionStep;
use lodge_render::{PresentPreference, RenderSettings};
use serde::Deserialize;
use tracing::{debug, warn};

// Smallest camera step or speed accepted from the file.
const MIN_CAMERA_RATE: f32 = 1e-3;

fn positive_rate(name: &str, value: f32, default: f32) -> f32 {
    if value.is_finite() && value >= MIN_CAMERA_RATE {
        return value;
    }
    warn!("camera.{name} = {value} is not a positive rate; using {default}");
    default
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VsyncMode {
    Fifo,
    #[default]
    Mailbox,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MotionKind {
    PerFrame,
    #[default]
    PerSecond,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WindowCfg {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            width: 800,
            height: 600,
            title: "lodge".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub vsync_mode: VsyncMode,
    pub frames_in_flight: usize,
    pub serialize_present: bool,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            vsync_mode: VsyncMode::Mailbox,
            frames_in_flight: 2,
            serialize_present: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct CameraCfg {
    pub motion: MotionKind,
    /// Units per frame for `per_frame`.
    pub step: f32,
    /// Units per second for `per_second`.
    pub speed: f32,
    pub nudge: f32,
}

impl Default for CameraCfg {
    fn default() -> Self {
        CameraCfg {
            motion: MotionKind::PerSecond,
            step: 0.05,
            speed: 3.0,
            nudge: 0.3,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AssetsCfg {
    pub model: Option<PathBuf>,
    pub texture: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
    pub camera: CameraCfg,
    pub assets: AssetsCfg,
}

impl AppCfg {
    pub fn parse(text: &str) -> Result<AppCfg, toml::de::Error> {
        toml::from_str(text)
    }

    /// Missing file means defaults; so does a broken one, with a warning.
    pub fn load(path: &Path) -> AppCfg {
        match fs::read_to_string(path) {
            Ok(s) => Self::parse(&s).unwrap_or_else(|e| {
                warn!("{}: {e}; using defaults", path.display());
                AppCfg::default()
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} not found; using defaults", path.display());
                AppCfg::default()
            }
            Err(e) => {
                warn!("{}: {e}; using defaults", path.display());
                AppCfg::default()
            }
        }
    }

    pub fn render_settings(&self) -> RenderSettings {
        let defaults = CameraCfg::default();
        let motion = match self.camera.motion {
            MotionKind::PerFrame => {
                MotionStep::PerFrame(positive_rate("step", self.camera.step, defaults.step))
            }
            MotionKind::PerSecond => {
                MotionStep::PerSecond(positive_rate("speed", self.camera.speed, defaults.speed))
            }
        };
        RenderSettings {
            frames_in_flight: self.render.frames_in_flight,
            present_preference: match self.render.vsync_mode {
                VsyncMode::Fifo => PresentPreference::Fifo,
                VsyncMode::Mailbox => PresentPreference::LowLatency,
            },
            clear_color: self.render.clear_color,
            serialize_present: self.render.serialize_present,
            motion,
            nudge: self.camera.nudge,
        }
        .with_frames_in_flight(self.render.frames_in_flight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = AppCfg::parse("").unwrap();
        assert_eq!((cfg.window.width, cfg.window.height), (800, 600));
        assert_eq!(cfg.window.title, "lodge");
        assert_eq!(cfg.render_settings(), RenderSettings::default());
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let cfg = AppCfg::parse(
            r#"
            [render]
            vsync_mode = "fifo"
            frames_in_flight = 3

            [camera]
            motion = "per_frame"
            step = 0.1

            [assets]
            model = "models/room.obj"
            "#,
        )
        .unwrap();
        let s = cfg.render_settings();
        assert_eq!(s.present_preference, PresentPreference::Fifo);
        assert_eq!(s.frames_in_flight(), 3);
        assert!(s.serialize_present);
        assert_eq!(s.motion, MotionStep::PerFrame(0.1));
        assert_eq!(s.nudge, 0.3);
        assert_eq!(cfg.assets.model, Some(PathBuf::from("models/room.obj")));
        assert_eq!(cfg.assets.texture, None);
    }

    #[test]
    fn zero_frames_in_flight_is_clamped() {
        let cfg = AppCfg::parse("[render]\nframes_in_flight = 0\n").unwrap();
        assert_eq!(cfg.render_settings().frames_in_flight(), 1);
    }

    #[test]
    fn non_positive_camera_rates_fall_back_to_defaults() {
        let cfg = AppCfg::parse("[camera]\nmotion = \"per_frame\"\nstep = -0.05\n").unwrap();
        assert_eq!(cfg.render_settings().motion, MotionStep::PerFrame(0.05));

        let cfg = AppCfg::parse("[camera]\nspeed = 0.0\n").unwrap();
        assert_eq!(cfg.render_settings().motion, MotionStep::PerSecond(3.0));

        let cfg = AppCfg::parse("[camera]\nspeed = 5.5\n").unwrap();
        assert_eq!(cfg.render_settings().motion, MotionStep::PerSecond(5.5));
    }

    #[test]
    fn malformed_or_missing_file_falls_back() {
        assert!(AppCfg::parse("[render]\nvsync_mode = \"sometimes\"\n").is_err());
        let cfg = AppCfg::load(Path::new("definitely/not/here/lodge.toml"));
        assert_eq!(cfg.render.frames_in_flight, 2);
    }
}
