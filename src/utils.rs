use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use color_eyre::{eyre::eyre, Result};
use image::{ImageBuffer, Luma, RgbImage};
use tracing::info;

use crate::capture::StreamProfile;
use crate::pipeline::DepthSlot;

/// Wall-clock milliseconds since the UNIX epoch
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Milliseconds elapsed since a slot timestamp
pub fn frame_age_ms(timestamp: i64) -> i64 {
    now_millis().saturating_sub(timestamp)
}

/// Write a depth+color pair as `<stem>_color.png` (RGB8) and `<stem>_depth.png` (16-bit gray)
pub fn save_snapshot(slot: &DepthSlot, profile: &StreamProfile, dir: &Path, stem: &str) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir)?;

    let color = RgbImage::from_raw(profile.width, profile.height, slot.color.to_vec())
        .ok_or_else(|| eyre!("Color buffer does not match {}x{}", profile.width, profile.height))?;
    let depth = ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(
        profile.width,
        profile.height,
        slot.depth_values().collect(),
    )
    .ok_or_else(|| eyre!("Depth buffer does not match {}x{}", profile.width, profile.height))?;

    let color_path = dir.join(format!("{stem}_color.png"));
    let depth_path = dir.join(format!("{stem}_depth.png"));
    color.save(&color_path)?;
    depth.save(&depth_path)?;

    info!("Saved snapshot to {} and {}", color_path.display(), depth_path.display());
    Ok((color_path, depth_path))
}
