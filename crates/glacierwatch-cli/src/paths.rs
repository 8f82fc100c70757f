//! Deterministic data-tree layout.
//!
//! Every artifact lives under the data folder, keyed by project and scene:
//! raw downloads in `raw/<project>/<scene>/`, results in
//! `result/<project>/<scene>/`, the project DEM at `<project>/dem.tif`.

use std::fs;
use std::path::{Path, PathBuf};

use glacierwatch_core::error::Result;

/// Folder receiving a scene's downloaded bands.
pub fn raw_folder(data_folder: &Path, project_id: &str, scene_id: &str) -> PathBuf {
    data_folder.join("raw").join(project_id).join(scene_id)
}

/// Folder receiving a scene's analysis outputs.
pub fn result_folder(data_folder: &Path, project_id: &str, scene_id: &str) -> PathBuf {
    data_folder.join("result").join(project_id).join(scene_id)
}

/// The project's clipped/mosaicked DEM.
pub fn dem_path(data_folder: &Path, project_id: &str) -> PathBuf {
    data_folder.join(project_id).join("dem.tif")
}

/// Scratch space for intermediate rasters.
pub fn temp_folder(data_folder: &Path) -> PathBuf {
    data_folder.join("temp")
}

/// File a band asset is stored under within a scene folder.
pub fn band_file(folder: &Path, band: &str) -> PathBuf {
    folder.join(format!("{band}.tif"))
}

/// Create a folder, clearing any stale files from a previous attempt.
pub fn prepare_folder(folder: &Path) -> Result<PathBuf> {
    if folder.is_dir() {
        clear_folder(folder)?;
    }
    fs::create_dir_all(folder)?;
    Ok(folder.to_path_buf())
}

/// Remove a folder's files and the folder itself, if present.
pub fn cleanup_folder(folder: &Path) -> Result<()> {
    if folder.is_dir() {
        clear_folder(folder)?;
        fs::remove_dir(folder)?;
    }
    Ok(())
}

fn clear_folder(folder: &Path) -> Result<()> {
    for entry in fs::read_dir(folder)? {
        let path = entry?.path();
        if path.is_file() {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_keyed_by_project_and_scene() {
        let data = Path::new("/data");
        assert_eq!(
            raw_folder(data, "svalbard", "S2A_1"),
            PathBuf::from("/data/raw/svalbard/S2A_1")
        );
        assert_eq!(
            result_folder(data, "svalbard", "S2A_1"),
            PathBuf::from("/data/result/svalbard/S2A_1")
        );
        assert_eq!(
            dem_path(data, "svalbard"),
            PathBuf::from("/data/svalbard/dem.tif")
        );
    }

    #[test]
    fn prepare_clears_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("scene");
        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join("stale.tif"), b"old").unwrap();

        prepare_folder(&folder).unwrap();
        assert!(folder.is_dir());
        assert!(!folder.join("stale.tif").exists());

        cleanup_folder(&folder).unwrap();
        assert!(!folder.exists());
    }
}
