//! Configuration loading.
//!
//! Process-level settings come from the environment; per-project settings
//! (band list, thresholds) live in `data/<project>/config.toml`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GlacierError, Result};

/// Process-level configuration, read from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Imagery catalog (STAC) endpoint.
    pub stac_url: String,

    /// Token exchange endpoint for authenticated asset downloads.
    pub stac_token_url: String,

    /// Elevation-tile catalog (STAC) endpoint.
    pub dem_stac_url: String,

    /// Catalog credentials; empty when the catalog is anonymous.
    pub cdse_username: String,
    pub cdse_password: String,

    /// Root of the local data tree (raw downloads, results, DEMs).
    pub data_folder: PathBuf,
}

impl AppConfig {
    /// Read configuration from the environment, applying defaults where the
    /// upstream services have well-known public endpoints.
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| GlacierError::ConfigMissing {
                key: "DATABASE_URL".to_string(),
            })?;

        Ok(Self {
            database_url,
            stac_url: env_or("STAC_URL", "https://stac.dataspace.copernicus.eu/v1/"),
            stac_token_url: env_or(
                "STAC_TOKEN_URL",
                "https://identity.dataspace.copernicus.eu/auth/realms/CDSE/protocol/openid-connect/token",
            ),
            dem_stac_url: env_or("DEM_STAC_URL", "https://stac.pgc.umn.edu/api/v1/"),
            cdse_username: env_or("CDSE_USERNAME", ""),
            cdse_password: env_or("CDSE_PASSWORD", ""),
            data_folder: PathBuf::from(env_or("DATA_FOLDER", "./data")),
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Per-project analysis settings, loaded from `data/<project>/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Spectral bands to download, by catalog asset key.
    pub bands: Vec<String>,

    /// NDSI cutoff for the snow mask.
    #[serde(default = "default_ndsi_threshold")]
    pub ndsi_threshold: f64,

    /// Maximum scene cloud cover fraction accepted at discovery.
    #[serde(default = "default_cloud_cover")]
    pub cloud_cover_threshold: f64,

    /// Target AOI coverage fraction for DEM tile selection.
    #[serde(default = "default_dem_coverage")]
    pub dem_coverage_target: f64,

    /// Margin added around glacier outlines before clipping, in the
    /// raster's distance units, to tolerate registration slack.
    #[serde(default = "default_glacier_buffer")]
    pub glacier_buffer: f64,
}

fn default_ndsi_threshold() -> f64 {
    0.4
}

fn default_cloud_cover() -> f64 {
    0.3
}

fn default_dem_coverage() -> f64 {
    0.99
}

fn default_glacier_buffer() -> f64 {
    200.0
}

impl ProjectConfig {
    /// Load the project config from its conventional location under the
    /// data folder.
    pub fn load(data_folder: &Path, project_id: &str) -> Result<Self> {
        let path = data_folder.join(project_id).join("config.toml");
        if !path.is_file() {
            return Err(GlacierError::ConfigMissing {
                key: path.display().to_string(),
            });
        }
        let content = fs::read_to_string(&path)?;
        toml::from_str(&content).map_err(|e| GlacierError::ConfigInvalid {
            key: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Match a configured band key by prefix. Band resolutions vary across
    /// products, so "B11" matches "B11_20m" as well as "B11_10m".
    pub fn band_key<'a>(&'a self, band: &str) -> Option<&'a str> {
        self.bands
            .iter()
            .find(|name| name.starts_with(band))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn project_config_defaults_apply() {
        let dir = tempfile::tempdir().unwrap();
        let project_dir = dir.path().join("svalbard");
        fs::create_dir_all(&project_dir).unwrap();
        let mut file = fs::File::create(project_dir.join("config.toml")).unwrap();
        writeln!(file, "bands = [\"B03_20m\", \"B11_20m\"]").unwrap();

        let config = ProjectConfig::load(dir.path(), "svalbard").unwrap();
        assert_eq!(config.bands.len(), 2);
        assert_eq!(config.ndsi_threshold, 0.4);
        assert_eq!(config.dem_coverage_target, 0.99);
        assert_eq!(config.glacier_buffer, 200.0);
    }

    #[test]
    fn band_key_matches_by_prefix() {
        let config = ProjectConfig {
            bands: vec!["B03_20m".into(), "B11_20m".into()],
            ndsi_threshold: 0.4,
            cloud_cover_threshold: 0.3,
            dem_coverage_target: 0.99,
            glacier_buffer: 200.0,
        };
        assert_eq!(config.band_key("B11"), Some("B11_20m"));
        assert_eq!(config.band_key("B04"), None);
    }

    #[test]
    fn missing_config_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ProjectConfig::load(dir.path(), "nowhere").unwrap_err();
        assert!(matches!(err, GlacierError::ConfigMissing { .. }));
    }
}
