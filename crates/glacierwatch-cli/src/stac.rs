//! Thin STAC catalog client.
//!
//! The catalog itself is an external collaborator; this wrapper covers the
//! two contracts the pipeline relies on: item search (imagery and elevation
//! tiles) and streamed asset download with bearer auth, retried once after
//! a 401 with a refreshed token.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use geo::{MultiPolygon, Rect};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use glacierwatch_core::error::{GlacierError, Result};
use glacierwatch_geo::dem_select::DemCandidate;
use glacierwatch_geo::geometry::multipolygon_from_geojson_geometry;

use crate::auth::TokenCache;

/// One item returned by a catalog search.
#[derive(Debug, Clone, Deserialize)]
pub struct StacItem {
    pub id: String,
    pub geometry: geojson::Geometry,
    pub properties: serde_json::Value,
    #[serde(default)]
    pub assets: HashMap<String, StacAsset>,
}

/// A named asset on a catalog item.
#[derive(Debug, Clone, Deserialize)]
pub struct StacAsset {
    pub href: String,
    #[serde(default)]
    pub alternate: Option<serde_json::Value>,
}

impl StacAsset {
    /// Resolve the asset to a fetchable HTTPS URL, preferring an `https`
    /// alternate and rewriting `s3://eodata/` object paths.
    pub fn resolved_href(&self) -> Option<String> {
        if let Some(alternate) = &self.alternate {
            if let Some(href) = alternate
                .get("https")
                .and_then(|a| a.get("href"))
                .and_then(|h| h.as_str())
            {
                return Some(href.to_string());
            }
        }
        if self.href.starts_with("https://") || self.href.starts_with("http://") {
            return Some(self.href.clone());
        }
        if let Some(key) = self.href.strip_prefix("s3://eodata/") {
            return Some(format!("https://eodata.dataspace.copernicus.eu/{key}"));
        }
        None
    }
}

impl StacItem {
    /// Acquisition timestamp from the `datetime` property.
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        self.properties
            .get("datetime")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }

    fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(|v| v.as_str())
    }

    fn property_f64(&self, key: &str) -> Option<f64> {
        self.properties.get(key).and_then(|v| v.as_f64())
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    features: Vec<StacItem>,
}

/// Search parameters for one catalog query.
#[derive(Debug, Default, Serialize)]
pub struct SearchRequest {
    pub collections: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intersects: Option<geojson::Geometry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<serde_json::Value>,
    pub limit: u32,
}

/// Thin query wrapper around a STAC API endpoint.
pub struct StacClient {
    http: reqwest::Client,
    base_url: String,
}

impl StacClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self { http, base_url }
    }

    /// Run one search and return its items.
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<StacItem>> {
        let url = format!("{}search", self.base_url);
        let response: SearchResponse = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| GlacierError::Http(format!("Catalog search failed: {e}")))?
            .json()
            .await
            .map_err(|e| GlacierError::Http(format!("Bad catalog response: {e}")))?;
        info!(items = response.features.len(), url, "Catalog search done");
        Ok(response.features)
    }

    /// Search imagery intersecting the AOI within a date range and under a
    /// cloud-cover limit.
    pub async fn search_imagery(
        &self,
        collection: &str,
        aoi: &MultiPolygon<f64>,
        datetime: &str,
        max_cloud_cover: f64,
    ) -> Result<Vec<StacItem>> {
        let intersects = geojson::Geometry::new(geojson::Value::from(aoi));
        self.search(&SearchRequest {
            collections: vec![collection.to_string()],
            intersects: Some(intersects),
            datetime: Some(datetime.to_string()),
            query: Some(json!({"eo:cloud_cover": {"lt": max_cloud_cover * 100.0}})),
            limit: 200,
            ..Default::default()
        })
        .await
    }

    /// Search elevation tiles over a bounding box.
    pub async fn search_dem(
        &self,
        collection: &str,
        bbox: [f64; 4],
    ) -> Result<Vec<StacItem>> {
        self.search(&SearchRequest {
            collections: vec![collection.to_string()],
            bbox: Some(bbox),
            limit: 200,
            ..Default::default()
        })
        .await
    }

    /// Stream an asset to disk. With an authenticated cache, a 401 triggers
    /// one token refresh and a single retry.
    pub async fn download_asset(
        &self,
        href: &str,
        path: &Path,
        auth: Option<&TokenCache>,
    ) -> Result<()> {
        let token = match auth {
            Some(cache) if cache.has_credentials() => Some(cache.bearer().await?),
            _ => None,
        };

        let response = self.get_asset(href, token.as_deref()).await?;
        let response = if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            let cache = auth.ok_or_else(|| {
                GlacierError::Http(format!("{href}: 401 without credentials configured"))
            })?;
            let fresh = cache.refresh().await?;
            self.get_asset(href, Some(&fresh)).await?
        } else {
            response
        };

        let response = response
            .error_for_status()
            .map_err(|e| GlacierError::Http(format!("GET {href}: {e}")))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(path).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| GlacierError::Http(format!("GET {href}: {e}")))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        info!(href, path = %path.display(), "Downloaded asset");
        Ok(())
    }

    async fn get_asset(
        &self,
        href: &str,
        token: Option<&str>,
    ) -> Result<reqwest::Response> {
        let mut request = self.http.get(href);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request
            .send()
            .await
            .map_err(|e| GlacierError::Http(format!("GET {href}: {e}")))
    }
}

/// Interpret a catalog item as a DEM tile candidate. Items without
/// projection metadata are skipped with a warning.
pub fn dem_candidate_from_item(item: &StacItem, asset_key: &str) -> Option<DemCandidate> {
    let epsg = parse_epsg(item.property_str("proj:code"))
        .or_else(|| item.property_f64("proj:code").map(|v| v as u32))?;

    let bbox = item
        .properties
        .get("proj:bbox")
        .and_then(|v| v.as_array())
        .and_then(|values| {
            let coords: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
            (coords.len() >= 4).then(|| Rect::new((coords[0], coords[1]), (coords[2], coords[3])))
        })?;

    let footprint = item
        .properties
        .get("proj:geometry")
        .and_then(|value| serde_json::from_value::<geojson::Geometry>(value.clone()).ok())
        .and_then(|geometry| multipolygon_from_geojson_geometry(&geometry).ok());

    let asset_href = match item.assets.get(asset_key).and_then(StacAsset::resolved_href) {
        Some(href) => href,
        None => {
            warn!(item = %item.id, asset_key, "DEM item has no resolvable asset");
            return None;
        }
    };

    Some(DemCandidate {
        id: item.id.clone(),
        epsg,
        bbox,
        footprint,
        data_fraction: item.property_f64("pgc:data_perc").unwrap_or(0.0),
        created: item
            .property_str("created")
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| DateTime::<Utc>::MIN_UTC),
        asset_href,
    })
}

fn parse_epsg(code: Option<&str>) -> Option<u32> {
    let code = code?;
    let digits = code.strip_prefix("EPSG:").unwrap_or(code);
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_https_alternate_first() {
        let asset = StacAsset {
            href: "s3://eodata/Sentinel-2/tile.tif".to_string(),
            alternate: Some(json!({"https": {"href": "https://mirror.example/tile.tif"}})),
        };
        assert_eq!(
            asset.resolved_href().as_deref(),
            Some("https://mirror.example/tile.tif")
        );
    }

    #[test]
    fn rewrites_eodata_object_paths() {
        let asset = StacAsset {
            href: "s3://eodata/Sentinel-2/tile.tif".to_string(),
            alternate: None,
        };
        assert_eq!(
            asset.resolved_href().as_deref(),
            Some("https://eodata.dataspace.copernicus.eu/Sentinel-2/tile.tif")
        );
    }

    #[test]
    fn parses_dem_candidate_metadata() {
        let item: StacItem = serde_json::from_value(json!({
            "id": "tile-17-33",
            "geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]},
            "properties": {
                "proj:code": "EPSG:3413",
                "proj:bbox": [-100.0, -100.0, 100.0, 100.0],
                "pgc:data_perc": 98.5,
                "created": "2023-06-01T00:00:00Z"
            },
            "assets": {
                "dem": {"href": "https://tiles.example/tile-17-33.tif"}
            }
        }))
        .unwrap();

        let candidate = dem_candidate_from_item(&item, "dem").unwrap();
        assert_eq!(candidate.epsg, 3413);
        assert_eq!(candidate.data_fraction, 98.5);
        assert!(candidate.footprint.is_none());
        assert_eq!(candidate.asset_href, "https://tiles.example/tile-17-33.tif");
    }

    #[test]
    fn items_without_projection_metadata_are_skipped() {
        let item: StacItem = serde_json::from_value(json!({
            "id": "bare",
            "geometry": {"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]},
            "properties": {},
            "assets": {}
        }))
        .unwrap();
        assert!(dem_candidate_from_item(&item, "dem").is_none());
    }
}
