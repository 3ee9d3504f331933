use std::{
    fs::{read_to_string, write},
    path::PathBuf,
};

use anyhow::{bail, Context, Result};
use geo::Point;
use serde::Deserialize;
use ureq::Agent;

const PLANNER_URL_PREFIX: &str = "https://planner.flocksafety.com/public/";
const DEPLOYMENTS_URL_PREFIX: &str = "https://beefeater.flocksafety.com/api/v1/public/deployments/";

/// Extracts the agency uuid from a Flock planner sharing URL. The uuid is
/// the only variable portion and is limited to lowercase hex and dashes.
pub fn agency_uuid(planner_url: &str) -> Result<String> {
    if let Some(uuid) = planner_url.strip_prefix(PLANNER_URL_PREFIX) {
        if !uuid.is_empty()
            && uuid
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Ok(uuid.to_string());
        }
    }

    bail!("invalid Flock planner URL: {planner_url}")
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    resolved_cameras: Vec<Camera>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Camera {
    name: String,
    lat: f64,
    lng: f64,
    // sometimes missing from the beefeater response
    rotation_angle: Option<f64>,
    status: String,
}

/// Fetches the public deployment details for an agency. In dev mode the raw
/// response body is cached to `<uuid>.json` next to the binary and reused
/// verbatim on later runs; the cache has no expiry.
pub fn fetch_deployment(agent: &Agent, agency_uuid: &str, use_cache: bool) -> Result<Deployment> {
    let cache_path = PathBuf::from(format!("{agency_uuid}.json"));
    if use_cache && cache_path.exists() {
        log::info!("using cached response");
        return Ok(serde_json::from_str(&read_to_string(&cache_path)?)?);
    }

    let raw = agent
        .get(&format!("{DEPLOYMENTS_URL_PREFIX}{agency_uuid}"))
        .call()
        .context("failed to fetch deployment details")?
        .into_string()?;

    if use_cache {
        log::info!("cache miss, caching response");
        write(&cache_path, &raw)?;
    }

    Ok(serde_json::from_str(&raw)?)
}

pub struct AlprNode {
    pub name: String,
    pub point: Point,
    pub direction: Option<u16>,
    pub status: String,
}

impl AlprNode {
    pub fn lat(&self) -> f64 {
        self.point.x()
    }

    pub fn lng(&self) -> f64 {
        self.point.y()
    }
}

/// Drops decommissioned cameras and converts the rest into the shape OSM
/// wants, including the rotation angle fixup.
pub fn normalize(deployment: Deployment) -> Vec<AlprNode> {
    deployment
        .resolved_cameras
        .into_iter()
        .filter(|camera| camera.status != "Decommissioned")
        .map(|camera| AlprNode {
            name: camera.name,
            point: Point::new(camera.lat, camera.lng),
            direction: camera.rotation_angle.map(convert_to_north_reference),
            status: camera.status,
        })
        .collect()
}

/// Flock measures rotation from an axis 90 degrees off true north; OSM
/// direction tags want a compass bearing in [0, 360).
pub fn convert_to_north_reference(angle: f64) -> u16 {
    ((90.0 - angle).rem_euclid(360.0).round() as u16) % 360
}
