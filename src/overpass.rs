use std::collections::BTreeSet;

use anyhow::{bail, Result};
use geo::Point;
use itertools::Itertools;
use serde::Deserialize;
use ureq::Agent;

use crate::flock::AlprNode;

const INTERPRETER_URL: &str = "http://overpass-api.de/api/interpreter";
const TURBO_URL: &str = "https://overpass-turbo.eu";

// Degrees on each axis independently, not a great-circle distance, so the
// real-world tolerance shrinks with longitude compression away from the
// equator. Kept as-is; see DESIGN.md.
const DUPLICATE_TOLERANCE: f64 = 0.0001;

#[derive(Debug, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    /// Tightest axis-aligned box around a non-empty set of nodes.
    pub fn around(nodes: &[AlprNode]) -> Result<Self> {
        if nodes.is_empty() {
            bail!("can't compute a bounding box around zero nodes");
        }

        let mut bbox = BoundingBox {
            min_lat: 90.0,
            min_lon: 180.0,
            max_lat: -90.0,
            max_lon: -180.0,
        };
        for node in nodes {
            bbox.min_lat = bbox.min_lat.min(node.lat());
            bbox.max_lat = bbox.max_lat.max(node.lat());
            bbox.min_lon = bbox.min_lon.min(node.lng());
            bbox.max_lon = bbox.max_lon.max(node.lng());
        }

        Ok(bbox)
    }
}

pub struct Conflicts {
    pub node_ids: BTreeSet<u64>,
    pub names: BTreeSet<String>,
}

impl Conflicts {
    pub fn is_empty(&self) -> bool {
        self.node_ids.is_empty()
    }
}

/// Flags candidate nodes that likely already exist in OSM. Queries every
/// ALPR node inside the candidates' bounding box and compares coordinates
/// pairwise. A failed query aborts the import: a partial answer can't tell
/// us which candidates were actually checked.
pub fn detect_duplicates(agent: &Agent, nodes: &[AlprNode]) -> Result<Conflicts> {
    let bbox = BoundingBox::around(nodes)?;
    let existing = alprs_within(agent, &bbox)?;
    log::info!("{} existing ALPR nodes inside the bounding box", existing.len());

    Ok(conflicts_between(nodes, &existing))
}

fn conflicts_between(nodes: &[AlprNode], existing: &[OsmAlpr]) -> Conflicts {
    let mut conflicts = Conflicts {
        node_ids: BTreeSet::new(),
        names: BTreeSet::new(),
    };

    for node in nodes {
        for alpr in existing {
            if (node.lat() - alpr.point.x()).abs() < DUPLICATE_TOLERANCE
                && (node.lng() - alpr.point.y()).abs() < DUPLICATE_TOLERANCE
            {
                conflicts.node_ids.insert(alpr.id);
                conflicts.names.insert(node.name.clone());
            }
        }
    }

    conflicts
}

fn alprs_within(agent: &Agent, bbox: &BoundingBox) -> Result<Vec<OsmAlpr>> {
    let query = format!(
        "[out:json][bbox:{},{},{},{}]; \
         node[\"man_made\"=\"surveillance\"][\"surveillance:type\"=\"ALPR\"]; \
         out body;",
        bbox.min_lat, bbox.min_lon, bbox.max_lat, bbox.max_lon
    );

    let response = match request(agent, &query) {
        Ok(x) => x,
        Err(e) => {
            log::warn!("overpass request failed ({e}), retrying once");
            request(agent, &query)?
        }
    };

    Ok(response.elements.into_iter().map(|x| x.simplify()).collect())
}

fn request(agent: &Agent, query: &str) -> Result<OverpassResponse> {
    Ok(agent
        .post(INTERPRETER_URL)
        .send_form(&[("data", query)])?
        .into_json()?)
}

/// Overpass turbo link selecting exactly the conflicting nodes, for visual
/// review in a browser.
pub fn turbo_link(node_ids: &BTreeSet<u64>) -> String {
    let ids = node_ids.iter().map(|id| format!("node({id});")).join("");
    let query = format!("[out:json];\n(\n{ids}\n);\nout body;");
    format!("{TURBO_URL}/?Q={}&R", urlencoding::encode(&query))
}

#[derive(Deserialize)]
struct OverpassResponse {
    elements: Vec<RawNode>,
}

#[derive(Deserialize)]
struct RawNode {
    id: u64,
    #[serde(flatten)]
    position: RawPosition,
}

impl RawNode {
    fn simplify(self) -> OsmAlpr {
        OsmAlpr {
            id: self.id,
            point: self.position.simplify(),
        }
    }
}

#[derive(Deserialize)]
struct RawPosition {
    lat: f64,
    lon: f64,
}

impl RawPosition {
    fn simplify(self) -> Point {
        Point::new(self.lat, self.lon)
    }
}

pub struct OsmAlpr {
    pub id: u64,
    pub point: Point,
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Point;

    fn node(name: &str, lat: f64, lng: f64) -> AlprNode {
        AlprNode {
            name: name.to_string(),
            point: Point::new(lat, lng),
            direction: None,
            status: "Active".to_string(),
        }
    }

    fn alpr(id: u64, lat: f64, lon: f64) -> OsmAlpr {
        OsmAlpr {
            id,
            point: Point::new(lat, lon),
        }
    }

    #[test]
    fn bounding_box_is_minmax_exact() {
        let nodes = [
            node("a", 30.5, -90.5),
            node("b", 29.8, -89.9),
            node("c", 30.1, -90.2),
        ];
        let bbox = BoundingBox::around(&nodes).unwrap();

        assert_eq!(bbox.min_lat, 29.8);
        assert_eq!(bbox.max_lat, 30.5);
        assert_eq!(bbox.min_lon, -90.5);
        assert_eq!(bbox.max_lon, -89.9);

        for n in &nodes {
            assert!(n.lat() >= bbox.min_lat && n.lat() <= bbox.max_lat);
            assert!(n.lng() >= bbox.min_lon && n.lng() <= bbox.max_lon);
        }
    }

    #[test]
    fn bounding_box_rejects_empty_input() {
        assert!(BoundingBox::around(&[]).is_err());
    }

    #[test]
    fn identical_points_are_flagged() {
        let conflicts = conflicts_between(
            &[node("cam", 30.0, -90.0)],
            &[alpr(1, 30.0, -90.0)],
        );
        assert_eq!(conflicts.node_ids, BTreeSet::from([1]));
        assert!(conflicts.names.contains("cam"));
    }

    #[test]
    fn tolerance_is_strict() {
        // exactly 0.0001 off on one axis: not a duplicate
        let conflicts = conflicts_between(
            &[node("cam", 30.0001, -90.0)],
            &[alpr(1, 30.0, -90.0)],
        );
        assert!(conflicts.is_empty());

        // within tolerance on both axes: flagged
        let conflicts = conflicts_between(
            &[node("cam", 30.00005, -90.00005)],
            &[alpr(1, 30.0, -90.0)],
        );
        assert!(!conflicts.is_empty());

        // outside on both axes: not flagged
        let conflicts = conflicts_between(
            &[node("cam", 30.0002, -90.0002)],
            &[alpr(1, 30.0, -90.0)],
        );
        assert!(conflicts.is_empty());
    }

    #[test]
    fn conflict_sets_collapse_multiplicity() {
        // one candidate near two existing nodes
        let conflicts = conflicts_between(
            &[node("cam", 30.0, -90.0)],
            &[alpr(1, 30.00005, -90.0), alpr(2, 30.0, -90.00005)],
        );
        assert_eq!(conflicts.node_ids.len(), 2);
        assert_eq!(conflicts.names.len(), 1);

        // two candidates near one existing node
        let conflicts = conflicts_between(
            &[node("cam a", 30.00005, -90.0), node("cam b", 30.0, -90.00005)],
            &[alpr(7, 30.0, -90.0)],
        );
        assert_eq!(conflicts.node_ids.len(), 1);
        assert_eq!(conflicts.names.len(), 2);
    }

    #[test]
    fn turbo_link_selects_conflicting_nodes() {
        let link = turbo_link(&BTreeSet::from([123, 456]));
        assert!(link.starts_with("https://overpass-turbo.eu/?Q="));
        assert!(link.ends_with("&R"));
        assert!(link.contains(&urlencoding::encode("node(123);").into_owned()));
        assert!(link.contains(&urlencoding::encode("node(456);").into_owned()));
    }
}
