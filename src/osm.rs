use std::fmt::Write;

use anyhow::{Context, Result};
use ureq::Agent;

use crate::{auth::AuthSession, flock::AlprNode};

const GENERATOR: &str = "ALPR Script";

/// Client for the OSM editing API's changeset operations.
pub struct Editor {
    agent: Agent,
    base_url: String,
    session: AuthSession,
}

impl Editor {
    pub fn new(agent: Agent, base_url: &str, session: AuthSession) -> Self {
        Editor {
            agent,
            base_url: base_url.to_string(),
            session,
        }
    }

    /// Opens a new changeset and returns its id.
    pub fn create_changeset(&mut self) -> Result<String> {
        let payload = changeset_xml();
        let url = format!("{}/api/0.6/changeset/create", self.base_url);
        let response = self
            .request(|agent, token| {
                agent
                    .put(&url)
                    .set("Authorization", &format!("Bearer {token}"))
                    .set("Content-Type", "text/xml")
                    .send_string(&payload)
            })
            .context("failed to create changeset")?;

        Ok(response.into_string()?.trim().to_string())
    }

    /// Uploads all nodes as a single osmChange creation batch.
    pub fn upload(&mut self, changeset_id: &str, nodes: &[AlprNode]) -> Result<()> {
        let payload = osmchange_xml(changeset_id, nodes)?;
        let url = format!("{}/api/0.6/changeset/{changeset_id}/upload", self.base_url);
        self.request(|agent, token| {
            agent
                .post(&url)
                .set("Authorization", &format!("Bearer {token}"))
                .set("Content-Type", "text/xml")
                .send_string(&payload)
        })
        .context("failed to upload nodes")?;

        Ok(())
    }

    pub fn close_changeset(&mut self, changeset_id: &str) -> Result<()> {
        let url = format!("{}/api/0.6/changeset/{changeset_id}/close", self.base_url);
        self.request(|agent, token| {
            agent
                .put(&url)
                .set("Authorization", &format!("Bearer {token}"))
                .call()
        })
        .context("failed to close changeset")?;

        Ok(())
    }

    pub fn browse_url(&self, changeset_id: &str) -> String {
        format!("{}/browse/changeset/{changeset_id}", self.base_url)
    }

    /// Runs one API request, recovering from an expired token exactly once:
    /// on a 401 the session reauthorizes and the same request is replayed. A
    /// second 401, or any other failure status, is fatal.
    fn request<F>(&mut self, f: F) -> Result<ureq::Response>
    where
        F: Fn(&Agent, &str) -> Result<ureq::Response, ureq::Error>,
    {
        match f(&self.agent, self.session.access_token()) {
            Err(ureq::Error::Status(401, _)) => {
                log::warn!("access token expired, re-authenticating and re-attempting");
                self.session.reauthorize(&self.agent)?;
                Ok(f(&self.agent, self.session.access_token())?)
            }
            result => Ok(result?),
        }
    }
}

fn changeset_xml() -> String {
    format!(
        r#"<osm version="0.6" generator="{GENERATOR}"><changeset><tag k="comment" v="Adding ALPR nodes"/><tag k="created_by" v="{GENERATOR}"/></changeset></osm>"#
    )
}

fn osmchange_xml(changeset_id: &str, nodes: &[AlprNode]) -> Result<String> {
    let mut xml = format!(r#"<osmChange version="0.6" generator="{GENERATOR}"><create>"#);

    // new nodes get negative placeholder ids
    for (i, node) in nodes.iter().enumerate() {
        write!(
            xml,
            r#"<node id="-{}" lat="{}" lon="{}" changeset="{}">"#,
            i + 1,
            node.lat(),
            node.lng(),
            xml_escape(changeset_id),
        )?;
        for (k, v) in node_tags(node) {
            write!(xml, r#"<tag k="{k}" v="{}"/>"#, xml_escape(&v))?;
        }
        xml.push_str("</node>");
    }

    xml.push_str("</create></osmChange>");
    Ok(xml)
}

fn node_tags(node: &AlprNode) -> Vec<(&'static str, String)> {
    let mut tags = vec![
        ("name", node.name.clone()),
        ("man_made", "surveillance".to_string()),
        ("surveillance:type", "ALPR".to_string()),
        ("camera:mount", "pole".to_string()),
        ("camera:type", "fixed".to_string()),
        ("surveillance", "public".to_string()),
        ("surveillance:zone", "traffic".to_string()),
        ("manufacturer", "Flock Safety".to_string()),
        ("manufacturer:wikidata", "Q108485435".to_string()),
    ];

    if let Some(direction) = node.direction {
        tags.push(("direction", direction.to_string()));
    }

    // TODO: add operator once the deployment response exposes the agency name
    tags
}

fn xml_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Point;

    fn node(name: &str, direction: Option<u16>) -> AlprNode {
        AlprNode {
            name: name.to_string(),
            point: Point::new(30.0, -90.0),
            direction,
            status: "Active".to_string(),
        }
    }

    #[test]
    fn changeset_document_shape() {
        let xml = changeset_xml();
        assert!(xml.starts_with(r#"<osm version="0.6" generator="ALPR Script">"#));
        assert!(xml.contains(r#"<tag k="comment" v="Adding ALPR nodes"/>"#));
        assert!(xml.contains(r#"<tag k="created_by" v="ALPR Script"/>"#));
    }

    #[test]
    fn osmchange_assigns_decrementing_placeholder_ids() {
        let nodes = [node("a", None), node("b", None)];
        let xml = osmchange_xml("42", &nodes).unwrap();

        assert!(xml.contains(r#"<node id="-1" lat="30" lon="-90" changeset="42">"#));
        assert!(xml.contains(r#"<node id="-2""#));
        assert!(xml.ends_with("</create></osmChange>"));
    }

    #[test]
    fn osmchange_carries_fixed_tags_and_optional_direction() {
        let xml = osmchange_xml("7", &[node("cam", Some(250))]).unwrap();
        assert!(xml.contains(r#"<tag k="man_made" v="surveillance"/>"#));
        assert!(xml.contains(r#"<tag k="surveillance:type" v="ALPR"/>"#));
        assert!(xml.contains(r#"<tag k="manufacturer:wikidata" v="Q108485435"/>"#));
        assert!(xml.contains(r#"<tag k="direction" v="250"/>"#));

        let xml = osmchange_xml("7", &[node("cam", None)]).unwrap();
        assert!(!xml.contains(r#"k="direction""#));
    }

    #[test]
    fn names_are_xml_escaped() {
        let xml = osmchange_xml("7", &[node(r#"3rd & "Main" <Cam>"#, None)]).unwrap();
        assert!(xml.contains(r#"<tag k="name" v="3rd &amp; &quot;Main&quot; &lt;Cam&gt;"/>"#));
    }
}
