use std::process;

use anyhow::{bail, Result};
use clap::Parser;
use inquire::Confirm;
use itertools::Itertools;

use crate::{auth::AuthSession, config::Mode};

mod auth;
mod config;
mod flock;
mod osm;
mod overpass;

#[derive(Debug, Parser)]
#[command(about = "Import Flock Safety ALPR cameras into OpenStreetMap")]
struct Cli {
    /// Flock planner sharing URL (https://planner.flocksafety.com/public/<uuid>)
    planner_url: String,
}

pub fn agent() -> ureq::Agent {
    ureq::AgentBuilder::new().user_agent("DeFlock/1.0").build()
}

/// Best effort; the link is printed either way.
pub fn open_in_browser(url: &str) {
    println!("{url}");
    let opened = process::Command::new("xdg-open")
        .arg(url)
        .spawn()
        .and_then(|mut child| child.wait());
    if let Err(e) = opened {
        log::warn!("couldn't open a browser ({e})");
    }
}

fn main() -> Result<()> {
    pretty_env_logger::init();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let mode = Mode::from_env();
    log::info!("running in {mode} environment");

    if mode == Mode::Prod {
        let ack = Confirm::new("WARNING: This will make changes to OSM. Are you sure you want to continue?")
            .with_default(false)
            .prompt()?;
        if !ack {
            println!("User did not approve. Exiting.");
            return Ok(());
        }
    }

    let agency_uuid = flock::agency_uuid(&cli.planner_url)?;
    let agent = agent();

    let deployment = flock::fetch_deployment(&agent, &agency_uuid, mode.use_cache())?;
    let nodes = flock::normalize(deployment);
    if nodes.is_empty() {
        bail!("deployment has no active cameras");
    }
    log::info!("{} active cameras to import", nodes.len());
    for node in &nodes {
        log::debug!("{} ({}): {}, {}", node.name, node.status, node.lat(), node.lng());
    }

    let conflicts = overpass::detect_duplicates(&agent, &nodes)?;
    if !conflicts.is_empty() {
        println!(
            "Found {} conflicting nodes in OSM, detected as duplicates: {}",
            conflicts.node_ids.len(),
            conflicts.names.iter().join(", "),
        );

        let view = Confirm::new("View the potential duplicates in overpass turbo?")
            .with_default(true)
            .prompt()?;
        if view {
            open_in_browser(&overpass::turbo_link(&conflicts.node_ids));
        }

        let cont =
            Confirm::new("Once you've confirmed there are no duplicates, do you want to continue?")
                .with_default(false)
                .prompt()?;
        if !cont {
            println!("User did not approve. Exiting.");
            return Ok(());
        }
    }

    let session = AuthSession::load_or_authorize(&agent, mode.api_base_url())?;
    let mut editor = osm::Editor::new(agent, mode.api_base_url(), session);

    let changeset_id = editor.create_changeset()?;
    log::info!("changeset created with id {changeset_id}");

    editor.upload(&changeset_id, &nodes)?;
    log::info!("uploaded {} nodes", nodes.len());

    println!("Please review the changes before submitting.");
    open_in_browser(&editor.browse_url(&changeset_id));

    let approve = Confirm::new("Do you approve these changes?")
        .with_default(false)
        .prompt()?;
    if approve {
        editor.close_changeset(&changeset_id)?;
        println!("Changeset {changeset_id} closed successfully.");
    } else {
        println!("User did not approve changeset. Not submitting.");
    }

    Ok(())
}
