use std::{
    collections::BTreeMap,
    env,
    fs::{read_to_string, remove_file, write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use inquire::Text;
use serde::{Deserialize, Serialize};
use ureq::Agent;

use crate::open_in_browser;

const REDIRECT_URI: &str = "https://cdn.deflock.me/echo.html";
const SCOPE: &str = "write_api";
const TOKEN_FILE: &str = "token.json";

/// OAuth2 session state for the OSM editing API. Owns the client
/// credentials, the on-disk token file, and the current token; all loading
/// and saving goes through here rather than ambient file access.
pub struct AuthSession {
    credentials: Credentials,
    base_url: String,
    path: PathBuf,
    token: Token,
}

struct Credentials {
    client_id: String,
    client_secret: String,
}

impl Credentials {
    fn from_env() -> Result<Self> {
        Ok(Credentials {
            client_id: env::var("CLIENT_ID").context("CLIENT_ID is not set")?,
            client_secret: env::var("CLIENT_SECRET").context("CLIENT_SECRET is not set")?,
        })
    }
}

/// The token endpoint's response. Only `access_token` is interpreted; the
/// remaining fields round-trip through the token file untouched.
#[derive(Serialize, Deserialize)]
struct Token {
    access_token: String,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

impl AuthSession {
    /// Reuses the cached token file when present, otherwise runs the
    /// interactive authorization flow and saves the result.
    pub fn load_or_authorize(agent: &Agent, base_url: &str) -> Result<Self> {
        let credentials = Credentials::from_env()?;
        let path = PathBuf::from(TOKEN_FILE);

        let token = if path.exists() {
            log::info!("using cached access token");
            serde_json::from_str(&read_to_string(&path)?)?
        } else {
            log::info!("no cached access token found, generating a new one");
            let token = request_token(agent, &credentials, base_url)?;
            write(&path, serde_json::to_string(&token)?)?;
            token
        };

        Ok(AuthSession {
            credentials,
            base_url: base_url.to_string(),
            path,
            token,
        })
    }

    /// Discards the expired token and runs the authorization flow again.
    pub fn reauthorize(&mut self, agent: &Agent) -> Result<()> {
        log::info!("discarding expired access token");
        if self.path.exists() {
            remove_file(&self.path)?;
        }

        self.token = request_token(agent, &self.credentials, &self.base_url)?;
        write(&self.path, serde_json::to_string(&self.token)?)?;

        Ok(())
    }

    pub fn access_token(&self) -> &str {
        &self.token.access_token
    }
}

/// Interactive authorization-code flow: the user approves access in a
/// browser, then pastes the code from the redirect page back into the
/// terminal for the token exchange.
fn request_token(agent: &Agent, credentials: &Credentials, base_url: &str) -> Result<Token> {
    let authorize_url = format!(
        "{base_url}/oauth2/authorize?response_type=code&client_id={}&redirect_uri={}&scope={SCOPE}",
        urlencoding::encode(&credentials.client_id),
        urlencoding::encode(REDIRECT_URI),
    );

    println!("Opening browser to authorize access to the OSM API...");
    open_in_browser(&authorize_url);

    let code = Text::new("Paste the authorization code here:").prompt()?;

    let token = agent
        .post(&format!("{base_url}/oauth2/token"))
        .send_form(&[
            ("grant_type", "authorization_code"),
            ("code", code.trim()),
            ("redirect_uri", REDIRECT_URI),
            ("client_id", &credentials.client_id),
            ("client_secret", &credentials.client_secret),
        ])
        .context("token exchange failed")?
        .into_json()?;

    Ok(token)
}
