//! Version-control gateway: which changesets were tested together.

use std::path::Path;

use log::info;
use serde::Deserialize;

use crate::error::Result;
use crate::model::Commit;

pub const DEFAULT_SERVER: &str = "https://hg.mozilla.org/mozilla-central";

#[derive(Deserialize)]
struct AutomationRelevance {
    changesets: Vec<Commit>,
}

/// Client for an hg.mozilla.org style server.
pub struct Gateway {
    pub server_address: String,
}

impl Gateway {
    pub fn new(server_address: impl Into<String>) -> Self {
        let server_address = server_address.into();
        info!("Configured version-control gateway at {server_address}");
        Self { server_address }
    }

    /// Changesets pushed together with `revision` and tested as one build,
    /// oldest first.
    pub fn automation_relevance(&self, revision: &str) -> Result<Vec<Commit>> {
        let url = format!(
            "{}/json-automationrelevance/{}",
            self.server_address.trim_end_matches('/'),
            revision
        );
        let resp = ureq::get(&url).set("User-Agent", "commitcov").call()?;
        let body: AutomationRelevance = resp.into_json()?;
        Ok(body.changesets)
    }
}

/// Parse an automation-relevance document (`{"changesets": [...]}`).
pub fn parse_changesets(input: &[u8]) -> Result<Vec<Commit>> {
    let body: AutomationRelevance = serde_json::from_slice(input)?;
    Ok(body.changesets)
}

/// Read an automation-relevance document saved to disk.
pub fn load_changesets(path: &Path) -> Result<Vec<Commit>> {
    parse_changesets(&std::fs::read(path)?)
}
