//! Roster store HTTP client and roster loading.
//!
//! The roster service owns the enrollment images; this side only ever sees
//! name lists and JPEG bytes. Reference embeddings are rebuilt locally at
//! load time by running each stored image through the recognizer.

use crate::engine::{EngineError, EngineHandle};
use rollcall_core::RosterEntry;
use thiserror::Error;

/// The store keeps at most this many reference images per name.
pub const MAX_REFERENCE_IMAGES: u32 = 2;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("roster http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("roster store returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("engine: {0}")]
    Engine(#[from] EngineError),
}

/// HTTP client for the roster store service.
///
/// No automatic retries: a failed request is terminal for that attempt
/// and must be retried by the user action that triggered it.
#[derive(Clone)]
pub struct RosterClient {
    http: reqwest::Client,
    base_url: String,
}

impl RosterClient {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// GET /known-names — every enrolled name, in store order.
    pub async fn known_names(&self) -> Result<Vec<String>, RosterError> {
        let url = format!("{}/known-names", self.base_url);
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }
        Ok(resp.json().await?)
    }

    /// GET /images/{name}/{idx} — one reference JPEG, `None` on 404.
    pub async fn reference_image(
        &self,
        name: &str,
        idx: u32,
    ) -> Result<Option<Vec<u8>>, RosterError> {
        let url = format!("{}/images/{}/{}", self.base_url, name, idx);
        let resp = self.http.get(&url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }
        Ok(Some(resp.bytes().await?.to_vec()))
    }

    /// POST /register — multipart {name, image}. The store enforces the
    /// two-image cap (slot 2 is overwritten on further submissions).
    pub async fn register(&self, name: &str, jpeg: Vec<u8>) -> Result<(), RosterError> {
        let url = format!("{}/register", self.base_url);
        let form = reqwest::multipart::Form::new()
            .text("name", name.to_string())
            .part(
                "image",
                reqwest::multipart::Part::bytes(jpeg)
                    .file_name("face.jpg")
                    .mime_str("image/jpeg")?,
            );
        let resp = self.http.post(&url).multipart(form).send().await?;
        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }
        Ok(())
    }
}

async fn status_error(resp: reqwest::Response) -> RosterError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    RosterError::Status { status, body }
}

/// Fetch the name list and rebuild reference embeddings for each name.
///
/// Names whose stored images yield no usable embedding are skipped with a
/// warning rather than failing the whole load — one bad photo must not
/// take the roster down.
pub async fn load_roster(
    client: &RosterClient,
    engine: &EngineHandle,
) -> Result<Vec<RosterEntry>, RosterError> {
    let names = client.known_names().await?;
    let mut roster = Vec::with_capacity(names.len());

    for name in names {
        let mut embeddings = Vec::new();
        for idx in 1..=MAX_REFERENCE_IMAGES {
            let Some(jpeg) = client.reference_image(&name, idx).await? else {
                continue;
            };
            match engine.embed_image(jpeg).await {
                Ok(Some(embedding)) => embeddings.push(embedding),
                Ok(None) => {
                    tracing::warn!(name = %name, idx, "no face found in reference image");
                }
                Err(e) => {
                    tracing::warn!(name = %name, idx, error = %e, "reference embedding failed");
                }
            }
        }

        if embeddings.is_empty() {
            tracing::warn!(name = %name, "skipping roster entry — no valid reference embeddings");
            continue;
        }
        roster.push(RosterEntry { name, embeddings });
    }

    tracing::info!(entries = roster.len(), "roster loaded");
    Ok(roster)
}
