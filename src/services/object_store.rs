//! Durable object store backed by a Bluesky PDS repository.
//!
//! Unified results persist as records in a custom collection; the cache
//! pointer is the record's `at://` URI. The session handshake is lazy and
//! guarded by a mutex; an expired session is refreshed once and the
//! operation replayed. Writes are not retried beyond that — record
//! creation is not idempotent.

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::cancel::CancelSignal;
use crate::error::{AppError, Result};
use crate::models::LookupRecord;
use crate::services::http::TransportClient;

/// Record collection (lexicon NSID) for stored lookups.
pub const COLLECTION: &str = "app.songbridge.lookup";

#[derive(Debug, Clone)]
struct Session {
    access_jwt: String,
    did: String,
}

pub struct ObjectStore {
    http: TransportClient,
    pds_url: String,
    identifier: String,
    password: String,
    session: Mutex<Option<Session>>,
}

/// `at://{repo}/{collection}/{rkey}`
fn parse_at_uri(uri: &str) -> Option<(String, String, String)> {
    let rest = uri.strip_prefix("at://")?;
    let mut parts = rest.splitn(3, '/');
    let repo = parts.next()?.to_string();
    let collection = parts.next()?.to_string();
    let rkey = parts.next()?.to_string();
    if repo.is_empty() || collection.is_empty() || rkey.is_empty() {
        return None;
    }
    Some((repo, collection, rkey))
}

impl ObjectStore {
    pub fn new(http: TransportClient, pds_url: &str, identifier: &str, password: &str) -> Self {
        Self {
            http,
            pds_url: pds_url.trim_end_matches('/').to_string(),
            identifier: identifier.to_string(),
            password: password.to_string(),
            session: Mutex::new(None),
        }
    }

    fn xrpc(&self, method: &str) -> String {
        format!("{}/xrpc/{}", self.pds_url, method)
    }

    async fn ensure_session(&self, cancel: &CancelSignal) -> Result<Session> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }
        let session = self.create_session(cancel).await?;
        *guard = Some(session.clone());
        Ok(session)
    }

    async fn create_session(&self, cancel: &CancelSignal) -> Result<Session> {
        let body = json!({
            "identifier": self.identifier,
            "password": self.password,
        });
        let response = self
            .http
            .post_json(&self.xrpc("com.atproto.server.createSession"), &body, None, cancel)
            .await?;
        if !response.is_success() {
            return Err(AppError::ObjectStore(format!(
                "createSession returned HTTP {}",
                response.status
            )));
        }
        let access_jwt = response.body["accessJwt"].as_str().unwrap_or_default().to_string();
        let did = response.body["did"].as_str().unwrap_or_default().to_string();
        if access_jwt.is_empty() || did.is_empty() {
            return Err(AppError::ObjectStore("createSession response missing accessJwt/did".into()));
        }
        debug!(did = %did, "established object store session");
        Ok(Session { access_jwt, did })
    }

    /// Drop the cached session and mint a new one. Called once when a call
    /// comes back 401 (expired access token).
    async fn refresh_session(&self, cancel: &CancelSignal) -> Result<Session> {
        let mut guard = self.session.lock().await;
        let session = self.create_session(cancel).await?;
        *guard = Some(session.clone());
        Ok(session)
    }

    async fn authed_post(
        &self,
        method: &str,
        body: &Value,
        cancel: &CancelSignal,
    ) -> Result<crate::services::http::JsonResponse> {
        let session = self.ensure_session(cancel).await?;
        let auth = format!("Bearer {}", session.access_jwt);
        let response = self.http.post_json(&self.xrpc(method), body, Some(&auth), cancel).await?;
        if response.status == reqwest::StatusCode::UNAUTHORIZED {
            let session = self.refresh_session(cancel).await?;
            let auth = format!("Bearer {}", session.access_jwt);
            return self.http.post_json(&self.xrpc(method), body, Some(&auth), cancel).await;
        }
        Ok(response)
    }

    /// Persist a new record; returns its `at://` URI as the cache pointer.
    pub async fn create(&self, record: &LookupRecord, cancel: &CancelSignal) -> Result<String> {
        let session = self.ensure_session(cancel).await?;
        let body = json!({
            "repo": session.did,
            "collection": COLLECTION,
            "record": serde_json::to_value(record)
                .map_err(|e| AppError::ObjectStore(format!("serializing record: {e}")))?,
        });
        let response = self.authed_post("com.atproto.repo.createRecord", &body, cancel).await?;
        if !response.is_success() {
            return Err(AppError::ObjectStore(format!(
                "createRecord returned HTTP {}",
                response.status
            )));
        }
        let uri = response.body["uri"].as_str().unwrap_or_default().to_string();
        if uri.is_empty() {
            return Err(AppError::ObjectStore("createRecord response missing uri".into()));
        }
        Ok(uri)
    }

    /// Fetch the record behind a pointer; `Ok(None)` when it no longer
    /// exists (caller evicts its index row).
    pub async fn get(&self, pointer: &str, cancel: &CancelSignal) -> Result<Option<LookupRecord>> {
        let Some((repo, collection, rkey)) = parse_at_uri(pointer) else {
            warn!(pointer, "malformed pointer uri");
            return Ok(None);
        };
        let session = self.ensure_session(cancel).await?;
        let auth = format!("Bearer {}", session.access_jwt);
        let url = format!(
            "{}?repo={}&collection={}&rkey={}",
            self.xrpc("com.atproto.repo.getRecord"),
            urlencoding::encode(&repo),
            urlencoding::encode(&collection),
            urlencoding::encode(&rkey),
        );
        let response = match self.http.get_json(&url, Some(&auth), cancel).await {
            Ok(response) => response,
            Err(AppError::Cancelled) => return Err(AppError::Cancelled),
            Err(e) => return Err(AppError::ObjectStore(e.to_string())),
        };
        if response.status == reqwest::StatusCode::BAD_REQUEST
            || response.status == reqwest::StatusCode::NOT_FOUND
        {
            return Ok(None);
        }
        if !response.is_success() {
            return Err(AppError::ObjectStore(format!(
                "getRecord returned HTTP {}",
                response.status
            )));
        }
        match serde_json::from_value::<LookupRecord>(response.body["value"].clone()) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                warn!(pointer, error = %e, "stored record failed to parse, treating as missing");
                Ok(None)
            }
        }
    }

    /// Overwrite the record behind an existing pointer. Returns `false`
    /// when the record has disappeared; the caller recreates.
    pub async fn update_in_place(
        &self,
        pointer: &str,
        record: &LookupRecord,
        cancel: &CancelSignal,
    ) -> Result<bool> {
        let Some((repo, collection, rkey)) = parse_at_uri(pointer) else {
            return Ok(false);
        };
        let body = json!({
            "repo": repo,
            "collection": collection,
            "rkey": rkey,
            "record": serde_json::to_value(record)
                .map_err(|e| AppError::ObjectStore(format!("serializing record: {e}")))?,
        });
        let response = self.authed_post("com.atproto.repo.putRecord", &body, cancel).await?;
        if response.is_success() {
            return Ok(true);
        }
        if response.status == reqwest::StatusCode::BAD_REQUEST
            || response.status == reqwest::StatusCode::NOT_FOUND
        {
            return Ok(false);
        }
        Err(AppError::ObjectStore(format!(
            "putRecord returned HTTP {}",
            response.status
        )))
    }
}
