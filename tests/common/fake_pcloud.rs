//! In-process stand-in for the pCloud HTTP API
//!
//! Implements the handful of endpoints the uploader talks to, with the same
//! `{"result": 0, ...}` envelope the real API uses. The same server also hosts
//! a thumbnail image so the real `HttpThumbnailFetcher` can be exercised.
//!
//! Tests flip the knobs on [`FakePCloudState`] to inject failures and read its
//! counters to assert on what reached the backend.

use super::constants::*;
use axum::{
    extract::{Multipart, Query, State},
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

type Params = Query<HashMap<String, String>>;

const FIRST_FOLDER_ID: u64 = 1000;
const FIRST_FILE_ID: u64 = 5000;

#[derive(Clone, Debug)]
pub struct StoredFile {
    pub file_id: u64,
    pub folder_id: u64,
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Mutable account state plus failure switches.
pub struct FakePCloudState {
    folders: Mutex<Vec<(String, u64)>>,
    files: Mutex<Vec<StoredFile>>,
    next_folder_id: AtomicU64,
    next_file_id: AtomicU64,

    /// Reject every upload with an over-quota error
    pub reject_uploads: AtomicBool,
    /// Answer create with 2004 instead of the folder metadata
    pub report_exists_conflict: AtomicBool,
    /// Number of upcoming link requests that fail as "not found yet"
    pub publish_failures: AtomicU32,

    pub login_calls: AtomicU32,
    pub list_calls: AtomicU32,
    pub create_calls: AtomicU32,
    pub upload_calls: AtomicU32,
    pub publish_calls: AtomicU32,
}

impl Default for FakePCloudState {
    fn default() -> Self {
        Self {
            folders: Mutex::new(Vec::new()),
            files: Mutex::new(Vec::new()),
            next_folder_id: AtomicU64::new(FIRST_FOLDER_ID),
            next_file_id: AtomicU64::new(FIRST_FILE_ID),
            reject_uploads: AtomicBool::new(false),
            report_exists_conflict: AtomicBool::new(false),
            publish_failures: AtomicU32::new(0),
            login_calls: AtomicU32::new(0),
            list_calls: AtomicU32::new(0),
            create_calls: AtomicU32::new(0),
            upload_calls: AtomicU32::new(0),
            publish_calls: AtomicU32::new(0),
        }
    }
}

impl FakePCloudState {
    /// Pre-create a folder, returning its id.
    pub fn add_folder(&self, name: &str) -> u64 {
        let id = self.next_folder_id.fetch_add(1, Ordering::SeqCst);
        self.folders.lock().unwrap().push((name.to_string(), id));
        id
    }

    pub fn folders(&self) -> Vec<(String, u64)> {
        self.folders.lock().unwrap().clone()
    }

    pub fn folder_id(&self, name: &str) -> Option<u64> {
        self.folders
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
    }

    pub fn files(&self) -> Vec<StoredFile> {
        self.files.lock().unwrap().clone()
    }

    pub fn files_in(&self, folder: &str) -> Vec<StoredFile> {
        let Some(folder_id) = self.folder_id(folder) else {
            return Vec::new();
        };
        self.files()
            .into_iter()
            .filter(|f| f.folder_id == folder_id)
            .collect()
    }

    fn file(&self, file_id: u64) -> Option<StoredFile> {
        self.files
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.file_id == file_id)
            .cloned()
    }

    /// Consume one injected link failure, if any are pending.
    fn take_publish_failure(&self) -> bool {
        self.publish_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn api_error(code: u32, message: &str) -> Json<Value> {
    Json(json!({ "result": code, "error": message }))
}

fn check_auth(params: &HashMap<String, String>) -> Result<(), Json<Value>> {
    match params.get("auth") {
        Some(token) if token == TEST_AUTH_TOKEN => Ok(()),
        _ => Err(api_error(1000, "Log in required.")),
    }
}

fn file_id_param(params: &HashMap<String, String>) -> Option<u64> {
    params.get("fileid").and_then(|id| id.parse().ok())
}

fn folder_json(name: &str, id: u64) -> Value {
    json!({ "name": name, "isfolder": true, "folderid": id, "parentfolderid": 0 })
}

async fn userinfo(State(state): State<Arc<FakePCloudState>>, Query(params): Params) -> Json<Value> {
    state.login_calls.fetch_add(1, Ordering::SeqCst);
    let username = params.get("username").map(String::as_str);
    let password = params.get("password").map(String::as_str);
    if username == Some(TEST_USERNAME) && password == Some(TEST_PASSWORD) {
        Json(json!({ "result": 0, "auth": TEST_AUTH_TOKEN, "email": TEST_USERNAME }))
    } else {
        api_error(2000, "Log in failed.")
    }
}

async fn listfolder(State(state): State<Arc<FakePCloudState>>, Query(params): Params) -> Json<Value> {
    state.list_calls.fetch_add(1, Ordering::SeqCst);
    if let Err(e) = check_auth(&params) {
        return e;
    }

    let contents: Vec<Value> = state
        .folders()
        .iter()
        .map(|(name, id)| folder_json(name, *id))
        .chain(state.files().iter().filter(|f| f.folder_id == 0).map(|f| {
            json!({ "name": f.name, "isfolder": false, "fileid": f.file_id })
        }))
        .collect();

    Json(json!({
        "result": 0,
        "metadata": { "name": "/", "isfolder": true, "folderid": 0, "contents": contents }
    }))
}

async fn createfolderifnotexists(
    State(state): State<Arc<FakePCloudState>>,
    Query(params): Params,
) -> Json<Value> {
    state.create_calls.fetch_add(1, Ordering::SeqCst);
    if let Err(e) = check_auth(&params) {
        return e;
    }
    let Some(name) = params.get("name").filter(|n| !n.is_empty()) else {
        return api_error(1001, "No full path or name/folderid provided.");
    };

    let existing = state.folder_id(name);
    if existing.is_some() && state.report_exists_conflict.load(Ordering::SeqCst) {
        return api_error(2004, "File or folder alredy exists.");
    }

    let (id, created) = {
        let mut folders = state.folders.lock().unwrap();
        match folders.iter().find(|(n, _)| n == name) {
            Some((_, id)) => (*id, false),
            None => {
                let id = state.next_folder_id.fetch_add(1, Ordering::SeqCst);
                folders.push((name.clone(), id));
                (id, true)
            }
        }
    };

    Json(json!({ "result": 0, "created": created, "metadata": folder_json(name, id) }))
}

async fn uploadfile(
    State(state): State<Arc<FakePCloudState>>,
    Query(params): Params,
    mut multipart: Multipart,
) -> Json<Value> {
    state.upload_calls.fetch_add(1, Ordering::SeqCst);
    if let Err(e) = check_auth(&params) {
        return e;
    }
    if state.reject_uploads.load(Ordering::SeqCst) {
        return api_error(2008, "User is over quota.");
    }
    let Some(folder_id) = params.get("folderid").and_then(|id| id.parse::<u64>().ok()) else {
        return api_error(1001, "No full path or folderid provided.");
    };
    if folder_id != 0 && !state.folders().iter().any(|(_, id)| *id == folder_id) {
        return api_error(2005, "Directory does not exist.");
    }

    let rename = params.get("renameifexists").map(String::as_str) == Some("1");

    let mut uploaded = Vec::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        let requested = field.file_name().unwrap_or("unnamed").to_string();
        let Ok(bytes) = field.bytes().await else {
            return api_error(5000, "Internal upload error.");
        };
        let (file_id, name) = {
            let mut files = state.files.lock().unwrap();
            let taken = |candidate: &str| {
                files
                    .iter()
                    .any(|f| f.folder_id == folder_id && f.name == candidate)
            };
            if !taken(&requested) {
                let file_id = state.next_file_id.fetch_add(1, Ordering::SeqCst);
                files.push(StoredFile {
                    file_id,
                    folder_id,
                    name: requested.clone(),
                    bytes: bytes.to_vec(),
                });
                (file_id, requested)
            } else if rename {
                let name = (1..)
                    .map(|n| renamed(&requested, n))
                    .find(|candidate| !taken(candidate))
                    .unwrap();
                let file_id = state.next_file_id.fetch_add(1, Ordering::SeqCst);
                files.push(StoredFile {
                    file_id,
                    folder_id,
                    name: name.clone(),
                    bytes: bytes.to_vec(),
                });
                (file_id, name)
            } else {
                // Without renameifexists pCloud overwrites the existing file in place.
                let existing = files
                    .iter_mut()
                    .find(|f| f.folder_id == folder_id && f.name == requested)
                    .unwrap();
                existing.bytes = bytes.to_vec();
                (existing.file_id, requested)
            }
        };
        uploaded.push(json!({
            "fileid": file_id,
            "name": name,
            "isfolder": false,
            "parentfolderid": folder_id,
            "size": bytes.len(),
        }));
    }

    let ids: Vec<Value> = uploaded.iter().map(|m| m["fileid"].clone()).collect();
    Json(json!({ "result": 0, "fileids": ids, "metadata": uploaded }))
}

/// pCloud's conflict naming: `track.mp3` becomes `track (1).mp3`
fn renamed(name: &str, n: u32) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{} ({}).{}", stem, n, ext),
        _ => format!("{} ({})", name, n),
    }
}

async fn getfilelink(State(state): State<Arc<FakePCloudState>>, Query(params): Params) -> Json<Value> {
    state.publish_calls.fetch_add(1, Ordering::SeqCst);
    if let Err(e) = check_auth(&params) {
        return e;
    }
    if state.take_publish_failure() {
        return api_error(2009, "File not found.");
    }
    match file_id_param(&params).and_then(|id| state.file(id)) {
        Some(file) => Json(json!({
            "result": 0,
            "hosts": [DOWNLOAD_HOST, "c202.pcloud.test"],
            "path": format!("/dl/{}/{}", file.file_id, file.name),
            "expires": "Sun, 18 Oct 2026 12:00:00 +0000",
        })),
        None => api_error(2009, "File not found."),
    }
}

async fn getfilepublink(
    State(state): State<Arc<FakePCloudState>>,
    Query(params): Params,
) -> Json<Value> {
    state.publish_calls.fetch_add(1, Ordering::SeqCst);
    if let Err(e) = check_auth(&params) {
        return e;
    }
    if state.take_publish_failure() {
        return api_error(2009, "File not found.");
    }
    match file_id_param(&params).and_then(|id| state.file(id)) {
        Some(file) => {
            let code = format!("XZ{}", file.file_id);
            Json(json!({
                "result": 0,
                "code": code,
                "link": format!("https://u.pcloud.link/publink/show?code={}", code),
                "linkid": file.file_id,
            }))
        }
        None => api_error(2009, "File not found."),
    }
}

async fn getpublinkdownload(
    State(state): State<Arc<FakePCloudState>>,
    Query(params): Params,
) -> Json<Value> {
    let file = params
        .get("code")
        .and_then(|code| code.strip_prefix("XZ"))
        .and_then(|id| id.parse::<u64>().ok())
        .and_then(|id| state.file(id));
    match file {
        Some(file) => Json(json!({
            "result": 0,
            "hosts": [DOWNLOAD_HOST],
            "path": format!("/pub/{}/{}", file.file_id, file.name),
        })),
        None => api_error(7001, "Invalid link 'code'."),
    }
}

async fn thumbnail() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/jpeg")], FAKE_JPEG)
}

/// A running fake API. Shuts down when dropped.
pub struct FakePCloud {
    /// Base URL to hand to `PCloudClient::new`
    pub base_url: String,
    pub state: Arc<FakePCloudState>,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl FakePCloud {
    pub async fn spawn() -> Self {
        let state = Arc::new(FakePCloudState::default());

        let app = Router::new()
            .route("/userinfo", get(userinfo))
            .route("/listfolder", get(listfolder))
            .route("/createfolderifnotexists", get(createfolderifnotexists))
            .route("/uploadfile", post(uploadfile))
            .route("/getfilelink", get(getfilelink))
            .route("/getfilepublink", get(getfilepublink))
            .route("/getpublinkdownload", get(getpublinkdownload))
            .route(THUMBNAIL_PATH, get(thumbnail))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake pCloud");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Fake pCloud failed");
        });

        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            state,
            _shutdown_tx: Some(shutdown_tx),
        }
    }

    /// URL of the hosted thumbnail image
    pub fn thumbnail_url(&self) -> String {
        format!("{}{}", self.base_url, THUMBNAIL_PATH)
    }

    /// URL on the fake host that answers 404
    pub fn missing_thumbnail_url(&self) -> String {
        format!("{}/vi/gone/maxresdefault.jpg", self.base_url)
    }
}

impl Drop for FakePCloud {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
