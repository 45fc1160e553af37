//! Shared test fixtures: storage files with controlled mtimes and a mock
//! inference server that writes slot files the way llama.cpp does.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Base of the fake clock used for mtimes in tests.
const EPOCH_OFFSET_SECS: u64 = 1_700_000_000;

/// Write `name` in `dir` and set its mtime to a fixed base plus `age_secs`.
pub fn write_file_at(dir: &Path, name: &str, content: &[u8], age_secs: u64) -> io::Result<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, content)?;
    set_mtime(&path, age_secs)?;
    Ok(path)
}

pub fn set_mtime(path: &Path, age_secs: u64) -> io::Result<()> {
    let when = SystemTime::UNIX_EPOCH + Duration::from_secs(EPOCH_OFFSET_SECS + age_secs);
    File::options().write(true).open(path)?.set_modified(when)
}

/// Sorted names of the `.bin` files in `dir`.
pub fn bin_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = crate::fs::scan_storage(dir)
        .expect("scan storage")
        .into_iter()
        .map(|f| f.name)
        .collect();
    names.sort();
    names
}

/// Responds to `action=save` by writing the requested file into `dir`.
pub struct WriteSlotFile {
    pub dir: PathBuf,
    pub content: Vec<u8>,
}

impl Respond for WriteSlotFile {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: serde_json::Value = match serde_json::from_slice(&request.body) {
            Ok(body) => body,
            Err(_) => return ResponseTemplate::new(400),
        };
        let Some(name) = body["filename"].as_str() else {
            return ResponseTemplate::new(400);
        };
        if fs::write(self.dir.join(name), &self.content).is_err() {
            return ResponseTemplate::new(500);
        }
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "filename": name,
            "n_saved": self.content.len(),
        }))
    }
}

pub async fn mount_health(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "ok"})))
        .mount(server)
        .await;
}

/// `GET /slots` listing the given `(id, n_ctx_used)` pairs.
pub async fn mount_slots(server: &MockServer, slots: &[(u32, u64)]) {
    let body: Vec<serde_json::Value> = slots
        .iter()
        .map(|(id, used)| serde_json::json!({"id": id, "n_ctx_used": used, "n_prompt_tokens": 0}))
        .collect();
    Mock::given(method("GET"))
        .and(path("/slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Save endpoint of `slot` that writes `content` into `dir`.
pub async fn mount_save(server: &MockServer, slot: u32, dir: &Path, content: &[u8]) {
    Mock::given(method("POST"))
        .and(path(format!("/slots/{slot}")))
        .and(query_param("action", "save"))
        .respond_with(WriteSlotFile {
            dir: dir.to_path_buf(),
            content: content.to_vec(),
        })
        .mount(server)
        .await;
}
