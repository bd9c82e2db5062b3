//! The query task that runs on a pool worker.
//!
//! A job captures plain values only (url, body, input path, dialect) so the
//! session that spawned it can be mutated freely on the main thread while
//! the request is in flight. The boolean result travels back through the
//! task handle; failures are reported, never unwound.

use crate::config::InterfaceType;
use crate::error::Result;
use crate::reply;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a worker needs to perform one completion request.
#[derive(Debug, Clone)]
pub struct QueryJob {
    pub url: String,
    pub body: String,
    pub input_path: PathBuf,
    pub interface_type: InterfaceType,
}

impl QueryJob {
    /// Execute the request. True only when a non-empty reply was decoded
    /// and written beside the input file.
    pub fn run(&self) -> bool {
        let Some(api_key) = api_key() else {
            tracing::error!("missing OPENAI_API_KEY environment variable");
            return false;
        };

        let response = match post(&self.url, &self.body, api_key) {
            Ok(text) => text,
            Err(error) => {
                tracing::error!(url = %self.url, %error, "query transport failed");
                return false;
            }
        };

        let reply = match reply::decode(self.interface_type, &response) {
            Ok(reply) => reply,
            Err(error) => {
                tracing::error!(input = %self.input_path.display(), %error, "reply decode failed");
                return false;
            }
        };

        if reply.has_content() == 0 {
            tracing::warn!(input = %self.input_path.display(), "reply carried no content");
            return false;
        }

        let output_path = output_path_for(&self.input_path);
        for block in reply.blocks() {
            if let Err(error) = write_output_atomic(&output_path, block) {
                tracing::error!(output = %output_path.display(), %error, "failed to write reply");
                return false;
            }
        }
        tracing::info!(output = %output_path.display(), "reply written");
        true
    }
}

/// `<stem>.output<ext>` beside the input file.
#[must_use]
pub fn output_path_for(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match input.extension() {
        Some(ext) => format!("{stem}.output.{}", ext.to_string_lossy()),
        None => format!("{stem}.output"),
    };
    input.with_file_name(name)
}

/// Write the reply through a temp file in the same directory so readers
/// (including our own watcher) never observe a half-written output.
pub fn write_output_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

fn api_key() -> Option<&'static str> {
    static API_KEY: OnceLock<Option<String>> = OnceLock::new();
    API_KEY
        .get_or_init(|| std::env::var("OPENAI_API_KEY").ok())
        .as_deref()
}

fn post(url: &str, body: &str, api_key: &str) -> Result<String> {
    // one client per worker thread, reused across queries
    thread_local! {
        static CLIENT: reqwest::blocking::Client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .expect("build HTTP client");
    }

    CLIENT.with(|client| {
        let response = client
            .post(url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()?;
        Ok(response.text()?)
    })
}
