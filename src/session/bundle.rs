use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zip::write::FileOptions;

use super::model::{HtmlSnapshot, RecordingSession};

pub const SESSION_BUNDLE_SCHEMA_VERSION: u32 = 1;

const META_JSON: &str = "meta.json";
const SESSION_JSON: &str = "session.json";
const SNAPSHOT_HTML: &str = "snapshot.html";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionBundleMeta {
    pub schema_version: u32,
    pub created_at: DateTime<Utc>,
    pub app_version: String,
    pub session_id: Uuid,
    pub event_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_captured_at: Option<DateTime<Utc>>,
}

pub struct SessionBundleOpen {
    pub meta: SessionBundleMeta,
    pub session: RecordingSession,
}

/// Portable zip export of one session.
///
/// Layout: `meta.json`, `session.json` (events and metadata) and, when the
/// session has one, `snapshot.html`.
pub struct SessionBundle;

impl SessionBundle {
    pub fn create(out_path: &Path, session: &RecordingSession) -> anyhow::Result<SessionBundleMeta> {
        let zip_file = File::create(out_path)?;
        let (meta, mut zip_file) = Self::write_to(zip_file, session)?;
        zip_file.flush()?;
        Ok(meta)
    }

    pub fn write_to<W: Write + Seek>(
        writer: W,
        session: &RecordingSession,
    ) -> anyhow::Result<(SessionBundleMeta, W)> {
        let (events_only, snapshot) = session.clone().split_snapshot();
        let meta = SessionBundleMeta {
            schema_version: SESSION_BUNDLE_SCHEMA_VERSION,
            created_at: Utc::now(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            session_id: session.id(),
            event_count: session.event_count(),
            snapshot_captured_at: snapshot.as_ref().map(|s| s.captured_at),
        };

        let mut zip = zip::ZipWriter::new(writer);
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

        // meta.json
        zip.start_file(META_JSON, options)?;
        zip.write_all(&serde_json::to_vec_pretty(&meta)?)?;

        // session.json
        zip.start_file(SESSION_JSON, options)?;
        zip.write_all(&serde_json::to_vec(&events_only)?)?;

        // snapshot.html (optional)
        if let Some(snapshot) = &snapshot {
            zip.start_file(SNAPSHOT_HTML, options)?;
            zip.write_all(snapshot.html.as_bytes())?;
        }

        let writer = zip.finish()?;
        Ok((meta, writer))
    }

    pub fn open(path: &Path) -> anyhow::Result<SessionBundleOpen> {
        Self::read_from(File::open(path)?)
    }

    pub fn read_from<R: Read + Seek>(reader: R) -> anyhow::Result<SessionBundleOpen> {
        let mut archive = zip::ZipArchive::new(reader)?;

        let meta: SessionBundleMeta = {
            let mut entry = archive.by_name(META_JSON)?;
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            serde_json::from_slice(&buf)?
        };

        if meta.schema_version > SESSION_BUNDLE_SCHEMA_VERSION {
            anyhow::bail!(
                "unsupported session bundle schema_version {} (max supported: {})",
                meta.schema_version,
                SESSION_BUNDLE_SCHEMA_VERSION
            );
        }

        let mut session = {
            let mut entry = archive.by_name(SESSION_JSON)?;
            let mut json = String::new();
            entry.read_to_string(&mut json)?;
            RecordingSession::from_json(&json)?
        };

        let snapshot = match archive.by_name(SNAPSHOT_HTML) {
            Ok(mut entry) => {
                let mut html = String::new();
                entry.read_to_string(&mut html)?;
                Some(html)
            }
            Err(_) => None,
        };

        if let Some(html) = snapshot {
            if session.html().is_none() {
                session.attach_snapshot(HtmlSnapshot {
                    html,
                    captured_at: meta.snapshot_captured_at.unwrap_or(meta.created_at),
                })?;
            }
        }

        Ok(SessionBundleOpen { meta, session })
    }
}
