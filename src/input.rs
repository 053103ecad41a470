/// Editor event protocol: one JSON object per line on stdin.
///
/// The editor host reports what the user does; each line is one event:
///
///   {"type":"documentOpened","uri":"file:///ws/src/main.rs","languageId":"rust","text":"..."}
///   {"type":"activeEditorChanged","uri":"file:///ws/src/main.rs"}
///   {"type":"documentChanged","uri":"file:///ws/src/main.rs","text":"..."}
///   {"type":"documentSaved","uri":"file:///ws/src/main.rs"}
///   {"type":"documentClosed","uri":"file:///ws/src/main.rs"}
///   {"type":"diagnosticsChanged","uri":"file:///ws/src/main.rs","severities":["error"]}
///   {"type":"activity"}
///   {"type":"reloadRules"}
///
/// Lines that fail to parse are logged and skipped.
use crate::{diagnostics::DiagnosticSeverity, snapshot::DocumentId};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc::Sender;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EditorEvent {
    DocumentOpened {
        uri:         DocumentId,
        #[serde(default)]
        path:        Option<PathBuf>,
        language_id: String,
        #[serde(default)]
        text:        String,
        #[serde(default)]
        is_untitled: bool,
        #[serde(default)]
        is_dirty:    bool,
    },
    ActiveEditorChanged {
        #[serde(default)]
        uri: Option<DocumentId>,
    },
    DocumentChanged {
        uri:  DocumentId,
        #[serde(default)]
        text: Option<String>,
    },
    DocumentSaved {
        uri: DocumentId,
    },
    DocumentClosed {
        uri: DocumentId,
    },
    DiagnosticsChanged {
        uri:        DocumentId,
        #[serde(default)]
        severities: Vec<DiagnosticSeverity>,
    },
    /// Cursor moves, focus changes: resets the idle timer only.
    Activity,
    ReloadRules,
}

pub fn parse_line(line: &str) -> Option<EditorEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::warn!("Ignoring malformed editor event: {} ({})", e, line);
            None
        }
    }
}

/// Read events line by line until EOF. Returns when the reader is exhausted
/// or the engine has gone away.
pub async fn run<R>(reader: R, tx: Sender<EditorEvent>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        if let Some(event) = parse_line(&line) {
            if tx.send(event).await.is_err() {
                break;
            }
        }
    }
    tracing::info!("Editor event stream closed");
    Ok(())
}
