/// Editor state and point-in-time snapshots.
///
/// `EditorContext` mirrors what the editor host has told us about open
/// documents and which one is active. Rule evaluation never reads it
/// directly; it takes an immutable `EditorSnapshot` built fresh for each
/// trigger.
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
};
use url::Url;

// ---------------------------------------------------------------------------
// Document identity
// ---------------------------------------------------------------------------

/// Opaque document handle: the URI the editor host uses for the document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem path for `file://` URIs, percent-decoded. Drive-letter
    /// URIs (`file:///c:/ws/a.md`) come out as `c:/ws/a.md` on every host.
    pub fn file_path(&self) -> Option<PathBuf> {
        let url = Url::parse(&self.0).ok()?;
        if url.scheme() != "file" {
            return None;
        }
        url.to_file_path().ok().map(strip_drive_slash)
    }
}

fn strip_drive_slash(path: PathBuf) -> PathBuf {
    match path.to_str() {
        Some(raw) if has_drive_slash(raw) => PathBuf::from(&raw[1..]),
        _ => path,
    }
}

/// `/c:/...`, the shape a drive-letter URI takes on a non-Windows host.
fn has_drive_slash(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() >= 3 && bytes[0] == b'/' && bytes[1].is_ascii_alphabetic() && bytes[2] == b':'
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    pub id:          DocumentId,
    /// `None` for untitled buffers and non-file URIs.
    pub path:        Option<PathBuf>,
    pub language_id: String,
    pub text:        String,
    pub is_dirty:    bool,
    pub is_untitled: bool,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorSnapshot {
    pub document:            Option<DocumentId>,
    pub file_name:           Option<String>,
    pub language_id:         Option<String>,
    /// Path relative to the workspace root, `/`-separated. `None` when the
    /// document lives outside the workspace or there is no workspace.
    pub relative_path:       Option<String>,
    pub is_dirty:            bool,
    pub is_untitled:         bool,
    pub text_sample:         Option<String>,
    pub is_sample_truncated: bool,
}

impl EditorSnapshot {
    /// Snapshot of a context with no active document.
    pub fn empty() -> Self {
        Self {
            document:            None,
            file_name:           None,
            language_id:         None,
            relative_path:       None,
            is_dirty:            false,
            is_untitled:         false,
            text_sample:         None,
            is_sample_truncated: false,
        }
    }
}

pub trait SnapshotProvider {
    /// Snapshot of `preferred` if given and known, else of the active document.
    fn snapshot(&self, preferred: Option<&DocumentId>) -> EditorSnapshot;
}

// ---------------------------------------------------------------------------
// Document scanner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub text:          String,
    pub is_truncated:  bool,
    pub scanned_chars: usize,
    pub total_chars:   usize,
}

/// Take at most `max_chars` characters from the start of `text`.
pub fn scan(text: &str, max_chars: usize) -> ScanResult {
    let total_chars = text.chars().count();
    let end = text
        .char_indices()
        .nth(max_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    let sample = &text[..end];
    ScanResult {
        text:          sample.to_owned(),
        is_truncated:  total_chars > max_chars,
        scanned_chars: total_chars.min(max_chars),
        total_chars,
    }
}

// ---------------------------------------------------------------------------
// Editor context
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct EditorContext {
    documents:      HashMap<DocumentId, Document>,
    active:         Option<DocumentId>,
    workspace_root: Option<PathBuf>,
    max_scan_chars: usize,
}

impl EditorContext {
    pub fn new(workspace_root: Option<PathBuf>, max_scan_chars: usize) -> Self {
        Self {
            documents: HashMap::new(),
            active: None,
            workspace_root,
            max_scan_chars,
        }
    }

    pub fn set_max_scan_chars(&mut self, max_scan_chars: usize) {
        self.max_scan_chars = max_scan_chars;
    }

    pub fn open(&mut self, document: Document) {
        tracing::debug!("Document opened: {}", document.id);
        self.documents.insert(document.id.clone(), document);
    }

    pub fn close(&mut self, id: &DocumentId) {
        self.documents.remove(id);
        if self.active.as_ref() == Some(id) {
            self.active = None;
        }
    }

    /// Returns false when `id` is not a known document; the active
    /// document is cleared in that case.
    pub fn set_active(&mut self, id: Option<DocumentId>) -> bool {
        let known = id.as_ref().is_some_and(|id| self.documents.contains_key(id));
        self.active = if known { id } else { None };
        if let Some(active) = &self.active {
            tracing::debug!("Active editor set to {}", active);
        }
        known
    }

    pub fn is_active(&self, id: &DocumentId) -> bool {
        self.active.as_ref() == Some(id)
    }

    pub fn active(&self) -> Option<&DocumentId> {
        self.active.as_ref()
    }

    pub fn get_mut(&mut self, id: &DocumentId) -> Option<&mut Document> {
        self.documents.get_mut(id)
    }

    fn relative_path(&self, path: &Path) -> Option<String> {
        let root = self.workspace_root.as_deref()?;
        let rel = path.strip_prefix(root).ok()?;
        Some(rel.to_string_lossy().replace('\\', "/"))
    }
}

impl SnapshotProvider for EditorContext {
    fn snapshot(&self, preferred: Option<&DocumentId>) -> EditorSnapshot {
        let document = preferred
            .and_then(|id| self.documents.get(id))
            .or_else(|| self.active.as_ref().and_then(|id| self.documents.get(id)));

        let Some(doc) = document else {
            return EditorSnapshot::empty();
        };

        let sample = scan(&doc.text, self.max_scan_chars);
        tracing::trace!(
            "Scanned {}/{} chars for {}",
            sample.scanned_chars, sample.total_chars, doc.id
        );

        EditorSnapshot {
            document:            Some(doc.id.clone()),
            file_name:           doc.path.as_ref().map(|p| p.to_string_lossy().into_owned()),
            language_id:         Some(doc.language_id.clone()),
            relative_path:       doc.path.as_deref().and_then(|p| self.relative_path(p)),
            is_dirty:            doc.is_dirty,
            is_untitled:         doc.is_untitled,
            text_sample:         Some(sample.text),
            is_sample_truncated: sample.is_truncated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(uri: &str, path: Option<&str>, text: &str) -> Document {
        Document {
            id:          DocumentId::new(uri),
            path:        path.map(PathBuf::from),
            language_id: "rust".to_owned(),
            text:        text.to_owned(),
            is_dirty:    false,
            is_untitled: path.is_none(),
        }
    }

    #[test]
    fn scan_truncates_on_char_boundaries() {
        let r = scan("héllo wörld", 4);
        assert_eq!(r.text, "héll");
        assert!(r.is_truncated);
        assert_eq!(r.scanned_chars, 4);
        assert_eq!(r.total_chars, 11);
    }

    #[test]
    fn scan_keeps_short_text_whole() {
        let r = scan("fn main() {}", 20_000);
        assert_eq!(r.text, "fn main() {}");
        assert!(!r.is_truncated);
        assert_eq!(r.scanned_chars, r.total_chars);
    }

    #[test]
    fn file_uri_exposes_path() {
        let id = DocumentId::new("file:///ws/src/main.rs");
        assert_eq!(id.file_path(), Some(PathBuf::from("/ws/src/main.rs")));
        assert_eq!(DocumentId::new("untitled:Untitled-1").file_path(), None);
    }

    #[test]
    fn file_uri_is_percent_decoded() {
        let id = DocumentId::new("file:///ws/my%20notes.md");
        assert_eq!(id.file_path(), Some(PathBuf::from("/ws/my notes.md")));
        assert_eq!(DocumentId::new("https://example.com/a.md").file_path(), None);
    }

    #[test]
    fn drive_letter_uri_resolves_against_workspace() {
        let id = DocumentId::new("file:///c:/ws/docs/a.md");
        let mut ctx = EditorContext::new(Some(PathBuf::from("c:/ws")), 100);
        ctx.open(Document { path: id.file_path(), ..doc(id.as_str(), None, "") });

        let snap = ctx.snapshot(Some(&id));
        assert_eq!(snap.relative_path.as_deref(), Some("docs/a.md"));
    }

    #[test]
    fn encoded_names_match_plain_globs() {
        let id = DocumentId::new("file:///ws/my%20notes.md");
        let mut ctx = EditorContext::new(Some(PathBuf::from("/ws")), 100);
        ctx.open(Document { path: id.file_path(), ..doc(id.as_str(), None, "") });

        let snap = ctx.snapshot(Some(&id));
        assert_eq!(snap.relative_path.as_deref(), Some("my notes.md"));

        let when = crate::rules::When {
            language_ids: None,
            file_glob:    Some(crate::rules::glob::FileGlob::new("my notes.md").unwrap()),
        };
        assert!(when.matches(&snap));
    }

    #[test]
    fn unknown_preferred_document_falls_back_to_active() {
        let mut ctx = EditorContext::new(None, 100);
        ctx.open(doc("file:///a.rs", Some("/a.rs"), "a"));
        ctx.set_active(Some(DocumentId::new("file:///a.rs")));

        let snap = ctx.snapshot(Some(&DocumentId::new("file:///gone.rs")));
        assert_eq!(snap.document, Some(DocumentId::new("file:///a.rs")));
    }

    #[test]
    fn snapshot_of_active_document() {
        let mut ctx = EditorContext::new(Some(PathBuf::from("/ws")), 5);
        ctx.open(doc("file:///ws/src/main.rs", Some("/ws/src/main.rs"), "fn main() {}"));
        assert!(ctx.set_active(Some(DocumentId::new("file:///ws/src/main.rs"))));

        let snap = ctx.snapshot(None);
        assert_eq!(snap.document, Some(DocumentId::new("file:///ws/src/main.rs")));
        assert_eq!(snap.relative_path.as_deref(), Some("src/main.rs"));
        assert_eq!(snap.file_name.as_deref(), Some("/ws/src/main.rs"));
        assert_eq!(snap.language_id.as_deref(), Some("rust"));
        assert_eq!(snap.text_sample.as_deref(), Some("fn ma"));
        assert!(snap.is_sample_truncated);
    }

    #[test]
    fn preferred_document_wins_over_active() {
        let mut ctx = EditorContext::new(None, 100);
        ctx.open(doc("file:///a.rs", Some("/a.rs"), "a"));
        ctx.open(doc("file:///b.rs", Some("/b.rs"), "b"));
        ctx.set_active(Some(DocumentId::new("file:///a.rs")));

        let snap = ctx.snapshot(Some(&DocumentId::new("file:///b.rs")));
        assert_eq!(snap.document, Some(DocumentId::new("file:///b.rs")));
        // No workspace root, so no relative path
        assert_eq!(snap.relative_path, None);
    }

    #[test]
    fn no_active_document_gives_empty_snapshot() {
        let ctx = EditorContext::new(None, 100);
        assert_eq!(ctx.snapshot(None), EditorSnapshot::empty());
    }

    #[test]
    fn outside_workspace_has_no_relative_path() {
        let mut ctx = EditorContext::new(Some(PathBuf::from("/ws")), 100);
        ctx.open(doc("file:///tmp/x.rs", Some("/tmp/x.rs"), ""));
        let snap = ctx.snapshot(Some(&DocumentId::new("file:///tmp/x.rs")));
        assert_eq!(snap.relative_path, None);
        assert_eq!(snap.file_name.as_deref(), Some("/tmp/x.rs"));
    }

    #[test]
    fn closing_active_document_clears_it() {
        let mut ctx = EditorContext::new(None, 100);
        let id = DocumentId::new("file:///a.rs");
        ctx.open(doc("file:///a.rs", Some("/a.rs"), ""));
        ctx.set_active(Some(id.clone()));
        ctx.close(&id);
        assert!(ctx.active().is_none());
        assert!(!ctx.set_active(Some(id)));
    }
}
