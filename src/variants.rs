//! Candidate locations for a document's rendered output.
//!
//! Rendered markdown lives in a `rendered/` directory next to the source, under
//! one of several layouts the parsing pipeline has used over time:
//!
//! - `rendered/<base>.<parser>.md`
//! - `rendered/<base>.md` for the plain `md` parser
//! - `rendered/<base>/<base>.marker.md` for marker, plus three older marker layouts
//!
//! The index says which parsers are known; the store says which outputs
//! exist. Planning combines both: declared parsers, a probe of the nested
//! marker directory and a scan of `rendered/` for outputs nobody recorded.

use regex::Regex;
use serde::Serialize;

use crate::{
    config::IndexConfig,
    error::StoreError,
    index::FileIndexEntry,
    paths,
    store::RemoteStore,
    types::{DirectoryEntry, EntryKind},
};

pub const MARKER: &str = "marker";
pub const PLAIN_MD: &str = "md";

/// How a candidate came to be in the list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateOrigin {
    /// Found by listing the nested marker directory
    Probed,
    /// Built from a parser the index declares
    Declared,
    /// Older marker layout, kept readable for existing data
    LegacyLayout,
    /// Present in `rendered/` but not declared in the index
    Discovered,
}

/// A hypothesized location of one parser's output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantCandidate {
    /// Unique within one candidate list
    pub key: String,
    pub label: String,
    /// Percent-decoded store path
    pub path: String,
    pub origin: CandidateOrigin,
}

impl VariantCandidate {
    /// Paths are stored decoded; declared and discovered candidates for the
    /// same file compare equal however the listing encoded them.
    fn new(key: impl Into<String>, label: impl Into<String>, path: String, origin: CandidateOrigin) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            path: paths::decode(&path),
            origin,
        }
    }

    /// Parser identifier this candidate belongs to
    pub fn parser_key(&self) -> String {
        parser_key(&self.label)
    }
}

/// Lower-cased leading token of a label: `"Marker (flat)"` → `"marker"`
pub fn parser_key(label: &str) -> String {
    label
        .trim()
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default()
        .to_lowercase()
}

/// A source document split into the parts candidate paths are built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    /// Containing directory, trailing '/'
    pub dir: String,
    /// Decoded file name, as keyed in the parser index
    pub file_name: String,
    /// File name without extension
    pub base_name: String,
}

impl DocumentRef {
    pub fn from_path(path: &str) -> Self {
        let file_name = paths::file_name(path);
        let base_name = paths::base_name(&file_name).to_string();
        Self {
            dir: paths::parent_dir(path),
            file_name,
            base_name,
        }
    }

    fn rendered_dir(&self, config: &IndexConfig) -> String {
        paths::normalize(
            &paths::join(&self.dir, config.rendered_dir.trim_matches('/')),
            true,
        )
    }
}

/// Ordered candidates for one document
#[derive(Debug, Clone)]
pub struct VariantPlan {
    pub document: DocumentRef,
    /// Declared parsers, plus marker when the probe found output
    pub declared: Vec<String>,
    pub default_parser: Option<String>,
    pub candidates: Vec<VariantCandidate>,
}

impl VariantPlan {
    fn push(&mut self, candidate: VariantCandidate) {
        let duplicate = self
            .candidates
            .iter()
            .any(|c| c.key == candidate.key || c.path == candidate.path);
        if !duplicate {
            self.candidates.push(candidate);
        }
    }

    fn declares(&self, parser: &str) -> bool {
        self.declared.iter().any(|p| p.eq_ignore_ascii_case(parser))
    }
}

/// Primary nested marker location followed by the older layouts
pub fn marker_family(rendered: &str, base: &str, marker_suffix: &str) -> Vec<VariantCandidate> {
    vec![
        VariantCandidate::new(
            MARKER,
            "Marker",
            format!("{}{}/{}{}", rendered, base, base, marker_suffix),
            CandidateOrigin::Declared,
        ),
        VariantCandidate::new(
            "marker-flat",
            "Marker (flat)",
            format!("{}{}{}", rendered, base, marker_suffix),
            CandidateOrigin::LegacyLayout,
        ),
        VariantCandidate::new(
            "marker-subdir",
            "Marker (parser subdir)",
            format!("{}{}/{}/{}.md", rendered, base, MARKER, base),
            CandidateOrigin::LegacyLayout,
        ),
        VariantCandidate::new(
            "marker-root",
            "Marker (parser root)",
            format!("{}{}/{}/{}.md", rendered, MARKER, base, base),
            CandidateOrigin::LegacyLayout,
        ),
    ]
}

/// Flat output of a non-marker parser
pub fn flat_candidate(rendered: &str, base: &str, parser: &str) -> VariantCandidate {
    let path = if parser.eq_ignore_ascii_case(PLAIN_MD) {
        format!("{}{}.md", rendered, base)
    } else {
        format!("{}{}.{}.md", rendered, base, parser)
    };
    VariantCandidate::new(parser, parser, path, CandidateOrigin::Declared)
}

/// Outputs in `rendered/` that match `<base>(_suffix)?.<token>.md` for an
/// undeclared `token`
pub fn discover(entries: &[DirectoryEntry], base: &str, declared: &[String]) -> Vec<VariantCandidate> {
    let pattern = format!(r"^{}(_[^./]+)?\.([A-Za-z0-9][A-Za-z0-9_-]*)\.md$", regex::escape(base));
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(e) => {
            tracing::warn!("cannot scan rendered outputs of {}: {}", base, e);
            return Vec::new();
        }
    };

    entries
        .iter()
        .filter(|e| e.kind == EntryKind::File)
        .filter_map(|e| {
            let caps = re.captures(&e.name)?;
            let token = caps.get(2)?.as_str();
            if declared.iter().any(|p| p.eq_ignore_ascii_case(token)) {
                return None;
            }
            let candidate = match caps.get(1) {
                Some(suffix) => VariantCandidate::new(
                    format!("discovered:{}{}", token, suffix.as_str()),
                    format!("{} ({}{})", token, base, suffix.as_str()),
                    e.path.clone(),
                    CandidateOrigin::Discovered,
                ),
                None => VariantCandidate::new(
                    format!("discovered:{}", token),
                    token,
                    e.path.clone(),
                    CandidateOrigin::Discovered,
                ),
            };
            Some(candidate)
        })
        .collect()
}

/// Pick the active candidate
///
/// A previous selection that is still offered wins, then the first candidate
/// of the index default, then the first candidate.
pub fn choose_active(
    candidates: &[VariantCandidate],
    previous_label: Option<&str>,
    default_parser: Option<&str>,
) -> Option<usize> {
    if let Some(previous) = previous_label {
        if let Some(idx) = candidates.iter().position(|c| c.label == previous) {
            return Some(idx);
        }
    }
    if let Some(default) = default_parser {
        let default = default.to_lowercase();
        if let Some(idx) = candidates.iter().position(|c| c.parser_key() == default) {
            return Some(idx);
        }
    }
    if candidates.is_empty() {
        None
    } else {
        Some(0)
    }
}

/// Builds a [`VariantPlan`] by combining index data with store probes
pub struct VariantPlanner<'a> {
    store: &'a dyn RemoteStore,
    config: &'a IndexConfig,
}

impl<'a> VariantPlanner<'a> {
    pub fn new(store: &'a dyn RemoteStore, config: &'a IndexConfig) -> Self {
        Self { store, config }
    }

    pub async fn plan(&self, document: &DocumentRef, entry: Option<&FileIndexEntry>) -> VariantPlan {
        let declared = entry
            .map(|e| e.parsers.det.clone())
            .filter(|det| !det.is_empty())
            .unwrap_or_else(|| vec![self.config.fallback_parser.clone()]);

        let mut plan = VariantPlan {
            document: document.clone(),
            declared,
            default_parser: entry.and_then(|e| e.parsers.default_parser().map(String::from)),
            candidates: Vec::new(),
        };
        let rendered = document.rendered_dir(self.config);
        let base = document.base_name.as_str();

        let probed = self.probe_marker(&rendered, base).await;
        let marker_probed = probed.is_some();
        if let Some(candidate) = probed {
            plan.push(candidate);
            if !plan.declares(MARKER) {
                plan.declared.push(MARKER.to_string());
            }
        }

        for parser in plan.declared.clone() {
            if parser.eq_ignore_ascii_case(MARKER) {
                if marker_probed {
                    continue;
                }
                for candidate in marker_family(&rendered, base, &self.config.marker_suffix) {
                    plan.push(candidate);
                }
            } else {
                plan.push(flat_candidate(&rendered, base, &parser));
            }
        }

        if let Some(entries) = self.list_optional(&rendered).await {
            for candidate in discover(&entries, base, &plan.declared) {
                plan.push(candidate);
            }
        }

        tracing::debug!(
            "{} candidates for {}{}",
            plan.candidates.len(),
            document.dir,
            document.file_name
        );
        plan
    }

    /// Look for marker output in `rendered/<base>/`
    async fn probe_marker(&self, rendered: &str, base: &str) -> Option<VariantCandidate> {
        let nested = format!("{}{}/", rendered, base);
        let entries = self.list_optional(&nested).await?;

        let expected = format!("{}{}", base, self.config.marker_suffix);
        let mut markers = entries
            .iter()
            .filter(|e| e.kind == EntryKind::File && e.name.ends_with(&self.config.marker_suffix));
        let found = markers
            .clone()
            .find(|e| e.name == expected)
            .or_else(|| markers.next())?;

        Some(VariantCandidate::new(
            MARKER,
            "Marker",
            found.path.clone(),
            CandidateOrigin::Probed,
        ))
    }

    /// List a directory whose absence is expected; failures are logged and
    /// treated as "nothing there"
    async fn list_optional(&self, path: &str) -> Option<Vec<DirectoryEntry>> {
        match self.store.list(path).await {
            Ok(listing) => Some(listing.entries),
            Err(StoreError::NotFound { .. }) => None,
            Err(e) => {
                tracing::warn!("skipping scan of {}: {}", path, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Parsers;
    use crate::memory::MemoryStore;

    fn entry(det: &[&str], default: Option<&str>) -> FileIndexEntry {
        FileIndexEntry {
            name: "Spec.pdf".to_string(),
            parsers: Parsers {
                det: det.iter().map(|s| s.to_string()).collect(),
                default: default.map(|d| Some(d.to_string())),
                ..Parsers::default()
            },
            ..FileIndexEntry::default()
        }
    }

    fn labels(plan: &VariantPlan) -> Vec<&str> {
        plan.candidates.iter().map(|c| c.label.as_str()).collect()
    }

    #[test]
    fn test_parser_key() {
        assert_eq!(parser_key("Marker"), "marker");
        assert_eq!(parser_key("Marker (flat)"), "marker");
        assert_eq!(parser_key("ocr (Spec_v2)"), "ocr");
        assert_eq!(parser_key("docling"), "docling");
    }

    #[test]
    fn test_document_ref() {
        let doc = DocumentRef::from_path("/Tender%20A/Bid.Offer.pdf");
        assert_eq!(doc.dir, "/Tender%20A/");
        assert_eq!(doc.file_name, "Bid.Offer.pdf");
        assert_eq!(doc.base_name, "Bid.Offer");
        assert_eq!(doc.rendered_dir(&IndexConfig::default()), "/Tender%20A/rendered/");
    }

    #[test]
    fn test_flat_paths() {
        assert_eq!(
            flat_candidate("/A/rendered/", "Spec", "docling").path,
            "/A/rendered/Spec.docling.md"
        );
        assert_eq!(flat_candidate("/A/rendered/", "Spec", "md").path, "/A/rendered/Spec.md");
    }

    #[test]
    fn test_marker_family_order() {
        let family = marker_family("/A/rendered/", "Spec", ".marker.md");
        let paths: Vec<_> = family.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "/A/rendered/Spec/Spec.marker.md",
                "/A/rendered/Spec.marker.md",
                "/A/rendered/Spec/marker/Spec.md",
                "/A/rendered/marker/Spec/Spec.md",
            ]
        );
        assert_eq!(family[0].origin, CandidateOrigin::Declared);
        assert!(family[1..].iter().all(|c| c.origin == CandidateOrigin::LegacyLayout));
    }

    #[test]
    fn test_discover() {
        let entries = vec![
            DirectoryEntry::file("Spec.docling.md", "/A/rendered/Spec.docling.md", None),
            DirectoryEntry::file("Spec.ocr.md", "/A/rendered/Spec.ocr.md", None),
            DirectoryEntry::file("Spec_p2.ocr.md", "/A/rendered/Spec_p2.ocr.md", None),
            DirectoryEntry::file("Spec.md", "/A/rendered/Spec.md", None),
            DirectoryEntry::file("Specs.ocr.md", "/A/rendered/Specs.ocr.md", None),
            DirectoryEntry::directory("Spec.ocr.md", "/A/rendered/Spec.ocr.md/"),
        ];
        let found = discover(&entries, "Spec", &["docling".to_string()]);

        let labels: Vec<_> = found.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["ocr", "ocr (Spec_p2)"]);
        assert!(found.iter().all(|c| c.origin == CandidateOrigin::Discovered));
        assert_eq!(found[1].parser_key(), "ocr");
    }

    #[test]
    fn test_candidate_paths_are_decoded() {
        let declared = flat_candidate("/Tender%20A/rendered/", "Spec 1", "docling");
        let entries = vec![DirectoryEntry::file(
            "Spec 1.ocr.md",
            "/Tender%20A/rendered/Spec%201.ocr.md",
            None,
        )];
        let found = discover(&entries, "Spec 1", &["docling".to_string()]);

        assert_eq!(declared.path, "/Tender A/rendered/Spec 1.docling.md");
        assert_eq!(found[0].path, "/Tender A/rendered/Spec 1.ocr.md");
    }

    #[test]
    fn test_choose_active() {
        let candidates = vec![
            VariantCandidate::new("marker", "Marker", "/a".into(), CandidateOrigin::Probed),
            VariantCandidate::new("docling", "docling", "/b".into(), CandidateOrigin::Declared),
        ];

        assert_eq!(choose_active(&candidates, None, Some("DOCLING")), Some(1));
        assert_eq!(choose_active(&candidates, Some("Marker"), Some("docling")), Some(0));
        assert_eq!(choose_active(&candidates, Some("gone"), Some("docling")), Some(1));
        assert_eq!(choose_active(&candidates, None, Some("ocr")), Some(0));
        assert_eq!(choose_active(&[], None, None), None);
    }

    #[tokio::test]
    async fn test_probe_registers_marker_first() {
        let store = MemoryStore::new();
        store.insert("/A/rendered/Spec/Spec.marker.md", "m").await;
        store.insert("/A/rendered/Spec.docling.md", "d").await;
        let config = IndexConfig::default();

        let doc = DocumentRef::from_path("/A/Spec.pdf");
        let idx = entry(&["docling"], Some("docling"));
        let plan = VariantPlanner::new(&store, &config).plan(&doc, Some(&idx)).await;

        assert_eq!(labels(&plan), vec!["Marker", "docling"]);
        assert_eq!(plan.candidates[0].origin, CandidateOrigin::Probed);
        assert!(plan.declares(MARKER));
    }

    #[tokio::test]
    async fn test_declared_marker_without_probe_uses_family() {
        let store = MemoryStore::new();
        let config = IndexConfig::default();

        let doc = DocumentRef::from_path("/A/Spec.pdf");
        let idx = entry(&["marker", "md"], None);
        let plan = VariantPlanner::new(&store, &config).plan(&doc, Some(&idx)).await;

        assert_eq!(
            labels(&plan),
            vec![
                "Marker",
                "Marker (flat)",
                "Marker (parser subdir)",
                "Marker (parser root)",
                "md"
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_entry_uses_fallback_parser() {
        let store = MemoryStore::new();
        store.insert("/A/rendered/Spec.ocr.md", "o").await;
        let config = IndexConfig::default();

        let doc = DocumentRef::from_path("/A/Spec.pdf");
        let plan = VariantPlanner::new(&store, &config).plan(&doc, None).await;

        assert_eq!(plan.declared, vec!["md"]);
        assert_eq!(labels(&plan), vec!["md", "ocr"]);
        assert_eq!(plan.candidates[0].path, "/A/rendered/Spec.md");
    }
}
