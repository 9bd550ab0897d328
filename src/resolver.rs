use serde::Serialize;
use std::sync::Arc;

use crate::{
    config::IndexConfig,
    error::{Result, StoreError},
    index::{IndexPatch, IndexStore, ParserIndexFile},
    store::RemoteStore,
    variants::{
        choose_active, parser_key, CandidateOrigin, DocumentRef, VariantCandidate, VariantPlan,
        VariantPlanner,
    },
};

/// Rendered content of a document and how it was found
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedDocument {
    pub content: String,
    pub active_label: String,
    pub active_path: String,
    pub candidates: Vec<VariantCandidate>,
    /// Paths read, in order, up to and including the one that succeeded
    pub attempted: Vec<String>,
}

/// Resolves a source document to one of its rendered variants
///
/// Candidates are tried in priority order: the active one first, then the
/// rest in list order. The first readable candidate becomes active. Every
/// call is a fresh sequence of store reads, so dropping the future of an
/// in-flight resolution leaves nothing behind.
#[derive(Clone)]
pub struct VariantResolver {
    store: Arc<dyn RemoteStore>,
    index: IndexStore,
    config: IndexConfig,
}

impl VariantResolver {
    pub fn new(store: Arc<dyn RemoteStore>, config: IndexConfig) -> Self {
        Self {
            index: IndexStore::new(store.clone(), config.clone()),
            store,
            config,
        }
    }

    /// Candidate list for a document without reading any of them
    pub async fn plan(&self, path: &str) -> Result<VariantPlan> {
        let document = DocumentRef::from_path(path);
        let index = self.index.load(&document.dir).await?;
        let entry = index.lookup(&document.file_name);

        Ok(VariantPlanner::new(self.store.as_ref(), &self.config)
            .plan(&document, entry)
            .await)
    }

    pub async fn resolve(&self, path: &str, previous_label: Option<&str>) -> Result<ResolvedDocument> {
        let plan = self.plan(path).await?;

        let Some(active) = choose_active(
            &plan.candidates,
            previous_label,
            plan.default_parser.as_deref(),
        ) else {
            return Err(StoreError::NoRenderableVariant {
                document: path.to_string(),
                attempted: Vec::new(),
            });
        };

        let (loaded, content, attempted) =
            self.load_with_fallback(path, &plan.candidates, active).await?;
        let chosen = &plan.candidates[loaded];

        Ok(ResolvedDocument {
            content,
            active_label: chosen.label.clone(),
            active_path: chosen.path.clone(),
            attempted,
            candidates: plan.candidates,
        })
    }

    /// Read the active candidate, falling back to the others in list order
    ///
    /// Returns the index of the candidate that was read, its content and the
    /// paths attempted.
    pub async fn load_with_fallback(
        &self,
        document: &str,
        candidates: &[VariantCandidate],
        active: usize,
    ) -> Result<(usize, String, Vec<String>)> {
        let order = std::iter::once(active)
            .chain((0..candidates.len()).filter(|&i| i != active))
            .filter(|&i| i < candidates.len());

        let mut attempted = Vec::with_capacity(candidates.len());
        for idx in order {
            let candidate = &candidates[idx];
            attempted.push(candidate.path.clone());

            match self.store.read_text(&candidate.path).await {
                Ok(content) => {
                    if idx != active {
                        tracing::info!(
                            "{}: {} unavailable, switched to {}",
                            document,
                            candidates.get(active).map_or("-", |c| c.label.as_str()),
                            candidate.label
                        );
                    }
                    if candidate.origin == CandidateOrigin::LegacyLayout {
                        tracing::warn!(
                            "{}: served from legacy marker layout {}",
                            document,
                            candidate.path
                        );
                    }
                    return Ok((idx, content, attempted));
                }
                Err(StoreError::NotFound { .. }) => {
                    tracing::debug!("{}: no variant at {}", document, candidate.path);
                }
                Err(e) => {
                    tracing::warn!("{}: reading {} failed: {}", document, candidate.path, e);
                }
            }
        }

        Err(StoreError::NoRenderableVariant {
            document: document.to_string(),
            attempted,
        })
    }

    /// Record the parser behind `label` as the document's default
    pub async fn set_default(&self, path: &str, label: &str) -> Result<ParserIndexFile> {
        let key = parser_key(label);
        if key.is_empty() {
            return Err(StoreError::protocol(format!(
                "variant label {:?} names no parser",
                label
            )));
        }

        let document = DocumentRef::from_path(path);
        self.index
            .patch(&document.dir, &document.file_name, IndexPatch::default_parser(key))
            .await
    }

    pub fn index(&self) -> &IndexStore {
        &self.index
    }
}
