//! Retrieval facade tying the pieces together.
//!
//! `Retriever::open` decides exactly once, at construction, whether the
//! persisted index can be reused, must be rebuilt from the snapshot, or
//! is absent altogether. After that, `search` never touches the
//! snapshot or the fingerprint again.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::embedder::{Embedder, EmbedderError};
use crate::fingerprint;
use crate::index::build::{BuildOptions, build_index};
use crate::index::{ChampionIndex, IndexError, SearchResult};
use crate::snapshot::{SnapshotError, read_snapshot};

#[derive(Error, Debug)]
pub enum RetrieverError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Embedder(#[from] EmbedderError),

    #[error(transparent)]
    Fingerprint(#[from] anyhow::Error),
}

/// How the retriever obtained its index, decided once in `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// A persisted generation matched the snapshot fingerprint and was
    /// loaded as-is.
    Reused,
    /// A fresh generation was built from the snapshot.
    Rebuilt,
    /// No index exists; every search returns nothing.
    Empty,
}

/// Query entry point over one index generation.
pub struct Retriever {
    index: Option<ChampionIndex>,
    state: IndexState,
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    /// Open the retriever, reusing or rebuilding the persisted index.
    ///
    /// With a snapshot present the fingerprint gate decides: an
    /// up-to-date index is reused, anything else triggers a rebuild. A
    /// reusable index that fails to load also falls back to a rebuild
    /// rather than failing the open. Without a snapshot the retriever
    /// loads whatever index exists, or starts empty.
    pub fn open(
        index_path: &Path,
        fingerprint_path: &Path,
        snapshot: Option<&Path>,
        embedder: Arc<dyn Embedder>,
        options: &BuildOptions,
    ) -> Result<Self, RetrieverError> {
        match snapshot {
            Some(snapshot_path) => {
                if fingerprint::needs_rebuild(snapshot_path, fingerprint_path, index_path)? {
                    return Self::rebuild(
                        snapshot_path,
                        index_path,
                        fingerprint_path,
                        embedder,
                        options,
                    );
                }
                match Self::load(index_path, embedder.as_ref()) {
                    Ok(index) => {
                        info!("Reusing index at {}", index_path.display());
                        Ok(Self {
                            index: Some(index),
                            state: IndexState::Reused,
                            embedder,
                        })
                    }
                    Err(err) => {
                        warn!("Index at {} unusable ({err}), rebuilding", index_path.display());
                        Self::rebuild(
                            snapshot_path,
                            index_path,
                            fingerprint_path,
                            embedder,
                            options,
                        )
                    }
                }
            }
            None => {
                if index_path.exists() {
                    match Self::load(index_path, embedder.as_ref()) {
                        Ok(index) => {
                            info!("Reusing index at {}", index_path.display());
                            Ok(Self {
                                index: Some(index),
                                state: IndexState::Reused,
                                embedder,
                            })
                        }
                        Err(err) => {
                            warn!(
                                "Index at {} unusable ({err}) and no snapshot to rebuild from",
                                index_path.display()
                            );
                            Ok(Self {
                                index: None,
                                state: IndexState::Empty,
                                embedder,
                            })
                        }
                    }
                } else {
                    info!("No snapshot and no index; retriever starts empty");
                    Ok(Self {
                        index: None,
                        state: IndexState::Empty,
                        embedder,
                    })
                }
            }
        }
    }

    fn load(index_path: &Path, embedder: &dyn Embedder) -> Result<ChampionIndex, IndexError> {
        let index = ChampionIndex::open(index_path)?;
        if index.dimensions() != embedder.dimensions() {
            return Err(IndexError::DimensionMismatch {
                expected: embedder.dimensions(),
                actual: index.dimensions(),
            });
        }
        Ok(index)
    }

    fn rebuild(
        snapshot_path: &Path,
        index_path: &Path,
        fingerprint_path: &Path,
        embedder: Arc<dyn Embedder>,
        options: &BuildOptions,
    ) -> Result<Self, RetrieverError> {
        let listings = read_snapshot(snapshot_path)?;
        let index = build_index(&listings, embedder.as_ref(), index_path, options)?;
        fingerprint::commit(snapshot_path, fingerprint_path)?;
        Ok(Self {
            index: Some(index),
            state: IndexState::Rebuilt,
            embedder,
        })
    }

    /// Top `limit` champions most similar to `query`.
    ///
    /// An empty retriever, an empty index, or a zero limit short-circuits
    /// to an empty list without calling the embedder. A query that embeds
    /// to a zero vector (no recognizable tokens) also returns an empty
    /// list: a vector without magnitude has no direction to rank by.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, RetrieverError> {
        let Some(index) = &self.index else {
            return Ok(Vec::new());
        };
        if limit == 0 || index.is_empty()? {
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(query)?;
        if query_vector.iter().all(|component| *component == 0.0) {
            return Ok(Vec::new());
        }
        Ok(index.query(&query_vector, limit)?)
    }

    #[must_use]
    pub fn state(&self) -> IndexState {
        self.state
    }

    /// True when no champions are available to search.
    pub fn is_empty(&self) -> Result<bool, RetrieverError> {
        match &self.index {
            Some(index) => Ok(index.is_empty()?),
            None => Ok(true),
        }
    }
}
