//! Index construction: champion selection, embedding text preparation,
//! and atomic persistence of a new index generation.
//!
//! A build writes to a `.tmp` sibling and renames it over the target
//! only after every row and vector is inside, so a crash mid-build
//! leaves the previous generation untouched.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::info;

use crate::embedder::Embedder;
use crate::index::{ChampionIndex, IndexError, IndexedItem};
use crate::snapshot::Listing;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Knobs for champion selection and text preparation.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Engagement quantile above which unflagged listings qualify as
    /// champions when the snapshot carries no explicit flags.
    pub champion_quantile: f64,
    /// Maximum characters of prepared text handed to the embedder.
    pub embed_text_limit: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            champion_quantile: 0.80,
            embed_text_limit: 2000,
        }
    }
}

/// Build a fresh index generation at `path` from snapshot listings.
///
/// Returns a handle to the newly persisted index. On any error the
/// previous generation at `path`, if one exists, is left as it was.
pub fn build_index(
    listings: &[Listing],
    embedder: &dyn Embedder,
    path: &Path,
    options: &BuildOptions,
) -> Result<ChampionIndex, IndexError> {
    let champions = select_champions(listings, options.champion_quantile);
    info!(
        "Building index: {} champions out of {} listings",
        champions.len(),
        listings.len()
    );

    let texts: Vec<String> = champions
        .iter()
        .map(|listing| embedding_text(listing, options.embed_text_limit))
        .collect();
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    let vectors = if refs.is_empty() {
        Vec::new()
    } else {
        embedder.embed_batch(&refs)?
    };

    let items: Vec<IndexedItem> = champions
        .iter()
        .map(|listing| IndexedItem {
            id: listing.id,
            title: listing.title.clone(),
            body: listing.body.clone(),
            engagement: listing.engagement,
        })
        .collect();

    let file_name = path
        .file_name()
        .ok_or_else(|| IndexError::Malformed(format!("bad index path: {}", path.display())))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    if tmp.exists() {
        fs::remove_file(&tmp)?;
    }

    if let Err(err) = write_generation(&tmp, embedder.dimensions(), &items, &vectors) {
        // Drop the partial generation; the previous index stays in place.
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }

    // The connection is closed before the swap so the rename moves a
    // fully flushed database file.
    fs::rename(&tmp, path)?;
    info!("Index generation persisted to {}", path.display());

    ChampionIndex::open(path)
}

/// Write a fresh generation at `tmp`; the connection closes on return.
fn write_generation(
    tmp: &Path,
    dimensions: usize,
    items: &[IndexedItem],
    vectors: &[Vec<f32>],
) -> Result<(), IndexError> {
    let mut index = ChampionIndex::create(tmp, dimensions)?;
    index.insert_items(items, vectors)
}

/// Pick the champion subset of a snapshot.
///
/// Listings flagged as champions win outright. Without any flags, the
/// top engagement share above `quantile` qualifies, always at least
/// one listing when the snapshot is non-empty. Equal engagement falls
/// back to ascending id so selection is deterministic.
pub fn select_champions(listings: &[Listing], quantile: f64) -> Vec<&Listing> {
    let flagged: Vec<&Listing> = listings.iter().filter(|l| l.is_champion).collect();
    if !flagged.is_empty() {
        return flagged;
    }
    if listings.is_empty() {
        return Vec::new();
    }

    let share = (1.0 - quantile).clamp(0.0, 1.0);
    let keep = ((listings.len() as f64) * share).ceil() as usize;
    let keep = keep.clamp(1, listings.len());

    let mut ranked: Vec<&Listing> = listings.iter().collect();
    ranked.sort_by(|a, b| {
        b.engagement
            .partial_cmp(&a.engagement)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    ranked.truncate(keep);
    ranked
}

/// Concatenate the fields the embedder should see, cleaned and capped.
pub fn embedding_text(listing: &Listing, limit: usize) -> String {
    let mut parts: Vec<&str> = vec![&listing.title];
    if let Some(specialization) = &listing.specialization {
        parts.push(specialization);
    }
    if let Some(skills) = &listing.skills {
        parts.push(skills);
    }
    parts.push(&listing.body);

    let text = normalize_text(&parts.join(" "));
    truncate_chars(&text, limit)
}

/// Strip HTML tags and collapse whitespace runs.
fn normalize_text(text: &str) -> String {
    let without_tags = TAG_RE.replace_all(text, " ");
    WS_RE.replace_all(&without_tags, " ").trim().to_string()
}

/// Truncate to at most `limit` characters on a char boundary.
fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}
