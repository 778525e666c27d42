//! Output file naming.
//!
//! Names are built from the dataset stem and the row's stable index, never
//! from the remote server's naming: only the extension is taken from the URL,
//! and only if it is a known image extension.

mod path;
mod sanitize;

use sha2::{Digest, Sha256};

pub use path::last_path_segment;
pub use sanitize::sanitize_component;

/// Extensions accepted from the URL path (lowercase, without dot).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];

/// Extension used when the URL does not end in a known image extension.
pub const DEFAULT_EXTENSION: &str = ".jpg";

/// Longest dataset prefix kept in generated names; leaves room for the
/// digest suffix, row index and extension under NAME_MAX.
const MAX_STEM_BYTES: usize = 200;

/// Separates a rewritten stem from the digest of the original. Never part of
/// a stem that is used verbatim.
const DIGEST_MARK: char = '~';

/// Hex characters of the stem digest kept in rewritten prefixes.
const DIGEST_HEX_LEN: usize = 16;

/// File extension for `url`, with leading dot, lowercased.
///
/// - `https://cdn.example.com/a/b/photo.PNG?size=large` → `.png`
/// - `https://cdn.example.com/render?id=7` → `.jpg`
pub fn infer_extension(url: &str) -> String {
    last_path_segment(url)
        .and_then(|segment| {
            let (_, ext) = segment.rsplit_once('.')?;
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS
                .contains(&ext.as_str())
                .then(|| format!(".{}", ext))
        })
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// Name for the downloaded file of row `row_index` in dataset `dataset_stem`:
/// `<prefix>_<index:08><ext>`. Stable across resumed runs.
pub fn output_file_name(dataset_stem: &str, row_index: u64, url: &str) -> String {
    format!(
        "{}_{:08}{}",
        dataset_prefix(dataset_stem),
        row_index,
        infer_extension(url)
    )
}

/// Distinct stems give distinct prefixes. A stem that is already a safe path
/// component is used as is; any other stem is sanitized and suffixed with
/// `~` plus a digest of the original bytes.
pub fn dataset_prefix(dataset_stem: &str) -> String {
    let sanitized = sanitize_component(dataset_stem, MAX_STEM_BYTES);
    if !sanitized.is_empty() && sanitized == dataset_stem && !dataset_stem.contains(DIGEST_MARK) {
        return sanitized;
    }
    let digest = hex::encode(Sha256::digest(dataset_stem.as_bytes()));
    let base = if sanitized.is_empty() { "dataset" } else { sanitized.as_str() };
    format!("{}{}{}", base, DIGEST_MARK, &digest[..DIGEST_HEX_LEN])
}
