//! Preparation-script selection by specificity scoring.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Split identity parts into a token set. Parts are split on `_` (and `/`
/// for image references), so `ubuntu_22.04` and `tarantool/tarantool` both
/// decompose into individual tokens.
pub fn identity_tokens(parts: &[&str]) -> BTreeSet<String> {
    parts
        .iter()
        .flat_map(|part| part.split(['_', '/']))
        .filter(|token| !token.is_empty())
        .map(|token| token.to_string())
        .collect()
}

/// Pick the most specific preparation script for a target.
///
/// A candidate's file stem is tokenized on `_`; it is eligible only when its
/// token set is a subset of the target identity set (scored `2·|match|+1`)
/// or of the image identity set (scored `2·|match|`). The highest-scoring
/// eligible candidate wins, ties going to the lexicographically first name.
/// A score must exceed 1, so a candidate with any foreign token is never
/// selected; `None` means the caller should fall back to the generic script.
pub fn best_prepare_script(
    prepare_dir: &Path,
    target_tokens: &BTreeSet<String>,
    image_tokens: &BTreeSet<String>,
) -> Option<PathBuf> {
    let mut names: Vec<String> = std::fs::read_dir(prepare_dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    names.sort();

    let mut best_score = 1;
    let mut best_name = None;
    for name in names {
        let score = name_score(&name, target_tokens, image_tokens);
        if score > best_score {
            best_score = score;
            best_name = Some(prepare_dir.join(&name));
        }
    }

    best_name
}

fn name_score(name: &str, target_tokens: &BTreeSet<String>, image_tokens: &BTreeSet<String>) -> usize {
    let stem = name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name);
    let tokens: BTreeSet<&str> = stem.split('_').collect();

    let against = |set: &BTreeSet<String>, bonus: usize| {
        if tokens.iter().all(|token| set.contains(*token)) {
            tokens.iter().filter(|token| set.contains(**token)).count() * 2 + bonus
        } else {
            0
        }
    };

    against(target_tokens, 1).max(against(image_tokens, 0))
}
