// Jackson Coxson
//! Developer-disk-image resolver (C8): fuzzy version matching against a
//! directory of `<version>/*.dmg, *.signature` pairs, consumed by the
//! real-device driver's auto-mount recovery (spec.md §4.5, §4.8).

use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::DevImageError;

/// A resolved developer disk image: the `.dmg` and its `.signature`.
#[derive(Debug, Clone)]
pub struct DeveloperDiskImage {
    pub dmg: PathBuf,
    pub signature: PathBuf,
}

fn version_tokens(s: &str) -> Option<Vec<u32>> {
    let re = Regex::new(r"^(\d+(?:\.\d+)+)").expect("static pattern is valid");
    let captured = re.captures(s)?.get(1)?.as_str();
    captured
        .split('.')
        .map(|t| t.parse::<u32>().ok())
        .collect()
}

fn common_prefix_len(a: &[u32], b: &[u32]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Finds the best-scoring candidate subdirectory of `root` for
/// `product_version`, requiring a score (common token prefix length) of
/// at least 2 — i.e. at least a major.minor match — and tie-breaking by
/// directory enumeration order.
pub fn resolve(root: &Path, product_version: &str) -> Result<DeveloperDiskImage, DevImageError> {
    let requested = version_tokens(product_version).ok_or_else(|| DevImageError::NoMatch {
        root: root.to_path_buf(),
        version: product_version.to_string(),
    })?;

    let mut best: Option<(usize, PathBuf)> = None;

    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Some(candidate_tokens) = version_tokens(&name) else {
            continue;
        };
        let score = common_prefix_len(&requested, &candidate_tokens);
        if score < 2 {
            continue;
        }
        let better = match &best {
            Some((best_score, _)) => score > *best_score,
            None => true,
        };
        if better {
            best = Some((score, entry.path()));
        }
    }

    let (_, dir) = best.ok_or_else(|| DevImageError::NoMatch {
        root: root.to_path_buf(),
        version: product_version.to_string(),
    })?;

    load_image_pair(&dir)
}

fn load_image_pair(dir: &Path) -> Result<DeveloperDiskImage, DevImageError> {
    let mut dmg = None;
    let mut signature = None;

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        match path.extension().and_then(|e| e.to_str()) {
            Some("dmg") if dmg.is_none() => dmg = Some(path),
            Some("signature") if signature.is_none() => signature = Some(path),
            _ => {}
        }
    }

    match (dmg, signature) {
        (Some(dmg), Some(signature)) => Ok(DeveloperDiskImage { dmg, signature }),
        _ => Err(DevImageError::MalformedImageDir(dir.to_path_buf())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn make_candidate(root: &Path, name: &str) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("DeveloperDiskImage.dmg"), b"dmg").unwrap();
        fs::write(dir.join("DeveloperDiskImage.dmg.signature"), b"sig").unwrap();
    }

    #[test]
    fn picks_highest_scoring_candidate() {
        let tmp = tempfile::tempdir().unwrap();
        make_candidate(tmp.path(), "8.0");
        make_candidate(tmp.path(), "8.4");
        make_candidate(tmp.path(), "7.1");

        let image = resolve(tmp.path(), "8.4.1").unwrap();
        assert_eq!(
            image.dmg.parent().unwrap().file_name().unwrap(),
            "8.4"
        );
    }

    #[test]
    fn rejects_candidates_scoring_below_two() {
        let tmp = tempfile::tempdir().unwrap();
        make_candidate(tmp.path(), "9");

        let err = resolve(tmp.path(), "8.4.1").unwrap_err();
        assert!(matches!(err, DevImageError::NoMatch { .. }));
    }

    #[test]
    fn malformed_directory_is_a_fatal_configuration_error() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("8.4");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("DeveloperDiskImage.dmg"), b"dmg").unwrap();
        // no .signature

        let err = resolve(tmp.path(), "8.4.1").unwrap_err();
        assert!(matches!(err, DevImageError::MalformedImageDir(_)));
    }

    #[test]
    fn tie_breaks_by_enumeration_order() {
        let tmp = tempfile::tempdir().unwrap();
        make_candidate(tmp.path(), "8.4");
        let image = resolve(tmp.path(), "8.4").unwrap();
        assert!(image.dmg.exists());
    }
}
