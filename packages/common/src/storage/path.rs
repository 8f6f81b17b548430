use std::path::Path;

use super::digest::ContentDigest;

/// Derives the relative storage path of a blob from its digest.
///
/// Implementations must be pure: the same digest and extension always map to
/// the same path, so a path can be re-derived instead of trusted.
pub trait PathGenerator: Send + Sync {
    fn generate(&self, digest: &ContentDigest, extension: &str) -> String;
}

/// Two-level sharded layout: `ab/cd/abcdef....ext`.
///
/// The first four hex characters pick one of 65,536 leaf directories, which
/// keeps per-directory fanout bounded on any filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShardedPathGenerator;

impl PathGenerator for ShardedPathGenerator {
    fn generate(&self, digest: &ContentDigest, extension: &str) -> String {
        let extension = extension.trim_start_matches('.');
        let mut path = format!(
            "{}/{}/{}",
            digest.shard_level1(),
            digest.shard_level2(),
            digest.as_str()
        );
        if !extension.is_empty() {
            path.push('.');
            path.push_str(extension);
        }
        path
    }
}

/// Extension of an original file name, without the leading dot.
pub fn extension_of(name: &str) -> &str {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
}

/// Join the configured base directory and a generated relative path.
pub fn storage_key(base_directory: &str, relative: &str) -> String {
    let base = base_directory.trim_end_matches('/');
    let relative = relative.trim_start_matches('/');
    if base.is_empty() {
        relative.to_string()
    } else {
        format!("{base}/{relative}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digest(hex: &str) -> ContentDigest {
        ContentDigest::from_hex(hex).unwrap()
    }

    #[test]
    fn generate_shards_by_first_four_chars() {
        let d = digest("abcdef0123456789");
        assert_eq!(
            ShardedPathGenerator.generate(&d, "png"),
            "ab/cd/abcdef0123456789.png"
        );
    }

    #[test]
    fn generate_strips_leading_separator() {
        let d = digest("abcdef0123456789");
        assert_eq!(
            ShardedPathGenerator.generate(&d, ".txt"),
            "ab/cd/abcdef0123456789.txt"
        );
    }

    #[test]
    fn generate_without_extension_omits_suffix() {
        let d = digest("0011223344");
        assert_eq!(ShardedPathGenerator.generate(&d, ""), "00/11/0011223344");
        assert_eq!(ShardedPathGenerator.generate(&d, "."), "00/11/0011223344");
    }

    #[test]
    fn generate_is_deterministic() {
        let d = digest("ffeeddccbbaa");
        let first = ShardedPathGenerator.generate(&d, "bin");
        for _ in 0..10 {
            assert_eq!(ShardedPathGenerator.generate(&d, "bin"), first);
        }
        assert!(first.starts_with("ff/ee/"));
    }

    #[test]
    fn extension_of_handles_edge_cases() {
        assert_eq!(extension_of("a.txt"), "txt");
        assert_eq!(extension_of("archive.tar.gz"), "gz");
        assert_eq!(extension_of("README"), "");
        assert_eq!(extension_of(".hidden"), "");
    }

    #[test]
    fn storage_key_joins_with_single_separator() {
        assert_eq!(storage_key("dedup-media/", "/ab/cd/x"), "dedup-media/ab/cd/x");
        assert_eq!(storage_key("dedup-media", "ab/cd/x"), "dedup-media/ab/cd/x");
        assert_eq!(storage_key("", "ab/cd/x"), "ab/cd/x");
    }
}
