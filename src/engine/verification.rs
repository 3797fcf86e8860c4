//! Checksum verification for downloaded assets.
//!
//! The digest of a download is computed while it streams to disk (see
//! [`StreamingDigest`]); this module resolves the digest the publisher expects
//! and decides what a comparison means under the application's policy.
//!
//! # Digest sources
//!
//! In order of preference:
//!
//! 1. A digest the source API attached to the asset (`sha256:...`), or a
//!    digest-file URL it pointed at.
//! 2. The checksum pattern with `{filename}` replaced by the asset name
//!    (default `{filename}.sha256`). The result is looked up among the
//!    release's assets first, used as-is when it is an absolute URL, and
//!    otherwise resolved next to the asset's download URL.
//!
//! Digest files may contain a bare hash, `hash  filename` lines
//! (`sha256sum` output, optionally with the `*` binary marker), or BSD-style
//! `SHA256 (filename) = hash` lines.
//!
//! # Policy
//!
//! A mismatch always fails the download. A missing digest fails it only when
//! the policy says checksums are required; otherwise the file is installed
//! unverified and a [`Warning::UnverifiedChecksum`] is reported.

use anyhow::Result;
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::{ChecksumAlgorithm, ChecksumPolicy};
use crate::core::RelkeepError;
use crate::models::{Asset, DigestHint, Warning};

/// Incremental digest over a download stream.
pub enum StreamingDigest {
    /// SHA-256 state
    Sha256(Sha256),
    /// SHA-1 state
    Sha1(Sha1),
    /// MD5 state
    Md5(Md5),
}

impl StreamingDigest {
    /// Start a digest for `algorithm`.
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            ChecksumAlgorithm::Sha1 => Self::Sha1(Sha1::new()),
            ChecksumAlgorithm::Md5 => Self::Md5(Md5::new()),
        }
    }

    /// Feed the next chunk.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha1(h) => h.update(data),
            Self::Md5(h) => h.update(data),
        }
    }

    /// Lowercase hex digest of everything fed so far.
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Sha1(h) => hex::encode(h.finalize()),
            Self::Md5(h) => hex::encode(h.finalize()),
        }
    }
}

/// Digest of a file on disk, read in fixed-size chunks.
pub async fn compute_file_digest(path: &Path, algorithm: ChecksumAlgorithm) -> Result<String> {
    use anyhow::Context;
    use tokio::io::AsyncReadExt;

    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    let mut reader = tokio::io::BufReader::with_capacity(DIGEST_CHUNK_SIZE, file);
    let mut buffer = vec![0u8; DIGEST_CHUNK_SIZE];
    let mut digest = StreamingDigest::new(algorithm);

    loop {
        let read = reader
            .read(&mut buffer)
            .await
            .with_context(|| format!("Failed to read file: {}", path.display()))?;
        if read == 0 {
            break;
        }
        digest.update(&buffer[..read]);
    }
    Ok(digest.finalize_hex())
}

const DIGEST_CHUNK_SIZE: usize = 64 * 1024;

/// Result of comparing a computed digest with the published one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// The digests agree
    VerifiedMatch,
    /// The digests differ; the file must not be installed
    VerifiedMismatch {
        /// Published digest
        expected: String,
        /// Computed digest
        actual: String,
    },
    /// No published digest could be obtained
    Unavailable {
        /// Why not
        reason: String,
    },
}

/// Outcome of looking up the published digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestLookup {
    /// Lowercase hex digest
    Found(String),
    /// The reason no digest could be obtained
    Unavailable(String),
}

impl DigestLookup {
    /// Compare the computed digest against this lookup.
    pub fn verify(&self, actual: &str) -> Verification {
        match self {
            Self::Found(expected) if expected.eq_ignore_ascii_case(actual) => {
                Verification::VerifiedMatch
            }
            Self::Found(expected) => Verification::VerifiedMismatch {
                expected: expected.clone(),
                actual: actual.to_ascii_lowercase(),
            },
            Self::Unavailable(reason) => Verification::Unavailable {
                reason: reason.clone(),
            },
        }
    }
}

/// Resolves published digests over HTTP.
#[derive(Debug, Clone)]
pub struct ChecksumVerifier {
    client: reqwest::Client,
}

impl ChecksumVerifier {
    /// A verifier that fetches digest files with `client`.
    pub const fn new(client: reqwest::Client) -> Self {
        Self {
            client,
        }
    }

    /// Find the published digest of `asset` under `policy`.
    ///
    /// `siblings` are the other assets of the same release, where digest files
    /// are usually attached. Never fails: every problem becomes
    /// [`DigestLookup::Unavailable`] with a reason.
    pub async fn expected_digest(
        &self,
        policy: &ChecksumPolicy,
        asset: &Asset,
        siblings: &[Asset],
    ) -> DigestLookup {
        match &asset.digest {
            Some(DigestHint::Inline {
                algorithm,
                hex,
            }) => {
                let same_algorithm =
                    algorithm.as_deref().is_none_or(|a| a == policy.algorithm.as_str());
                if same_algorithm && is_valid_digest(hex, policy.algorithm) {
                    debug!("Using digest published with {}", asset.name);
                    return DigestLookup::Found(hex.to_ascii_lowercase());
                }
                debug!(
                    "Ignoring {} digest published with {}; policy wants {}",
                    algorithm.as_deref().unwrap_or("unknown"),
                    asset.name,
                    policy.algorithm
                );
            }
            Some(DigestHint::Url {
                url,
            }) => {
                return self.fetch_digest_file(url, &asset.name, policy.algorithm).await;
            }
            None => {}
        }

        let url = digest_file_url(&policy.pattern, asset, siblings);
        self.fetch_digest_file(&url, &asset.name, policy.algorithm).await
    }

    async fn fetch_digest_file(
        &self,
        url: &str,
        file_name: &str,
        algorithm: ChecksumAlgorithm,
    ) -> DigestLookup {
        debug!("Fetching digest file: {}", url);

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => return DigestLookup::Unavailable(format!("failed to fetch {url}: {e}")),
        };

        if !response.status().is_success() {
            return DigestLookup::Unavailable(format!(
                "HTTP {} fetching {url}",
                response.status().as_u16()
            ));
        }

        let content = match response.text().await {
            Ok(content) => content,
            Err(e) => return DigestLookup::Unavailable(format!("failed to read {url}: {e}")),
        };

        match parse_digest_file(&content, file_name, algorithm) {
            Some(digest) => DigestLookup::Found(digest),
            None => DigestLookup::Unavailable(format!(
                "no {algorithm} digest for '{file_name}' in {url}"
            )),
        }
    }
}

/// Apply the checksum policy to a verification result.
///
/// Returns a warning for an unverified download that may proceed.
///
/// # Errors
///
/// [`RelkeepError::ChecksumMismatch`] for any mismatch, and
/// [`RelkeepError::ChecksumUnavailable`] for a missing digest when required.
pub fn enforce_policy(
    policy: &ChecksumPolicy,
    asset_name: &str,
    verification: &Verification,
) -> Result<Option<Warning>> {
    match verification {
        Verification::VerifiedMatch => {
            info!("Checksum verified for {}", asset_name);
            Ok(None)
        }
        Verification::VerifiedMismatch {
            expected,
            actual,
        } => Err(RelkeepError::ChecksumMismatch {
            asset: asset_name.to_string(),
            algorithm: policy.algorithm.to_string(),
            expected: expected.clone(),
            actual: actual.clone(),
        }
        .into()),
        Verification::Unavailable {
            reason,
        } if policy.required => Err(RelkeepError::ChecksumUnavailable {
            asset: asset_name.to_string(),
            reason: reason.clone(),
        }
        .into()),
        Verification::Unavailable {
            reason,
        } => {
            let warning = Warning::UnverifiedChecksum {
                asset: asset_name.to_string(),
                reason: reason.clone(),
            };
            warn!("{}", warning);
            Ok(Some(warning))
        }
    }
}

/// Where to look for the digest file of `asset`.
pub fn digest_file_url(pattern: &str, asset: &Asset, siblings: &[Asset]) -> String {
    let name = pattern.replace("{filename}", &asset.name);

    if let Some(sibling) = siblings.iter().find(|s| s.name == name) {
        return sibling.url.clone();
    }
    if name.starts_with("http://") || name.starts_with("https://") {
        return name;
    }
    match asset.url.rsplit_once('/') {
        Some((base, _)) => format!("{base}/{name}"),
        None => name,
    }
}

/// Extract the digest for `file_name` from a digest file.
pub fn parse_digest_file(content: &str, file_name: &str, algorithm: ChecksumAlgorithm) -> Option<String> {
    let lines: Vec<&str> =
        content.lines().map(str::trim).filter(|l| !l.is_empty() && !l.starts_with('#')).collect();

    for line in &lines {
        // BSD style: SHA256 (App.AppImage) = abc...
        if let Some((lhs, hash)) = line.rsplit_once(" = ") {
            let named = lhs.split_once('(').and_then(|(_, rest)| rest.strip_suffix(')'));
            if let Some(named) = named {
                if names_match(named, file_name) && is_valid_digest(hash.trim(), algorithm) {
                    return Some(hash.trim().to_ascii_lowercase());
                }
                continue;
            }
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() == 2 {
            let (hash, named) = (parts[0], parts[1].trim_start_matches('*'));
            if names_match(named, file_name) && is_valid_digest(hash, algorithm) {
                return Some(hash.to_ascii_lowercase());
            }
        }
    }

    // a file holding nothing but the hash
    if let [single] = lines.as_slice() {
        let token = single.split_whitespace().next().unwrap_or_default();
        if single.split_whitespace().count() == 1 && is_valid_digest(token, algorithm) {
            return Some(token.to_ascii_lowercase());
        }
    }

    None
}

fn names_match(listed: &str, file_name: &str) -> bool {
    let listed = listed.trim_start_matches("./");
    listed == file_name || listed.rsplit('/').next() == Some(file_name)
}

fn is_valid_digest(hex: &str, algorithm: ChecksumAlgorithm) -> bool {
    hex.len() == algorithm.hex_len() && hex.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA256: &str = "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f";
    const HELLO_SHA1: &str = "0a0a9f2a6772942557ab5355d76af442f8f65e01";
    const HELLO_MD5: &str = "65a8e27d8879283831b664bd8b7f0ad4";

    fn asset(name: &str) -> Asset {
        Asset {
            name: name.to_string(),
            url: format!("https://example.com/releases/v1/{name}"),
            size: None,
            digest: None,
        }
    }

    #[test]
    fn test_streaming_digest_algorithms() {
        for (algorithm, expected) in [
            (ChecksumAlgorithm::Sha256, HELLO_SHA256),
            (ChecksumAlgorithm::Sha1, HELLO_SHA1),
            (ChecksumAlgorithm::Md5, HELLO_MD5),
        ] {
            let mut digest = StreamingDigest::new(algorithm);
            digest.update(b"Hello, ");
            digest.update(b"World!");
            assert_eq!(digest.finalize_hex(), expected, "{algorithm}");
        }
    }

    #[tokio::test]
    async fn test_compute_file_digest() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), b"Hello, World!").unwrap();
        let digest = compute_file_digest(temp.path(), ChecksumAlgorithm::Sha256).await.unwrap();
        assert_eq!(digest, HELLO_SHA256);
    }

    #[tokio::test]
    async fn test_compute_file_digest_spans_chunks() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let content: Vec<u8> = (0..3 * DIGEST_CHUNK_SIZE + 17).map(|i| (i % 251) as u8).collect();
        std::fs::write(temp.path(), &content).unwrap();

        let mut expected = StreamingDigest::new(ChecksumAlgorithm::Sha1);
        expected.update(&content);

        let digest = compute_file_digest(temp.path(), ChecksumAlgorithm::Sha1).await.unwrap();
        assert_eq!(digest, expected.finalize_hex());
        assert!(compute_file_digest(&temp.path().with_extension("gone"), ChecksumAlgorithm::Sha1).await.is_err());
    }

    #[test]
    fn test_parse_digest_file_formats() {
        let sha = ChecksumAlgorithm::Sha256;
        assert_eq!(parse_digest_file(HELLO_SHA256, "App.AppImage", sha).as_deref(), Some(HELLO_SHA256));

        let gnu = format!("{}  Other.AppImage\n{HELLO_SHA256} *App.AppImage\n", "0".repeat(64));
        assert_eq!(parse_digest_file(&gnu, "App.AppImage", sha).as_deref(), Some(HELLO_SHA256));

        let bsd = format!("SHA256 (App.AppImage) = {}", HELLO_SHA256.to_uppercase());
        assert_eq!(parse_digest_file(&bsd, "App.AppImage", sha).as_deref(), Some(HELLO_SHA256));

        let nested = format!("# checksums\n{HELLO_SHA256}  ./dist/App.AppImage");
        assert_eq!(parse_digest_file(&nested, "App.AppImage", sha).as_deref(), Some(HELLO_SHA256));
    }

    #[test]
    fn test_parse_digest_file_rejects_wrong_entries() {
        let sha = ChecksumAlgorithm::Sha256;
        let other = format!("{HELLO_SHA256}  App-dev.AppImage");
        assert_eq!(parse_digest_file(&other, "App.AppImage", sha), None);
        // md5 length under a sha256 policy
        assert_eq!(parse_digest_file(HELLO_MD5, "App.AppImage", sha), None);
        assert_eq!(parse_digest_file("<html>Not Found</html>", "App.AppImage", sha), None);
    }

    #[test]
    fn test_digest_file_url_resolution() {
        let app = asset("App.AppImage");
        let siblings = vec![
            app.clone(),
            Asset {
                name: "App.AppImage.sha256".to_string(),
                url: "https://cdn.example.com/xyz".to_string(),
                size: None,
                digest: None,
            },
        ];

        assert_eq!(digest_file_url("{filename}.sha256", &app, &siblings), "https://cdn.example.com/xyz");
        assert_eq!(
            digest_file_url("SHA256SUMS", &app, &siblings),
            "https://example.com/releases/v1/SHA256SUMS"
        );
        assert_eq!(
            digest_file_url("https://sums.example.com/{filename}.md5", &app, &[]),
            "https://sums.example.com/App.AppImage.md5"
        );
    }

    #[test]
    fn test_lookup_verify() {
        let found = DigestLookup::Found(HELLO_SHA256.to_string());
        assert_eq!(found.verify(&HELLO_SHA256.to_uppercase()), Verification::VerifiedMatch);
        assert!(matches!(found.verify(&"0".repeat(64)), Verification::VerifiedMismatch { .. }));
        assert!(matches!(
            DigestLookup::Unavailable("404".to_string()).verify(HELLO_SHA256),
            Verification::Unavailable { .. }
        ));
    }

    #[test]
    fn test_policy_asymmetry() {
        let optional = ChecksumPolicy::default();
        let required = ChecksumPolicy {
            required: true,
            ..ChecksumPolicy::default()
        };
        let mismatch = Verification::VerifiedMismatch {
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        };
        let missing = Verification::Unavailable {
            reason: "HTTP 404".to_string(),
        };

        // mismatch fails regardless of `required`
        assert!(enforce_policy(&optional, "App", &mismatch).is_err());
        assert!(enforce_policy(&required, "App", &mismatch).is_err());

        // missing digest fails only when required
        let warning = enforce_policy(&optional, "App", &missing).unwrap();
        assert!(matches!(warning, Some(Warning::UnverifiedChecksum { .. })));
        let err = enforce_policy(&required, "App", &missing).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RelkeepError>(),
            Some(RelkeepError::ChecksumUnavailable { .. })
        ));

        assert_eq!(enforce_policy(&required, "App", &Verification::VerifiedMatch).unwrap(), None);
    }

    #[tokio::test]
    async fn test_inline_digest_needs_no_request() {
        let verifier = ChecksumVerifier::new(reqwest::Client::new());
        let mut app = asset("App.AppImage");
        app.digest = DigestHint::parse(&format!("sha256:{HELLO_SHA256}"));

        let lookup = verifier.expected_digest(&ChecksumPolicy::default(), &app, &[]).await;
        assert_eq!(lookup, DigestLookup::Found(HELLO_SHA256.to_string()));
    }
}
