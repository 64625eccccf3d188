//! Container image references
//!
//! `[registry/]repository[:tag][@sha256:<hex>]`, following the Docker
//! reference grammar closely enough to reject what the engine would reject.

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

pub const DEFAULT_TAG: &str = "latest";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("image reference is empty")]
    Empty,
    #[error("invalid digest '{0}' (expected sha256:<64 hex chars>)")]
    InvalidDigest(String),
    #[error("invalid tag '{0}'")]
    InvalidTag(String),
    #[error("invalid repository name '{0}'")]
    InvalidRepository(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    pub registry: Option<String>,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

fn component_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").expect("valid regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("valid regex"))
}

fn digest_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^sha256:[a-f0-9]{64}$").expect("valid regex"))
}

impl ImageReference {
    pub fn parse(input: &str) -> Result<Self, ReferenceError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ReferenceError::Empty);
        }

        let (rest, digest) = match input.split_once('@') {
            Some((rest, digest)) => {
                if !digest_re().is_match(digest) {
                    return Err(ReferenceError::InvalidDigest(digest.to_string()));
                }
                (rest, Some(digest.to_string()))
            }
            None => (input, None),
        };

        // A colon after the last slash separates the tag; earlier colons belong to a registry port.
        let last_slash = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match rest[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                let tag = &rest[split + 1..];
                if !tag_re().is_match(tag) {
                    return Err(ReferenceError::InvalidTag(tag.to_string()));
                }
                (&rest[..split], Some(tag.to_string()))
            }
            None => (rest, None),
        };

        let (registry, repository) = match name.split_once('/') {
            Some((first, remainder))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (Some(first.to_string()), remainder.to_string())
            }
            _ => (None, name.to_string()),
        };

        if repository.is_empty() || !repository.split('/').all(|c| component_re().is_match(c)) {
            return Err(ReferenceError::InvalidRepository(repository));
        }

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// `registry/repository` without tag or digest
    pub fn name(&self) -> String {
        match &self.registry {
            Some(registry) => format!("{}/{}", registry, self.repository),
            None => self.repository.clone(),
        }
    }

    pub fn tag_or_default(&self) -> &str {
        self.tag.as_deref().unwrap_or(DEFAULT_TAG)
    }

    /// True when the reference already names immutable content
    pub fn is_pinned(&self) -> bool {
        self.digest.is_some()
    }

    /// The same repository pinned to `digest`
    pub fn pinned(&self, digest: &str) -> String {
        format!("{}@{}", self.name(), digest)
    }

    /// Finds this repository's digest among the engine's `RepoDigests`
    ///
    /// Docker Hub images are listed without the implicit `docker.io/library/`
    /// prefix, so both spellings are accepted.
    pub fn digest_from<'a>(&self, repo_digests: &'a [String]) -> Option<&'a str> {
        let name = self.name();
        let aliases = [
            name.clone(),
            format!("docker.io/{}", name),
            format!("docker.io/library/{}", name),
            format!("library/{}", name),
        ];

        repo_digests.iter().find_map(|entry| {
            let (repo, digest) = entry.split_once('@')?;
            if aliases.iter().any(|alias| alias == repo) {
                Some(digest)
            } else {
                None
            }
        })
    }
}

impl FromStr for ImageReference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}
