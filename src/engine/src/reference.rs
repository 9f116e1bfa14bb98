//! Image reference parsing.
//!
//! Parses FROM arguments and target images like `myorg/dhi-node:18-dev` into
//! structured components. Unlike a registry client, the reference keeps the
//! text as written: an implicit registry stays implicit and no `latest` tag
//! is invented, so a rewritten FROM line reads the way its author wrote it.

use dhi_migrate_core::error::{MigrateError, Result};

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when none is specified.
const DEFAULT_TAG: &str = "latest";

/// Tag suffix of hardened build (dev-tooled) variants.
const DEV_SUFFIX: &str = "-dev";

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname, only when written explicitly (e.g., "ghcr.io")
    pub registry: Option<String>,
    /// Repository path as written (e.g., "node", "myorg/dhi-node")
    pub repository: String,
    /// Tag (e.g., "18", "18-dev")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `node`
    /// - `node:18`
    /// - `myorg/dhi-node:18-dev`
    /// - `ghcr.io/org/image:tag`
    /// - `registry.local:5000/image@sha256:abc...`
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(MigrateError::InvalidReference(
                "Empty image reference".to_string(),
            ));
        }
        if reference.contains(char::is_whitespace) {
            return Err(MigrateError::InvalidReference(format!(
                "Image reference '{}' contains whitespace",
                reference
            )));
        }

        // Split off digest first (@ separator)
        let (name_tag, digest) = if let Some(at_pos) = reference.rfind('@') {
            let digest_part = &reference[at_pos + 1..];
            if !digest_part.contains(':') {
                return Err(MigrateError::InvalidReference(format!(
                    "Invalid digest format in reference '{}': expected algorithm:hex",
                    reference
                )));
            }
            (&reference[..at_pos], Some(digest_part.to_string()))
        } else {
            (reference, None)
        };

        let (name, tag) = split_tag(name_tag);
        if name.is_empty() {
            return Err(MigrateError::InvalidReference(format!(
                "Empty repository in reference '{}'",
                reference
            )));
        }
        if tag.as_deref() == Some("") {
            return Err(MigrateError::InvalidReference(format!(
                "Empty tag in reference '{}'",
                reference
            )));
        }

        let (registry, repository) = split_registry_repository(name);
        if repository.is_empty() {
            return Err(MigrateError::InvalidReference(format!(
                "Empty repository in reference '{}'",
                reference
            )));
        }

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Last path component of the repository (e.g., "dhi-node").
    pub fn name(&self) -> &str {
        self.repository
            .rsplit('/')
            .next()
            .unwrap_or(&self.repository)
    }

    /// Repository path before the image name (e.g., "myorg"), if any.
    pub fn namespace(&self) -> Option<&str> {
        self.repository.rfind('/').map(|pos| &self.repository[..pos])
    }

    /// The reserved empty image.
    pub fn is_scratch(&self) -> bool {
        self.registry.is_none() && self.repository == "scratch"
    }

    /// Whether the tag names a dev-tooled variant.
    pub fn is_dev(&self) -> bool {
        self.tag
            .as_deref()
            .is_some_and(|t| t.ends_with(DEV_SUFFIX))
    }

    /// Copy of this reference with its namespace replaced.
    ///
    /// The registry and image name are kept; an empty namespace removes it.
    pub fn with_namespace(&self, namespace: &str) -> Self {
        let namespace = namespace.trim_matches('/');
        let repository = if namespace.is_empty() {
            self.name().to_string()
        } else {
            format!("{}/{}", namespace, self.name())
        };
        ImageReference {
            repository,
            ..self.clone()
        }
    }

    /// Dev-tooled build variant (`<tag>-dev`).
    ///
    /// A digest pins one specific image and is dropped once the tag changes.
    pub fn to_dev(&self) -> Self {
        if self.is_dev() {
            return self.clone();
        }
        let tag = self.tag.as_deref().unwrap_or(DEFAULT_TAG);
        ImageReference {
            tag: Some(format!("{}{}", tag, DEV_SUFFIX)),
            digest: None,
            ..self.clone()
        }
    }

    /// Minimal runtime variant (tag without the `-dev` suffix).
    pub fn to_runtime(&self) -> Self {
        match self.tag.as_deref().and_then(|t| t.strip_suffix(DEV_SUFFIX)) {
            Some(stripped) => ImageReference {
                tag: Some(if stripped.is_empty() {
                    DEFAULT_TAG.to_string()
                } else {
                    stripped.to_string()
                }),
                digest: None,
                ..self.clone()
            },
            None => self.clone(),
        }
    }

    /// Fully-qualified reference with default registry and tag applied.
    pub fn canonical(&self) -> String {
        let registry = self.registry.as_deref().unwrap_or(DEFAULT_REGISTRY);
        let repository = if self.registry.is_none() && !self.repository.contains('/') {
            format!("library/{}", self.repository)
        } else {
            self.repository.clone()
        };
        let mut s = format!("{}/{}", registry, repository);
        match (&self.tag, &self.digest) {
            (None, None) => {
                s.push(':');
                s.push_str(DEFAULT_TAG);
            }
            (tag, digest) => {
                if let Some(tag) = tag {
                    s.push(':');
                    s.push_str(tag);
                }
                if let Some(digest) = digest {
                    s.push('@');
                    s.push_str(digest);
                }
            }
        }
        s
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(ref registry) = self.registry {
            write!(f, "{}/", registry)?;
        }
        write!(f, "{}", self.repository)?;
        if let Some(ref tag) = self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(ref digest) = self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

/// Split `name[:tag]`, looking for the tag only after the last `/`.
fn split_tag(name_tag: &str) -> (&str, Option<String>) {
    let last_segment_start = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
    let after_slash = &name_tag[last_segment_start..];
    match after_slash.rfind(':') {
        Some(colon_pos) => {
            let split = last_segment_start + colon_pos;
            let tag = &name_tag[split + 1..];
            // `registry:5000` with no path: a port, not a tag
            if last_segment_start == 0
                && !tag.is_empty()
                && tag.chars().all(|c| c.is_ascii_digit())
                && name_tag[..split].contains('.')
            {
                (name_tag, None)
            } else {
                (&name_tag[..split], Some(tag.to_string()))
            }
        }
        None => (name_tag, None),
    }
}

/// Split a name into an explicit registry and the repository path.
fn split_registry_repository(name: &str) -> (Option<String>, String) {
    // The first component is a registry hostname if it contains a dot or
    // colon, or is "localhost"
    if let Some(slash_pos) = name.find('/') {
        let first = &name[..slash_pos];
        if first.contains('.') || first.contains(':') || first == "localhost" {
            return (
                Some(first.to_string()),
                name[slash_pos + 1..].to_string(),
            );
        }
    }
    (None, name.to_string())
}
