//! Environment descriptor: the flat `KEY=value` file that declares which
//! image an environment should run.
//!
//! Parsing is lossless: every line keeps its raw text, so rendering an
//! unmodified descriptor reproduces the input byte-for-byte (comments, blank
//! lines, `export ` prefixes, CRLF endings, trailing newline or not).
//! The only mutation offered is [`EnvironmentDescriptor::with_image_version`].

use sha2::{Digest, Sha256};

use crate::error::PromoteError;
use crate::types::DeploymentRef;

pub const IMAGE_NAME: &str = "IMAGE_NAME";
pub const IMAGE_VERSION: &str = "IMAGE_VERSION";
pub const NAME: &str = "NAME";
pub const DEPLOYMENT: &str = "DEPLOYMENT";
pub const DEPLOYMENT_NAME: &str = "DEPLOYMENT_NAME";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    /// `[export ]KEY=value`. `prefix` is everything before the key.
    Entry {
        prefix: String,
        key: String,
        value: String,
        raw: String,
    },
    /// Comment, blank line or anything that is not an assignment.
    Other(String),
}

impl Line {
    fn raw(&self) -> &str {
        match self {
            Line::Entry { raw, .. } => raw,
            Line::Other(raw) => raw,
        }
    }
}

/// Ordered, lossless view of a descriptor file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentDescriptor {
    lines: Vec<Line>,
}

impl EnvironmentDescriptor {
    /// Parse descriptor text. Never fails: unrecognised lines pass through.
    pub fn parse(text: &str) -> Self {
        let lines = text.split('\n').map(parse_line).collect();
        Self { lines }
    }

    /// Render back to text. Identical to the parsed input unless mutated.
    pub fn render(&self) -> String {
        let raws: Vec<&str> = self.lines.iter().map(Line::raw).collect();
        raws.join("\n")
    }

    /// Value of `key`. When a key repeats, the last assignment wins, as in a shell.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().rev().find_map(|line| match line {
            Line::Entry { key: k, value, .. } if k == key => Some(unquote(value)),
            _ => None,
        })
    }

    /// All assignments in file order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.lines.iter().filter_map(|line| match line {
            Line::Entry { key, value, .. } => Some((key.as_str(), unquote(value))),
            Line::Other(_) => None,
        })
    }

    pub fn image_version(&self) -> Option<&str> {
        self.get(IMAGE_VERSION)
    }

    /// `IMAGE_NAME:IMAGE_VERSION`, the reference pods must run.
    pub fn image_reference(&self) -> Option<String> {
        let name = self.get(IMAGE_NAME)?;
        let version = self.get(IMAGE_VERSION)?;
        Some(format!("{name}:{version}"))
    }

    /// Deployment named by `DEPLOYMENT_NAME`, container named by `NAME`.
    pub fn deployment_ref(&self, namespace: Option<String>) -> Result<DeploymentRef, PromoteError> {
        let name = self
            .get(DEPLOYMENT_NAME)
            .ok_or_else(|| PromoteError::not_found(format!("{DEPLOYMENT_NAME} in descriptor")))?;
        let container = self
            .get(NAME)
            .ok_or_else(|| PromoteError::not_found(format!("{NAME} in descriptor")))?;
        Ok(DeploymentRef {
            namespace,
            name: name.to_string(),
            container: container.to_string(),
        })
    }

    /// Copy of this descriptor with every `IMAGE_VERSION` line rewritten to
    /// `version`. Each rewritten line keeps its prefix and line ending; every
    /// other line is untouched.
    pub fn with_image_version(&self, version: &str) -> Result<Self, PromoteError> {
        let mut found = false;
        let lines = self
            .lines
            .iter()
            .map(|line| match line {
                Line::Entry { prefix, key, raw, .. } if key == IMAGE_VERSION => {
                    found = true;
                    let cr = if raw.ends_with('\r') { "\r" } else { "" };
                    Line::Entry {
                        prefix: prefix.clone(),
                        key: key.clone(),
                        value: version.to_string(),
                        raw: format!("{prefix}{key}={version}{cr}"),
                    }
                }
                other => other.clone(),
            })
            .collect();
        if !found {
            return Err(PromoteError::not_found(format!("{IMAGE_VERSION} in descriptor")));
        }
        Ok(Self { lines })
    }

    /// SHA-256 hex digest of the rendered text.
    pub fn digest(&self) -> String {
        content_digest(&self.render())
    }
}

/// SHA-256 hex digest of arbitrary text.
pub fn content_digest(text: &str) -> String {
    let mut h = Sha256::new();
    h.update(text.as_bytes());
    hex::encode(h.finalize())
}

fn parse_line(raw: &str) -> Line {
    let body = raw.strip_suffix('\r').unwrap_or(raw);
    let trimmed = body.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Line::Other(raw.to_string());
    }
    let indent = &body[..body.len() - trimmed.len()];
    let (export, rest) = match trimmed.strip_prefix("export ") {
        Some(rest) => {
            let rest_trimmed = rest.trim_start();
            let gap = &rest[..rest.len() - rest_trimmed.len()];
            (format!("export {gap}"), rest_trimmed)
        }
        None => (String::new(), trimmed),
    };
    let Some((key, value)) = rest.split_once('=') else {
        return Line::Other(raw.to_string());
    };
    if !is_identifier(key) {
        return Line::Other(raw.to_string());
    }
    Line::Entry {
        prefix: format!("{indent}{export}"),
        key: key.to_string(),
        value: value.to_string(),
        raw: raw.to_string(),
    }
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn unquote(value: &str) -> &str {
    let v = value.trim();
    for q in ['"', '\''] {
        if v.len() >= 2 && v.starts_with(q) && v.ends_with(q) {
            return &v[1..v.len() - 1];
        }
    }
    v
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# pre-prod api\n\
export IMAGE_NAME=registry.example.com/lapwing/api\n\
export IMAGE_VERSION=1.2.2\n\
export NAME=api\n\
export DEPLOYMENT=lapwing\n\
export DEPLOYMENT_NAME=lapwing-api\n\
EXTRA_FLAG=\"on\"\n";

    #[test]
    fn render_is_lossless() {
        for text in [
            SAMPLE,
            "",
            "A=1",
            "A=1\r\nB=2\r\n",
            "  # indented comment\n\nnot an assignment\n",
            "export   SPACED=1\n",
        ] {
            assert_eq!(EnvironmentDescriptor::parse(text).render(), text);
        }
    }

    #[test]
    fn reads_required_keys() {
        let d = EnvironmentDescriptor::parse(SAMPLE);
        assert_eq!(d.image_version(), Some("1.2.2"));
        assert_eq!(
            d.image_reference().as_deref(),
            Some("registry.example.com/lapwing/api:1.2.2")
        );
        assert_eq!(d.get(DEPLOYMENT), Some("lapwing"));
        assert_eq!(d.get("EXTRA_FLAG"), Some("on"));
        assert_eq!(d.get("MISSING"), None);
    }

    #[test]
    fn entries_preserve_file_order() {
        let d = EnvironmentDescriptor::parse(SAMPLE);
        let keys: Vec<&str> = d.entries().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec![IMAGE_NAME, IMAGE_VERSION, NAME, DEPLOYMENT, DEPLOYMENT_NAME, "EXTRA_FLAG"]
        );
    }

    #[test]
    fn image_version_rewrite_touches_only_that_line() {
        let d = EnvironmentDescriptor::parse(SAMPLE);
        let updated = d.with_image_version("1.2.3").unwrap().render();
        assert_eq!(updated, SAMPLE.replace("IMAGE_VERSION=1.2.2", "IMAGE_VERSION=1.2.3"));
    }

    #[test]
    fn image_version_rewrite_keeps_crlf_and_missing_trailing_newline() {
        let text = "IMAGE_NAME=api\r\nIMAGE_VERSION=1.0.0\r\nNAME=api";
        let updated = EnvironmentDescriptor::parse(text)
            .with_image_version("1.0.1")
            .unwrap()
            .render();
        assert_eq!(updated, "IMAGE_NAME=api\r\nIMAGE_VERSION=1.0.1\r\nNAME=api");
    }

    #[test]
    fn rewrite_without_image_version_is_not_found() {
        let err = EnvironmentDescriptor::parse("IMAGE_NAME=api\n")
            .with_image_version("1.0.0")
            .unwrap_err();
        assert!(matches!(err, PromoteError::NotFound { .. }), "got: {err}");
    }

    #[test]
    fn commented_out_version_is_not_an_entry() {
        let d = EnvironmentDescriptor::parse("# IMAGE_VERSION=0.0.1\nIMAGE_VERSION=0.0.2\n");
        assert_eq!(d.image_version(), Some("0.0.2"));
        let out = d.with_image_version("0.0.3").unwrap().render();
        assert_eq!(out, "# IMAGE_VERSION=0.0.1\nIMAGE_VERSION=0.0.3\n");
    }

    #[test]
    fn deployment_ref_uses_deployment_name_and_container_name() {
        let d = EnvironmentDescriptor::parse(SAMPLE);
        let target = d.deployment_ref(Some("apps".into())).unwrap();
        assert_eq!(target.name, "lapwing-api");
        assert_eq!(target.container, "api");
        assert_eq!(target.to_string(), "apps/lapwing-api");
    }

    #[test]
    fn digest_tracks_content() {
        let a = EnvironmentDescriptor::parse(SAMPLE);
        let b = a.with_image_version("9.9.9").unwrap();
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.digest(), content_digest(SAMPLE));
    }
}
