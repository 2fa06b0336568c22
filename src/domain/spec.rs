//! Project pipeline specification (`eazy.yml`).
//!
//! A spec declares the project's dependencies, peer dependencies and the
//! commands for each CI/CD stage. Specs are immutable once loaded.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Dockerfile used to build the service image
pub const SERVICE_DOCKERFILE: &str = "Dockerfile";

/// Dockerfile used to build the integration image
pub const INTEGRATION_DOCKERFILE: &str = "Integration.Dockerfile";

/// Identity of a spec: the repository URL or path it was fetched from.
///
/// References are normalized on construction so that `repo`, `repo/` and
/// `repo.git` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct SourceRef(String);

impl SourceRef {
    pub fn new(reference: impl AsRef<str>) -> Self {
        let trimmed = reference.as_ref().trim().trim_end_matches('/');
        let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);
        Self(trimmed.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SourceRef {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SourceRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<SourceRef> for String {
    fn from(value: SourceRef) -> Self {
        value.0
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A complete project specification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSpec {
    /// Project name, used for image tags and link aliases
    pub name: String,

    /// Services this project needs running before it starts
    #[serde(default)]
    pub dependencies: Vec<SourceRef>,

    /// Services shared across dependencies, started once per session
    #[serde(default)]
    pub peer_dependencies: Vec<SourceRef>,

    #[serde(default)]
    pub integration: Integration,

    #[serde(default)]
    pub deployment: Deployment,

    /// Optional build stage run before deployment
    #[serde(default)]
    pub build: Option<BuildStage>,
}

/// Integration stage commands, run on the integration image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Integration {
    #[serde(default)]
    pub bootstrap: Vec<String>,

    #[serde(default)]
    pub run_test: Vec<String>,
}

/// Deployment settings for the service container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// Health check command run after the service starts
    #[serde(default)]
    pub health: Vec<String>,

    /// `KEY=VALUE` environment passed to the service container
    #[serde(default)]
    pub env: Vec<String>,

    /// Published service image (defaults to `<name>:latest`)
    #[serde(default)]
    pub image: Option<String>,
}

/// Build stage: a toolchain image run against the working directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStage {
    pub image: String,

    #[serde(default)]
    pub command: Vec<String>,
}

impl PipelineSpec {
    /// Load a spec from a YAML file
    pub fn from_file(path: &Path) -> PipelineResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse and validate a spec from YAML content
    pub fn from_yaml(content: &str) -> PipelineResult<Self> {
        let spec: Self = serde_yaml::from_str(content)
            .map_err(|e| PipelineError::Config(format!("failed to parse spec YAML: {}", e)))?;
        spec.validate()?;
        Ok(spec)
    }

    /// Validate the spec definition
    pub fn validate(&self) -> PipelineResult<()> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::Config("spec name cannot be empty".into()));
        }

        if let Some(build) = &self.build {
            if build.image.trim().is_empty() {
                return Err(PipelineError::Config(format!(
                    "spec '{}' declares a build stage without an image",
                    self.name
                )));
            }
        }

        for entry in &self.deployment.env {
            if !is_env_assignment(entry) {
                return Err(PipelineError::Config(format!(
                    "spec '{}' has invalid env entry '{}' (expected KEY=VALUE)",
                    self.name, entry
                )));
            }
        }

        Ok(())
    }

    /// Tag of the primary deployable image
    pub fn service_image(&self) -> String {
        match &self.deployment.image {
            Some(image) if !image.trim().is_empty() => image.clone(),
            _ => format!("{}:latest", self.name),
        }
    }

    /// Lowercase name safe for container names and link aliases,
    /// e.g. `Orders API` becomes `orders-api`
    pub fn slug(&self) -> String {
        let slug: String = self
            .name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();
        slug.trim_matches('-').to_string()
    }

    /// Tag of the latest integration image
    pub fn integration_image(&self) -> String {
        format!("{}-integration:latest", self.name)
    }

    pub fn has_bootstrap(&self) -> bool {
        !self.integration.bootstrap.is_empty()
    }

    pub fn has_health_check(&self) -> bool {
        !self.deployment.health.is_empty()
    }
}

/// Check that an entry has the `KEY=VALUE` shape with a non-empty key
pub fn is_env_assignment(entry: &str) -> bool {
    matches!(entry.split_once('='), Some((key, _)) if !key.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SPEC_YAML: &str = r#"
name: orders
dependencies:
  - git@github.com:acme/payments.git
  - git@github.com:acme/inventory
peerDependencies:
  - git@github.com:acme/postgres.git
integration:
  bootstrap: ["./migrate.sh"]
  runTest: ["cargo", "test"]
deployment:
  health: ["curl", "-f", "http://orders:8080/health"]
  env:
    - RUST_LOG=info
build:
  image: rust:1.80
  command: ["cargo", "build", "--release"]
"#;

    #[test]
    fn test_spec_parsing() {
        let spec = PipelineSpec::from_yaml(TEST_SPEC_YAML).unwrap();

        assert_eq!(spec.name, "orders");
        assert_eq!(spec.dependencies.len(), 2);
        assert_eq!(spec.peer_dependencies[0].as_str(), "git@github.com:acme/postgres");
        assert_eq!(spec.integration.run_test, vec!["cargo", "test"]);
        assert_eq!(spec.build.as_ref().unwrap().image, "rust:1.80");
        assert!(spec.has_bootstrap());
        assert!(spec.has_health_check());
    }

    #[test]
    fn test_minimal_spec_defaults() {
        let spec = PipelineSpec::from_yaml("name: solo\n").unwrap();

        assert!(spec.dependencies.is_empty());
        assert!(spec.peer_dependencies.is_empty());
        assert!(spec.build.is_none());
        assert!(!spec.has_bootstrap());
        assert_eq!(spec.service_image(), "solo:latest");
        assert_eq!(spec.integration_image(), "solo-integration:latest");
    }

    #[test]
    fn test_empty_name_rejected() {
        let result = PipelineSpec::from_yaml("name: \"\"\n");
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_invalid_env_rejected() {
        let yaml = r#"
name: broken
deployment:
  env: ["NOT_AN_ASSIGNMENT"]
"#;
        assert!(matches!(
            PipelineSpec::from_yaml(yaml),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn test_build_without_image_rejected() {
        let yaml = r#"
name: broken
build:
  image: ""
"#;
        assert!(PipelineSpec::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_source_ref_normalization() {
        assert_eq!(
            SourceRef::new("git@github.com:acme/payments.git"),
            SourceRef::new("git@github.com:acme/payments/")
        );
        assert_eq!(SourceRef::new("  ../local ").as_str(), "../local");
    }

    #[test]
    fn test_slug_is_link_safe() {
        let spec = PipelineSpec {
            name: " Orders API/v2 ".to_string(),
            ..Default::default()
        };
        assert_eq!(spec.slug(), "orders-api-v2");
    }

    #[test]
    fn test_deployment_image_override() {
        let yaml = r#"
name: api
deployment:
  image: registry.local/api:1.2
"#;
        let spec = PipelineSpec::from_yaml(yaml).unwrap();
        assert_eq!(spec.service_image(), "registry.local/api:1.2");
    }
}
