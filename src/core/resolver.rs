//! Dependency graph resolution.
//!
//! Walks a root spec's dependencies depth-first into an ordered unit list,
//! then collects peer dependencies, transitively, from every resolved unit
//! and the root into a second list deduplicated across the whole graph.
//!
//! Specs are cached by source identity, so each source is fetched at most
//! once per resolver. A fetch that fails on credentials triggers one
//! credential setup and one retry of that fetch; nothing else is retried.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::{debug, info, instrument, warn};

use crate::adapters::{CredentialProvisioner, SourceFetcher};
use crate::domain::{DependencyUnit, PipelineSpec, ResolvedGraph, SourceRef};
use crate::error::{is_auth_failure, PipelineError, PipelineResult};

/// DFS frame: a spec whose dependencies are being walked
struct Frame {
    /// `None` for the root spec
    source: Option<SourceRef>,
    spec: PipelineSpec,
    next: usize,
    depth: usize,
}

/// Resolves dependency and peer-dependency units for a root spec
pub struct DependencyResolver<'a> {
    fetcher: &'a dyn SourceFetcher,
    credentials: &'a dyn CredentialProvisioner,
    key_path: Option<&'a Path>,
    cache: HashMap<SourceRef, PipelineSpec>,
}

impl<'a> DependencyResolver<'a> {
    pub fn new(
        fetcher: &'a dyn SourceFetcher,
        credentials: &'a dyn CredentialProvisioner,
        key_path: Option<&'a Path>,
    ) -> Self {
        Self {
            fetcher,
            credentials,
            key_path,
            cache: HashMap::new(),
        }
    }

    /// Resolve both unit lists for `root`
    #[instrument(skip(self, root), fields(root = %root.name))]
    pub async fn resolve(&mut self, root: &PipelineSpec) -> PipelineResult<ResolvedGraph> {
        let dependencies = self.resolve_dependencies(root).await?;

        let mut peers = Vec::new();
        let mut seen = HashSet::new();
        for unit in &dependencies {
            self.resolve_peer_dependencies(&unit.spec, unit.depth, &mut peers, &mut seen)
                .await?;
        }
        self.resolve_peer_dependencies(root, 0, &mut peers, &mut seen).await?;

        info!(
            peers = peers.len(),
            dependencies = dependencies.len(),
            "Resolved dependency graph"
        );
        Ok(ResolvedGraph {
            peers,
            dependencies,
        })
    }

    /// Depth-first walk of `root`'s dependencies.
    ///
    /// A unit is appended after all of its own dependencies. A source reached
    /// twice is resolved once; a source that depends on itself, directly or
    /// transitively, is an error.
    pub async fn resolve_dependencies(
        &mut self,
        root: &PipelineSpec,
    ) -> PipelineResult<Vec<DependencyUnit>> {
        let mut units = Vec::new();
        let mut resolved: HashSet<SourceRef> = HashSet::new();
        let mut stack = vec![Frame {
            source: None,
            spec: root.clone(),
            next: 0,
            depth: 0,
        }];

        loop {
            let Some(frame) = stack.last_mut() else {
                break;
            };

            let Some(child) = frame.spec.dependencies.get(frame.next).cloned() else {
                if let Some(Frame {
                    source: Some(source),
                    spec,
                    depth,
                    ..
                }) = stack.pop()
                {
                    debug!(%source, depth, "Resolved dependency");
                    resolved.insert(source.clone());
                    units.push(DependencyUnit::new(source, spec, depth));
                }
                continue;
            };
            frame.next += 1;
            let depth = frame.depth + 1;

            if resolved.contains(&child) {
                continue;
            }

            if stack.iter().any(|f| f.source.as_ref() == Some(&child)) {
                let path: Vec<String> = stack
                    .iter()
                    .filter_map(|f| f.source.as_ref().map(ToString::to_string))
                    .chain(std::iter::once(child.to_string()))
                    .collect();
                return Err(PipelineError::resolution(
                    &child,
                    format!("dependency cycle: {}", path.join(" -> ")),
                ));
            }

            let spec = self.fetch(&child).await?;
            stack.push(Frame {
                source: Some(child),
                spec,
                next: 0,
                depth,
            });
        }

        Ok(units)
    }

    /// Append `spec`'s peer dependencies, and transitively their own peer
    /// dependencies, to `accumulator` in discovery order. Any identity
    /// already in `seen` is skipped, which also ends peer cycles. Repeated
    /// calls never duplicate entries or re-fetch seen identities.
    pub async fn resolve_peer_dependencies(
        &mut self,
        spec: &PipelineSpec,
        depth: usize,
        accumulator: &mut Vec<DependencyUnit>,
        seen: &mut HashSet<SourceRef>,
    ) -> PipelineResult<()> {
        let mut pending: Vec<(SourceRef, usize)> = spec
            .peer_dependencies
            .iter()
            .rev()
            .map(|peer| (peer.clone(), depth + 1))
            .collect();

        while let Some((peer, peer_depth)) = pending.pop() {
            if seen.contains(&peer) {
                debug!(%peer, "Peer dependency already collected");
                continue;
            }

            let peer_spec = self.fetch(&peer).await?;
            seen.insert(peer.clone());
            pending.extend(
                peer_spec
                    .peer_dependencies
                    .iter()
                    .rev()
                    .map(|nested| (nested.clone(), peer_depth + 1)),
            );
            accumulator.push(DependencyUnit::new(peer, peer_spec, peer_depth));
        }

        Ok(())
    }

    async fn fetch(&mut self, source: &SourceRef) -> PipelineResult<PipelineSpec> {
        if let Some(spec) = self.cache.get(source) {
            return Ok(spec.clone());
        }

        let spec = self.fetch_with_auth_retry(source).await?;
        spec.validate()
            .map_err(|e| PipelineError::resolution(source, e.to_string()))?;

        self.cache.insert(source.clone(), spec.clone());
        Ok(spec)
    }

    async fn fetch_with_auth_retry(&self, source: &SourceRef) -> PipelineResult<PipelineSpec> {
        let error = match self.fetcher.fetch_spec(source, self.key_path).await {
            Ok(spec) => return Ok(spec),
            Err(e) => e,
        };

        if !is_auth_failure(&error) {
            return Err(PipelineError::resolution(source, format!("{:#}", error)));
        }

        let message = format!("{:#}", error);
        warn!(
            %source,
            error = %message,
            "Fetch failed on credentials, setting up keys and retrying"
        );
        self.credentials
            .set_up()
            .await
            .map_err(|e| PipelineError::Auth {
                reference: source.to_string(),
                message: format!("credential setup failed: {:#}", e),
            })?;

        self.fetcher
            .fetch_spec(source, self.key_path)
            .await
            .map_err(|e| {
                if is_auth_failure(&e) {
                    PipelineError::Auth {
                        reference: source.to_string(),
                        message: format!("{:#}", e),
                    }
                } else {
                    PipelineError::resolution(source, format!("{:#}", e))
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::fake::{FakeCredentials, FakeFetcher};

    fn spec(name: &str, deps: &[&str], peers: &[&str]) -> PipelineSpec {
        PipelineSpec {
            name: name.to_string(),
            dependencies: deps.iter().map(|d| SourceRef::new(d)).collect(),
            peer_dependencies: peers.iter().map(|p| SourceRef::new(p)).collect(),
            ..Default::default()
        }
    }

    fn names(units: &[DependencyUnit]) -> Vec<&str> {
        units.iter().map(|u| u.name()).collect()
    }

    #[tokio::test]
    async fn test_dependencies_resolve_depth_first() {
        let fetcher = FakeFetcher::new()
            .with_spec("repo/a", spec("a", &["repo/c"], &[]))
            .with_spec("repo/b", spec("b", &[], &[]))
            .with_spec("repo/c", spec("c", &[], &[]));
        let credentials = FakeCredentials::new();
        let root = spec("root", &["repo/a", "repo/b"], &[]);

        let mut resolver = DependencyResolver::new(&fetcher, &credentials, None);
        let units = resolver.resolve_dependencies(&root).await.unwrap();

        assert_eq!(names(&units), vec!["c", "a", "b"]);
        assert_eq!(units[0].depth, 2);
        assert_eq!(units[1].depth, 1);
    }

    #[tokio::test]
    async fn test_diamond_resolved_once() {
        let fetcher = FakeFetcher::new()
            .with_spec("repo/a", spec("a", &["repo/shared"], &[]))
            .with_spec("repo/b", spec("b", &["repo/shared"], &[]))
            .with_spec("repo/shared", spec("shared", &[], &[]));
        let credentials = FakeCredentials::new();
        let root = spec("root", &["repo/a", "repo/b"], &[]);

        let mut resolver = DependencyResolver::new(&fetcher, &credentials, None);
        let units = resolver.resolve_dependencies(&root).await.unwrap();

        assert_eq!(names(&units), vec!["shared", "a", "b"]);
        assert_eq!(fetcher.fetch_count("repo/shared"), 1);
    }

    #[tokio::test]
    async fn test_cycle_terminates_with_error() {
        let fetcher = FakeFetcher::new()
            .with_spec("repo/a", spec("a", &["repo/b"], &[]))
            .with_spec("repo/b", spec("b", &["repo/a"], &[]));
        let credentials = FakeCredentials::new();
        let root = spec("root", &["repo/a"], &[]);

        let mut resolver = DependencyResolver::new(&fetcher, &credentials, None);
        let err = resolver.resolve_dependencies(&root).await.unwrap_err();

        match err {
            PipelineError::DependencyResolution { message, .. } => {
                assert!(message.contains("repo/a -> repo/b -> repo/a"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_peer_resolution_is_idempotent() {
        let fetcher = FakeFetcher::new().with_spec("repo/pg", spec("postgres", &[], &[]));
        let credentials = FakeCredentials::new();
        let declaring = spec("a", &[], &["repo/pg"]);

        let mut resolver = DependencyResolver::new(&fetcher, &credentials, None);
        let mut peers = Vec::new();
        let mut seen = HashSet::new();
        for _ in 0..3 {
            resolver
                .resolve_peer_dependencies(&declaring, 1, &mut peers, &mut seen)
                .await
                .unwrap();
        }

        assert_eq!(names(&peers), vec!["postgres"]);
        assert_eq!(fetcher.fetch_count("repo/pg"), 1);
    }

    #[tokio::test]
    async fn test_peers_of_peers_are_collected() {
        let fetcher = FakeFetcher::new()
            .with_spec("repo/kafka", spec("kafka", &[], &["repo/zk"]))
            .with_spec("repo/zk", spec("zookeeper", &[], &[]))
            .with_spec("repo/redis", spec("redis", &[], &[]));
        let credentials = FakeCredentials::new();
        let root = spec("root", &[], &["repo/kafka", "repo/redis"]);

        let mut resolver = DependencyResolver::new(&fetcher, &credentials, None);
        let graph = resolver.resolve(&root).await.unwrap();

        assert_eq!(names(&graph.peers), vec!["kafka", "zookeeper", "redis"]);
        let depths: Vec<usize> = graph.peers.iter().map(|u| u.depth).collect();
        assert_eq!(depths, vec![1, 2, 1]);
    }

    #[tokio::test]
    async fn test_peer_cycle_terminates() {
        let fetcher = FakeFetcher::new()
            .with_spec("repo/kafka", spec("kafka", &[], &["repo/zk"]))
            .with_spec("repo/zk", spec("zookeeper", &[], &["repo/kafka"]));
        let credentials = FakeCredentials::new();
        let root = spec("root", &[], &["repo/kafka"]);

        let mut resolver = DependencyResolver::new(&fetcher, &credentials, None);
        let graph = resolver.resolve(&root).await.unwrap();

        assert_eq!(names(&graph.peers), vec!["kafka", "zookeeper"]);
        assert_eq!(fetcher.fetch_count("repo/kafka"), 1);
        assert_eq!(fetcher.fetch_count("repo/zk"), 1);
    }

    #[tokio::test]
    async fn test_non_auth_failure_is_not_retried() {
        let fetcher = FakeFetcher::new();
        let credentials = FakeCredentials::new();
        let root = spec("root", &["repo/missing"], &[]);

        let mut resolver = DependencyResolver::new(&fetcher, &credentials, None);
        let err = resolver.resolve_dependencies(&root).await.unwrap_err();

        assert!(matches!(err, PipelineError::DependencyResolution { .. }));
        assert_eq!(credentials.calls(), 0);
        assert_eq!(fetcher.fetch_count("repo/missing"), 1);
    }

    #[tokio::test]
    async fn test_ssh_in_reference_does_not_trigger_credentials() {
        let fetcher = FakeFetcher::new();
        fetcher.fail_next(
            "/srv/sshd-service",
            "failed to read /srv/sshd-service/eazy.yml: No such file or directory (os error 2)",
        );
        let credentials = FakeCredentials::new();
        let root = spec("root", &["/srv/sshd-service"], &[]);

        let mut resolver = DependencyResolver::new(&fetcher, &credentials, None);
        let err = resolver.resolve_dependencies(&root).await.unwrap_err();

        assert!(matches!(err, PipelineError::DependencyResolution { .. }));
        assert_eq!(credentials.calls(), 0);
        assert_eq!(fetcher.fetch_count("/srv/sshd-service"), 1);
    }

    #[tokio::test]
    async fn test_failed_credential_setup_is_auth_error() {
        let fetcher = FakeFetcher::new().with_spec("repo/a", spec("a", &[], &[]));
        fetcher.fail_next("repo/a", "Permission denied (publickey)");
        let credentials = FakeCredentials::failing();
        let root = spec("root", &["repo/a"], &[]);

        let mut resolver = DependencyResolver::new(&fetcher, &credentials, None);
        let err = resolver.resolve_dependencies(&root).await.unwrap_err();

        assert!(matches!(err, PipelineError::Auth { .. }));
        assert_eq!(credentials.calls(), 1);
        assert_eq!(fetcher.fetch_count("repo/a"), 1);
    }
}
