//! Dependency Resolution Tests
//!
//! Peer deduplication across the graph and the one-shot credential retry.

use tokio_test::{assert_err, assert_ok};

use eazy::adapters::fake::{FakeCredentials, FakeFetcher};
use eazy::core::DependencyResolver;
use eazy::domain::{DependencyUnit, PipelineSpec, SourceRef};
use eazy::PipelineError;

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
async fn test_shared_peer_collected_once() {
    let fetcher = FakeFetcher::new()
        .with_spec("git@host:org/a.git", spec("a", &[], &["git@host:org/pg"]))
        .with_spec("git@host:org/b", spec("b", &[], &["git@host:org/pg.git"]))
        .with_spec("git@host:org/pg", spec("postgres", &[], &[]));
    let credentials = FakeCredentials::new();
    let root = spec(
        "root",
        &["git@host:org/a", "git@host:org/b"],
        &["git@host:org/pg/"],
    );

    let mut resolver = DependencyResolver::new(&fetcher, &credentials, None);
    let graph = assert_ok!(resolver.resolve(&root).await);

    assert_eq!(names(&graph.dependencies), vec!["a", "b"]);
    assert_eq!(names(&graph.peers), vec!["postgres"]);
    assert_eq!(graph.peers[0].depth, 2);
    assert_eq!(fetcher.fetch_count("git@host:org/pg"), 1);
}

#[tokio::test]
async fn test_nested_dependencies_keep_their_depth() {
    let fetcher = FakeFetcher::new()
        .with_spec("repo/api", spec("api", &["repo/auth"], &[]))
        .with_spec("repo/auth", spec("auth", &[], &["repo/redis"]))
        .with_spec("repo/redis", spec("redis", &[], &[]));
    let credentials = FakeCredentials::new();
    let root = spec("web", &["repo/api"], &[]);

    let mut resolver = DependencyResolver::new(&fetcher, &credentials, None);
    let graph = assert_ok!(resolver.resolve(&root).await);

    let depths: Vec<(&str, usize)> = graph
        .startup_order()
        .map(|u| (u.name(), u.depth))
        .collect();
    assert_eq!(depths, vec![("redis", 3), ("auth", 2), ("api", 1)]);
}

#[tokio::test]
async fn test_auth_failure_retried_once_after_credential_setup() {
    let fetcher = FakeFetcher::new().with_spec("git@host:org/a", spec("a", &[], &[]));
    fetcher.fail_next(
        "git@host:org/a",
        "git@host: Permission denied (publickey).",
    );
    let credentials = FakeCredentials::new();
    let root = spec("root", &["git@host:org/a"], &[]);

    let mut resolver = DependencyResolver::new(&fetcher, &credentials, None);
    let graph = assert_ok!(resolver.resolve(&root).await);

    assert_eq!(names(&graph.dependencies), vec!["a"]);
    assert_eq!(credentials.calls(), 1);
    assert_eq!(fetcher.fetch_count("git@host:org/a"), 2);
}

#[tokio::test]
async fn test_auth_failure_after_retry_is_fatal() {
    let fetcher = FakeFetcher::new().with_spec("git@host:org/a", spec("a", &[], &[]));
    fetcher.fail_next("git@host:org/a", "Permission denied (publickey)");
    fetcher.fail_next("git@host:org/a", "fatal: Could not read from remote repository.");
    let credentials = FakeCredentials::new();
    let root = spec("root", &["git@host:org/a"], &[]);

    let mut resolver = DependencyResolver::new(&fetcher, &credentials, None);
    let err = assert_err!(resolver.resolve(&root).await);

    match err {
        PipelineError::Auth { reference, message } => {
            assert_eq!(reference, "git@host:org/a");
            assert!(message.contains("Could not read from remote"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(credentials.calls(), 1);
    assert_eq!(fetcher.fetch_count("git@host:org/a"), 2);
}

#[tokio::test]
async fn test_invalid_dependency_spec_fails_resolution() {
    let fetcher = FakeFetcher::new().with_spec("repo/a", spec("", &[], &[]));
    let credentials = FakeCredentials::new();
    let root = spec("root", &["repo/a"], &[]);

    let mut resolver = DependencyResolver::new(&fetcher, &credentials, None);
    let err = assert_err!(resolver.resolve(&root).await);

    assert!(matches!(err, PipelineError::DependencyResolution { .. }));
    assert!(err.to_string().contains("repo/a"));
}

#[tokio::test]
async fn test_peer_fetch_auth_failure_retried_once() {
    let fetcher = FakeFetcher::new()
        .with_spec("repo/a", spec("a", &[], &["git@host:org/pg"]))
        .with_spec("git@host:org/pg", spec("postgres", &[], &[]));
    fetcher.fail_next("git@host:org/pg", "git@host: Permission denied (publickey).");
    let credentials = FakeCredentials::new();
    let root = spec("root", &["repo/a"], &[]);

    let mut resolver = DependencyResolver::new(&fetcher, &credentials, None);
    let graph = assert_ok!(resolver.resolve(&root).await);

    assert_eq!(names(&graph.peers), vec!["postgres"]);
    assert_eq!(credentials.calls(), 1);
    assert_eq!(fetcher.fetch_count("git@host:org/pg"), 2);
}

#[tokio::test]
async fn test_peer_fetch_auth_failure_after_retry_is_fatal() {
    let fetcher = FakeFetcher::new().with_spec("git@host:org/pg", spec("postgres", &[], &[]));
    fetcher.fail_next("git@host:org/pg", "Host key verification failed.");
    fetcher.fail_next("git@host:org/pg", "Host key verification failed.");
    let credentials = FakeCredentials::new();
    let root = spec("root", &[], &["git@host:org/pg"]);

    let mut resolver = DependencyResolver::new(&fetcher, &credentials, None);
    let err = assert_err!(resolver.resolve(&root).await);

    assert!(matches!(err, PipelineError::Auth { .. }));
    assert_eq!(credentials.calls(), 1);
    assert_eq!(fetcher.fetch_count("git@host:org/pg"), 2);
}
