use crate::support::{
    files_in, read_doc, test_config, tree_dir, verify_tree, write_doc, MemorySource,
};
use pkgmirror::builder::RepositoryBuilder;
use pkgmirror::concurrency::CancelFlag;
use pkgmirror::error::MirrorError;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

struct ProviderTree {
    widget: String,
    providers: String,
}

fn widget_doc() -> Value {
    json!({
        "packages": {
            "acme/widget": {
                "1.0.0": {
                    "name": "acme/widget",
                    "version": "1.0.0",
                    "uid": 1,
                    "dist": {"type": "zip", "url": "https://example.org/widget-1.0.0.zip"},
                    "source": {"type": "git", "url": "https://example.org/widget.git"}
                },
                "dev-master": {
                    "name": "acme/widget",
                    "version": "dev-master",
                    "uid": 2,
                    "source": {"type": "git", "url": "https://example.org/widget.git"}
                }
            }
        }
    })
}

/// packages.json -> p/providers$%hash%.json -> p/acme/widget$%hash%.json
fn write_provider_tree(dir: &Path) -> ProviderTree {
    let widget = widget_doc();
    let widget_hash = write_doc(dir, "p/acme/widget$tmp.json", &widget);
    std::fs::rename(
        dir.join("p/acme/widget$tmp.json"),
        dir.join(format!("p/acme/widget${}.json", widget_hash)),
    )
    .unwrap();

    let providers = json!({
        "providers": {
            "p/acme/widget$%hash%.json": {"sha256": widget_hash}
        }
    });
    let providers_hash = write_doc(dir, "p/providers$tmp.json", &providers);
    std::fs::rename(
        dir.join("p/providers$tmp.json"),
        dir.join(format!("p/providers${}.json", providers_hash)),
    )
    .unwrap();

    write_doc(
        dir,
        "packages.json",
        &json!({
            "packages": [],
            "notify": "/notify/%package%",
            "notify-batch": "/notify/",
            "provider-includes": {
                "p/providers$%hash%.json": {"sha256": providers_hash}
            }
        }),
    );

    ProviderTree {
        widget: widget_hash,
        providers: providers_hash,
    }
}

#[tokio::test]
async fn unchanged_children_keep_their_names() {
    let temp = TempDir::new().unwrap();
    let dir = tree_dir(temp.path());
    let tree = write_provider_tree(&dir);
    let before = files_in(&dir);

    let builder = RepositoryBuilder::new(test_config(temp.path()));
    let report = builder.rebuild(&dir).await.unwrap();

    assert_eq!(report.summary.renamed, 0);
    assert_eq!(files_in(&dir), before);
    let root = read_doc(&dir, "packages.json");
    assert_eq!(
        root["provider-includes"]["p/providers$%hash%.json"]["sha256"],
        tree.providers.as_str()
    );
    assert!(dir.join(format!("p/acme/widget${}.json", tree.widget)).exists());
    assert_eq!(verify_tree(&dir), files_in(&dir));
}

#[tokio::test]
async fn changed_child_is_renamed_and_propagates_to_root() {
    let temp = TempDir::new().unwrap();
    let dir = tree_dir(temp.path());
    let tree = write_provider_tree(&dir);

    let mut config = test_config(temp.path());
    config.build.parse_packages = true;
    let report = RepositoryBuilder::new(config).rebuild(&dir).await.unwrap();

    // widget and provider document renamed
    assert_eq!(report.summary.renamed, 2);
    assert!(!dir.join(format!("p/providers${}.json", tree.providers)).exists());
    assert!(!dir.join(format!("p/acme/widget${}.json", tree.widget)).exists());

    let root = read_doc(&dir, "packages.json");
    let new_hash = root["provider-includes"]["p/providers$%hash%.json"]["sha256"]
        .as_str()
        .unwrap()
        .to_string();
    assert_ne!(new_hash, tree.providers);
    assert!(dir.join(format!("p/providers${}.json", new_hash)).exists());

    // no file left behind that the tree does not reference
    assert_eq!(verify_tree(&dir), files_in(&dir));
}

#[tokio::test]
async fn stable_versions_rewritten_dev_versions_untouched() {
    let temp = TempDir::new().unwrap();
    let dir = tree_dir(temp.path());
    write_provider_tree(&dir);

    let mut config = test_config(temp.path());
    config.build.parse_packages = true;
    config.build.download_url_prefix = "https://mirror.example/dl/".to_string();
    RepositoryBuilder::new(config).rebuild(&dir).await.unwrap();

    let widget_file = files_in(&dir)
        .into_iter()
        .find(|f| f.starts_with("p/acme/widget$"))
        .unwrap();
    let widget = read_doc(&dir, &widget_file);
    let stable = &widget["packages"]["acme/widget"]["1.0.0"];
    assert_eq!(
        stable["dist"],
        json!({
            "type": "zip",
            "reference": "1.0.0",
            "shasum": "",
            "url": "https://mirror.example/dl/acme/widget/1.0.0.zip"
        })
    );
    assert!(stable.get("source").is_none());

    let dev = &widget["packages"]["acme/widget"]["dev-master"];
    assert!(dev.get("dist").is_none());
    assert_eq!(dev["source"]["type"], "git");
}

#[tokio::test]
async fn second_rebuild_is_a_no_op() {
    let temp = TempDir::new().unwrap();
    let dir = tree_dir(temp.path());
    write_provider_tree(&dir);

    let mut config = test_config(temp.path());
    config.build.parse_packages = true;
    let first = RepositoryBuilder::new(config.clone()).rebuild(&dir).await.unwrap();
    let files = files_in(&dir);

    let second = RepositoryBuilder::new(config).rebuild(&dir).await.unwrap();
    assert_eq!(second.summary.renamed, 0);
    assert_eq!(second.root_digest, first.root_digest);
    assert_eq!(files_in(&dir), files);
}

#[tokio::test]
async fn uids_are_unique_and_start_at_configured_value() {
    let temp = TempDir::new().unwrap();
    let dir = tree_dir(temp.path());
    let a = write_doc(
        &dir,
        "p/a.json",
        &json!({"packages": {"acme/a": {"1.0.0": {}, "1.1.0": {}}}}),
    );
    let b = write_doc(
        &dir,
        "p/b.json",
        &json!({"packages": {"acme/b": {"2.0.0": {}, "2.1.0": {"uid": 7}}}}),
    );
    write_doc(
        &dir,
        "packages.json",
        &json!({
            "packages": {"acme/root": {"0.1.0": {}}},
            "includes": {
                "p/a.json": {"sha256": a},
                "p/b.json": {"sha256": b}
            }
        }),
    );

    let mut config = test_config(temp.path());
    config.build.uid_start = 500;
    let report = RepositoryBuilder::new(config).rebuild(&dir).await.unwrap();
    assert_eq!(report.summary.uids_assigned, 4);

    let mut uids = Vec::new();
    for (name, package) in [("p/a.json", "acme/a"), ("p/b.json", "acme/b"), ("packages.json", "acme/root")] {
        let doc = read_doc(&dir, name);
        for metadata in doc["packages"][package].as_object().unwrap().values() {
            uids.push(metadata["uid"].as_u64().unwrap());
        }
    }
    uids.sort_unstable();
    assert_eq!(uids, vec![7, 500, 501, 502, 503]);

    // includes are not hash-templated, only the references change
    assert_eq!(verify_tree(&dir), files_in(&dir));
}

#[tokio::test]
async fn cancelled_run_leaves_tree_untouched() {
    let temp = TempDir::new().unwrap();
    let dir = tree_dir(temp.path());
    write_provider_tree(&dir);
    let before: Vec<_> = files_in(&dir)
        .into_iter()
        .map(|f| (f.clone(), std::fs::read(dir.join(&f)).unwrap()))
        .collect();

    let cancel = CancelFlag::new();
    cancel.cancel();
    let mut config = test_config(temp.path());
    config.build.parse_packages = true;
    let result = RepositoryBuilder::new(config)
        .with_cancel_flag(cancel)
        .rebuild(&dir)
        .await;

    assert!(matches!(result, Err(MirrorError::Cancelled)));
    let after: Vec<_> = files_in(&dir)
        .into_iter()
        .map(|f| (f.clone(), std::fs::read(dir.join(&f)).unwrap()))
        .collect();
    assert_eq!(after, before);
}

#[tokio::test]
async fn missing_child_without_upstream_fails() {
    let temp = TempDir::new().unwrap();
    let dir = tree_dir(temp.path());
    write_doc(
        &dir,
        "packages.json",
        &json!({"includes": {"p/missing.json": {"sha256": "00"}}}),
    );

    let result = RepositoryBuilder::new(test_config(temp.path()))
        .rebuild(&dir)
        .await;
    assert!(matches!(result, Err(MirrorError::MissingSource { .. })));
}

#[tokio::test]
async fn missing_documents_are_fetched_from_upstream() {
    let upstream_dir = TempDir::new().unwrap();
    let tree = write_provider_tree(upstream_dir.path());
    let source = MemorySource::new();
    for name in files_in(upstream_dir.path()) {
        source.put(&name, std::fs::read(upstream_dir.path().join(&name)).unwrap());
    }

    let temp = TempDir::new().unwrap();
    let dir = tree_dir(temp.path());
    std::fs::copy(
        upstream_dir.path().join("packages.json"),
        dir.join("packages.json"),
    )
    .unwrap();

    let source = Arc::new(source);
    RepositoryBuilder::new(test_config(temp.path()))
        .with_remote(source.clone())
        .rebuild(&dir)
        .await
        .unwrap();

    assert_eq!(source.fetch_count(&format!("p/providers${}.json", tree.providers)), 1);
    assert_eq!(source.fetch_count(&format!("p/acme/widget${}.json", tree.widget)), 1);
    assert_eq!(source.fetch_count("packages.json"), 0);
    assert_eq!(verify_tree(&dir), files_in(&dir));
}

#[cfg(unix)]
#[tokio::test]
async fn full_build_publishes_index() {
    let upstream_dir = TempDir::new().unwrap();
    write_provider_tree(upstream_dir.path());
    let source = Arc::new(MemorySource::new());
    for name in files_in(upstream_dir.path()) {
        source.put(&name, std::fs::read(upstream_dir.path().join(&name)).unwrap());
    }

    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    let report = RepositoryBuilder::new(config)
        .with_remote(source.clone())
        .build()
        .await
        .unwrap();

    let index = temp.path().join("index");
    assert!(std::fs::symlink_metadata(&index).unwrap().file_type().is_symlink());
    assert_eq!(report.published.as_deref(), Some(std::fs::read_link(&index).unwrap().as_path()));
    assert!(!temp.path().join("tmp/composer").exists());

    let root = read_doc(&index, "packages.json");
    assert_eq!(root["notify"], "/notify/%package%");
    assert_eq!(verify_tree(&index), files_in(&index));
}
