use crate::support::{files_in, read_doc, test_config, tree_dir, verify_tree, write_doc};
use pkgmirror::builder::RepositoryBuilder;
use pkgmirror::config::MirrorConfig;
use pkgmirror::hash::{self, ShaMethod};
use pkgmirror::private::PrivatePackages;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write_renamed(dir: &Path, template: &str, content: &Value) -> String {
    let hash = write_doc(dir, "staging.json", content);
    let target = dir.join(template.replace("%hash%", &hash));
    std::fs::create_dir_all(target.parent().unwrap()).unwrap();
    std::fs::rename(dir.join("staging.json"), target).unwrap();
    hash
}

/// Root fanning out through `providers-url` with one attach point.
fn write_active_tree(dir: &Path) -> String {
    let public = write_renamed(
        dir,
        "p/acme/public$%hash%.json",
        &json!({"packages": {"acme/public": {"1.0.0": {"uid": 1}}}}),
    );
    let active = write_renamed(
        dir,
        "p/provider-active$%hash%.json",
        &json!({"providers": {"acme/public": {"sha256": public}}}),
    );
    write_doc(
        dir,
        "packages.json",
        &json!({
            "packages": [],
            "providers-url": "/p/%package%$%hash%.json",
            "provider-includes": {
                "p/provider-active$%hash%.json": {"sha256": active}
            }
        }),
    );
    public
}

fn write_private(path: &Path, versions: Value) {
    let content = json!({"packages": {"acme/widget": versions}});
    std::fs::write(path, serde_json::to_vec(&content).unwrap()).unwrap();
}

fn private_config(temp: &Path) -> (MirrorConfig, PathBuf) {
    let private_file = temp.join("private.json");
    let mut config = test_config(temp);
    config.build.attach_private_packages = true;
    config.build.private_packages_file = Some(private_file.clone());
    (config, private_file)
}

fn widget_digest(private_file: &Path) -> String {
    let private = PrivatePackages::load(private_file).unwrap();
    let standalone = private.standalone_document("acme/widget").unwrap();
    hash::digest_content(&standalone, ShaMethod::Sha256).unwrap().1
}

fn active_providers(dir: &Path) -> Value {
    let root = read_doc(dir, "packages.json");
    let hash = root["provider-includes"]["p/provider-active$%hash%.json"]["sha256"]
        .as_str()
        .unwrap()
        .to_string();
    read_doc(dir, &format!("p/provider-active${}.json", hash))["providers"].clone()
}

#[tokio::test]
async fn private_package_gets_standalone_file_at_attach_point() {
    let temp = TempDir::new().unwrap();
    let dir = tree_dir(temp.path());
    let public = write_active_tree(&dir);
    let (config, private_file) = private_config(temp.path());
    write_private(
        &private_file,
        json!({"1.0.0": {"name": "acme/widget", "version": "1.0.0", "uid": 10}}),
    );

    let report = RepositoryBuilder::new(config).rebuild(&dir).await.unwrap();
    assert_eq!(report.summary.private_attached, 1);

    let expected = widget_digest(&private_file);
    let providers = active_providers(&dir);
    assert_eq!(providers["acme/widget"], json!({"sha256": expected}));
    assert_eq!(providers["acme/public"], json!({"sha256": public}));

    let widget = read_doc(&dir, &format!("p/acme/widget${}.json", expected));
    assert_eq!(widget["packages"]["acme/widget"]["1.0.0"]["uid"], 10);
    assert_eq!(verify_tree(&dir), files_in(&dir));
}

#[tokio::test]
async fn attach_only_refreshes_private_entries() {
    let temp = TempDir::new().unwrap();
    let dir = tree_dir(temp.path());
    let public = write_active_tree(&dir);
    let (config, private_file) = private_config(temp.path());
    write_private(&private_file, json!({"1.0.0": {"uid": 10}}));
    RepositoryBuilder::new(config.clone()).rebuild(&dir).await.unwrap();
    let first = widget_digest(&private_file);

    let public_file = format!("p/acme/public${}.json", public);
    let public_bytes = std::fs::read(dir.join(&public_file)).unwrap();

    write_private(&private_file, json!({"1.0.0": {"uid": 10}, "1.1.0": {"uid": 11}}));
    let report = RepositoryBuilder::new(config)
        .attach_private(&dir)
        .await
        .unwrap();
    let second = widget_digest(&private_file);
    assert_ne!(first, second);

    // widget, attach point, root
    assert_eq!(report.summary.persisted, 3);
    assert!(!dir.join(format!("p/acme/widget${}.json", first)).exists());
    assert!(dir.join(format!("p/acme/widget${}.json", second)).exists());
    assert_eq!(std::fs::read(dir.join(&public_file)).unwrap(), public_bytes);
    assert_eq!(active_providers(&dir)["acme/widget"], json!({"sha256": second}));
    assert_eq!(verify_tree(&dir), files_in(&dir));
}

#[tokio::test]
async fn documents_outside_attach_points_get_nothing() {
    let temp = TempDir::new().unwrap();
    let dir = tree_dir(temp.path());
    write_active_tree(&dir);
    let (mut config, private_file) = private_config(temp.path());
    config.build.attach_points = vec!["p/providers-elsewhere.json".to_string()];
    write_private(&private_file, json!({"1.0.0": {"uid": 10}}));

    let report = RepositoryBuilder::new(config).rebuild(&dir).await.unwrap();
    assert_eq!(report.summary.private_attached, 0);
    assert!(active_providers(&dir).get("acme/widget").is_none());
    assert!(!files_in(&dir).iter().any(|f| f.starts_with("p/acme/widget")));
}

#[tokio::test]
async fn combined_private_file_without_providers_url() {
    let temp = TempDir::new().unwrap();
    let dir = tree_dir(temp.path());
    let latest = write_doc(&dir, "p/providers-latest.json", &json!({"providers": []}));
    write_doc(
        &dir,
        "packages.json",
        &json!({
            "packages": [],
            "providers-includes": {
                "p/providers-latest.json": {"sha256": latest}
            }
        }),
    );
    let (config, private_file) = private_config(temp.path());
    write_private(&private_file, json!({"2.0.0": {"uid": 20}}));

    RepositoryBuilder::new(config).rebuild(&dir).await.unwrap();

    let private = PrivatePackages::load(&private_file).unwrap();
    let expected = hash::digest_content(&private.combined_document(), ShaMethod::Sha256)
        .unwrap()
        .1;
    let providers = read_doc(&dir, "p/providers-latest.json")["providers"].clone();
    assert_eq!(providers["p/private-packages.json"], json!({"sha256": expected}));

    let combined = read_doc(&dir, "p/private-packages.json");
    assert_eq!(combined["packages"]["acme/widget"]["2.0.0"]["uid"], 20);
    assert_eq!(verify_tree(&dir), files_in(&dir));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn repeated_rebuilds_keep_private_uids() {
    let temp = TempDir::new().unwrap();
    let dir = tree_dir(temp.path());
    write_active_tree(&dir);
    let (mut config, private_file) = private_config(temp.path());
    config.build.parse_packages = true;
    config.build.download_url_prefix = "https://mirror.example/dl/".to_string();
    config.build.uid_start = 1000;
    let names = ["acme/alpha", "acme/beta", "acme/gamma", "acme/delta"];
    let mut packages = serde_json::Map::new();
    for name in names {
        packages.insert(
            name.to_string(),
            json!({
                "1.0.0": {"name": name, "version": "1.0.0"},
                "1.1.0": {"name": name, "version": "1.1.0"}
            }),
        );
    }
    std::fs::write(
        &private_file,
        serde_json::to_vec(&json!({"packages": packages})).unwrap(),
    )
    .unwrap();

    let first = RepositoryBuilder::new(config.clone()).rebuild(&dir).await.unwrap();
    let first_files = files_in(&dir);
    assert_eq!(verify_tree(&dir), first_files);

    let providers = active_providers(&dir);
    let mut uids = Vec::new();
    for name in names {
        let hash = providers[name]["sha256"].as_str().unwrap();
        let document = read_doc(&dir, &format!("p/{}${}.json", name, hash));
        for version in ["1.0.0", "1.1.0"] {
            uids.push(document["packages"][name][version]["uid"].as_u64().unwrap());
        }
    }
    uids.sort_unstable();
    assert_eq!(uids, (1000..1008).collect::<Vec<u64>>());

    for _ in 0..2 {
        let again = RepositoryBuilder::new(config.clone()).rebuild(&dir).await.unwrap();
        assert_eq!(again.root_digest, first.root_digest);
        assert_eq!(files_in(&dir), first_files);
    }

    let attached = RepositoryBuilder::new(config).attach_private(&dir).await.unwrap();
    assert_eq!(attached.root_digest, first.root_digest);
    assert_eq!(files_in(&dir), first_files);
}
