//! End-to-end seed scenarios against an in-process `Grid` with
//! filesystem-simulated backends (spec section 8).

use std::collections::HashMap;
use std::time::Duration;

use digs::catalogue::make_pfn;
use digs::control::{self, Command};
use digs::grid::Grid;
use digs::identity::{AdminList, Identity};
use digs::inbox::{self, PutDeclaration};
use digs::node::{Disk, Node, NodeType, Timeouts};
use digs::registry::NodeRegistry;
use digs::transfer::TransferManager;

fn node(dir: &std::path::Path, name: &str, site: &str) -> Node {
    let root = dir.join(name);
    Node {
        name: name.to_string(),
        site: site.to_string(),
        path: root.join("store").to_string_lossy().to_string(),
        inbox: root.join("inbox").to_string_lossy().to_string(),
        node_type: NodeType::Globus,
        disks: vec![Disk { index: 1, quota_kb: 1_000_000 }],
        free_space_kb: 1_000_000,
        timeouts: Timeouts::default(),
        extra_rsl: None,
        extra_jss_contact: None,
        gpfs: false,
        properties: HashMap::new(),
    }
}

fn test_grid(dir: &std::path::Path, nodes: Vec<Node>, min_copies: i64) -> Grid {
    let mut registry = NodeRegistry::new(dir);
    for n in nodes {
        std::fs::create_dir_all(&n.path).unwrap();
        std::fs::create_dir_all(&n.inbox).unwrap();
        registry.add(n);
    }
    registry.persist().unwrap();
    registry.persist_status_lists().unwrap();
    let registry = NodeRegistry::load(dir).unwrap();
    Grid {
        registry,
        catalogue: digs::catalogue::ReplicaCatalogue::new(),
        weights: Default::default(),
        transfers: TransferManager::new(),
        admins: AdminList::new([Identity::new("admin")]),
        pending: HashMap::new(),
        min_copies,
        cycle_interval: Duration::from_secs(60),
        inbox_ttl: Duration::from_secs(3600),
        tmp_dir: dir.to_path_buf(),
    }
}

async fn stage_and_integrate(grid: &mut Grid, host: &str, lfn: &str, contents: &[u8]) {
    let backend = grid.backend_for(host).unwrap();
    tokio::fs::create_dir_all(&grid.registry.get(grid.registry.index_of(host).unwrap()).unwrap().inbox)
        .await
        .unwrap();
    let staged = digs::lfn::encode(lfn).unwrap();
    let inbox = grid.registry.get(grid.registry.index_of(host).unwrap()).unwrap().inbox.clone();
    tokio::fs::write(std::path::Path::new(&inbox).join(&staged), contents)
        .await
        .unwrap();
    let declaration = PutDeclaration {
        lfn: lfn.to_string(),
        size: contents.len() as u64,
        md5sum: String::new(),
        submitter: "alice".to_string(),
        group: "ukqcd".to_string(),
        permissions: "644".to_string(),
    };
    let outcome = inbox::integrate(backend.as_ref(), host, &mut grid.catalogue, &declaration)
        .await
        .unwrap();
    assert_eq!(outcome, inbox::IntegrateOutcome::Committed);
}

#[tokio::test]
async fn scenario_1_happy_put_reaches_full_replication_after_one_tick() {
    let dir = tempfile::tempdir().unwrap();
    let mut grid = test_grid(dir.path(), vec![node(dir.path(), "n1", "siteA"), node(dir.path(), "n2", "siteB")], 2);

    stage_and_integrate(&mut grid, "n1", "fruit/apple", &b"x".repeat(100)).await;
    assert_eq!(grid.catalogue.get_locations("fruit/apple").len(), 1);

    control::run_cycle(&mut grid).await;

    let locations = grid.catalogue.get_locations("fruit/apple");
    assert_eq!(locations.len(), 2);
    for pfn in &locations {
        let (host, path) = pfn.split_once(':').unwrap();
        let backend = grid.backend_for(host).unwrap();
        assert!(backend.does_exist(host, path).await.unwrap());
        assert_eq!(backend.get_length(host, path).await.unwrap(), 100);
    }
}

#[tokio::test]
async fn scenario_2_mirror_is_placed_on_a_diverse_site() {
    let dir = tempfile::tempdir().unwrap();
    let mut grid = test_grid(
        dir.path(),
        vec![
            node(dir.path(), "n1", "siteA"),
            node(dir.path(), "n2", "siteA"),
            node(dir.path(), "n3", "siteB"),
        ],
        2,
    );

    stage_and_integrate(&mut grid, "n1", "fruit/pear", b"pear").await;
    control::run_cycle(&mut grid).await;

    let locations = grid.catalogue.get_locations("fruit/pear");
    assert_eq!(locations.len(), 2);
    assert!(locations.contains(&make_pfn("n1", "fruit/pear")));
    assert!(locations.contains(&make_pfn("n3", "fruit/pear")));
    assert!(!locations.contains(&make_pfn("n2", "fruit/pear")));
}

#[tokio::test]
async fn scenario_3_lock_contention_then_admin_unlock() {
    let dir = tempfile::tempdir().unwrap();
    let mut grid = test_grid(dir.path(), vec![node(dir.path(), "n1", "siteA"), node(dir.path(), "n2", "siteB")], 2);
    stage_and_integrate(&mut grid, "n1", "data/x", b"x").await;

    let alice = Identity::new("alice");
    let bob = Identity::new("bob");
    let admin = Identity::new("admin");

    assert!(control::dispatch(&mut grid, &alice, Command::Lock("data/x".to_string())).await.accepted);
    assert!(!control::dispatch(&mut grid, &bob, Command::Lock("data/x".to_string())).await.accepted);
    assert!(control::dispatch(&mut grid, &admin, Command::Unlock("data/x".to_string())).await.accepted);
    assert!(control::dispatch(&mut grid, &bob, Command::Lock("data/x".to_string())).await.accepted);
}

#[tokio::test]
async fn scenario_4_retiring_node_replica_migrates_once_replcount_is_satisfied() {
    let dir = tempfile::tempdir().unwrap();
    let mut grid = test_grid(
        dir.path(),
        vec![
            node(dir.path(), "n1", "siteB"),
            node(dir.path(), "n2", "siteB"),
            node(dir.path(), "n3", "siteC"),
        ],
        2,
    );
    stage_and_integrate(&mut grid, "n1", "f", b"data").await;

    let n1_idx = grid.registry.index_of("n1").unwrap();
    grid.registry.status.add_to_retiring(n1_idx);

    control::run_cycle(&mut grid).await;
    let after_first = grid.catalogue.get_locations("f");
    assert!(after_first.iter().any(|p| p.starts_with("n3:") || p.starts_with("n2:")));

    control::run_cycle(&mut grid).await;
    let after_second = grid.catalogue.get_locations("f");
    assert!(
        !after_second.contains(&make_pfn("n1", "f")),
        "retiring node's replica should be migrated off once enough live replicas exist"
    );
    assert!(after_second.len() >= 2);
}

#[tokio::test]
async fn scenario_5_orphaned_inbox_upload_is_cleaned_up_after_ttl() {
    let dir = tempfile::tempdir().unwrap();
    let mut grid = test_grid(dir.path(), vec![node(dir.path(), "n1", "siteA"), node(dir.path(), "n2", "siteB")], 2);
    grid.inbox_ttl = Duration::from_secs(0);

    let n1 = grid.registry.get(grid.registry.index_of("n1").unwrap()).unwrap().clone();
    tokio::fs::create_dir_all(&n1.inbox).await.unwrap();
    let staged = digs::lfn::encode("veg/carrot").unwrap();
    let staged_path = std::path::Path::new(&n1.inbox).join(&staged);
    tokio::fs::write(&staged_path, b"orange").await.unwrap();

    // Client crashed before sending "integrate": nothing declared.
    control::run_cycle(&mut grid).await;

    assert!(!grid.catalogue.is_known("veg/carrot"));
    assert!(tokio::fs::metadata(&staged_path).await.is_err());
}

#[tokio::test]
async fn scenario_6_recursive_replcount_sets_every_file_under_a_directory() {
    let dir = tempfile::tempdir().unwrap();
    let mut grid = test_grid(
        dir.path(),
        vec![
            node(dir.path(), "n1", "siteA"),
            node(dir.path(), "n2", "siteB"),
            node(dir.path(), "n3", "siteC"),
        ],
        2,
    );
    for (lfn, contents) in [
        ("veg/kale", b"k".as_slice()),
        ("veg/root/carrot", b"c".as_slice()),
        ("veg/root/potato", b"p".as_slice()),
    ] {
        stage_and_integrate(&mut grid, "n1", lfn, contents).await;
    }

    let admin = Identity::new("admin");
    let outcome = control::dispatch(&mut grid, &admin, Command::ReplCountDir("veg".to_string(), 3)).await;
    assert!(outcome.accepted);
    assert_eq!(outcome.message, "directory veg replication count is 3");

    for lfn in ["veg/kale", "veg/root/carrot", "veg/root/potato"] {
        assert_eq!(grid.catalogue.get_attribute(lfn, "replcount"), "3");
    }
}
