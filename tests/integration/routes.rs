#![cfg(unix)]
use crate::common::*;
use tempfile::TempDir;

#[tokio::test]
async fn stopping_a_project_restores_the_routing_file() {
    let dir = TempDir::new().unwrap();
    let config = parse_config("");

    let mut shop = native_project("shop", dir.path(), "sleep 30");
    shop.domain = "shop.test".into();
    shop.port = Some(free_port());
    let mut blog = native_project("blog", dir.path(), "sleep 30");
    blog.domain = "blog.test".into();
    blog.port = Some(free_port());
    let orch = orchestrator(&config, dir.path(), vec![shop, blog]);

    orch.start("shop").await.unwrap();
    let before = std::fs::read(orch.proxy().routes_path()).unwrap();

    orch.start("blog").await.unwrap();
    let with_blog = std::fs::read_to_string(orch.proxy().routes_path()).unwrap();
    assert!(with_blog.contains("Host(`blog.test`)"));

    orch.stop("blog").await.unwrap();
    assert_eq!(std::fs::read(orch.proxy().routes_path()).unwrap(), before);

    orch.shutdown().await;
    let empty = std::fs::read_to_string(orch.proxy().routes_path()).unwrap();
    assert!(!empty.contains("shop.test"));
}

#[tokio::test]
async fn project_without_domain_gets_no_route() {
    let dir = TempDir::new().unwrap();
    let config = parse_config("");
    let orch = orchestrator(
        &config,
        dir.path(),
        vec![native_project("worker", dir.path(), "sleep 30")],
    );

    orch.start("worker").await.unwrap();
    assert!(orch.proxy().routes().is_empty());
    orch.shutdown().await;
}
