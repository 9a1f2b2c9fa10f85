mod common;

use common::{registry, setup_mods_root, write_metadata, write_mod, FakeCatalog};
use modloom::{ModRef, ModRegistry, ModWarning, RegistryOptions, ResolveError};
use pretty_assertions::assert_eq;

#[test]
fn same_catalog_id_yields_one_node() {
    let (_tmp, root) = setup_mods_root();
    write_mod(&root, "alpha", "100", "Alpha");
    write_mod(&root, "beta", "200", "Beta");
    let catalog = FakeCatalog::new()
        .listing("100", &[200])
        .listing("200", &[]);
    let mut registry = registry(catalog, &root);

    let first = registry.build(&ModRef::Id(100)).unwrap();
    let second = registry.build(&ModRef::Id(100)).unwrap();

    assert_eq!(first, second);
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.source().calls(), vec!["100", "200"]);
}

#[test]
fn path_and_catalog_id_alias_the_same_mod() {
    let (_tmp, root) = setup_mods_root();
    let beta = write_mod(&root, "beta", "200", "Beta");
    let mut registry = registry(FakeCatalog::new().listing("200", &[]), &root);

    let by_path = registry.build(&ModRef::Path(beta.clone())).unwrap();
    let by_id = registry.build(&ModRef::Id(200)).unwrap();
    let by_odd_path = registry
        .build(&ModRef::Path(beta.join("..").join("beta")))
        .unwrap();

    assert_eq!(by_path, by_id);
    assert_eq!(by_path, by_odd_path);
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.source().calls(), vec!["200"]);
}

#[test]
fn dependency_edges_are_recorded_on_both_ends() {
    let (_tmp, root) = setup_mods_root();
    write_mod(&root, "alpha", "100", "Alpha");
    write_mod(&root, "beta", "200", "Beta");
    write_mod(&root, "gamma", "300", "Gamma");
    let catalog = FakeCatalog::new()
        .listing("100", &[200, 300])
        .listing("200", &[300])
        .listing("300", &[]);
    let mut registry = registry(catalog, &root);

    let alpha = registry.build(&ModRef::Id(100)).unwrap();
    let graph = registry.graph();
    let beta = graph.find_by_catalog_id("200").unwrap().id();
    let gamma = graph.find_by_catalog_id("300").unwrap().id();

    assert_eq!(graph.get(alpha).unwrap().dependencies(), &[beta, gamma]);
    assert_eq!(graph.get(beta).unwrap().dependencies(), &[gamma]);
    assert_eq!(graph.get(gamma).unwrap().dependents(), &[beta, alpha]);
    assert_eq!(graph.get(beta).unwrap().dependents(), &[alpha]);
    for node in graph.iter() {
        for dependency in node.dependencies() {
            assert!(graph.get(*dependency).unwrap().dependents().contains(&node.id()));
        }
    }
}

#[test]
fn mutual_dependency_builds_and_warns() {
    let (_tmp, root) = setup_mods_root();
    write_mod(&root, "alpha", "100", "Alpha");
    write_mod(&root, "beta", "200", "Beta");
    let catalog = FakeCatalog::new()
        .listing("100", &[200])
        .listing("200", &[100]);
    let mut registry = registry(catalog, &root);

    let alpha = registry.build(&ModRef::Id(100)).unwrap();
    let beta = registry.lookup(&ModRef::Id(200)).unwrap();
    assert!(registry.get(alpha).unwrap().has_circular_warning());
    assert_eq!(registry.get(beta).unwrap().dependencies(), &[alpha]);

    let order = registry.assign_positions();
    assert_eq!(order.cycles, vec![vec![alpha, beta]]);

    let expected = vec![ModWarning::CircularDependency {
        members: vec!["100".into(), "200".into()],
    }];
    assert_eq!(registry.get(alpha).unwrap().warnings(), expected.as_slice());
    assert_eq!(registry.get(beta).unwrap().warnings(), expected.as_slice());
    assert_eq!(registry.get(alpha).unwrap().position(), Some(0));
    assert_eq!(registry.get(beta).unwrap().position(), Some(1));
}

#[test]
fn missing_mod_is_not_cached() {
    let (_tmp, root) = setup_mods_root();
    let mut registry = registry(FakeCatalog::new().listing("999", &[]), &root);

    let err = registry.build(&ModRef::Id(999)).unwrap_err();
    assert!(matches!(err, ResolveError::NotInstalled { .. }));
    assert!(registry.is_empty());

    write_mod(&root, "late", "999", "Late");
    let id = registry.build(&ModRef::Id(999)).unwrap();
    assert_eq!(registry.get(id).unwrap().name(), Some("Late"));
}

#[test]
fn batch_build_skips_failures() {
    let (_tmp, root) = setup_mods_root();
    let alpha = write_mod(&root, "alpha", "100", "Alpha");
    let gamma = write_mod(&root, "gamma", "300", "Gamma");
    let catalog = FakeCatalog::new()
        .listing("100", &[])
        .listing("300", &[]);
    let mut registry = registry(catalog, &root);

    let built = registry.build_all(&[
        ModRef::Path(alpha),
        ModRef::Path(root.join("nope")),
        ModRef::Path(gamma),
    ]);

    assert_eq!(built.len(), 2);
    assert_eq!(registry.get(built[0]).unwrap().catalog_id(), Some("100"));
    assert_eq!(registry.get(built[1]).unwrap().catalog_id(), Some("300"));
}

#[test]
fn uninstalled_dependency_is_left_out_and_noted() {
    let (_tmp, root) = setup_mods_root();
    write_mod(&root, "alpha", "100", "Alpha");
    let mut registry = registry(FakeCatalog::new().listing("100", &[555]), &root);

    let alpha = registry.build(&ModRef::Id(100)).unwrap();
    let node = registry.get(alpha).unwrap();

    assert!(node.dependencies().is_empty());
    assert_eq!(node.unresolved_dependencies(), &["555".to_string()]);
    assert!(node.warnings().iter().any(|warning| matches!(
        warning,
        ModWarning::DependencyUnresolved { catalog_id, .. } if catalog_id == "555"
    )));
    assert_eq!(registry.len(), 1);
}

#[test]
fn catalog_failure_keeps_local_data() {
    let (_tmp, root) = setup_mods_root();
    let alpha = write_mod(&root, "alpha", "100", "Alpha");
    let mut registry = registry(FakeCatalog::new().failing("100"), &root);

    let id = registry.build(&ModRef::Path(alpha)).unwrap();
    let node = registry.get(id).unwrap();

    assert!(!node.catalog_ok());
    assert!(node.metadata_ok());
    assert_eq!(node.name(), Some("Alpha"));
    assert_eq!(node.file_size(), None);
    assert!(node
        .warnings()
        .iter()
        .any(|warning| matches!(warning, ModWarning::CatalogUnavailable { .. })));
}

#[test]
fn metadata_without_id_skips_the_catalog() {
    let (_tmp, root) = setup_mods_root();
    let dir = write_metadata(
        &root,
        "anonymous",
        "<metadata><name>Anon</name><description>x</description>\
         <version>2</version><visibility>Private</visibility></metadata>",
    );
    let mut registry = registry(FakeCatalog::new(), &root);

    let id = registry.build(&ModRef::Path(dir)).unwrap();
    let node = registry.get(id).unwrap();

    assert!(!node.metadata_ok());
    assert!(node.catalog_ok());
    assert_eq!(node.catalog_id(), None);
    assert_eq!(
        node.warnings(),
        &[ModWarning::MissingField { field: "id".into() }]
    );
    assert!(registry.source().calls().is_empty());
}

#[test]
fn malformed_metadata_is_an_error() {
    let (_tmp, root) = setup_mods_root();
    let dir = write_metadata(&root, "broken", "<metadata><name>Broken</metadata>");
    let mut registry = registry(FakeCatalog::new(), &root);

    let err = registry.build(&ModRef::Path(dir)).unwrap_err();
    assert!(matches!(err, ResolveError::MalformedMetadata { .. }));
    assert!(registry.is_empty());
}

#[test]
fn load_order_puts_dependencies_first() {
    let (_tmp, root) = setup_mods_root();
    write_mod(&root, "alpha", "100", "Alpha");
    write_mod(&root, "beta", "200", "Beta");
    write_mod(&root, "gamma", "300", "Gamma");
    let catalog = FakeCatalog::new()
        .listing("100", &[200])
        .listing("200", &[300])
        .listing("300", &[]);
    let mut registry = registry(catalog, &root);

    registry.build_all(&[ModRef::Id(100)]);
    let order = registry.assign_positions();
    let labels: Vec<String> = order
        .order
        .iter()
        .map(|id| registry.graph().label(*id))
        .collect();

    assert_eq!(labels, vec!["300", "200", "100"]);
    assert!(order.cycles.is_empty());
    for node in registry.graph().iter() {
        for dependency in node.dependencies() {
            assert!(registry.get(*dependency).unwrap().position() < node.position());
        }
    }
}

#[test]
fn concurrent_prefetch_fetches_each_page_once() {
    let (_tmp, root) = setup_mods_root();
    write_mod(&root, "alpha", "100", "Alpha");
    write_mod(&root, "beta", "200", "Beta");
    write_mod(&root, "gamma", "300", "Gamma");
    write_mod(&root, "delta", "400", "Delta");
    let catalog = FakeCatalog::new()
        .listing("100", &[200, 300])
        .listing("200", &[300, 777])
        .listing("300", &[])
        .listing("400", &[100]);
    let mut registry = ModRegistry::new(
        catalog,
        RegistryOptions {
            mods_root: Some(root.clone()),
            fetch_remote: true,
            max_concurrency: 3,
        },
    );

    let built = registry.build_installed();
    assert_eq!(built.len(), 4);

    let mut calls = registry.source().calls();
    calls.sort();
    assert_eq!(calls, vec!["100", "200", "300", "400"]);

    let beta = registry.lookup(&ModRef::Id(200)).unwrap();
    assert_eq!(
        registry.get(beta).unwrap().unresolved_dependencies(),
        &["777".to_string()]
    );
}

#[test]
fn offline_registry_never_calls_the_catalog() {
    let (_tmp, root) = setup_mods_root();
    let alpha = write_mod(&root, "alpha", "100", "Alpha");
    let mut registry = ModRegistry::new(
        FakeCatalog::new().listing("100", &[200]),
        RegistryOptions {
            mods_root: Some(root.clone()),
            fetch_remote: false,
            max_concurrency: 4,
        },
    );

    let id = registry.build_all(&[ModRef::Path(alpha)])[0];

    assert!(registry.source().calls().is_empty());
    assert!(registry.get(id).unwrap().catalog_ok());
    assert!(registry.get(id).unwrap().dependencies().is_empty());
}

#[test]
fn dependencies_resolve_next_to_a_path_built_mod_without_mods_root() {
    let (_tmp, root) = setup_mods_root();
    let alpha = write_mod(&root, "alpha", "100", "Alpha");
    write_mod(&root, "beta", "200", "Beta");
    let mut registry = ModRegistry::new(
        FakeCatalog::new()
            .listing("100", &[200])
            .listing("200", &[]),
        RegistryOptions {
            mods_root: None,
            fetch_remote: true,
            max_concurrency: 1,
        },
    );

    let alpha = registry.build(&ModRef::Path(alpha)).unwrap();
    let node = registry.get(alpha).unwrap();

    assert_eq!(node.dependencies().len(), 1);
    assert!(node.unresolved_dependencies().is_empty());
    assert!(node.warnings().is_empty());
    let beta = registry.lookup(&ModRef::Id(200)).unwrap();
    assert_eq!(registry.get(beta).unwrap().name(), Some("Beta"));
    assert_eq!(registry.get(beta).unwrap().dependents(), &[alpha]);

    assert!(matches!(
        registry.build(&ModRef::Id(300)),
        Err(ResolveError::InvalidIdentity { .. })
    ));
}
