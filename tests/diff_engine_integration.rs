use serde_json::json;

use graphvc::config::AppConfig;
use graphvc::logic::query::TimeWindow;
use graphvc::seed::{car_schema, seed_car_dataset, CarDataset};
use graphvc::store::memory::MemoryGraphStore;
use graphvc::{
    Branch, BranchDiffer, BranchOperations, BranchRegistry, DiffAction, DiffError,
    DiffQueryFilters, Edge, EdgeKind, EdgeStatus, GraphStore, MergeEngine, MergeError, PathType,
    PropertyKind, StaticSchemaView, Timestamp,
};

struct Harness {
    store: MemoryGraphStore,
    registry: BranchRegistry,
    schema: StaticSchemaView,
    config: AppConfig,
    dataset: CarDataset,
    now: Timestamp,
}

impl Harness {
    /// Seeds the car dataset 100s in the past so tests can place changes
    /// anywhere on the timeline.
    fn new() -> Self {
        graphvc::init();
        let store = MemoryGraphStore::new();
        let registry = BranchRegistry::new();
        let now = Timestamp::now();
        let dataset = seed_car_dataset(&store, &registry, now.sub_seconds(100)).unwrap();
        Self {
            store,
            registry,
            schema: car_schema(),
            config: AppConfig::load().unwrap(),
            dataset,
            now,
        }
    }

    fn t(&self, seconds_ago: i64) -> Timestamp {
        self.now.sub_seconds(seconds_ago)
    }

    fn branch(&self, name: &str, seconds_ago: i64) -> Branch {
        BranchOperations::create_branch(&self.registry, name, None, self.t(seconds_ago)).unwrap()
    }

    fn differ(&self, branch: &Branch) -> BranchDiffer<'_, MemoryGraphStore> {
        BranchDiffer::new(
            &self.store,
            &self.schema,
            branch.clone(),
            None,
            Some(self.now),
            DiffQueryFilters::default(),
        )
        .unwrap()
        .with_page_size(self.config.query.page_size)
    }
}

#[tokio::test]
async fn test_origin_update_visible_from_branch_without_conflict() {
    let h = Harness::new();
    let branch1 = h.branch("branch1", 40);
    h.store
        .update_attribute_value(&h.dataset.main, h.t(20), &h.dataset.car_name.id, json!("volt"));

    let mut differ = h.differ(&branch1);
    let nodes = differ.get_nodes().await.unwrap();

    let c1 = &nodes["main"]["c1"];
    assert_eq!(c1.action, DiffAction::Updated);
    let name = &c1.attributes["name"];
    assert_eq!(name.action, DiffAction::Updated);
    let value = &name.properties[&PropertyKind::HasValue];
    assert_eq!(value.action, DiffAction::Updated);
    assert_eq!(value.value.previous, Some(json!("accord")));
    assert_eq!(value.value.new, Some(json!("volt")));

    assert!(
        differ.get_conflicts().await.unwrap().is_empty(),
        "branch1 touched nothing, there is nothing to conflict with"
    );
}

#[tokio::test]
async fn test_competing_attribute_values_yield_one_conflict() {
    let h = Harness::new();
    let branch1 = h.branch("branch1", 50);
    h.store
        .update_attribute_value(&h.dataset.main, h.t(30), &h.dataset.car_nbr_seats.id, json!(4));
    h.store
        .update_attribute_value(&branch1, h.t(20), &h.dataset.car_nbr_seats.id, json!(3));

    let mut differ = h.differ(&branch1);
    let conflicts = differ.get_conflicts().await.unwrap();

    assert_eq!(conflicts.len(), 1);
    let conflict = &conflicts[0];
    assert_eq!(conflict.conflict_path, "data/c1/nbr_seats/value");
    assert_eq!(conflict.conflict_type, "data");
    assert_eq!(conflict.path_type, PathType::Attribute);
    assert_eq!(conflict.node_id, "c1");
    assert_eq!(conflict.changes.len(), 2);

    let main_side = conflict.changes.iter().find(|c| c.branch == "main").unwrap();
    assert_eq!(main_side.previous, Some(json!(5)));
    assert_eq!(main_side.new, Some(json!(4)));
    let branch_side = conflict
        .changes
        .iter()
        .find(|c| c.branch == "branch1")
        .unwrap();
    assert_eq!(branch_side.previous, Some(json!(5)));
    assert_eq!(branch_side.new, Some(json!(3)));

    // Order-independence: a fresh computation reports the same conflict
    // with both sides present.
    let mut differ = h.differ(&branch1);
    let again = differ.get_conflicts().await.unwrap();
    assert_eq!(again, conflicts);
}

#[tokio::test]
async fn test_cardinality_one_peer_change_conflicts_with_removal() {
    let h = Harness::new();
    let branch2 = h.branch("branch2", 50);

    // branch2 repoints previous_owner from John (p1) to Jane (p2).
    h.store
        .remove_relationship(&branch2, h.t(30), &h.dataset.previous_owner.id);
    h.store.add_relationship(
        &branch2,
        h.t(30),
        graphvc::seed::CAR_PERSON_RELATIONSHIP,
        &h.dataset.car.id,
        &h.dataset.jane.id,
    );
    // main drops the relationship entirely.
    h.store
        .remove_relationship(&h.dataset.main, h.t(20), &h.dataset.previous_owner.id);

    let mut differ = h.differ(&branch2);
    let conflicts = differ.get_conflicts().await.unwrap();

    assert_eq!(conflicts.len(), 1);
    let conflict = &conflicts[0];
    assert_eq!(conflict.conflict_path, "data/c1/previous_owner/peer");
    assert_eq!(conflict.path_type, PathType::RelationshipOne);
    assert_eq!(conflict.changes.len(), 2);

    let branch_side = conflict
        .changes
        .iter()
        .find(|c| c.branch == "branch2")
        .unwrap();
    assert_eq!(branch_side.action, DiffAction::Updated);
    assert_eq!(branch_side.previous.as_ref().unwrap()["id"], json!("p1"));
    assert_eq!(branch_side.new.as_ref().unwrap()["id"], json!("p2"));

    let main_side = conflict.changes.iter().find(|c| c.branch == "main").unwrap();
    assert_eq!(main_side.action, DiffAction::Removed);
    assert_eq!(main_side.previous.as_ref().unwrap()["id"], json!("p1"));
    assert_eq!(main_side.new, None);
}

#[tokio::test]
async fn test_cardinality_one_fold_produces_single_updated_path() {
    let h = Harness::new();
    let branch1 = h.branch("branch1", 50);
    h.store
        .remove_relationship(&branch1, h.t(20), &h.dataset.previous_owner.id);
    h.store.add_relationship(
        &branch1,
        h.t(20),
        graphvc::seed::CAR_PERSON_RELATIONSHIP,
        &h.dataset.car.id,
        &h.dataset.jane.id,
    );

    let mut differ = h.differ(&branch1);
    let modified = differ.get_modified_paths().await.unwrap();

    let car_paths: Vec<_> = modified["branch1"]
        .iter()
        .filter(|p| p.node_id == "c1")
        .collect();
    assert_eq!(
        car_paths.len(),
        1,
        "REMOVE(p1) + ADD(p2) folds into one path, got {car_paths:?}"
    );
    let path = car_paths[0];
    assert_eq!(path.path_type, PathType::RelationshipOne);
    assert_eq!(path.action, DiffAction::Updated);
    assert_eq!(path.path(), "data/c1/previous_owner/p2");
    let change = path.change.as_ref().unwrap();
    assert_eq!(change.previous.as_ref().unwrap()["id"], json!("p1"));
    assert_eq!(
        change.previous.as_ref().unwrap()["display_label"],
        json!("John Doe")
    );
    assert_eq!(change.new.as_ref().unwrap()["id"], json!("p2"));
    assert_eq!(
        change.new.as_ref().unwrap()["display_label"],
        json!("Jane Doe")
    );
}

#[tokio::test]
async fn test_merge_of_removed_node_is_idempotent() {
    let h = Harness::new();
    let branch1 = h.branch("branch1", 50);
    h.store.remove_node(&branch1, h.t(20), &h.dataset.car.id);

    let at = h.t(5);
    let report = MergeEngine::merge_branch(&h.store, &h.registry, &h.schema, "branch1", at)
        .await
        .unwrap();
    // Closes the branch tombstone and main's live membership, creates
    // main's tombstone.
    assert_eq!(report.edges_closed, 2);
    assert_eq!(report.edges_created, 1);

    let deleted = h
        .store
        .open_edges(
            &h.dataset.car.id,
            EdgeKind::IsPartOf,
            "main",
            Some(EdgeStatus::Deleted),
            None,
        )
        .await
        .unwrap();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].from, at);
    let active = h
        .store
        .open_edges(
            &h.dataset.car.id,
            EdgeKind::IsPartOf,
            "main",
            Some(EdgeStatus::Active),
            None,
        )
        .await
        .unwrap();
    assert!(active.is_empty(), "live membership was retired");

    let edges_before = h.store.count_edges(None).await.unwrap();
    let rerun = MergeEngine::merge_branch(&h.store, &h.registry, &h.schema, "branch1", at)
        .await
        .unwrap();
    assert_eq!(rerun.edges_created, 0);
    assert_eq!(rerun.edges_closed, 0);
    assert_eq!(h.store.count_edges(None).await.unwrap(), edges_before);
}

#[tokio::test]
async fn test_merge_moves_attribute_value_to_origin() {
    let h = Harness::new();
    let branch1 = h.branch("branch1", 50);
    h.store
        .update_attribute_value(&branch1, h.t(20), &h.dataset.car_nbr_seats.id, json!(3));

    let report = MergeEngine::merge_branch(&h.store, &h.registry, &h.schema, "branch1", h.t(5))
        .await
        .unwrap();
    assert_eq!(report.edges_closed, 2);
    assert_eq!(report.edges_created, 1);

    // The default branch now reads the merged value.
    let mut differ = BranchDiffer::new(
        &h.store,
        &h.schema,
        h.registry.default_branch().unwrap(),
        Some(h.t(50)),
        Some(h.now),
        DiffQueryFilters::default(),
    )
    .unwrap();
    let nodes = differ.get_nodes().await.unwrap();
    let value = &nodes["main"]["c1"].attributes["nbr_seats"].properties[&PropertyKind::HasValue];
    assert_eq!(value.value.previous, Some(json!(5)));
    assert_eq!(value.value.new, Some(json!(3)));

    let edges_before = h.store.count_edges(None).await.unwrap();
    let rerun = MergeEngine::merge_branch(&h.store, &h.registry, &h.schema, "branch1", h.t(5))
        .await
        .unwrap();
    assert_eq!(rerun.edges_created, 0);
    assert_eq!(h.store.count_edges(None).await.unwrap(), edges_before);
}

#[tokio::test]
async fn test_merge_moves_relationship_pair_atomically() {
    let h = Harness::new();
    let branch1 = h.branch("branch1", 50);
    h.store
        .remove_relationship(&branch1, h.t(20), &h.dataset.previous_owner.id);
    let replacement = h.store.add_relationship(
        &branch1,
        h.t(20),
        graphvc::seed::CAR_PERSON_RELATIONSHIP,
        &h.dataset.car.id,
        &h.dataset.jane.id,
    );

    MergeEngine::merge_branch(&h.store, &h.registry, &h.schema, "branch1", h.t(5))
        .await
        .unwrap();

    let old_active = h
        .store
        .open_edges(
            &h.dataset.car.id,
            EdgeKind::IsRelated,
            "main",
            Some(EdgeStatus::Active),
            Some(&h.dataset.previous_owner.id),
        )
        .await
        .unwrap();
    assert!(old_active.is_empty(), "old pair retired on main");

    for (subject, object) in [
        (&h.dataset.car.id, &replacement.id),
        (&replacement.id, &h.dataset.jane.id),
    ] {
        let open = h
            .store
            .open_edges(
                subject,
                EdgeKind::IsRelated,
                "main",
                Some(EdgeStatus::Active),
                Some(object),
            )
            .await
            .unwrap();
        assert_eq!(open.len(), 1, "both halves of the new pair exist on main");
    }
}

#[tokio::test]
async fn test_merge_refused_while_conflicts_exist() {
    let h = Harness::new();
    let branch1 = h.branch("branch1", 50);
    h.store
        .update_attribute_value(&h.dataset.main, h.t(30), &h.dataset.car_nbr_seats.id, json!(4));
    h.store
        .update_attribute_value(&branch1, h.t(20), &h.dataset.car_nbr_seats.id, json!(3));

    let messages =
        BranchOperations::validate_branch(&h.store, &h.registry, &h.schema, "branch1", &[])
            .await
            .unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("data/c1/nbr_seats/value"));

    let err = BranchOperations::merge_branch(&h.store, &h.registry, &h.schema, "branch1", &[])
        .await
        .unwrap_err();
    match err.downcast::<MergeError>().unwrap() {
        MergeError::ValidationFailed { branch, messages } => {
            assert_eq!(branch, "branch1");
            assert_eq!(messages.len(), 1);
        }
        other => panic!("expected validation failure, got {other}"),
    }
}

#[tokio::test]
async fn test_clean_merge_advances_branch_point() {
    let h = Harness::new();
    let branch1 = h.branch("branch1", 50);
    let before = branch1.branched_from;
    h.store
        .update_attribute_value(&branch1, h.t(20), &h.dataset.car_nbr_seats.id, json!(3));

    BranchOperations::merge_branch(&h.store, &h.registry, &h.schema, "branch1", &[])
        .await
        .unwrap();

    let rebased = h.registry.get("branch1").unwrap();
    assert!(rebased.branched_from > before);
}

#[tokio::test]
async fn test_sequential_updates_collapse_to_endpoints() {
    let h = Harness::new();
    for (seconds_ago, value) in [(40, 6), (30, 7), (20, 8)] {
        h.store.update_attribute_value(
            &h.dataset.main,
            h.t(seconds_ago),
            &h.dataset.car_nbr_seats.id,
            json!(value),
        );
    }

    let main = h.registry.default_branch().unwrap();
    let mut differ = BranchDiffer::new(
        &h.store,
        &h.schema,
        main,
        Some(h.t(50)),
        Some(h.now),
        DiffQueryFilters::default(),
    )
    .unwrap();
    let nodes = differ.get_nodes().await.unwrap();

    let attributes = &nodes["main"]["c1"].attributes;
    assert_eq!(attributes.len(), 1, "only the touched attribute appears");
    let value = &attributes["nbr_seats"].properties[&PropertyKind::HasValue];
    assert_eq!(value.value.previous, Some(json!(5)));
    assert_eq!(value.value.new, Some(json!(8)), "intermediates do not leak");
}

#[tokio::test]
async fn test_double_deletion_is_not_a_conflict() {
    let h = Harness::new();
    let branch1 = h.branch("branch1", 50);
    h.store.remove_node(&h.dataset.main, h.t(30), &h.dataset.car.id);
    h.store.remove_node(&branch1, h.t(20), &h.dataset.car.id);

    let mut differ = h.differ(&branch1);
    let nodes = differ.get_nodes().await.unwrap();
    assert_eq!(nodes["main"]["c1"].action, DiffAction::Removed);
    assert_eq!(nodes["branch1"]["c1"].action, DiffAction::Removed);

    assert!(differ.get_conflicts().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_double_attribute_removal_is_not_a_conflict() {
    let h = Harness::new();
    let branch1 = h.branch("branch1", 50);
    h.store
        .remove_attribute(&h.dataset.main, h.t(30), &h.dataset.car_name.id);
    h.store
        .remove_attribute(&branch1, h.t(20), &h.dataset.car_name.id);

    let mut differ = h.differ(&branch1);
    let nodes = differ.get_nodes().await.unwrap();
    assert_eq!(
        nodes["main"]["c1"].attributes["name"].action,
        DiffAction::Removed
    );
    assert_eq!(
        nodes["branch1"]["c1"].attributes["name"].action,
        DiffAction::Removed
    );

    assert!(
        differ.get_conflicts().await.unwrap().is_empty(),
        "matching attribute removals cancel out"
    );
}

#[tokio::test]
async fn test_relationship_property_change_synthesizes_updated_element() {
    let h = Harness::new();
    let branch1 = h.branch("branch1", 50);
    h.store.set_relationship_property(
        &branch1,
        h.t(20),
        &h.dataset.previous_owner.id,
        PropertyKind::IsProtected,
        json!(true),
    );

    let mut differ = h.differ(&branch1);
    let relationships = differ.get_relationships().await.unwrap();

    let element = &relationships["branch1"][&h.dataset.previous_owner.id];
    assert_eq!(
        element.action,
        DiffAction::Updated,
        "the relationship itself did not move"
    );
    assert_eq!(element.nodes.len(), 2);
    let property = &element.properties[&PropertyKind::IsProtected];
    assert_eq!(property.action, DiffAction::Added, "no prior flag anywhere");
    assert_eq!(property.value.new, Some(json!(true)));
    assert_eq!(property.value.previous, None);

    // Path type follows each endpoint's cardinality.
    let modified = differ.get_modified_paths().await.unwrap();
    let car_path = modified["branch1"]
        .iter()
        .find(|p| p.node_id == "c1")
        .unwrap();
    assert_eq!(car_path.path_type, PathType::RelationshipOne);
    assert_eq!(car_path.property_name.as_deref(), Some("IS_PROTECTED"));
    let person_path = modified["branch1"]
        .iter()
        .find(|p| p.node_id == "p1")
        .unwrap();
    assert_eq!(person_path.path_type, PathType::RelationshipMany);
}

#[tokio::test]
async fn test_single_row_pages_reassemble_full_diff() {
    let h = Harness::new();
    let branch1 = h.branch("branch1", 50);
    h.store
        .update_attribute_value(&branch1, h.t(30), &h.dataset.car_name.id, json!("volt"));
    h.store
        .update_attribute_value(&branch1, h.t(20), &h.dataset.car_nbr_seats.id, json!(3));
    h.store
        .remove_relationship(&branch1, h.t(25), &h.dataset.previous_owner.id);
    h.store.add_relationship(
        &branch1,
        h.t(25),
        graphvc::seed::CAR_PERSON_RELATIONSHIP,
        &h.dataset.car.id,
        &h.dataset.jane.id,
    );

    let mut full = h.differ(&branch1);
    let mut paged = h.differ(&branch1).with_page_size(1);

    let expected_nodes = full.get_nodes().await.unwrap().clone();
    let paged_nodes = paged.get_nodes().await.unwrap().clone();
    assert_eq!(paged_nodes, expected_nodes);
    assert_eq!(paged_nodes["branch1"]["c1"].attributes.len(), 2);

    let expected_relationships = full.get_relationships().await.unwrap().clone();
    let paged_relationships = paged.get_relationships().await.unwrap().clone();
    assert_eq!(paged_relationships, expected_relationships);
}

#[tokio::test]
async fn test_window_end_boundary_on_closed_edges() {
    let h = Harness::new();
    h.store
        .update_attribute_value(&h.dataset.main, h.t(40), &h.dataset.car_nbr_seats.id, json!(6));
    h.store
        .update_attribute_value(&h.dataset.main, h.t(30), &h.dataset.car_nbr_seats.id, json!(7));

    // Window ends between the two updates: the edge closed after the
    // window end is authoritative, the fully superseded one is not.
    let main = h.registry.default_branch().unwrap();
    let mut differ = BranchDiffer::new(
        &h.store,
        &h.schema,
        main,
        Some(h.t(50)),
        Some(h.t(35)),
        DiffQueryFilters::default(),
    )
    .unwrap();
    let nodes = differ.get_nodes().await.unwrap();
    let value = &nodes["main"]["c1"].attributes["nbr_seats"].properties[&PropertyKind::HasValue];
    assert_eq!(value.value.previous, Some(json!(5)));
    assert_eq!(value.value.new, Some(json!(6)));
}

#[tokio::test]
async fn test_stale_boundary_is_inclusive_on_window_end() {
    let now = Timestamp::now();
    let window = TimeWindow {
        from: now.sub_seconds(60),
        to: now,
    };
    let edge = |to: Option<Timestamp>| Edge {
        id: "e1".into(),
        kind: EdgeKind::HasValue,
        subject: "a1".into(),
        object: "v1".into(),
        branch: "main".into(),
        status: EdgeStatus::Active,
        from: now.sub_seconds(50),
        to,
        branch_level: 1,
    };

    assert!(!window.is_stale(&edge(None)));
    assert!(!window.is_stale(&edge(Some(now))), "to == window end stays");
    assert!(window.is_stale(&edge(Some(now.sub_seconds(1)))));
}

#[tokio::test]
async fn test_default_branch_diff_requires_explicit_from() {
    let h = Harness::new();
    let main = h.registry.default_branch().unwrap();
    let err = BranchDiffer::new(
        &h.store,
        &h.schema,
        main,
        None,
        None,
        DiffQueryFilters::default(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        DiffError::DiffFromRequiredOnDefaultBranch { .. }
    ));

    let err = BranchDiffer::new(
        &h.store,
        &h.schema,
        h.registry.default_branch().unwrap(),
        Some(h.now),
        Some(h.now.sub_seconds(10)),
        DiffQueryFilters::default(),
    )
    .unwrap_err();
    assert!(matches!(err, DiffError::RangeValidation { .. }));
}
