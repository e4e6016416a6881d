use anyhow::Result;
use serde_json::json;

use crate::model::{
    AttributeRecord, Branch, BranchRegistry, NodeRecord, NodeSchema, PropertyKind,
    RelationshipCardinality, RelationshipNode, RelationshipSchema, StaticSchemaView, Timestamp,
    DEFAULT_BRANCH_NAME,
};
use crate::store::memory::MemoryGraphStore;

pub const CAR_PERSON_RELATIONSHIP: &str = "testcar__testperson";

/// Handles to everything the seed created, so tests can mutate and assert
/// against known ids.
#[derive(Debug, Clone)]
pub struct CarDataset {
    pub main: Branch,
    pub car: NodeRecord,
    pub car_name: AttributeRecord,
    pub car_nbr_seats: AttributeRecord,
    pub john: NodeRecord,
    pub john_name: AttributeRecord,
    pub jane: NodeRecord,
    pub jane_name: AttributeRecord,
    pub previous_owner: RelationshipNode,
    pub seeded_at: Timestamp,
}

/// Schema matching the seed dataset: a Car with a cardinality-one
/// `previous_owner` relationship to a Person, both labeled by their `name`
/// attribute.
pub fn car_schema() -> StaticSchemaView {
    let mut view = StaticSchemaView::new();
    view.register(NodeSchema {
        kind: "TestCar".into(),
        display_labels: vec!["name".into()],
        relationships: vec![RelationshipSchema {
            name: "previous_owner".into(),
            identifier: CAR_PERSON_RELATIONSHIP.into(),
            peer: "TestPerson".into(),
            cardinality: RelationshipCardinality::One,
        }],
    });
    view.register(NodeSchema {
        kind: "TestPerson".into(),
        display_labels: vec!["name".into()],
        relationships: vec![RelationshipSchema {
            name: "cars".into(),
            identifier: CAR_PERSON_RELATIONSHIP.into(),
            peer: "TestCar".into(),
            cardinality: RelationshipCardinality::Many,
        }],
    });
    view
}

/// Seed the default branch with one car ("accord", 5 seats) previously
/// owned by John, plus a second person to point the relationship at.
/// Everything is stamped `at`, so tests can diff a window that excludes or
/// includes the seeding.
pub fn seed_car_dataset(
    store: &MemoryGraphStore,
    registry: &BranchRegistry,
    at: Timestamp,
) -> Result<CarDataset> {
    let mut main = Branch::new_default(DEFAULT_BRANCH_NAME);
    main.branched_from = at;
    registry.upsert(main.clone());

    let car = store.add_node_with_id(&main, at, "c1", "TestCar", "Test");
    let car_name = store.add_attribute(&main, at, &car.id, "name", json!("accord"));
    store.set_attribute_property(&main, at, &car_name.id, PropertyKind::IsProtected, json!(false));
    let car_nbr_seats = store.add_attribute(&main, at, &car.id, "nbr_seats", json!(5));
    store.set_attribute_property(
        &main,
        at,
        &car_nbr_seats.id,
        PropertyKind::IsVisible,
        json!(true),
    );

    let john = store.add_node_with_id(&main, at, "p1", "TestPerson", "Test");
    let john_name = store.add_attribute(&main, at, &john.id, "name", json!("John Doe"));
    let jane = store.add_node_with_id(&main, at, "p2", "TestPerson", "Test");
    let jane_name = store.add_attribute(&main, at, &jane.id, "name", json!("Jane Doe"));

    let previous_owner =
        store.add_relationship(&main, at, CAR_PERSON_RELATIONSHIP, &car.id, &john.id);

    Ok(CarDataset {
        main,
        car,
        car_name,
        car_nbr_seats,
        john,
        john_name,
        jane,
        jane_name,
        previous_owner,
        seeded_at: at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EdgeKind;
    use crate::store::traits::GraphStore;

    #[tokio::test]
    async fn test_seed_builds_expected_edge_counts() {
        let store = MemoryGraphStore::new();
        let registry = BranchRegistry::new();
        let dataset = seed_car_dataset(&store, &registry, Timestamp::now()).unwrap();

        assert_eq!(dataset.car.id, "c1");
        assert_eq!(registry.default_branch().unwrap().name, "main");
        // 4 nodes, 4 attribute ownerships, 2 IS_RELATED.
        assert_eq!(
            store.count_edges(Some(EdgeKind::IsPartOf)).await.unwrap(),
            4
        );
        assert_eq!(
            store
                .count_edges(Some(EdgeKind::HasAttribute))
                .await
                .unwrap(),
            4
        );
        assert_eq!(
            store.count_edges(Some(EdgeKind::IsRelated)).await.unwrap(),
            2
        );
    }
}
