//! Key resolution and hydration tests

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tablemap_core::{AttributeValue, Item};

use bigdecimal::BigDecimal;
use crate::entity::{Constructor, Entity, EntityMapping, Property};
use crate::error::MapperError;
use crate::schema::ItemSchema;
use crate::table::TableSchema;

fn item(pairs: Vec<(&str, AttributeValue)>) -> Item {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn table() -> Arc<TableSchema> {
    Arc::new(
        TableSchema::new("app")
            .with_index("by_status", "gsi1pk", Some("gsi1sk"))
            .unwrap()
            .with_index("by_assignee", "gsi2pk", None)
            .unwrap(),
    )
}

// ============================================================================
// Entities
// ============================================================================

/// Keys resolved by naming convention
#[derive(Debug, Default, Clone, PartialEq)]
struct Profile {
    pk: String,
    sk: String,
    name: String,
    email: Option<String>,
}

impl Entity for Profile {
    fn mapping() -> EntityMapping<Self> {
        EntityMapping::builder()
            .default_constructor(Profile::default)
            .property(Property::new("pk", |p: &Profile| &p.pk, |p, v| p.pk = v))
            .property(Property::new("sk", |p: &Profile| &p.sk, |p, v| p.sk = v))
            .property(Property::new("name", |p: &Profile| &p.name, |p, v| p.name = v))
            .property(Property::new("email", |p: &Profile| &p.email, |p, v| p.email = v))
            .build()
    }
}

/// Partition key from an annotated property
#[derive(Debug, Default, Clone, PartialEq)]
struct User {
    id: String,
    name: String,
    age: u32,
}

impl Entity for User {
    fn mapping() -> EntityMapping<Self> {
        EntityMapping::builder()
            .default_constructor(User::default)
            .property(Property::new("id", |u: &User| &u.id, |u, v| u.id = v).hash_key())
            .property(Property::new("name", |u: &User| &u.name, |u, v| u.name = v))
            .property(Property::new("age", |u: &User| &u.age, |u, v| u.age = v))
            .build()
    }
}

/// Both an annotated key and a conventionally named one
#[derive(Debug, Default)]
struct Mixed {
    pk: String,
    code: String,
}

impl Entity for Mixed {
    fn mapping() -> EntityMapping<Self> {
        EntityMapping::builder()
            .default_constructor(Mixed::default)
            .property(Property::new("pk", |m: &Mixed| &m.pk, |m, v| m.pk = v))
            .property(Property::new("code", |m: &Mixed| &m.code, |m, v| m.code = v).hash_key())
            .build()
    }
}

#[derive(Debug, Default)]
struct Numbered {
    pk: u64,
    sk: Option<String>,
}

impl Entity for Numbered {
    fn mapping() -> EntityMapping<Self> {
        EntityMapping::builder()
            .default_constructor(Numbered::default)
            .property(Property::new("pk", |n: &Numbered| &n.pk, |n, v| n.pk = v))
            .property(Property::new("sk", |n: &Numbered| &n.sk, |n, v| n.sk = v))
            .build()
    }
}

/// Annotated numeric partition key
#[derive(Debug, Default, Clone, PartialEq)]
struct Member {
    id: u64,
    kind: String,
    name: String,
}

impl Entity for Member {
    fn mapping() -> EntityMapping<Self> {
        EntityMapping::builder()
            .default_constructor(Member::default)
            .property(Property::new("id", |m: &Member| &m.id, |m, v| m.id = v).hash_key())
            .property(Property::new("kind", |m: &Member| &m.kind, |m, v| m.kind = v).range_key())
            .property(Property::new("name", |m: &Member| &m.name, |m, v| m.name = v))
            .build()
    }
}

/// Numeric key that only a constructor can set
#[derive(Debug, Clone, PartialEq)]
struct Ticket {
    number: u32,
    title: String,
}

impl Entity for Ticket {
    fn mapping() -> EntityMapping<Self> {
        EntityMapping::builder()
            .property(Property::read_only("number", |t: &Ticket| t.number).hash_key())
            .property(Property::read_only("title", |t: &Ticket| t.title.clone()).range_key())
            .constructor(
                Constructor::new(|args| {
                    Ok(Ticket {
                        number: args.take("number")?,
                        title: args.take("title")?,
                    })
                })
                .param::<u32>("number")
                .param::<String>("title"),
            )
            .build()
    }
}

/// Only reachable through constructors
#[derive(Debug, Clone, PartialEq)]
struct Order {
    id: String,
    status: String,
    total: BigDecimal,
}

impl Entity for Order {
    fn mapping() -> EntityMapping<Self> {
        EntityMapping::builder()
            .property(Property::read_only("id", |o: &Order| o.id.clone()))
            .property(Property::read_only("status", |o: &Order| o.status.clone()))
            .property(Property::read_only("total", |o: &Order| o.total.clone()))
            .constructor(
                Constructor::new(|args| {
                    let id: String = args.take("id")?;
                    if id.is_empty() {
                        return Err("order id must not be empty".into());
                    }
                    Ok(Order {
                        id,
                        status: "new".to_string(),
                        total: BigDecimal::default(),
                    })
                })
                .param::<String>("id"),
            )
            .constructor(
                Constructor::new(|args| {
                    Ok(Order {
                        id: args.take("id")?,
                        status: args.take("status")?,
                        total: args.take("total")?,
                    })
                })
                .param::<String>("id")
                .param::<String>("status")
                .param::<BigDecimal>("total"),
            )
            .build()
    }
}

fn order_schema() -> ItemSchema<Order> {
    ItemSchema::builder(table())
        .partition_key_with(|o: &Order| format!("order#{}", o.id))
        .sort_key_with(|_| "order".to_string())
        .map_index_partition_key("by_status", "status")
        .build()
        .unwrap()
}

#[derive(Debug, Default, Clone, PartialEq)]
struct Task {
    pk: String,
    sk: String,
    assignee: Option<String>,
}

impl Entity for Task {
    fn mapping() -> EntityMapping<Self> {
        EntityMapping::builder()
            .default_constructor(Task::default)
            .property(Property::new("pk", |t: &Task| &t.pk, |t, v| t.pk = v))
            .property(Property::new("sk", |t: &Task| &t.sk, |t, v| t.sk = v))
            .property(Property::new("assignee", |t: &Task| &t.assignee, |t, v| t.assignee = v))
            .build()
    }
}

#[derive(Debug, Default, PartialEq)]
struct Node {
    value: i32,
    child: Option<Box<Node>>,
}

impl Entity for Node {
    fn mapping() -> EntityMapping<Self> {
        EntityMapping::builder()
            .default_constructor(Node::default)
            .property(Property::new("value", |n: &Node| &n.value, |n, v| n.value = v))
            .property(Property::nested(
                "child",
                |n: &Node| n.child.as_deref(),
                |n, v| n.child = Some(Box::new(v)),
            ))
            .build()
    }
}

fn node_chain(levels: i32) -> Node {
    (1..levels).rev().fold(Node { value: levels - 1, child: None }, |child, value| Node {
        value: value - 1,
        child: Some(Box::new(child)),
    })
}

fn node_attributes(levels: i32) -> Item {
    let mut current: Option<AttributeValue> = None;
    for value in (1..levels).rev() {
        let mut map = HashMap::from([("value".to_string(), AttributeValue::from(value))]);
        if let Some(child) = current.take() {
            map.insert("child".to_string(), child);
        }
        current = Some(AttributeValue::M(map));
    }
    let mut root = item(vec![("value", AttributeValue::from(0))]);
    if let Some(child) = current {
        root.insert("child".to_string(), child);
    }
    root
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct Document {
    pk: String,
    sk: String,
    body: String,
    tags: Vec<String>,
}

impl Entity for Document {
    fn mapping() -> EntityMapping<Self> {
        EntityMapping::builder()
            .default_constructor(Document::default)
            .property(Property::new("pk", |d: &Document| &d.pk, |d, v| d.pk = v))
            .property(Property::new("sk", |d: &Document| &d.sk, |d, v| d.sk = v))
            .property(Property::new("body", |d: &Document| &d.body, |d, v| d.body = v))
            .property(Property::new("tags", |d: &Document| &d.tags, |d, v| d.tags = v))
            .build()
    }
}

// ============================================================================
// Key resolution
// ============================================================================

mod key_resolution {
    use super::*;

    #[test]
    fn test_convention_keys() {
        let schema = ItemSchema::<Profile>::new(table()).unwrap();
        let profile = Profile {
            pk: "user#1".into(),
            sk: "profile".into(),
            ..Default::default()
        };

        assert_eq!(schema.partition_key(&profile).unwrap(), "user#1");
        assert_eq!(schema.sort_key(&profile).unwrap(), "profile");
        assert!(schema.is_partition_key_attribute("PK"));
        assert!(schema.is_sort_key_attribute("sk"));
        assert!(!schema.is_partition_key_attribute("name"));
    }

    #[test]
    fn test_function_beats_annotation() {
        let schema = ItemSchema::<User>::builder(table())
            .partition_key_with(|u| format!("user#{}", u.id))
            .sort_key_with(|_| "profile".to_string())
            .build()
            .unwrap();
        let user = User {
            id: "7".into(),
            ..Default::default()
        };

        assert_eq!(schema.partition_key(&user).unwrap(), "user#7");
        assert!(!schema.is_partition_key_attribute("id"));
    }

    #[test]
    fn test_annotation_beats_convention() {
        let schema = ItemSchema::<Mixed>::new(table()).unwrap();
        let mixed = Mixed {
            pk: "by-name".into(),
            code: "by-annotation".into(),
        };

        assert_eq!(schema.partition_key(&mixed).unwrap(), "by-annotation");
        assert!(schema.is_partition_key_attribute("code"));
    }

    #[test]
    fn test_convention_requires_text() {
        let schema = ItemSchema::<Numbered>::new(table()).unwrap();
        let numbered = Numbered {
            pk: 42,
            sk: Some("x".into()),
        };

        let err = schema.partition_key(&numbered).unwrap_err();
        assert!(matches!(err, MapperError::SchemaResolution(_)));
        assert_eq!(schema.sort_key(&numbered).unwrap(), "x");
    }

    #[test]
    fn test_mapping_by_reference() {
        let schema = ItemSchema::<Numbered>::builder(table())
            .map_partition_key("PK")
            .build()
            .unwrap();
        let numbered = Numbered {
            pk: 42,
            sk: Some("x".into()),
        };

        assert_eq!(schema.partition_key(&numbered).unwrap(), "42");
    }

    #[test]
    fn test_null_key_is_resolution_error() {
        let schema = ItemSchema::<Numbered>::builder(table())
            .map_partition_key("pk")
            .build()
            .unwrap();
        let numbered = Numbered { pk: 1, sk: None };

        let err = schema.sort_key(&numbered).unwrap_err();
        assert!(err.to_string().contains("null"));
    }

    #[test]
    fn test_unresolved_key_fails_at_extraction_not_registration() {
        let schema = ItemSchema::<User>::new(table()).unwrap();
        let user = User::default();

        assert!(schema.partition_key(&user).is_ok());
        let err = schema.sort_key(&user).unwrap_err();
        assert!(matches!(err, MapperError::SchemaResolution(_)));
        assert!(schema.to_item(&user).is_err());
    }

    #[test]
    fn test_unknown_index_rejected_at_build() {
        let err = ItemSchema::<Task>::builder(table())
            .map_index_partition_key("nope", "assignee")
            .build()
            .unwrap_err();
        assert!(matches!(err, MapperError::InvalidSchema(_)));

        let err = ItemSchema::<Task>::builder(table())
            .map_index_partition_key("by_assignee", "missing")
            .build()
            .unwrap_err();
        assert!(matches!(err, MapperError::InvalidSchema(_)));

        let err = ItemSchema::<Task>::builder(table())
            .map_index_sort_key("by_assignee", "assignee")
            .build()
            .unwrap_err();
        assert!(matches!(err, MapperError::InvalidSchema(_)));
    }

    #[test]
    fn test_index_keys_are_sparse() {
        let schema = ItemSchema::<Task>::builder(table())
            .map_index_partition_key("by_assignee", "assignee")
            .build()
            .unwrap();
        let mut task = Task {
            pk: "p".into(),
            sk: "s".into(),
            assignee: None,
        };

        assert!(schema.index_keys(&task).unwrap().is_empty());
        task.assignee = Some("ada".into());
        assert_eq!(
            schema.index_keys(&task).unwrap(),
            vec![("gsi2pk".to_string(), "ada".to_string())]
        );
        assert_eq!(schema.gsi_attribute_for("Assignee"), Some("gsi2pk"));
        assert_eq!(schema.gsi_attribute_for("pk"), None);
    }

    #[test]
    fn test_key_item() {
        let schema = ItemSchema::<Profile>::new(table()).unwrap();
        let key = schema.key("user#1", Some("profile")).unwrap();
        assert_eq!(key.len(), 2);
        assert!(schema.key("user#1", None).is_err());

        let sortless = Arc::new(TableSchema::new("kv").without_sort_key());
        let schema = ItemSchema::<Profile>::new(sortless).unwrap();
        assert_eq!(schema.key("user#1", None).unwrap().len(), 1);
        assert!(schema.key("user#1", Some("x")).is_err());
    }
}

// ============================================================================
// Item layout
// ============================================================================

mod item_layout {
    use super::*;

    #[test]
    fn test_keys_first_and_nulls_skipped() {
        let schema = ItemSchema::<Profile>::new(table()).unwrap();
        let profile = Profile {
            pk: "user#1".into(),
            sk: "profile".into(),
            name: "Ada".into(),
            email: None,
        };

        let item = schema.to_item(&profile).unwrap();
        assert_eq!(item.len(), 3);
        assert_eq!(item["pk"], AttributeValue::string("user#1"));
        assert_eq!(item["sk"], AttributeValue::string("profile"));
        assert_eq!(item["name"], AttributeValue::string("Ada"));
        assert!(!item.contains_key("email"));
    }

    #[test]
    fn test_annotated_key_property_not_duplicated() {
        let schema = ItemSchema::<User>::builder(table())
            .sort_key_with(|_| "profile".to_string())
            .build()
            .unwrap();
        let user = User {
            id: "u1".into(),
            name: "Grace".into(),
            age: 36,
        };

        let item = schema.to_item(&user).unwrap();
        assert_eq!(item["pk"], AttributeValue::string("u1"));
        assert_eq!(item["age"], AttributeValue::number("36"));
        assert!(!item.contains_key("id"));

        assert_eq!(schema.hydrate(&item).unwrap(), user);
    }

    #[test]
    fn test_index_keys_written() {
        let schema = order_schema();
        let order = Order {
            id: "7".into(),
            status: "shipped".into(),
            total: "12.50".parse().unwrap(),
        };

        let item = schema.to_item(&order).unwrap();
        assert_eq!(item["pk"], AttributeValue::string("order#7"));
        assert_eq!(item["gsi1pk"], AttributeValue::string("shipped"));
        assert_eq!(item["status"], AttributeValue::string("shipped"));
        assert_eq!(item["total"], AttributeValue::number("12.50"));
    }

    #[test]
    fn test_nested_round_trip() {
        let schema = ItemSchema::<Node>::builder(Arc::new(TableSchema::new("nodes")))
            .partition_key_with(|n| n.value.to_string())
            .sort_key_with(|_| "node".to_string())
            .build()
            .unwrap();
        let node = node_chain(5);

        let item = schema.to_item(&node).unwrap();
        assert!(matches!(item["child"], AttributeValue::M(_)));
        assert_eq!(schema.hydrate(&item).unwrap(), node);
    }

    #[test]
    fn test_nested_encoding_depth_bound() {
        let schema = ItemSchema::<Node>::builder(Arc::new(TableSchema::new("nodes")))
            .partition_key_with(|n| n.value.to_string())
            .sort_key_with(|_| "node".to_string())
            .build()
            .unwrap();

        assert!(schema.to_item(&node_chain(32)).is_ok());
        let err = schema.to_item(&node_chain(33)).unwrap_err();
        assert!(matches!(err, MapperError::MaxDepthExceeded { depth: 32, .. }));
    }
}

// ============================================================================
// Hydration
// ============================================================================

mod hydration {
    use super::*;

    #[test]
    fn test_keys_from_key_attributes() {
        let schema = ItemSchema::<Profile>::new(table()).unwrap();
        let profile = schema
            .hydrate(&item(vec![
                ("pk", AttributeValue::string("user#1")),
                ("sk", AttributeValue::string("profile")),
                ("name", AttributeValue::string("Ada")),
            ]))
            .unwrap();

        assert_eq!(profile.name, "Ada");
        assert_eq!(profile.pk, "user#1");
        assert_eq!(profile.sk, "profile");
        assert_eq!(profile.email, None);
    }

    #[test]
    fn test_case_insensitive_attribute_names() {
        let schema = ItemSchema::<Profile>::new(table()).unwrap();
        let profile = schema
            .hydrate(&item(vec![
                ("PK", AttributeValue::string("user#1")),
                ("Name", AttributeValue::string("Ada")),
                ("EMAIL", AttributeValue::string("ada@example.com")),
            ]))
            .unwrap();

        assert_eq!(profile.pk, "user#1");
        assert_eq!(profile.name, "Ada");
        assert_eq!(profile.email.as_deref(), Some("ada@example.com"));
    }

    #[test]
    fn test_null_attribute_leaves_default() {
        let schema = ItemSchema::<Profile>::new(table()).unwrap();
        let profile = schema
            .hydrate(&item(vec![
                ("pk", AttributeValue::string("p")),
                ("email", AttributeValue::null()),
            ]))
            .unwrap();
        assert_eq!(profile.email, None);
    }

    #[test]
    fn test_wrong_attribute_type_is_hydration_error() {
        let schema = ItemSchema::<User>::new(table()).unwrap();
        let err = schema
            .hydrate(&item(vec![
                ("pk", AttributeValue::string("u1")),
                ("age", AttributeValue::string("old")),
            ]))
            .unwrap_err();
        assert!(matches!(err, MapperError::Hydration { type_name: "User", .. }));
    }

    #[test]
    fn test_best_fit_constructor() {
        let schema = order_schema();
        let order = schema
            .hydrate(&item(vec![
                ("id", AttributeValue::string("7")),
                ("status", AttributeValue::string("shipped")),
                ("total", AttributeValue::number("12.50")),
            ]))
            .unwrap();

        assert_eq!(order.status, "shipped");
        assert_eq!(order.total.to_string(), "12.50");
    }

    #[test]
    fn test_constructor_index_fallback_and_defaults() {
        let schema = order_schema();
        let order = schema
            .hydrate(&item(vec![
                ("id", AttributeValue::string("7")),
                ("gsi1pk", AttributeValue::string("packed")),
            ]))
            .unwrap();

        assert_eq!(order.status, "packed");
        assert_eq!(order.total, BigDecimal::default());
    }

    #[test]
    fn test_falls_back_to_smaller_constructor() {
        let schema = order_schema();
        let order = schema
            .hydrate(&item(vec![
                ("id", AttributeValue::string("7")),
                ("total", AttributeValue::string("not a number")),
            ]))
            .unwrap();

        assert_eq!(order.status, "new");
        assert_eq!(order.total, BigDecimal::default());
    }

    #[test]
    fn test_all_constructors_fail() {
        let schema = order_schema();
        let err = schema
            .hydrate(&item(vec![
                ("id", AttributeValue::string("")),
                ("total", AttributeValue::Bool(true)),
            ]))
            .unwrap_err();

        match err {
            MapperError::Hydration { type_name, source } => {
                assert_eq!(type_name, "Order");
                assert!(source.to_string().contains("must not be empty"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_depth_bound() {
        let schema = ItemSchema::<Node>::new(Arc::new(TableSchema::new("nodes"))).unwrap();

        let node = schema.hydrate(&node_attributes(32)).unwrap();
        assert_eq!(node, node_chain(32));

        let err = schema.hydrate(&node_attributes(33)).unwrap_err();
        assert!(matches!(
            err,
            MapperError::MaxDepthExceeded {
                type_name: "Node",
                depth: 32
            }
        ));
    }

    #[test]
    fn test_annotated_numeric_key_reads_back() {
        let schema = ItemSchema::<Member>::new(table()).unwrap();
        let member = Member {
            id: 42,
            kind: "profile".to_string(),
            name: "Ada".to_string(),
        };

        let item = schema.to_item(&member).unwrap();
        assert_eq!(item["pk"], AttributeValue::string("42"));
        assert!(!item.contains_key("id"));

        assert_eq!(schema.hydrate(&item).unwrap(), member);
    }

    #[test]
    fn test_numeric_key_by_reference_reads_back() {
        let schema = ItemSchema::<Numbered>::builder(table())
            .map_partition_key("pk")
            .build()
            .unwrap();
        let numbered = Numbered {
            pk: 7,
            sk: Some("x".into()),
        };

        let back = schema.hydrate(&schema.to_item(&numbered).unwrap()).unwrap();
        assert_eq!(back.pk, 7);
        assert_eq!(back.sk.as_deref(), Some("x"));
    }

    #[test]
    fn test_numeric_key_constructor_parameter() {
        let schema = ItemSchema::<Ticket>::new(table()).unwrap();
        let ticket = Ticket {
            number: 9,
            title: "broken".to_string(),
        };

        let item = schema.to_item(&ticket).unwrap();
        assert_eq!(item["pk"], AttributeValue::string("9"));
        assert_eq!(schema.hydrate(&item).unwrap(), ticket);
    }

    #[test]
    fn test_non_numeric_key_text_still_fails() {
        let schema = ItemSchema::<Member>::new(table()).unwrap();
        let err = schema
            .hydrate(&item(vec![
                ("pk", AttributeValue::string("user#1")),
                ("sk", AttributeValue::string("profile")),
            ]))
            .unwrap_err();
        assert!(matches!(err, MapperError::Hydration { type_name: "Member", .. }));
    }

    #[test]
    fn test_nested_attribute_must_be_map() {
        let schema = ItemSchema::<Node>::new(Arc::new(TableSchema::new("nodes"))).unwrap();
        let err = schema
            .hydrate(&item(vec![("child", AttributeValue::string("oops"))]))
            .unwrap_err();
        assert!(matches!(err, MapperError::Hydration { .. }));
    }
}

// ============================================================================
// JSON blob
// ============================================================================

mod json_blob {
    use super::*;

    fn schema() -> ItemSchema<Document> {
        ItemSchema::builder(table())
            .json_attribute("data")
            .build()
            .unwrap()
    }

    #[test]
    fn test_round_trip_with_keys_alongside() {
        let schema = schema();
        let doc = Document {
            pk: "doc#1".into(),
            sk: "v1".into(),
            body: "hello".into(),
            tags: vec!["a".into(), "b".into()],
        };

        let item = schema.to_item(&doc).unwrap();
        assert_eq!(item.len(), 3);
        assert!(item["data"].as_string().unwrap().contains("\"body\":\"hello\""));
        assert_eq!(schema.hydrate(&item).unwrap(), doc);
    }

    #[test]
    fn test_keys_overwrite_blob() {
        let schema = schema();
        let blob = serde_json::to_string(&Document {
            pk: "stale".into(),
            sk: "stale".into(),
            body: "b".into(),
            tags: vec![],
        })
        .unwrap();

        let doc = schema
            .hydrate(&item(vec![
                ("pk", AttributeValue::string("doc#2")),
                ("sk", AttributeValue::string("v2")),
                ("data", AttributeValue::S(blob)),
            ]))
            .unwrap();
        assert_eq!(doc.pk, "doc#2");
        assert_eq!(doc.sk, "v2");
        assert_eq!(doc.body, "b");
    }

    #[test]
    fn test_missing_blob() {
        let err = schema()
            .hydrate(&item(vec![("pk", AttributeValue::string("doc#1"))]))
            .unwrap_err();
        assert!(matches!(err, MapperError::Hydration { .. }));
    }

    #[test]
    fn test_malformed_blob() {
        let err = schema()
            .hydrate(&item(vec![("data", AttributeValue::string("{not json"))]))
            .unwrap_err();
        assert!(matches!(err, MapperError::Json(_)));
    }
}
