use persistkit_model::{
    validate_record, Catalog, EntityDefinition, FieldDescriptor, ModelError, PersistedObject,
    Record,
};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

fn product() -> EntityDefinition {
    EntityDefinition::builder("Product", "products")
        .field(FieldDescriptor::id_field("id").primary_key())
        .field(FieldDescriptor::key_field("sku").indexed().unique())
        .field(FieldDescriptor::integer("stock").with_default(0))
        .field(FieldDescriptor::boolean("active").indexed().with_default("yes"))
        .field(FieldDescriptor::datetime("released").optional())
        .field(FieldDescriptor::string_array("tags"))
        .field(FieldDescriptor::object("meta"))
        .build()
        .unwrap()
}

fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

// ── Normalization ────────────────────────────────────────────────

#[test]
fn defaults_and_containers_applied() {
    let out = validate_record(&product(), record(json!({"id": "p1", "sku": "A-1"}))).unwrap();
    assert_eq!(
        Value::Object(out),
        json!({
            "id": "p1",
            "sku": "A-1",
            "stock": 0,
            "active": true,
            "tags": [],
            "meta": {}
        })
    );
}

#[test]
fn extra_keys_pass_through() {
    let out = validate_record(
        &product(),
        record(json!({"id": "p1", "sku": "A", "payload": {"note": "x"}})),
    )
    .unwrap();
    assert_eq!(out["payload"], json!({"note": "x"}));
}

#[test]
fn explicit_values_not_overwritten_by_defaults() {
    let out = validate_record(
        &product(),
        record(json!({"id": "p1", "sku": "A", "stock": 7, "active": false})),
    )
    .unwrap();
    assert_eq!(out["stock"], json!(7));
    assert_eq!(out["active"], json!(false));
}

// ── Rejections ───────────────────────────────────────────────────

#[test]
fn missing_primary_key() {
    let err = validate_record(&product(), record(json!({"sku": "A"}))).unwrap_err();
    assert!(matches!(err, ModelError::Validation { ref entity, .. } if entity == "Product"));
    assert!(err.to_string().contains("primary key 'id'"));
}

#[test]
fn missing_required_field() {
    let err = validate_record(&product(), record(json!({"id": "p1"}))).unwrap_err();
    assert!(err.to_string().contains("'sku' is required"));
}

#[test]
fn type_mismatch() {
    let err =
        validate_record(&product(), record(json!({"id": "p1", "sku": "A", "stock": "many"})))
            .unwrap_err();
    assert!(err.to_string().contains("expects integer"));
}

#[test]
fn max_length_enforced() {
    let long = "x".repeat(27);
    let err = validate_record(&product(), record(json!({"id": long, "sku": "A"}))).unwrap_err();
    assert!(err.to_string().contains("max 26"));
}

#[test]
fn datetime_must_be_rfc3339() {
    let ok = validate_record(
        &product(),
        record(json!({"id": "p1", "sku": "A", "released": "2024-05-01T10:00:00Z"})),
    );
    assert!(ok.is_ok());
    let err = validate_record(
        &product(),
        record(json!({"id": "p1", "sku": "A", "released": "last tuesday"})),
    )
    .unwrap_err();
    assert!(err.to_string().contains("RFC 3339"));
}

#[test]
fn string_array_members_checked() {
    let err = validate_record(
        &product(),
        record(json!({"id": "p1", "sku": "A", "tags": ["a", 1]})),
    )
    .unwrap_err();
    assert!(err.to_string().contains("only strings"));
}

#[test]
fn applied_defaults_are_checked_like_values() {
    let def = EntityDefinition::builder("Ticket", "tickets")
        .field(FieldDescriptor::id_field("id").primary_key())
        .field(FieldDescriptor::id_field("code").with_default("c".repeat(500)))
        .field(FieldDescriptor::datetime("due").with_default(42))
        .build()
        .unwrap();

    let err = validate_record(&def, record(json!({"id": "t1", "due": "2024-05-01T10:00:00Z"})))
        .unwrap_err();
    assert!(matches!(err, ModelError::Validation { .. }));
    assert!(err.to_string().contains("max 26"));

    let err = validate_record(&def, record(json!({"id": "t1", "code": "C-1"}))).unwrap_err();
    assert!(err.to_string().contains("expects datetime"), "{err}");
}

// ── Catalog ──────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct Setting {
    key: String,
    value: String,
}

impl PersistedObject for Setting {
    fn definition() -> EntityDefinition {
        EntityDefinition::builder("Setting", "app_settings")
            .field(FieldDescriptor::key_field("key").primary_key())
            .field(FieldDescriptor::string("value"))
            .build()
            .unwrap()
    }
}

#[test]
fn catalog_register_and_lookup() {
    let catalog = Catalog::new();
    catalog.register_type::<Setting>().unwrap();
    catalog.register(product()).unwrap();
    assert_eq!(catalog.len(), 2);
    assert_eq!(catalog.get_by_table_name("products").unwrap().name, "Product");
    let tables: Vec<_> = catalog.all().iter().map(|d| d.table_name.clone()).collect();
    assert_eq!(tables, vec!["app_settings".to_string(), "products".to_string()]);
}

#[test]
fn catalog_reregister_same_definition_is_noop() {
    let catalog = Catalog::new();
    catalog.register(product()).unwrap();
    catalog.register(product()).unwrap();
    assert_eq!(catalog.len(), 1);
}

#[test]
fn catalog_rejects_conflicting_table() {
    let catalog = Catalog::new();
    catalog.register(product()).unwrap();
    let mut other = product();
    other.name = "Other".into();
    assert!(matches!(
        catalog.register(other),
        Err(ModelError::DuplicateTable(t)) if t == "products"
    ));
}

#[test]
fn catalog_clear() {
    let catalog = Catalog::new();
    catalog.register(product()).unwrap();
    catalog.clear();
    assert!(catalog.is_empty());
    assert!(catalog.get_by_table_name("products").is_none());
}
