use persistkit_model::{EntityDefinition, FieldDescriptor, FieldType};
use pretty_assertions::assert_eq;
use serde_json::json;

// ── FieldDescriptor presets ──────────────────────────────────────

#[test]
fn presets_carry_max_lengths() {
    assert_eq!(FieldDescriptor::id_field("id").max_length, Some(26));
    assert_eq!(FieldDescriptor::reference_id_field("owner").max_length, Some(36));
    assert_eq!(FieldDescriptor::key_field("slug").max_length, Some(200));
    assert_eq!(FieldDescriptor::title_field("title").max_length, Some(400));
    assert_eq!(FieldDescriptor::description_field("d").max_length, Some(800));
    assert_eq!(FieldDescriptor::content_field("c").max_length, Some(4000));
    assert_eq!(FieldDescriptor::large_content_field("c").max_length, Some(10_000));
    assert_eq!(FieldDescriptor::max_content_field("c").max_length, Some(100_000));
    assert_eq!(FieldDescriptor::version_field("v").max_length, Some(50));
    assert_eq!(FieldDescriptor::standard_field("s").max_length, None);
    assert_eq!(FieldDescriptor::standard_field("s").effective_max_length(), Some(200));
}

#[test]
fn effective_max_length_uses_type_default() {
    assert_eq!(FieldDescriptor::string("name").effective_max_length(), Some(200));
    assert_eq!(FieldDescriptor::text("body").effective_max_length(), Some(4000));
    assert_eq!(FieldDescriptor::integer("n").effective_max_length(), None);
    assert_eq!(
        FieldDescriptor::integer("n").with_max_length(10).effective_max_length(),
        None
    );
}

#[test]
fn complex_shorthands_are_optional() {
    assert!(!FieldDescriptor::string_array("tags").required);
    assert!(!FieldDescriptor::object("meta").required);
    assert!(!FieldDescriptor::object_array("lines").required);
}

// ── FieldType ────────────────────────────────────────────────────

#[test]
fn complex_classification() {
    for t in FieldType::ALL {
        let expected = matches!(
            t,
            FieldType::StringArray | FieldType::Object | FieldType::ObjectArray
        );
        assert_eq!(t.is_complex(), expected, "{t}");
    }
}

#[test]
fn unknown_tag_falls_back_to_string() {
    assert_eq!(FieldType::parse("decimal"), FieldType::String);
    let t: FieldType = serde_json::from_value(json!("uuid")).unwrap();
    assert_eq!(t, FieldType::String);
}

#[test]
fn field_type_serializes_as_tag() {
    assert_eq!(serde_json::to_value(FieldType::ObjectArray).unwrap(), json!("object_array"));
    assert_eq!(serde_json::to_value(FieldType::DateTime).unwrap(), json!("datetime"));
}

// ── Descriptor JSON ──────────────────────────────────────────────

#[test]
fn descriptor_deserializes_with_defaults() {
    let f: FieldDescriptor = serde_json::from_value(json!({
        "name": "sku",
        "type": "string",
        "max_length": 64,
        "is_indexed": true
    }))
    .unwrap();
    assert_eq!(f.name, "sku");
    assert_eq!(f.field_type, FieldType::String);
    assert!(f.required);
    assert!(f.is_indexed);
    assert!(!f.is_unique);
    assert!(!f.is_primary_key);
    assert_eq!(f.max_length, Some(64));
}

#[test]
fn descriptor_accepts_field_type_alias() {
    let f: FieldDescriptor =
        serde_json::from_value(json!({"name": "n", "field_type": "integer"})).unwrap();
    assert_eq!(f.field_type, FieldType::Integer);
}

// ── Default coercion ─────────────────────────────────────────────

#[test]
fn boolean_defaults_from_strings() {
    for (raw, expected) in [("true", true), ("YES", true), ("1", true), ("no", false), ("x", false)] {
        let f = FieldDescriptor::boolean("b").with_default(raw);
        assert_eq!(f.coerced_default(), Some(json!(expected)), "{raw}");
    }
}

#[test]
fn integer_defaults_from_strings() {
    assert_eq!(
        FieldDescriptor::integer("n").with_default("42").coerced_default(),
        Some(json!(42))
    );
    assert_eq!(
        FieldDescriptor::integer("n").with_default("many").coerced_default(),
        Some(json!(0))
    );
}

#[test]
fn string_default_is_verbatim() {
    let f = FieldDescriptor::string("category").with_default("general");
    assert_eq!(f.coerced_default(), Some(json!("general")));
    assert!(!f.required);
}

// ── EntityDefinition builder ─────────────────────────────────────

fn person() -> EntityDefinition {
    EntityDefinition::builder("Person", "persons")
        .field(FieldDescriptor::id_field("id").primary_key())
        .field(FieldDescriptor::key_field("first_name").indexed())
        .field(FieldDescriptor::key_field("last_name").indexed())
        .field(FieldDescriptor::boolean("active").indexed().with_default(true))
        .field(FieldDescriptor::string_array("tags"))
        .unique("first_name,last_name")
        .build()
        .unwrap()
}

#[test]
fn builder_puts_primary_key_first() {
    let def = EntityDefinition::builder("T", "t")
        .field(FieldDescriptor::string("name").indexed())
        .field(FieldDescriptor::string("id"))
        .primary_key("id")
        .build()
        .unwrap();
    assert_eq!(def.indexed_fields, vec!["id".to_string(), "name".to_string()]);
    assert!(def.primary_key_field().unwrap().is_primary_key);
}

#[test]
fn unique_groups_split_composites() {
    let def = person();
    assert_eq!(
        def.unique_groups(),
        vec![vec!["first_name".to_string(), "last_name".to_string()]]
    );
}

#[test]
fn missing_primary_key_rejected() {
    let err = EntityDefinition::builder("T", "t")
        .field(FieldDescriptor::string("name"))
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("primary key"));
}

#[test]
fn primary_key_must_be_declared() {
    let err = EntityDefinition::builder("T", "t")
        .primary_key("id")
        .field(FieldDescriptor::string("name"))
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("'id'"));
}

#[test]
fn indexed_complex_field_rejected() {
    let err = EntityDefinition::builder("T", "t")
        .field(FieldDescriptor::string("id").primary_key())
        .field(FieldDescriptor::string_array("tags"))
        .indexed(["tags"])
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("cannot be indexed"));
}

#[test]
fn unique_member_must_exist() {
    let err = EntityDefinition::builder("T", "t")
        .field(FieldDescriptor::string("id").primary_key())
        .unique("email")
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("email"));
}

#[test]
fn unique_member_must_be_indexed() {
    let err = EntityDefinition::builder("T", "t")
        .field(FieldDescriptor::string("id").primary_key())
        .field(FieldDescriptor::string("email"))
        .unique("email")
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("must also be indexed"));
}

#[test]
fn reserved_and_invalid_names_rejected() {
    for name in ["overflow", "created_at", "updated_at", "bad name", "1st"] {
        let result = EntityDefinition::builder("T", "t")
            .field(FieldDescriptor::string("id").primary_key())
            .field(FieldDescriptor::string(name))
            .build();
        assert!(result.is_err(), "{name}");
    }
}

#[test]
fn duplicate_names_differing_in_case_rejected() {
    let err = EntityDefinition::builder("T", "t")
        .field(FieldDescriptor::string("id").primary_key())
        .field(FieldDescriptor::string("Name"))
        .field(FieldDescriptor::string("name"))
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("declared more than once"));
}

#[test]
fn invalid_table_name_rejected() {
    let result = EntityDefinition::builder("T", "t; drop")
        .field(FieldDescriptor::string("id").primary_key())
        .build();
    assert!(result.is_err());
}

#[test]
fn definition_roundtrips_through_json() {
    let def = person();
    let json = serde_json::to_value(&def).unwrap();
    let back: EntityDefinition = serde_json::from_value(json).unwrap();
    assert_eq!(back, def);
    back.validate().unwrap();
}
