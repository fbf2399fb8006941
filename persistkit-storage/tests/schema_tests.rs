use persistkit_crypto::OverflowCodec;
use persistkit_model::{EntityDefinition, FieldDescriptor};
use persistkit_storage::{
    existing_columns, fingerprint, sync_table, table_exists, ColumnType, SchemaCompiler, Store,
    StoreOptions,
};
use pretty_assertions::assert_eq;
use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use serde_json::json;
use std::sync::Arc;

fn person() -> EntityDefinition {
    EntityDefinition::builder("Person", "persons")
        .field(FieldDescriptor::id_field("id").primary_key())
        .field(FieldDescriptor::key_field("first_name").indexed())
        .field(FieldDescriptor::key_field("last_name").indexed())
        .field(FieldDescriptor::integer("age").indexed().optional())
        .field(FieldDescriptor::boolean("active").indexed().with_default(true))
        .field(FieldDescriptor::datetime("joined").indexed().optional())
        .field(FieldDescriptor::string_array("tags"))
        .unique("first_name,last_name")
        .unique("id")
        .build()
        .unwrap()
}

// ── Column mapping ───────────────────────────────────────────────

#[test]
fn physical_layout_in_order() {
    let schema = SchemaCompiler::new().compile(&person()).unwrap();
    assert_eq!(
        schema.column_names(true),
        vec![
            "id",
            "first_name",
            "last_name",
            "age",
            "active",
            "joined",
            "overflow",
            "created_at",
            "updated_at"
        ]
    );
    assert_eq!(
        schema.column_names(false),
        vec!["id", "first_name", "last_name", "age", "active", "joined", "created_at", "updated_at"]
    );
}

#[test]
fn column_types_follow_field_types() {
    let schema = SchemaCompiler::new().compile(&person()).unwrap();
    assert_eq!(
        schema.column_types(),
        vec![
            ("id", ColumnType::Varchar(26)),
            ("first_name", ColumnType::Varchar(200)),
            ("last_name", ColumnType::Varchar(200)),
            ("age", ColumnType::Integer),
            ("active", ColumnType::Boolean),
            ("joined", ColumnType::Timestamp),
            ("overflow", ColumnType::Text),
            ("created_at", ColumnType::Timestamp),
            ("updated_at", ColumnType::Timestamp),
        ]
    );
    assert!(schema.column("tags").is_none());
}

#[test]
fn primary_key_defaults_to_400() {
    let def = EntityDefinition::builder("Code", "codes")
        .field(FieldDescriptor::string("code").primary_key())
        .field(FieldDescriptor::text("body").indexed())
        .build()
        .unwrap();
    let schema = SchemaCompiler::new().compile(&def).unwrap();
    assert_eq!(schema.primary_key().column_type, ColumnType::Varchar(400));
    assert_eq!(schema.column("body").unwrap().column_type, ColumnType::Varchar(4000));
}

#[test]
fn unique_groups_become_named_constraints() {
    let schema = SchemaCompiler::new().compile(&person()).unwrap();
    let constraints = schema.unique_constraints();
    assert_eq!(constraints.len(), 1, "primary-key group is skipped");
    assert_eq!(constraints[0].name, "uq_persons_first_name_last_name");
    assert_eq!(constraints[0].label(), "first_name,last_name");

    let ddl = schema.create_table_sql();
    assert!(ddl.contains(
        r#"CONSTRAINT "uq_persons_first_name_last_name" UNIQUE ("first_name", "last_name")"#
    ));
    assert!(ddl.contains(r#""id" VARCHAR(26) NOT NULL PRIMARY KEY"#));
    assert!(ddl.contains(r#""overflow" TEXT NOT NULL"#));
}

#[test]
fn secondary_index_per_indexed_column() {
    let schema = SchemaCompiler::new().compile(&person()).unwrap();
    let indexes = schema.create_index_sql();
    assert_eq!(indexes.len(), 5);
    assert!(indexes.iter().any(|sql| sql.contains(r#""ix_persons_age""#)));
    assert!(!indexes.iter().any(|sql| sql.contains(r#""ix_persons_id""#)));
}

#[test]
fn searchable_columns_skip_encrypted_overflow() {
    let compiler = SchemaCompiler::new();
    let plain = compiler.compile(&person()).unwrap();
    assert_eq!(
        plain.searchable_columns(),
        vec!["id", "first_name", "last_name", "overflow"]
    );

    let mut sealed = person();
    sealed.encrypt = true;
    let sealed = compiler.compile(&sealed).unwrap();
    assert!(sealed.is_encrypted());
    assert_eq!(sealed.searchable_columns(), vec!["id", "first_name", "last_name"]);
}

// ── Validation ───────────────────────────────────────────────────

#[test]
fn invalid_definition_rejected_before_storage() {
    let mut def = person();
    def.indexed_fields.push("tags".into());
    let err = SchemaCompiler::new().compile(&def).unwrap_err();
    assert!(err.is_validation(), "{err}");
}

// ── Cache ────────────────────────────────────────────────────────

#[test]
fn identical_definitions_share_one_schema() {
    let compiler = SchemaCompiler::new();
    let a = compiler.compile(&person()).unwrap();
    let b = compiler.compile(&person()).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(compiler.cached_len(), 1);
}

#[test]
fn changed_definition_compiles_separately() {
    let compiler = SchemaCompiler::new();
    let a = compiler.compile(&person()).unwrap();
    let mut changed = person();
    changed.description = "people we know".into();
    let b = compiler.compile(&changed).unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
    assert_ne!(a.fingerprint, b.fingerprint);
    assert_eq!(compiler.cached_len(), 2);
}

#[test]
fn invalidate_drops_table_entries() {
    let compiler = SchemaCompiler::new();
    let a = compiler.compile(&person()).unwrap();
    let mut changed = person();
    changed.encrypt = true;
    compiler.compile(&changed).unwrap();

    assert_eq!(compiler.invalidate("persons").unwrap(), 2);
    assert_eq!(compiler.cached_len(), 0);
    let again = compiler.compile(&person()).unwrap();
    assert!(!Arc::ptr_eq(&a, &again));
    assert_eq!(*a, *again);
}

#[test]
fn fingerprint_is_stable_sha256_hex() {
    let a = fingerprint(&person()).unwrap();
    assert_eq!(a, fingerprint(&person()).unwrap());
    assert_eq!(a.len(), 64);
    assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn store_options_rename_table() {
    let compiler = SchemaCompiler::new();
    let options = StoreOptions {
        table_prefix: "app_".into(),
        table_suffix: "_v1".into(),
    };
    let store =
        Store::with_options(person(), &compiler, Arc::new(OverflowCodec::plain()), &options)
            .unwrap();
    assert_eq!(store.table_name(), "app_persons_v1");
    assert_eq!(store.schema().unique_constraints()[0].name, "uq_app_persons_v1_first_name_last_name");
}

// ── Table maintenance ────────────────────────────────────────────

fn catalog_item(with_category: bool) -> EntityDefinition {
    let mut builder = EntityDefinition::builder("Item", "items")
        .field(FieldDescriptor::id_field("id").primary_key())
        .field(FieldDescriptor::string("name").indexed());
    if with_category {
        builder = builder.field(FieldDescriptor::string("category").indexed().with_default("general"));
    }
    builder.build().unwrap()
}

fn raw_rows(conn: &Connection, columns: &str) -> Vec<Vec<SqlValue>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {columns} FROM items ORDER BY id"))
        .unwrap();
    let width = stmt.column_count();
    stmt.query_map([], |row| {
        (0..width)
            .map(|i| row.get::<_, SqlValue>(i))
            .collect::<rusqlite::Result<Vec<_>>>()
    })
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

#[test]
fn sync_creates_missing_table() {
    let conn = Connection::open_in_memory().unwrap();
    let schema = SchemaCompiler::new().compile(&catalog_item(false)).unwrap();
    assert!(!table_exists(&conn, "items").unwrap());
    let sync = sync_table(&conn, &schema).unwrap();
    assert!(sync.created);
    assert!(sync.added_columns.is_empty());
    assert!(table_exists(&conn, "items").unwrap());

    let again = sync_table(&conn, &schema).unwrap();
    assert!(!again.created);
    assert!(again.added_columns.is_empty());
}

#[test]
fn sync_is_additive_and_preserves_rows() {
    let conn = Connection::open_in_memory().unwrap();
    let compiler = SchemaCompiler::new();
    let v1 = Store::new(catalog_item(false), &compiler, Arc::new(OverflowCodec::plain())).unwrap();
    v1.create_table(&conn).unwrap();
    for (id, name) in [("a", "anvil"), ("b", "bucket"), ("c", "chisel")] {
        v1.create(&conn, json!({"id": id, "name": name}).as_object().cloned().unwrap())
            .unwrap();
    }
    let before = raw_rows(&conn, "*");

    let v2 = compiler.compile(&catalog_item(true)).unwrap();
    let sync = sync_table(&conn, &v2).unwrap();
    assert!(!sync.created);
    assert_eq!(sync.added_columns, vec!["category".to_string()]);
    assert_eq!(
        existing_columns(&conn, "items").unwrap(),
        vec!["id", "name", "overflow", "created_at", "updated_at", "category"]
    );

    let after = raw_rows(&conn, "id, name, overflow, created_at, updated_at");
    assert_eq!(after, before);
    let defaults = raw_rows(&conn, "category");
    assert!(defaults.iter().all(|row| row == &vec![SqlValue::Text(String::new())]));

    let again = sync_table(&conn, &v2).unwrap();
    assert!(again.added_columns.is_empty());
}
