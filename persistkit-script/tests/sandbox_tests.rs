use persistkit_model::FieldType;
use persistkit_script::{ScriptError, ScriptLimits, ScriptSandbox};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

const PRODUCT: &str = r#"
// Catalog entry
model Product : Entity {
    table = "products";
    primary_key = "sku";
    indexed = ["price"];
    unique = ["name,brand"];
    description = "Things we sell";
    sku: string = key_field();
    name: string = title_field(indexed: true);
    brand: string = key_field(indexed: true);
    price: integer = 0;
    active: boolean = field(true, indexed: true);
    notes: text?;
    tags: string_array;
}
"#;

fn sandbox() -> ScriptSandbox {
    ScriptSandbox::default()
}

// ── Extraction ───────────────────────────────────────────────────

#[test]
fn extracts_the_declared_model() {
    let model = sandbox().extract_model(PRODUCT).unwrap();
    assert_eq!(model.name, "Product");
    assert_eq!(model.table_name.as_deref(), Some("products"));
    assert_eq!(model.description, "Things we sell");
    assert_eq!(model.composite_unique(), vec!["name,brand".to_string()]);

    let fields = model.descriptors();
    let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["sku", "name", "brand", "price", "active", "notes", "tags"]);

    let sku = &fields[0];
    assert!(sku.is_primary_key && sku.required);
    assert_eq!(sku.max_length, Some(200));

    let price = &fields[3];
    assert_eq!(price.field_type, FieldType::Integer);
    assert!(price.is_indexed);
    assert_eq!(price.default_value, Some(serde_json::json!(0)));

    assert_eq!(fields[4].default_value, Some(serde_json::json!(true)));
    assert!(!fields[5].required);
    assert_eq!(fields[6].field_type, FieldType::StringArray);
}

#[test]
fn inspect_reports_metadata() {
    let info = sandbox().inspect(PRODUCT).unwrap();
    assert_eq!(info.name, "Product");
    assert_eq!(info.table_name, "products");
    assert_eq!(info.description, "Things we sell");
}

#[test]
fn most_derived_model_is_chosen() {
    let model = sandbox()
        .extract_model(
            r#"
            model Audited : Entity {
                table = "audited";
                primary_key = "id";
                id: string = id_field();
                created_by: string?;
            }
            model Invoice : Audited {
                table = "invoices";
                total: integer = 0;
            }
            "#,
        )
        .unwrap();
    assert_eq!(model.name, "Invoice");
    assert_eq!(model.fields.len(), 3);
    assert_eq!(model.primary_key.as_deref(), Some("id"));
}

#[test]
fn abstract_parents_without_a_table_do_not_compete() {
    let model = sandbox()
        .extract_model(
            r#"
            model Base : Entity { primary_key = "id"; id: string; }
            model Tag : Base { table = "tags"; label: string; }
            "#,
        )
        .unwrap();
    assert_eq!(model.name, "Tag");
}

#[test]
fn unrelated_models_are_ambiguous() {
    let err = sandbox()
        .extract_model(
            r#"
            model A : Entity { table = "a"; primary_key = "id"; id: string; }
            model B : Entity { table = "b"; primary_key = "id"; id: string; }
            "#,
        )
        .unwrap_err();
    assert_eq!(err, ScriptError::Ambiguous(vec!["A".into(), "B".into()]));
}

#[test]
fn scripts_without_an_entity_are_rejected() {
    for source in [
        "let x = 1;",
        r#"model Loose { table = "loose"; id: string; }"#,
        r#"model NoTable : Entity { id: string; }"#,
    ] {
        assert_eq!(sandbox().extract_model(source).unwrap_err(), ScriptError::NoModel, "{source}");
    }
}

#[test]
fn undeclared_references_are_rejected() {
    let err = sandbox()
        .extract_model(r#"model A : Entity { table = "a"; primary_key = "id"; indexed = ["ghost"]; id: string; }"#)
        .unwrap_err();
    assert!(matches!(err, ScriptError::Runtime(ref m) if m.contains("ghost")), "{err}");
}

// ── Isolation ────────────────────────────────────────────────────

#[test]
fn host_access_is_disallowed() {
    for source in [
        r#"let secrets = read_file("/etc/shadow");"#,
        r#"let key = env("PERSISTKIT_ENCRYPTION_KEY");"#,
        r#"exec("rm -rf /");"#,
        r#"import "os";"#,
        r#"model A : Entity { table = open("x"); }"#,
    ] {
        let err = sandbox().evaluate(source).unwrap_err();
        assert!(matches!(err, ScriptError::Disallowed(_)), "{source}: {err}");
    }
}

#[test]
fn syntax_errors_carry_positions() {
    let err = sandbox().evaluate("model A : Entity {\n  table = ;\n}").unwrap_err();
    match err {
        ScriptError::Syntax { line, column, .. } => assert_eq!((line, column), (2, 11)),
        other => panic!("expected a syntax error, got {other:?}"),
    }
}

#[test]
fn empty_script_rejected() {
    assert!(matches!(sandbox().evaluate("   \n"), Err(ScriptError::Runtime(_))));
}

// ── Limits ───────────────────────────────────────────────────────

#[test]
fn oversized_source_rejected_before_running() {
    let sandbox = ScriptSandbox::new(ScriptLimits {
        max_source_bytes: 16,
        ..ScriptLimits::default()
    });
    let err = sandbox.evaluate("let a = \"0123456789\";").unwrap_err();
    assert!(matches!(err, ScriptError::ResourceLimit(_)));
}

#[test]
fn fuel_limit_stops_long_scripts() {
    let source: String = (0..200).map(|i| format!("let v{i} = {i};\n")).collect();
    let tight = ScriptSandbox::new(ScriptLimits {
        fuel: 50,
        ..ScriptLimits::default()
    });
    assert!(matches!(tight.evaluate(&source), Err(ScriptError::ResourceLimit(_))));
    assert!(ScriptSandbox::default().evaluate(&source).is_ok());
}

#[test]
fn string_growth_is_capped() {
    let err = sandbox()
        .evaluate(r#"let s = "0123456789abcdef" * 100000;"#)
        .unwrap_err();
    assert!(matches!(err, ScriptError::ResourceLimit(_)));
}

fn chained_nesting(statements: usize, depth: usize) -> String {
    let mut source = String::from("let a0 = 0;\n");
    for i in 1..=statements {
        let open = "[".repeat(depth);
        let close = "]".repeat(depth);
        source.push_str(&format!("let a{i} = {open}a{}{close};\n", i - 1));
    }
    source.push_str("model Note : Entity { table = \"notes\"; id: string = id_field(primary_key: true); }\n");
    source
}

#[test]
fn nesting_built_across_bindings_is_capped() {
    let source = chained_nesting(200, 30);
    assert!(source.len() < ScriptLimits::default().max_source_bytes);
    let err = sandbox().evaluate(&source).unwrap_err();
    assert!(
        matches!(err, ScriptError::ResourceLimit(ref m) if m.contains("levels deep")),
        "{err:?}"
    );
}

#[test]
fn shallow_nesting_still_evaluates() {
    let model = sandbox().extract_model(&chained_nesting(3, 5)).unwrap();
    assert_eq!(model.name, "Note");
}

#[test]
fn nested_size_amplification_is_capped() {
    let zeros = vec!["0"; 1000].join(", ");
    let refs = vec!["a"; 1000].join(", ");
    let source = format!("let a = [{zeros}];\nlet b = [{refs}];\nlet c = [b, b, b, b, b, b, b, b];\n");
    let err = sandbox().evaluate(&source).unwrap_err();
    assert!(
        matches!(err, ScriptError::ResourceLimit(ref m) if m.contains("total size")),
        "{err:?}"
    );
}

#[test]
fn rendering_large_values_is_capped() {
    let source = r#"
        let s = "x" * 60000;
        let l = [s, s, s];
        print(l);
    "#;
    let err = sandbox().evaluate(source).unwrap_err();
    assert!(
        matches!(err, ScriptError::ResourceLimit(ref m) if m.contains("rendered text")),
        "{err:?}"
    );
}

// ── Robustness ───────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn arbitrary_text_never_escapes_as_a_fault(source in "\\PC{0,200}") {
        // Any outcome is fine as long as it is a value, not a panic.
        let _ = sandbox().evaluate(&source);
    }

    #[test]
    fn arbitrary_token_soup_never_escapes_as_a_fault(
        parts in proptest::collection::vec(
            prop_oneof![
                Just("model"), Just("let"), Just("Entity"), Just("{"), Just("}"),
                Just("("), Just(")"), Just("["), Just("]"), Just(";"), Just(":"),
                Just("="), Just("x"), Just("\"s\""), Just("1"), Just("+"), Just("!"),
                Just("table"), Just("field"), Just(","), Just("?"),
            ],
            0..60,
        )
    ) {
        let _ = sandbox().evaluate(&parts.join(" "));
    }
}
