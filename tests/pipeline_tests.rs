//! End-to-end pipeline tests
//!
//! Each test drives the public surface the way a package loader would:
//! compile a header, parse rows against a context, and inspect parsed
//! values, reports, joins, and validators.

use tabulua::{
    join_files, new_ctx, parse_file, run_file_validators, run_row_validators, Constraints,
    Context, CustomTypeSpec, ErrorSink, FileOptions, JoinSpec, RawFile, Table, TypeExpr,
    ValidatorSpec, Value,
};

fn rows(data: &[&[&str]]) -> Vec<(usize, Vec<String>)> {
    data.iter()
        .enumerate()
        .map(|(i, cells)| (i + 2, cells.iter().map(|s| s.to_string()).collect()))
        .collect()
}

fn parse(
    source: &str,
    header: &[&str],
    data: &[&[&str]],
    options: FileOptions,
    ctx: &mut Context,
    sink: &mut ErrorSink,
) -> Option<Table> {
    let header: Vec<String> = header.iter().map(|s| s.to_string()).collect();
    let data = rows(data);
    parse_file(
        &RawFile {
            source,
            header: &header,
            rows: &data,
        },
        options,
        ctx,
        sink,
    )
}

// =============================================================================
// Defaults and plain parsing
// =============================================================================

#[test]
fn test_literal_default_and_reformat() {
    let mut ctx = Context::new();
    let mut sink = ErrorSink::new();
    let table = parse(
        "Unit.tsv",
        &["id:identifier", "level:integer:1"],
        &[&["hero", ""], &["mage", "7"], &["bard", "x"]],
        FileOptions::default(),
        &mut ctx,
        &mut sink,
    )
    .unwrap();

    assert_eq!(table.rows[0].cells[1].parsed, Value::Int(1));
    assert_eq!(table.rows[1].cells[1].parsed, Value::Int(7));
    // the bad cell reported and parsed to nil; the run continued
    assert_eq!(sink.error_count(), 1);
    assert_eq!(table.rows[2].cells[1].parsed, Value::Nil);

    // emitted header keeps the literal default unchanged
    let emitted = table.emit_canonical();
    assert_eq!(emitted[0][1], "level:integer:1");
}

// =============================================================================
// Exploded columns
// =============================================================================

#[test]
fn test_exploded_record_and_collapsed_emission() {
    let mut ctx = Context::new();
    let mut sink = ErrorSink::new();
    let table = parse(
        "Unit.tsv",
        &["id:identifier", "stats.attack:integer", "stats.defense:integer"],
        &[&["hero", "5", "3"]],
        FileOptions::default(),
        &mut ctx,
        &mut sink,
    )
    .unwrap();
    assert_eq!(sink.error_count(), 0);

    let assembled = table.rows[0].assembled(&table.schema);
    let Value::Record(stats) = &assembled["stats"] else {
        panic!("expected assembled record, got {:?}", assembled["stats"]);
    };
    assert_eq!(stats["attack"], Value::Int(5));
    assert_eq!(stats["defense"], Value::Int(3));

    let collapsed = table.emit_collapsed(&ctx.registry);
    assert_eq!(collapsed[1][1], "{attack=5,defense=3}");

    // collapsed text parses back to the same value
    let ty = tabulua::parse_type_spec("{attack:integer,defense:integer}").unwrap();
    let mut cx = tabulua::ParseCx {
        registry: &ctx.registry,
        sink: &mut sink,
    };
    let reparsed = tabulua::parse_cell(&ty, &collapsed[1][1], &mut cx).unwrap();
    assert_eq!(&reparsed, &assembled["stats"]);
}

// =============================================================================
// Custom types
// =============================================================================

#[test]
fn test_custom_range_type() {
    let mut ctx = Context::new();
    ctx.register_custom(&CustomTypeSpec {
        name: "percentage".to_string(),
        parent: Some("number".to_string()),
        constraints: Constraints {
            min: Some(0.0),
            max: Some(100.0),
            ..Constraints::default()
        },
    })
    .unwrap();

    let mut sink = ErrorSink::new();
    let table = parse(
        "Drop.tsv",
        &["id:identifier", "chance:percentage"],
        &[&["common", "50"], &["rare", "150"]],
        FileOptions::default(),
        &mut ctx,
        &mut sink,
    )
    .unwrap();

    assert_eq!(table.rows[0].cells[1].parsed, Value::Int(50));
    assert_eq!(sink.error_count(), 1);
    assert!(sink.reports().iter().any(|r| r.message == "must be 0..100"));
}

// =============================================================================
// Subtype queries
// =============================================================================

#[test]
fn test_union_extends_number() {
    let mut ctx = Context::new();
    ctx.register_custom(&CustomTypeSpec {
        name: "Num".to_string(),
        parent: Some("integer|float".to_string()),
        constraints: Constraints::default(),
    })
    .unwrap();
    ctx.register_custom(&CustomTypeSpec {
        name: "MaybeNum".to_string(),
        parent: Some("integer|float|nil".to_string()),
        constraints: Constraints::default(),
    })
    .unwrap();

    assert!(ctx.registry.extends_or_restrict_names("Num", "number"));
    assert!(!ctx.registry.extends_or_restrict_names("MaybeNum", "number"));
}

// =============================================================================
// Tags across packages
// =============================================================================

#[test]
fn test_tag_merge_across_packages() {
    let mut ctx = Context::new();
    for (name, fields) in [
        ("Currency", "{id:identifier,value:integer}"),
        ("gold", "{extends:Currency,shine:integer}"),
        ("bossGem", "{extends:Currency,tier:integer}"),
    ] {
        ctx.register_custom(&CustomTypeSpec {
            name: name.to_string(),
            parent: Some(fields.to_string()),
            constraints: Constraints::default(),
        })
        .unwrap();
    }

    // package A and package B each contribute members
    for member in ["gold", "bossGem"] {
        ctx.register_custom(&CustomTypeSpec {
            name: "CurrencyType".to_string(),
            parent: None,
            constraints: Constraints {
                members: Some(vec![member.to_string()]),
                ..Constraints::default()
            },
        })
        .unwrap();
    }

    assert!(ctx.registry.is_member_of_tag("CurrencyType", "gold"));
    assert!(ctx.registry.is_member_of_tag("CurrencyType", "bossGem"));
    assert!(!ctx.registry.is_member_of_tag("CurrencyType", "Currency"));

    // tag columns accept member names only
    let mut sink = ErrorSink::new();
    let table = parse(
        "Reward.tsv",
        &["id:identifier", "currency:CurrencyType"],
        &[&["daily", "gold"], &["weekly", "integer"]],
        FileOptions::default(),
        &mut ctx,
        &mut sink,
    )
    .unwrap();
    assert_eq!(
        table.rows[0].cells[1].parsed,
        Value::TypeName("gold".to_string())
    );
    assert_eq!(sink.error_count(), 1);
}

// =============================================================================
// File joining
// =============================================================================

#[test]
fn test_left_join_scenario() {
    let mut ctx = Context::new();
    let mut sink = ErrorSink::new();
    let mut primary = parse(
        "Item.tsv",
        &["id:identifier", "cost:integer"],
        &[&["sword", "10"], &["shield", "25"]],
        FileOptions::default(),
        &mut ctx,
        &mut sink,
    )
    .unwrap();
    let secondary = parse(
        "Item.en.tsv",
        &["id:identifier", "description:string|nil"],
        &[&["sword", "a sharp blade"], &["chestplate", "sturdy"]],
        FileOptions {
            join: Some(JoinSpec {
                into: "Item.tsv".to_string(),
                column: None,
            }),
            ..FileOptions::default()
        },
        &mut ctx,
        &mut sink,
    )
    .unwrap();
    assert_eq!(sink.error_count(), 0);

    let accepted = join_files(&mut primary, &secondary, &mut sink);
    assert!(!accepted); // the chestplate row matches nothing
    assert_eq!(primary.rows.len(), 2);
    assert_eq!(
        primary.rows[0].cells[2].parsed,
        Value::Str("a sharp blade".to_string())
    );
    assert_eq!(primary.rows[1].cells[2].parsed, Value::Nil);
    assert!(sink
        .reports()
        .iter()
        .any(|r| r.message.contains("unmatched row")));
}

// =============================================================================
// Expression ordering
// =============================================================================

#[test]
fn test_topological_expression_evaluation() {
    let mut ctx = Context::new();
    let mut sink = ErrorSink::new();
    let table = parse(
        "Calc.tsv",
        &["id:identifier", "a:integer", "b:integer", "c:integer"],
        &[&["row", "=self.b * 2", "=self.c + 1", "3"]],
        FileOptions::default(),
        &mut ctx,
        &mut sink,
    )
    .unwrap();
    assert_eq!(sink.error_count(), 0, "{:?}", sink.reports());
    let row = &table.rows[0];
    assert_eq!(row.cells[3].parsed, Value::Int(3));
    assert_eq!(row.cells[2].parsed, Value::Int(4));
    assert_eq!(row.cells[1].parsed, Value::Int(8));
}

#[test]
fn test_cyclic_expressions_rejected() {
    let mut ctx = Context::new();
    let mut sink = ErrorSink::new();
    parse(
        "Calc.tsv",
        &["id:identifier", "a:integer", "b:integer"],
        &[&["row", "=self.b", "=self.a"]],
        FileOptions::default(),
        &mut ctx,
        &mut sink,
    );
    assert!(sink.has_errors());
}

// =============================================================================
// Round-trip law
// =============================================================================

#[test]
fn test_canonical_emission_round_trips() {
    let mut ctx = Context::new();
    let mut sink = ErrorSink::new();
    let header = [
        "id:identifier",
        "level:integer:1",
        "speed:float",
        "tags:{identifier}",
        "stats:{attack:integer,defense:integer}",
        "note:text|nil",
    ];
    let table = parse(
        "Unit.tsv",
        &header,
        &[
            &["hero", "", "2", "brave,bold", "attack=5,defense=3", "line one\\nline two"],
            &["mage", "9", "0.5", "wise", "attack=1,defense=9", ""],
        ],
        FileOptions::default(),
        &mut ctx,
        &mut sink,
    )
    .unwrap();
    assert_eq!(sink.error_count(), 0, "{:?}", sink.reports());
    // float reformat always prints a decimal point
    assert_eq!(table.rows[0].cells[2].reformatted, "2.0");

    let emitted = table.emit_canonical();
    let reparsed_rows: Vec<(usize, Vec<String>)> = emitted[1..]
        .iter()
        .enumerate()
        .map(|(i, cells)| (i + 2, cells.clone()))
        .collect();
    let mut ctx2 = Context::new();
    let mut sink2 = ErrorSink::new();
    let reparsed = parse_file(
        &RawFile {
            source: "Unit.tsv",
            header: &emitted[0],
            rows: &reparsed_rows,
        },
        FileOptions::default(),
        &mut ctx2,
        &mut sink2,
    )
    .unwrap();
    assert_eq!(sink2.error_count(), 0, "{:?}", sink2.reports());

    assert_eq!(table.rows.len(), reparsed.rows.len());
    for (before, after) in table.rows.iter().zip(&reparsed.rows) {
        for (b, a) in before.cells.iter().zip(&after.cells) {
            assert_eq!(b.parsed, a.parsed);
            assert_eq!(b.reformatted, a.reformatted);
        }
    }
}

// =============================================================================
// Validators end to end
// =============================================================================

#[test]
fn test_validator_levels_end_to_end() {
    let mut ctx = Context::new();
    let mut sink = ErrorSink::new();
    let table = parse(
        "Unit.tsv",
        &["id:identifier", "hp:integer", "cost:integer"],
        &[&["hero", "10", "3"], &["mage", "0", "9"]],
        FileOptions::default(),
        &mut ctx,
        &mut sink,
    )
    .unwrap();
    assert_eq!(sink.error_count(), 0);

    let shared = new_ctx();
    let accepted = run_row_validators(
        &table,
        &[
            ValidatorSpec::error("self.hp > 0"),
            ValidatorSpec::warn("self.cost < 5"),
        ],
        &shared,
        &ctx,
        &mut sink,
    );
    assert!(!accepted);
    assert_eq!(sink.error_count(), 1);
    assert_eq!(sink.warning_count(), 1);

    // file validators still run and see the shared ctx
    let accepted = run_file_validators(
        &table,
        &[ValidatorSpec::error("unique(rows, |r| r.id)")],
        &shared,
        &ctx,
        &mut sink,
    );
    assert!(accepted);
}

// =============================================================================
// Published views
// =============================================================================

#[test]
fn test_views_visible_across_files() {
    let mut ctx = Context::new();
    let mut sink = ErrorSink::new();
    parse(
        "Item.tsv",
        &["id:identifier", "cost:integer"],
        &[&["sword", "10"]],
        FileOptions {
            publish_context: Some("Item".to_string()),
            ..FileOptions::default()
        },
        &mut ctx,
        &mut sink,
    )
    .unwrap();
    assert_eq!(sink.error_count(), 0);

    let table = parse(
        "Loadout.tsv",
        &["id:identifier", "weapon_cost:integer"],
        &[&["starter", "=Item[\"sword\"].cost"]],
        FileOptions::default(),
        &mut ctx,
        &mut sink,
    )
    .unwrap();
    assert_eq!(sink.error_count(), 0, "{:?}", sink.reports());
    assert_eq!(table.rows[0].cells[1].parsed, Value::Int(10));
}

// =============================================================================
// Self-referencing column types
// =============================================================================

#[test]
fn test_self_ref_typed_column() {
    let mut ctx = Context::new();
    let mut sink = ErrorSink::new();
    let table = parse(
        "Setting.tsv",
        &["id:identifier", "kind:type", "value:self.kind"],
        &[
            &["max_hp", "integer", "250"],
            &["greeting", "string", "hello there"],
            &["enabled", "boolean", "yes"],
        ],
        FileOptions::default(),
        &mut ctx,
        &mut sink,
    )
    .unwrap();
    assert_eq!(sink.error_count(), 0, "{:?}", sink.reports());
    assert_eq!(table.rows[0].cells[2].parsed, Value::Int(250));
    assert_eq!(
        table.rows[1].cells[2].parsed,
        Value::Str("hello there".to_string())
    );
    assert_eq!(table.rows[2].cells[2].parsed, Value::Bool(true));
}

// =============================================================================
// Schema snapshot
// =============================================================================

#[test]
fn test_schema_snapshot_export() {
    let mut ctx = Context::new();
    ctx.register_custom(&CustomTypeSpec {
        name: "Color".to_string(),
        parent: Some("{enum:red|green|blue}".to_string()),
        constraints: Constraints::default(),
    })
    .unwrap();

    let snapshot = ctx.snapshot();
    let color = snapshot.get("Color").unwrap();
    assert_eq!(color.enum_labels.as_deref().unwrap().len(), 3);
    let json = snapshot.to_json().unwrap();
    assert!(json.contains("\"Color\""));

    // every built-in appears
    for builtin in ["integer", "ratio", "type_spec", "raw"] {
        assert!(snapshot.get(builtin).is_some(), "missing {}", builtin);
    }
}

// =============================================================================
// Union trials leave the sink clean
// =============================================================================

#[test]
fn test_union_trial_sink_hygiene() {
    let ctx = Context::new();
    let mut sink = ErrorSink::new();
    let ty: TypeExpr = tabulua::parse_type_spec("integer|string").unwrap();
    let mut cx = tabulua::ParseCx {
        registry: &ctx.registry,
        sink: &mut sink,
    };
    assert_eq!(tabulua::parse_cell(&ty, "10", &mut cx), Some(Value::Int(10)));
    assert_eq!(
        tabulua::parse_cell(&ty, "10 kg", &mut cx),
        Some(Value::Str("10 kg".to_string()))
    );
    // failed trials rolled back; nothing reported
    assert_eq!(sink.error_count(), 0);
    assert_eq!(sink.reports().len(), 0);
}
