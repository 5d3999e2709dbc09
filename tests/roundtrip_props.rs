//! Property tests for the canonicalization laws

use proptest::prelude::*;
use tabulua::{parse_named, Context, ErrorSink, ParseCx, TypeExpr, Value};

fn parse_one(ty: &str, raw: &str) -> Option<Value> {
    let ctx = Context::new();
    let mut sink = ErrorSink::new();
    let mut cx = ParseCx {
        registry: &ctx.registry,
        sink: &mut sink,
    };
    let value = parse_named(ty, raw, &mut cx)?;
    if sink.has_errors() {
        return None;
    }
    Some(value)
}

fn reformat_one(ty: &str, value: &Value) -> String {
    let ctx = Context::new();
    tabulua::reformat(
        Some(&TypeExpr::Named(ty.to_string())),
        value,
        &ctx.registry,
    )
}

proptest! {
    /// parse(emit(parse(c))) == parse(c)
    #[test]
    fn prop_integer_canonicalization_idempotent(n in -(1i64 << 53)..=(1i64 << 53)) {
        let first = parse_one("integer", &n.to_string()).unwrap();
        let emitted = reformat_one("integer", &first);
        let second = parse_one("integer", &emitted).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_float_reformat_has_decimal_point(f in -1e12f64..1e12f64) {
        let raw = format!("{}", f);
        let value = parse_one("float", &raw).unwrap();
        let emitted = reformat_one("float", &value);
        prop_assert!(emitted.contains('.') || emitted.contains('e'));
        let second = parse_one("float", &emitted).unwrap();
        prop_assert_eq!(value, second);
    }

    /// hex round-trip uppercases and is stable
    #[test]
    fn prop_hexbytes_roundtrip(bytes in proptest::collection::vec(any::<u8>(), 0..32)) {
        let raw = hex::encode(&bytes); // lowercase on purpose
        let value = parse_one("hexbytes", &raw).unwrap();
        prop_assert_eq!(&value, &Value::Bytes(bytes));
        let emitted = reformat_one("hexbytes", &value);
        prop_assert_eq!(&emitted, &raw.to_uppercase());
        prop_assert_eq!(parse_one("hexbytes", &emitted).unwrap(), value);
    }

    #[test]
    fn prop_base64_roundtrip(bytes in proptest::collection::vec(any::<u8>(), 0..32)) {
        use base64::Engine as _;
        let raw = base64::engine::general_purpose::STANDARD.encode(&bytes);
        let value = parse_one("base64bytes", &raw).unwrap();
        prop_assert_eq!(&value, &Value::Bytes(bytes));
        let emitted = reformat_one("base64bytes", &value);
        prop_assert_eq!(emitted, raw);
    }

    /// text escapes survive the round trip
    #[test]
    fn prop_text_roundtrip(s in "[a-z \t\n\\\\]{0,40}") {
        let ctx = Context::new();
        let raw = {
            // emit first so the input is canonical
            tabulua::reformat(
                Some(&TypeExpr::Named("text".to_string())),
                &Value::Str(s.clone()),
                &ctx.registry,
            )
        };
        let value = parse_one("text", &raw).unwrap();
        prop_assert_eq!(value, Value::Str(s));
    }
}
