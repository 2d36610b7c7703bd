//! Behavioural guarantees of the bindings, one test per guarantee

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use nickel_embed::{Context, ErrorFormat, ExprKind};
use pretty_assertions::assert_eq;

#[derive(Clone, Default)]
struct Messages(Arc<Mutex<Vec<String>>>);

impl Write for Messages {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(buf).into_owned());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_round_trip_through_json() {
    let ctx = Context::new();
    let value = ctx
        .eval_deep(
            r#"{
              int = -12,
              big = 9007199254740993,
              frac = 1/4,
              text = "a \"quoted\" line\n",
              flags = [true, false, null],
              nested = { empty = {}, list = [[], [1, 2, 3]] },
              tag = 'Blue,
            }"#,
        )
        .unwrap();

    let decoded: serde_json::Value = value.decode().unwrap();
    assert_eq!(
        decoded,
        serde_json::json!({
            "int": -12,
            "big": 9007199254740993i64,
            "frac": 0.25,
            "text": "a \"quoted\" line\n",
            "flags": [true, false, null],
            "nested": { "empty": {}, "list": [[], [1, 2, 3]] },
            "tag": "Blue",
        })
    );

    let keys: Vec<&String> = decoded.as_object().unwrap().keys().collect();
    let record = value.to_record().unwrap();
    assert_eq!(keys, record.keys().collect::<Vec<_>>());
}

#[test]
fn test_shallow_idempotence() {
    let ctx = Context::new();
    let trace = Messages::default();
    ctx.set_trace_sink(trace.clone());

    let (value, vm) = ctx
        .eval_shallow(r#"std.trace "root" { child = std.trace "child" 1 }"#)
        .unwrap();
    assert_eq!(*trace.0.lock().unwrap(), vec!["std.trace: root\n"]);

    let again = value.eval_shallow().unwrap();
    assert_eq!(again.kind(), ExprKind::Record);
    assert_eq!(
        again.to_record().unwrap().keys().collect::<Vec<_>>(),
        value.to_record().unwrap().keys().collect::<Vec<_>>()
    );
    let via_vm = vm.eval_shallow(&value).unwrap();
    assert_eq!(via_vm.kind(), ExprKind::Record);
    assert_eq!(trace.0.lock().unwrap().len(), 1);

    let child = value.field("child").unwrap();
    let forced = vm.eval_shallow(&child).unwrap();
    let forced_again = forced.eval_shallow().unwrap();
    assert_eq!(forced_again.to_i64(), Some(1));
    assert_eq!(
        *trace.0.lock().unwrap(),
        vec!["std.trace: root\n", "std.trace: child\n"]
    );
}

#[test]
fn test_laziness() {
    let ctx = Context::new();
    let (value, vm) = ctx
        .eval_shallow(r#"{ foo = [1, 2 + 3], bar = "hi" }"#)
        .unwrap();
    let record = value.to_record().unwrap();
    assert_eq!(record.keys().collect::<Vec<_>>(), vec!["foo", "bar"]);

    let foo = record["foo"].as_ref().unwrap();
    assert!(!foo.is_value());
    assert_eq!(foo.kind(), ExprKind::Unevaluated);

    let foo = vm.eval_shallow(foo).unwrap();
    let elements = foo.to_array().unwrap();
    assert_eq!(elements.len(), 2);
    assert_eq!(elements[0].to_i64(), Some(1));
    assert!(!elements[1].is_value());
    assert_eq!(vm.eval_shallow(&elements[1]).unwrap().to_i64(), Some(5));
}

#[test]
fn test_contract_attribution() {
    let ctx = Context::new();
    let err = ctx.eval_deep("{ foo | String = 1, bar = 2 }").unwrap_err();
    for format in [ErrorFormat::Text, ErrorFormat::AnsiText, ErrorFormat::Json] {
        let rendered = err.format(format);
        assert!(rendered.contains("`foo`"), "{:?}: {}", format, rendered);
        assert!(!rendered.contains("`bar`"), "{:?}: {}", format, rendered);
    }
}

#[test]
fn test_trace_ordering() {
    let ctx = Context::new();
    let trace = Messages::default();
    ctx.set_trace_sink(trace.clone());
    ctx.eval_deep(r#"std.trace "hi" { bye = std.trace "bye" 1 }"#)
        .unwrap();
    let messages = trace.0.lock().unwrap().clone();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].contains("hi"));
    assert!(messages[1].contains("bye"));
}

#[test]
fn test_enum_projection() {
    let ctx = Context::new();
    let value = ctx.eval_deep("'Tag (2 + 3)").unwrap();
    assert_eq!(value.kind(), ExprKind::EnumVariant);
    let (tag, payload) = value.to_enum_variant().unwrap();
    assert_eq!(tag, "Tag");
    assert!(payload.is_value());
    assert_eq!(payload.to_i64(), Some(5));
}

#[test]
fn test_serialization_rejects_variants() {
    let ctx = Context::new();
    let value = ctx.eval_deep("{ foo = [1, 'Tag 2] }").unwrap();
    for result in [value.to_json(), value.to_yaml(), value.to_toml()] {
        let err = result.unwrap_err();
        let text = err.to_string();
        assert!(text.contains("foo[1]"), "{}", text);
        assert!(text.contains("'Tag"), "{}", text);
    }
}
