//! End-to-end tests of evaluation through the bindings

use std::io::{self, Write};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use nickel_embed::{Context, Error, ErrorFormat, ExprKind};
use pretty_assertions::assert_eq;
use serde::Deserialize;

#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Captured {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn traced() -> (Context, Captured) {
    let ctx = Context::new();
    let sink = Captured::default();
    ctx.set_trace_sink(sink.clone());
    (ctx, sink)
}

// ═══════════════════════════════════════════════════════════════════════
// Deep evaluation
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_deep_evaluation_to_json() {
    let ctx = Context::new();
    let value = ctx
        .eval_deep(
            r#"
            let base = { replicas = 2 } in
            {
              name = "web",
              replicas = base.replicas * 3,
              ports = std.array.map (fun p => p + 8000) [80, 443],
              debug = false,
              owner = null,
            }
            "#,
        )
        .unwrap();
    let json: serde_json::Value = serde_json::from_str(&value.to_json().unwrap()).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "name": "web",
            "replicas": 6,
            "ports": [8080, 8443],
            "debug": false,
            "owner": null,
        })
    );
}

#[test]
fn test_deep_values_are_fully_evaluated() {
    let ctx = Context::new();
    let value = ctx.eval_deep("{ a = { b = [1 + 1, { c = 3 }] } }").unwrap();
    let b = value.field("a").unwrap().field("b").unwrap();
    let elements = b.to_array().unwrap();
    assert!(elements.iter().all(|e| e.is_value()));
    assert_eq!(elements[0].to_i64(), Some(2));
    assert_eq!(elements[1].field("c").unwrap().to_i64(), Some(3));
}

#[test]
fn test_yaml_and_toml() {
    let ctx = Context::new();
    let value = ctx.eval_deep(r#"{ name = "x", port = 80 }"#).unwrap();
    assert_eq!(value.to_yaml().unwrap(), "name: x\nport: 80\n");
    assert_eq!(value.to_toml().unwrap(), "name = \"x\"\nport = 80\n");

    let scalar = ctx.eval_deep("1").unwrap();
    assert!(scalar.to_toml().is_err());
}

#[test]
fn test_export_leaves_out_hidden_fields() {
    let ctx = Context::new();
    let src = "{ visible = 1, hidden | not_exported = 2 }";

    let exported = ctx.eval_deep_for_export(src).unwrap();
    assert_eq!(exported.to_json().unwrap(), "{\n  \"visible\": 1\n}");

    let full = ctx.eval_deep(src).unwrap();
    assert_eq!(full.field("hidden").unwrap().to_i64(), Some(2));
}

#[test]
fn test_eval_deep_into_reuses_target() {
    let ctx = Context::new();
    let mut out = ctx.eval_deep("1").unwrap();
    ctx.eval_deep_into("{ a = \"two\" }", &mut out).unwrap();
    assert_eq!(out.kind(), ExprKind::Record);
    assert_eq!(out.field("a").unwrap().to_str().as_deref(), Some("two"));

    let other = Context::new();
    other.eval_deep_into("[3]", &mut out).unwrap();
    drop(ctx);
    assert_eq!(out.to_array().unwrap()[0].to_i64(), Some(3));
}

// ═══════════════════════════════════════════════════════════════════════
// Shallow evaluation
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_shallow_evaluation_is_lazy() {
    let ctx = Context::new();
    let (value, vm) = ctx.eval_shallow("{ ok = 40 + 2, broken = 1 / 0 }").unwrap();
    assert_eq!(value.kind(), ExprKind::Record);

    let ok = value.field("ok").unwrap();
    assert_eq!(ok.kind(), ExprKind::Unevaluated);
    assert_eq!(vm.eval_shallow(&ok).unwrap().to_i64(), Some(42));

    let err = vm
        .eval_shallow(&value.field("broken").unwrap())
        .unwrap_err();
    assert!(err.to_string().contains("division by zero"), "{}", err);
}

#[test]
fn test_shallow_evaluation_is_idempotent() {
    let (ctx, sink) = traced();
    let (value, _vm) = ctx
        .eval_shallow(r#"{ a = std.trace "forced" (1 + 1) }"#)
        .unwrap();
    assert_eq!(sink.text(), "");

    let a = value.field("a").unwrap();
    let first = a.eval_shallow().unwrap();
    let second = a.eval_shallow().unwrap();
    let third = first.eval_shallow().unwrap();
    assert_eq!(first.to_i64(), Some(2));
    assert_eq!(second.to_i64(), Some(2));
    assert_eq!(third.to_i64(), Some(2));
    assert_eq!(sink.text(), "std.trace: forced\n");

    assert!(value.field("a").unwrap().is_value());
}

#[test]
fn test_shallow_array_elements() {
    let ctx = Context::new();
    let (value, vm) = ctx.eval_shallow("[1, 2 * 2, \"x\"]").unwrap();
    let elements = value.to_array().unwrap();
    assert_eq!(elements.len(), 3);
    assert!(elements[0].is_value());
    assert!(!elements[1].is_value());
    assert_eq!(vm.eval_shallow(&elements[1]).unwrap().to_i64(), Some(4));
    assert_eq!(elements[2].to_str().as_deref(), Some("x"));
}

#[test]
fn test_serializing_unevaluated_values_fails() {
    let ctx = Context::new();
    let (value, _vm) = ctx.eval_shallow("{ a = 1 + 1 }").unwrap();
    let err = value.to_json().unwrap_err();
    assert!(err.to_string().contains("unevaluated"), "{}", err);
}

// ═══════════════════════════════════════════════════════════════════════
// Enums
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_enum_tags_project_to_strings() {
    let ctx = Context::new();
    let value = ctx.eval_deep("{ level = 'Warning }").unwrap();
    let level = value.field("level").unwrap();
    assert_eq!(level.kind(), ExprKind::EnumTag);
    assert_eq!(level.to_enum_tag().as_deref(), Some("Warning"));
    assert_eq!(level.to_str(), None);
    assert_eq!(value.to_json().unwrap(), "{\n  \"level\": \"Warning\"\n}");
}

#[test]
fn test_enum_variants_are_inspectable_but_not_serializable() {
    let ctx = Context::new();
    let value = ctx.eval_deep("{ result = 'Ok { code = 200 } }").unwrap();
    let result = value.field("result").unwrap();

    let (tag, payload) = result.to_enum_variant().unwrap();
    assert_eq!(tag, "Ok");
    assert_eq!(payload.field("code").unwrap().to_i64(), Some(200));

    let err = value.to_json().unwrap_err();
    let text = err.to_string();
    assert!(text.contains("'Ok"), "{}", text);
    assert!(text.contains("result"), "{}", text);
}

#[test]
fn test_shallow_enum_variant_payload_is_lazy() {
    let ctx = Context::new();
    let (value, vm) = ctx.eval_shallow("{ baz = 'Tag (1 + 1) }").unwrap();
    let baz = value.field("baz").unwrap();
    assert_eq!(baz.kind(), ExprKind::Unevaluated);

    let baz = vm.eval_shallow(&baz).unwrap();
    assert_eq!(baz.kind(), ExprKind::EnumVariant);
    let (tag, payload) = baz.to_enum_variant().unwrap();
    assert_eq!(tag, "Tag");
    assert_eq!(payload.kind(), ExprKind::Unevaluated);
    assert!(!payload.is_value());

    assert_eq!(vm.eval_shallow(&payload).unwrap().to_i64(), Some(2));
}

// ═══════════════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_contract_failure_names_the_field() {
    let ctx = Context::with_source_name("service.ncl");
    let err = ctx
        .eval_deep(r#"{ port | Number = "eighty", host = "localhost" }"#)
        .unwrap_err();

    let text = err.format(ErrorFormat::Text);
    assert!(text.starts_with("error: contract broken by the value of `port`"), "{}", text);
    assert!(text.contains(" --> service.ncl:1:"), "{}", text);
    assert!(text.contains("expected `Number`, got a string"), "{}", text);

    let json: serde_json::Value =
        serde_json::from_str(&err.format(ErrorFormat::Json)).unwrap();
    assert_eq!(json["message"], "contract broken by the value of `port`");
    assert_eq!(json["labels"][0]["source"], "service.ncl");
}

#[test]
fn test_error_streams_into_writer() {
    let ctx = Context::new();
    let err = ctx.eval_deep("x + 1").unwrap_err();
    let mut out = Vec::new();
    err.write_to(ErrorFormat::Text, &mut out).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), err.format(ErrorFormat::Text));
    assert!(err.to_string().contains("unbound identifier `x`"));
}

#[test]
fn test_parse_errors_are_evaluation_errors() {
    let ctx = Context::new();
    let err = ctx.eval_deep("{ a = }").unwrap_err();
    assert!(err.to_string().contains("expected an expression"), "{}", err);
}

#[test]
fn test_deep_nesting_fails_cleanly() {
    let ctx = Context::new();
    let nested = format!("{}1{}", "[".repeat(1000), "]".repeat(1000));

    let err = ctx.eval_deep(&nested).unwrap_err();
    assert!(err.to_string().contains("nested more than 128 levels"), "{}", err);
    assert!(ctx.eval_shallow(&nested).is_err());

    let err = ctx
        .eval_deep("let rec f = fun n => if n == 0 then 1 else [f (n - 1)] in f 3000")
        .unwrap_err();
    assert!(
        err.to_string()
            .starts_with("error: maximum evaluation depth of 256 exceeded"),
        "{}",
        err
    );

    let fine = format!("{}1{}", "[".repeat(100), "]".repeat(100));
    assert!(ctx.eval_deep(&fine).unwrap().is_array());
}

#[test]
fn test_errors_cross_threads() {
    let ctx = Context::new();
    let err = ctx.eval_deep("1 / 0").unwrap_err();
    let text = thread::spawn(move || err.format(ErrorFormat::Text))
        .join()
        .unwrap();
    assert!(text.contains("division by zero"));
}

#[test]
fn test_decode() {
    #[derive(Debug, Deserialize, PartialEq)]
    struct Server {
        host: String,
        ports: Vec<u16>,
    }

    let ctx = Context::new();
    let value = ctx
        .eval_deep(r#"{ host = "localhost", ports = [80, 443] }"#)
        .unwrap();
    let server: Server = value.decode().unwrap();
    assert_eq!(
        server,
        Server {
            host: "localhost".to_string(),
            ports: vec![80, 443],
        }
    );

    let err = value.decode::<Vec<u8>>().unwrap_err();
    assert!(err.is_decode(), "{:?}", err);

    let variant = ctx.eval_deep("'Some 1").unwrap();
    let err = variant.decode::<serde_json::Value>().unwrap_err();
    assert!(matches!(err, Error::Conversion(_)), "{:?}", err);
}

#[test]
fn test_errors_compose_with_anyhow() -> anyhow::Result<()> {
    let ctx = Context::new();
    let value = ctx.eval_deep("{ a = 1 }")?;
    let a: i64 = value.field("a").and_then(|a| a.to_i64()).unwrap_or_default();
    assert_eq!(a, 1);
    let failure: anyhow::Result<_> = ctx.eval_deep("1 +").map_err(anyhow::Error::from);
    assert!(failure.is_err());
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// Tracing
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn test_trace_messages_arrive_in_order() {
    let (ctx, sink) = traced();
    ctx.eval_deep(r#"std.trace "hi" { a = std.trace "bye" 1 }"#)
        .unwrap();
    assert_eq!(sink.text(), "std.trace: hi\nstd.trace: bye\n");
}

#[test]
fn test_replacing_and_discarding_trace_output() {
    let (ctx, first) = traced();
    let second = Captured::default();
    ctx.set_trace_sink(second.clone());
    ctx.eval_deep(r#"std.trace "to second" 1"#).unwrap();
    assert_eq!(first.text(), "");
    assert_eq!(second.text(), "std.trace: to second\n");

    ctx.set_trace_sink(io::sink());
    ctx.eval_deep(r#"std.trace "discarded" 1"#).unwrap();
    assert_eq!(second.text(), "std.trace: to second\n");
}

#[test]
fn test_resumed_evaluation_uses_current_trace_sink() {
    let ctx = Context::new();
    let (value, vm) = ctx
        .eval_shallow(r#"{ a = std.trace "late" 1, b = std.trace "later" 2, c = std.trace "cleared" 3 }"#)
        .unwrap();

    let sink = Captured::default();
    ctx.set_trace_sink(sink.clone());
    assert_eq!(vm.eval_shallow(&value.field("a").unwrap()).unwrap().to_i64(), Some(1));
    assert_eq!(value.field("b").unwrap().eval_shallow().unwrap().to_i64(), Some(2));
    assert_eq!(sink.text(), "std.trace: late\nstd.trace: later\n");

    ctx.clear_trace_sink();
    assert_eq!(vm.eval_shallow(&value.field("c").unwrap()).unwrap().to_i64(), Some(3));
    assert_eq!(sink.text(), "std.trace: late\nstd.trace: later\n");
}

#[test]
fn test_replacing_sink_waits_for_running_evaluation() {
    struct Slow {
        seen: Captured,
        started: Option<mpsc::Sender<()>>,
    }

    impl Write for Slow {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.seen.write(buf)?;
            if let Some(started) = self.started.take() {
                let _ = started.send(());
                thread::sleep(Duration::from_millis(100));
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let ctx = Context::new();
    let first = Captured::default();
    let second = Captured::default();
    let (started, wait) = mpsc::channel();
    ctx.set_trace_sink(Slow {
        seen: first.clone(),
        started: Some(started),
    });

    thread::scope(|s| {
        let running = s.spawn(|| {
            ctx.eval_deep(r#"std.trace "one" (std.trace "two" 2)"#)
                .ok()
                .and_then(|value| value.to_i64())
        });
        wait.recv().unwrap();
        ctx.set_trace_sink(second.clone());
        assert_eq!(running.join().unwrap(), Some(2));
    });

    assert_eq!(first.text(), "std.trace: one\nstd.trace: two\n");
    assert_eq!(second.text(), "");
}

#[test]
fn test_failing_trace_sink_does_not_fail_evaluation() {
    struct Closed;

    impl Write for Closed {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    let ctx = Context::new();
    ctx.set_trace_sink(Closed);
    let value = ctx.eval_deep(r#"std.trace "lost" 7"#).unwrap();
    assert_eq!(value.to_i64(), Some(7));
}

#[test]
fn test_concurrent_contexts_keep_their_own_traces() {
    let handles: Vec<_> = (0..8)
        .map(|i| {
            thread::spawn(move || {
                let (ctx, sink) = traced();
                for round in 0..20 {
                    let src = format!(r#"std.trace "ctx{} round{}" {}"#, i, round, round);
                    let value = ctx.eval_deep(&src).unwrap();
                    assert_eq!(value.to_i64(), Some(round));
                }
                (i, sink.text())
            })
        })
        .collect();

    for handle in handles {
        let (i, text) = handle.join().unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 20);
        for (round, line) in lines.iter().enumerate() {
            assert_eq!(*line, format!("std.trace: ctx{} round{}", i, round));
        }
    }
}

#[test]
fn test_shared_context_across_threads() {
    let ctx = Arc::new(Context::new());
    let handles: Vec<_> = (0..4i64)
        .map(|i| {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                let value = ctx.eval_deep(&format!("{} * 10", i)).unwrap();
                value.to_i64()
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results, vec![Some(0), Some(10), Some(20), Some(30)]);
}
