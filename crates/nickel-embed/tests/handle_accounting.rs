//! Every engine object allocated by the bindings is freed exactly once.
//!
//! The live counters are process-wide, so this file holds a single test.

use nickel_embed::{live_handles, registered_sinks, Context, ErrorFormat, HandleStats};
use pretty_assertions::assert_eq;

fn exercise() {
    let ctx = Context::with_source_name("accounting.ncl");
    ctx.set_trace_sink(std::io::sink());

    let value = ctx
        .eval_deep(r#"{ a = [1, 2/3, "s"], b = 'Tag, c = 'Wrap { x = null } }"#)
        .unwrap();
    let record = value.to_record().unwrap();
    assert_eq!(record.len(), 3);
    for element in record["a"].as_ref().unwrap().to_array().unwrap() {
        let _ = element.to_number();
        let _ = element.to_str();
    }
    let (_tag, payload) = record["c"].as_ref().unwrap().to_enum_variant().unwrap();
    assert!(payload.field("x").unwrap().is_null());

    let err = value.to_json().unwrap_err();
    let _ = err.format(ErrorFormat::Json);

    let (shallow, vm) = ctx
        .eval_shallow(r#"{ lazy = std.trace "t" (1 + 1), empty | Number }"#)
        .unwrap();
    let lazy = shallow.field("lazy").unwrap();
    let _ = vm.eval_shallow(&lazy).unwrap();
    let _ = lazy.eval_shallow().unwrap();
    assert!(shallow.to_record().unwrap()["empty"].is_none());

    let mut reused = ctx.eval_deep("0").unwrap();
    for i in 0..10 {
        ctx.eval_deep_into(&format!("{} + 1", i), &mut reused).unwrap();
    }
    assert_eq!(reused.to_i64(), Some(10));
    assert!(ctx.eval_deep_into("1 +", &mut reused).is_err());

    let failure = ctx.eval_deep("{ port | String = 1 }").unwrap_err();
    let mut rendered = Vec::new();
    failure.write_to(ErrorFormat::Text, &mut rendered).unwrap();
    assert!(!rendered.is_empty());

    // Expressions may outlive the context handle that produced them.
    let survivor = ctx.eval_deep("[42]").unwrap();
    drop(ctx);
    assert_eq!(survivor.to_array().unwrap()[0].to_i64(), Some(42));
}

#[test]
fn test_all_handles_are_released() {
    let before = live_handles();
    let sinks = registered_sinks();
    assert_eq!(before, HandleStats::default());

    exercise();

    assert_eq!(live_handles(), before);
    assert_eq!(live_handles().total(), 0);
    assert_eq!(registered_sinks(), sinks);
}
