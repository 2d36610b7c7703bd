//! Link configuration for the nickel_lang ABI.
//!
//! With the `bundled` feature the symbols come from the `nickel-lite` rlib and
//! nothing needs to be linked here. Without it, an external `libnickel_lang`
//! is linked. `NICKEL_LANG_LIB_DIR` adds a search path and
//! `NICKEL_LANG_STATIC=1` selects the static archive.

use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=NICKEL_LANG_LIB_DIR");
    println!("cargo:rerun-if-env-changed=NICKEL_LANG_STATIC");

    if env::var_os("CARGO_FEATURE_BUNDLED").is_some() {
        return;
    }

    if let Some(dir) = env::var_os("NICKEL_LANG_LIB_DIR") {
        println!("cargo:rustc-link-search=native={}", dir.to_string_lossy());
    }

    let statically = env::var("NICKEL_LANG_STATIC").is_ok_and(|v| v == "1");
    if statically {
        println!("cargo:rustc-link-lib=static=nickel_lang");
        // The static archive is a Rust staticlib and needs libm on Linux.
        if env::var("CARGO_CFG_TARGET_OS").is_ok_and(|os| os == "linux") {
            println!("cargo:rustc-link-lib=m");
        }
    } else {
        println!("cargo:rustc-link-lib=nickel_lang");
    }
}
