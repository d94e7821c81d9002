//! Bakes the agent build identity into the validator.
//!
//! Release pipelines export the same three values that were used to stamp
//! the native agent; local builds fall back to placeholders.

use std::env;

const IDENTITY_VARS: [(&str, Option<&str>); 3] = [
    ("JVMTOOL_AGENT_VERSION", None),
    ("JVMTOOL_AGENT_SALT", Some("unsalted")),
    ("JVMTOOL_AGENT_BUILD", Some("unknown")),
];

fn main() {
    let package_version = env::var("CARGO_PKG_VERSION").unwrap_or_default();

    for (name, fallback) in IDENTITY_VARS {
        println!("cargo:rerun-if-env-changed={name}");
        let value = env::var(name)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| fallback.unwrap_or(&package_version).to_string());
        println!("cargo:rustc-env={name}={value}");
    }
}
