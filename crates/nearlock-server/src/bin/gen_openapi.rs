//! Dumps the OpenAPI document for client generators.
//!
//! Writes `openapi.json` at the workspace root by default; pass a path as
//! the first argument to write elsewhere.

use std::path::PathBuf;
use std::{env, fs};

use anyhow::Context;

fn main() -> anyhow::Result<()> {
    let json = nearlock_server::api::get_openapi_json();

    let output = env::args()
        .nth(1)
        .map_or_else(default_output, PathBuf::from);
    fs::write(&output, &json).with_context(|| format!("writing {}", output.display()))?;

    let spec: serde_json::Value = serde_json::from_str(&json)?;
    let paths = spec["paths"].as_object().map_or(0, serde_json::Map::len);
    println!("{} ({paths} paths)", output.display());
    Ok(())
}

fn default_output() -> PathBuf {
    // crates/nearlock-server sits two levels below the workspace root.
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(PathBuf::new, PathBuf::from)
        .join("openapi.json")
}
