// build.rs

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

const FALLBACK_LANG: &str = "en";

/// Picks the message language: an enabled `lang_*` feature first, then
/// `DEVX_LANG`, then English.
fn effective_language() -> String {
    let mut features: Vec<String> = env::vars()
        .filter_map(|(key, _)| {
            key.strip_prefix("CARGO_FEATURE_LANG_")
                .map(str::to_lowercase)
        })
        .collect();
    features.sort();

    match features.split_first() {
        Some((first, rest)) => {
            if !rest.is_empty() {
                println!(
                    "cargo:warning=Multiple language features enabled ({features:?}). Using '{first}'."
                );
            }
            first.clone()
        }
        None => env::var("DEVX_LANG").unwrap_or_else(|_| FALLBACK_LANG.to_string()),
    }
}

fn load_messages(path: &str) -> Option<BTreeMap<String, String>> {
    let content = fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(messages) => Some(messages),
        Err(e) => panic!("Failed to parse {path}: {e}"),
    }
}

fn main() {
    let lang = effective_language();
    println!("cargo:rustc-env=DEVX_LANG_EFFECTIVE={lang}");
    println!("cargo:rerun-if-env-changed=DEVX_LANG");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=locales/");

    let fallback_path = format!("locales/{FALLBACK_LANG}.toml");
    let mut messages = load_messages(&fallback_path)
        .unwrap_or_else(|| panic!("Missing fallback message catalog: {fallback_path}"));

    if lang != FALLBACK_LANG {
        let lang_path = format!("locales/{lang}.toml");
        match load_messages(&lang_path) {
            Some(overrides) => messages.extend(overrides),
            None => println!(
                "cargo:warning=Message catalog '{lang_path}' not found. Falling back to '{FALLBACK_LANG}'."
            ),
        }
    }

    // Every key becomes one literal arm so `t!` can be used as a `format!` string.
    let mut code = String::from("#[macro_export]\nmacro_rules! t {\n");
    for (key, value) in &messages {
        code.push_str(&format!("    ({key:?}) => {{ {value:?} }};\n"));
    }
    code.push_str(
        "    ($key:expr) => {{ compile_error!(concat!(\"Missing translation key: \", $key)) }};\n}\n",
    );

    let out_dir = env::var("OUT_DIR").unwrap_or_else(|_| panic!("OUT_DIR is not set"));
    let dest = Path::new(&out_dir).join("translations.rs");
    if let Err(e) = fs::write(&dest, code) {
        panic!("Failed to write {}: {e}", dest.display());
    }
}
