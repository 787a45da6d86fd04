use std::env;
use std::path::PathBuf;

fn main() {
    let crate_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    let out_dir = PathBuf::from(&crate_dir).join("include");

    println!("cargo:rerun-if-changed=src/lib.rs");
    println!("cargo:rerun-if-changed=cbindgen.toml");

    std::fs::create_dir_all(&out_dir).ok();

    let config = cbindgen::Config::from_file("cbindgen.toml").unwrap_or_default();

    // Header generation is best-effort so a parse hiccup never blocks the library build.
    match cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_config(config)
        .generate()
    {
        Ok(bindings) => {
            bindings.write_to_file(out_dir.join("hubjump.h"));
        }
        Err(e) => println!("cargo:warning=cbindgen failed: {}", e),
    }
}
