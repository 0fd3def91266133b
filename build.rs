fn main() {
    // libtorch linking, only when the torch feature pulls in tch
    if std::env::var_os("CARGO_FEATURE_TORCH").is_some() {
        let os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
        match os.as_str() {
            "linux" | "windows" => {
                if let Some(lib_path) = std::env::var_os("DEP_TCH_LIBTORCH_LIB") {
                    println!(
                        "cargo:rustc-link-arg=-Wl,-rpath={}",
                        lib_path.to_string_lossy()
                    );
                }
                println!("cargo:rustc-link-arg=-Wl,--no-as-needed");
                println!("cargo:rustc-link-arg=-ltorch");
            }
            _ => {}
        }
    }

    println!("cargo:rerun-if-changed=build.rs");
}
