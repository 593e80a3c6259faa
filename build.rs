fn main() {
    // search path for programs given without a '/' when the launched environment has no PATH
    println!(
        "cargo:rustc-env=PYSU_PATH_DEFAULT=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin"
    );
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=PYSU_DEV_LOGS");
}
