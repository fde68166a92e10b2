// This build script records toolchain and revision details reported by `version`.
fn main() -> Result<(), anyhow::Error> {
    let rustc = rustc_version::version()?;
    println!("cargo:rustc-env=DNS_PROXY_BUILD_RUSTC_VERSION={rustc}");

    let revision = std::env::var("BUILD_GIT_REVISION").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=DNS_PROXY_BUILD_GIT_REVISION={revision}");
    println!("cargo:rerun-if-env-changed=BUILD_GIT_REVISION");

    Ok(())
}
