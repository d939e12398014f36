use std::env;
use std::process::Command;

/// Version stamped into `--version`, the startup log and rendered configs.
fn portal_version() -> String {
    let described = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .filter(|v| !v.is_empty());

    let pkg = env::var("CARGO_PKG_VERSION").unwrap_or_default();
    match described {
        Some(rev) => format!("{pkg}+{rev}"),
        None => format!("{pkg}-nogit"),
    }
}

fn main() {
    println!("cargo:rustc-env=GIT_VERSION={}", portal_version());

    println!("cargo::rustc-check-cfg=cfg(distribute)");
    if env::var("PROFILE").is_ok_and(|p| p == "distribute") {
        println!("cargo:rustc-cfg=distribute");
    }

    for path in [".git/HEAD", ".git/refs/tags"] {
        println!("cargo:rerun-if-changed={path}");
    }
    println!("cargo:rerun-if-env-changed=PROFILE");
}
