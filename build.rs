use std::env;
use std::process::Command;

fn main() {
    // An explicit GIT_COMMIT from the environment wins over the local checkout.
    if env::var("GIT_COMMIT").is_ok() {
        println!("cargo:rerun-if-env-changed=GIT_COMMIT");
        return;
    }

    let commit = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    match commit {
        Some(commit) => println!("cargo:rustc-env=GIT_COMMIT={commit}"),
        None => println!("cargo:warning=git commit unavailable, version will report \"unknown\""),
    }

    println!("cargo:rerun-if-env-changed=GIT_COMMIT");
    println!("cargo:rerun-if-changed=build.rs");
}
