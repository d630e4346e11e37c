// build.rs

use std::process::Command;

fn git_commit() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let commit = String::from_utf8(output.stdout).ok()?;
    let commit = commit.trim();
    if commit.is_empty() {
        None
    } else {
        Some(commit.to_string())
    }
}

fn rustc_version() -> Option<String> {
    let rustc = std::env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string());
    let output = Command::new(rustc).arg("--version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8(output.stdout).ok()?.trim().to_string())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let commit = git_commit().unwrap_or_else(|| {
        println!("cargo:warning=git commit not available, stamping 'unknown'");
        "unknown".to_string()
    });
    println!("cargo:rustc-env=TF_MIRROR_COMMIT={commit}");

    println!(
        "cargo:rustc-env=TF_MIRROR_BUILD_TIME={}",
        chrono::Utc::now().to_rfc3339()
    );

    println!(
        "cargo:rustc-env=TF_MIRROR_RUSTC={}",
        rustc_version().unwrap_or_else(|| "unknown".to_string())
    );
}
