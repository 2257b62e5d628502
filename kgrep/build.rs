use std::env;
use std::fmt;
use std::process::Command;

type BuildResult<T> = Result<T, Box<dyn std::error::Error>>;

struct BuildInfo {
    version: String,
    git_commit: String,
    dirty: bool,
    build_date: String,
    platform: String,
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.version)?;
        match self.git_commit.get(..7) {
            Some(short) if self.dirty => write!(f, "+{short}.dirty")?,
            Some(short) => write!(f, "+{short}")?,
            None => write!(f, "+unknown")?,
        }
        write!(f, " ({}, built {})", self.platform, self.build_date)
    }
}

/// Runs git and returns its trimmed stdout, or an empty string outside of a checkout.
fn git(args: &[&str]) -> BuildResult<String> {
    match Command::new("git").args(args).output() {
        Ok(output) if output.status.success() => {
            Ok(String::from_utf8(output.stdout)?.trim().to_string())
        }
        _ => Ok(String::new()),
    }
}

fn build_info() -> BuildResult<BuildInfo> {
    // release builds inside a container pass these in
    let version = env::var("VERSION").or_else(|_| env::var("CARGO_PKG_VERSION"))?;
    let git_commit = match env::var("GIT_COMMIT") {
        Ok(commit) => commit,
        Err(_) => git(&["rev-parse", "HEAD"])?,
    };
    let dirty = match env::var("GIT_TREE_STATE") {
        Ok(state) => state != "clean",
        Err(_) => !git(&["status", "--porcelain"])?.is_empty(),
    };
    let build_date = env::var("BUILD_DATE")
        .unwrap_or_else(|_| chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string());
    let platform = format!(
        "{}/{}",
        env::var("CARGO_CFG_TARGET_OS")?,
        env::var("CARGO_CFG_TARGET_ARCH")?
    );

    Ok(BuildInfo {
        version,
        git_commit,
        dirty,
        build_date,
        platform,
    })
}

fn main() -> BuildResult<()> {
    for var in ["VERSION", "GIT_COMMIT", "GIT_TREE_STATE", "BUILD_DATE"] {
        println!("cargo:rerun-if-env-changed={var}");
    }
    println!("cargo:rustc-env=KGREP_VERSION_INFO={}", build_info()?);
    Ok(())
}
