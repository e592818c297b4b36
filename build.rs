use std::{fs, path::Path, process::Command};

fn main() {
  // Rerun when the checked out revision changes
  println!("cargo:rerun-if-changed=.git/HEAD");
  if Path::new(".git/refs/heads").exists() {
    println!("cargo:rerun-if-changed=.git/refs/heads");
  }

  let (branch, commit) = git_revision();
  println!("cargo:rustc-env=GIT_BRANCH={}", branch);
  println!("cargo:rustc-env=GIT_COMMIT={}", commit);
}

fn git(args: &[&str]) -> Option<String> {
  let output = Command::new("git").args(args).output().ok()?;
  if !output.status.success() {
    return None;
  }
  let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
  (!text.is_empty()).then_some(text)
}

fn git_revision() -> (String, String) {
  let mut branch = git(&["rev-parse", "--abbrev-ref", "HEAD"]);
  let mut commit = git(&["rev-parse", "--short", "HEAD"]);

  // No git binary: read .git directly
  if branch.is_none() || commit.is_none() {
    if let Ok(head) = fs::read_to_string(".git/HEAD") {
      match head.strip_prefix("ref: ") {
        Some(ref_path) => {
          let ref_path = ref_path.trim();
          branch = ref_path.rsplit('/').next().map(str::to_string);
          commit = fs::read_to_string(format!(".git/{}", ref_path))
            .ok()
            .map(|c| c.trim().chars().take(7).collect());
        }
        None => commit = Some(head.trim().chars().take(7).collect()),
      }
    }
  }

  (
    branch.unwrap_or_else(|| "unknown".to_string()),
    commit.unwrap_or_else(|| "unknown".to_string()),
  )
}
