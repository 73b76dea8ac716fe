//! Fixed provisioning template: the file tree mounted into a fresh sandbox
//! and the rc file written before the interactive shell starts.

use crate::engine::FileTree;

/// Package manifest file name.
pub const MANIFEST: &str = "package.json";
/// Lock file placeholder name.
pub const LOCKFILE: &str = "pnpm-lock.yaml";
/// Version-control wrapper script name.
pub const VCS_WRAPPER: &str = "git.ts";

/// Manifest declaring the assistant CLI, an isomorphic VCS implementation,
/// and a script runner as dev dependencies of the global package set.
const MANIFEST_CONTENTS: &str = r#"{
  "name": "global-packages",
  "type": "module",
  "devDependencies": {
    "@anthropic-ai/claude-code": "latest",
    "isomorphic-git": "latest",
    "tsx": "latest"
  }
}
"#;

/// Wrapper that forwards `git <args>` to the real binary, propagating the
/// exit code, so the shell alias can interpose on version-control calls.
const VCS_WRAPPER_CONTENTS: &str = r#"import { spawn } from "node:child_process";

const child = spawn("git", process.argv.slice(2), { stdio: "inherit", shell: true });

child.on("error", (error) => {
  console.error("git wrapper error:", error);
  process.exit(1);
});

child.on("close", (code) => {
  process.exit(code ?? 0);
});
"#;

/// Shell rc: telemetry off, PATH prefix at the installed bin directory, and
/// aliases for the CLI tool and the VCS wrapper. Written outside the global
/// directory so it never collides with the relocated template files.
pub const SHELL_RC: &str = r#"export DISABLE_TELEMETRY=1
export PATH="$HOME/.global/node_modules/.bin:$PATH"
alias claude="$HOME/.global/node_modules/.bin/claude"
alias isogit="$HOME/.global/node_modules/.bin/isogit"
alias tsx="$HOME/.global/node_modules/.bin/tsx"
alias git="$HOME/.global/node_modules/.bin/tsx $HOME/.global/src/git.ts"
"#;

/// The three-file tree mounted at the workspace root before reorganization.
pub fn global_template() -> FileTree {
    FileTree::new()
        .file(MANIFEST, MANIFEST_CONTENTS.as_bytes().to_vec())
        .file(VCS_WRAPPER, VCS_WRAPPER_CONTENTS.as_bytes().to_vec())
        .file(LOCKFILE, Vec::new())
}
