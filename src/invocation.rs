//! Structured container invocations.
//!
//! Builds the argument vector for `<runtime> run ...` from a language
//! profile, a workspace and the resource limits. Nothing here goes through a
//! shell on the host. Compiled languages need two steps inside the container,
//! so they run a fixed `sh -c` script that receives every path as a
//! positional parameter; neither paths nor source code are ever spliced into
//! script text.

use std::path::PathBuf;

use crate::config::{Limits, RuntimeConfig};
use crate::language::{BuildAndRun, LanguageProfile};
use crate::workspace::Workspace;

/// `$1` source, `$2` artifact, `$3..` compiler and flags.
const COMPILE_SCRIPT: &str = r#"src="$1"; out="$2"; shift 2; "$@" "$src" -o "$out" && exec "$out""#;

/// `$1` source, `$2` class path, `$3` unit, `$4` compiler, `$5` runtime.
const CLASS_PATH_SCRIPT: &str = r#""$4" "$1" && exec "$5" -cp "$2" "$3""#;

/// Prefix of every container name, so leftovers are easy to find.
pub const CONTAINER_PREFIX: &str = "sandbox-runner-";

/// A fully resolved container run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Container CLI program.
    pub program: String,
    /// Arguments after the program.
    pub args: Vec<String>,
    /// Name given to the container, used to remove it on timeout.
    pub container_name: String,
    /// Workspace directory as mounted inside the container.
    pub mount: String,
    /// Host file the runtime writes the container id to once it exists.
    pub cidfile: PathBuf,
}

impl Invocation {
    /// Build the `run` invocation for one request.
    pub fn build(
        profile: &LanguageProfile,
        workspace: &Workspace,
        limits: &Limits,
        runtime: &RuntimeConfig,
    ) -> Self {
        let container_name = format!("{CONTAINER_PREFIX}{}", workspace.run_id());
        let mount = workspace.execution_root().to_string();
        let memory = format!("{}m", limits.memory_mb);

        let cidfile = workspace.cidfile_path().to_path_buf();

        let mut args: Vec<String> = vec![
            "run".into(),
            "--rm".into(),
            "--name".into(),
            container_name.clone(),
            "--cidfile".into(),
            cidfile.to_string_lossy().into_owned(),
            "--network".into(),
            if runtime.network { "bridge" } else { "none" }.into(),
            "--cpus".into(),
            limits.cpus.to_string(),
            "--memory".into(),
            memory.clone(),
            "--memory-swap".into(),
            memory,
            "--pids-limit".into(),
            limits.pids_limit.to_string(),
        ];
        if let Some((uid, gid)) = workspace.owner() {
            args.extend(["--user".into(), format!("{uid}:{gid}")]);
        }
        args.extend([
            "--volume".into(),
            format!("{mount}:{mount}"),
            "--workdir".into(),
            mount.clone(),
            profile.image.clone(),
        ]);
        args.extend(command(profile, workspace));

        Self {
            program: runtime.program.clone(),
            args,
            container_name,
            mount,
            cidfile,
        }
    }
}

/// The command run inside the container.
fn command(profile: &LanguageProfile, workspace: &Workspace) -> Vec<String> {
    let source = workspace.execution_source();
    let artifact = workspace.execution_artifact().unwrap_or_default();

    match &profile.build_and_run {
        BuildAndRun::Interpret { program, args } => {
            let mut cmd = vec![program.clone()];
            cmd.extend(args.iter().cloned());
            cmd.push(source);
            cmd
        }
        BuildAndRun::Compile { compiler, flags } => {
            let mut cmd = shell_script(COMPILE_SCRIPT);
            cmd.extend([source, artifact, compiler.clone()]);
            cmd.extend(flags.iter().cloned());
            cmd
        }
        BuildAndRun::ClassPath { compiler, runtime } => {
            let unit = workspace
                .source_path()
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut cmd = shell_script(CLASS_PATH_SCRIPT);
            cmd.extend([
                source,
                workspace.execution_root().to_string(),
                unit,
                compiler.clone(),
                runtime.clone(),
            ]);
            cmd
        }
    }
}

fn shell_script(script: &str) -> Vec<String> {
    // The trailing "sh" becomes $0 so the paths start at $1.
    vec!["sh".into(), "-c".into(), script.into(), "sh".into()]
}
