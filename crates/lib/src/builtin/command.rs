//! Builder that compiles and links through rendered shell commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use futures::StreamExt;
use futures::future::try_join_all;
use futures::stream::FuturesUnordered;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::dispatch::{render_command, select_generator};
use crate::execute::BuildContext;
use crate::hooks::Builder;
use crate::target::{TargetId, TargetKind};

#[derive(Debug, Error)]
pub enum CommandError {
  #[error("command failed with exit code {code:?}: {cmd}")]
  Failed {
    cmd: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Compiles every source with its dispatched generator, then links or
/// archives the objects with the environment's link generator.
///
/// Objects go to `<build_dir>/<source>.o` and artifacts to
/// `<build_dir>/<name><ext>`, and commands run in the root directory. Targets
/// of a batch and the sources of a target are built concurrently. Artifacts of
/// library dependencies are passed to the link step after the target's own
/// objects.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
  kinds: Vec<TargetKind>,
}

impl Default for CommandBuilder {
  fn default() -> Self {
    Self {
      kinds: vec![
        TargetKind::Executable,
        TargetKind::StaticLibrary,
        TargetKind::SharedLibrary,
      ],
    }
  }
}

impl CommandBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  async fn build_target(&self, ctx: &BuildContext, jobs: &Semaphore, id: TargetId) -> anyhow::Result<PathBuf> {
    let registry = ctx.registry();
    let label = registry.label(id);
    let def = ctx
      .target(id)
      .as_buildable()
      .ok_or_else(|| anyhow!("{label} is not buildable"))?;

    let mut inputs = try_join_all(def.sources.iter().map(|source| compile(ctx, jobs, id, source))).await?;

    for dep in ctx.graph().dependencies(id) {
      if matches!(
        ctx.target(dep).kind(),
        TargetKind::StaticLibrary | TargetKind::SharedLibrary
      ) {
        inputs.push(ctx.artifact_path(dep));
      }
    }

    let Some(link) = registry.link_generator(id)? else {
      let role = if ctx.target(id).kind() == TargetKind::StaticLibrary {
        "archiver"
      } else {
        "linker"
      };
      bail!("the environment of {label} has no {role}");
    };

    let artifact = ctx.artifact_path(id);
    let command = render_command(registry, link, id, &inputs, &artifact)?;
    prepare_output(&artifact).await?;
    run_job(ctx, jobs, &command)
      .await
      .with_context(|| format!("linking {}", artifact.display()))?;

    Ok(artifact)
  }
}

#[async_trait]
impl Builder for CommandBuilder {
  fn kinds(&self) -> &[TargetKind] {
    &self.kinds
  }

  /// Builds the batch concurrently, running at most `parallelism` commands at
  /// once. Each target is reported as soon as it finishes.
  async fn build(&self, ctx: &BuildContext, batch: &[TargetId]) -> anyhow::Result<()> {
    let jobs = Semaphore::new(ctx.config().parallelism.max(1));
    let mut pending: FuturesUnordered<_> = batch
      .iter()
      .map(|&id| {
        let jobs = &jobs;
        async move { (id, self.build_target(ctx, jobs, id).await) }
      })
      .collect();

    while let Some((id, result)) = pending.next().await {
      match result {
        Ok(artifact) => {
          info!(target = %ctx.registry().label(id), artifact = %artifact.display(), "artifact written");
          ctx.mark_built(id);
        }
        Err(e) => {
          ctx.mark_failed(id, format!("{e:#}"));
        }
      }
    }
    Ok(())
  }
}

async fn compile(ctx: &BuildContext, jobs: &Semaphore, id: TargetId, source: &Path) -> anyhow::Result<PathBuf> {
  let registry = ctx.registry();
  let generator = select_generator(registry, id, source)?;
  let object = ctx.object_path(source);
  let command = render_command(registry, generator, id, &[ctx.source_path(source)], &object)?;

  debug!(target = %registry.label(id), source = %source.display(), "compiling");
  prepare_output(&object).await?;
  run_job(ctx, jobs, &command)
    .await
    .with_context(|| format!("compiling {}", source.display()))?;
  Ok(object)
}

/// Run one command in the root directory once a job slot is free.
async fn run_job(ctx: &BuildContext, jobs: &Semaphore, command: &str) -> anyhow::Result<()> {
  let _permit = jobs.acquire().await?;
  run_command(command, ctx.root_dir(), ctx.config().shell.as_deref()).await?;
  Ok(())
}

async fn prepare_output(path: &Path) -> Result<(), CommandError> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    tokio::fs::create_dir_all(parent).await?;
  }
  Ok(())
}

/// Run `cmd` through a shell in `cwd`.
///
/// Returns the trimmed stdout on success.
pub async fn run_command(cmd: &str, cwd: &Path, shell: Option<&str>) -> Result<String, CommandError> {
  info!(cmd = %cmd, "executing command");

  let (shell_cmd, shell_args) = get_shell(shell);
  debug!(shell = %shell_cmd, working_dir = ?cwd, "spawning process");

  let output = Command::new(&shell_cmd)
    .args(&shell_args)
    .arg(cmd)
    .current_dir(cwd)
    .output()
    .await?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout);

    if !stderr.is_empty() {
      debug!(stderr = %stderr, "command stderr");
    }
    if !stdout.is_empty() {
      debug!(stdout = %stdout, "command stdout");
    }

    return Err(CommandError::Failed {
      cmd: cmd.to_string(),
      code: output.status.code(),
      stderr,
    });
  }

  let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
  if !stdout.is_empty() {
    debug!(stdout = %stdout, "command output");
  }

  Ok(stdout)
}

/// Get the shell command and argument for the current platform.
///
/// The override is used as is, with the command flag chosen by shell family.
/// Otherwise `/bin/sh` (Unix) or `cmd.exe` (Windows), never `$SHELL`, so
/// profile files cannot change the build.
fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec!["-NoProfile".to_string(), "-Command".to_string()]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    ("cmd.exe".to_string(), vec!["/C".to_string()])
  }
}
