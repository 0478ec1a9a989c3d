//! Producer that runs an external scanner as a child process.
//!
//! The child is spawned with `kill_on_drop`, so when the worker runtime gives
//! up on an instruction after its timeout the process is killed rather than
//! left running in the background.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::Command;

use crate::payload::JobInstruction;

use super::adapter::{Producer, RawOutput, Trace};

/// Runs `program args..` per instruction and treats stdout as the raw output.
///
/// Arguments may contain `{repo}`, `{git_url}`, `{branch}` and `{job_id}`
/// placeholders. The child also sees `CBOM_JOB_ID`, `CBOM_WORKER`,
/// `CBOM_REPO`, `CBOM_GIT_URL` and `CBOM_BRANCH`.
#[derive(Clone, Debug)]
pub struct CommandProducer {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
}

impl CommandProducer {
    pub fn new<I, A>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            envs: Vec::new(),
            current_dir: None,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn with_current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments with the instruction's placeholders filled in.
    pub fn render_args(&self, instruction: &JobInstruction) -> Vec<String> {
        let job_id = instruction.job_id.to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{repo}", &instruction.repo.full_name)
                    .replace("{git_url}", &instruction.repo.clone_url)
                    .replace("{branch}", instruction.repo.effective_branch())
                    .replace("{job_id}", &job_id)
            })
            .collect()
    }
}

#[async_trait]
impl Producer for CommandProducer {
    async fn produce(&self, instruction: &JobInstruction, trace: &mut Trace) -> anyhow::Result<RawOutput> {
        let args = self.render_args(instruction);
        trace.add(format!("cmd: {} {}", self.program, args.join(" ")));

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .env("CBOM_JOB_ID", instruction.job_id.to_string())
            .env("CBOM_WORKER", &instruction.worker)
            .env("CBOM_REPO", &instruction.repo.full_name)
            .env("CBOM_GIT_URL", &instruction.repo.clone_url)
            .env("CBOM_BRANCH", instruction.repo.effective_branch())
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        let started = Instant::now();
        let output = match command.output().await {
            Ok(output) => output,
            Err(err) => {
                trace.add_error("spawn", &err, None, None);
                return Err(err).with_context(|| format!("failed to start `{}`", self.program));
            }
        };
        let duration = started.elapsed();

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            trace.add_error(&self.program, output.status, Some(stdout.as_ref()), Some(stderr.as_ref()));
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |code| code.to_string());
            anyhow::bail!("{}_failed rc={code}", self.program);
        }

        tracing::debug!(
            program = %self.program,
            job_id = %instruction.job_id,
            bytes = output.stdout.len(),
            duration_secs = duration.as_secs_f64(),
            "producer finished"
        );
        Ok(RawOutput::new(stdout.into_owned()).with_duration(duration))
    }
}
