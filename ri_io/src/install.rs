use std::process::ExitStatus;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ri_core::{
    Error, InstallPlan, InstallRequest, OperationKey, OutputClassifier, ProgressRecord, Status,
    redact_args,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cancel::{CancelListener, CancellationGate};
use crate::script::ScriptLocation;
use crate::store::{ProgressHandle, ProgressStore};

/// How long a terminated script gets to exit before it is killed outright.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Runs the reinstall script and tracks it under [`OperationKey::Install`].
pub struct InstallSupervisor {
    store: ProgressStore,
    gate: Arc<CancellationGate>,
    script: ScriptLocation,
    classifier: Arc<OutputClassifier>,
    kill_on_stop: bool,
    /// Held while a run is registered and armed, so a stop never sees one
    /// without the other.
    launch: Mutex<()>,
}

/// The background task of one install run.
pub struct InstallRun {
    task: JoinHandle<()>,
}

impl InstallRun {
    /// Wait until the script has exited and its terminal state is recorded.
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            error!(error = %e, "install supervisor task failed");
        }
    }
}

enum Outcome {
    Exited(ExitStatus),
    Cancelled(Option<ExitStatus>),
}

impl InstallSupervisor {
    pub fn new(store: ProgressStore, script: ScriptLocation) -> Self {
        store.set(OperationKey::Install, ProgressRecord::ready());
        Self {
            store,
            gate: Arc::new(CancellationGate::new()),
            script,
            classifier: Arc::new(OutputClassifier::default()),
            kill_on_stop: false,
            launch: Mutex::new(()),
        }
    }

    pub fn with_classifier(mut self, classifier: OutputClassifier) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Also terminate the script when a stop is accepted. Without this a
    /// stop only detaches the record from the still-running process.
    pub fn kill_on_stop(mut self, kill: bool) -> Self {
        self.kill_on_stop = kill;
        self
    }

    pub fn script(&self) -> &ScriptLocation {
        &self.script
    }

    pub fn kills_on_stop(&self) -> bool {
        self.kill_on_stop
    }

    pub fn validate(&self, request: &InstallRequest) -> Result<InstallPlan, Error> {
        request.validate()
    }

    /// Validate `request` and launch the script in the background. Must be
    /// called from within a tokio runtime.
    pub fn start(&self, request: &InstallRequest) -> Result<InstallRun, Error> {
        let plan = self.validate(request)?;
        let (handle, listener) = {
            let _launch = self.lock_launch();
            let handle = self.store.begin(
                OperationKey::Install,
                ProgressRecord::started("starting installation"),
            )?;
            (handle, self.gate.arm())
        };
        let args = plan.args();

        info!(
            os = %plan.os_type(),
            args = ?redact_args(&args),
            script = %self.script.path().display(),
            "starting installation"
        );

        let run = ScriptRun {
            handle,
            gate: self.gate.clone(),
            script: self.script.clone(),
            classifier: self.classifier.clone(),
            kill_on_stop: self.kill_on_stop,
        };
        let task = tokio::spawn(run.supervise(args, listener));
        Ok(InstallRun { task })
    }

    pub fn stop(&self) -> Result<(), Error> {
        let _launch = self.lock_launch();
        let running = self
            .store
            .get(&OperationKey::Install)
            .is_some_and(|record| record.status == Status::Running);
        if !running {
            return Err(Error::NothingRunning);
        }

        self.gate.signal()?;
        if self.store.finish(
            &OperationKey::Install,
            Status::Stopped,
            None,
            "installation stopped",
        ) {
            info!("installation stopped");
        } else {
            warn!("stop accepted but the installation had already finished");
        }
        Ok(())
    }

    pub fn progress(&self) -> ProgressRecord {
        self.store
            .get(&OperationKey::Install)
            .unwrap_or_else(ProgressRecord::ready)
    }

    fn lock_launch(&self) -> MutexGuard<'_, ()> {
        self.launch.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct ScriptRun {
    handle: ProgressHandle,
    gate: Arc<CancellationGate>,
    script: ScriptLocation,
    classifier: Arc<OutputClassifier>,
    kill_on_stop: bool,
}

impl ScriptRun {
    async fn supervise(self, args: Vec<String>, mut listener: CancelListener) {
        match self.execute(&args, &mut listener).await {
            Ok(Outcome::Exited(status)) if status.success() => {
                info!("installation complete");
                self.handle
                    .finish(Status::Succeeded, Some(100), "installation complete");
            }
            Ok(Outcome::Exited(status)) => {
                let err = Error::RuntimeFailure {
                    message: format!("installation failed: reinstall script exited with {status}"),
                };
                warn!(%status, "installation failed");
                self.handle.finish(Status::Failed, None, err.to_string());
            }
            Ok(Outcome::Cancelled(status)) => {
                info!(status = ?status, "stopped installation has exited");
            }
            Err(err) => {
                warn!(error = %err, "installation failed");
                self.handle.finish(Status::Failed, None, err.to_string());
            }
        }
        self.gate.disarm(&listener);
    }

    async fn execute(
        &self,
        args: &[String],
        listener: &mut CancelListener,
    ) -> Result<Outcome, Error> {
        let mut cmd = self.script.command(args)?;
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| Error::SpawnFailure {
            message: format!("failed to launch {}: {e}", self.script.path().display()),
        })?;
        debug!(pid = ?child.id(), "reinstall script spawned");
        self.handle.set_message("running reinstall script");

        if let Some(stdout) = child.stdout.take() {
            self.spawn_reader(stdout, "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            self.spawn_reader(stderr, "stderr");
        }

        tokio::select! {
            status = child.wait() => status.map(Outcome::Exited).map_err(|e| Error::RuntimeFailure {
                message: format!("failed to wait for reinstall script: {e}"),
            }),
            _ = listener.cancelled() => {
                if self.kill_on_stop {
                    terminate(&mut child).await;
                }
                Ok(Outcome::Cancelled(child.wait().await.ok()))
            }
        }
    }

    /// Drain one output stream line by line. The reader ends on its own when
    /// the stream closes, independently of the other stream and of the wait.
    fn spawn_reader<R>(&self, stream: R, source: &'static str)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let handle = self.handle.clone();
        let classifier = self.classifier.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stream);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        let line = line.trim_end();
                        debug!(stream = source, "{line}");
                        if let Some(update) = classifier.classify(line) {
                            handle.update(update.percentage, update.message);
                        }
                    }
                    Err(e) => {
                        warn!(stream = source, error = %e, "stopped reading script output");
                        break;
                    }
                }
            }
        });
    }
}

async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // The script leads its own process group, so this reaches its children too.
            let group = -(pid as libc::pid_t);
            let rc = unsafe { libc::kill(group, libc::SIGTERM) };
            if rc == 0 && tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_ok() {
                return;
            }
            // Children left alive would keep the output pipes open.
            unsafe { libc::kill(group, libc::SIGKILL) };
        }
    }

    if let Err(e) = child.start_kill() {
        warn!(error = %e, "failed to kill reinstall script");
    }
}
