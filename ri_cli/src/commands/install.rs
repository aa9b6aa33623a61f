use std::time::Instant;

use console::style;
use ri_core::{Error, InstallRequest, OperationKind, Status};
use ri_io::{Engine, InstallRun};
use tracing::warn;

use super::{POLL_INTERVAL, finish, progress_bar, render};

pub async fn execute(engine: &Engine, request: &InstallRequest) -> Result<(), Error> {
    let plan = request.validate()?;
    println!(
        "{} Installing {}...",
        style("==>").cyan().bold(),
        style(plan.os_type()).bold()
    );

    let run = engine.start_install(request)?;
    watch(engine, run).await
}

pub async fn execute_image(
    engine: &Engine,
    name: &str,
    access: &InstallRequest,
) -> Result<(), Error> {
    println!(
        "{} Writing image {} to disk...",
        style("==>").cyan().bold(),
        style(name).bold()
    );

    let run = engine.install_local_image(name, access)?;
    watch(engine, run).await
}

/// Poll the install record until it settles. The first Ctrl-C asks the
/// engine to stop; later ones are ignored.
async fn watch(engine: &Engine, run: InstallRun) -> Result<(), Error> {
    let start = Instant::now();
    let pb = progress_bar("install");
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    let record = loop {
        tokio::select! {
            _ = ticker.tick() => {
                let record = engine.install_progress();
                render(&pb, &record);
                if record.is_terminal() {
                    break record;
                }
            }
            signal = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                if let Err(e) = signal {
                    warn!(error = %e, "failed to listen for Ctrl-C");
                    continue;
                }
                pb.println(format!("{} Stopping installation...", style("==>").yellow().bold()));
                if let Err(e) = engine.stop_install() {
                    warn!(error = %e, "stop request rejected");
                }
            }
        }
    };
    finish(&pb, &record, OperationKind::Install);

    match record.status {
        Status::Succeeded => {
            run.wait().await;
            println!();
            println!(
                "{} Installation finished in {:.2}s, the machine will reboot into the new system",
                style("==>").cyan().bold(),
                start.elapsed().as_secs_f64()
            );
            Ok(())
        }
        Status::Stopped => {
            // Without kill_on_stop the script keeps going on its own.
            if engine.kills_on_stop() {
                run.wait().await;
            }
            println!(
                "{} Installation stopped",
                style("==>").yellow().bold()
            );
            Ok(())
        }
        _ => {
            run.wait().await;
            Err(Error::RuntimeFailure {
                message: record.message,
            })
        }
    }
}
