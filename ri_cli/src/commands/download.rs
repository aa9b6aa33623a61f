use std::time::Instant;

use console::style;
use ri_core::{Error, OperationKind, Status};
use ri_io::{DownloadResource, Engine};

use super::{POLL_INTERVAL, finish, progress_bar, render};

pub async fn execute(engine: &Engine, resource: DownloadResource) -> Result<(), Error> {
    let start = Instant::now();
    let name = resource.name.clone();
    println!(
        "{} Downloading {} from {}",
        style("==>").cyan().bold(),
        style(&name).bold(),
        style(&resource.url).dim()
    );

    let run = engine.start_download(resource)?;
    let destination = run.destination().to_path_buf();
    let pb = progress_bar(&name);
    let mut ticker = tokio::time::interval(POLL_INTERVAL);

    let record = loop {
        ticker.tick().await;
        let Some(record) = engine.download_progress(&name) else {
            continue;
        };
        render(&pb, &record);
        if record.is_terminal() {
            break record;
        }
    };
    finish(&pb, &record, OperationKind::Download);
    run.wait().await;

    if record.status != Status::Succeeded {
        return Err(Error::RuntimeFailure {
            message: record.message,
        });
    }

    println!();
    println!(
        "{} Saved {} in {:.2}s",
        style("==>").cyan().bold(),
        style(destination.display()).green(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
