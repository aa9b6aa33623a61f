use std::path::{Path, PathBuf};
use std::time::Instant;

use futures_util::StreamExt;
use ri_core::{Error, OperationKey, ProgressRecord, Status, TransferMeter};
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::library::ImageLibrary;
use crate::store::{ProgressHandle, ProgressStore};

/// A named remote image to fetch into the local library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadResource {
    pub name: String,
    pub url: String,
}

impl DownloadResource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Streams images over HTTP, one progress record per image name.
pub struct DownloadSupervisor {
    client: reqwest::Client,
    store: ProgressStore,
    library: ImageLibrary,
}

/// The background task of one download.
pub struct DownloadRun {
    destination: PathBuf,
    task: JoinHandle<()>,
}

impl DownloadRun {
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Wait until the transfer has ended and its terminal state is recorded.
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            error!(error = %e, "download task failed");
        }
    }
}

impl DownloadSupervisor {
    pub fn new(client: reqwest::Client, store: ProgressStore, library: ImageLibrary) -> Self {
        Self {
            client,
            store,
            library,
        }
    }

    pub fn library(&self) -> &ImageLibrary {
        &self.library
    }

    /// Check the resource and launch the transfer in the background. Must be
    /// called from within a tokio runtime.
    pub fn start(&self, resource: DownloadResource) -> Result<DownloadRun, Error> {
        let url = resource.url.trim();
        if url.is_empty() {
            return Err(Error::InvalidRequest {
                message: "download url is required".to_string(),
            });
        }
        let destination = self.library.path_of(&resource.name)?;

        let key = OperationKey::download(&resource.name);
        if self.is_running(&key) {
            return Err(Error::AlreadyRunning {
                key: key.to_string(),
            });
        }
        if destination.exists() {
            return Err(Error::AlreadyExists {
                path: destination.display().to_string(),
            });
        }

        let handle = self
            .store
            .begin(key, ProgressRecord::started("starting download"))?;
        info!(name = %resource.name, url, dest = %destination.display(), "starting download");

        let transfer = Transfer {
            client: self.client.clone(),
            url: url.to_string(),
            destination: destination.clone(),
            handle,
        };
        let task = tokio::spawn(transfer.supervise());
        Ok(DownloadRun { destination, task })
    }

    pub fn progress(&self, name: &str) -> Option<ProgressRecord> {
        self.store.get(&OperationKey::download(name))
    }

    pub fn is_running(&self, key: &OperationKey) -> bool {
        self.store
            .get(key)
            .is_some_and(|record| record.status == Status::Running)
    }
}

struct Transfer {
    client: reqwest::Client,
    url: String,
    destination: PathBuf,
    handle: ProgressHandle,
}

impl Transfer {
    async fn supervise(self) {
        match self.fetch().await {
            Ok(bytes) => {
                info!(dest = %self.destination.display(), bytes, "download complete");
                self.handle
                    .finish(Status::Succeeded, Some(100), "download complete");
            }
            Err(err) => {
                // Whatever was written stays on disk for inspection.
                warn!(url = %self.url, error = %err, "download failed");
                self.handle.finish(Status::Failed, None, err.to_string());
            }
        }
    }

    async fn fetch(&self) -> Result<u64, Error> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| failure(format!("download failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(failure(format!("HTTP {}", status.as_u16())));
        }

        let total = response.content_length();
        debug!(?total, "download response received");

        if let Some(parent) = self.destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| failure(format!("failed to create {}: {e}", parent.display())))?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.destination)
            .await
            .map_err(|e| {
                failure(format!(
                    "failed to create {}: {e}",
                    self.destination.display()
                ))
            })?;

        let started = Instant::now();
        let mut meter = TransferMeter::new(total);
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| failure(format!("download interrupted: {e}")))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| failure(format!("failed to write image: {e}")))?;

            let percentage = meter.record(chunk.len() as u64);
            let elapsed = started.elapsed();
            self.handle.set_transfer(
                percentage,
                "downloading",
                meter.speed(elapsed),
                meter.eta(elapsed),
            );
        }

        file.flush()
            .await
            .map_err(|e| failure(format!("failed to write image: {e}")))?;
        Ok(meter.received())
    }
}

fn failure(message: String) -> Error {
    Error::RuntimeFailure { message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::time::{sleep, timeout};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn supervisor(dir: &Path) -> DownloadSupervisor {
        DownloadSupervisor::new(
            reqwest::Client::new(),
            ProgressStore::new(),
            ImageLibrary::new(dir, "vhd"),
        )
    }

    /// Serve one response by hand so chunk pacing and framing can be
    /// controlled. With `declared_len` unset the body runs until close.
    async fn serve_once(
        chunks: Vec<Vec<u8>>,
        declared_len: Option<usize>,
        pause: Duration,
    ) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
            }

            let head = match declared_len {
                Some(len) => format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n"
                ),
                None => "HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n".to_string(),
            };
            socket.write_all(head.as_bytes()).await.unwrap();
            for chunk in chunks {
                if socket.write_all(&chunk).await.is_err() {
                    return;
                }
                let _ = socket.flush().await;
                sleep(pause).await;
            }
        });
        format!("http://{addr}/image.vhd")
    }

    #[tokio::test]
    async fn downloads_into_library_and_completes() {
        let server = MockServer::start().await;
        let body = vec![7u8; 1_000_000];
        Mock::given(method("GET"))
            .and(path("/win11.vhd"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .expect(1)
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let downloads = supervisor(&tmp.path().join("vhd"));
        let run = downloads
            .start(DownloadResource::new(
                "win11",
                format!("{}/win11.vhd", server.uri()),
            ))
            .unwrap();
        assert_eq!(run.destination(), tmp.path().join("vhd/win11.vhd"));
        run.wait().await;

        let record = downloads.progress("win11").unwrap();
        assert_eq!(record.status, Status::Succeeded);
        assert_eq!(record.percentage, 100);
        assert_eq!(record.message, "download complete");
        assert!(record.speed.is_some());
        assert!(record.eta.is_none());
        assert_eq!(
            std::fs::read(tmp.path().join("vhd/win11.vhd")).unwrap(),
            body
        );
    }

    #[tokio::test]
    async fn existing_destination_is_rejected_without_a_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"new".to_vec()))
            .expect(0)
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("centos.vhd"), b"old").unwrap();
        let downloads = supervisor(tmp.path());

        let err = downloads
            .start(DownloadResource::new(
                "centos",
                format!("{}/centos.vhd", server.uri()),
            ))
            .err()
            .unwrap();
        assert!(matches!(err, Error::AlreadyExists { .. }));
        assert!(downloads.progress("centos").is_none());
        assert_eq!(std::fs::read(tmp.path().join("centos.vhd")).unwrap(), b"old");
    }

    #[tokio::test]
    async fn http_error_status_fails_the_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let downloads = supervisor(tmp.path());
        downloads
            .start(DownloadResource::new(
                "gone",
                format!("{}/gone.vhd", server.uri()),
            ))
            .unwrap()
            .wait()
            .await;

        let record = downloads.progress("gone").unwrap();
        assert_eq!(record.status, Status::Failed);
        assert!(record.message.contains("404"), "{}", record.message);
        assert!(!tmp.path().join("gone.vhd").exists());
    }

    #[tokio::test]
    async fn local_write_failure_fails_the_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![5u8; 1024]))
            .mount(&server)
            .await;

        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("vhd");
        std::fs::write(&blocker, b"not a directory").unwrap();
        let downloads = supervisor(&blocker);

        downloads
            .start(DownloadResource::new(
                "win11",
                format!("{}/win11.vhd", server.uri()),
            ))
            .unwrap()
            .wait()
            .await;

        let record = downloads.progress("win11").unwrap();
        assert_eq!(record.status, Status::Failed);
        assert!(record.message.contains("failed to create"), "{}", record.message);
        assert_eq!(std::fs::read(&blocker).unwrap(), b"not a directory");
    }

    #[tokio::test]
    async fn missing_name_or_url_is_invalid() {
        let tmp = TempDir::new().unwrap();
        let downloads = supervisor(tmp.path());
        for resource in [
            DownloadResource::new("", "http://localhost/x.vhd"),
            DownloadResource::new("x", "  "),
        ] {
            assert!(matches!(
                downloads.start(resource).err().unwrap(),
                Error::InvalidRequest { .. }
            ));
        }
        assert!(downloads.store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn percentage_climbs_with_received_chunks() {
        let chunks: Vec<Vec<u8>> = (0..10).map(|_| vec![1u8; 100_000]).collect();
        let url = serve_once(chunks, Some(1_000_000), Duration::from_millis(40)).await;

        let tmp = TempDir::new().unwrap();
        let downloads = Arc::new(supervisor(tmp.path()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let poller = {
            let downloads = downloads.clone();
            let seen = seen.clone();
            tokio::spawn(async move {
                loop {
                    if let Some(record) = downloads.progress("paced") {
                        seen.lock().unwrap().push(record.percentage);
                        if record.is_terminal() {
                            break;
                        }
                    }
                    sleep(Duration::from_millis(5)).await;
                }
            })
        };

        downloads
            .start(DownloadResource::new("paced", url))
            .unwrap()
            .wait()
            .await;
        timeout(Duration::from_secs(5), poller).await.unwrap().unwrap();

        let seen = seen.lock().unwrap().clone();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
        assert!(seen.iter().any(|p| *p > 0 && *p < 100), "{seen:?}");
        assert_eq!(seen.last(), Some(&100));
        assert_eq!(
            std::fs::metadata(tmp.path().join("paced.vhd")).unwrap().len(),
            1_000_000
        );
    }

    #[tokio::test]
    async fn unknown_length_stays_at_zero_until_complete() {
        let chunks: Vec<Vec<u8>> = (0..3).map(|_| vec![2u8; 4096]).collect();
        let url = serve_once(chunks, None, Duration::from_millis(150)).await;

        let tmp = TempDir::new().unwrap();
        let downloads = supervisor(tmp.path());
        let run = downloads.start(DownloadResource::new("stream", url)).unwrap();

        timeout(Duration::from_secs(5), async {
            while downloads.progress("stream").unwrap().message != "downloading" {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        let midway = downloads.progress("stream").unwrap();
        assert_eq!(midway.percentage, 0);
        assert_eq!(midway.status, Status::Running);

        run.wait().await;
        let record = downloads.progress("stream").unwrap();
        assert_eq!(record.status, Status::Succeeded);
        assert_eq!(record.percentage, 100);
    }

    #[tokio::test]
    async fn truncated_body_fails_and_keeps_partial_file() {
        let url = serve_once(vec![vec![3u8; 500]], Some(1000), Duration::ZERO).await;

        let tmp = TempDir::new().unwrap();
        let downloads = supervisor(tmp.path());
        downloads
            .start(DownloadResource::new("partial", url))
            .unwrap()
            .wait()
            .await;

        let record = downloads.progress("partial").unwrap();
        assert_eq!(record.status, Status::Failed);
        assert_ne!(record.percentage, 100);
        assert!(tmp.path().join("partial.vhd").exists());
    }

    #[tokio::test]
    async fn same_name_cannot_download_twice_at_once() {
        let chunks: Vec<Vec<u8>> = (0..5).map(|_| vec![4u8; 1024]).collect();
        let url = serve_once(chunks, Some(5 * 1024), Duration::from_millis(100)).await;

        let tmp = TempDir::new().unwrap();
        let downloads = supervisor(tmp.path());
        let run = downloads
            .start(DownloadResource::new("busy", url.clone()))
            .unwrap();

        let err = downloads
            .start(DownloadResource::new("busy", url))
            .err()
            .unwrap();
        assert_eq!(
            err,
            Error::AlreadyRunning {
                key: "download:busy".into()
            }
        );

        run.wait().await;
        assert_eq!(
            downloads.progress("busy").unwrap().status,
            Status::Succeeded
        );
    }
}
