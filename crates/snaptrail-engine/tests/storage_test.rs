use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use snaptrail_engine::config::RecorderConfig;
use snaptrail_engine::coordinator::Coordinator;
use snaptrail_engine::host::{
    DownloadRequest, Host, HostError, OverlayPlan, PageSnapshot, TabRef,
};
use snaptrail_engine::protocol::{CaptureRequest, Reply, Request};
use snaptrail_engine::session::SessionExport;
use snaptrail_engine::storage::{FileStore, Storage};

#[derive(Default)]
struct RecordingHost {
    downloads: Mutex<Vec<DownloadRequest>>,
}

#[async_trait]
impl Host for RecordingHost {
    async fn active_tab(&self) -> Result<Option<TabRef>, HostError> {
        Ok(Some(TabRef {
            id: 1,
            window_id: Some(10),
            url: "https://example.com/".to_string(),
            title: "Example".to_string(),
        }))
    }

    async fn tab_info(&self, _tab_id: u32) -> Result<TabRef, HostError> {
        Ok(self.active_tab().await?.unwrap())
    }

    async fn capture_visible(&self, _window_id: u32) -> Result<Vec<u8>, HostError> {
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn download(&self, request: DownloadRequest) -> Result<(), HostError> {
        self.downloads.lock().await.push(request);
        Ok(())
    }

    async fn page_snapshot(&self, _tab_id: u32) -> Result<PageSnapshot, HostError> {
        Ok(PageSnapshot::default())
    }

    async fn show_overlay(&self, _tab_id: u32, _plan: &OverlayPlan) -> Result<(), HostError> {
        Ok(())
    }

    async fn clear_overlay(&self, _tab_id: u32) -> Result<(), HostError> {
        Ok(())
    }
}

async fn file_storage(path: &std::path::Path) -> Storage {
    Storage::new(Arc::new(FileStore::open(path).await.unwrap()))
}

#[tokio::test]
async fn file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    {
        let storage = file_storage(&path).await;
        storage.set_session_active(true).await.unwrap();
        storage.set_debug_mode(true).await.unwrap();
        storage.set_counters(7, 3).await.unwrap();
    }

    let storage = file_storage(&path).await;
    assert!(storage.session_active().await.unwrap());
    assert!(storage.debug_mode().await.unwrap());
    assert_eq!(storage.counters().await.unwrap(), (7, 3));
}

#[tokio::test]
async fn missing_file_opens_empty() {
    let dir = tempfile::tempdir().unwrap();
    let storage = file_storage(&dir.path().join("deep/nested/state.json")).await;
    assert!(!storage.session_active().await.unwrap());
    assert_eq!(storage.counters().await.unwrap(), (0, 0));
    assert!(storage.load_session().await.unwrap().is_none());
}

#[tokio::test]
async fn corrupt_file_is_an_error_not_a_wipe() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    tokio::fs::write(&path, b"not json at all").await.unwrap();

    assert!(FileStore::open(&path).await.is_err());
    // The document was left untouched for manual recovery.
    let body = tokio::fs::read(&path).await.unwrap();
    assert_eq!(body, b"not json at all");
}

#[tokio::test]
async fn session_resumes_across_a_coordinator_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let host = Arc::new(RecordingHost::default());

    {
        let coordinator = Coordinator::new(
            host.clone(),
            file_storage(&path).await,
            RecorderConfig::default(),
        );
        coordinator.handle(Request::ToggleSession).await;
        let reply = coordinator
            .handle(Request::CaptureScreenshot(CaptureRequest::default()))
            .await;
        assert!(reply.is_success());
    }

    // A fresh coordinator over the same document picks the session back up.
    let coordinator = Coordinator::new(
        host.clone(),
        file_storage(&path).await,
        RecorderConfig::default(),
    );
    coordinator.hydrate().await.unwrap();

    assert!(coordinator.status().await.session_active);
    let session = coordinator.current_session().await.expect("session resumed");
    assert_eq!(session.domain, "example.com");
    assert_eq!(session.total_screenshots, 1);

    // Sequence numbering continues where the previous run stopped.
    let reply = coordinator
        .handle(Request::CaptureScreenshot(CaptureRequest::default()))
        .await;
    let path_taken = match reply {
        Reply::Ack(ack) => ack.filename.unwrap(),
        other => panic!("expected an ack, got {:?}", other),
    };
    assert!(path_taken.contains("002_screenshot_"), "got {}", path_taken);

    coordinator.handle(Request::ToggleSession).await;
    let downloads = host.downloads.lock().await;
    let export = downloads
        .iter()
        .find(|d| d.mime == "application/json")
        .expect("export written");
    let export: SessionExport = serde_json::from_slice(&export.data).unwrap();
    assert_eq!(export.total_screenshots, 2);
    assert_eq!(export.screenshots[0].proceeding_step, Some(2));
}
