//! End-to-end export lifecycle against the in-memory gateway.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use rgwfs::{
    AttrList, AttrMask, ExportParams, MemoryGateway, ModuleConfig, ObjectKey, ObjectStat, RawTime, RgwExport,
    RgwModule, StatusCode, UpcallOps, WireHandle,
};

#[derive(Debug, Default)]
struct RecordingUpcall {
    invalidated: Mutex<Vec<u64>>,
    updated: Mutex<Vec<(u64, Option<u64>)>>,
}

impl UpcallOps for RecordingUpcall {
    fn invalidate(&self, handle_id: u64, _key: ObjectKey) {
        self.invalidated.lock().push(handle_id);
    }

    fn update(&self, handle_id: u64, _key: ObjectKey, attrs: &AttrList) {
        self.updated.lock().push((handle_id, attrs.size()));
    }
}

fn params() -> ExportParams {
    ExportParams::new("tester", "key", "secret")
}

async fn setup(gateway: &MemoryGateway) -> (Arc<RgwExport>, Arc<RecordingUpcall>) {
    let upcall = Arc::new(RecordingUpcall::default());
    let module = RgwModule::new(ModuleConfig::default(), Arc::new(gateway.clone()));
    let export = module.create_export(&params(), upcall.clone()).await.unwrap();
    (export, upcall)
}

#[tokio::test]
async fn bootstrap_failure_leaves_no_connection() {
    let gateway = MemoryGateway::new();
    gateway.fail_root_lookup(-libc::ENOENT);
    let module = RgwModule::new(ModuleConfig::default(), Arc::new(gateway.clone()));

    let err = module
        .create_export(&params(), Arc::new(RecordingUpcall::default()))
        .await
        .unwrap_err();
    assert_eq!(err.major, StatusCode::NotFound);
    assert_eq!(gateway.open_connections(), 0);

    gateway.clear_failures();
    let export = module.create_export(&params(), Arc::new(RecordingUpcall::default())).await.unwrap();
    export.release().await.unwrap();
}

#[tokio::test]
async fn bootstrap_survives_umount_failure_on_cleanup() {
    let gateway = MemoryGateway::new();
    gateway.fail_root_lookup(-libc::EIO);
    gateway.fail_umount(libc::EBUSY);
    let module = RgwModule::new(ModuleConfig::default(), Arc::new(gateway.clone()));

    let err = module
        .create_export(&params(), Arc::new(RecordingUpcall::default()))
        .await
        .unwrap_err();
    // The root lookup failure is reported, not the cleanup failure.
    assert_eq!(err.major, StatusCode::Io);
    assert_eq!(err.minor, libc::EIO as u32);
}

#[tokio::test]
async fn release_invalidates_live_handles() {
    let gateway = MemoryGateway::new();
    gateway.add_file("/docs/readme.md", 42, 0o644);
    let (export, upcall) = setup(&gateway).await;

    let root_id = export.root().unwrap().id();
    let file = export.lookup_path("/docs/readme.md").await.unwrap();

    export.release().await.unwrap();
    let invalidated: HashSet<u64> = upcall.invalidated.lock().iter().copied().collect();
    assert_eq!(invalidated, HashSet::from([root_id, file.id()]));

    assert_eq!(file.getattrs().await.unwrap_err().major, StatusCode::Stale);
    assert_eq!(file.lookup("x").await.unwrap_err().major, StatusCode::Stale);
    file.close().unwrap_err();

    export.release().await.unwrap();
    assert_eq!(upcall.invalidated.lock().len(), 2);
    assert_eq!(gateway.open_connections(), 0);
}

#[tokio::test]
async fn concurrent_lookups_get_unique_ids() {
    let gateway = MemoryGateway::new();
    for i in 0..8 {
        gateway.add_file(&format!("/bucket/file-{i}"), i, 0o644);
    }
    let (export, _upcall) = setup(&gateway).await;

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..64 {
        let export = Arc::clone(&export);
        tasks.spawn(async move { export.lookup_path(&format!("/bucket/file-{}", i % 8)).await.unwrap() });
    }

    let mut handles = Vec::new();
    while let Some(handle) = tasks.join_next().await {
        handles.push(handle.unwrap());
    }
    let ids: HashSet<u64> = handles.iter().map(|h| h.id()).collect();
    assert_eq!(ids.len(), handles.len());

    drop(handles);
    export.release().await.unwrap();
}

#[tokio::test]
async fn wire_handle_reaches_same_handle() {
    let gateway = MemoryGateway::new();
    gateway.add_file("/bucket/obj", 7, 0o600);
    let (export, _upcall) = setup(&gateway).await;
    let handle = export.lookup_path("/bucket/obj").await.unwrap();

    let bytes = handle.to_wire().unwrap();
    let wire = export.wire_to_host(&bytes).unwrap();
    let again = export.create_handle(&wire).await.unwrap();
    assert!(Arc::ptr_eq(&handle, &again));

    // Once the handle is gone the key is looked up afresh.
    let key = handle.key();
    drop((handle, again));
    let rebuilt = export.create_handle(&wire).await.unwrap();
    assert_eq!(rebuilt.key(), key);
    assert_ne!(rebuilt.id(), wire.id);

    let mut corrupt = bytes.clone();
    corrupt.push(0);
    assert_eq!(export.wire_to_host(&corrupt).unwrap_err().major, StatusCode::BadHandle);
    assert_eq!(export.wire_to_host(&[0u8; 80]).unwrap_err().major, StatusCode::BadHandle);

    let missing = WireHandle::new(999, ObjectKey::new(77, 77));
    assert_eq!(export.create_handle(&missing).await.unwrap_err().major, StatusCode::Stale);
    drop(rebuilt);
    export.release().await.unwrap();
}

#[tokio::test]
async fn getattrs_pushes_changes_upward() {
    let gateway = MemoryGateway::new();
    let key = gateway.add_file("/bucket/log", 10, 0o644);
    let (export, upcall) = setup(&gateway).await;
    let handle = export.lookup_path("/bucket/log").await.unwrap();

    let attrs = handle.getattrs().await.unwrap();
    assert_eq!(attrs.size(), Some(10));
    assert!(upcall.updated.lock().is_empty());

    let grown = ObjectStat::file(2048, 0o644).with_times(RawTime::new(1_700_000_100, 0));
    assert!(gateway.set_stat(key, grown));
    let attrs = handle.getattrs().await.unwrap();
    assert_eq!(attrs.size(), Some(2048));
    assert!(attrs.is_reported(AttrMask::CHGTIME));
    assert_eq!(*upcall.updated.lock(), vec![(handle.id(), Some(2048))]);

    drop(handle);
    export.release().await.unwrap();
}

#[tokio::test]
async fn removed_objects_report_stale() {
    let gateway = MemoryGateway::new();
    gateway.add_file("/bucket/tmp", 1, 0o644);
    let (export, _upcall) = setup(&gateway).await;
    let handle = export.lookup_path("/bucket/tmp").await.unwrap();

    assert!(gateway.remove("/bucket/tmp"));
    let err = handle.getattrs().await.unwrap_err();
    assert_eq!(err.major, StatusCode::Stale);
    assert_eq!(err.minor, libc::ESTALE as u32);
    assert_eq!(
        export.lookup_path("/bucket/tmp").await.unwrap_err().major,
        StatusCode::NotFound
    );

    drop(handle);
    export.release().await.unwrap();
}

#[tokio::test]
async fn dropped_handles_release_their_keys() {
    let gateway = MemoryGateway::new();
    let key = gateway.add_file("/bucket/a", 1, 0o644);
    let (export, _upcall) = setup(&gateway).await;

    let handle = export.lookup_path("/bucket/a").await.unwrap();
    let live = export.live_handles();
    drop(handle);
    assert_eq!(export.live_handles(), live - 1);
    assert!(gateway.released_keys().contains(&key));

    assert!(export.check_settable(AttrMask::MODE | AttrMask::OWNER).is_ok());
    assert_eq!(
        export.check_settable(AttrMask::FILEID).unwrap_err().major,
        StatusCode::InvalidArgument
    );
    export.release().await.unwrap();
}
