use std::time::Duration;

use serial_courier_lib::config::TransferConfig;
use serial_courier_lib::serial::fake::{DeviceStorage, SimulatedDevice};
use serial_courier_lib::serial::ProtocolTokens;
use serial_courier_lib::transfer::{LogProgress, NoProgress};
use serial_courier_lib::DeviceManager;

async fn recorder(storage: DeviceStorage) -> DeviceManager {
    let device = SimulatedDevice::with_storage(ProtocolTokens::default(), storage);
    DeviceManager::attach(Box::new(device), TransferConfig::default())
        .await
        .expect("simulated recorder boots")
}

#[tokio::test(start_paused = true)]
async fn uploaded_file_downloads_identically() {
    let dir = tempfile::tempdir().unwrap();
    let content: Vec<u8> = (0..3000u32).map(|i| (i * 7 % 256) as u8).collect();
    let source = dir.path().join("pso_data.bin");
    std::fs::write(&source, &content).unwrap();

    let storage = DeviceStorage::default();
    let mut manager = recorder(storage.clone()).await;

    let upload = manager.upload_file(&source, &mut LogProgress::default()).await;
    assert!(upload.is_success(), "{:?}", upload.status);
    assert_eq!(
        storage.lock().unwrap().get("pso_data.bin").map(Vec::len),
        Some(3000)
    );

    let dest = dir.path().join("downloads");
    let download = manager
        .download_file("pso_data.bin", &dest, &mut LogProgress::default())
        .await;
    assert!(download.is_success(), "{:?}", download.status);
    assert_eq!(download.declared_size, 3000);
    assert_eq!(download.checksum(), upload.checksum());
    assert_eq!(std::fs::read(dest.join("pso_data.bin")).unwrap(), content);

    manager.disconnect();
}

#[tokio::test(start_paused = true)]
async fn repeated_download_overwrites_with_same_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let storage = DeviceStorage::default();
    storage
        .lock()
        .unwrap()
        .insert("DADOS.txt".to_string(), b"10 20 30\n40 50 60\n".to_vec());
    let mut manager = recorder(storage).await;

    let target = dir.path().join("DADOS.txt");
    std::fs::write(&target, b"stale contents that are longer than the real file").unwrap();

    let transfers = manager
        .download_files(&["DADOS.txt", "DADOS.txt"], dir.path(), &mut NoProgress)
        .await;
    assert_eq!(transfers.len(), 2);
    assert!(transfers.iter().all(|t| t.is_success()));
    assert_eq!(transfers[0].checksum(), transfers[1].checksum());
    assert_eq!(std::fs::read(&target).unwrap(), b"10 20 30\n40 50 60\n");
}

#[tokio::test(start_paused = true)]
async fn nested_source_is_stored_under_base_name() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("exp1").join("run2");
    std::fs::create_dir_all(&nested).unwrap();
    let source = nested.join("CONVERG.txt");
    std::fs::write(&source, b"0.001\n0.0005\n").unwrap();

    let storage = DeviceStorage::default();
    let mut manager = recorder(storage.clone()).await;
    let upload = manager.upload_file(&source, &mut NoProgress).await;

    assert!(upload.is_success(), "{:?}", upload.status);
    assert_eq!(upload.filename, "CONVERG.txt");
    let card = storage.lock().unwrap();
    assert_eq!(card.len(), 1);
    assert_eq!(card.get("CONVERG.txt").unwrap(), b"0.001\n0.0005\n");
}

#[tokio::test(start_paused = true)]
async fn missing_remote_file_leaves_session_usable() {
    let dir = tempfile::tempdir().unwrap();
    let storage = DeviceStorage::default();
    storage
        .lock()
        .unwrap()
        .insert("DADOS.txt".to_string(), b"ok".to_vec());
    let mut manager = recorder(storage).await;

    let start = tokio::time::Instant::now();
    let transfers = manager
        .download_files(&["NAO_EXISTE.txt", "DADOS.txt"], dir.path(), &mut NoProgress)
        .await;

    assert!(!transfers[0].is_success());
    assert!(transfers[1].is_success());
    assert!(!dir.path().join("NAO_EXISTE.txt").exists());
    assert!(start.elapsed() >= Duration::from_secs(2));
}
