use bytes::Bytes;
use segment_fs::{
    driver::{Driver, DriverError, DriverOptions},
    store::{ObjectStore, local::LocalStore},
};
use sqlx::sqlite::SqlitePoolOptions;
use std::{path::Path, sync::Arc};

async fn driver(dir: &Path) -> Driver {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = LocalStore::new(Arc::new(pool), dir);
    store.migrate().await.unwrap();

    Driver::new(
        Arc::new(store) as Arc<dyn ObjectStore>,
        DriverOptions::new("files").with_chunk_size(5),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn segmented_writes_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let driver = driver(dir.path()).await;

    driver
        .write_stream("/a/f", 0, &b"ABCDEFGHIJ"[..])
        .await
        .unwrap();
    driver.write_stream("/a/f", 3, &b"xy"[..]).await.unwrap();
    driver.write_stream("/a/f", 12, &b"Z"[..]).await.unwrap();

    assert_eq!(
        driver.get_content("/a/f").await.unwrap(),
        "ABCxyFGHIJ\0\0Z"
    );
    assert_eq!(driver.stat("/a/f").await.unwrap().size, 13);
    assert!(driver.stat("/a").await.unwrap().is_dir);
    assert_eq!(driver.list("/a").await.unwrap(), vec!["/a/f"]);
}

#[tokio::test]
async fn move_and_delete_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let driver = driver(dir.path()).await;

    driver
        .write_stream("/src", 0, &b"ABCDEFGHIJKLM"[..])
        .await
        .unwrap();
    driver
        .put_content("/tree/plain", Bytes::from_static(b"plain"))
        .await
        .unwrap();
    driver.move_object("/src", "/tree/moved").await.unwrap();
    assert_eq!(
        driver.get_content("/tree/moved").await.unwrap(),
        "ABCDEFGHIJKLM"
    );

    driver.delete("/tree").await.unwrap();
    assert!(driver.list("/").await.unwrap().is_empty());
    assert!(matches!(
        driver.get_content("/tree/moved").await,
        Err(DriverError::PathNotFound { .. })
    ));
}
