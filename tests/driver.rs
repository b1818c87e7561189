use bytes::Bytes;
use futures::TryStreamExt;
use segment_fs::{
    driver::{Driver, DriverError, DriverOptions},
    store::{
        ObjectStore,
        memory::{BulkDeleteFault, MemoryStore},
    },
};
use std::sync::Arc;

const CHUNK: u64 = 5;
const DATA: &[u8] = b"ABCDEFGHIJKLM";

async fn setup(bulk_delete: bool) -> (Arc<MemoryStore>, Driver) {
    let store = Arc::new(MemoryStore::new(bulk_delete));
    let driver = Driver::new(
        store.clone() as Arc<dyn ObjectStore>,
        DriverOptions::new("files").with_chunk_size(CHUNK),
    )
    .await
    .unwrap();
    (store, driver)
}

/// Stored segment lengths of the object at `name`, in sequence order.
async fn segment_lengths(store: &MemoryStore, name: &str) -> Vec<usize> {
    let prefix = format!("{name}/");
    let mut lengths = Vec::new();
    for segment in store.object_names("files_segments").await {
        if segment.starts_with(&prefix) {
            let body = store.raw_object("files_segments", &segment).await.unwrap();
            lengths.push(body.len());
        }
    }
    lengths
}

/// Every segment but the last holds exactly one chunk.
async fn assert_segment_sizes(store: &MemoryStore, name: &str) {
    let lengths = segment_lengths(store, name).await;
    if let Some((last, full)) = lengths.split_last() {
        assert!(full.iter().all(|len| *len == CHUNK as usize), "{lengths:?}");
        assert!(*last as u64 <= CHUNK, "{lengths:?}");
    }
}

async fn read_from(driver: &Driver, path: &str, offset: u64) -> Vec<u8> {
    let chunks: Vec<Bytes> = driver
        .reader(path, offset)
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    chunks.concat()
}

#[tokio::test]
async fn sequential_write_splits_into_chunks() {
    let (store, driver) = setup(true).await;

    let written = driver.write_stream("/f", 0, &b"ABCDEFGHIJ"[..]).await.unwrap();
    assert_eq!(written, 10);
    assert_eq!(driver.get_content("/f").await.unwrap(), "ABCDEFGHIJ");
    assert_eq!(segment_lengths(&store, "f").await, vec![5, 5]);
    assert_eq!(driver.stat("/f").await.unwrap().size, 10);
}

#[tokio::test]
async fn overwrite_inside_a_segment_keeps_its_tail() {
    let (store, driver) = setup(true).await;
    driver.write_stream("/f", 0, &b"ABCDEFGHIJ"[..]).await.unwrap();

    let written = driver.write_stream("/f", 3, &b"xy"[..]).await.unwrap();
    assert_eq!(written, 2);
    assert_eq!(driver.get_content("/f").await.unwrap(), "ABCxyFGHIJ");
    assert_eq!(segment_lengths(&store, "f").await, vec![5, 5]);
}

#[tokio::test]
async fn overwrite_across_a_boundary_keeps_the_tail() {
    let (store, driver) = setup(true).await;
    driver.write_stream("/f", 0, DATA).await.unwrap();

    driver.write_stream("/f", 3, &b"1234"[..]).await.unwrap();
    assert_eq!(driver.get_content("/f").await.unwrap(), "ABC1234HIJKLM");
    assert_segment_sizes(&store, "f").await;

    driver.write_stream("/f", 11, &b"z"[..]).await.unwrap();
    assert_eq!(driver.get_content("/f").await.unwrap(), "ABC1234HIJKzM");
    assert_eq!(segment_lengths(&store, "f").await, vec![5, 5, 3]);
}

#[tokio::test]
async fn write_past_end_pads_with_zero_segments() {
    let (store, driver) = setup(true).await;

    let written = driver.write_stream("/f", 12, &b"Z"[..]).await.unwrap();
    assert_eq!(written, 1);

    let mut expected = vec![0u8; 12];
    expected.push(b'Z');
    assert_eq!(driver.get_content("/f").await.unwrap(), expected);
    assert_eq!(segment_lengths(&store, "f").await, vec![5, 5, 3]);
    assert_eq!(driver.stat("/f").await.unwrap().size, 13);
}

#[tokio::test]
async fn gap_after_short_tail_completes_it() {
    let (store, driver) = setup(true).await;
    driver.write_stream("/f", 0, &b"ABC"[..]).await.unwrap();

    driver.write_stream("/f", 11, &b"Z"[..]).await.unwrap();
    let mut expected = b"ABC".to_vec();
    expected.resize(11, 0);
    expected.push(b'Z');
    assert_eq!(driver.get_content("/f").await.unwrap(), expected);
    assert_eq!(segment_lengths(&store, "f").await, vec![5, 5, 2]);
}

#[tokio::test]
async fn gap_inside_the_tail_chunk_pads_in_place() {
    let (store, driver) = setup(true).await;
    driver.write_stream("/f", 0, &b"ABCDEFG"[..]).await.unwrap();

    driver.write_stream("/f", 9, &b"Z"[..]).await.unwrap();
    assert_eq!(driver.get_content("/f").await.unwrap(), "ABCDEFG\0\0Z");
    assert_eq!(segment_lengths(&store, "f").await, vec![5, 5]);
}

#[tokio::test]
async fn writes_at_chunk_boundaries_append_segments() {
    let (store, driver) = setup(true).await;
    let mut offset = 0;
    for part in DATA.chunks(CHUNK as usize) {
        offset += driver.write_stream("/f", offset, part).await.unwrap();
    }
    assert_eq!(offset, DATA.len() as u64);
    assert_eq!(driver.get_content("/f").await.unwrap(), DATA);
    assert_eq!(segment_lengths(&store, "f").await, vec![5, 5, 3]);

    // Rewriting a whole chunk at its boundary touches only that segment.
    driver.write_stream("/f", 5, &b"fghij"[..]).await.unwrap();
    assert_eq!(driver.get_content("/f").await.unwrap(), "ABCDEfghijKLM");
}

#[tokio::test]
async fn split_writes_equal_one_write() {
    for k in 0..=DATA.len() {
        let (store, driver) = setup(true).await;
        let first = driver.write_stream("/f", 0, &DATA[..k]).await.unwrap();
        assert_eq!(first, k as u64);
        let second = driver.write_stream("/f", k as u64, &DATA[k..]).await.unwrap();
        assert_eq!(second, (DATA.len() - k) as u64);

        assert_eq!(driver.get_content("/f").await.unwrap(), DATA, "split at {k}");
        assert_eq!(segment_lengths(&store, "f").await, vec![5, 5, 3], "split at {k}");
    }
}

#[tokio::test]
async fn failed_write_reports_committed_bytes_and_resumes() {
    let (store, driver) = setup(true).await;

    // Directory marker, manifest and the first segment succeed.
    store.fail_puts_after(3);
    let err = driver.write_stream("/a/f", 0, DATA).await.unwrap_err();
    assert_eq!(err.bytes_written, 5);
    assert!(matches!(err.source, DriverError::Store { .. }));
    assert_eq!(driver.get_content("/a/f").await.unwrap(), "ABCDE");

    store.heal();
    let resumed = driver
        .write_stream("/a/f", err.bytes_written, &DATA[err.bytes_written as usize..])
        .await
        .unwrap();
    assert_eq!(resumed, 8);
    assert_eq!(driver.get_content("/a/f").await.unwrap(), DATA);
    assert_segment_sizes(&store, "a/f").await;
}

#[tokio::test]
async fn manifest_failure_writes_no_segments() {
    let (store, driver) = setup(true).await;
    store.fail_puts_after(0);

    let err = driver.write_stream("/f", 0, DATA).await.unwrap_err();
    assert_eq!(err.bytes_written, 0);
    assert!(segment_lengths(&store, "f").await.is_empty());

    store.heal();
    assert!(matches!(
        driver.stat("/f").await,
        Err(DriverError::PathNotFound { .. })
    ));
}

#[tokio::test]
async fn reads_at_or_past_the_end_are_empty() {
    let (_, driver) = setup(true).await;
    driver.write_stream("/f", 0, &b"ABCDEFGHIJ"[..]).await.unwrap();

    assert_eq!(read_from(&driver, "/f", 3).await, b"DEFGHIJ");
    assert!(read_from(&driver, "/f", 10).await.is_empty());
    assert!(read_from(&driver, "/f", 42).await.is_empty());
    assert!(matches!(
        driver.reader("/missing", 0).await,
        Err(DriverError::PathNotFound { .. })
    ));
}

#[tokio::test]
async fn plain_objects_are_converted_on_first_stream_write() {
    let (store, driver) = setup(true).await;
    driver
        .put_content("/p", Bytes::from_static(b"ABCDEFG"))
        .await
        .unwrap();
    assert!(segment_lengths(&store, "p").await.is_empty());

    driver.write_stream("/p", 7, &b"HI"[..]).await.unwrap();
    assert_eq!(driver.get_content("/p").await.unwrap(), "ABCDEFGHI");
    assert_eq!(segment_lengths(&store, "p").await, vec![5, 4]);
}

#[tokio::test]
async fn put_content_replaces_a_segmented_object() {
    let (store, driver) = setup(true).await;
    driver.write_stream("/f", 0, DATA).await.unwrap();

    driver
        .put_content("/f", Bytes::from_static(b"small"))
        .await
        .unwrap();
    assert_eq!(driver.get_content("/f").await.unwrap(), "small");
    assert!(segment_lengths(&store, "f").await.is_empty());
}

#[tokio::test]
async fn stream_writes_into_directories_are_rejected() {
    let (_, driver) = setup(true).await;
    driver
        .put_content("/d/f", Bytes::from_static(b"x"))
        .await
        .unwrap();

    let err = driver.write_stream("/d", 0, DATA).await.unwrap_err();
    assert!(matches!(err.source, DriverError::InvalidPath { .. }));
    assert!(driver.stat("/d").await.unwrap().is_dir);
}

#[tokio::test]
async fn writes_below_a_file_are_rejected() {
    let (store, driver) = setup(true).await;
    driver.write_stream("/a", 0, &b"hello"[..]).await.unwrap();

    let err = driver.write_stream("/a/b", 0, &b"XYZ"[..]).await.unwrap_err();
    assert_eq!(err.bytes_written, 0);
    assert!(matches!(err.source, DriverError::InvalidPath { .. }));
    assert!(matches!(
        driver.put_content("/a/c", Bytes::from_static(b"x")).await,
        Err(DriverError::InvalidPath { .. })
    ));

    assert_eq!(driver.get_content("/a").await.unwrap(), "hello");
    assert_eq!(driver.stat("/a").await.unwrap().size, 5);
    assert_eq!(store.object_names("files").await, vec!["a"]);
    assert_eq!(segment_lengths(&store, "a").await, vec![5]);
}

#[tokio::test]
async fn invalid_paths_are_rejected() {
    let (_, driver) = setup(true).await;
    for path in ["relative", "/a//b", "/a/../b", "/trailing/"] {
        assert!(
            matches!(
                driver.get_content(path).await,
                Err(DriverError::InvalidPath { .. })
            ),
            "{path}"
        );
    }
    assert!(matches!(
        driver.stat("/").await,
        Err(DriverError::InvalidPath { .. })
    ));
}

#[tokio::test]
async fn list_returns_immediate_children() {
    let (_, driver) = setup(true).await;
    driver.put_content("/d/x", Bytes::from_static(b"x")).await.unwrap();
    driver.put_content("/d/y", Bytes::from_static(b"y")).await.unwrap();
    driver.write_stream("/d/sub/z", 0, DATA).await.unwrap();

    assert_eq!(
        driver.list("/d").await.unwrap(),
        vec!["/d/sub", "/d/x", "/d/y"]
    );
    assert_eq!(driver.list("/").await.unwrap(), vec!["/d"]);
    assert_eq!(driver.list("/d/sub").await.unwrap(), vec!["/d/sub/z"]);
    assert!(driver.list("/d/x").await.unwrap().is_empty());
    assert!(matches!(
        driver.list("/missing").await,
        Err(DriverError::PathNotFound { .. })
    ));
}

#[tokio::test]
async fn stat_distinguishes_directories() {
    let (_, driver) = setup(true).await;
    driver.write_stream("/a/b/f", 0, DATA).await.unwrap();

    let file = driver.stat("/a/b/f").await.unwrap();
    assert_eq!(file.path, "/a/b/f");
    assert_eq!(file.size, DATA.len() as u64);
    assert!(!file.is_dir);

    for dir in ["/a", "/a/b"] {
        let info = driver.stat(dir).await.unwrap();
        assert!(info.is_dir, "{dir}");
        assert_eq!(info.size, 0);
    }
}

#[tokio::test]
async fn move_materialises_and_cleans_up_segments() {
    let (store, driver) = setup(true).await;
    driver.write_stream("/src", 0, DATA).await.unwrap();
    driver.write_stream("/dst/f", 0, &b"old data"[..]).await.unwrap();

    driver.move_object("/src", "/dst/f").await.unwrap();

    assert_eq!(driver.get_content("/dst/f").await.unwrap(), DATA);
    assert!(matches!(
        driver.stat("/src").await,
        Err(DriverError::PathNotFound { .. })
    ));
    assert!(segment_lengths(&store, "src").await.is_empty());
    assert!(segment_lengths(&store, "dst/f").await.is_empty());
}

#[tokio::test]
async fn move_of_missing_source_fails() {
    let (_, driver) = setup(true).await;
    assert!(matches!(
        driver.move_object("/nope", "/other").await,
        Err(DriverError::PathNotFound { path }) if path == "/nope"
    ));
}

async fn populate(driver: &Driver) {
    driver.write_stream("/dir/a", 0, DATA).await.unwrap();
    driver
        .put_content("/dir/b", Bytes::from_static(b"plain"))
        .await
        .unwrap();
    driver.write_stream("/dir/sub/c", 0, DATA).await.unwrap();
    driver.write_stream("/dirx", 0, &b"sibling"[..]).await.unwrap();
}

async fn assert_only_sibling_left(store: &MemoryStore, driver: &Driver) {
    assert_eq!(store.object_names("files").await, vec!["dirx"]);
    let segments = store.object_names("files_segments").await;
    assert!(!segments.is_empty());
    assert!(segments.iter().all(|name| name.starts_with("dirx/")), "{segments:?}");
    assert_eq!(driver.get_content("/dirx").await.unwrap(), "sibling");
}

#[tokio::test]
async fn bulk_delete_removes_objects_and_segments() {
    let (store, driver) = setup(true).await;
    assert!(driver.bulk_delete_supported());
    populate(&driver).await;

    driver.delete("/dir").await.unwrap();

    assert_eq!(store.bulk_delete_calls(), 1);
    assert_only_sibling_left(&store, &driver).await;
}

#[tokio::test]
async fn per_object_delete_removes_objects_and_segments() {
    let (store, driver) = setup(false).await;
    assert!(!driver.bulk_delete_supported());
    populate(&driver).await;

    driver.delete("/dir").await.unwrap();

    assert_eq!(store.bulk_delete_calls(), 0);
    assert_only_sibling_left(&store, &driver).await;
}

#[tokio::test]
async fn failed_bulk_request_falls_back_to_per_object_delete() {
    let (store, driver) = setup(true).await;
    populate(&driver).await;
    store.fail_bulk_deletes(BulkDeleteFault::Request);

    driver.delete("/dir").await.unwrap();

    assert_eq!(store.bulk_delete_calls(), 1);
    assert_only_sibling_left(&store, &driver).await;
}

#[tokio::test]
async fn bulk_errors_per_object_fall_back_to_per_object_delete() {
    let (store, driver) = setup(true).await;
    populate(&driver).await;
    store.fail_bulk_deletes(BulkDeleteFault::PerObject);

    driver.delete("/dir").await.unwrap();

    assert_eq!(store.bulk_delete_calls(), 1);
    assert_only_sibling_left(&store, &driver).await;
    assert!(matches!(
        driver.stat("/dir/sub/c").await,
        Err(DriverError::PathNotFound { .. })
    ));
}

#[tokio::test]
async fn delete_of_a_single_segmented_file() {
    let (store, driver) = setup(false).await;
    driver.write_stream("/f", 0, DATA).await.unwrap();

    driver.delete("/f").await.unwrap();
    assert!(store.object_names("files").await.is_empty());
    assert!(store.object_names("files_segments").await.is_empty());
    assert!(matches!(
        driver.delete("/f").await,
        Err(DriverError::PathNotFound { .. })
    ));
}

#[tokio::test]
async fn prefixed_driver_maps_paths_below_the_prefix() {
    let store = Arc::new(MemoryStore::default());
    let driver = Driver::new(
        store.clone() as Arc<dyn ObjectStore>,
        DriverOptions::new("files")
            .with_prefix("/tenant/")
            .with_chunk_size(CHUNK),
    )
    .await
    .unwrap();

    driver.write_stream("/a/f", 0, DATA).await.unwrap();
    assert_eq!(
        store.object_names("files").await,
        vec!["tenant/a", "tenant/a/f"]
    );
    assert_eq!(driver.list("/").await.unwrap(), vec!["/a"]);
    assert_eq!(driver.list("/a").await.unwrap(), vec!["/a/f"]);

    driver.delete("/").await.unwrap();
    assert!(store.object_names("files").await.is_empty());
    assert!(store.object_names("files_segments").await.is_empty());
}
