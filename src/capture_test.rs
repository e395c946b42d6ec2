use super::*;
use crate::frame::{FrameSample, strip_data_uri_header};
use std::time::{SystemTime, UNIX_EPOCH};

fn scratch_dir(label: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let dir = std::env::temp_dir().join(format!(
        "framerelay-{label}-{}-{nanos}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

#[test]
fn closure_is_a_capture_source() {
    let mut calls = 0;
    let mut source = || {
        calls += 1;
        (calls % 2 == 0).then(|| "AAAA".to_owned())
    };
    assert_eq!(source.try_snapshot(), None);
    assert_eq!(source.try_snapshot(), Some("AAAA".to_owned()));
}

#[test]
fn snapshot_feed_reports_latest_published_frame() {
    let (publisher, mut feed) = snapshot_feed();
    assert_eq!(feed.try_snapshot(), None);

    publisher.publish("data:image/jpeg;base64,AAAA");
    publisher.publish("data:image/jpeg;base64,BBBB");
    assert_eq!(
        feed.try_snapshot().as_deref(),
        Some("data:image/jpeg;base64,BBBB")
    );
    // Reading does not consume the frame.
    assert!(feed.try_snapshot().is_some());

    publisher.clear();
    assert_eq!(feed.try_snapshot(), None);
}

#[test]
fn image_dir_source_cycles_jpegs_in_name_order() {
    let dir = scratch_dir("cycle");
    std::fs::write(dir.join("b.jpg"), [2_u8, 2]).expect("write b");
    std::fs::write(dir.join("a.JPEG"), [1_u8]).expect("write a");
    std::fs::write(dir.join("notes.txt"), b"skip me").expect("write txt");

    let mut source = ImageDirSource::open(&dir).expect("open dir");
    assert_eq!(source.len(), 2);

    let first = source.try_snapshot().expect("first");
    let second = source.try_snapshot().expect("second");
    let third = source.try_snapshot().expect("wraps around");

    assert_eq!(first, jpeg_data_uri(&[1]));
    assert_eq!(second, jpeg_data_uri(&[2, 2]));
    assert_eq!(third, first);

    let sample = FrameSample::from_snapshot(&first).expect("sample");
    assert_eq!(sample.payload(), strip_data_uri_header(&first));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn image_dir_source_accepts_single_file() {
    let dir = scratch_dir("single");
    let file = dir.join("frame.jpg");
    std::fs::write(&file, [0xff_u8, 0xd8]).expect("write frame");

    let mut source = ImageDirSource::open(&file).expect("open file");
    assert_eq!(source.len(), 1);
    assert_eq!(source.try_snapshot(), source.try_snapshot());

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn empty_directory_yields_no_snapshot() {
    let dir = scratch_dir("empty");
    let mut source = ImageDirSource::open(&dir).expect("open dir");
    assert!(source.is_empty());
    assert_eq!(source.try_snapshot(), None);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn missing_path_is_capture_io_error() {
    let missing = scratch_dir("missing").join("nope.jpg");
    let err = ImageDirSource::open(&missing).expect_err("missing file should fail");
    assert!(matches!(err, RelayError::CaptureIo { path, .. } if path == missing));
}
