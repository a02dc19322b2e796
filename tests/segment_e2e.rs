//! End-to-end segment tests.
//!
//! These need an Intel QSV device and a real media asset, so they are
//! ignored by default. Point `SEGFORGED_TEST_INPUT` at a file with one video
//! and one audio stream and run `cargo test -- --ignored`.

use segforged::Fragment;

fn test_input() -> String {
    std::env::var("SEGFORGED_TEST_INPUT")
        .expect("set SEGFORGED_TEST_INPUT to a media file with video and audio")
}

#[test]
#[ignore = "requires QSV hardware and SEGFORGED_TEST_INPUT"]
fn transport_stream_segment_writes_target() {
    let input = test_input();
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("0.ts");

    segforged::transport_stream_segment(&input, "h264_qsv", 0.0, 4.0, target.to_str().unwrap())
        .unwrap();

    let written = std::fs::metadata(&target).unwrap().len();
    assert!(written > 0, "segment file is empty");
}

#[test]
#[ignore = "requires QSV hardware and SEGFORGED_TEST_INPUT"]
fn fmp4_init_segment_is_header_only() {
    let input = test_input();

    let init = segforged::fmp4_segment(&input, "h264_qsv", Fragment::Init).unwrap();
    assert!(!init.is_empty());
    // ftyp box leads the init segment
    assert_eq!(&init[4..8], b"ftyp");
    // header only: no media fragment boxes
    assert!(!init.windows(4).any(|w| w == b"moof"));
}

#[test]
#[ignore = "requires QSV hardware and SEGFORGED_TEST_INPUT"]
fn fmp4_media_fragments_carry_moof() {
    let input = test_input();

    for index in 1..=2 {
        let fragment = segforged::fmp4_segment_at(&input, "h264_qsv", index, 4.0).unwrap();
        assert!(!fragment.is_empty(), "fragment {index} is empty");
        assert!(
            fragment.windows(4).any(|w| w == b"moof"),
            "fragment {index} has no moof box"
        );
    }
}

#[test]
#[ignore = "requires QSV hardware and SEGFORGED_TEST_INPUT"]
fn media_duration_is_positive() {
    let input = test_input();
    let duration = segforged::media_duration(&input).unwrap();
    assert!(duration > 0.0);
}
