use posekit_organizer::{relabel::SKIP_REPORT, strip_pose_labels};
use std::fs;

fn row(n: usize) -> String {
    (0..n).map(|i| format!("0.{i}")).collect::<Vec<_>>().join(" ")
}

#[test]
fn strips_a_directory_of_labels() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();

    for i in 0..100 {
        let n = if i % 40 == 7 { 12 } else { 35 };
        fs::write(input.path().join(format!("frame_{i}.txt")), format!("{}\n", row(n))).unwrap();
    }
    // only label files are touched
    fs::write(input.path().join("notes.md"), "x").unwrap();

    let report = strip_pose_labels(input.path(), output.path()).unwrap();
    assert_eq!(report.total, 100);
    assert_eq!(report.modified, 97);
    assert_eq!(report.skipped.len(), 3);

    let out = fs::read_to_string(output.path().join("frame_0.txt")).unwrap();
    assert_eq!(out, format!("{}\n", row(29)));
    assert!(!output.path().join("frame_7.txt").exists());
    assert!(!output.path().join("notes.md").exists());

    let skipped = fs::read_to_string(output.path().join(SKIP_REPORT)).unwrap();
    let lines: Vec<&str> = skipped.split('\n').collect();
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().all(|l| l.ends_with(" - 12 values")));
    assert!(lines[0].contains("frame_47.txt"));
}

#[test]
fn mirrors_subdirectories_and_keeps_stripped_files() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();

    let nested = input.path().join("scene_a");
    fs::create_dir(&nested).unwrap();
    let already = format!("{}\n{}", row(29), row(29));
    fs::write(nested.join("frame_1.txt"), &already).unwrap();

    let report = strip_pose_labels(input.path(), output.path()).unwrap();
    assert_eq!((report.total, report.modified), (1, 1));
    assert!(report.skipped.is_empty());

    let out = fs::read_to_string(output.path().join("scene_a").join("frame_1.txt")).unwrap();
    assert_eq!(out, already);
    assert!(!output.path().join(SKIP_REPORT).exists());
}

#[test]
fn missing_input_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(strip_pose_labels(&dir.path().join("nope"), dir.path()).is_err());
}

#[test]
fn non_utf8_file_is_skipped_and_reported() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();

    fs::write(input.path().join("a.txt"), format!("{}\n", row(35))).unwrap();
    fs::write(input.path().join("b.txt"), b"0.1 \xff\xfe 0.2\n").unwrap();
    fs::write(input.path().join("c.txt"), format!("{}\n", row(35))).unwrap();

    let report = strip_pose_labels(input.path(), output.path()).unwrap();
    assert_eq!((report.total, report.modified), (3, 2));
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].0, input.path().join("b.txt"));

    assert!(output.path().join("a.txt").exists());
    assert!(output.path().join("c.txt").exists());
    assert!(!output.path().join("b.txt").exists());

    let skipped = fs::read_to_string(output.path().join(SKIP_REPORT)).unwrap();
    assert!(skipped.contains("b.txt"));
    assert!(skipped.ends_with(" - 3 values"));
}
