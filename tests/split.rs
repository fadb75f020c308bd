use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cbsplit::split::JobState;
use cbsplit::zip::{CompressionMethod, DosDateTime};
use cbsplit::{
    CancelToken, CollisionPolicy, LocalFileReader, NamingTemplate, OpenOptions, Source,
    SplitError, SplitJob, ZipReader, ZipWriter, run_split,
};
use tempfile::TempDir;

type Pages = Vec<(String, Vec<u8>)>;

fn pages(count: usize) -> Pages {
    (1..=count)
        .map(|i| {
            (
                format!("Saga/page{:02}.jpg", i),
                format!("PAGE-{:02}-DATA-", i).repeat(i).into_bytes(),
            )
        })
        .collect()
}

async fn build_cbz(path: &Path, pages: &Pages) {
    let mut writer = ZipWriter::new(Vec::new(), CompressionMethod::Stored).unwrap();
    for (name, data) in pages {
        writer.add_entry(name, data, DosDateTime::EPOCH).await.unwrap();
    }
    std::fs::write(path, writer.finish().await.unwrap()).unwrap();
}

async fn read_cbz(path: &Path) -> Pages {
    let zip = ZipReader::new(Arc::new(LocalFileReader::new(path).unwrap()));
    let mut out = Vec::new();
    for entry in zip.list_files().await.unwrap() {
        let data = zip.read_to_memory(&entry).await.unwrap();
        out.push((entry.file_name, data));
    }
    out
}

fn no_unrar() -> OpenOptions {
    OpenOptions {
        unrar: OsString::from("cbsplit-test-no-such-unrar"),
    }
}

fn dir_listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

fn local(path: PathBuf) -> Source {
    Source::Local(path)
}

#[tokio::test]
async fn test_split_round_trip() {
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("Saga 001.cbz");
    let original = pages(10);
    build_cbz(&source, &original).await;

    let out = tmp.path().join("parts");
    let job = SplitJob::new(local(source), &out).with_parts(3);
    let mut fractions = Vec::new();

    let result = run_split(&job, &no_unrar(), |f| fractions.push(f), &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(result.plan.effective(), 3);
    assert_eq!(
        result.output_paths,
        [
            out.join("Saga 001-part1.cbz"),
            out.join("Saga 001-part2.cbz"),
            out.join("Saga 001-part3.cbz"),
        ]
    );

    let mut rebuilt = Vec::new();
    let mut sizes = Vec::new();
    for path in &result.output_paths {
        let part = read_cbz(path).await;
        sizes.push(part.len());
        rebuilt.extend(part);
    }
    assert_eq!(sizes, [4, 3, 3]);
    assert_eq!(rebuilt, original);

    // Per-entry progress, never decreasing, finishing at 1.0
    assert!(fractions.len() >= 10 + 3);
    assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(fractions.first().copied(), Some(0.0));
    assert_eq!(fractions.last().copied(), Some(1.0));
}

#[tokio::test]
async fn test_more_parts_than_pages_is_clamped() {
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("short.cbz");
    build_cbz(&source, &pages(3)).await;

    let job = SplitJob::new(local(source), tmp.path()).with_parts(5);
    let result = run_split(&job, &no_unrar(), |_| {}, &CancelToken::new())
        .await
        .unwrap();

    assert!(result.plan.is_clamped());
    assert_eq!(result.plan.requested, 5);
    assert_eq!(result.output_paths.len(), 3);
    for path in &result.output_paths {
        assert_eq!(read_cbz(path).await.len(), 1);
    }
}

#[tokio::test]
async fn test_empty_archive_is_invalid_request() {
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("empty.cbz");
    build_cbz(&source, &Vec::new()).await;

    let out = tmp.path().join("never");
    let job = SplitJob::new(local(source), &out);
    let failure = run_split(&job, &no_unrar(), |_| {}, &CancelToken::new())
        .await
        .unwrap_err();

    assert!(matches!(failure.error, SplitError::InvalidPartitionRequest(_)));
    assert_eq!(failure.state, JobState::Partitioning);
    assert!(failure.completed.is_empty());
    assert!(!out.exists());
}

#[tokio::test]
async fn test_unsupported_extension_touches_nothing() {
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("never");
    let job = SplitJob::new(local(tmp.path().join("comic.cb7")), &out);

    let failure = run_split(&job, &no_unrar(), |_| {}, &CancelToken::new())
        .await
        .unwrap_err();

    assert!(matches!(failure.error, SplitError::UnsupportedFormat(_)));
    assert_eq!(failure.state, JobState::Reading);
    assert!(!out.exists());
}

#[tokio::test]
async fn test_failure_keeps_earlier_parts_only() {
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("damaged.cbz");
    build_cbz(&source, &pages(9)).await;

    // Damage page 5, which lands in part 2 of 3
    let mut bytes = std::fs::read(&source).unwrap();
    let needle = b"PAGE-05-DATA-";
    let pos = bytes
        .windows(needle.len())
        .position(|w| w == needle)
        .unwrap();
    bytes[pos] ^= 0xFF;
    std::fs::write(&source, bytes).unwrap();

    let out = tmp.path().join("parts");
    let job = SplitJob::new(local(source), &out).with_parts(3);
    let failure = run_split(&job, &no_unrar(), |_| {}, &CancelToken::new())
        .await
        .unwrap_err();

    assert!(matches!(failure.error, SplitError::CorruptArchive { .. }));
    assert_eq!(failure.state, JobState::Writing(2));
    assert_eq!(failure.completed, [out.join("damaged-part1.cbz")]);
    assert_eq!(dir_listing(&out), ["damaged-part1.cbz"]);
    assert_eq!(read_cbz(&out.join("damaged-part1.cbz")).await.len(), 3);
}

#[tokio::test]
async fn test_existing_part_is_a_collision_unless_overwriting() {
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("Saga.cbz");
    build_cbz(&source, &pages(4)).await;
    std::fs::write(tmp.path().join("Saga-part2.cbz"), b"mine").unwrap();

    let job = SplitJob::new(local(source), tmp.path());
    let failure = run_split(&job, &no_unrar(), |_| {}, &CancelToken::new())
        .await
        .unwrap_err();
    assert!(matches!(failure.error, SplitError::NameCollision(ref p) if p.ends_with("Saga-part2.cbz")));
    assert_eq!(failure.completed, [tmp.path().join("Saga-part1.cbz")]);
    assert_eq!(std::fs::read(tmp.path().join("Saga-part2.cbz")).unwrap(), b"mine");

    let job = job.with_collision(CollisionPolicy::Overwrite);
    let result = run_split(&job, &no_unrar(), |_| {}, &CancelToken::new())
        .await
        .unwrap();
    assert_eq!(result.output_paths.len(), 2);
    assert_eq!(read_cbz(&tmp.path().join("Saga-part2.cbz")).await.len(), 2);
}

#[tokio::test]
async fn test_cancel_between_parts() {
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("Saga.cbz");
    build_cbz(&source, &pages(6)).await;

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let job = SplitJob::new(local(source), tmp.path().join("out")).with_parts(3);

    let failure = run_split(
        &job,
        &no_unrar(),
        move |f| {
            if f > 0.0 {
                trigger.cancel();
            }
        },
        &cancel,
    )
    .await
    .unwrap_err();

    assert!(matches!(failure.error, SplitError::Cancelled));
    assert_eq!(failure.completed.len(), 1);
    assert_eq!(dir_listing(&tmp.path().join("out")), ["Saga-part1.cbz"]);
}

#[tokio::test]
async fn test_mislabeled_cbr_is_read_as_zip() {
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("Saga.cbr");
    let original = pages(4);
    build_cbz(&source, &original).await;

    // No unrar is available, so this only works if the signature wins
    let job = SplitJob::new(local(source), tmp.path()).with_parts(2);
    let result = run_split(&job, &no_unrar(), |_| {}, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(result.format, cbsplit::ArchiveFormat::Zip);
    assert_eq!(read_cbz(&result.output_paths[0]).await, original[..2]);
}

#[tokio::test]
async fn test_rar_without_unrar_is_missing_tool() {
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("Saga.cbr");
    std::fs::write(&source, b"Rar!\x1a\x07\x01\x00not really").unwrap();

    let out = tmp.path().join("never");
    let job = SplitJob::new(local(source), &out);
    let failure = run_split(&job, &no_unrar(), |_| {}, &CancelToken::new())
        .await
        .unwrap_err();

    assert!(matches!(failure.error, SplitError::MissingExternalTool { .. }));
    assert!(!out.exists());
}

#[tokio::test]
async fn test_template_flatten_and_deflate() {
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("Saga 001.cbz");
    let original = pages(5);
    build_cbz(&source, &original).await;

    let job = SplitJob::new(local(source), tmp.path())
        .with_template(NamingTemplate::parse("{name} ({n} of {total})").unwrap())
        .with_flatten(true)
        .with_compression(CompressionMethod::Deflate);
    let result = run_split(&job, &no_unrar(), |_| {}, &CancelToken::new())
        .await
        .unwrap();

    assert_eq!(
        result.output_paths,
        [
            tmp.path().join("Saga 001 (1 of 2).cbz"),
            tmp.path().join("Saga 001 (2 of 2).cbz"),
        ]
    );

    let second = read_cbz(&result.output_paths[1]).await;
    let names: Vec<_> = second.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, ["page04.jpg", "page05.jpg"]);
    assert_eq!(second[1].1, original[4].1);
}

#[tokio::test]
async fn test_legacy_code_page_names_survive_split() {
    let tmp = TempDir::new().unwrap();
    let source = tmp.path().join("old.cbz");
    // CP437 names without the UTF-8 flag, distinct only in their high bytes
    let names: [&[u8]; 3] = [b"Caf\x82/01.jpg", b"Caf\x82/02\x8a.jpg", b"Caf\x82/02\x82.jpg"];
    let mut writer = ZipWriter::new(Vec::new(), CompressionMethod::Stored).unwrap();
    for (i, name) in names.iter().enumerate() {
        writer.add_entry(name, &[i as u8; 8], DosDateTime::EPOCH).await.unwrap();
    }
    std::fs::write(&source, writer.finish().await.unwrap()).unwrap();

    let out = tmp.path().join("parts");
    let job = SplitJob::new(local(source), &out).with_parts(2).with_flatten(true);
    let result = run_split(&job, &no_unrar(), |_| {}, &CancelToken::new())
        .await
        .unwrap();

    let mut stored = Vec::new();
    for path in &result.output_paths {
        let zip = ZipReader::new(Arc::new(LocalFileReader::new(path).unwrap()));
        for entry in zip.list_files().await.unwrap() {
            assert_eq!(entry.flags & cbsplit::zip::FLAG_UTF8, 0);
            stored.push(entry.raw_name.unwrap_or_else(|| entry.file_name.into_bytes()));
        }
    }
    assert_eq!(
        stored,
        [b"01.jpg".to_vec(), b"02\x8a.jpg".to_vec(), b"02\x82.jpg".to_vec()]
    );
}
