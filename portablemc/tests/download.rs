//! Behavior tests of the download engine against a local mock HTTP server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::io::Write;
use std::fs;

use portablemc::download::{Batch, Download, Error, Handler, Progress, Reason};

use mockito::{Matcher, Server, ServerGuard};
use tempfile::TempDir;


/// SHA-1 of the exact bytes `correct payload!!`.
const PAYLOAD: &[u8] = b"correct payload!!";
const PAYLOAD_SHA1: [u8; 20] = [
    0x43, 0x31, 0x3f, 0x6a, 0x41, 0xa0, 0x89, 0x6b, 0xe4, 0x82,
    0xdb, 0xf3, 0xc8, 0x8e, 0xac, 0xaa, 0xb3, 0x30, 0xcd, 0x1c,
];

/// A mock server and a temporary download target directory.
struct Rig {
    server: ServerGuard,
    dir: TempDir,
}

impl Rig {

    fn new() -> Self {
        fs::create_dir_all(env!("CARGO_TARGET_TMPDIR")).unwrap();
        Self {
            server: Server::new(),
            dir: tempfile::Builder::new()
                .prefix("download.")
                .tempdir_in(env!("CARGO_TARGET_TMPDIR"))
                .unwrap(),
        }
    }

    fn download(&self, name: &str) -> Download {
        Download::new(format!("{}/{name}", self.server.url()), self.dir.path().join(name))
    }

    fn target(&self, name: &str) -> std::path::PathBuf {
        self.dir.path().join(name)
    }

}

#[test]
fn single_success_with_verification() {

    let mut rig = Rig::new();
    let mock = rig.server.mock("GET", "/ok")
        .with_status(200)
        .with_body(PAYLOAD)
        .create();

    let mut fetched = rig.download("ok")
        .expect_size(Some(PAYLOAD.len() as u32))
        .expect_sha1(Some(PAYLOAD_SHA1))
        .keep_open()
        .fetch(())
        .unwrap();

    mock.assert();
    assert_eq!(fetched.size(), PAYLOAD.len() as u32);
    assert_eq!(fetched.sha1(), &PAYLOAD_SHA1);

    // The keep-open handle reads the published content from the start.
    let mut content = Vec::new();
    std::io::Read::read_to_end(&mut fetched.take_handle().unwrap(), &mut content).unwrap();
    assert_eq!(content, PAYLOAD);

    assert_eq!(fs::read(rig.target("ok")).unwrap(), PAYLOAD);
    assert!(!rig.target("ok.part").exists());

}

#[test]
fn client_errors_are_not_retried() {

    let mut rig = Rig::new();
    let mock = rig.server.mock("GET", "/missing")
        .with_status(404)
        .expect(1)
        .create();

    let error = rig.download("missing").fetch(()).unwrap_err();
    mock.assert();

    let Error::Failed(failures) = error else {
        panic!("expected a failure list, got {error:?}");
    };
    assert!(matches!(failures[0].reason, Reason::Status(404)));
    assert!(!rig.target("missing").exists());

}

#[test]
fn server_errors_are_retried_three_times() {

    let mut rig = Rig::new();
    let mock = rig.server.mock("GET", "/broken")
        .with_status(502)
        .expect(3)
        .create();

    let error = rig.download("broken").fetch(()).unwrap_err();
    mock.assert();

    let Error::Failed(failures) = error else {
        panic!("expected a failure list, got {error:?}");
    };
    assert!(matches!(failures[0].reason, Reason::Status(502)));

}

#[test]
fn corrupted_content_is_refetched_and_replaces_stale_bytes() {

    let mut rig = Rig::new();

    // The destination holds stale bytes, the first response is truncated and the
    // second is correct: the stale bytes must survive the failed attempt and be
    // atomically replaced by the correct ones.
    fs::write(rig.target("asset"), b"stale bytes").unwrap();

    let served = Arc::new(AtomicUsize::new(0));
    let mock = rig.server.mock("GET", "/asset")
        .with_status(200)
        .with_chunked_body(move |writer| {
            if served.fetch_add(1, Ordering::SeqCst) == 0 {
                writer.write_all(&PAYLOAD[..4])
            } else {
                writer.write_all(PAYLOAD)
            }
        })
        .expect(2)
        .create();

    rig.download("asset")
        .expect_size(Some(PAYLOAD.len() as u32))
        .expect_sha1(Some(PAYLOAD_SHA1))
        .fetch(())
        .unwrap();

    mock.assert();
    assert_eq!(fs::read(rig.target("asset")).unwrap(), PAYLOAD);

}

#[test]
fn persistent_corruption_gives_up_and_cleans_up() {

    let mut rig = Rig::new();
    let mock = rig.server.mock("GET", "/corrupt")
        .with_status(200)
        .with_body(&PAYLOAD[..4])
        .expect(3)
        .create();

    let error = rig.download("corrupt")
        .expect_sha1(Some(PAYLOAD_SHA1))
        .fetch(())
        .unwrap_err();

    mock.assert();

    let Error::Failed(failures) = error else {
        panic!("expected a failure list, got {error:?}");
    };
    assert!(matches!(failures[0].reason, Reason::Sha1 { .. }));
    assert!(!rig.target("corrupt").exists());
    assert!(!rig.target("corrupt.part").exists());

}

#[test]
fn batch_collects_every_failure() {

    let mut rig = Rig::new();

    rig.server.mock("GET", "/good").with_status(200).with_body(PAYLOAD).create();
    rig.server.mock("GET", "/gone").with_status(404).create();
    rig.server.mock("GET", "/short").with_status(200).with_body(&PAYLOAD[..4]).create();

    let mut batch = Batch::new();
    batch.add(rig.download("good"));
    batch.add(rig.download("gone"));
    batch.add(rig.download("short").expect_size(Some(PAYLOAD.len() as u32)));
    assert_eq!(batch.len(), 3);

    let error = batch.fetch(()).unwrap_err();
    let Error::Failed(failures) = error else {
        panic!("expected a failure list, got {error:?}");
    };

    // Only the two failing entries are collected, in queue order, and the good one
    // landed on disk.
    assert_eq!(failures.len(), 2);
    assert!(failures[0].url.ends_with("/gone"));
    assert!(matches!(failures[0].reason, Reason::Status(404)));
    assert!(failures[1].url.ends_with("/short"));
    assert!(matches!(failures[1].reason, Reason::Size { actual: 4 }));
    assert_eq!(fs::read(rig.target("good")).unwrap(), PAYLOAD);

}

#[test]
fn cancellation_aborts_the_batch() {

    struct CancelImmediately;
    impl Handler for CancelImmediately {
        fn on_progress(&mut self, _progress: Progress) {}
        fn is_cancelled(&mut self) -> bool {
            true
        }
    }

    let mut rig = Rig::new();
    for name in ["one", "two", "three"] {
        rig.server.mock("GET", format!("/{name}").as_str())
            .with_status(200)
            .with_body(PAYLOAD)
            .create();
    }

    let mut batch = Batch::new();
    for name in ["one", "two", "three"] {
        batch.add(rig.download(name));
    }

    let error = batch.fetch(CancelImmediately).unwrap_err();
    assert!(matches!(error, Error::Cancelled));

    // No temporary file survives a cancellation.
    for name in ["one.part", "two.part", "three.part"] {
        assert!(!rig.target(name).exists());
    }

}

#[test]
fn revalidation_cache_lifecycle() {

    let mut rig = Rig::new();
    let url = format!("{}/meta", rig.server.url());
    let file = rig.target("meta");
    let state_file = rig.target("meta.cache");

    let fetch = |rig: &Rig| {
        Download::new(url.clone(), rig.target("meta"))
            .revalidate()
            .fetch(())
            .unwrap()
    };

    // First fetch records the validators sent by the server.
    {
        let mock = rig.server.mock("GET", "/meta")
            .match_header("If-None-Match", Matcher::Missing)
            .with_status(200)
            .with_header("Etag", "v1")
            .with_body(PAYLOAD)
            .create();

        fetch(&rig);
        mock.assert();
        assert!(state_file.is_file());
        assert_eq!(fs::read(&file).unwrap(), PAYLOAD);
    }

    // An unchanged remote answers 304 and the local copy is reused.
    {
        let mock = rig.server.mock("GET", "/meta")
            .match_header("If-None-Match", "v1")
            .with_status(304)
            .create();

        let fetched = fetch(&rig);
        mock.assert();
        assert_eq!(fetched.sha1(), &PAYLOAD_SHA1);
        assert_eq!(fs::read(&file).unwrap(), PAYLOAD);
    }

    // A changed remote is fetched again and the state follows.
    {
        let mock = rig.server.mock("GET", "/meta")
            .match_header("If-None-Match", "v1")
            .with_status(200)
            .with_header("Etag", "v2")
            .with_body("fresher")
            .create();

        fetch(&rig);
        mock.assert();
        assert_eq!(fs::read(&file).unwrap(), b"fresher");
    }

    // A locally altered copy invalidates the state: no conditional headers.
    {
        fs::write(&file, "altered locally").unwrap();

        let mock = rig.server.mock("GET", "/meta")
            .match_header("If-None-Match", Matcher::Missing)
            .with_status(200)
            .with_header("Etag", "v2")
            .with_body("fresher")
            .create();

        fetch(&rig);
        mock.assert();
        assert_eq!(fs::read(&file).unwrap(), b"fresher");
    }

}
