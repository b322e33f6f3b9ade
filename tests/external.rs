//! The real two-stage converter, driven by shell scripts standing in for
//! `hwp5html` and `weasyprint`.
#![cfg(unix)]

use edgequake_hwp2pdf::{
    convert_in_workspace, BatchState, ConversionError, ConversionService, ExternalConverter,
    PageSize, ServiceConfig, Stage, Upload,
};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// `hwp5html --output DIR SRC`: fails on `CORRUPT`, otherwise writes an
/// index page and a stylesheet.
const FAKE_HWP5HTML: &str = r#"#!/bin/sh
out="$2"
src="$3"
if grep -q CORRUPT "$src"; then
  echo "hwp5html: not an HWP v5 file" >&2
  exit 3
fi
mkdir -p "$out"
printf '<html><body>%s</body></html>\n' "$(cat "$src")" > "$out/index.xhtml"
printf 'body { font-family: serif; }\n' > "$out/styles.css"
"#;

/// `weasyprint IN OUT`: fails on `NORENDER`, otherwise concatenates the page
/// and its stylesheet behind a PDF header.
const FAKE_WEASYPRINT: &str = r#"#!/bin/sh
in="$1"
out="$2"
if grep -q NORENDER "$in"; then
  echo "weasyprint: cannot render document" >&2
  exit 1
fi
{ echo "%PDF-1.7"; cat "$in"; cat "$(dirname "$in")/styles.css"; } > "$out"
"#;

struct Tools {
    dir: tempfile::TempDir,
}

impl Tools {
    fn new() -> Self {
        let tools = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        tools.script("hwp5html", FAKE_HWP5HTML);
        tools.script("weasyprint", FAKE_WEASYPRINT);
        tools
    }

    fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn converter(&self) -> ExternalConverter {
        ExternalConverter::new(self.path("hwp5html"), self.path("weasyprint"))
    }
}

fn scratch() -> tempfile::TempDir {
    tempfile::tempdir().unwrap()
}

fn is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

#[tokio::test]
async fn produces_pdf_with_single_page_rule() {
    let tools = Tools::new();
    let root = scratch();
    let converter = tools.converter().with_page_size(PageSize::A4);

    let pdf = convert_in_workspace(&converter, root.path(), b"hello hwp")
        .await
        .unwrap();
    let text = String::from_utf8(pdf).unwrap();

    assert!(text.starts_with("%PDF-1.7"));
    assert!(text.contains("hello hwp"));
    assert!(text.contains("font-family: serif"));
    assert!(text.contains("size: A4;"));
    assert!(text.contains("margin: 0;"));
    assert!(text.contains("padding: 0;"));
    assert_eq!(text.matches("@page").count(), 1);
    assert!(is_empty(root.path()));
}

#[tokio::test]
async fn stage_one_failure_keeps_tool_stderr() {
    let tools = Tools::new();
    let root = scratch();

    let err = convert_in_workspace(&tools.converter(), root.path(), b"CORRUPT")
        .await
        .unwrap_err();
    match err {
        ConversionError::StageOneFailed { detail } => {
            assert!(detail.contains("not an HWP v5 file"), "got: {detail}")
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(is_empty(root.path()));
}

#[tokio::test]
async fn stage_two_failure_is_tagged() {
    let tools = Tools::new();
    let root = scratch();

    let err = convert_in_workspace(&tools.converter(), root.path(), b"NORENDER")
        .await
        .unwrap_err();
    assert!(
        matches!(err, ConversionError::StageTwoFailed { ref detail } if detail.contains("cannot render")),
        "got: {err:?}"
    );
    assert!(is_empty(root.path()));
}

#[tokio::test]
async fn hung_tool_is_killed_at_deadline() {
    let tools = Tools::new();
    let slow = tools.script("slow-hwp5html", "#!/bin/sh\nsleep 30\n");
    let root = scratch();
    let converter = ExternalConverter::new(slow, tools.path("weasyprint"))
        .with_timeout(Duration::from_secs(1));

    let started = Instant::now();
    let err = convert_in_workspace(&converter, root.path(), b"doc")
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ConversionError::StageTimedOut {
            stage: Stage::One,
            secs: 1
        }
    );
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(is_empty(root.path()));
}

#[tokio::test]
async fn missing_program_is_stage_failure() {
    let tools = Tools::new();
    let root = scratch();
    let converter = ExternalConverter::new("/nonexistent/hwp5html", tools.path("weasyprint"));

    let err = convert_in_workspace(&converter, root.path(), b"doc")
        .await
        .unwrap_err();
    assert!(
        matches!(err, ConversionError::StageOneFailed { ref detail } if detail.contains("failed to launch")),
        "got: {err:?}"
    );
}

#[tokio::test]
async fn stage_one_without_index_is_failure() {
    let tools = Tools::new();
    let silent = tools.script("silent-hwp5html", "#!/bin/sh\nexit 0\n");
    let root = scratch();
    let converter = ExternalConverter::new(silent, tools.path("weasyprint"));

    let err = convert_in_workspace(&converter, root.path(), b"doc")
        .await
        .unwrap_err();
    assert!(matches!(err, ConversionError::StageOneFailed { .. }), "got: {err:?}");
}

#[tokio::test]
async fn empty_pdf_is_stage_two_failure() {
    let tools = Tools::new();
    let empty = tools.script("empty-weasyprint", "#!/bin/sh\n: > \"$2\"\n");
    let root = scratch();
    let converter = ExternalConverter::new(tools.path("hwp5html"), empty);

    let err = convert_in_workspace(&converter, root.path(), b"doc")
        .await
        .unwrap_err();
    assert!(matches!(err, ConversionError::StageTwoFailed { .. }), "got: {err:?}");
}

#[tokio::test]
async fn service_runs_batch_through_external_tools() {
    let tools = Tools::new();
    let dir = tempfile::tempdir().unwrap();
    let config = ServiceConfig::builder()
        .scratch_root(dir.path().join("scratch"))
        .output_root(dir.path().join("files"))
        .stage_one_program(tools.path("hwp5html"))
        .stage_two_program(tools.path("weasyprint"))
        .workers(2)
        .session_ttl_secs(None)
        .build()
        .unwrap();
    let service = ConversionService::with_external_tools(config).unwrap();

    let session = service
        .submit(vec![
            Upload::new("memo.hwp", b"quarterly memo".to_vec()),
            Upload::new("broken.hwp", b"CORRUPT".to_vec()),
        ])
        .await
        .unwrap();
    let status = service
        .wait_for(&session, Duration::from_secs(20))
        .await
        .unwrap();

    assert_eq!(status.status, BatchState::Error);
    assert_eq!(status.failed[0].filename, "broken.hwp");

    let pdf = service.artifact(&session, "memo.pdf").await.unwrap();
    assert!(pdf.bytes.starts_with(b"%PDF-1.7"));
    assert!(is_empty(&dir.path().join("scratch")));

    service.shutdown().await;
}

#[tokio::test]
async fn missing_tool_fails_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServiceConfig::builder()
        .scratch_root(dir.path().join("scratch"))
        .output_root(dir.path().join("files"))
        .stage_one_program(dir.path().join("no-such-hwp5html"))
        .build()
        .unwrap();

    assert!(ConversionService::with_external_tools(config).is_err());
}
