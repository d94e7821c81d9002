//! Integration tests for the validated attach sequence.
//!
//! Uses the current user's perf-data layout inside a temp directory, a
//! signaller that never touches real processes, and a fake target bound at
//! the control socket.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jvmtool_attach::validator::{ElfExtractor, ExtractionError, MetadataExtractor, MetadataRecord};
use jvmtool_attach::analysis::{start_analysis, AnalysisOptions};
use jvmtool_attach::{
    AgentLibraryValidator, AttachError, AttachTarget, Attacher, BuildIdentity, HandshakeOutcome,
    Liveness, NullReporter, Signaller, ValidationError,
};
use jvmtool_core::{current_user, perf_data_dir, AttachChannelPaths, AttachConfig};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixListener;

const TARGET_PID: u32 = 31337;

// ============================================================================
// Test Helpers
// ============================================================================

/// Fixed liveness answer; counts trigger requests.
#[derive(Debug)]
struct StubSignaller {
    liveness: Liveness,
    triggers: Mutex<u32>,
}

impl StubSignaller {
    fn new(liveness: Liveness) -> Self {
        Self {
            liveness,
            triggers: Mutex::new(0),
        }
    }

    fn triggers(&self) -> u32 {
        *self.triggers.lock().unwrap()
    }
}

impl Signaller for StubSignaller {
    fn probe(&self, _pid: u32) -> io::Result<Liveness> {
        Ok(self.liveness)
    }

    fn request_attach(&self, _pid: u32) -> io::Result<()> {
        *self.triggers.lock().unwrap() += 1;
        Ok(())
    }
}

#[derive(Debug)]
struct TrustingExtractor(BuildIdentity);

impl MetadataExtractor for TrustingExtractor {
    fn format(&self) -> &'static str {
        "trusting"
    }

    fn extract_from(&self, _image: &[u8]) -> Result<Vec<u8>, ExtractionError> {
        Ok(MetadataRecord::for_identity(&self.0).to_bytes().to_vec())
    }

    fn extract(&self, _path: &Path) -> Result<Vec<u8>, ExtractionError> {
        self.extract_from(&[])
    }
}

struct Fixture {
    temp: TempDir,
    signaller: Arc<StubSignaller>,
    attacher: Attacher,
}

impl Fixture {
    fn new(liveness: Liveness, extractor: Arc<dyn MetadataExtractor>) -> Self {
        let temp = TempDir::new().unwrap();
        let signaller = Arc::new(StubSignaller::new(liveness));
        let identity = BuildIdentity::new("test", "salt", "now");

        let config = AttachConfig {
            wait_budget_secs: 1,
            poll_interval_ms: 10,
            ..AttachConfig::with_tmp_dir(temp.path())
        };
        let attacher = Attacher::new(config)
            .with_reporter(Arc::new(NullReporter))
            .with_signaller(signaller.clone())
            .with_validator(
                AgentLibraryValidator::new()
                    .with_identity(identity)
                    .with_extractor(extractor),
            );

        Self {
            temp,
            signaller,
            attacher,
        }
    }

    fn trusting(liveness: Liveness) -> Self {
        let identity = BuildIdentity::new("test", "salt", "now");
        Self::new(liveness, Arc::new(TrustingExtractor(identity)))
    }

    fn add_marker(&self) {
        let dir = perf_data_dir(self.temp.path(), &current_user().unwrap());
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(TARGET_PID.to_string()), b"").unwrap();
    }

    fn paths(&self) -> AttachChannelPaths {
        AttachChannelPaths::new(TARGET_PID, self.temp.path())
    }

    /// Binds a target that accepts the load.
    fn spawn_target(&self) -> tokio::task::JoinHandle<()> {
        let listener = UnixListener::bind(self.paths().socket()).unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut nuls = 0;
            let mut byte = [0u8; 1];
            while nuls < 5 && stream.read(&mut byte).await.unwrap() == 1 {
                if byte[0] == 0 {
                    nuls += 1;
                }
            }
            stream.write_all(b"0\n0\n").await.unwrap();
        })
    }

    fn target(&self) -> AttachTarget {
        AttachTarget::new(TARGET_PID, "/opt/jvmtool/lib/jvmtool-agent.so").params("analysis=all")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_attach_success() {
    let fixture = Fixture::trusting(Liveness::Alive);
    fixture.add_marker();
    let target = fixture.spawn_target();

    let report = fixture.attacher.attach(&fixture.target()).await.unwrap();
    target.await.unwrap();

    assert_eq!(report.pid, TARGET_PID);
    assert_eq!(report.user, current_user().unwrap());
    assert_eq!(report.handshake, HandshakeOutcome::AlreadyListening);
    assert_eq!(
        report.library.path(),
        PathBuf::from("/opt/jvmtool/lib/jvmtool-agent.so")
    );
}

#[tokio::test]
async fn test_attach_restricted_process_is_allowed() {
    let fixture = Fixture::trusting(Liveness::Restricted);
    fixture.add_marker();
    let target = fixture.spawn_target();

    fixture.attacher.attach(&fixture.target()).await.unwrap();
    target.await.unwrap();
}

#[tokio::test]
async fn test_dead_process_not_found() {
    let fixture = Fixture::trusting(Liveness::Gone);
    fixture.add_marker();

    let err = fixture.attacher.attach(&fixture.target()).await.unwrap_err();
    assert!(matches!(err, AttachError::ProcessNotFound { pid: TARGET_PID }));
    assert_eq!(fixture.signaller.triggers(), 0);
}

#[tokio::test]
async fn test_missing_marker_not_owned() {
    let fixture = Fixture::trusting(Liveness::Alive);

    let err = fixture.attacher.attach(&fixture.target()).await.unwrap_err();
    assert!(matches!(err, AttachError::NotOwnedByUser { pid: TARGET_PID, .. }));
}

#[tokio::test]
async fn test_unknown_user() {
    let fixture = Fixture::trusting(Liveness::Alive);
    let target = fixture.target().user("jvmtool-no-such-user-zz");

    let err = fixture.attacher.attach(&target).await.unwrap_err();
    assert!(matches!(err, AttachError::User(_)));
}

#[tokio::test]
async fn test_validation_precedes_any_signal() {
    let fixture = Fixture::new(Liveness::Alive, Arc::new(ElfExtractor));
    fixture.add_marker();
    let library = fixture.temp.path().join("agent.jar");
    std::fs::write(&library, b"PK\x03\x04").unwrap();

    let target = AttachTarget::new(TARGET_PID, &library);
    let err = fixture.attacher.attach(&target).await.unwrap_err();

    assert!(matches!(
        err,
        AttachError::Validation(ValidationError::Extraction { .. })
    ));
    assert_eq!(fixture.signaller.triggers(), 0);
    assert!(!fixture.paths().trigger().exists());
}

#[tokio::test]
async fn test_handshake_timeout_surfaces() {
    let fixture = Fixture::trusting(Liveness::Alive);
    fixture.add_marker();

    let err = tokio::time::timeout(
        Duration::from_secs(10),
        fixture.attacher.attach(&fixture.target()),
    )
    .await
    .expect("handshake gives up within its budget")
    .unwrap_err();

    assert!(matches!(err, AttachError::Handshake(_)));
    assert_eq!(fixture.signaller.triggers(), 1);
    assert!(!fixture.paths().trigger().exists());
}

#[tokio::test]
async fn test_analysis_records_target_snapshot() {
    let fixture = Fixture::trusting(Liveness::Alive);
    fixture.add_marker();
    let target = fixture.spawn_target();

    let run = start_analysis(&fixture.attacher, TARGET_PID, None, &AnalysisOptions::default())
        .await
        .unwrap();
    target.await.unwrap();

    assert_eq!(run.report.pid, TARGET_PID);
    assert_eq!(run.target.pid, TARGET_PID);
    assert_eq!(run.target.owning_user, current_user().unwrap());
    // The stub target is not a real process, so the snapshot is bare.
    if run.target.command_line.is_none() && run.target.started_at.is_none() {
        assert!(run.target_replaced());
    }
}
