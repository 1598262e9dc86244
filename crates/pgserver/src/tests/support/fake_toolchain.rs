//! Shell stand-ins for `initdb` and `postgres`.
//!
//! The scripts honour the real command-line contract (`-D`, `-k`, `-p`) and
//! are steered by marker files in the data directory. The server records each
//! stop signal it receives in `<data>/signals`.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use once_cell::sync::Lazy;
use pgserver_config::Config;
use tempfile::TempDir;

const FAKE_INITDB: &str = r#"#!/bin/sh
args="$*"
data=""
while [ $# -gt 0 ]; do
  case "$1" in
    -D) data="$2"; shift 2 ;;
    *) shift ;;
  esac
done
mkdir -p "$data" || exit 1
echo 16 > "$data/PG_VERSION"
echo "initdb $args" >> "$data/initdb.log"
"#;

const FAKE_INITDB_FAILING: &str = "#!/bin/sh\nexit 1\n";

const FAKE_POSTGRES: &str = r#"#!/bin/sh
data=""
sock=""
port=5432
while [ $# -gt 0 ]; do
  case "$1" in
    -D) data="$2"; shift 2 ;;
    -k) sock="$2"; shift 2 ;;
    -p) port="$2"; shift 2 ;;
    -h) shift 2 ;;
    *) shift ;;
  esac
done
[ -e "$data/crash-on-start" ] && exit 3
socket="$sock/.s.PGSQL.$port"
finish() {
  echo "$1" >> "$data/signals"
  rm -f "$socket" "$socket.lock"
  exit 0
}
if [ -e "$data/ignore-signals" ]; then
  trap 'echo ignored >> "$data/signals"' INT TERM
else
  trap 'finish fast' INT
  trap 'finish graceful' TERM
fi
touch "$socket.lock"
[ -e "$data/never-ready" ] || touch "$socket"
while :; do
  sleep 0.05
done
"#;

/// Marker files that change how the fake server behaves.
#[derive(Debug, Clone, Copy)]
pub enum FakeMarker {
    /// Exit with status 3 before creating the socket.
    CrashOnStart,
    /// Never create the socket.
    NeverReady,
    /// Ignore stop signals until killed.
    IgnoreSignals,
}

impl FakeMarker {
    const fn file_name(self) -> &'static str {
        match self {
            Self::CrashOnStart => "crash-on-start",
            Self::NeverReady => "never-ready",
            Self::IgnoreSignals => "ignore-signals",
        }
    }

    /// Places the marker in `data_dir`.
    pub fn place(self, data_dir: &Path) {
        fs::write(data_dir.join(self.file_name()), b"").expect("write marker file");
    }
}

struct FakeToolchain {
    dir: TempDir,
}

// Written once per test binary; rewriting an executable another thread is
// about to exec fails with ETXTBSY.
static TOOLCHAIN: Lazy<FakeToolchain> = Lazy::new(|| {
    let dir = tempfile::Builder::new()
        .prefix("pgserver-fake-bin-")
        .tempdir()
        .expect("fake toolchain dir");
    for (name, body) in [
        ("initdb", FAKE_INITDB),
        ("initdb-failing", FAKE_INITDB_FAILING),
        ("postgres", FAKE_POSTGRES),
    ] {
        let path = dir.path().join(name);
        fs::write(&path, body).expect("write fake binary");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod fake binary");
    }
    FakeToolchain { dir }
});

/// Configuration pointing at the fake toolchain with short timings.
pub fn fake_config() -> Config {
    let bin_dir = Utf8PathBuf::from_path_buf(TOOLCHAIN.dir.path().to_path_buf())
        .expect("temporary directory path is UTF-8");
    Config {
        bin_dir: Some(bin_dir),
        startup_timeout_ms: 2_000,
        poll_interval_ms: 10,
        silence_output: true,
        ..Config::default()
    }
}

/// Stop signals recorded by the fake server, oldest first.
pub fn read_signals(data_dir: &Path) -> Vec<String> {
    fs::read_to_string(data_dir.join("signals"))
        .map(|content| content.lines().map(str::to_owned).collect())
        .unwrap_or_default()
}

/// Polls `condition` until it holds or `timeout` expires.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}
