//! End-to-end checks against a real PostgreSQL toolchain.
//!
//! Each test skips with a note on stderr when `initdb` cannot be found or
//! when running as root (the server refuses to start as root).

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use camino::Utf8PathBuf;
use nix::unistd::geteuid;
use pgserver::{Lifecycle, PostgresServer, ServerError, StopOptions};
use pgserver_config::Config;
use rstest::{fixture, rstest};
use tempfile::TempDir;

const DEBIAN_LAYOUT: &str = "/usr/lib/postgresql";
const PARALLELISM: usize = 8;

fn skip(reason: &str) {
    let _ = writeln!(io::stderr(), "skipping PostgreSQL round trip: {reason}");
}

fn runs_initdb(binary: &Path) -> bool {
    Command::new(binary)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
}

/// `initdb` on `PATH`, otherwise the newest Debian-style install.
fn locate_bin_dir() -> Option<Option<Utf8PathBuf>> {
    if runs_initdb(Path::new("initdb")) {
        return Some(None);
    }
    let mut candidates: Vec<PathBuf> = fs::read_dir(DEBIAN_LAYOUT)
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.path().join("bin"))
        .filter(|bin| runs_initdb(&bin.join("initdb")))
        .collect();
    candidates.sort();
    let newest = candidates.pop()?;
    Utf8PathBuf::from_path_buf(newest).ok().map(Some)
}

#[fixture]
fn toolchain() -> Option<Config> {
    if geteuid().is_root() {
        skip("the server refuses to run as root");
        return None;
    }
    let Some(bin_dir) = locate_bin_dir() else {
        skip("initdb was not found");
        return None;
    };
    Some(Config {
        bin_dir,
        silence_output: true,
        ..Config::default()
    })
}

fn start(config: &Config, data_dir: Option<&Path>) -> PostgresServer {
    let mut builder = PostgresServer::builder().config(config.clone()).auto_start(true);
    if let Some(path) = data_dir {
        builder = builder.data_dir(path);
    }
    builder.build().expect("start PostgreSQL")
}

#[rstest]
fn default_database_round_trip(toolchain: Option<Config>) {
    let Some(config) = toolchain else { return };
    let server = start(&config, None);

    let mut client = server.connect(None).expect("connect to default database");
    let mut transaction = client.transaction().expect("begin");
    transaction
        .batch_execute("CREATE TABLE foo (bar int); INSERT INTO foo VALUES (2)")
        .expect("write row");
    transaction.commit().expect("commit");
    drop(client);

    let mut reader = server.connect(None).expect("reconnect");
    let rows: Vec<(i32,)> = reader
        .query("SELECT * FROM foo", &[])
        .expect("select")
        .iter()
        .map(|row| (row.get(0),))
        .collect();
    assert_eq!(rows, [(2,)]);
    drop(reader);

    let data_dir = server.data_dir().to_path_buf();
    server
        .stop(StopOptions::graceful().blocking())
        .expect("stop");
    assert!(!data_dir.exists(), "ephemeral storage should be removed");
}

#[rstest]
fn repeated_connects_never_trip_duplicate_database(toolchain: Option<Config>) {
    let Some(config) = toolchain else { return };
    let server = start(&config, None);
    for _ in 0..3 {
        let client = server
            .connect(Some("fixtures"))
            .expect("connect to existing database");
        drop(client);
    }
    server
        .stop(StopOptions::fast().blocking())
        .expect("stop");
}

/// Provisions each name on its own thread, all at once.
fn connect_concurrently(
    server: &PostgresServer,
    names: &[String],
) -> Vec<Result<(), ServerError>> {
    thread::scope(|scope| {
        let workers: Vec<_> = names
            .iter()
            .map(|name| scope.spawn(move || server.connect(Some(name.as_str())).map(drop)))
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().expect("provisioning thread panicked"))
            .collect()
    })
}

#[rstest]
fn concurrent_provisioning_of_distinct_names(toolchain: Option<Config>) {
    let Some(config) = toolchain else { return };
    let server = start(&config, None);
    let names: Vec<String> = (0..PARALLELISM)
        .map(|index| format!("tenant_{index}"))
        .collect();
    let results = connect_concurrently(&server, &names);
    assert!(results.iter().all(Result::is_ok), "results: {results:?}");
    server
        .stop(StopOptions::fast().blocking())
        .expect("stop");
}

#[rstest]
fn concurrent_provisioning_of_one_name_is_idempotent(toolchain: Option<Config>) {
    let Some(config) = toolchain else { return };
    let server = start(&config, None);
    let names = vec!["shared".to_owned(); PARALLELISM];
    let results = connect_concurrently(&server, &names);
    assert!(results.iter().all(Result::is_ok), "results: {results:?}");
    server
        .stop(StopOptions::fast().blocking())
        .expect("stop");
}

#[rstest]
fn empty_database_name_connects_to_the_default(toolchain: Option<Config>) {
    let Some(config) = toolchain else { return };
    let server = start(&config, None);
    let mut client = server.connect(Some("")).expect("connect with empty name");
    let current: String = client
        .query_one("SELECT current_database()", &[])
        .expect("current database")
        .get(0);
    assert_eq!(current, config.default_database);
    drop(client);
    server
        .stop(StopOptions::fast().blocking())
        .expect("stop");
}

#[rstest]
fn databases_are_isolated(toolchain: Option<Config>) {
    let Some(config) = toolchain else { return };
    let server = start(&config, None);
    let mut left = server.connect(Some("left")).expect("connect left");
    left.batch_execute("CREATE TABLE only_left (id int); INSERT INTO only_left VALUES (1)")
        .expect("write left");
    let mut right = server.connect(Some("right")).expect("connect right");
    let visible: i64 = right
        .query_one(
            "SELECT count(*) FROM information_schema.tables WHERE table_name = 'only_left'",
            &[],
        )
        .expect("count tables")
        .get(0);
    assert_eq!(visible, 0);
    drop((left, right));
    server
        .stop(StopOptions::fast().blocking())
        .expect("stop");
}

#[rstest]
fn supplied_storage_persists_across_instances(toolchain: Option<Config>) {
    let Some(config) = toolchain else { return };
    let data = TempDir::new().expect("data dir");

    let first = start(&config, Some(data.path()));
    let mut client = first.connect(None).expect("connect first");
    client
        .batch_execute("CREATE TABLE foo (bar int); INSERT INTO foo VALUES (13)")
        .expect("write row");
    drop(client);
    first
        .stop(StopOptions::graceful().blocking())
        .expect("stop first");
    assert_eq!(first.state(), Lifecycle::Stopped);
    let marker = fs::metadata(data.path().join("PG_VERSION")).expect("cluster files kept");

    let second = start(&config, Some(data.path()));
    let after = fs::metadata(data.path().join("PG_VERSION")).expect("cluster files kept");
    assert_eq!(
        marker.modified().ok(),
        after.modified().ok(),
        "second instance must not reinitialise"
    );
    let mut client = second.connect(None).expect("connect second");
    let rows: Vec<i32> = client
        .query("SELECT bar FROM foo", &[])
        .expect("select")
        .iter()
        .map(|row| row.get(0))
        .collect();
    assert_eq!(rows, [13]);
    drop(client);
    second
        .stop(StopOptions::fast().blocking())
        .expect("stop second");
}
