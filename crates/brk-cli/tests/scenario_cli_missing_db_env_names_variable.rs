use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

/// Ledger commands resolve the database URL from the env var named in config.
/// When it is unset the error names the variable and never a URL.
#[test]
fn trade_show_without_db_env_fails_with_var_name() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cfg_path = dir.path().join("base.yaml");
    std::fs::write(&cfg_path, "database:\n  url_env: BRK_CLI_TEST_URL_NEVER_SET\n")?;

    Command::cargo_bin("brk")?
        .env_remove("BRK_CLI_TEST_URL_NEVER_SET")
        .args([
            "--config",
            &cfg_path.to_string_lossy(),
            "trade",
            "show",
            "--id",
            "1",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("BRK_CLI_TEST_URL_NEVER_SET"))
        .stderr(predicate::str::contains("postgres://").not());

    Ok(())
}
