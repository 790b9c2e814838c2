// smoke tests of the command line interface
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

#[test]
fn version() -> Result<(),Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("ps2kit")?;
    cmd.arg("--version").assert().success();
    Ok(())
}

#[test]
fn requires_subcommand() -> Result<(),Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("ps2kit")?;
    cmd.assert().failure();
    Ok(())
}

#[test]
fn format_df_ls() -> Result<(),Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let img = dir.path().join("card.ps2");
    let img_arg = img.to_str().unwrap();

    let mut cmd = Command::cargo_bin("ps2kit")?;
    cmd.args(["--image",img_arg,"format","-c","256"])
        .assert().success();

    // refuses to clobber without -f
    let mut cmd = Command::cargo_bin("ps2kit")?;
    cmd.args(["--image",img_arg,"format","-c","256"])
        .assert().failure();

    let mut cmd = Command::cargo_bin("ps2kit")?;
    cmd.args(["--image",img_arg,"df"])
        .assert().success()
        .stdout(predicate::str::contains("bytes free."));

    let mut cmd = Command::cargo_bin("ps2kit")?;
    cmd.args(["--image",img_arg,"mkdir","/TEST1"])
        .assert().success();

    let mut cmd = Command::cargo_bin("ps2kit")?;
    cmd.args(["--image",img_arg,"ls"])
        .assert().success()
        .stdout(predicate::str::contains("TEST1"));

    let mut cmd = Command::cargo_bin("ps2kit")?;
    cmd.args(["--image",img_arg,"check"])
        .assert().success()
        .stdout(predicate::str::contains("No errors found."));
    Ok(())
}

#[test]
fn add_extract_round_trip() -> Result<(),Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let img = dir.path().join("card.ps2");
    let img_arg = img.to_str().unwrap();
    let local = dir.path().join("payload.bin");
    std::fs::write(&local,vec![0x77;1500])?;
    let out = dir.path().join("back.bin");

    let mut cmd = Command::cargo_bin("ps2kit")?;
    cmd.args(["--image",img_arg,"format","-c","256"])
        .assert().success();

    let mut cmd = Command::cargo_bin("ps2kit")?;
    cmd.args(["--image",img_arg,"add",local.to_str().unwrap()])
        .assert().success();

    let mut cmd = Command::cargo_bin("ps2kit")?;
    cmd.args(["--image",img_arg,"extract","-o",out.to_str().unwrap(),"/payload.bin"])
        .assert().success();
    assert_eq!(std::fs::read(&out)?,vec![0x77;1500]);

    let mut cmd = Command::cargo_bin("ps2kit")?;
    cmd.args(["--image",img_arg,"remove","/payload.bin"])
        .assert().success();
    Ok(())
}

#[test]
fn set_and_clear_flags() -> Result<(),Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let img = dir.path().join("card.ps2");
    let img_arg = img.to_str().unwrap();
    let local = dir.path().join("f.bin");
    std::fs::write(&local,b"flagme")?;

    let mut cmd = Command::cargo_bin("ps2kit")?;
    cmd.args(["--image",img_arg,"format","-c","256"]).assert().success();
    let mut cmd = Command::cargo_bin("ps2kit")?;
    cmd.args(["--image",img_arg,"add",local.to_str().unwrap()]).assert().success();

    let mut cmd = Command::cargo_bin("ps2kit")?;
    cmd.args(["--image",img_arg,"set","-H","/f.bin"]).assert().success();

    // hidden flag shows up in the listing
    let mut cmd = Command::cargo_bin("ps2kit")?;
    cmd.args(["--image",img_arg,"ls"])
        .assert().success()
        .stdout(predicate::str::contains("H"));

    let mut cmd = Command::cargo_bin("ps2kit")?;
    cmd.args(["--image",img_arg,"clear","-H","/f.bin"]).assert().success();
    Ok(())
}

#[test]
fn import_export_psu() -> Result<(),Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let img = dir.path().join("card.ps2");
    let img_arg = img.to_str().unwrap();

    let mut cmd = Command::cargo_bin("ps2kit")?;
    cmd.args(["--image",img_arg,"format","-c","256"]).assert().success();
    let mut cmd = Command::cargo_bin("ps2kit")?;
    cmd.args(["--image",img_arg,"mkdir","/BESLES-55555"]).assert().success();
    let local = dir.path().join("save.dat");
    std::fs::write(&local,vec![0x31;700])?;
    let mut cmd = Command::cargo_bin("ps2kit")?;
    cmd.args(["--image",img_arg,"add","-d","/BESLES-55555",local.to_str().unwrap()])
        .assert().success();

    let psu = dir.path().join("out.psu");
    let mut cmd = Command::cargo_bin("ps2kit")?;
    cmd.args(["--image",img_arg,"export","-o",psu.to_str().unwrap(),"/BESLES-55555"])
        .assert().success()
        .stdout(predicate::str::contains("Exporting"));

    let mut cmd = Command::cargo_bin("ps2kit")?;
    cmd.args(["--image",img_arg,"delete","/BESLES-55555"]).assert().success();

    let mut cmd = Command::cargo_bin("ps2kit")?;
    cmd.args(["--image",img_arg,"import",psu.to_str().unwrap()])
        .assert().success()
        .stdout(predicate::str::contains("Importing"));

    // a second import collides, -i waves it through
    let mut cmd = Command::cargo_bin("ps2kit")?;
    cmd.args(["--image",img_arg,"import",psu.to_str().unwrap()])
        .assert().failure();
    let mut cmd = Command::cargo_bin("ps2kit")?;
    cmd.args(["--image",img_arg,"import","-i",psu.to_str().unwrap()])
        .assert().success()
        .stdout(predicate::str::contains("ignored"));

    let mut cmd = Command::cargo_bin("ps2kit")?;
    cmd.args(["--image",img_arg,"ls","/BESLES-55555"])
        .assert().success()
        .stdout(predicate::str::contains("save.dat"));
    Ok(())
}
