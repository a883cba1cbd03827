//! Integration tests for the `pulsar` binary.

use std::path::Path;
use std::process::{Command, Output};

use pulsar_io::read_wav_channels;
use tempfile::TempDir;

/// Runs the `pulsar` binary with an isolated config directory.
fn pulsar(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pulsar"))
        .env("XDG_CONFIG_HOME", home)
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("failed to run pulsar")
}

// ---------------------------------------------------------------------------
// pulsar render
// ---------------------------------------------------------------------------

#[test]
fn cli_render_writes_requested_frames() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("sine.wav");
    let output = pulsar(
        dir.path(),
        &[
            "render",
            out.to_str().unwrap(),
            "--frames",
            "20",
            "--frame-size",
            "64",
            "--sample-rate",
            "8000",
        ],
    );
    assert!(
        output.status.success(),
        "render failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let (channels, sr) = read_wav_channels(&out).unwrap();
    assert_eq!(sr, 8000);
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].len(), 20 * 64);
    // Default gain of 0.5 bounds the sine.
    assert!(channels[0].iter().all(|s| s.abs() <= 0.5 + 1e-6));
    assert!(channels[0].iter().any(|s| s.abs() > 0.1));
}

#[test]
fn cli_render_stereo_noise() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("noise.wav");
    let output = pulsar(
        dir.path(),
        &[
            "render",
            out.to_str().unwrap(),
            "--source",
            "noise",
            "--stereo",
            "--frames",
            "8",
        ],
    );
    assert!(output.status.success());

    let (channels, _) = read_wav_channels(&out).unwrap();
    assert_eq!(channels.len(), 2);
    assert_eq!(channels[0], channels[1]);
    assert_eq!(channels[0].len(), 8 * 128);
}

#[test]
fn cli_render_uses_config_file() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("vm.toml");
    std::fs::write(&config, "sample_rate = 22050\nframe_size = 32\n").unwrap();
    let out = dir.path().join("cfg.wav");
    let output = pulsar(
        dir.path(),
        &[
            "--config",
            config.to_str().unwrap(),
            "render",
            out.to_str().unwrap(),
            "--frames",
            "4",
        ],
    );
    assert!(output.status.success());

    let (channels, sr) = read_wav_channels(&out).unwrap();
    assert_eq!(sr, 22050);
    assert_eq!(channels[0].len(), 4 * 32);
}

#[test]
fn cli_rejects_invalid_config() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("bad.toml");
    std::fs::write(&config, "frame_size = 0\n").unwrap();
    let output = pulsar(
        dir.path(),
        &["--config", config.to_str().unwrap(), "dump"],
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("frame_size"));
}

// ---------------------------------------------------------------------------
// pulsar dump / run
// ---------------------------------------------------------------------------

#[test]
fn cli_dump_lists_opcodes() {
    let dir = TempDir::new().unwrap();
    let output = pulsar(dir.path(), &["dump", "--frame-size", "16"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("frame_size=16"), "got: {stdout}");
    for op in ["SINE", "COPY_BUFFER", "MUL", "OUTPUT"] {
        assert!(stdout.contains(op), "dump should contain {op}: {stdout}");
    }
}

#[test]
fn cli_run_with_null_backend() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("null.toml");
    std::fs::write(&config, "[backend]\ntype = \"null\"\nmax_frames = 10\n").unwrap();
    let output = pulsar(
        dir.path(),
        &["--config", config.to_str().unwrap(), "run"],
    );
    assert!(
        output.status.success(),
        "run failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn cli_run_with_wav_backend() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("run.wav");
    let config = dir.path().join("wav.toml");
    std::fs::write(
        &config,
        format!(
            "frame_size = 16\n[backend]\ntype = \"wav\"\npath = {:?}\nmax_frames = 5\n",
            out.to_str().unwrap()
        ),
    )
    .unwrap();
    let output = pulsar(
        dir.path(),
        &["--config", config.to_str().unwrap(), "run"],
    );
    assert!(output.status.success());

    let (channels, _) = read_wav_channels(&out).unwrap();
    assert_eq!(channels[0].len(), 5 * 16);
}
