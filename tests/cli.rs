use std::path::PathBuf;

use clap::Parser;

use serial_courier_lib::cli::{Cli, Command};
use serial_courier_lib::commands::{all_succeeded, plan, Plan};
use serial_courier_lib::config::ConfigError;
use serial_courier_lib::transfer::Direction;
use serial_courier_lib::Transfer;

#[test]
fn flags_override_defaults() {
    let cli = Cli::try_parse_from([
        "serial-courier",
        "--port",
        "/dev/ttyACM0",
        "-b",
        "57600",
        "upload",
        "exp1/DADOS.txt",
        "--chunk-size",
        "16",
        "--pacing-ms",
        "25",
    ])
    .unwrap();

    let config = cli.resolve_config().unwrap();
    assert_eq!(config.link.port, "/dev/ttyACM0");
    assert_eq!(config.link.baud_rate, 57600);
    assert_eq!(config.upload.chunk_size, 16);
    assert_eq!(config.upload.pacing_delay_ms, 25);
    assert_eq!(config.link.read_timeout_ms, 2000);

    assert_eq!(
        plan(&cli.command, &config).unwrap(),
        Plan::Upload(PathBuf::from("exp1/DADOS.txt"))
    );
}

#[test]
fn download_list_falls_back_to_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("courier.json");
    std::fs::write(
        &path,
        r#"{
            "link": { "port": "COM4" },
            "download": { "files": ["DADOS.txt", "CONVERG.txt"], "destination_dir": "saida" }
        }"#,
    )
    .unwrap();

    let args = ["serial-courier", "download", "-c", path.to_str().unwrap()];
    let cli = Cli::try_parse_from(args).unwrap();
    let config = cli.resolve_config().unwrap();
    assert_eq!(config.link.port, "COM4");
    assert_eq!(config.link.baud_rate, 115200);

    match plan(&cli.command, &config).unwrap() {
        Plan::Download { names, dest } => {
            assert_eq!(names, vec!["DADOS.txt", "CONVERG.txt"]);
            assert_eq!(dest, PathBuf::from("saida"));
        }
        other => panic!("unexpected plan {:?}", other),
    }
}

#[test]
fn named_files_replace_configured_list() {
    let args = ["serial-courier", "download", "pso_data.bin", "--dest", "out"];
    let cli = Cli::try_parse_from(args).unwrap();
    let config = cli.resolve_config().unwrap();
    assert_eq!(config.download.files, vec!["pso_data.bin"]);
    assert!(matches!(cli.command, Command::Download { .. }));
    assert_eq!(
        plan(&cli.command, &config).unwrap(),
        Plan::Download {
            names: vec!["pso_data.bin".to_string()],
            dest: PathBuf::from("out"),
        }
    );
}

#[test]
fn empty_download_list_is_rejected_before_connecting() {
    let cli = Cli::try_parse_from(["serial-courier", "download"]).unwrap();
    let config = cli.resolve_config().unwrap();
    let err = plan(&cli.command, &config).unwrap_err();
    assert!(err.to_string().contains("No files to download"));
}

#[test]
fn oversized_chunk_fails_validation() {
    let args = ["serial-courier", "upload", "a.bin", "--chunk-size", "48"];
    let cli = Cli::try_parse_from(args).unwrap();
    let err = cli.resolve_config().unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
    assert!(err.to_string().contains("half of the 64-byte device buffer"));
}

#[test]
fn missing_subcommand_is_a_usage_error() {
    assert!(Cli::try_parse_from(["serial-courier", "--port", "/dev/ttyUSB1"]).is_err());
}

#[test]
fn exit_status_reflects_every_transfer() {
    assert!(all_succeeded(&[]));
    let pending = Transfer::new(Direction::Download, "DADOS.txt");
    assert!(!all_succeeded(&[pending]));
}
