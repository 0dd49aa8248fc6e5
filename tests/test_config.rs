use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use waypoint::config::Config;
use waypoint::http::parser::DEFAULT_MAX_BODY_SIZE;
use waypoint::proxy::MatchPolicy;

#[test]
fn test_config_required_arguments() {
    let cfg = Config::try_parse_from(["waypoint", "-f", "routes.json", "-p", "8000"]).unwrap();

    assert_eq!(cfg.mapping_file, PathBuf::from("routes.json"));
    assert_eq!(cfg.port, 8000);
    assert_eq!(cfg.listen_addr(), "0.0.0.0:8000");
    assert_eq!(cfg.match_policy, MatchPolicy::LongestPrefix);
    assert_eq!(cfg.max_body_bytes, DEFAULT_MAX_BODY_SIZE);
}

#[test]
fn test_config_missing_mapping_file_is_error() {
    assert!(Config::try_parse_from(["waypoint", "-p", "8000"]).is_err());
}

#[test]
fn test_config_missing_port_is_error() {
    assert!(Config::try_parse_from(["waypoint", "-f", "routes.json"]).is_err());
}

#[test]
fn test_config_invalid_port_is_error() {
    assert!(Config::try_parse_from(["waypoint", "-f", "r.json", "-p", "http"]).is_err());
}

#[test]
fn test_config_long_options() {
    let cfg = Config::try_parse_from([
        "waypoint",
        "--mapping-file",
        "/etc/routes.json",
        "--port",
        "9000",
        "--bind",
        "127.0.0.1",
        "--upstream-host",
        "127.0.0.1",
        "--connect-timeout-ms",
        "250",
        "--read-timeout-secs",
        "0",
        "--match-policy",
        "lexicographic",
    ])
    .unwrap();

    assert_eq!(cfg.listen_addr(), "127.0.0.1:9000");
    assert_eq!(cfg.match_policy, MatchPolicy::Lexicographic);

    let upstream = cfg.upstream_settings();
    assert_eq!(upstream.host, "127.0.0.1");
    assert_eq!(upstream.connect_timeout, Duration::from_millis(250));
    assert_eq!(upstream.read_timeout, None);
}

#[test]
fn test_config_ipv6_bind_is_bracketed() {
    let cfg =
        Config::try_parse_from(["waypoint", "-f", "r.json", "-p", "80", "--bind", "::1"]).unwrap();
    assert_eq!(cfg.listen_addr(), "[::1]:80");
}

#[test]
fn test_config_default_read_timeout() {
    let cfg = Config::try_parse_from(["waypoint", "-f", "r.json", "-p", "80"]).unwrap();
    assert_eq!(
        cfg.upstream_settings().read_timeout,
        Some(Duration::from_secs(60))
    );
}

#[test]
fn test_config_max_body_bytes() {
    let cfg = Config::try_parse_from([
        "waypoint",
        "-f",
        "r.json",
        "-p",
        "80",
        "--max-body-bytes",
        "1024",
    ])
    .unwrap();
    assert_eq!(cfg.max_body_bytes, 1024);
}
