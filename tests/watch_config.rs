use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use motion_watch::config::WatchConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "MOTION_CONFIG",
        "MOTION_SENSITIVITY",
        "MOTION_MIN_AREA",
        "MOTION_MIN_FRAMES",
        "MOTION_COOLDOWN_SECS",
        "MOTION_PERSIST",
        "MOTION_FRAME_DIR",
        "MOTION_DEVICE",
        "MOTION_CAMERA_INDEX",
        "MOTION_RETRY_DELAY_SECS",
        "MOTION_TARGET_OBJECTS",
        "MOTION_WEB_ADDR",
        "MOTION_EVENTS_LOG",
        "TELEGRAM_TOKEN",
        "TELEGRAM_CHAT_ID",
        "DISCORD_WEBHOOK_URL",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = WatchConfig::load().expect("load defaults");
    assert_eq!(cfg.settings.detector.sensitivity, 25);
    assert_eq!(cfg.settings.detector.min_area, 500);
    assert_eq!(cfg.settings.detector.min_motion_frames, 3);
    assert_eq!(cfg.settings.detector.cooldown_seconds, 10.0);
    assert!(cfg.settings.detector.persist_mode);
    assert_eq!(cfg.settings.target_objects, vec!["cat", "person"]);
    assert_eq!(cfg.frame_dir.to_str(), Some("frames"));
    assert_eq!(cfg.camera.device, "/dev/video0");
    assert_eq!(cfg.retry_delay, Duration::from_secs(5));
    assert_eq!(cfg.web.addr, "127.0.0.1:5000");
    assert!(cfg.notify.telegram_token.is_none());
    assert!(cfg.events_log.is_none());
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "frame_dir": "/var/lib/motion/frames",
        "detector": {
            "sensitivity": 30,
            "min_area": 800,
            "cooldown_seconds": 4.5
        },
        "camera": {
            "device": "stub://porch",
            "target_fps": 5,
            "width": 320,
            "height": 240,
            "retry_delay_secs": 2
        },
        "web": { "addr": "0.0.0.0:8080" },
        "notify": { "telegram_token": "file-token" },
        "target_objects": ["Dog"]
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("MOTION_CONFIG", file.path());
    std::env::set_var("MOTION_MIN_AREA", "1200");
    std::env::set_var("MOTION_MIN_FRAMES", "5");
    std::env::set_var("MOTION_TARGET_OBJECTS", "cat, Bird");
    std::env::set_var("TELEGRAM_CHAT_ID", "1234");

    let cfg = WatchConfig::load().expect("load config");

    assert_eq!(cfg.frame_dir.to_str(), Some("/var/lib/motion/frames"));
    assert_eq!(cfg.settings.detector.sensitivity, 30);
    assert_eq!(cfg.settings.detector.min_area, 1200);
    assert_eq!(cfg.settings.detector.min_motion_frames, 5);
    assert_eq!(cfg.settings.detector.cooldown_seconds, 4.5);
    assert_eq!(cfg.settings.target_objects, vec!["cat", "bird"]);
    assert_eq!(cfg.camera.device, "stub://porch");
    assert_eq!(cfg.camera.target_fps, 5);
    assert_eq!((cfg.camera.width, cfg.camera.height), (320, 240));
    assert_eq!(cfg.retry_delay, Duration::from_secs(2));
    assert_eq!(cfg.web.addr, "0.0.0.0:8080");
    assert_eq!(cfg.notify.telegram_token.as_deref(), Some("file-token"));
    assert_eq!(cfg.notify.telegram_chat_id.as_deref(), Some("1234"));

    clear_env();
}

#[test]
fn toml_config_files_are_supported() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
        events_log = "events.jsonl"

        [detector]
        min_motion_frames = 1
        persist_mode = false

        [camera]
        index = 2
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("MOTION_CONFIG", file.path());

    let cfg = WatchConfig::load().expect("load toml config");
    assert_eq!(cfg.settings.detector.min_motion_frames, 1);
    assert!(!cfg.settings.detector.persist_mode);
    assert_eq!(cfg.camera.device, "/dev/video2");
    assert_eq!(cfg.events_log.unwrap().to_str(), Some("events.jsonl"));

    clear_env();
}

#[test]
fn camera_env_precedence() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MOTION_CAMERA_INDEX", "1");
    let cfg = WatchConfig::load().expect("load config");
    assert_eq!(cfg.camera.device, "/dev/video1");

    std::env::set_var("MOTION_DEVICE", "stub://yard");
    let cfg = WatchConfig::load().expect("load config");
    assert_eq!(cfg.camera.device, "stub://yard");

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();

    for (key, value) in [
        ("MOTION_SENSITIVITY", "0"),
        ("MOTION_SENSITIVITY", "loud"),
        ("MOTION_MIN_AREA", "-5"),
        ("MOTION_MIN_FRAMES", "0"),
        ("MOTION_COOLDOWN_SECS", "-1"),
        ("MOTION_COOLDOWN_SECS", "1e20"),
        ("MOTION_COOLDOWN_SECS", "NaN"),
        ("MOTION_WEB_ADDR", "not-an-address"),
        ("DISCORD_WEBHOOK_URL", "ftp://example.com/hook"),
    ] {
        clear_env();
        std::env::set_var(key, value);
        assert!(
            WatchConfig::load().is_err(),
            "{}={} should be rejected",
            key,
            value
        );
    }

    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("MOTION_CONFIG", "/nonexistent/motion.json");
    assert!(WatchConfig::load().is_err());

    clear_env();
}
