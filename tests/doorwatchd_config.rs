use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use doorwatch::config::DoorwatchdConfig;
use doorwatch::motion::KernelShape;
use doorwatch::{ColorSample, Region, ReportFormat};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "DOORWATCH_CONFIG",
        "DOORWATCH_SOURCE_URL",
        "DOORWATCH_REPORT_FORMAT",
        "DOORWATCH_ALERT_FRAMES",
        "DOORWATCH_MQTT_BROKER",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let toml = r#"
        [monitor]
        left_door = { x = 10, y = 20, width = 30, height = 40 }
        expected_color = [80.0, 90.0, 100.0]
        movement_cutoff = 250
        color_cutoff = 35.5
        erosion = { shape = "rect", width = 4, height = 4 }

        [source]
        url = "rtsp://camera-1/stream"
        target_fps = 15
        frame_timeout_ms = 2000
        reconnect_attempts = 3

        [report]
        format = "json"

        [alert]
        frames_threshold = 300

        [alert.mqtt]
        broker = "mqtt://127.0.0.1:1883"
        topic_prefix = "lobby"
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    std::env::set_var("DOORWATCH_CONFIG", file.path());
    std::env::set_var("DOORWATCH_SOURCE_URL", "rtsp://camera-2/stream");
    std::env::set_var("DOORWATCH_ALERT_FRAMES", "600");

    let cfg = DoorwatchdConfig::load().expect("load config");

    assert_eq!(cfg.monitor.left_door, Region::new(10, 20, 30, 40));
    assert_eq!(cfg.monitor.right_door, Region::new(540, 270, 90, 230));
    assert_eq!(cfg.monitor.expected_color, ColorSample::rgb(80.0, 90.0, 100.0));
    assert_eq!(cfg.monitor.movement_cutoff, 250);
    assert_eq!(cfg.monitor.color_cutoff, 35.5);
    assert_eq!(cfg.monitor.erosion.shape, KernelShape::Rect);
    assert_eq!(cfg.monitor.erosion.width, 4);
    assert_eq!(cfg.monitor.dilation.shape, KernelShape::Ellipse);
    assert_eq!(cfg.monitor.dilation.width, 2);

    assert_eq!(cfg.source.url, "rtsp://camera-2/stream");
    assert_eq!(cfg.source.target_fps, 15);
    assert_eq!(cfg.source.frame_timeout, Duration::from_millis(2000));
    assert_eq!(cfg.source.reconnect_attempts, 3);
    assert_eq!(cfg.source.width, 1280);

    assert_eq!(cfg.report_format, ReportFormat::Json);
    assert_eq!(cfg.alert.frames_threshold, Some(600));
    let mqtt = cfg.alert.mqtt.expect("mqtt settings");
    assert_eq!(mqtt.broker, "mqtt://127.0.0.1:1883");
    assert_eq!(mqtt.topic_prefix, "lobby");
    assert_eq!(mqtt.client_id, "doorwatchd");

    clear_env();
}

#[test]
fn defaults_apply_without_config_file_or_with_blank_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("DOORWATCH_ALERT_FRAMES", "  ");
    std::env::set_var("DOORWATCH_SOURCE_URL", "");
    let cfg = DoorwatchdConfig::load().expect("load defaults");
    assert_eq!(cfg.source.url, "stub://doorway");
    assert_eq!(cfg.source.target_fps, 10);
    assert_eq!(cfg.source.reconnect_attempts, 0);
    assert_eq!(cfg.report_format, ReportFormat::Text);
    assert_eq!(cfg.alert.frames_threshold, None);
    assert!(cfg.alert.mqtt.is_none());
    assert_eq!(cfg.monitor.intensity_threshold, 20);
    assert_eq!(cfg.monitor.movement_cutoff, 100);

    clear_env();
}

#[test]
fn rejects_invalid_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("DOORWATCH_ALERT_FRAMES", "0");
    assert!(DoorwatchdConfig::load().is_err());
    std::env::set_var("DOORWATCH_ALERT_FRAMES", "soon");
    assert!(DoorwatchdConfig::load().is_err());
    clear_env();

    std::env::set_var("DOORWATCH_REPORT_FORMAT", "xml");
    assert!(DoorwatchdConfig::load().is_err());
    clear_env();

    // Right door runs past a 1280x720 synthetic frame.
    let mut file = NamedTempFile::new().expect("temp config");
    let toml = r#"
        [monitor]
        right_door = { x = 1200, y = 270, width = 90, height = 230 }
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    assert!(DoorwatchdConfig::load_from(Some(file.path())).is_err());

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"[monitor\nbroken").expect("write config");
    assert!(DoorwatchdConfig::load_from(Some(file.path())).is_err());

    clear_env();
}
