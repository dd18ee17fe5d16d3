use picam_bot_core::config::{CameraSettings, MIN_IMAGE_HEIGHT};
use std::env;

// Single test so environment mutations never race
#[test]
fn settings_load_from_environment() -> Result<(), Box<dyn std::error::Error>> {
    env::set_var("ALLOWED_USERS", "alice, @bob");
    env::set_var("IMAGE_WIDTH", "1920");
    env::set_var("IMAGE_HEIGHT", "100");
    env::set_var("CAMERA_PARAMS", r#"{"-rot": 90, "-awb": "sun"}"#);
    env::set_var("IS_IN_MAINTENANCE", "true");
    env::set_var("MAINTENANCE_MESSAGE", "");

    let settings = CameraSettings::new()?;
    assert!(settings.allowed_users().contains("alice"));
    assert!(settings.allowed_users().contains("bob"));
    assert_eq!(settings.image_width(), 1920);
    assert_eq!(settings.image_height(), MIN_IMAGE_HEIGHT);
    assert_eq!(settings.camera_params.len(), 2);
    assert_eq!(settings.camera_params["-awb"], serde_json::json!("sun"));
    assert!(settings.is_in_maintenance);
    // Empty variables are ignored, so the default message applies
    assert!(settings.maintenance_message.is_none());
    settings.validate()?;

    env::set_var("CAMERA_PARAMS", "not json");
    assert!(CameraSettings::new().is_err());

    for key in [
        "ALLOWED_USERS",
        "IMAGE_WIDTH",
        "IMAGE_HEIGHT",
        "CAMERA_PARAMS",
        "IS_IN_MAINTENANCE",
        "MAINTENANCE_MESSAGE",
    ] {
        env::remove_var(key);
    }
    Ok(())
}
