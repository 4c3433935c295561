use offpeak::error::OffpeakError;

#[test]
fn error_constructors() {
    assert!(matches!(
        OffpeakError::config("x"),
        OffpeakError::Config { .. }
    ));
    assert!(matches!(
        OffpeakError::validation("f", "m"),
        OffpeakError::Validation { .. }
    ));
    assert!(matches!(
        OffpeakError::duplicate("id"),
        OffpeakError::Duplicate { .. }
    ));
    assert!(matches!(OffpeakError::io("x"), OffpeakError::Io { .. }));
    assert!(matches!(
        OffpeakError::generic("x"),
        OffpeakError::Generic { .. }
    ));
}

#[test]
fn display_messages() {
    let e = OffpeakError::validation("peak_end", "bad");
    let s = format!("{}", e);
    assert!(s.contains("Validation error"));

    let e = OffpeakError::duplicate("sensor.import_11:00_14:00");
    let s = format!("{}", e);
    assert!(s.contains("Duplicate tracker"));
}

#[test]
fn from_serde_json_maps_to_serialization() {
    let err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
    let e: OffpeakError = err.into();
    assert!(matches!(e, OffpeakError::Serialization { .. }));
}
