// Copyright 2026 The Scopeline Authors. Licensed under Apache-2.0.

//! Scenario: capturing a parameter set containing
//! a plain id, a password, and an email with default capture options.

use scopeline::prelude::*;

#[test]
fn sensitive_parameters_are_redacted_by_default() {
    let opts = CaptureOptions::default();

    let (_, user_id) = ParameterCapture::capture_one("userId", &42i64, &opts);
    let (_, password) = ParameterCapture::capture_one("password", &"hunter2".to_string(), &opts);
    let (_, email) =
        ParameterCapture::capture_one("email", &"alice@example.com".to_string(), &opts);

    assert_eq!(user_id, CapturedValue::Int(42));
    assert_eq!(password, CapturedValue::Str("***".to_string()));
    assert_eq!(email, CapturedValue::Str("al***om".to_string()));
}
