use super::*;

#[test]
fn defaults_are_local_bind_and_stock_pin() {
    let settings = Settings::default();
    assert_eq!(settings.server_bind, "127.0.0.1:8443");
    assert_eq!(settings.default_pin, "1234");
}

#[test]
fn sanitize_keeps_a_four_digit_pin() {
    assert_eq!(sanitize_default_pin("9876"), "9876");
    assert_eq!(sanitize_default_pin(" 4321 "), "4321");
}

#[test]
fn sanitize_falls_back_on_bad_pins() {
    assert_eq!(sanitize_default_pin(""), "1234");
    assert_eq!(sanitize_default_pin("123"), "1234");
    assert_eq!(sanitize_default_pin("12345"), "1234");
    assert_eq!(sanitize_default_pin("abcd"), "1234");
}
