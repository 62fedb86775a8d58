//! Public API smoke tests

use portscope::{codec, AppConfig, PortConfig, TextEncoding};

#[test]
fn encode_decode_round_trip_through_public_api() {
    let text = "hello 你好\r\n";
    let bytes = codec::encode(text, TextEncoding::Gbk).unwrap();
    assert_eq!(codec::decode(&bytes, TextEncoding::Gbk).unwrap(), text);
}

#[test]
fn default_settings_produce_openable_config() {
    let settings = AppConfig::default();
    let config = settings.port_config("COM_TEST");
    assert!(config.validate().is_ok());
    assert_eq!(config.line_settings().baud_rate, 9600);
}

#[test]
fn port_config_builder_defaults() {
    let config = PortConfig::new("/dev/ttyUSB0", 115_200);
    assert_eq!(config.data_bits, 8);
    assert_eq!(config.stop_bits, 1);
    assert_eq!(config.encoding, TextEncoding::Gbk);
}
