use melsec_tags::{CallOptions, ClientConfig, ClientError, ConnectionRegistry, PlcClient};
use melsec_tags_mock::MockPlc;

fn client(plc: &MockPlc) -> PlcClient {
    let _ = env_logger::builder().is_test(true).try_init();
    let registry = ConnectionRegistry::new(plc.factory());
    PlcClient::new(ClientConfig::new("192.168.8.106", 1281), registry).expect("client")
}

#[tokio::test(start_paused = true)]
async fn packed_hello_round_trip() {
    let plc = MockPlc::new();
    let c = client(&plc);

    let w = c
        .write_string("D3030", "HELLO", CallOptions::default())
        .await
        .expect("write string");
    assert_eq!(w.word_count, 3);
    assert_eq!(w.text, "HELLO\0");
    assert_eq!(plc.word("D3030"), Some(0x4845));
    assert_eq!(plc.word("D3031"), Some(0x4C4C));
    assert_eq!(plc.word("D3032"), Some(0x4F00));

    plc.clear_ops();
    let r = c
        .read_string("D3030", 10, CallOptions::default())
        .await
        .expect("read string");
    assert_eq!(r.text, "HELLO");
    assert_eq!(r.word_count, 3);
    assert_eq!(r.quality, "Good");
    // nothing past the word holding the terminator
    assert_eq!(plc.reads(), ["D3030", "D3031", "D3032"]);
}

#[tokio::test(start_paused = true)]
async fn packed_read_without_terminator_uses_all_words() {
    let plc = MockPlc::new();
    plc.set_word("D10", 0x4142);
    plc.set_word("D11", 0x4344);
    let c = client(&plc);
    let r = c
        .read_string("D10", 2, CallOptions::default())
        .await
        .expect("read string");
    assert_eq!(r.text, "ABCD");
    assert_eq!(r.word_count, 2);
}

#[tokio::test(start_paused = true)]
async fn unicode_thai_round_trip() {
    let plc = MockPlc::new();
    let c = client(&plc);

    let w = c
        .write_unicode_string("D4000", "ทดสอบ", CallOptions::default())
        .await
        .expect("write unicode");
    assert_eq!(w.word_count, 5);
    assert_eq!(plc.word("D4000"), Some(0x0E17));

    let r = c
        .read_unicode_string("D4000", 8, CallOptions::default())
        .await
        .expect("read unicode");
    assert_eq!(r.text, "ทดสอบ");
    assert_eq!(r.word_count, 8);
    assert_eq!(plc.reads().len(), 8);
}

#[tokio::test(start_paused = true)]
async fn string_element_failure_aborts() {
    let plc = MockPlc::new();
    plc.set_word("D0", 0x4142);
    plc.fail_read("D1", "device busy");
    let c = client(&plc);
    let err = c
        .read_string("D0", 4, CallOptions::default())
        .await
        .expect_err("element failure");
    assert!(
        matches!(err, ClientError::ElementaryOperation { index: 1, ref address, .. } if address == "D1"),
        "{err}"
    );
}

#[tokio::test(start_paused = true)]
async fn arguments_are_checked_before_connecting() {
    let plc = MockPlc::new();
    let c = client(&plc);

    let err = c
        .read_string("100D", 4, CallOptions::default())
        .await
        .expect_err("bad address");
    assert!(matches!(err, ClientError::InvalidAddress(_)), "{err}");

    let err = c
        .write_string("D0", "", CallOptions::default())
        .await
        .expect_err("empty text");
    assert!(matches!(err, ClientError::InvalidArgument(_)), "{err}");

    let err = c
        .write_string("D0", "ทด", CallOptions::default())
        .await
        .expect_err("not 8-bit");
    assert!(matches!(err, ClientError::Encoding(_)), "{err}");

    let err = c
        .read_unicode_string("D0", 0, CallOptions::default())
        .await
        .expect_err("zero words");
    assert!(matches!(err, ClientError::InvalidArgument(_)), "{err}");

    assert_eq!(plc.engines_created(), 0);
}

#[tokio::test(start_paused = true)]
async fn huge_word_counts_are_address_errors() {
    let plc = MockPlc::new();
    let c = client(&plc);

    let err = c
        .read_unicode_string("D0", usize::MAX, CallOptions::default())
        .await
        .expect_err("past the address range");
    assert!(matches!(err, ClientError::InvalidAddress(_)), "{err}");

    let err = c
        .read_string("D4294967295", 2, CallOptions::default())
        .await
        .expect_err("past the address range");
    assert!(matches!(err, ClientError::InvalidAddress(_)), "{err}");

    assert_eq!(plc.engines_created(), 0);
}
