//! LOC オブジェクトのエンコード・デコードのテスト
use shiguredo_moq_container::{
    Decode, ErrorKind, Result, TrackKind, Varint,
    loc::{
        LOC_AUDIO_LEVEL_ID, LOC_CAPTURE_TIMESTAMP_ID, LocHeaderExtension, LocObject,
        UnknownHeaderExtension, is_varint_extension_id,
    },
};

#[test]
fn independent_video_frame_roundtrip() -> Result<()> {
    let payload = vec![0x5A; 8192];
    let mut object = LocObject::new(TrackKind::Video, payload.clone());
    object.set_capture_timestamp(1_234_567_890_000);
    object.set_video_frame_marking(true, false, true, 0, 0)?;
    object.set_video_config(vec![0x01, 0x42, 0xC0, 0x1E]);
    object.group_id = 3;
    object.object_id = 14;
    object.subgroup_id = 1;

    // ヘッダー拡張とペイロードは別々のチャネルで転送される
    let headers = object.encode_header_extensions()?;
    let decoded = LocObject::decode(&headers, &payload, TrackKind::Video)?;

    assert_eq!(decoded.capture_timestamp(), Some(1_234_567_890_000));
    assert!(decoded.is_independent_frame());
    assert!(decoded.video_frame_marking().unwrap().base_layer_sync);
    assert_eq!(decoded.video_config(), Some(&[0x01, 0x42, 0xC0, 0x1E][..]));
    assert_eq!(decoded.payload, payload);
    assert_eq!(decoded.extensions, object.extensions);
    Ok(())
}

#[test]
fn audio_level_exact_bytes() -> Result<()> {
    let mut object = LocObject::new(TrackKind::Audio, Vec::new());
    object.set_audio_level(true, 45)?;

    // 値は (45 << 1) | 1 = 91 の可変長整数一つになる
    // （91 は 6 ビットに収まらないので 2 バイト形式でエンコードされる）
    let headers = object.encode_header_extensions()?;
    assert_eq!(headers, [0x06, 0x40, 0x5B]);

    let decoded = LocObject::decode(&headers, &[], TrackKind::Audio)?;
    let level = decoded.audio_level().unwrap();
    assert!(level.voice_activity);
    assert_eq!(level.level.get(), 45);
    Ok(())
}

#[test]
fn audio_level_out_of_range_is_rejected() {
    let mut object = LocObject::new(TrackKind::Audio, Vec::new());
    let e = object.set_audio_level(false, 128).expect_err("128 is out of range");
    assert_eq!(e.kind, ErrorKind::OutOfRange);
}

#[test]
fn video_frame_marking_layer_ids_are_range_checked() {
    let mut object = LocObject::new(TrackKind::Video, Vec::new());
    assert!(object.set_video_frame_marking(true, false, false, 7, 3).is_ok());

    let e = object
        .set_video_frame_marking(true, false, false, 8, 0)
        .expect_err("TID 8 is out of range");
    assert_eq!(e.kind, ErrorKind::OutOfRange);

    let e = object
        .set_video_frame_marking(true, false, false, 0, 4)
        .expect_err("SID 4 is out of range");
    assert_eq!(e.kind, ErrorKind::OutOfRange);
}

#[test]
fn video_frame_marking_bit_layout() -> Result<()> {
    let mut object = LocObject::new(TrackKind::Video, Vec::new());
    object.set_video_frame_marking(true, false, true, 5, 2)?;

    let headers = object.encode_header_extensions()?;
    // ID 4、値は I(1) + B(4) + TID 5 << 3 + SID 2 << 6 = 0xAD
    assert_eq!(headers.len(), 3);
    assert_eq!(headers[0], 0x04);
    let (value, _) = Varint::decode(&headers[1..])?;
    assert_eq!(value.get(), 0x01 | 0x04 | (5 << 3) | (2 << 6));

    let decoded = LocObject::decode(&headers, &[], TrackKind::Video)?;
    let marking = decoded.video_frame_marking().unwrap();
    assert_eq!(marking.temporal_layer_id.get(), 5);
    assert_eq!(marking.spatial_layer_id.get(), 2);
    assert!(!marking.discardable);
    Ok(())
}

#[test]
fn capture_timestamp_has_no_length_prefix() -> Result<()> {
    let mut object = LocObject::new(TrackKind::Audio, Vec::new());
    object.set_capture_timestamp(57);

    // 偶数 ID なので [ID][値] の二つの可変長整数だけになる
    let headers = object.encode_header_extensions()?;
    assert_eq!(headers, [LOC_CAPTURE_TIMESTAMP_ID as u8, 57]);
    Ok(())
}

#[test]
fn odd_id_value_is_length_prefixed() -> Result<()> {
    let mut object = LocObject::new(TrackKind::Video, Vec::new());
    object.set_video_config(vec![0xAA; 100]);

    let headers = object.encode_header_extensions()?;
    // ID 13 の後ろに長さ 100 の可変長整数（2 バイト形式）が続く
    assert_eq!(headers[0], 13);
    let (len, len_size) = Varint::decode(&headers[1..])?;
    assert_eq!(len.get(), 100);
    assert_eq!(headers.len(), 1 + len_size + 100);
    Ok(())
}

#[test]
fn unknown_extensions_roundtrip() -> Result<()> {
    // 未知の偶数 ID (8): 可変長整数一つ
    // 未知の奇数 ID (9): 長さプレフィックス付きのバイト列
    let mut headers = vec![0x08, 0x2A];
    headers.extend_from_slice(&[0x09, 0x03, 0x01, 0x02, 0x03]);

    let decoded = LocObject::decode(&headers, &[], TrackKind::Audio)?;
    assert_eq!(decoded.extensions.len(), 2);
    assert_eq!(
        decoded.extensions[0],
        LocHeaderExtension::Unknown(UnknownHeaderExtension::Varint { id: 8, value: 42 })
    );
    assert_eq!(
        decoded.extensions[1],
        LocHeaderExtension::Unknown(UnknownHeaderExtension::Bytes {
            id: 9,
            value: vec![1, 2, 3],
        })
    );

    // 未知の拡張もそのまま再エンコードされる
    assert_eq!(decoded.encode_header_extensions()?, headers);
    Ok(())
}

#[test]
fn concatenated_form_appends_payload() -> Result<()> {
    let mut object = LocObject::new(TrackKind::Audio, vec![0x11, 0x22, 0x33]);
    object.set_audio_level(false, 10)?;

    let headers = object.encode_header_extensions()?;
    let concatenated = object.encode_to_vec()?;
    assert_eq!(&concatenated[..headers.len()], &headers[..]);
    assert_eq!(&concatenated[headers.len()..], &[0x11, 0x22, 0x33]);
    Ok(())
}

#[test]
fn setters_replace_existing_extensions() -> Result<()> {
    let mut object = LocObject::new(TrackKind::Audio, Vec::new());
    object.set_capture_timestamp(1);
    object.set_capture_timestamp(2);

    assert_eq!(object.extensions.len(), 1);
    assert_eq!(object.capture_timestamp(), Some(2));
    Ok(())
}

#[test]
fn truncated_extension_block_is_rejected() {
    // ID 13 (奇数) で長さ 10 を宣言しながら 2 バイトしか続かない
    let headers = [0x0D, 0x0A, 0x01, 0x02];
    let e = LocObject::decode(&headers, &[], TrackKind::Video)
        .expect_err("truncated value should be rejected");
    assert_eq!(e.kind, ErrorKind::Truncated);
}

#[test]
fn extension_id_parity_table() {
    assert!(is_varint_extension_id(LOC_CAPTURE_TIMESTAMP_ID));
    assert!(is_varint_extension_id(LOC_AUDIO_LEVEL_ID));
    assert!(!is_varint_extension_id(13));
}
