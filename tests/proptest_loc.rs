//! LOC ヘッダー拡張の Property-Based Testing
use proptest::prelude::*;
use shiguredo_moq_container::{
    Decode, Encode, TrackKind, Uint, Varint,
    loc::{
        AudioLevel, CaptureTimestamp, LocHeaderExtension, LocObject, UnknownHeaderExtension,
        VideoConfig, VideoFrameMarking, is_varint_extension_id,
    },
};

// ===== Strategy 定義 =====

/// CaptureTimestamp 拡張を生成する Strategy
fn arb_capture_timestamp() -> impl Strategy<Value = LocHeaderExtension> {
    (0u64..1 << 62).prop_map(|timestamp_micros| {
        LocHeaderExtension::CaptureTimestamp(CaptureTimestamp { timestamp_micros })
    })
}

/// VideoFrameMarking 拡張を生成する Strategy
fn arb_video_frame_marking() -> impl Strategy<Value = LocHeaderExtension> {
    (any::<bool>(), any::<bool>(), any::<bool>(), 0u8..8, 0u8..4).prop_map(
        |(independent, discardable, base_layer_sync, tid, sid)| {
            LocHeaderExtension::VideoFrameMarking(VideoFrameMarking {
                independent,
                discardable,
                base_layer_sync,
                temporal_layer_id: Uint::<u8, 3>::new(tid),
                spatial_layer_id: Uint::<u8, 2>::new(sid),
            })
        },
    )
}

/// AudioLevel 拡張を生成する Strategy
fn arb_audio_level() -> impl Strategy<Value = LocHeaderExtension> {
    (any::<bool>(), 0u8..128).prop_map(|(voice_activity, level)| {
        LocHeaderExtension::AudioLevel(AudioLevel {
            voice_activity,
            level: Uint::<u8, 7>::new(level),
        })
    })
}

/// VideoConfig 拡張を生成する Strategy
fn arb_video_config() -> impl Strategy<Value = LocHeaderExtension> {
    prop::collection::vec(any::<u8>(), 0..64)
        .prop_map(|config| LocHeaderExtension::VideoConfig(VideoConfig { config }))
}

/// 未知の拡張を生成する Strategy
///
/// 既知の ID (2, 4, 6, 13) と衝突しない ID を使う
fn arb_unknown_extension() -> impl Strategy<Value = LocHeaderExtension> {
    (14u64..1 << 30).prop_flat_map(|id| {
        if is_varint_extension_id(id) {
            (0u64..1 << 62)
                .prop_map(move |value| {
                    LocHeaderExtension::Unknown(UnknownHeaderExtension::Varint { id, value })
                })
                .boxed()
        } else {
            prop::collection::vec(any::<u8>(), 0..32)
                .prop_map(move |value| {
                    LocHeaderExtension::Unknown(UnknownHeaderExtension::Bytes { id, value })
                })
                .boxed()
        }
    })
}

/// 任意の拡張を生成する Strategy
fn arb_extension() -> impl Strategy<Value = LocHeaderExtension> {
    prop_oneof![
        arb_capture_timestamp(),
        arb_video_frame_marking(),
        arb_audio_level(),
        arb_video_config(),
        arb_unknown_extension(),
    ]
}

/// LocObject を生成する Strategy
fn arb_loc_object() -> impl Strategy<Value = LocObject> {
    (
        prop_oneof![Just(TrackKind::Audio), Just(TrackKind::Video)],
        prop::collection::vec(arb_extension(), 0..5),
        prop::collection::vec(any::<u8>(), 0..256),
    )
        .prop_map(|(kind, extensions, payload)| {
            let mut object = LocObject::new(kind, payload);
            object.extensions = extensions;
            object
        })
}

// ===== ラウンドトリップのテスト =====

proptest! {
    #[test]
    fn extension_roundtrip(extension in arb_extension()) {
        let bytes = extension.encode_to_vec().unwrap();
        let (decoded, size) = LocHeaderExtension::decode(&bytes).unwrap();
        prop_assert_eq!(size, bytes.len());
        prop_assert_eq!(decoded, extension);
    }

    #[test]
    fn extension_parity_law(extension in arb_extension()) {
        let bytes = extension.encode_to_vec().unwrap();
        let (id, id_size) = Varint::decode(&bytes).unwrap();
        prop_assert_eq!(id.get(), extension.extension_id());

        if !is_varint_extension_id(id.get()) {
            // 奇数 ID では ID の直後の可変長整数が値のバイト長と一致する
            let (len, len_size) = Varint::decode(&bytes[id_size..]).unwrap();
            prop_assert_eq!(id_size + len_size + len.get() as usize, bytes.len());
        }
    }

    #[test]
    fn loc_object_split_roundtrip(object in arb_loc_object()) {
        let headers = object.encode_header_extensions().unwrap();
        let decoded = LocObject::decode(&headers, &object.payload, object.kind).unwrap();
        prop_assert_eq!(&decoded.extensions, &object.extensions);
        prop_assert_eq!(&decoded.payload, &object.payload);
        prop_assert_eq!(decoded.kind, object.kind);

        // デコード結果を再エンコードしてもバイト列が一致する
        prop_assert_eq!(decoded.encode_header_extensions().unwrap(), headers);
    }

    #[test]
    fn loc_object_concatenated_form(object in arb_loc_object()) {
        let headers = object.encode_header_extensions().unwrap();
        let concatenated = object.encode_to_vec().unwrap();
        prop_assert_eq!(concatenated.len(), headers.len() + object.payload.len());
        prop_assert_eq!(&concatenated[..headers.len()], &headers[..]);
    }
}
