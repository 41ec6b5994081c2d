//! ボックスのエンコード・デコードの Property-Based Testing
use proptest::prelude::*;
use proptest::strategy::BoxedStrategy;
use shiguredo_moq_container::{
    Decode, Encode, SampleFlags, Varint,
    boxes::{
        Brand, MdatBox, MfhdBox, MoofBox, StypBox, TfdtBox, TfhdBox, TrafBox, TrunBox, TrunSample,
    },
    fragment::CmafFragment,
};

// ===== Strategy 定義 =====

/// SampleFlags を生成する Strategy
fn arb_sample_flags() -> impl Strategy<Value = SampleFlags> {
    any::<u32>().prop_map(SampleFlags::new)
}

/// Brand を生成する Strategy
fn arb_brand() -> impl Strategy<Value = Brand> {
    any::<[u8; 4]>().prop_map(Brand::new)
}

/// StypBox を生成する Strategy
fn arb_styp_box() -> impl Strategy<Value = StypBox> {
    (
        arb_brand(),
        any::<u32>(),
        prop::collection::vec(arb_brand(), 0..4),
    )
        .prop_map(|(major_brand, minor_version, compatible_brands)| StypBox {
            major_brand,
            minor_version,
            compatible_brands,
        })
}

/// MfhdBox を生成する Strategy
fn arb_mfhd_box() -> impl Strategy<Value = MfhdBox> {
    any::<u32>().prop_map(|sequence_number| MfhdBox { sequence_number })
}

/// TfdtBox を生成する Strategy
fn arb_tfdt_box() -> impl Strategy<Value = TfdtBox> {
    any::<u64>().prop_map(|base_media_decode_time| TfdtBox {
        base_media_decode_time,
    })
}

/// TfhdBox を生成する Strategy
fn arb_tfhd_box() -> impl Strategy<Value = TfhdBox> {
    (
        any::<u32>(), // track_id
        prop::option::of(any::<u64>()),
        prop::option::of(any::<u32>()),
        prop::option::of(any::<u32>()),
        prop::option::of(any::<u32>()),
        prop::option::of(arb_sample_flags()),
        any::<bool>(),
        any::<bool>(),
        // 既知のフラグと衝突しないビットだけを未知のフラグとして使う
        prop::sample::select(vec![0u32, 0x000004, 0x000040, 0x000080]),
    )
        .prop_map(
            |(
                track_id,
                base_data_offset,
                sample_description_index,
                default_sample_duration,
                default_sample_size,
                default_sample_flags,
                duration_is_empty,
                default_base_is_moof,
                unknown_flags,
            )| TfhdBox {
                track_id,
                base_data_offset,
                sample_description_index,
                default_sample_duration,
                default_sample_size,
                default_sample_flags,
                duration_is_empty,
                default_base_is_moof,
                unknown_flags,
            },
        )
}

/// TrunBox を生成する Strategy (一貫性のあるサンプル)
fn arb_trun_box() -> impl Strategy<Value = TrunBox> {
    (
        prop::option::of(any::<i32>()),
        prop::option::of(arb_sample_flags()),
        // サンプルは一貫性を持たせる（全てのサンプルが同じオプションフィールドを持つ）
        (
            any::<bool>(), // has_duration
            any::<bool>(), // has_size
            any::<bool>(), // has_flags
            any::<bool>(), // has_composition_time_offset
            0usize..10,    // sample_count
        ),
    )
        .prop_flat_map(
            |(
                data_offset,
                first_sample_flags,
                (has_duration, has_size, has_flags, has_cto, count),
            )| {
                let duration_strategy: BoxedStrategy<Option<u32>> = if has_duration {
                    any::<u32>().prop_map(Some).boxed()
                } else {
                    Just(None).boxed()
                };
                let size_strategy: BoxedStrategy<Option<u32>> = if has_size {
                    any::<u32>().prop_map(Some).boxed()
                } else {
                    Just(None).boxed()
                };
                let flags_strategy: BoxedStrategy<Option<SampleFlags>> = if has_flags {
                    arb_sample_flags().prop_map(Some).boxed()
                } else {
                    Just(None).boxed()
                };
                let cto_strategy: BoxedStrategy<Option<i32>> = if has_cto {
                    any::<i32>().prop_map(Some).boxed()
                } else {
                    Just(None).boxed()
                };

                prop::collection::vec(
                    (duration_strategy, size_strategy, flags_strategy, cto_strategy).prop_map(
                        |(duration, size, flags, composition_time_offset)| TrunSample {
                            duration,
                            size,
                            flags,
                            composition_time_offset,
                        },
                    ),
                    count..=count,
                )
                .prop_map(move |samples| TrunBox {
                    data_offset,
                    first_sample_flags,
                    samples,
                })
            },
        )
}

/// TrafBox を生成する Strategy
fn arb_traf_box() -> impl Strategy<Value = TrafBox> {
    (
        arb_tfhd_box(),
        prop::option::of(arb_tfdt_box()),
        prop::collection::vec(arb_trun_box(), 0..3),
    )
        .prop_map(|(tfhd_box, tfdt_box, trun_boxes)| TrafBox {
            tfhd_box,
            tfdt_box,
            trun_boxes,
            unknown_boxes: vec![],
        })
}

/// MoofBox を生成する Strategy
fn arb_moof_box() -> impl Strategy<Value = MoofBox> {
    (arb_mfhd_box(), prop::collection::vec(arb_traf_box(), 0..3)).prop_map(
        |(mfhd_box, traf_boxes)| MoofBox {
            mfhd_box,
            traf_boxes,
            unknown_boxes: vec![],
        },
    )
}

/// CmafFragment を生成する Strategy
fn arb_cmaf_fragment() -> impl Strategy<Value = CmafFragment> {
    (
        arb_styp_box(),
        arb_moof_box(),
        prop::collection::vec(any::<u8>(), 0..1024),
    )
        .prop_map(|(styp_box, moof_box, payload)| CmafFragment {
            styp_box,
            moof_box,
            mdat_box: MdatBox { payload },
            unknown_boxes: vec![],
        })
}

// ===== ラウンドトリップのテスト =====

proptest! {
    #[test]
    fn sample_flags_roundtrip(flags in arb_sample_flags()) {
        // 予約ビットを除く全ビットがラウンドトリップする
        prop_assert_eq!(SampleFlags::new(flags.get()), flags);

        let bytes = flags.encode_to_vec().unwrap();
        let (decoded, size) = SampleFlags::decode(&bytes).unwrap();
        prop_assert_eq!(size, bytes.len());
        prop_assert_eq!(decoded, flags);
    }

    #[test]
    fn styp_box_roundtrip(b in arb_styp_box()) {
        let bytes = b.encode_to_vec().unwrap();
        let (decoded, size) = StypBox::decode(&bytes).unwrap();
        prop_assert_eq!(size, bytes.len());
        prop_assert_eq!(decoded, b);
    }

    #[test]
    fn mfhd_box_roundtrip(b in arb_mfhd_box()) {
        let bytes = b.encode_to_vec().unwrap();
        let (decoded, size) = MfhdBox::decode(&bytes).unwrap();
        prop_assert_eq!(size, bytes.len());
        prop_assert_eq!(decoded, b);
    }

    #[test]
    fn tfdt_box_roundtrip(b in arb_tfdt_box()) {
        let bytes = b.encode_to_vec().unwrap();
        let (decoded, size) = TfdtBox::decode(&bytes).unwrap();
        prop_assert_eq!(size, bytes.len());
        prop_assert_eq!(decoded, b);
    }

    #[test]
    fn tfhd_box_roundtrip(b in arb_tfhd_box()) {
        let bytes = b.encode_to_vec().unwrap();
        let (decoded, size) = TfhdBox::decode(&bytes).unwrap();
        prop_assert_eq!(size, bytes.len());
        prop_assert_eq!(decoded, b);
    }

    #[test]
    fn trun_box_roundtrip(b in arb_trun_box()) {
        let bytes = b.encode_to_vec().unwrap();
        let (decoded, size) = TrunBox::decode(&bytes).unwrap();
        prop_assert_eq!(size, bytes.len());
        prop_assert_eq!(decoded.samples.len(), b.samples.len());
        prop_assert_eq!(decoded, b);
    }

    #[test]
    fn moof_box_roundtrip(b in arb_moof_box()) {
        let bytes = b.encode_to_vec().unwrap();
        let (decoded, size) = MoofBox::decode(&bytes).unwrap();
        prop_assert_eq!(size, bytes.len());
        prop_assert_eq!(decoded, b);
    }

    #[test]
    fn cmaf_fragment_roundtrip(fragment in arb_cmaf_fragment()) {
        let bytes = fragment.encode_to_vec().unwrap();
        let (decoded, size) = CmafFragment::decode(&bytes).unwrap();
        prop_assert_eq!(size, bytes.len());
        prop_assert_eq!(decoded, fragment);
    }

    #[test]
    fn varint_roundtrip(value in 0u64..1 << 62) {
        let varint = Varint::new(value).unwrap();
        let bytes = varint.encode_to_vec().unwrap();

        // 最短の形式が選択される
        let expected_size = match value {
            v if v < 1 << 6 => 1,
            v if v < 1 << 14 => 2,
            v if v < 1 << 30 => 4,
            _ => 8,
        };
        prop_assert_eq!(bytes.len(), expected_size);

        let (decoded, size) = Varint::decode(&bytes).unwrap();
        prop_assert_eq!(size, bytes.len());
        prop_assert_eq!(decoded.get(), value);
    }

    #[test]
    fn varint_rejects_values_over_62_bits(value in (1u64 << 62)..=u64::MAX) {
        prop_assert!(Varint::new(value).is_none());
    }

    #[test]
    fn box_size_prefix_matches_encoded_length(b in arb_moof_box()) {
        let bytes = b.encode_to_vec().unwrap();
        let declared = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        prop_assert_eq!(declared, bytes.len());
    }

    #[test]
    fn truncated_moof_is_rejected(b in arb_moof_box(), cut in 1usize..16) {
        let bytes = b.encode_to_vec().unwrap();
        if bytes.len() > cut {
            let truncated = &bytes[..bytes.len() - cut];
            prop_assert!(MoofBox::decode(truncated).is_err());
        }
    }
}
