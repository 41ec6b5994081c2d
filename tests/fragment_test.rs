//! CMAF フラグメントのエンコード・デコードとスキャナーのテスト
use shiguredo_moq_container::{
    Decode, Encode, ErrorKind, Result, SampleFlags,
    boxes::{
        Brand, MdatBox, MfhdBox, MoofBox, StypBox, TfdtBox, TfhdBox, TrafBox, TrunBox, TrunSample,
    },
    fragment::{BASE_MEDIA_DECODE_TIME_NONE, CmafFragment, CmafFragmentScanner},
};

fn test_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| i as u8).collect()
}

fn minimal_fragment(sequence_number: u32, payload: Vec<u8>) -> CmafFragment {
    CmafFragment {
        styp_box: StypBox::default(),
        moof_box: MoofBox {
            mfhd_box: MfhdBox { sequence_number },
            traf_boxes: vec![TrafBox {
                tfhd_box: TfhdBox::new(1),
                tfdt_box: Some(TfdtBox {
                    base_media_decode_time: sequence_number as u64 * 1000,
                }),
                trun_boxes: Vec::new(),
                unknown_boxes: Vec::new(),
            }],
            unknown_boxes: Vec::new(),
        },
        mdat_box: MdatBox { payload },
        unknown_boxes: Vec::new(),
    }
}

#[test]
fn minimal_video_fragment_roundtrip() -> Result<()> {
    // 0x00..=0xFF を 4 回繰り返した 1024 バイトのペイロード
    let fragment = minimal_fragment(42, test_payload(1024));
    let bytes = fragment.encode_to_vec()?;

    // styp ボックスのブランド構成を確認する
    assert_eq!(&bytes[4..8], b"styp");
    assert_eq!(&bytes[8..12], b"cmf2");

    let (decoded, size) = CmafFragment::decode(&bytes)?;
    assert_eq!(size, bytes.len());
    assert_eq!(decoded.sequence_number(), 42);
    assert_eq!(decoded.base_media_decode_time(), 42_000);
    assert_eq!(decoded.media_data().len(), 1024);
    assert_eq!(decoded, fragment);

    decoded.validate()?;
    Ok(())
}

#[test]
fn fragment_encoded_length_is_sum_of_box_sizes() -> Result<()> {
    let fragment = minimal_fragment(1, test_payload(100));
    let bytes = fragment.encode_to_vec()?;

    let styp_len = fragment.styp_box.encode_to_vec()?.len();
    let moof_len = fragment.moof_box.encode_to_vec()?.len();
    let mdat_len = fragment.mdat_box.encode_to_vec()?.len();
    assert_eq!(bytes.len(), styp_len + moof_len + mdat_len);

    // 各ボックスの先頭 4 バイトは自身のサイズと一致する
    let declared = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    assert_eq!(declared, styp_len);
    Ok(())
}

#[test]
fn key_frame_sample_flags() {
    let flags = SampleFlags::from_fields(0, 2, 0, 0, 0, false, 0);
    assert_eq!(flags.get(), 0x02000000);
    assert!(flags.is_sync_sample());
    assert!(flags.is_independent());
    assert!(!flags.is_depended_upon());

    let reparsed = SampleFlags::new(flags.get());
    assert_eq!(reparsed, flags);
}

#[test]
fn trun_gop_with_per_sample_fields() -> Result<()> {
    // I-B-B-P-P の 5 サンプルからなる GOP
    let key = SampleFlags::from_fields(0, 2, 0, 0, 0, false, 0);
    let b_frame = SampleFlags::from_fields(0, 1, 2, 0, 0, true, 0);
    let p_frame = SampleFlags::from_fields(0, 1, 1, 0, 0, true, 0);

    let sizes = [50_000u32, 5_000, 5_000, 10_000, 10_000];
    let flags = [key, b_frame, b_frame, p_frame, p_frame];
    let trun = TrunBox {
        data_offset: Some(128),
        first_sample_flags: None,
        samples: sizes
            .iter()
            .zip(flags)
            .map(|(size, flags)| TrunSample {
                duration: Some(3_000),
                size: Some(*size),
                flags: Some(flags),
                composition_time_offset: None,
            })
            .collect(),
    };

    let bytes = trun.encode_to_vec()?;

    // フラグワードは data_offset + duration + size + flags の 0x000701 になる
    assert_eq!(&bytes[9..12], &[0x00, 0x07, 0x01]);

    let (decoded, _) = TrunBox::decode(&bytes)?;
    assert_eq!(decoded.samples.len(), 5);

    let first = decoded.samples[0].flags.unwrap();
    assert!(first.is_sync_sample());
    assert!(first.is_independent());
    for sample in &decoded.samples[3..] {
        assert!(sample.flags.unwrap().is_depended_upon());
    }
    assert_eq!(decoded, trun);
    Ok(())
}

#[test]
fn trun_first_sample_flags_adoption() -> Result<()> {
    let key = SampleFlags::from_fields(0, 2, 0, 0, 0, false, 0);
    let trun = TrunBox {
        data_offset: None,
        first_sample_flags: Some(key),
        samples: vec![
            TrunSample {
                duration: Some(3_000),
                size: None,
                flags: None,
                composition_time_offset: None,
            };
            3
        ],
    };

    let bytes = trun.encode_to_vec()?;
    let (decoded, _) = TrunBox::decode(&bytes)?;

    // サンプル自身はフラグを持たず、先頭サンプルだけが first_sample_flags を継承する
    assert_eq!(decoded.effective_sample_flags(0), Some(key));
    assert_eq!(decoded.effective_sample_flags(1), None);
    assert_eq!(decoded.effective_sample_flags(2), None);
    assert_eq!(decoded, trun);
    Ok(())
}

#[test]
fn empty_mdat_roundtrip() -> Result<()> {
    let fragment = minimal_fragment(1, Vec::new());
    let bytes = fragment.encode_to_vec()?;
    let (decoded, _) = CmafFragment::decode(&bytes)?;
    assert_eq!(decoded.media_data().len(), 0);
    assert_eq!(decoded, fragment);
    Ok(())
}

#[test]
fn large_mdat_roundtrip_is_byte_exact() -> Result<()> {
    // 1 MiB のペイロード
    let fragment = minimal_fragment(7, test_payload(1 << 20));
    let bytes = fragment.encode_to_vec()?;
    let (decoded, _) = CmafFragment::decode(&bytes)?;
    let reencoded = decoded.encode_to_vec()?;
    assert_eq!(bytes, reencoded);
    Ok(())
}

#[test]
fn huge_mdat_is_processed_in_a_single_call() -> Result<()> {
    // 8 MiB のペイロードでも一回の呼び出しで処理できる
    let fragment = minimal_fragment(1, vec![0xAB; 8 << 20]);
    let bytes = fragment.encode_to_vec()?;
    let (decoded, _) = CmafFragment::decode(&bytes)?;
    assert_eq!(decoded.media_data().len(), 8 << 20);
    Ok(())
}

#[test]
fn tfdt_is_always_encoded_as_version_1() -> Result<()> {
    // 32 ビットに収まる値でも version=1 で出力される
    let small = TfdtBox {
        base_media_decode_time: 1000,
    };
    let bytes = small.encode_to_vec()?;
    assert_eq!(bytes[8], 1);
    assert_eq!(bytes.len(), 8 + 4 + 8);

    let large = TfdtBox {
        base_media_decode_time: 1 << 33,
    };
    let bytes = large.encode_to_vec()?;
    assert_eq!(bytes[8], 1);
    let (decoded, _) = TfdtBox::decode(&bytes)?;
    assert_eq!(decoded.base_media_decode_time, 1 << 33);
    Ok(())
}

#[test]
fn tfdt_accepts_version_0() -> Result<()> {
    let bytes = [
        0x00, 0x00, 0x00, 0x10, // size
        b't', b'f', b'd', b't', // type
        0x00, 0x00, 0x00, 0x00, // version / flags
        0x00, 0x00, 0x30, 0x39, // base_media_decode_time (12345)
    ];
    let (decoded, size) = TfdtBox::decode(&bytes)?;
    assert_eq!(size, bytes.len());
    assert_eq!(decoded.base_media_decode_time, 12345);
    Ok(())
}

#[test]
fn trun_negative_composition_time_offset_uses_version_1() -> Result<()> {
    let trun = TrunBox {
        data_offset: None,
        first_sample_flags: None,
        samples: vec![TrunSample {
            duration: None,
            size: None,
            flags: None,
            composition_time_offset: Some(-500),
        }],
    };

    let bytes = trun.encode_to_vec()?;
    assert_eq!(bytes[8], 1);

    let (decoded, _) = TrunBox::decode(&bytes)?;
    assert_eq!(decoded.samples[0].composition_time_offset, Some(-500));
    assert_eq!(decoded, trun);
    Ok(())
}

#[test]
fn tfhd_flag_bits_follow_field_presence() -> Result<()> {
    let tfhd = TfhdBox {
        default_sample_duration: Some(3000),
        default_sample_flags: Some(SampleFlags::from_fields(0, 1, 0, 0, 0, true, 0)),
        default_base_is_moof: true,
        ..TfhdBox::new(1)
    };

    let bytes = tfhd.encode_to_vec()?;
    let flags = u32::from_be_bytes([0, bytes[9], bytes[10], bytes[11]]);
    assert_eq!(
        flags,
        TfhdBox::FLAG_DEFAULT_SAMPLE_DURATION_PRESENT
            | TfhdBox::FLAG_DEFAULT_SAMPLE_FLAGS_PRESENT
            | TfhdBox::FLAG_DEFAULT_BASE_IS_MOOF
    );

    let (decoded, _) = TfhdBox::decode(&bytes)?;
    assert_eq!(decoded, tfhd);
    Ok(())
}

#[test]
fn tfhd_preserves_unknown_flag_bits() -> Result<()> {
    let bytes = [
        0x00, 0x00, 0x00, 0x10, // size
        b't', b'f', b'h', b'd', // type
        0x00, 0x00, 0x00, 0x40, // version / flags (0x40 は未知のビット)
        0x00, 0x00, 0x00, 0x01, // track_id
    ];
    let (decoded, _) = TfhdBox::decode(&bytes)?;
    assert_eq!(decoded.unknown_flags, 0x40);

    let reencoded = decoded.encode_to_vec()?;
    assert_eq!(&reencoded[..], &bytes[..]);
    Ok(())
}

#[test]
fn fragment_without_mdat_is_rejected() -> Result<()> {
    let fragment = minimal_fragment(1, test_payload(16));
    let mut bytes = fragment.styp_box.encode_to_vec()?;
    bytes.extend_from_slice(&fragment.moof_box.encode_to_vec()?);

    let e = CmafFragment::decode(&bytes).expect_err("missing mdat should be rejected");
    assert_eq!(e.kind, ErrorKind::Malformed);
    Ok(())
}

#[test]
fn fragment_with_empty_traf_list_fails_validation() -> Result<()> {
    let mut fragment = minimal_fragment(1, test_payload(16));
    fragment.moof_box.traf_boxes.clear();

    let e = fragment.validate().expect_err("empty traf list is invalid");
    assert_eq!(e.kind, ErrorKind::InvariantViolation);
    Ok(())
}

#[test]
fn unknown_top_level_boxes_are_preserved() -> Result<()> {
    let fragment = minimal_fragment(1, test_payload(16));
    let mut bytes = fragment.encode_to_vec()?;

    // 末尾に未知のトップレベルボックスを追加する
    bytes.extend_from_slice(&[0x00, 0x00, 0x00, 0x0C]);
    bytes.extend_from_slice(b"free");
    bytes.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);

    let (decoded, size) = CmafFragment::decode(&bytes)?;
    assert_eq!(size, bytes.len());
    assert_eq!(decoded.unknown_boxes.len(), 1);
    assert_eq!(decoded.unknown_boxes[0].payload, [0xDE, 0xAD, 0xBE, 0xEF]);

    // 未知のボックスはエンコード時に再出力される
    let reencoded = decoded.encode_to_vec()?;
    assert_eq!(reencoded, bytes);
    Ok(())
}

#[test]
fn scanner_yields_two_back_to_back_fragments() -> Result<()> {
    let mut bytes = minimal_fragment(1, test_payload(100)).encode_to_vec()?;
    bytes.extend_from_slice(&minimal_fragment(2, test_payload(200)).encode_to_vec()?);

    let fragments = CmafFragmentScanner::new(&bytes).collect::<Result<Vec<_>>>()?;
    assert_eq!(fragments.len(), 2);
    assert_eq!(fragments[0].sequence_number(), 1);
    assert_eq!(fragments[1].sequence_number(), 2);
    for fragment in &fragments {
        fragment.validate()?;
    }
    Ok(())
}

#[test]
fn scanner_skips_junk_between_fragments() -> Result<()> {
    let mut bytes = minimal_fragment(1, test_payload(100)).encode_to_vec()?;

    // フラグメントの間に関知しないボックスを挟む
    bytes.extend_from_slice(&[0x00, 0x00, 0x00, 0x10]);
    bytes.extend_from_slice(b"skip");
    bytes.extend_from_slice(&[0; 8]);
    bytes.extend_from_slice(&minimal_fragment(2, test_payload(100)).encode_to_vec()?);

    let fragments = CmafFragmentScanner::new(&bytes).collect::<Result<Vec<_>>>()?;
    assert_eq!(fragments.len(), 2);
    assert_eq!(fragments[1].sequence_number(), 2);
    Ok(())
}

#[test]
fn scanner_stops_at_absurd_box_size() -> Result<()> {
    let mut bytes = minimal_fragment(1, test_payload(100)).encode_to_vec()?;

    // サイズが 8 未満のボックスヘッダーで走査が止まる
    bytes.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
    bytes.extend_from_slice(b"styp");

    let fragments = CmafFragmentScanner::new(&bytes).collect::<Result<Vec<_>>>()?;
    assert_eq!(fragments.len(), 1);
    Ok(())
}

#[test]
fn scanner_discards_fragment_without_mdat() -> Result<()> {
    // mdat を持たないフラグメント候補は捨てて、次の styp から再開する
    let incomplete = minimal_fragment(1, Vec::new());
    let mut bytes = incomplete.styp_box.encode_to_vec()?;
    bytes.extend_from_slice(&incomplete.moof_box.encode_to_vec()?);
    bytes.extend_from_slice(&minimal_fragment(2, test_payload(50)).encode_to_vec()?);

    let fragments = CmafFragmentScanner::new(&bytes).collect::<Result<Vec<_>>>()?;
    assert_eq!(fragments.len(), 1);
    assert_eq!(fragments[0].sequence_number(), 2);
    Ok(())
}

#[test]
fn base_media_decode_time_sentinel_when_tfdt_is_absent() -> Result<()> {
    let mut fragment = minimal_fragment(1, test_payload(16));
    fragment.moof_box.traf_boxes[0].tfdt_box = None;

    let bytes = fragment.encode_to_vec()?;
    let (decoded, _) = CmafFragment::decode(&bytes)?;
    assert_eq!(decoded.base_media_decode_time(), BASE_MEDIA_DECODE_TIME_NONE);
    Ok(())
}

#[test]
fn styp_default_brands_are_cmaf() {
    let styp = StypBox::default();
    assert_eq!(styp.major_brand, Brand::CMF2);
    assert_eq!(styp.compatible_brands, vec![Brand::CMFC, Brand::ISO6]);
}
