//! 初期化セグメントと muxer のテスト
use std::num::NonZeroU32;

use shiguredo_moq_container::{
    BaseBox, Decode, Encode, Result, TrackKind,
    boxes::{
        AudioSampleEntry, AudioSampleEntryFields, Brand, SampleEntry, StszBox, VisualSampleEntry,
        VisualSampleEntryFields,
    },
    fragment::InitializationSegment,
    mux::{CmafFragmentMuxer, FragmentSample, MuxError, TrackConfig},
};

fn video_sample_entry() -> SampleEntry {
    SampleEntry::Visual(VisualSampleEntry {
        entry_type: shiguredo_moq_container::BoxType::Normal(*b"avc1"),
        visual: VisualSampleEntryFields::with_resolution(1280, 720),
        codec_config: vec![0x01, 0x42, 0xC0, 0x1E],
    })
}

fn audio_sample_entry() -> SampleEntry {
    SampleEntry::Audio(AudioSampleEntry {
        entry_type: shiguredo_moq_container::BoxType::Normal(*b"Opus"),
        audio: AudioSampleEntryFields {
            data_reference_index: AudioSampleEntryFields::DEFAULT_DATA_REFERENCE_INDEX,
            channelcount: 2,
            samplesize: AudioSampleEntryFields::DEFAULT_SAMPLESIZE,
            samplerate: shiguredo_moq_container::FixedPointNumber::new(48_000, 0),
        },
        codec_config: Vec::new(),
    })
}

fn video_track(track_id: u32) -> TrackConfig {
    TrackConfig {
        track_id,
        kind: TrackKind::Video,
        timescale: NonZeroU32::new(90_000).unwrap(),
        sample_entry: video_sample_entry(),
    }
}

fn audio_track(track_id: u32) -> TrackConfig {
    TrackConfig {
        track_id,
        kind: TrackKind::Audio,
        timescale: NonZeroU32::new(48_000).unwrap(),
        sample_entry: audio_sample_entry(),
    }
}

#[test]
fn init_segment_roundtrip() -> Result<()> {
    let muxer = CmafFragmentMuxer::new(vec![video_track(1), audio_track(2)])
        .expect("valid tracks");
    let segment = muxer.init_segment();
    segment.validate()?;

    let bytes = segment.encode_to_vec()?;
    assert_eq!(&bytes[4..8], b"ftyp");
    assert_eq!(&bytes[8..12], b"cmf2");

    let (decoded, size) = InitializationSegment::decode(&bytes)?;
    assert_eq!(size, bytes.len());
    assert_eq!(decoded, *segment);
    Ok(())
}

#[test]
fn init_segment_tracks_carry_expected_metadata() -> Result<()> {
    let muxer = CmafFragmentMuxer::new(vec![video_track(1), audio_track(2)])
        .expect("valid tracks");
    let moov = &muxer.init_segment().moov_box;

    assert_eq!(moov.trak_boxes.len(), 2);
    assert_eq!(moov.mvhd_box.next_track_id, 3);

    let video = &moov.trak_boxes[0];
    assert_eq!(video.tkhd_box.track_id, 1);
    assert_eq!(video.tkhd_box.width.integer, 1280);
    assert_eq!(video.mdia_box.hdlr_box.handler_type, *b"vide");
    let stbl = &video.mdia_box.minf_box.stbl_box;
    assert_eq!(stbl.stsd_box.entries.len(), 1);
    assert_eq!(
        stbl.stsd_box.entries[0].video_resolution(),
        Some((1280, 720))
    );

    // フラグメント化プロファイルなのでサンプルテーブルは空になる
    assert!(stbl.stts_box.entries.is_empty());
    assert!(stbl.stsc_box.entries.is_empty());
    assert!(matches!(&stbl.stsz_box, StszBox::Variable { entry_sizes } if entry_sizes.is_empty()));
    assert!(stbl.stco_box.chunk_offsets.is_empty());

    let audio = &moov.trak_boxes[1];
    assert_eq!(audio.mdia_box.hdlr_box.handler_type, *b"soun");
    assert_eq!(
        audio.mdia_box.minf_box.stbl_box.stsd_box.entries[0].audio_sample_rate(),
        Some(48_000)
    );
    Ok(())
}

#[test]
fn sample_entry_codec_config_is_preserved_verbatim() -> Result<()> {
    let entry = video_sample_entry();
    let bytes = entry.encode_to_vec()?;
    let (decoded, _) = SampleEntry::decode(&bytes)?;
    assert_eq!(decoded.codec_config(), Some(&[0x01, 0x42, 0xC0, 0x1E][..]));
    assert_eq!(decoded, entry);
    Ok(())
}

#[test]
fn unknown_sample_entry_is_kept_opaque() -> Result<()> {
    let entry = video_sample_entry();
    let mut bytes = entry.encode_to_vec()?;
    // 関知しないフォーマットの FourCC に書き換える
    bytes[4..8].copy_from_slice(b"zzzz");

    let (decoded, _) = SampleEntry::decode(&bytes)?;
    assert!(decoded.is_unknown_box());
    assert_eq!(decoded.encode_to_vec()?, bytes);
    Ok(())
}

#[test]
fn muxer_builds_fragments_with_running_decode_time() -> Result<()> {
    let mut muxer = CmafFragmentMuxer::new(vec![video_track(1)]).expect("valid tracks");

    let samples = vec![
        FragmentSample {
            track_id: 1,
            duration: 3_000,
            data_size: 5,
            keyframe: true,
            composition_time_offset: None,
            sample_flags: None,
        },
        FragmentSample {
            track_id: 1,
            duration: 3_000,
            data_size: 3,
            keyframe: false,
            composition_time_offset: None,
            sample_flags: None,
        },
    ];
    let first = muxer
        .build_fragment(&samples, vec![0xAA; 8])
        .expect("fragment should build");
    first.validate()?;
    assert_eq!(first.sequence_number(), 1);
    assert_eq!(first.base_media_decode_time(), 0);

    let second = muxer
        .build_fragment(&samples, vec![0xBB; 8])
        .expect("fragment should build");
    assert_eq!(second.sequence_number(), 2);
    assert_eq!(second.base_media_decode_time(), 6_000);

    // 生成されたフラグメントはラウンドトリップできる
    let bytes = second.encode_to_vec()?;
    let (decoded, _) = shiguredo_moq_container::fragment::CmafFragment::decode(&bytes)?;
    assert_eq!(decoded, second);
    Ok(())
}

#[test]
fn muxer_data_offset_points_into_mdat_payload() -> Result<()> {
    let mut muxer = CmafFragmentMuxer::new(vec![video_track(1)]).expect("valid tracks");

    let samples = vec![FragmentSample {
        track_id: 1,
        duration: 3_000,
        data_size: 4,
        keyframe: true,
        composition_time_offset: None,
        sample_flags: None,
    }];
    let fragment = muxer
        .build_fragment(&samples, vec![1, 2, 3, 4])
        .expect("fragment should build");

    // data_offset は moof の先頭からペイロードの先頭までの距離になる
    let moof_size = fragment.moof_box.encode_to_vec()?.len();
    let trun = &fragment.moof_box.traf_boxes[0].trun_boxes[0];
    assert_eq!(trun.data_offset, Some((moof_size + 8) as i32));

    // キーフレームなのでサンプルフラグは同期サンプルになる
    let flags = trun.samples[0].flags.unwrap();
    assert!(flags.is_sync_sample());
    assert!(flags.is_independent());
    Ok(())
}

#[test]
fn muxer_rejects_bad_inputs() {
    assert!(matches!(
        CmafFragmentMuxer::new(Vec::new()),
        Err(MuxError::EmptyTracks)
    ));
    assert!(matches!(
        CmafFragmentMuxer::new(vec![video_track(0)]),
        Err(MuxError::InvalidTrackId { track_id: 0 })
    ));
    assert!(matches!(
        CmafFragmentMuxer::new(vec![video_track(1), audio_track(1)]),
        Err(MuxError::DuplicateTrackId { track_id: 1 })
    ));

    let mut muxer = CmafFragmentMuxer::new(vec![video_track(1)]).expect("valid tracks");
    assert!(matches!(
        muxer.build_fragment(&[], Vec::new()),
        Err(MuxError::EmptyFragment)
    ));

    let sample = FragmentSample {
        track_id: 1,
        duration: 3_000,
        data_size: 4,
        keyframe: true,
        composition_time_offset: None,
        sample_flags: None,
    };
    assert!(matches!(
        muxer.build_fragment(std::slice::from_ref(&sample), vec![0; 3]),
        Err(MuxError::MediaDataSizeMismatch {
            expected: 4,
            actual: 3,
        })
    ));

    let unknown = FragmentSample {
        track_id: 9,
        ..sample
    };
    assert!(matches!(
        muxer.build_fragment(&[unknown], vec![0; 4]),
        Err(MuxError::UnknownTrackId { track_id: 9 })
    ));
}

#[test]
fn init_segment_requires_ftyp_and_moov() {
    let brands = shiguredo_moq_container::boxes::FtypBox {
        major_brand: Brand::CMF2,
        minor_version: 0,
        compatible_brands: vec![Brand::CMFC, Brand::ISO6],
    };
    let bytes = brands.encode_to_vec().expect("encode should succeed");

    let e = InitializationSegment::decode(&bytes).expect_err("missing moov should be rejected");
    assert_eq!(e.kind, shiguredo_moq_container::ErrorKind::Malformed);
}
