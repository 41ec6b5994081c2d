//! CMAF フラグメント向けの muxer
//!
//! 初期化セグメントと、サンプル情報から組み立てた CMAF フラグメントを生成する。
//! 生成される初期化セグメントはフラグメント化プロファイル用の最小構成で、
//! サンプルテーブルは空になる。
use alloc::{vec, vec::Vec};
use core::{num::NonZeroU32, time::Duration};

use crate::{
    BoxHeader, BoxSize, Either, Encode, Error, FixedPointNumber, Mp4FileTime, SampleFlags,
    TrackKind, Utf8String,
    boxes::{
        Brand, DinfBox, FtypBox, HdlrBox, MdatBox, MdhdBox, MdiaBox, MfhdBox, MinfBox, MoofBox,
        MoovBox, MvhdBox, SampleEntry, SmhdBox, StblBox, StypBox, TfdtBox, TfhdBox, TkhdBox,
        TrafBox, TrakBox, TrunBox, TrunSample, VmhdBox,
    },
    fragment::{CmafFragment, InitializationSegment},
};

/// CMAF muxer 用のオプション
#[derive(Debug, Clone)]
pub struct CmafMuxerOptions {
    /// ftyp / styp ボックスの major brand
    pub major_brand: Brand,

    /// ftyp / styp ボックスの minor version
    pub minor_version: u32,

    /// ftyp / styp ボックスの compatible brands
    pub compatible_brands: Vec<Brand>,

    /// セグメント作成時刻（Unix 時刻）
    pub creation_timestamp: Duration,
}

impl Default for CmafMuxerOptions {
    fn default() -> Self {
        Self {
            major_brand: Brand::CMF2,
            minor_version: 0,
            compatible_brands: vec![Brand::CMFC, Brand::ISO6],
            creation_timestamp: Duration::ZERO,
        }
    }
}

/// 初期化セグメントに含めるトラック情報
#[derive(Debug, Clone)]
pub struct TrackConfig {
    /// トラック ID
    pub track_id: u32,

    /// トラック種別
    pub kind: TrackKind,

    /// タイムスケール
    pub timescale: NonZeroU32,

    /// サンプルエントリー
    pub sample_entry: SampleEntry,
}

/// フラグメントに含めるサンプル情報
#[derive(Debug, Clone)]
pub struct FragmentSample {
    /// トラック ID
    pub track_id: u32,

    /// サンプルの尺（タイムスケール単位）
    pub duration: u32,

    /// サンプルデータのサイズ（バイト）
    pub data_size: u32,

    /// キーフレームであるかどうか
    pub keyframe: bool,

    /// composition time offset
    pub composition_time_offset: Option<i32>,

    /// サンプルフラグ（指定がない場合は keyframe から推定）
    pub sample_flags: Option<SampleFlags>,
}

/// CMAF muxer で発生するエラー
#[non_exhaustive]
pub enum MuxError {
    /// ボックスのエンコード処理中に発生したエラー
    EncodeError(Error),

    /// トラックが 1 つも設定されていない
    EmptyTracks,

    /// 無効なトラック ID
    InvalidTrackId {
        /// トラック ID
        track_id: u32,
    },

    /// トラック ID が重複している
    DuplicateTrackId {
        /// トラック ID
        track_id: u32,
    },

    /// 未登録のトラック ID が指定された
    UnknownTrackId {
        /// トラック ID
        track_id: u32,
    },

    /// フラグメント内のサンプルが空
    EmptyFragment,

    /// トラックごとのサンプルが連続していない
    InterleavedSamples {
        /// トラック ID
        track_id: u32,
    },

    /// サンプルサイズの合計とメディアデータの長さが一致しない
    MediaDataSizeMismatch {
        /// サンプルサイズの合計
        expected: u64,

        /// 実際のメディアデータの長さ
        actual: u64,
    },

    /// メディアデータのサイズがオーバーフローした
    MediaDataSizeOverflow,

    /// data_offset が i32 の範囲を超えた
    DataOffsetTooLarge {
        /// data_offset
        data_offset: u64,
    },

    /// フラグメントのシーケンス番号がオーバーフローした
    SequenceNumberOverflow,

    /// トラックの decode time がオーバーフローした
    DecodeTimeOverflow {
        /// トラック ID
        track_id: u32,
    },

    /// next_track_id がオーバーフローした
    NextTrackIdOverflow,
}

impl From<Error> for MuxError {
    fn from(error: Error) -> Self {
        Self::EncodeError(error)
    }
}

impl core::fmt::Debug for MuxError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self}")
    }
}

impl core::fmt::Display for MuxError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::EncodeError(error) => write!(f, "Failed to encode box: {error}"),
            Self::EmptyTracks => write!(f, "No tracks configured"),
            Self::InvalidTrackId { track_id } => write!(f, "Invalid track_id: {track_id}"),
            Self::DuplicateTrackId { track_id } => {
                write!(f, "Duplicate track_id: {track_id}")
            }
            Self::UnknownTrackId { track_id } => write!(f, "Unknown track_id: {track_id}"),
            Self::EmptyFragment => write!(f, "No samples provided for fragment"),
            Self::InterleavedSamples { track_id } => {
                write!(
                    f,
                    "Interleaved samples are not supported: track_id {track_id}"
                )
            }
            Self::MediaDataSizeMismatch { expected, actual } => {
                write!(
                    f,
                    "Media data size mismatch: samples declare {expected} bytes, got {actual}"
                )
            }
            Self::MediaDataSizeOverflow => write!(f, "Media data size overflow"),
            Self::DataOffsetTooLarge { data_offset } => {
                write!(f, "data_offset exceeds i32 range: {data_offset}")
            }
            Self::SequenceNumberOverflow => write!(f, "Fragment sequence number overflow"),
            Self::DecodeTimeOverflow { track_id } => {
                write!(f, "Decode time overflow for track_id {track_id}")
            }
            Self::NextTrackIdOverflow => write!(f, "next_track_id overflow"),
        }
    }
}

impl core::error::Error for MuxError {
    fn source(&self) -> Option<&(dyn core::error::Error + 'static)> {
        if let Self::EncodeError(error) = self {
            Some(error)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
struct TrackState {
    next_decode_time: u64,
}

#[derive(Debug, Clone)]
struct TrackFragment<'a> {
    track_index: usize,
    track_id: u32,
    samples: Vec<&'a FragmentSample>,
    base_decode_time: u64,
    duration_sum: u64,
    data_size_sum: u64,
    use_composition_time_offset: bool,
}

/// CMAF フラグメントの muxer
///
/// 生成時に初期化セグメントを構築し、
/// その後は渡されたサンプル情報から順にフラグメントを組み立てる。
/// シーケンス番号は 1 から始まりフラグメントごとに 1 ずつ増加する。
#[derive(Debug, Clone)]
pub struct CmafFragmentMuxer {
    tracks: Vec<TrackConfig>,
    track_states: Vec<TrackState>,
    options: CmafMuxerOptions,
    init_segment: InitializationSegment,
    next_sequence_number: u32,
}

impl CmafFragmentMuxer {
    /// デフォルトオプションで muxer を生成する
    pub fn new(tracks: Vec<TrackConfig>) -> Result<Self, MuxError> {
        Self::with_options(tracks, CmafMuxerOptions::default())
    }

    /// 指定したオプションで muxer を生成する
    pub fn with_options(
        tracks: Vec<TrackConfig>,
        options: CmafMuxerOptions,
    ) -> Result<Self, MuxError> {
        validate_tracks(&tracks)?;
        let init_segment = build_init_segment(&tracks, &options)?;
        let track_states = tracks
            .iter()
            .map(|_track| TrackState {
                next_decode_time: 0,
            })
            .collect();

        Ok(Self {
            tracks,
            track_states,
            options,
            init_segment,
            next_sequence_number: 1,
        })
    }

    /// 初期化セグメントを返す
    pub fn init_segment(&self) -> &InitializationSegment {
        &self.init_segment
    }

    /// フラグメントを構築する
    ///
    /// サンプルはトラックごとに連続して並んでいる必要があり、
    /// `media_data` には全サンプルのデータを渡された順に連結したものを指定する。
    pub fn build_fragment(
        &mut self,
        samples: &[FragmentSample],
        media_data: Vec<u8>,
    ) -> Result<CmafFragment, MuxError> {
        if samples.is_empty() {
            return Err(MuxError::EmptyFragment);
        }

        let sequence_number = self.next_sequence_number;
        let next_sequence_number = self
            .next_sequence_number
            .checked_add(1)
            .ok_or(MuxError::SequenceNumberOverflow)?;

        let fragments = self.group_samples(samples)?;
        let total_data_size = fragments.iter().try_fold(0u64, |acc, fragment| {
            acc.checked_add(fragment.data_size_sum)
                .ok_or(MuxError::MediaDataSizeOverflow)
        })?;
        if total_data_size != media_data.len() as u64 {
            return Err(MuxError::MediaDataSizeMismatch {
                expected: total_data_size,
                actual: media_data.len() as u64,
            });
        }

        // data_offset は moof のサイズに依存するため、
        // まずはオフセットなしで moof を組み立ててサイズを確定させる
        let placeholder_moof = MoofBox {
            mfhd_box: MfhdBox { sequence_number },
            traf_boxes: self.build_traf_boxes(&fragments, None)?,
            unknown_boxes: Vec::new(),
        };
        let moof_size = placeholder_moof.encode_to_vec()?.len() as u64;
        let mdat_header_size = mdat_header_size(total_data_size);

        let data_offsets = compute_data_offsets(&fragments, moof_size, mdat_header_size)?;

        let moof_box = MoofBox {
            mfhd_box: MfhdBox { sequence_number },
            traf_boxes: self.build_traf_boxes(&fragments, Some(&data_offsets))?,
            unknown_boxes: Vec::new(),
        };

        self.apply_fragment_updates(&fragments)?;
        self.next_sequence_number = next_sequence_number;

        Ok(CmafFragment {
            styp_box: StypBox {
                major_brand: self.options.major_brand,
                minor_version: self.options.minor_version,
                compatible_brands: self.options.compatible_brands.clone(),
            },
            moof_box,
            mdat_box: MdatBox {
                payload: media_data,
            },
            unknown_boxes: Vec::new(),
        })
    }

    fn track_index(&self, track_id: u32) -> Result<usize, MuxError> {
        self.tracks
            .iter()
            .position(|track| track.track_id == track_id)
            .ok_or(MuxError::UnknownTrackId { track_id })
    }

    fn group_samples<'a>(
        &self,
        samples: &'a [FragmentSample],
    ) -> Result<Vec<TrackFragment<'a>>, MuxError> {
        let mut fragments: Vec<TrackFragment<'a>> = Vec::new();
        let mut seen_tracks: Vec<u32> = Vec::new();

        for sample in samples {
            let track_index = self.track_index(sample.track_id)?;
            let base_decode_time = self
                .track_states
                .get(track_index)
                .expect("track state should exist")
                .next_decode_time;

            if let Some(last) = fragments.last_mut()
                && last.track_id == sample.track_id
            {
                last.duration_sum = last
                    .duration_sum
                    .checked_add(sample.duration as u64)
                    .ok_or(MuxError::DecodeTimeOverflow {
                        track_id: sample.track_id,
                    })?;
                last.data_size_sum = last
                    .data_size_sum
                    .checked_add(sample.data_size as u64)
                    .ok_or(MuxError::MediaDataSizeOverflow)?;
                last.use_composition_time_offset |= sample.composition_time_offset.is_some();
                last.samples.push(sample);
                continue;
            }

            if seen_tracks.contains(&sample.track_id) {
                return Err(MuxError::InterleavedSamples {
                    track_id: sample.track_id,
                });
            }
            seen_tracks.push(sample.track_id);

            let mut fragment = TrackFragment {
                track_index,
                track_id: sample.track_id,
                samples: Vec::new(),
                base_decode_time,
                duration_sum: 0,
                data_size_sum: 0,
                use_composition_time_offset: false,
            };
            fragment.duration_sum = fragment
                .duration_sum
                .checked_add(sample.duration as u64)
                .ok_or(MuxError::DecodeTimeOverflow {
                    track_id: sample.track_id,
                })?;
            fragment.data_size_sum = fragment
                .data_size_sum
                .checked_add(sample.data_size as u64)
                .ok_or(MuxError::MediaDataSizeOverflow)?;
            fragment.use_composition_time_offset = sample.composition_time_offset.is_some();
            fragment.samples.push(sample);
            fragments.push(fragment);
        }

        Ok(fragments)
    }

    fn build_traf_boxes(
        &self,
        fragments: &[TrackFragment<'_>],
        data_offsets: Option<&[i32]>,
    ) -> Result<Vec<TrafBox>, MuxError> {
        let mut traf_boxes = Vec::new();
        for (index, fragment) in fragments.iter().enumerate() {
            let data_offset = data_offsets
                .and_then(|offsets| offsets.get(index).copied())
                .unwrap_or(0);
            let trun_box = TrunBox {
                data_offset: Some(data_offset),
                first_sample_flags: None,
                samples: build_trun_samples(fragment),
            };

            let tfhd_box = TfhdBox {
                default_base_is_moof: true,
                ..TfhdBox::new(fragment.track_id)
            };
            let tfdt_box = TfdtBox {
                base_media_decode_time: fragment.base_decode_time,
            };

            traf_boxes.push(TrafBox {
                tfhd_box,
                tfdt_box: Some(tfdt_box),
                trun_boxes: vec![trun_box],
                unknown_boxes: Vec::new(),
            });
        }
        Ok(traf_boxes)
    }

    fn apply_fragment_updates(
        &mut self,
        fragments: &[TrackFragment<'_>],
    ) -> Result<(), MuxError> {
        let mut updates = Vec::new();
        for fragment in fragments {
            let next_decode_time = fragment
                .base_decode_time
                .checked_add(fragment.duration_sum)
                .ok_or(MuxError::DecodeTimeOverflow {
                    track_id: fragment.track_id,
                })?;
            updates.push((fragment.track_index, next_decode_time));
        }

        for (track_index, next_decode_time) in updates {
            let state = self
                .track_states
                .get_mut(track_index)
                .expect("track state should exist");
            state.next_decode_time = next_decode_time;
        }
        Ok(())
    }
}

fn build_trun_samples(fragment: &TrackFragment<'_>) -> Vec<TrunSample> {
    let mut trun_samples = Vec::new();
    for sample in &fragment.samples {
        let flags = sample
            .sample_flags
            .unwrap_or_else(|| sample_flags_from_keyframe(sample.keyframe));
        let composition_time_offset = if fragment.use_composition_time_offset {
            Some(sample.composition_time_offset.unwrap_or(0))
        } else {
            None
        };
        trun_samples.push(TrunSample {
            duration: Some(sample.duration),
            size: Some(sample.data_size),
            flags: Some(flags),
            composition_time_offset,
        });
    }
    trun_samples
}

fn sample_flags_from_keyframe(keyframe: bool) -> SampleFlags {
    let sample_depends_on = if keyframe { 2 } else { 1 };
    SampleFlags::from_fields(0, sample_depends_on, 0, 0, 0, !keyframe, 0)
}

fn mdat_header_size(total_data_size: u64) -> u64 {
    let box_size = BoxSize::with_payload_size(MdatBox::TYPE, total_data_size);
    let header = BoxHeader::new(MdatBox::TYPE, box_size);
    header.external_size() as u64
}

fn compute_data_offsets(
    fragments: &[TrackFragment<'_>],
    moof_size: u64,
    mdat_header_size: u64,
) -> Result<Vec<i32>, MuxError> {
    let mut offsets = Vec::new();
    let mut running_offset = 0u64;
    // default_base_is_moof なので styp の分は含めない
    let base_offset = moof_size
        .checked_add(mdat_header_size)
        .ok_or(MuxError::MediaDataSizeOverflow)?;

    for fragment in fragments {
        let data_offset = base_offset
            .checked_add(running_offset)
            .ok_or(MuxError::MediaDataSizeOverflow)?;
        if data_offset > i32::MAX as u64 {
            return Err(MuxError::DataOffsetTooLarge { data_offset });
        }
        offsets.push(data_offset as i32);
        running_offset = running_offset
            .checked_add(fragment.data_size_sum)
            .ok_or(MuxError::MediaDataSizeOverflow)?;
    }

    Ok(offsets)
}

fn validate_tracks(tracks: &[TrackConfig]) -> Result<(), MuxError> {
    if tracks.is_empty() {
        return Err(MuxError::EmptyTracks);
    }

    let mut seen_tracks = Vec::new();
    for track in tracks {
        if track.track_id == 0 {
            return Err(MuxError::InvalidTrackId {
                track_id: track.track_id,
            });
        }
        if seen_tracks.contains(&track.track_id) {
            return Err(MuxError::DuplicateTrackId {
                track_id: track.track_id,
            });
        }
        seen_tracks.push(track.track_id);
    }

    Ok(())
}

fn build_init_segment(
    tracks: &[TrackConfig],
    options: &CmafMuxerOptions,
) -> Result<InitializationSegment, MuxError> {
    let ftyp_box = FtypBox {
        major_brand: options.major_brand,
        minor_version: options.minor_version,
        compatible_brands: options.compatible_brands.clone(),
    };

    let creation_time = Mp4FileTime::from_unix_time(options.creation_timestamp);
    let mvhd_timescale = tracks.first().expect("tracks must not be empty").timescale;
    let max_track_id = tracks
        .iter()
        .map(|track| track.track_id)
        .max()
        .expect("tracks must not be empty");
    let next_track_id = max_track_id
        .checked_add(1)
        .ok_or(MuxError::NextTrackIdOverflow)?;

    let mvhd_box = MvhdBox {
        creation_time,
        modification_time: creation_time,
        timescale: mvhd_timescale,
        duration: 0,
        rate: MvhdBox::DEFAULT_RATE,
        volume: MvhdBox::DEFAULT_VOLUME,
        matrix: MvhdBox::DEFAULT_MATRIX,
        next_track_id,
    };

    let mut trak_boxes = Vec::new();
    for track in tracks {
        trak_boxes.push(build_trak_box(track, creation_time));
    }

    let moov_box = MoovBox {
        mvhd_box,
        trak_boxes,
        unknown_boxes: Vec::new(),
    };

    Ok(InitializationSegment {
        ftyp_box,
        moov_box,
        unknown_boxes: Vec::new(),
    })
}

fn build_trak_box(track: &TrackConfig, creation_time: Mp4FileTime) -> TrakBox {
    let (width, height) = if let TrackKind::Video = track.kind {
        track.sample_entry.video_resolution().unwrap_or((0, 0))
    } else {
        (0, 0)
    };

    let tkhd_box = TkhdBox {
        flag_track_enabled: true,
        flag_track_in_movie: true,
        flag_track_in_preview: false,
        flag_track_size_is_aspect_ratio: false,
        creation_time,
        modification_time: creation_time,
        track_id: track.track_id,
        duration: 0,
        layer: TkhdBox::DEFAULT_LAYER,
        alternate_group: TkhdBox::DEFAULT_ALTERNATE_GROUP,
        volume: match track.kind {
            TrackKind::Audio => TkhdBox::DEFAULT_AUDIO_VOLUME,
            TrackKind::Video => TkhdBox::DEFAULT_VIDEO_VOLUME,
        },
        matrix: TkhdBox::DEFAULT_MATRIX,
        width: FixedPointNumber::new(width as i16, 0),
        height: FixedPointNumber::new(height as i16, 0),
    };

    TrakBox {
        tkhd_box,
        mdia_box: build_mdia_box(track, creation_time),
        unknown_boxes: Vec::new(),
    }
}

fn build_mdia_box(track: &TrackConfig, creation_time: Mp4FileTime) -> MdiaBox {
    let mdhd_box = MdhdBox {
        creation_time,
        modification_time: creation_time,
        timescale: track.timescale,
        duration: 0,
        language: MdhdBox::LANGUAGE_UNDEFINED,
    };

    let (handler_type, smhd_or_vmhd_box) = match track.kind {
        TrackKind::Audio => (
            HdlrBox::HANDLER_TYPE_SOUN,
            Either::A(SmhdBox::default()),
        ),
        TrackKind::Video => (
            HdlrBox::HANDLER_TYPE_VIDE,
            Either::B(VmhdBox::default()),
        ),
    };

    let minf_box = MinfBox {
        smhd_or_vmhd_box: Some(smhd_or_vmhd_box),
        dinf_box: DinfBox::LOCAL_FILE,
        stbl_box: StblBox::empty(track.sample_entry.clone()),
        unknown_boxes: Vec::new(),
    };

    let hdlr_box = HdlrBox {
        handler_type,
        name: Utf8String::EMPTY.into_null_terminated_bytes(),
    };

    MdiaBox {
        mdhd_box,
        hdlr_box,
        minf_box,
        unknown_boxes: Vec::new(),
    }
}
