//! CMAF フラグメント（moof / mdat）関連のボックス定義
//!
//! このモジュールは内部的なもので、構造体などの外部への提供は boxes モジュールを通して行う
use alloc::{boxed::Box, format, vec::Vec};

use crate::{
    BaseBox, BoxHeader, BoxSize, BoxType, Decode, Encode, Error, FullBox, FullBoxFlags,
    FullBoxHeader, Result, SampleFlags,
    basic_types::as_box_object,
    boxes::{UnknownBox, check_child_count, check_mandatory_box, with_box_type},
};

/// [ISO/IEC 14496-12] MovieFragmentBox class
///
/// ムービーフラグメントのコンテナボックス。
/// CMAF チャンクは styp、このボックス、mdat ボックスの三つで構成される。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MoofBox {
    pub mfhd_box: MfhdBox,
    pub traf_boxes: Vec<TrafBox>,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl MoofBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"moof");
}

impl Encode for MoofBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += self.mfhd_box.encode(&mut buf[offset..])?;
        for b in &self.traf_boxes {
            offset += b.encode(&mut buf[offset..])?;
        }
        for b in &self.unknown_boxes {
            offset += b.encode(&mut buf[offset..])?;
        }
        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for MoofBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let mut children = 0;
            let mut mfhd_box = None;
            let mut traf_boxes = Vec::new();
            let mut unknown_boxes = Vec::new();

            while offset < payload.len() {
                check_child_count(&mut children)?;
                let (child_header, _) = BoxHeader::decode(&payload[offset..])?;
                match child_header.box_type {
                    MfhdBox::TYPE if mfhd_box.is_none() => {
                        mfhd_box = Some(MfhdBox::decode_at(payload, &mut offset)?);
                    }
                    TrafBox::TYPE => {
                        traf_boxes.push(TrafBox::decode_at(payload, &mut offset)?);
                    }
                    _ => {
                        unknown_boxes.push(UnknownBox::decode_at(payload, &mut offset)?);
                    }
                }
            }

            Ok((
                Self {
                    mfhd_box: check_mandatory_box(mfhd_box, "mfhd", "moof")?,
                    traf_boxes,
                    unknown_boxes,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for MoofBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            core::iter::empty()
                .chain(core::iter::once(&self.mfhd_box).map(as_box_object))
                .chain(self.traf_boxes.iter().map(as_box_object))
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [ISO/IEC 14496-12] MovieFragmentHeaderBox class (親: [`MoofBox`])
///
/// フラグメントのシーケンス番号を格納する。
/// シーケンス番号は 1 から始まり、フラグメントごとに 1 ずつ増加する。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MfhdBox {
    pub sequence_number: u32,
}

impl MfhdBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"mfhd");
}

impl Encode for MfhdBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += FullBoxHeader::from_box(self).encode(&mut buf[offset..])?;
        offset += self.sequence_number.encode(&mut buf[offset..])?;
        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for MfhdBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let _full_header = FullBoxHeader::decode_at(payload, &mut offset)?;

            let sequence_number = u32::decode_at(payload, &mut offset)?;

            Ok((
                Self { sequence_number },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for MfhdBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(core::iter::empty())
    }
}

impl FullBox for MfhdBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] TrackFragmentBox class (親: [`MoofBox`])
///
/// トラックフラグメントのコンテナボックス。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TrafBox {
    pub tfhd_box: TfhdBox,
    pub tfdt_box: Option<TfdtBox>,
    pub trun_boxes: Vec<TrunBox>,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl TrafBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"traf");
}

impl Encode for TrafBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += self.tfhd_box.encode(&mut buf[offset..])?;
        if let Some(b) = &self.tfdt_box {
            offset += b.encode(&mut buf[offset..])?;
        }
        for b in &self.trun_boxes {
            offset += b.encode(&mut buf[offset..])?;
        }
        for b in &self.unknown_boxes {
            offset += b.encode(&mut buf[offset..])?;
        }
        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for TrafBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let mut children = 0;
            let mut tfhd_box = None;
            let mut tfdt_box = None;
            let mut trun_boxes = Vec::new();
            let mut unknown_boxes = Vec::new();

            while offset < payload.len() {
                check_child_count(&mut children)?;
                let (child_header, _) = BoxHeader::decode(&payload[offset..])?;
                match child_header.box_type {
                    TfhdBox::TYPE if tfhd_box.is_none() => {
                        tfhd_box = Some(TfhdBox::decode_at(payload, &mut offset)?);
                    }
                    TfdtBox::TYPE if tfdt_box.is_none() => {
                        tfdt_box = Some(TfdtBox::decode_at(payload, &mut offset)?);
                    }
                    TrunBox::TYPE => {
                        trun_boxes.push(TrunBox::decode_at(payload, &mut offset)?);
                    }
                    _ => {
                        unknown_boxes.push(UnknownBox::decode_at(payload, &mut offset)?);
                    }
                }
            }

            Ok((
                Self {
                    tfhd_box: check_mandatory_box(tfhd_box, "tfhd", "traf")?,
                    tfdt_box,
                    trun_boxes,
                    unknown_boxes,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for TrafBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(
            core::iter::empty()
                .chain(core::iter::once(&self.tfhd_box).map(as_box_object))
                .chain(self.tfdt_box.iter().map(as_box_object))
                .chain(self.trun_boxes.iter().map(as_box_object))
                .chain(self.unknown_boxes.iter().map(as_box_object)),
        )
    }
}

/// [ISO/IEC 14496-12] TrackFragmentHeaderBox class (親: [`TrafBox`])
///
/// トラックフラグメントのヘッダー情報を格納する。
/// フラグによって存在するフィールドが異なり、
/// 各フィールドのフラグビットはフィールドが設定されている場合にだけ立てられる。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TfhdBox {
    pub track_id: u32,
    pub base_data_offset: Option<u64>,
    pub sample_description_index: Option<u32>,
    pub default_sample_duration: Option<u32>,
    pub default_sample_size: Option<u32>,
    pub default_sample_flags: Option<SampleFlags>,
    pub duration_is_empty: bool,
    pub default_base_is_moof: bool,

    /// このライブラリが関知しないフラグビット
    ///
    /// デコード時に保存され、エンコード時にそのまま再出力される
    pub unknown_flags: u32,
}

impl TfhdBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"tfhd");

    /// base_data_offset が存在することを示すフラグ
    pub const FLAG_BASE_DATA_OFFSET_PRESENT: u32 = 0x000001;

    /// sample_description_index が存在することを示すフラグ
    pub const FLAG_SAMPLE_DESCRIPTION_INDEX_PRESENT: u32 = 0x000002;

    /// default_sample_duration が存在することを示すフラグ
    pub const FLAG_DEFAULT_SAMPLE_DURATION_PRESENT: u32 = 0x000008;

    /// default_sample_size が存在することを示すフラグ
    pub const FLAG_DEFAULT_SAMPLE_SIZE_PRESENT: u32 = 0x000010;

    /// default_sample_flags が存在することを示すフラグ
    pub const FLAG_DEFAULT_SAMPLE_FLAGS_PRESENT: u32 = 0x000020;

    /// 継続時間が空であることを示すフラグ
    pub const FLAG_DURATION_IS_EMPTY: u32 = 0x010000;

    /// デフォルトの base_data_offset が moof の先頭であることを示すフラグ
    pub const FLAG_DEFAULT_BASE_IS_MOOF: u32 = 0x020000;

    const KNOWN_FLAGS: u32 = Self::FLAG_BASE_DATA_OFFSET_PRESENT
        | Self::FLAG_SAMPLE_DESCRIPTION_INDEX_PRESENT
        | Self::FLAG_DEFAULT_SAMPLE_DURATION_PRESENT
        | Self::FLAG_DEFAULT_SAMPLE_SIZE_PRESENT
        | Self::FLAG_DEFAULT_SAMPLE_FLAGS_PRESENT
        | Self::FLAG_DURATION_IS_EMPTY
        | Self::FLAG_DEFAULT_BASE_IS_MOOF;

    /// トラック ID だけを指定した [`TfhdBox`] インスタンスを生成する
    pub const fn new(track_id: u32) -> Self {
        Self {
            track_id,
            base_data_offset: None,
            sample_description_index: None,
            default_sample_duration: None,
            default_sample_size: None,
            default_sample_flags: None,
            duration_is_empty: false,
            default_base_is_moof: false,
            unknown_flags: 0,
        }
    }
}

impl Encode for TfhdBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += FullBoxHeader::from_box(self).encode(&mut buf[offset..])?;
        offset += self.track_id.encode(&mut buf[offset..])?;

        if let Some(v) = self.base_data_offset {
            offset += v.encode(&mut buf[offset..])?;
        }
        if let Some(v) = self.sample_description_index {
            offset += v.encode(&mut buf[offset..])?;
        }
        if let Some(v) = self.default_sample_duration {
            offset += v.encode(&mut buf[offset..])?;
        }
        if let Some(v) = self.default_sample_size {
            offset += v.encode(&mut buf[offset..])?;
        }
        if let Some(v) = self.default_sample_flags {
            offset += v.encode(&mut buf[offset..])?;
        }

        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for TfhdBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let full_header = FullBoxHeader::decode_at(payload, &mut offset)?;
            let flags = full_header.flags.get();

            let track_id = u32::decode_at(payload, &mut offset)?;

            let base_data_offset = if flags & Self::FLAG_BASE_DATA_OFFSET_PRESENT != 0 {
                Some(u64::decode_at(payload, &mut offset)?)
            } else {
                None
            };

            let sample_description_index =
                if flags & Self::FLAG_SAMPLE_DESCRIPTION_INDEX_PRESENT != 0 {
                    Some(u32::decode_at(payload, &mut offset)?)
                } else {
                    None
                };

            let default_sample_duration = if flags & Self::FLAG_DEFAULT_SAMPLE_DURATION_PRESENT != 0
            {
                Some(u32::decode_at(payload, &mut offset)?)
            } else {
                None
            };

            let default_sample_size = if flags & Self::FLAG_DEFAULT_SAMPLE_SIZE_PRESENT != 0 {
                Some(u32::decode_at(payload, &mut offset)?)
            } else {
                None
            };

            let default_sample_flags = if flags & Self::FLAG_DEFAULT_SAMPLE_FLAGS_PRESENT != 0 {
                Some(SampleFlags::decode_at(payload, &mut offset)?)
            } else {
                None
            };

            let duration_is_empty = flags & Self::FLAG_DURATION_IS_EMPTY != 0;
            let default_base_is_moof = flags & Self::FLAG_DEFAULT_BASE_IS_MOOF != 0;
            let unknown_flags = flags & !Self::KNOWN_FLAGS;

            Ok((
                Self {
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
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for TfhdBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(core::iter::empty())
    }
}

impl FullBox for TfhdBox {
    fn full_box_version(&self) -> u8 {
        0
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        let mut flags = self.unknown_flags & !Self::KNOWN_FLAGS;
        if self.base_data_offset.is_some() {
            flags |= Self::FLAG_BASE_DATA_OFFSET_PRESENT;
        }
        if self.sample_description_index.is_some() {
            flags |= Self::FLAG_SAMPLE_DESCRIPTION_INDEX_PRESENT;
        }
        if self.default_sample_duration.is_some() {
            flags |= Self::FLAG_DEFAULT_SAMPLE_DURATION_PRESENT;
        }
        if self.default_sample_size.is_some() {
            flags |= Self::FLAG_DEFAULT_SAMPLE_SIZE_PRESENT;
        }
        if self.default_sample_flags.is_some() {
            flags |= Self::FLAG_DEFAULT_SAMPLE_FLAGS_PRESENT;
        }
        if self.duration_is_empty {
            flags |= Self::FLAG_DURATION_IS_EMPTY;
        }
        if self.default_base_is_moof {
            flags |= Self::FLAG_DEFAULT_BASE_IS_MOOF;
        }
        FullBoxFlags::new(flags)
    }
}

/// [ISO/IEC 14496-12] TrackFragmentBaseMediaDecodeTimeBox class (親: [`TrafBox`])
///
/// トラックフラグメントのベースデコード時間を格納する。
///
/// エンコード時には値の大きさに関わらず常に version=1（64 ビット）で出力される。
/// デコード時には version=0（32 ビット）も受理される。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TfdtBox {
    pub base_media_decode_time: u64,
}

impl TfdtBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"tfdt");
}

impl Encode for TfdtBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += FullBoxHeader::from_box(self).encode(&mut buf[offset..])?;
        offset += self.base_media_decode_time.encode(&mut buf[offset..])?;
        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for TfdtBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let full_header = FullBoxHeader::decode_at(payload, &mut offset)?;

            let base_media_decode_time = if full_header.version == 1 {
                u64::decode_at(payload, &mut offset)?
            } else {
                u32::decode_at(payload, &mut offset)? as u64
            };

            Ok((
                Self {
                    base_media_decode_time,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for TfdtBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(core::iter::empty())
    }
}

impl FullBox for TfdtBox {
    fn full_box_version(&self) -> u8 {
        1
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(0)
    }
}

/// [ISO/IEC 14496-12] TrackRunBox class (親: [`TrafBox`])
///
/// サンプルのリストを格納する。フラグによって存在するフィールドが異なり、
/// フラグは先頭サンプルのフィールドの有無から導出される。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TrunBox {
    pub data_offset: Option<i32>,
    pub first_sample_flags: Option<SampleFlags>,
    pub samples: Vec<TrunSample>,
}

impl TrunBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"trun");

    /// data_offset が存在することを示すフラグ
    pub const FLAG_DATA_OFFSET_PRESENT: u32 = 0x000001;

    /// first_sample_flags が存在することを示すフラグ
    pub const FLAG_FIRST_SAMPLE_FLAGS_PRESENT: u32 = 0x000004;

    /// sample_duration が存在することを示すフラグ
    pub const FLAG_SAMPLE_DURATION_PRESENT: u32 = 0x000100;

    /// sample_size が存在することを示すフラグ
    pub const FLAG_SAMPLE_SIZE_PRESENT: u32 = 0x000200;

    /// sample_flags が存在することを示すフラグ
    pub const FLAG_SAMPLE_FLAGS_PRESENT: u32 = 0x000400;

    /// sample_composition_time_offset が存在することを示すフラグ
    pub const FLAG_SAMPLE_COMPOSITION_TIME_OFFSETS_PRESENT: u32 = 0x000800;

    /// 指定されたサンプルに適用されるフラグを返す
    ///
    /// サンプル自身がフラグを持たない場合、先頭サンプルについては
    /// `first_sample_flags` の値が採用される。
    pub fn effective_sample_flags(&self, sample_index: usize) -> Option<SampleFlags> {
        let sample = self.samples.get(sample_index)?;
        if sample.flags.is_some() {
            sample.flags
        } else if sample_index == 0 {
            self.first_sample_flags
        } else {
            None
        }
    }

    fn compute_flags(&self) -> u32 {
        let mut flags = 0u32;
        if self.data_offset.is_some() {
            flags |= Self::FLAG_DATA_OFFSET_PRESENT;
        }
        if self.first_sample_flags.is_some() {
            flags |= Self::FLAG_FIRST_SAMPLE_FLAGS_PRESENT;
        }
        if let Some(sample) = self.samples.first() {
            if sample.duration.is_some() {
                flags |= Self::FLAG_SAMPLE_DURATION_PRESENT;
            }
            if sample.size.is_some() {
                flags |= Self::FLAG_SAMPLE_SIZE_PRESENT;
            }
            if sample.flags.is_some() {
                flags |= Self::FLAG_SAMPLE_FLAGS_PRESENT;
            }
            if sample.composition_time_offset.is_some() {
                flags |= Self::FLAG_SAMPLE_COMPOSITION_TIME_OFFSETS_PRESENT;
            }
        }
        flags
    }

    fn uses_version_1(&self) -> bool {
        self.samples
            .iter()
            .any(|s| s.composition_time_offset.is_some_and(|offset| offset < 0))
    }

    // フラグから、一つのサンプルがワイヤー上で占めるバイト数を求める
    fn per_sample_size(flags: u32) -> usize {
        let mut size = 0;
        if flags & Self::FLAG_SAMPLE_DURATION_PRESENT != 0 {
            size += 4;
        }
        if flags & Self::FLAG_SAMPLE_SIZE_PRESENT != 0 {
            size += 4;
        }
        if flags & Self::FLAG_SAMPLE_FLAGS_PRESENT != 0 {
            size += 4;
        }
        if flags & Self::FLAG_SAMPLE_COMPOSITION_TIME_OFFSETS_PRESENT != 0 {
            size += 4;
        }
        size
    }
}

/// サンプルごとのフィールドを一つも持たない trun が宣言できるサンプル数の上限
///
/// この場合はワイヤー上のデータ量が sample_count の裏付けにならないため、
/// 悪意のある入力によるメモリ消費を抑えるための制限を課す
const MAX_FIELDLESS_TRUN_SAMPLES: u32 = 1 << 16;

impl Encode for TrunBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += FullBoxHeader::from_box(self).encode(&mut buf[offset..])?;

        let flags = self.compute_flags();

        // sample_count
        offset += (self.samples.len() as u32).encode(&mut buf[offset..])?;

        if let Some(v) = self.data_offset {
            offset += v.encode(&mut buf[offset..])?;
        }
        if let Some(v) = self.first_sample_flags {
            offset += v.encode(&mut buf[offset..])?;
        }

        let version = self.full_box_version();

        for sample in &self.samples {
            if flags & Self::FLAG_SAMPLE_DURATION_PRESENT != 0 {
                offset += sample.duration.unwrap_or(0).encode(&mut buf[offset..])?;
            }
            if flags & Self::FLAG_SAMPLE_SIZE_PRESENT != 0 {
                offset += sample.size.unwrap_or(0).encode(&mut buf[offset..])?;
            }
            if flags & Self::FLAG_SAMPLE_FLAGS_PRESENT != 0 {
                offset += sample
                    .flags
                    .unwrap_or(SampleFlags::empty())
                    .encode(&mut buf[offset..])?;
            }
            if flags & Self::FLAG_SAMPLE_COMPOSITION_TIME_OFFSETS_PRESENT != 0 {
                // version=0 のときは符号なし、version=1 のときは符号付きで扱う
                if version == 1 {
                    offset += sample
                        .composition_time_offset
                        .unwrap_or(0)
                        .encode(&mut buf[offset..])?;
                } else {
                    offset += (sample.composition_time_offset.unwrap_or(0) as u32)
                        .encode(&mut buf[offset..])?;
                }
            }
        }

        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for TrunBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let full_header = FullBoxHeader::decode_at(payload, &mut offset)?;
            let flags = full_header.flags.get();
            let version = full_header.version;

            let sample_count = u32::decode_at(payload, &mut offset)?;

            let data_offset = if flags & Self::FLAG_DATA_OFFSET_PRESENT != 0 {
                Some(i32::decode_at(payload, &mut offset)?)
            } else {
                None
            };

            let first_sample_flags = if flags & Self::FLAG_FIRST_SAMPLE_FLAGS_PRESENT != 0 {
                Some(SampleFlags::decode_at(payload, &mut offset)?)
            } else {
                None
            };

            // 宣言されたサンプル数がペイロードに収まることを先に確認する
            let per_sample_size = Self::per_sample_size(flags);
            if per_sample_size == 0 {
                if sample_count > MAX_FIELDLESS_TRUN_SAMPLES {
                    return Err(Error::malformed(format!(
                        "Too many samples without per-sample fields in 'trun' box: {sample_count}"
                    )));
                }
            } else {
                let required = sample_count as u64 * per_sample_size as u64;
                if ((payload.len() - offset) as u64) < required {
                    return Err(Error::truncated(format!(
                        "Unexpected end of 'trun' box: required={required}, remaining={}",
                        payload.len() - offset
                    )));
                }
            }

            let mut samples = Vec::new();
            for _ in 0..sample_count {
                let duration = if flags & Self::FLAG_SAMPLE_DURATION_PRESENT != 0 {
                    Some(u32::decode_at(payload, &mut offset)?)
                } else {
                    None
                };

                let size = if flags & Self::FLAG_SAMPLE_SIZE_PRESENT != 0 {
                    Some(u32::decode_at(payload, &mut offset)?)
                } else {
                    None
                };

                let sample_flags = if flags & Self::FLAG_SAMPLE_FLAGS_PRESENT != 0 {
                    Some(SampleFlags::decode_at(payload, &mut offset)?)
                } else {
                    None
                };

                let composition_time_offset =
                    if flags & Self::FLAG_SAMPLE_COMPOSITION_TIME_OFFSETS_PRESENT != 0 {
                        if version == 1 {
                            Some(i32::decode_at(payload, &mut offset)?)
                        } else {
                            Some(u32::decode_at(payload, &mut offset)? as i32)
                        }
                    } else {
                        None
                    };

                samples.push(TrunSample {
                    duration,
                    size,
                    flags: sample_flags,
                    composition_time_offset,
                });
            }

            Ok((
                Self {
                    data_offset,
                    first_sample_flags,
                    samples,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for TrunBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(core::iter::empty())
    }
}

impl FullBox for TrunBox {
    fn full_box_version(&self) -> u8 {
        if self.uses_version_1() { 1 } else { 0 }
    }

    fn full_box_flags(&self) -> FullBoxFlags {
        FullBoxFlags::new(self.compute_flags())
    }
}

/// [`TrunBox`] のサンプル情報
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct TrunSample {
    pub duration: Option<u32>,
    pub size: Option<u32>,
    pub flags: Option<SampleFlags>,
    pub composition_time_offset: Option<i32>,
}

/// [ISO/IEC 14496-12] MediaDataBox class
///
/// メディアデータ本体を格納するボックス。
/// ペイロードの中身はこのライブラリは解釈しない。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct MdatBox {
    pub payload: Vec<u8>,
}

impl MdatBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"mdat");
}

impl Encode for MdatBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        // ペイロードが巨大になり得るので、
        // サイズを後から埋めるのではなく最初から確定させてエンコードする
        // （32 ビットに収まらない場合は拡張サイズが使われる）
        let box_size = BoxSize::with_payload_size(Self::TYPE, self.payload.len() as u64);
        let header = BoxHeader::new(Self::TYPE, box_size);
        let mut offset = header.encode(buf)?;
        offset += self.payload.as_slice().encode(&mut buf[offset..])?;
        Ok(offset)
    }
}

impl Decode for MdatBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            Ok((
                Self {
                    payload: payload.to_vec(),
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for MdatBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(core::iter::empty())
    }
}
