//! サンプルエントリー系のボックスをまとめたモジュール
//!
//! このモジュールは内部的なもので、構造体などの外部への提供は boxes モジュールを通して行う
//!
//! コーデック固有の設定情報（avcC / hvcC / vpcC / av1C / esds など）は
//! このライブラリでは解釈せず、不透明なバイト列としてそのまま保持・再出力される。
use alloc::{boxed::Box, vec::Vec};
use core::num::NonZeroU16;

use crate::{
    BaseBox, BoxHeader, BoxType, Decode, Encode, FixedPointNumber, Result,
    boxes::{UnknownBox, with_box_type},
};

/// 映像系のサンプルエントリーとして扱われるボックス種別の一覧
pub const VISUAL_SAMPLE_ENTRY_TYPES: &[BoxType] = &[
    BoxType::Normal(*b"avc1"),
    BoxType::Normal(*b"avc3"),
    BoxType::Normal(*b"hev1"),
    BoxType::Normal(*b"hvc1"),
    BoxType::Normal(*b"vp09"),
    BoxType::Normal(*b"av01"),
];

/// 音声系のサンプルエントリーとして扱われるボックス種別の一覧
pub const AUDIO_SAMPLE_ENTRY_TYPES: &[BoxType] = &[
    BoxType::Normal(*b"mp4a"),
    BoxType::Normal(*b"Opus"),
    BoxType::Normal(*b"opus"),
    BoxType::Normal(*b"ac-3"),
    BoxType::Normal(*b"ec-3"),
];

/// [`StsdBox`](crate::boxes::StsdBox) に含まれるエントリー
///
/// ボックス種別がどちらのファミリーに属するかによって
/// [`VisualSampleEntry`] と [`AudioSampleEntry`] のどちらかにディスパッチされる。
/// どちらにも属さない種別は [`UnknownBox`] としてそのまま保持される。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum SampleEntry {
    Visual(VisualSampleEntry),
    Audio(AudioSampleEntry),
    Unknown(UnknownBox),
}

impl SampleEntry {
    /// チャンネル数を取得する
    ///
    /// 音声の場合はチャンネル数、それ以外の場合は None を返す
    pub fn audio_channel_count(&self) -> Option<u16> {
        match self {
            Self::Audio(b) => Some(b.audio.channelcount),
            _ => None,
        }
    }

    /// サンプリングレート（整数部分のみ）を取得する
    ///
    /// 音声の場合はサンプリングレート、それ以外の場合は None を返す
    pub fn audio_sample_rate(&self) -> Option<u16> {
        match self {
            Self::Audio(b) => Some(b.audio.samplerate.integer),
            _ => None,
        }
    }

    /// 解像度を取得する
    ///
    /// 映像の場合は (幅, 高さ)、それ以外の場合は None を返す
    pub fn video_resolution(&self) -> Option<(u16, u16)> {
        match self {
            Self::Visual(b) => Some((b.visual.width, b.visual.height)),
            _ => None,
        }
    }

    /// コーデック固有の設定情報を取得する
    pub fn codec_config(&self) -> Option<&[u8]> {
        match self {
            Self::Visual(b) => Some(&b.codec_config),
            Self::Audio(b) => Some(&b.codec_config),
            Self::Unknown(_) => None,
        }
    }

    fn inner_box(&self) -> &dyn BaseBox {
        match self {
            Self::Visual(b) => b,
            Self::Audio(b) => b,
            Self::Unknown(b) => b,
        }
    }
}

impl Encode for SampleEntry {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        match self {
            Self::Visual(b) => b.encode(buf),
            Self::Audio(b) => b.encode(buf),
            Self::Unknown(b) => b.encode(buf),
        }
    }
}

impl Decode for SampleEntry {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (header, _) = BoxHeader::decode(buf)?;
        if VISUAL_SAMPLE_ENTRY_TYPES.contains(&header.box_type) {
            VisualSampleEntry::decode(buf).map(|(b, n)| (Self::Visual(b), n))
        } else if AUDIO_SAMPLE_ENTRY_TYPES.contains(&header.box_type) {
            AudioSampleEntry::decode(buf).map(|(b, n)| (Self::Audio(b), n))
        } else {
            UnknownBox::decode(buf).map(|(b, n)| (Self::Unknown(b), n))
        }
    }
}

impl BaseBox for SampleEntry {
    fn box_type(&self) -> BoxType {
        self.inner_box().box_type()
    }

    fn is_unknown_box(&self) -> bool {
        self.inner_box().is_unknown_box()
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        self.inner_box().children()
    }
}

/// 映像系のサンプルエントリーに共通のフィールドをまとめた構造体
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct VisualSampleEntryFields {
    pub data_reference_index: NonZeroU16,
    pub width: u16,
    pub height: u16,
    pub horizresolution: FixedPointNumber<u16, u16>,
    pub vertresolution: FixedPointNumber<u16, u16>,
    pub frame_count: u16,
    pub compressorname: [u8; 32],
    pub depth: u16,
}

impl VisualSampleEntryFields {
    /// [`VisualSampleEntryFields::data_reference_index`] のデフォルト値
    pub const DEFAULT_DATA_REFERENCE_INDEX: NonZeroU16 = NonZeroU16::MIN;

    /// [`VisualSampleEntryFields::horizresolution`] のデフォルト値 (72 dpi)
    pub const DEFAULT_HORIZRESOLUTION: FixedPointNumber<u16, u16> = FixedPointNumber::new(0x48, 0);

    /// [`VisualSampleEntryFields::vertresolution`] のデフォルト値 (72 dpi)
    pub const DEFAULT_VERTRESOLUTION: FixedPointNumber<u16, u16> = FixedPointNumber::new(0x48, 0);

    /// [`VisualSampleEntryFields::frame_count`] のデフォルト値 (1)
    pub const DEFAULT_FRAME_COUNT: u16 = 1;

    /// [`VisualSampleEntryFields::depth`] のデフォルト値 (images are in colour with no alpha)
    pub const DEFAULT_DEPTH: u16 = 0x0018;

    /// 名前なしを表す [`VisualSampleEntryFields::compressorname`] の値
    pub const NULL_COMPRESSORNAME: [u8; 32] = [0; 32];

    /// 解像度だけを指定して、それ以外はデフォルト値を使う [`VisualSampleEntryFields`] を生成する
    pub const fn with_resolution(width: u16, height: u16) -> Self {
        Self {
            data_reference_index: Self::DEFAULT_DATA_REFERENCE_INDEX,
            width,
            height,
            horizresolution: Self::DEFAULT_HORIZRESOLUTION,
            vertresolution: Self::DEFAULT_VERTRESOLUTION,
            frame_count: Self::DEFAULT_FRAME_COUNT,
            compressorname: Self::NULL_COMPRESSORNAME,
            depth: Self::DEFAULT_DEPTH,
        }
    }
}

impl Encode for VisualSampleEntryFields {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = 0;
        offset += [0u8; 6].encode(&mut buf[offset..])?;
        offset += self.data_reference_index.encode(&mut buf[offset..])?;
        offset += [0u8; 2 + 2 + 4 * 3].encode(&mut buf[offset..])?;
        offset += self.width.encode(&mut buf[offset..])?;
        offset += self.height.encode(&mut buf[offset..])?;
        offset += self.horizresolution.encode(&mut buf[offset..])?;
        offset += self.vertresolution.encode(&mut buf[offset..])?;
        offset += [0u8; 4].encode(&mut buf[offset..])?;
        offset += self.frame_count.encode(&mut buf[offset..])?;
        offset += self.compressorname.encode(&mut buf[offset..])?;
        offset += self.depth.encode(&mut buf[offset..])?;
        offset += (-1i16).encode(&mut buf[offset..])?;
        Ok(offset)
    }
}

impl Decode for VisualSampleEntryFields {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let _ = <[u8; 6]>::decode_at(buf, &mut offset)?;
        let data_reference_index = NonZeroU16::decode_at(buf, &mut offset)?;
        let _ = <[u8; 2 + 2 + 4 * 3]>::decode_at(buf, &mut offset)?;
        let width = u16::decode_at(buf, &mut offset)?;
        let height = u16::decode_at(buf, &mut offset)?;
        let horizresolution = FixedPointNumber::decode_at(buf, &mut offset)?;
        let vertresolution = FixedPointNumber::decode_at(buf, &mut offset)?;
        let _ = <[u8; 4]>::decode_at(buf, &mut offset)?;
        let frame_count = u16::decode_at(buf, &mut offset)?;
        let compressorname = <[u8; 32]>::decode_at(buf, &mut offset)?;
        let depth = u16::decode_at(buf, &mut offset)?;
        let _ = <[u8; 2]>::decode_at(buf, &mut offset)?;
        Ok((
            Self {
                data_reference_index,
                width,
                height,
                horizresolution,
                vertresolution,
                frame_count,
                compressorname,
                depth,
            },
            offset,
        ))
    }
}

/// [ISO/IEC 14496-12] VisualSampleEntry class (親: [`StsdBox`](crate::boxes::StsdBox))
///
/// avc1 / avc3 / hev1 / hvc1 / vp09 / av01 といった映像系のサンプルエントリーを
/// まとめて表現する構造体。
/// 共通フィールドの後ろに続くバイト列はコーデック設定情報として不透明に扱われる。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct VisualSampleEntry {
    pub entry_type: BoxType,
    pub visual: VisualSampleEntryFields,

    /// コーデック設定ボックス（avcC / hvcC / vpcC / av1C など）のバイト列
    pub codec_config: Vec<u8>,
}

impl Encode for VisualSampleEntry {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(self.entry_type);
        let mut offset = header.encode(buf)?;
        offset += self.visual.encode(&mut buf[offset..])?;
        offset += self.codec_config.as_slice().encode(&mut buf[offset..])?;
        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for VisualSampleEntry {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (header, _) = BoxHeader::decode(buf)?;
        with_box_type(header.box_type, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;

            let mut offset = 0;
            let visual = VisualSampleEntryFields::decode_at(payload, &mut offset)?;
            let codec_config = payload[offset..].to_vec();

            Ok((
                Self {
                    entry_type: header.box_type,
                    visual,
                    codec_config,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for VisualSampleEntry {
    fn box_type(&self) -> BoxType {
        self.entry_type
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(core::iter::empty())
    }
}

/// 音声系のサンプルエントリーに共通のフィールドをまとめた構造体
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct AudioSampleEntryFields {
    pub data_reference_index: NonZeroU16,
    pub channelcount: u16,
    pub samplesize: u16,

    /// サンプリングレート（16.16 固定小数点数）
    ///
    /// 整数部分（Hz 単位の値）は上位 16 ビットに格納される
    pub samplerate: FixedPointNumber<u16, u16>,
}

impl AudioSampleEntryFields {
    /// [`AudioSampleEntryFields::data_reference_index`] のデフォルト値
    pub const DEFAULT_DATA_REFERENCE_INDEX: NonZeroU16 = NonZeroU16::MIN;

    /// [`AudioSampleEntryFields::samplesize`] のデフォルト値
    pub const DEFAULT_SAMPLESIZE: u16 = 16;
}

impl Encode for AudioSampleEntryFields {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = 0;
        offset += [0u8; 6].encode(&mut buf[offset..])?;
        offset += self.data_reference_index.encode(&mut buf[offset..])?;
        offset += [0u8; 4 * 2].encode(&mut buf[offset..])?;
        offset += self.channelcount.encode(&mut buf[offset..])?;
        offset += self.samplesize.encode(&mut buf[offset..])?;
        offset += [0u8; 2 + 2].encode(&mut buf[offset..])?;
        offset += self.samplerate.encode(&mut buf[offset..])?;
        Ok(offset)
    }
}

impl Decode for AudioSampleEntryFields {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let _ = <[u8; 6]>::decode_at(buf, &mut offset)?;
        let data_reference_index = NonZeroU16::decode_at(buf, &mut offset)?;
        let _ = <[u8; 4 * 2]>::decode_at(buf, &mut offset)?;
        let channelcount = u16::decode_at(buf, &mut offset)?;
        let samplesize = u16::decode_at(buf, &mut offset)?;
        let _ = <[u8; 2 + 2]>::decode_at(buf, &mut offset)?;
        let samplerate = FixedPointNumber::decode_at(buf, &mut offset)?;
        Ok((
            Self {
                data_reference_index,
                channelcount,
                samplesize,
                samplerate,
            },
            offset,
        ))
    }
}

/// [ISO/IEC 14496-12] AudioSampleEntry class (親: [`StsdBox`](crate::boxes::StsdBox))
///
/// mp4a / Opus / ac-3 / ec-3 といった音声系のサンプルエントリーを
/// まとめて表現する構造体。
/// 共通フィールドの後ろに続くバイト列はコーデック設定情報として不透明に扱われる。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct AudioSampleEntry {
    pub entry_type: BoxType,
    pub audio: AudioSampleEntryFields,

    /// コーデック設定ボックス（esds / dOps など）のバイト列
    pub codec_config: Vec<u8>,
}

impl Encode for AudioSampleEntry {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(self.entry_type);
        let mut offset = header.encode(buf)?;
        offset += self.audio.encode(&mut buf[offset..])?;
        offset += self.codec_config.as_slice().encode(&mut buf[offset..])?;
        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for AudioSampleEntry {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (header, _) = BoxHeader::decode(buf)?;
        with_box_type(header.box_type, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;

            let mut offset = 0;
            let audio = AudioSampleEntryFields::decode_at(payload, &mut offset)?;
            let codec_config = payload[offset..].to_vec();

            Ok((
                Self {
                    entry_type: header.box_type,
                    audio,
                    codec_config,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for AudioSampleEntry {
    fn box_type(&self) -> BoxType {
        self.entry_type
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(core::iter::empty())
    }
}
