//! 各種ボックスをまとめたモジュール
use alloc::{boxed::Box, format, vec::Vec};

use crate::{BaseBox, BoxHeader, BoxSize, BoxType, Decode, Encode, Error, Result};

pub use crate::boxes_fmp4::{
    MdatBox, MfhdBox, MoofBox, TfdtBox, TfhdBox, TrafBox, TrunBox, TrunSample,
};
pub use crate::boxes_moov_tree::{
    DinfBox, DrefBox, HdlrBox, MdhdBox, MdiaBox, MinfBox, MoovBox, MvhdBox, SmhdBox, StblBox,
    StcoBox, StscBox, StscEntry, StsdBox, StszBox, SttsBox, SttsEntry, TkhdBox, TrakBox, UrlBox,
    VmhdBox,
};
pub use crate::boxes_sample_entry::{
    AUDIO_SAMPLE_ENTRY_TYPES, AudioSampleEntry, AudioSampleEntryFields, SampleEntry,
    VISUAL_SAMPLE_ENTRY_TYPES, VisualSampleEntry, VisualSampleEntryFields,
};

/// 一つの親ボックスが保持できる子ボックスの数の上限
///
/// 悪意のある入力によってデコード処理が暴走しないようにするための制限
pub const MAX_CHILD_BOXES: usize = 1024;

/// デコード処理を実行し、失敗した場合にはエラーに発生箇所のボックス種別を付与する
pub(crate) fn with_box_type<F, T>(box_type: BoxType, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    f().map_err(|mut e| {
        if e.box_type.is_none() {
            e.box_type = Some(box_type);
        }
        e
    })
}

/// 必須の子ボックスが存在することを確認する
pub(crate) fn check_mandatory_box<T>(b: Option<T>, name: &str, parent: &str) -> Result<T> {
    b.ok_or_else(|| {
        Error::malformed(format!(
            "Missing mandatory '{name}' box in '{parent}' box"
        ))
    })
}

/// 子ボックスの数が上限を超えていないことを確認する
pub(crate) fn check_child_count(count: &mut usize) -> Result<()> {
    *count += 1;
    if *count > MAX_CHILD_BOXES {
        Err(Error::malformed(format!(
            "Too many child boxes: limit={MAX_CHILD_BOXES}"
        )))
    } else {
        Ok(())
    }
}

/// ftyp / styp ボックスで使われるブランド
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Brand([u8; 4]);

impl Brand {
    /// ISO Base Media File Format
    pub const ISOM: Self = Self::new(*b"isom");

    /// ISO/IEC 14496-12 第 6 版
    pub const ISO6: Self = Self::new(*b"iso6");

    /// CMAF トラックフォーマット
    pub const CMFC: Self = Self::new(*b"cmfc");

    /// CMAF 構造的ブランド（フラグメント用）
    pub const CMF2: Self = Self::new(*b"cmf2");

    /// [`Brand`] インスタンスを生成する
    pub const fn new(brand: [u8; 4]) -> Self {
        Self(brand)
    }

    /// ブランドの値を取得する
    pub const fn get(self) -> [u8; 4] {
        self.0
    }
}

impl core::fmt::Debug for Brand {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if let Ok(s) = core::str::from_utf8(&self.0) {
            f.debug_tuple("Brand").field(&s).finish()
        } else {
            f.debug_tuple("Brand").field(&self.0).finish()
        }
    }
}

impl Encode for Brand {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        self.0.encode(buf)
    }
}

impl Decode for Brand {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        <[u8; 4]>::decode(buf).map(|(b, size)| (Self(b), size))
    }
}

/// [ISO/IEC 14496-12] FileTypeBox class
///
/// ファイルの先頭に配置され、ファイルの形式を表すブランドを格納する。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct FtypBox {
    pub major_brand: Brand,
    pub minor_version: u32,
    pub compatible_brands: Vec<Brand>,
}

impl FtypBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"ftyp");
}

impl Encode for FtypBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += self.major_brand.encode(&mut buf[offset..])?;
        offset += self.minor_version.encode(&mut buf[offset..])?;
        for brand in &self.compatible_brands {
            offset += brand.encode(&mut buf[offset..])?;
        }
        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for FtypBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let major_brand = Brand::decode_at(payload, &mut offset)?;
            let minor_version = u32::decode_at(payload, &mut offset)?;

            // 互換ブランドの数は残りのペイロードサイズから求まる
            let mut compatible_brands = Vec::new();
            while offset < payload.len() {
                compatible_brands.push(Brand::decode_at(payload, &mut offset)?);
            }

            Ok((
                Self {
                    major_brand,
                    minor_version,
                    compatible_brands,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for FtypBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(core::iter::empty())
    }
}

/// [ISO/IEC 14496-12] SegmentTypeBox class
///
/// ftyp と同じレイアウトを持ち、メディアセグメントの先頭に配置される。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct StypBox {
    pub major_brand: Brand,
    pub minor_version: u32,
    pub compatible_brands: Vec<Brand>,
}

impl StypBox {
    /// ボックス種別
    pub const TYPE: BoxType = BoxType::Normal(*b"styp");
}

impl Default for StypBox {
    /// CMAF チャンク用のブランド構成を返す
    fn default() -> Self {
        Self {
            major_brand: Brand::CMF2,
            minor_version: 0,
            compatible_brands: alloc::vec![Brand::CMFC, Brand::ISO6],
        }
    }
}

impl Encode for StypBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new_variable_size(Self::TYPE);
        let mut offset = header.encode(buf)?;
        offset += self.major_brand.encode(&mut buf[offset..])?;
        offset += self.minor_version.encode(&mut buf[offset..])?;
        for brand in &self.compatible_brands {
            offset += brand.encode(&mut buf[offset..])?;
        }
        header.finalize_box_size(&mut buf[..offset])?;
        Ok(offset)
    }
}

impl Decode for StypBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        with_box_type(Self::TYPE, || {
            let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
            header.box_type.expect(Self::TYPE)?;

            let mut offset = 0;
            let major_brand = Brand::decode_at(payload, &mut offset)?;
            let minor_version = u32::decode_at(payload, &mut offset)?;

            let mut compatible_brands = Vec::new();
            while offset < payload.len() {
                compatible_brands.push(Brand::decode_at(payload, &mut offset)?);
            }

            Ok((
                Self {
                    major_brand,
                    minor_version,
                    compatible_brands,
                },
                header.external_size() + payload.len(),
            ))
        })
    }
}

impl BaseBox for StypBox {
    fn box_type(&self) -> BoxType {
        Self::TYPE
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(core::iter::empty())
    }
}

/// このライブラリが関知しないボックスを保持するための構造体
///
/// 未知のボックスはデコード時にエラーにはならず、
/// ペイロードをそのまま保持した上でエンコード時に再出力される。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct UnknownBox {
    pub box_type: BoxType,
    pub box_size: BoxSize,
    pub payload: Vec<u8>,
}

impl Encode for UnknownBox {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let header = BoxHeader::new(self.box_type, self.box_size);
        let mut offset = header.encode(buf)?;
        offset += self.payload.as_slice().encode(&mut buf[offset..])?;
        Ok(offset)
    }
}

impl Decode for UnknownBox {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (header, payload) = BoxHeader::decode_header_and_payload(buf)?;
        Ok((
            Self {
                box_type: header.box_type,
                box_size: BoxSize::with_payload_size(header.box_type, payload.len() as u64),
                payload: payload.to_vec(),
            },
            header.external_size() + payload.len(),
        ))
    }
}

impl BaseBox for UnknownBox {
    fn box_type(&self) -> BoxType {
        self.box_type
    }

    fn is_unknown_box(&self) -> bool {
        true
    }

    fn children<'a>(&'a self) -> Box<dyn 'a + Iterator<Item = &'a dyn BaseBox>> {
        Box::new(core::iter::empty())
    }
}
