//! CMAF フラグメントと初期化セグメントを扱うモジュール
//!
//! CMAF チャンク（フラグメント）は styp / moof / mdat の三つのボックスで構成され、
//! MoQ ではこれが一つのオブジェクトのペイロードとして転送される。
//! 初期化セグメントは ftyp / moov の二つのボックスで構成され、
//! フラグメントに先立ってトラックの情報を伝える。
use alloc::vec::Vec;

use crate::{
    BoxHeader, Decode, Encode, Error, Result,
    boxes::{
        FtypBox, MdatBox, MoofBox, MoovBox, StypBox, UnknownBox, check_child_count,
        check_mandatory_box,
    },
};

/// [`CmafFragment::base_media_decode_time`] が tfdt 不在時に返す番兵値
pub const BASE_MEDIA_DECODE_TIME_NONE: i64 = -1;

/// CMAF フラグメント（styp + moof + mdat）
///
/// デコード時にはトップレベルのボックスの順序は問わず、
/// 三種類のボックスがそれぞれ一つずつ存在することだけを要求する。
/// 関知しないトップレベルのボックスは `unknown_boxes` に保持される。
/// エンコード時には styp / moof / mdat の順で出力される。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct CmafFragment {
    pub styp_box: StypBox,
    pub moof_box: MoofBox,
    pub mdat_box: MdatBox,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl CmafFragment {
    /// フラグメントのシーケンス番号を返す
    pub fn sequence_number(&self) -> u32 {
        self.moof_box.mfhd_box.sequence_number
    }

    /// 先頭トラックフラグメントのベースデコード時間を返す
    ///
    /// tfdt ボックスが存在しない場合には
    /// [`BASE_MEDIA_DECODE_TIME_NONE`] (-1) が返される
    pub fn base_media_decode_time(&self) -> i64 {
        self.moof_box
            .traf_boxes
            .first()
            .and_then(|traf| traf.tfdt_box.as_ref())
            .map(|tfdt| tfdt.base_media_decode_time as i64)
            .unwrap_or(BASE_MEDIA_DECODE_TIME_NONE)
    }

    /// メディアデータ本体への参照を返す
    pub fn media_data(&self) -> &[u8] {
        &self.mdat_box.payload
    }

    /// フラグメントが意味的に完全であることを確認する
    ///
    /// デコード済み・構築済みのツリーに対して、
    /// moof が少なくとも一つの traf を持つことを検証する。
    /// styp / moof / mfhd / mdat の存在は型レベルで保証されている。
    pub fn validate(&self) -> Result<()> {
        if self.moof_box.traf_boxes.is_empty() {
            return Err(Error::invariant_violation(
                "CMAF fragment has no 'traf' boxes in 'moof' box",
            ));
        }
        Ok(())
    }
}

impl Encode for CmafFragment {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = self.styp_box.encode(buf)?;
        offset += self.moof_box.encode(&mut buf[offset..])?;
        offset += self.mdat_box.encode(&mut buf[offset..])?;
        for b in &self.unknown_boxes {
            offset += b.encode(&mut buf[offset..])?;
        }
        Ok(offset)
    }
}

impl Decode for CmafFragment {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let mut children = 0;
        let mut styp_box = None;
        let mut moof_box = None;
        let mut mdat_box = None;
        let mut unknown_boxes = Vec::new();

        while offset < buf.len() {
            check_child_count(&mut children)?;
            let (header, _) = BoxHeader::decode(&buf[offset..])?;
            match header.box_type {
                StypBox::TYPE if styp_box.is_none() => {
                    styp_box = Some(StypBox::decode_at(buf, &mut offset)?);
                }
                MoofBox::TYPE if moof_box.is_none() => {
                    moof_box = Some(MoofBox::decode_at(buf, &mut offset)?);
                }
                MdatBox::TYPE if mdat_box.is_none() => {
                    mdat_box = Some(MdatBox::decode_at(buf, &mut offset)?);
                }
                _ => {
                    unknown_boxes.push(UnknownBox::decode_at(buf, &mut offset)?);
                }
            }
        }

        Ok((
            Self {
                styp_box: check_mandatory_box(styp_box, "styp", "CMAF fragment")?,
                moof_box: check_mandatory_box(moof_box, "moof", "CMAF fragment")?,
                mdat_box: check_mandatory_box(mdat_box, "mdat", "CMAF fragment")?,
                unknown_boxes,
            },
            offset,
        ))
    }
}

/// 初期化セグメント（ftyp + moov）
///
/// フラグメントのデコードに必要なトラック情報を格納する。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub struct InitializationSegment {
    pub ftyp_box: FtypBox,
    pub moov_box: MoovBox,
    pub unknown_boxes: Vec<UnknownBox>,
}

impl InitializationSegment {
    /// セグメントが意味的に完全であることを確認する
    ///
    /// moov が少なくとも一つの trak を持つことを検証する。
    pub fn validate(&self) -> Result<()> {
        if self.moov_box.trak_boxes.is_empty() {
            return Err(Error::invariant_violation(
                "Initialization segment has no 'trak' boxes in 'moov' box",
            ));
        }
        Ok(())
    }
}

impl Encode for InitializationSegment {
    fn encode(&self, buf: &mut [u8]) -> Result<usize> {
        let mut offset = self.ftyp_box.encode(buf)?;
        offset += self.moov_box.encode(&mut buf[offset..])?;
        for b in &self.unknown_boxes {
            offset += b.encode(&mut buf[offset..])?;
        }
        Ok(offset)
    }
}

impl Decode for InitializationSegment {
    fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let mut offset = 0;
        let mut children = 0;
        let mut ftyp_box = None;
        let mut moov_box = None;
        let mut unknown_boxes = Vec::new();

        while offset < buf.len() {
            check_child_count(&mut children)?;
            let (header, _) = BoxHeader::decode(&buf[offset..])?;
            match header.box_type {
                FtypBox::TYPE if ftyp_box.is_none() => {
                    ftyp_box = Some(FtypBox::decode_at(buf, &mut offset)?);
                }
                MoovBox::TYPE if moov_box.is_none() => {
                    moov_box = Some(MoovBox::decode_at(buf, &mut offset)?);
                }
                _ => {
                    unknown_boxes.push(UnknownBox::decode_at(buf, &mut offset)?);
                }
            }
        }

        Ok((
            Self {
                ftyp_box: check_mandatory_box(ftyp_box, "ftyp", "initialization segment")?,
                moov_box: check_mandatory_box(moov_box, "moov", "initialization segment")?,
                unknown_boxes,
            },
            offset,
        ))
    }
}

/// 連結されたバイト列から CMAF フラグメントを順に取り出すスキャナー
///
/// バイト列をボックス単位で走査して styp を探し、
/// そこから最初の mdat の末尾までを一つのフラグメントとしてデコードする。
/// styp 以外のトップレベルのボックスは読み飛ばされる。
///
/// フラグメントの境界規則:
/// - フラグメントは最初の mdat の末尾で終わる
/// - mdat より前に次の styp が現れた場合には、
///   不完全なフラグメントは捨てて次の styp から走査を再開する
/// - ボックスサイズが不正（8 未満、またはバッファ超過）になった時点で走査を終了する
#[derive(Debug)]
pub struct CmafFragmentScanner<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> CmafFragmentScanner<'a> {
    /// [`CmafFragmentScanner`] インスタンスを生成する
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// 現在の走査位置（バイトオフセット）を返す
    pub fn position(&self) -> usize {
        self.offset
    }

    // offset 位置のボックスのサイズと種別を読み取る
    //
    // サイズが不正な場合には None を返す（走査はそこで終了する）
    fn peek_box(&self, offset: usize) -> Option<(usize, [u8; 4])> {
        let remaining = self.data.len().checked_sub(offset)?;
        if remaining < 8 {
            return None;
        }

        let size = u32::from_be_bytes([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ]) as usize;
        if size < 8 || size > remaining {
            return None;
        }

        let box_type = [
            self.data[offset + 4],
            self.data[offset + 5],
            self.data[offset + 6],
            self.data[offset + 7],
        ];
        Some((size, box_type))
    }

    // styp の開始位置からフラグメントの終端位置を探す
    //
    // 終端が見つかった場合には `Ok(end)` を、
    // mdat より前に次の styp が現れた場合には `Err(next_styp_start)` を、
    // どちらも見つからない場合には何も返さない
    fn find_fragment_end(&self, styp_start: usize) -> Option<core::result::Result<usize, usize>> {
        let (styp_size, _) = self.peek_box(styp_start)?;
        let mut offset = styp_start + styp_size;

        while let Some((size, box_type)) = self.peek_box(offset) {
            match &box_type {
                b"styp" => return Some(Err(offset)),
                b"mdat" => return Some(Ok(offset + size)),
                _ => offset += size,
            }
        }
        None
    }
}

impl Iterator for CmafFragmentScanner<'_> {
    type Item = Result<CmafFragment>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (size, box_type) = self.peek_box(self.offset)?;
            if box_type != *b"styp" {
                // フラグメント間のボックスは読み飛ばす
                self.offset += size;
                continue;
            }

            match self.find_fragment_end(self.offset)? {
                Ok(end) => {
                    let fragment_data = &self.data[self.offset..end];
                    self.offset = end;
                    return Some(CmafFragment::decode(fragment_data).map(|(fragment, _)| fragment));
                }
                Err(next_styp_start) => {
                    // mdat のないフラグメントは捨てて次の styp から再開する
                    self.offset = next_styp_start;
                }
            }
        }
    }
}
